use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::CoreError;
use crate::store::EntityStore;
use crate::types::BlockHeight;

use super::Stage;

// ==============================================================================
// Configuration
// ==============================================================================

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Pause between cycles.
    pub interval: Duration,
    /// Stop the driver on the first block failure instead of moving on.
    pub halt_on_error: bool,
    /// Consecutive failures after which a block is quarantined, i.e. skipped
    /// by this driver until restart. `None` retries forever.
    pub max_failures: Option<u32>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            halt_on_error: false,
            max_failures: None,
        }
    }
}

// ==============================================================================
// Outcomes
// ==============================================================================

#[derive(Debug)]
pub enum StepOutcome {
    /// The block was processed and its new state committed.
    Processed(BlockHeight),
    /// The block was processed but its state changed underneath us, so the
    /// commit was refused.
    Superseded(BlockHeight),
    /// The stage failed on this block; its state is unchanged.
    Failed { height: BlockHeight, error: CoreError },
    /// No eligible block.
    Idle,
}

/// What one pass over all eligible blocks did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub processed: Vec<BlockHeight>,
    pub failed: Vec<BlockHeight>,
    pub superseded: Vec<BlockHeight>,
    /// The cycle stopped on a shutdown request before running out of work.
    pub interrupted: bool,
}

impl CycleReport {
    pub fn is_empty(&self) -> bool {
        self.processed.is_empty() && self.failed.is_empty() && self.superseded.is_empty()
    }
}

// ==============================================================================
// Stage Driver
// ==============================================================================

/// Runs one [`Stage`]: select the next block, process it, commit the
/// postcondition state, repeat.
///
/// The commit is a compare-and-swap on the stage's precondition, so a block
/// is advanced at most once even if several drivers share a store. A failed
/// block keeps its state and is retried on the next cycle.
pub struct StageDriver<S> {
    stage: S,
    store: Arc<dyn EntityStore>,
    config: DriverConfig,
    failures: HashMap<BlockHeight, u32>,
}

impl<S: Stage> StageDriver<S> {
    pub fn new(
        stage: S,
        store: Arc<dyn EntityStore>,
        config: DriverConfig,
    ) -> Result<Self, CoreError> {
        if let Some(pre) = stage.precondition() {
            if !pre.can_advance_to(stage.postcondition()) {
                return Err(CoreError::InvalidData(format!(
                    "stage `{}` would move blocks from {pre} back to {}",
                    stage.name(),
                    stage.postcondition()
                )));
            }
        }
        Ok(Self {
            stage,
            store,
            config,
            failures: HashMap::new(),
        })
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    fn is_quarantined(&self, height: BlockHeight) -> bool {
        match self.config.max_failures {
            Some(max) => self.failures.get(&height).copied().unwrap_or(0) >= max,
            None => false,
        }
    }

    /// Process at most one block strictly above `after`.
    ///
    /// Errors raised while selecting (store or node unreachable) are returned
    /// as `Err`; errors raised while processing a block are reported as
    /// [`StepOutcome::Failed`].
    pub async fn step(&mut self, after: Option<BlockHeight>) -> Result<StepOutcome, CoreError> {
        let mut cursor = after;
        let height = loop {
            match self.stage.select(cursor).await? {
                None => return Ok(StepOutcome::Idle),
                Some(h) if self.is_quarantined(h) => {
                    debug!(stage = self.stage.name(), height = %h, "skipping quarantined block");
                    cursor = Some(h);
                }
                Some(h) => break h,
            }
        };

        debug!(stage = self.stage.name(), height = %height, "processing block");
        let mut block = match self.stage.process(height).await {
            Ok(block) if block.height == height => block,
            Ok(block) => {
                let error = CoreError::InvalidData(format!(
                    "stage `{}` returned block {} for height {height}",
                    self.stage.name(),
                    block.height
                ));
                return Ok(self.record_failure(height, error));
            }
            Err(error) => return Ok(self.record_failure(height, error)),
        };

        block.state = self.stage.postcondition();
        let committed = self
            .store
            .commit_block(block, self.stage.precondition())
            .await?;
        self.failures.remove(&height);

        if committed {
            debug!(
                stage = self.stage.name(),
                height = %height,
                state = %self.stage.postcondition(),
                "block state committed"
            );
            Ok(StepOutcome::Processed(height))
        } else {
            warn!(
                stage = self.stage.name(),
                height = %height,
                "block state changed while processing; commit skipped"
            );
            Ok(StepOutcome::Superseded(height))
        }
    }

    fn record_failure(&mut self, height: BlockHeight, error: CoreError) -> StepOutcome {
        let count = self.failures.entry(height).or_insert(0);
        *count += 1;
        let attempts = *count;

        if error.is_missing_origin() {
            warn!(
                stage = self.stage.name(),
                height = %height,
                attempts,
                error = %error,
                "block has an unresolved input; will retry"
            );
        } else {
            error!(
                stage = self.stage.name(),
                height = %height,
                attempts,
                error = %error,
                "block processing failed; will retry"
            );
        }

        if self.is_quarantined(height) {
            error!(
                stage = self.stage.name(),
                height = %height,
                attempts,
                "block quarantined after repeated failures; skipping until restart"
            );
        }

        StepOutcome::Failed { height, error }
    }

    /// Process every eligible block once, in height order.
    ///
    /// A failed block is stepped over and the cycle continues above it,
    /// unless `halt_on_error` is set, in which case the failure is returned.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CoreError> {
        self.cycle(|| false).await
    }

    /// Like [`Self::run_cycle`], but checks `stop` before each block and
    /// ends the cycle early once it returns `true`.
    async fn cycle(&mut self, stop: impl Fn() -> bool) -> Result<CycleReport, CoreError> {
        let mut report = CycleReport::default();
        let mut after: Option<BlockHeight> = None;

        loop {
            if stop() {
                report.interrupted = true;
                break;
            }
            match self.step(after).await? {
                StepOutcome::Idle => break,
                StepOutcome::Processed(height) => report.processed.push(height),
                StepOutcome::Superseded(height) => {
                    report.superseded.push(height);
                    after = after.max(Some(height));
                }
                StepOutcome::Failed { height, error } => {
                    report.failed.push(height);
                    if self.config.halt_on_error {
                        return Err(error);
                    }
                    after = after.max(Some(height));
                }
            }
        }

        Ok(report)
    }

    /// Run cycles every `interval` until `shutdown` flips to `true` or its
    /// sender is dropped. Shutdown is observed between blocks, so a block is
    /// never abandoned half-processed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), CoreError> {
        info!(
            stage = self.stage.name(),
            interval_ms = self.config.interval.as_millis() as u64,
            "stage driver started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let cycle = self.cycle(|| *shutdown.borrow()).await;
            match cycle {
                Ok(report) if report.is_empty() => {
                    debug!(stage = self.stage.name(), "no eligible block; idling");
                }
                Ok(report) => {
                    info!(
                        stage = self.stage.name(),
                        processed = report.processed.len(),
                        failed = report.failed.len(),
                        superseded = report.superseded.len(),
                        interrupted = report.interrupted,
                        last = ?report.processed.last(),
                        "stage cycle finished"
                    );
                }
                Err(e) if self.config.halt_on_error => {
                    error!(stage = self.stage.name(), error = %e, "stage driver halted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        stage = self.stage.name(),
                        error = %e,
                        "stage cycle failed; retrying next tick"
                    );
                }
            }

            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(stage = self.stage.name(), "stage driver stopped");
        Ok(())
    }
}
