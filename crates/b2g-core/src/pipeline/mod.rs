//! Staged import pipeline.
//!
//! A [`Stage`] is a strategy with a precondition block state, a
//! postcondition block state, and the two operations the generic
//! [`StageDriver`] needs: pick the next block, and process it. Stages in
//! pipeline order:
//!
//! | stage       | precondition         | postcondition        |
//! |-------------|----------------------|----------------------|
//! | `content`   | block absent         | `content_imported`   |
//! | `addresses` | `content_imported`   | `addresses_imported` |
//! | `relations` | `addresses_imported` | `relations_resolved` |

mod addresses;
mod content;
mod driver;
mod relations;
mod selector;

pub use addresses::AddressStage;
pub use content::ContentStage;
pub use driver::{CycleReport, DriverConfig, StageDriver, StepOutcome};
pub use relations::{RelationResolver, RelationStage};
pub use selector::StageSelector;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::types::{Block, BlockHeight, BlockState};

#[async_trait]
pub trait Stage: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// State a block must be in to be picked; `None` for a stage that
    /// creates blocks.
    fn precondition(&self) -> Option<BlockState>;

    /// State the driver commits after a successful `process`.
    fn postcondition(&self) -> BlockState;

    /// Height of the next block to process, strictly above `after` when
    /// given. `Ok(None)` means no work is available.
    async fn select(&self, after: Option<BlockHeight>) -> Result<Option<BlockHeight>, CoreError>;

    /// Do the stage's work for one block and return the block to commit.
    /// Must not change the block's stored state itself.
    async fn process(&self, height: BlockHeight) -> Result<Block, CoreError>;
}
