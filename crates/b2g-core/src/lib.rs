pub mod error;
pub mod pipeline;
pub mod rpc;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::CoreError;
pub use types::{Address, Block, BlockHeight, BlockState, InputPoint, Transaction};
