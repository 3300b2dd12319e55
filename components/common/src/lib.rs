pub mod errors;
pub mod types;
pub mod utils;

pub use errors::{ChainError, ChainResult, Disposition};
pub use types::ChainId;
