//! The outside collaborators the engine consumes, specified only at their boundary.

mod broadcast;
mod resolver;
mod storage;

pub use broadcast::*;
pub use resolver::*;
pub use storage::*;
