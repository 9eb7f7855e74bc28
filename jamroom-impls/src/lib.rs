//! Implementations of the capabilities the collab system consumes.

mod broadcasters;
mod resolvers;
mod stores;
mod util;

pub use broadcasters::*;
pub use resolvers::*;
pub use stores::*;
