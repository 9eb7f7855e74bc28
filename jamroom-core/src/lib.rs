//! Leaf primitives of the jamroom session engine: configuration, identifiers, the playback
//! state machine and the capabilities the engine consumes.

mod capabilities;
mod config;
mod error;
mod playback;
mod util;

pub use capabilities::*;
pub use config::*;
pub use error::*;
pub use playback::*;
pub use util::*;
