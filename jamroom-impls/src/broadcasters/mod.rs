mod channel;
mod logger;

pub use channel::*;
pub use logger::*;
