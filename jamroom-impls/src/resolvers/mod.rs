mod network_stream;
mod youtube;

pub use network_stream::*;
pub use youtube::*;
