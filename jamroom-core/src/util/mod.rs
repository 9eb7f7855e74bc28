mod code;
mod id;

pub use code::*;
pub use id::*;

use chrono::{DateTime, Utc};

/// Seconds elapsed between two instants, never negative.
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let elapsed = later.signed_duration_since(earlier);
    (elapsed.num_milliseconds() as f64 / 1000.).max(0.)
}
