pub mod clock;
pub mod statistics;

pub use clock::{Clock, ManualClock, MonotonicClock};
