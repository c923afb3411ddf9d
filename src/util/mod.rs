//! Utility modules: clock abstraction.

pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};
