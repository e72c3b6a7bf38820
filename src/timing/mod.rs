// Timing - Clock and recent-history primitives for the scheduler

pub mod clock;
pub mod history;

pub use clock::{Clock, CycleSource, ManualCycles, MonotonicCycles, Ticks};
pub use history::RingHistory;
