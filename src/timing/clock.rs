// Clock - Monotonic cycle counter converted to ticks
// Supports periodic (tempo) semantics and one-shot alignment between clocks

use crate::error::{EngineError, EngineResult};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Scheduler time unit (milliseconds with the default tick rate)
pub type Ticks = i64;

/// Source of raw cycle counts plus its calibration constant
pub trait CycleSource: Send + Sync + fmt::Debug {
    /// Current cycle count. Must never decrease.
    fn cycles(&self) -> i64;

    /// Number of cycles in one second
    fn cycles_per_second(&self) -> i64;
}

/// Cycle source backed by the OS monotonic clock (one cycle = one nanosecond)
#[derive(Debug, Clone)]
pub struct MonotonicCycles {
    epoch: Instant,
}

impl MonotonicCycles {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicCycles {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleSource for MonotonicCycles {
    fn cycles(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    fn cycles_per_second(&self) -> i64 {
        1_000_000_000
    }
}

/// Manually advanced cycle source for deterministic timing
/// Clones share the same counter
#[derive(Debug, Clone)]
pub struct ManualCycles {
    cycles: Arc<AtomicI64>,
    cycles_per_second: i64,
}

impl ManualCycles {
    pub fn new(cycles_per_second: i64) -> Self {
        Self {
            cycles: Arc::new(AtomicI64::new(0)),
            cycles_per_second: cycles_per_second.max(1),
        }
    }

    /// Microsecond resolution, convenient for millisecond tick tests
    pub fn micros() -> Self {
        Self::new(1_000_000)
    }

    pub fn advance(&self, cycles: i64) {
        self.cycles.fetch_add(cycles.max(0), Ordering::Relaxed);
    }

    pub fn advance_millis(&self, millis: i64) {
        self.advance(millis * self.cycles_per_second / 1000);
    }

    pub fn set(&self, cycles: i64) {
        self.cycles.store(cycles, Ordering::Relaxed);
    }
}

impl CycleSource for ManualCycles {
    fn cycles(&self) -> i64 {
        self.cycles.load(Ordering::Relaxed)
    }

    fn cycles_per_second(&self) -> i64 {
        self.cycles_per_second
    }
}

/// Logical timer measuring ticks since its origin
///
/// The default configuration counts milliseconds with a period of one second
/// (60 BPM). Clones are independent timers over the same cycle source.
#[derive(Debug, Clone)]
pub struct Clock {
    source: Arc<dyn CycleSource>,
    origin: i64,
    ticks_per_second: u32,
    period: f64,
}

impl Clock {
    pub const DEFAULT_TICKS_PER_SECOND: u32 = 1000;

    /// Create a clock whose origin is the source's current cycle count
    pub fn new(source: Arc<dyn CycleSource>) -> Self {
        let origin = source.cycles();
        Self {
            source,
            origin,
            ticks_per_second: Self::DEFAULT_TICKS_PER_SECOND,
            period: Self::DEFAULT_TICKS_PER_SECOND as f64,
        }
    }

    /// Clock on the OS monotonic clock
    pub fn monotonic() -> Self {
        Self::new(Arc::new(MonotonicCycles::new()))
    }

    fn cycles(&self) -> i64 {
        self.source.cycles()
    }

    /// Cycles per tick
    fn factor(&self) -> f64 {
        self.source.cycles_per_second() as f64 / self.ticks_per_second as f64
    }

    /// Whole ticks elapsed since the origin
    pub fn now(&self) -> Ticks {
        let elapsed = (self.cycles() - self.origin) as i128;
        let ticks =
            elapsed * self.ticks_per_second as i128 / self.source.cycles_per_second() as i128;
        ticks as Ticks
    }

    /// Fractional ticks elapsed since the origin
    pub fn elapsed_ticks(&self) -> f64 {
        (self.cycles() - self.origin) as f64 / self.factor()
    }

    pub fn seconds(&self) -> f64 {
        (self.cycles() - self.origin) as f64 / self.source.cycles_per_second() as f64
    }

    /// Rebase the origin to the current cycle count
    pub fn reset(&mut self) {
        self.origin = self.cycles();
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn set_period(&mut self, period: f64) -> EngineResult<()> {
        if !(period >= 1.0) {
            return Err(EngineError::Configuration(format!(
                "period too small: {}",
                period
            )));
        }
        self.period = period;
        Ok(())
    }

    pub fn ticks_per_second(&self) -> u32 {
        self.ticks_per_second
    }

    pub fn set_ticks_per_second(&mut self, ticks_per_second: u32) -> EngineResult<()> {
        if ticks_per_second == 0 {
            return Err(EngineError::Configuration(
                "tick rate must be positive".to_string(),
            ));
        }
        self.ticks_per_second = ticks_per_second;
        Ok(())
    }

    /// Current tempo in periods per minute
    pub fn tempo(&self) -> f64 {
        self.ticks_per_second as f64 * 60.0 / self.period
    }

    /// Change the period length in beats per minute
    ///
    /// The fractional period position is preserved across the change, so a
    /// tempo change in the middle of a beat does not jump.
    pub fn set_tempo(&mut self, beats_per_minute: f64) -> EngineResult<()> {
        if !(beats_per_minute >= 1.0) {
            return Err(EngineError::Configuration(format!(
                "tempo is too slow: {}",
                beats_per_minute
            )));
        }
        let period = self.ticks_per_second as f64 * 60.0 / beats_per_minute;
        if period < 1.0 {
            return Err(EngineError::Configuration(format!(
                "tempo {} gives a period below one tick",
                beats_per_minute
            )));
        }

        let count = self.period_count();
        self.period = period;
        self.set_period_count(count);
        Ok(())
    }

    /// Period position as a fractional count
    pub fn period_count(&self) -> f64 {
        self.elapsed_ticks() / self.period
    }

    /// Move the origin so that the current period position equals `count`
    pub fn set_period_count(&mut self, count: f64) {
        let cycles = count * self.period * self.factor();
        self.origin = self.cycles() - cycles.round() as i64;
    }

    /// Whole periods elapsed since the last update or reset
    pub fn expired(&self) -> i64 {
        (self.now() as f64 / self.period).floor() as i64
    }

    /// Advance the origin by exactly one period once it has elapsed
    pub fn update(&mut self) {
        if self.now() as f64 >= self.period {
            self.origin += (self.period * self.factor()).round() as i64;
        }
    }

    /// Advance the origin by `count` periods; no-op if fewer have elapsed
    pub fn update_by(&mut self, count: i64) {
        if count <= 0 || count > self.expired() {
            return;
        }
        self.origin += (self.period * self.factor() * count as f64).round() as i64;
    }

    /// Shift the phase forward by a fraction of a period
    pub fn adjust_period(&mut self, period_delta: f64) {
        self.origin -= (self.period * self.factor() * period_delta).round() as i64;
    }

    /// One-time phase alignment: adopt the other clock's source and origin
    pub fn sync(&mut self, other: &Clock) {
        self.source = Arc::clone(&other.source);
        self.origin = other.origin;
    }

    pub fn origin(&self) -> i64 {
        self.origin
    }

    pub fn source(&self) -> Arc<dyn CycleSource> {
        Arc::clone(&self.source)
    }
}
