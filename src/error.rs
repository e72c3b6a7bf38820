// Engine errors - Taxonomy shared by the scheduling core

use crate::midi::backend::MidiError;
use crate::scheduler::slots::SlotId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Rejected setter value; the previous value is kept
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Slot table or event queue is full; the request is declined
    #[error("Capacity exceeded: all {capacity} entries in use")]
    CapacityExceeded { capacity: usize },

    #[error("Index {index} out of bounds (len {len})")]
    Bounds { index: usize, len: usize },

    /// Slot handle refers to a slot that has since been retired and reused
    #[error("Stale slot handle {slot}")]
    StaleSlot { slot: SlotId },

    /// Noisy live input (e.g. note-off without a matching captured note-on)
    #[error("Timing anomaly: {0}")]
    TimingAnomaly(String),

    #[error("MIDI error: {0}")]
    Midi(#[from] MidiError),
}

pub type EngineResult<T> = Result<T, EngineError>;
