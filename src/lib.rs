// Tumbler - Library exports for the binary, tests and benchmarks

pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod messaging;
pub mod midi;
pub mod pattern;
pub mod scheduler;
pub mod telemetry;
pub mod timing;

// Re-export commonly used types for convenience
pub use analysis::ResponseStats;
pub use config::{ConfigError, EngineConfig, LiveControls, ResponseConfig};
pub use engine::{EngineStats, TumbleEngine};
pub use error::{EngineError, EngineResult};
pub use messaging::channels::{NoteConsumer, NoteProducer, create_note_channel};
pub use midi::{
    BackendOutput, MemoryBackend, MidiBackend, MidiCapture, MidiError, MidiMessage, MidirBackend,
    NoteEvent, NoteKind, NoteOutput, PortDescriptor, PortDirection,
};
pub use pattern::{PatternTrigger, TriggerOutcome};
pub use scheduler::{
    Direction, DirectionTransform, EventScheduler, ParameterSlotTable, PatternParameters,
    PollReport, SchedulerSettings, SlotId, Task,
};
pub use timing::{Clock, CycleSource, ManualCycles, MonotonicCycles, RingHistory, Ticks};
