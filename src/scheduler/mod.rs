// Scheduler module - Slot table and time-ordered playback of generated patterns

pub mod queue;
pub mod slots;

pub use queue::{EventScheduler, EventStatus, PollReport, ScheduledEvent, SchedulerSettings, Task};
pub use slots::{
    Direction, DirectionTransform, ParameterSlotTable, PatternParameters, PatternStep, SlotId,
};
