// Pattern module - Live capture of rhythmically uniform phrases

pub mod trigger;

pub use trigger::{
    CaptureState, MAX_SEQUENCE_LENGTH, MIN_SEQUENCE_LENGTH, PatternTrigger, TriggerOutcome,
};
