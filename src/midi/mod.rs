// MIDI - Message decoding, backend seam and the capture thread

pub mod backend;
pub mod capture;
pub mod device;
pub mod event;
pub mod memory;

pub use backend::{
    BackendOutput, MidiBackend, MidiError, NoteOutput, PortDescriptor, PortDirection, PortHandle,
    find_port,
};
pub use capture::{CaptureStats, MidiCapture};
pub use device::MidirBackend;
pub use event::{MidiMessage, NoteEvent, NoteKind};
pub use memory::MemoryBackend;
