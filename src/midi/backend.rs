// MIDI backend - Transport seam between the engine and MIDI hardware
//
// The engine never talks to a device directly: it reads raw bytes through a
// backend on the capture thread and writes note messages through a
// `NoteOutput` on the poll loop.

use crate::midi::event::MidiMessage;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MidiError {
    /// Nothing to read right now
    #[error("No MIDI data available")]
    WouldBlock,

    #[error("MIDI port not found: {0}")]
    PortNotFound(String),

    #[error("Invalid MIDI handle: {0}")]
    InvalidHandle(u32),

    #[error("Port opened in the wrong direction")]
    WrongDirection,

    #[error("MIDI init error: {0}")]
    Init(String),

    #[error("MIDI connection error: {0}")]
    Connect(String),

    #[error("MIDI send error: {0}")]
    Send(String),

    #[error("MIDI device disconnected")]
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

/// Description of a port as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub card: u32,
    pub device: u32,
    pub subdevice: u32,
    pub name: String,
    pub supports_input: bool,
    pub supports_output: bool,
}

impl PortDescriptor {
    pub fn supports(&self, direction: PortDirection) -> bool {
        match direction {
            PortDirection::Input => self.supports_input,
            PortDirection::Output => self.supports_output,
        }
    }
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{} {}",
            self.card, self.device, self.subdevice, self.name
        )
    }
}

/// Open port handle issued by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortHandle(pub u32);

/// Hardware MIDI transport
pub trait MidiBackend {
    fn enumerate_inputs(&self) -> Vec<PortDescriptor>;

    fn enumerate_outputs(&self) -> Vec<PortDescriptor>;

    fn open(&mut self, port: &PortDescriptor, direction: PortDirection)
    -> Result<PortHandle, MidiError>;

    fn close(&mut self, handle: PortHandle);

    /// Next complete raw message, or `MidiError::WouldBlock` when idle
    fn read(&mut self, handle: PortHandle) -> Result<Vec<u8>, MidiError>;

    fn write(&mut self, handle: PortHandle, bytes: &[u8]) -> Result<usize, MidiError>;
}

/// Destination for messages emitted by the scheduler
pub trait NoteOutput {
    fn send(&mut self, message: MidiMessage) -> Result<(), MidiError>;
}

/// Collecting output, handy for offline rendering and tests
impl NoteOutput for Vec<MidiMessage> {
    fn send(&mut self, message: MidiMessage) -> Result<(), MidiError> {
        self.push(message);
        Ok(())
    }
}

/// `NoteOutput` writing through an opened backend port
pub struct BackendOutput<B: MidiBackend> {
    backend: B,
    handle: PortHandle,
}

impl<B: MidiBackend> BackendOutput<B> {
    /// Open `port` for output on `backend`
    pub fn open(mut backend: B, port: &PortDescriptor) -> Result<Self, MidiError> {
        let handle = backend.open(port, PortDirection::Output)?;
        Ok(Self { backend, handle })
    }

    pub fn handle(&self) -> PortHandle {
        self.handle
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Close the port and give the backend back
    pub fn close(mut self) -> B {
        self.backend.close(self.handle);
        self.backend
    }
}

impl<B: MidiBackend> NoteOutput for BackendOutput<B> {
    fn send(&mut self, message: MidiMessage) -> Result<(), MidiError> {
        self.backend.write(self.handle, &message.to_bytes())?;
        Ok(())
    }
}

/// Find a port by index or by (partial) name
pub fn find_port(ports: &[PortDescriptor], selector: &str) -> Option<PortDescriptor> {
    if let Ok(index) = selector.parse::<usize>() {
        return ports.get(index).cloned();
    }
    ports
        .iter()
        .find(|p| p.name == selector)
        .or_else(|| ports.iter().find(|p| p.name.contains(selector)))
        .cloned()
}
