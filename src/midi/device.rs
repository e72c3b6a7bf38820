// Gestion des devices MIDI - midir backend
//
// Input ports are opened with a callback running on midir's own thread; the
// callback only copies the raw message into a lock-free ring buffer, and
// `read` pops from it on the capture thread.

use crate::midi::backend::{MidiBackend, MidiError, PortDescriptor, PortDirection, PortHandle};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};
use std::collections::HashMap;
use tracing::{debug, warn};

// Holds more than 500 ms of input at full MIDI rate
const RAW_QUEUE_CAPACITY: usize = 512;

/// Channel voice message copied out of the midir callback without allocating
#[derive(Debug, Clone, Copy)]
struct RawMessage {
    bytes: [u8; 3],
    len: usize,
}

impl RawMessage {
    fn copy_from(message: &[u8]) -> Option<Self> {
        if message.is_empty() || message.len() > 3 {
            return None; // SysEx et messages longs ignorés
        }
        let mut bytes = [0u8; 3];
        bytes[..message.len()].copy_from_slice(message);
        Some(Self {
            bytes,
            len: message.len(),
        })
    }
}

enum Connection {
    Input {
        _connection: MidiInputConnection<()>,
        rx: HeapCons<RawMessage>,
    },
    Output(MidiOutputConnection),
}

pub struct MidirBackend {
    client_name: String,
    connections: HashMap<PortHandle, Connection>,
    next_handle: u32,
}

impl MidirBackend {
    pub fn new(client_name: &str) -> Self {
        Self {
            client_name: client_name.to_string(),
            connections: HashMap::new(),
            next_handle: 0,
        }
    }

    fn issue_handle(&mut self) -> PortHandle {
        let handle = PortHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn open_input(&mut self, port: &PortDescriptor) -> Result<PortHandle, MidiError> {
        let mut midi_in =
            MidiInput::new(&self.client_name).map_err(|e| MidiError::Init(e.to_string()))?;
        midi_in.ignore(Ignore::All);

        let ports = midi_in.ports();
        let index = ports
            .iter()
            .position(|p| {
                midi_in
                    .port_name(p)
                    .map(|name| name == port.name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| MidiError::PortNotFound(port.name.clone()))?;

        let (mut tx, rx) = HeapRb::<RawMessage>::new(RAW_QUEUE_CAPACITY).split();
        let port_name = port.name.clone();

        let connection = midi_in
            .connect(
                &ports[index],
                "tumbler-input",
                move |_timestamp, message, _| {
                    // MIDI Callback - running on a separate thread
                    if let Some(raw) = RawMessage::copy_from(message) {
                        // try_push is not blocking
                        if tx.try_push(raw).is_err() {
                            warn!(port = %port_name, "MIDI buffer full, event ignored");
                        }
                    }
                },
                (),
            )
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        let handle = self.issue_handle();
        self.connections.insert(
            handle,
            Connection::Input {
                _connection: connection,
                rx,
            },
        );
        debug!(port = %port.name, ?handle, "MIDI input opened");
        Ok(handle)
    }

    fn open_output(&mut self, port: &PortDescriptor) -> Result<PortHandle, MidiError> {
        let midi_out =
            MidiOutput::new(&self.client_name).map_err(|e| MidiError::Init(e.to_string()))?;

        let ports = midi_out.ports();
        let index = ports
            .iter()
            .position(|p| {
                midi_out
                    .port_name(p)
                    .map(|name| name == port.name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| MidiError::PortNotFound(port.name.clone()))?;

        let connection = midi_out
            .connect(&ports[index], "tumbler-output")
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        let handle = self.issue_handle();
        self.connections.insert(handle, Connection::Output(connection));
        debug!(port = %port.name, ?handle, "MIDI output opened");
        Ok(handle)
    }
}

impl MidiBackend for MidirBackend {
    /// Liste tous les ports MIDI d'entrée disponibles
    fn enumerate_inputs(&self) -> Vec<PortDescriptor> {
        let midi_in = match MidiInput::new(&format!("{} scanner", self.client_name)) {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to initialize MIDI input: {}", e);
                return Vec::new();
            }
        };

        midi_in
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                let name = midi_in.port_name(port).ok()?;
                Some(PortDescriptor {
                    card: 0,
                    device: index as u32,
                    subdevice: 0,
                    name,
                    supports_input: true,
                    supports_output: false,
                })
            })
            .collect()
    }

    fn enumerate_outputs(&self) -> Vec<PortDescriptor> {
        let midi_out = match MidiOutput::new(&format!("{} scanner", self.client_name)) {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to initialize MIDI output: {}", e);
                return Vec::new();
            }
        };

        midi_out
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                let name = midi_out.port_name(port).ok()?;
                Some(PortDescriptor {
                    card: 0,
                    device: index as u32,
                    subdevice: 0,
                    name,
                    supports_input: false,
                    supports_output: true,
                })
            })
            .collect()
    }

    fn open(
        &mut self,
        port: &PortDescriptor,
        direction: PortDirection,
    ) -> Result<PortHandle, MidiError> {
        if !port.supports(direction) {
            return Err(MidiError::WrongDirection);
        }
        match direction {
            PortDirection::Input => self.open_input(port),
            PortDirection::Output => self.open_output(port),
        }
    }

    fn close(&mut self, handle: PortHandle) {
        match self.connections.remove(&handle) {
            Some(Connection::Output(connection)) => {
                let _ = connection.close();
            }
            Some(Connection::Input { _connection, .. }) => {
                let _ = _connection.close();
            }
            None => {}
        }
    }

    fn read(&mut self, handle: PortHandle) -> Result<Vec<u8>, MidiError> {
        match self.connections.get_mut(&handle) {
            Some(Connection::Input { rx, .. }) => rx
                .try_pop()
                .map(|raw| raw.bytes[..raw.len].to_vec())
                .ok_or(MidiError::WouldBlock),
            Some(Connection::Output(_)) => Err(MidiError::WrongDirection),
            None => Err(MidiError::InvalidHandle(handle.0)),
        }
    }

    fn write(&mut self, handle: PortHandle, bytes: &[u8]) -> Result<usize, MidiError> {
        match self.connections.get_mut(&handle) {
            Some(Connection::Output(connection)) => {
                connection
                    .send(bytes)
                    .map_err(|e| MidiError::Send(e.to_string()))?;
                Ok(bytes.len())
            }
            Some(Connection::Input { .. }) => Err(MidiError::WrongDirection),
            None => Err(MidiError::InvalidHandle(handle.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_message_copy() {
        let raw = RawMessage::copy_from(&[0x90, 60, 100]).unwrap();
        assert_eq!(&raw.bytes[..raw.len], &[0x90, 60, 100]);

        let short = RawMessage::copy_from(&[0xC0, 5]).unwrap();
        assert_eq!(short.len, 2);

        assert!(RawMessage::copy_from(&[]).is_none());
        assert!(RawMessage::copy_from(&[0xF0, 1, 2, 3, 0xF7]).is_none());
    }

    #[test]
    fn test_unknown_handle() {
        let mut backend = MidirBackend::new("tumbler test");
        assert_eq!(
            backend.read(PortHandle(9)),
            Err(MidiError::InvalidHandle(9))
        );
        assert_eq!(
            backend.write(PortHandle(9), &[0x80, 1, 0]),
            Err(MidiError::InvalidHandle(9))
        );
    }
}
