// In-process loopback backend
// Clones share state, so a test can inject input on one clone while the
// capture thread reads from another.

use crate::midi::backend::{MidiBackend, MidiError, PortDescriptor, PortDirection, PortHandle};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    inputs: Vec<PortDescriptor>,
    outputs: Vec<PortDescriptor>,
    open: HashMap<PortHandle, (PortDirection, String)>,
    pending: HashMap<String, VecDeque<Vec<u8>>>,
    written: HashMap<String, Vec<Vec<u8>>>,
    next_handle: u32,
    fail_writes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend exposing the given input and output port names
    pub fn with_ports(inputs: &[&str], outputs: &[&str]) -> Self {
        let backend = Self::new();
        {
            let mut inner = backend.lock();
            inner.inputs = describe(inputs, PortDirection::Input);
            inner.outputs = describe(outputs, PortDirection::Output);
        }
        backend
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue raw bytes as if they arrived on input port `port_name`
    pub fn inject(&self, port_name: &str, bytes: &[u8]) {
        self.lock()
            .pending
            .entry(port_name.to_string())
            .or_default()
            .push_back(bytes.to_vec());
    }

    /// Every message written to output port `port_name` so far
    pub fn written(&self, port_name: &str) -> Vec<Vec<u8>> {
        self.lock()
            .written
            .get(port_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every subsequent write fail (simulates an unplugged device)
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn open_handles(&self) -> usize {
        self.lock().open.len()
    }
}

fn describe(names: &[&str], direction: PortDirection) -> Vec<PortDescriptor> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| PortDescriptor {
            card: 0,
            device: i as u32,
            subdevice: 0,
            name: name.to_string(),
            supports_input: direction == PortDirection::Input,
            supports_output: direction == PortDirection::Output,
        })
        .collect()
}

impl MidiBackend for MemoryBackend {
    fn enumerate_inputs(&self) -> Vec<PortDescriptor> {
        self.lock().inputs.clone()
    }

    fn enumerate_outputs(&self) -> Vec<PortDescriptor> {
        self.lock().outputs.clone()
    }

    fn open(
        &mut self,
        port: &PortDescriptor,
        direction: PortDirection,
    ) -> Result<PortHandle, MidiError> {
        let mut inner = self.lock();
        let known = match direction {
            PortDirection::Input => &inner.inputs,
            PortDirection::Output => &inner.outputs,
        };
        if !known.iter().any(|p| p.name == port.name) {
            return Err(MidiError::PortNotFound(port.name.clone()));
        }

        let handle = PortHandle(inner.next_handle);
        inner.next_handle += 1;
        inner.open.insert(handle, (direction, port.name.clone()));
        Ok(handle)
    }

    fn close(&mut self, handle: PortHandle) {
        self.lock().open.remove(&handle);
    }

    fn read(&mut self, handle: PortHandle) -> Result<Vec<u8>, MidiError> {
        let mut inner = self.lock();
        let name = match inner.open.get(&handle) {
            Some((PortDirection::Input, name)) => name.clone(),
            Some((PortDirection::Output, _)) => return Err(MidiError::WrongDirection),
            None => return Err(MidiError::InvalidHandle(handle.0)),
        };
        inner
            .pending
            .get_mut(&name)
            .and_then(|queue| queue.pop_front())
            .ok_or(MidiError::WouldBlock)
    }

    fn write(&mut self, handle: PortHandle, bytes: &[u8]) -> Result<usize, MidiError> {
        let mut inner = self.lock();
        let name = match inner.open.get(&handle) {
            Some((PortDirection::Output, name)) => name.clone(),
            Some((PortDirection::Input, _)) => return Err(MidiError::WrongDirection),
            None => return Err(MidiError::InvalidHandle(handle.0)),
        };
        if inner.fail_writes {
            return Err(MidiError::Disconnected);
        }
        inner.written.entry(name).or_default().push(bytes.to_vec());
        Ok(bytes.len())
    }
}
