// MIDI Capture - Device-read thread feeding the note queue
//
// The thread owns its backend instance, decodes note messages, stamps them
// with its own (synced) clock and pushes them into the bounded SPSC queue.
// It never blocks on the queue: a full queue drops the event.

use crate::messaging::channels::NoteProducer;
use crate::midi::backend::{MidiBackend, MidiError, PortDescriptor, PortDirection};
use crate::midi::event::NoteEvent;
use crate::timing::Clock;
use ringbuf::traits::Producer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counters shared with the capture thread
#[derive(Debug, Default)]
pub struct CaptureCounters {
    captured: AtomicU64,
    dropped: AtomicU64,
    ignored: AtomicU64,
    read_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub captured: u64,
    pub dropped: u64,
    pub ignored: u64,
    pub read_errors: u64,
}

impl CaptureCounters {
    pub fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            captured: self.captured.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
        }
    }
}

pub struct MidiCapture {
    running: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MidiCapture {
    /// Open `port` on `backend` and start reading it on a new thread
    ///
    /// `idle` is how long the thread sleeps when the port has nothing to read.
    pub fn spawn<B>(
        mut backend: B,
        port: &PortDescriptor,
        clock: Clock,
        mut producer: NoteProducer,
        idle: Duration,
    ) -> Result<Self, MidiError>
    where
        B: MidiBackend + Send + 'static,
    {
        let handle = backend.open(port, PortDirection::Input)?;
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(CaptureCounters::default());

        let thread_running = Arc::clone(&running);
        let thread_counters = Arc::clone(&counters);
        let port_name = port.name.clone();

        let thread = thread::Builder::new()
            .name("midi-capture".to_string())
            .spawn(move || {
                info!(port = %port_name, "MIDI capture started");
                while thread_running.load(Ordering::Acquire) {
                    match backend.read(handle) {
                        Ok(bytes) => {
                            let Some(event) = NoteEvent::from_bytes(&bytes, clock.now()) else {
                                thread_counters.ignored.fetch_add(1, Ordering::Relaxed);
                                continue;
                            };
                            if producer.try_push(event).is_err() {
                                thread_counters.dropped.fetch_add(1, Ordering::Relaxed);
                                warn!("Note queue full, event dropped");
                            } else {
                                thread_counters.captured.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Err(MidiError::WouldBlock) => thread::sleep(idle),
                        Err(e) => {
                            thread_counters.read_errors.fetch_add(1, Ordering::Relaxed);
                            warn!("MIDI read failed: {}", e);
                            thread::sleep(idle.max(Duration::from_millis(10)));
                        }
                    }
                }
                backend.close(handle);
                debug!(port = %port_name, "MIDI capture stopped");
            })
            .map_err(|e| MidiError::Init(e.to_string()))?;

        Ok(Self {
            running,
            counters,
            thread: Some(thread),
        })
    }

    pub fn stats(&self) -> CaptureStats {
        self.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the thread and wait for it to close its port
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("MIDI capture thread panicked");
            }
        }
    }
}

impl Drop for MidiCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::channels::create_note_channel;
    use crate::midi::memory::MemoryBackend;
    use ringbuf::traits::Consumer;
    use std::time::Instant;

    fn wait_for<F: FnMut() -> bool>(mut done: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_capture_decodes_notes_in_order() {
        let backend = MemoryBackend::with_ports(&["keys"], &[]);
        let port = backend.enumerate_inputs()[0].clone();
        let (tx, mut rx) = create_note_channel(16);

        let mut capture = MidiCapture::spawn(
            backend.clone(),
            &port,
            Clock::monotonic(),
            tx,
            Duration::from_millis(1),
        )
        .unwrap();

        backend.inject("keys", &[0x90, 60, 100]);
        backend.inject("keys", &[0xB0, 7, 127]);
        backend.inject("keys", &[0x80, 60, 0]);

        let mut events = Vec::new();
        wait_for(|| {
            while let Some(e) = rx.try_pop() {
                events.push(e);
            }
            events.len() == 2
        });
        capture.stop();

        assert_eq!(events.len(), 2);
        assert!(events[0].is_note_on());
        assert!(events[1].is_note_off());
        assert!(events[1].timestamp >= events[0].timestamp);

        let stats = capture.stats();
        assert_eq!(stats.captured, 2);
        assert_eq!(stats.ignored, 1);
        assert_eq!(backend.open_handles(), 0);
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let backend = MemoryBackend::with_ports(&["keys"], &[]);
        let port = backend.enumerate_inputs()[0].clone();
        let (tx, _rx) = create_note_channel(1);

        for pitch in 60..64 {
            backend.inject("keys", &[0x90, pitch, 64]);
        }
        let capture = MidiCapture::spawn(
            backend.clone(),
            &port,
            Clock::monotonic(),
            tx,
            Duration::from_millis(1),
        )
        .unwrap();

        wait_for(|| capture.stats().captured + capture.stats().dropped == 4);
        let stats = capture.stats();
        assert_eq!(stats.captured, 1);
        assert_eq!(stats.dropped, 3);
    }

    #[test]
    fn test_unknown_port_fails_to_spawn() {
        let backend = MemoryBackend::with_ports(&[], &[]);
        let ghost = PortDescriptor {
            card: 0,
            device: 0,
            subdevice: 0,
            name: "ghost".to_string(),
            supports_input: true,
            supports_output: false,
        };
        let (tx, _rx) = create_note_channel(4);
        let result = MidiCapture::spawn(backend, &ghost, Clock::monotonic(), tx, Duration::ZERO);
        assert!(matches!(result, Err(MidiError::PortNotFound(_))));
    }
}
