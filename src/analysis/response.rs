// Response Stats - Return latency of notes sent to an external instrument
//
// A player piano echoes every note it plays back on its MIDI output. Pairing
// those echoes with the notes the engine sent measures the output delay, per
// pitch and per velocity, which is what the anticipation setting compensates.

use crate::timing::{RingHistory, Ticks};
use std::collections::HashMap;
use tracing::trace;

const PITCHES: usize = 128;

#[derive(Debug, Clone)]
struct ResponseCell {
    delays: RingHistory<Ticks>,
    velocity_changes: RingHistory<i16>,
}

impl ResponseCell {
    fn new(history: usize) -> Self {
        Self {
            delays: RingHistory::new(history),
            velocity_changes: RingHistory::new(history),
        }
    }
}

/// Measured echo of an emitted note
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub delay: Ticks,
    pub velocity_change: i16,
}

#[derive(Debug, Clone, Copy)]
struct Emitted {
    time: Ticks,
    velocity: u8,
}

/// Per pitch/velocity history of return delays
#[derive(Debug, Clone)]
pub struct ResponseStats {
    window: Ticks,
    history: usize,
    pending: [Option<Emitted>; PITCHES],
    cells: HashMap<(u8, u8), ResponseCell>,
}

impl ResponseStats {
    /// # Arguments
    /// * `window` - Longest delay (ticks) still accepted as an echo
    /// * `history` - Samples kept per pitch/velocity cell
    pub fn new(window: Ticks, history: usize) -> Self {
        Self {
            window: window.max(0),
            history: history.max(1),
            pending: [None; PITCHES],
            cells: HashMap::new(),
        }
    }

    /// Remember a note-on sent by the engine
    pub fn record_output(&mut self, pitch: u8, velocity: u8, time: Ticks) {
        if let Some(slot) = self.pending.get_mut(pitch as usize) {
            *slot = Some(Emitted { time, velocity });
        }
    }

    /// Match an incoming note-on against the last emitted note of that pitch
    ///
    /// Each emitted note is matched at most once. Returns the measurement
    /// when the input falls within the window.
    pub fn record_input(&mut self, pitch: u8, velocity: u8, time: Ticks) -> Option<Response> {
        let emitted = (*self.pending.get(pitch as usize)?)?;
        let delay = time - emitted.time;
        if delay < 0 || delay > self.window {
            return None;
        }
        self.pending[pitch as usize] = None;

        let response = Response {
            delay,
            velocity_change: velocity as i16 - emitted.velocity as i16,
        };
        let history = self.history;
        let cell = self
            .cells
            .entry((pitch, emitted.velocity))
            .or_insert_with(|| ResponseCell::new(history));
        cell.delays.insert(response.delay);
        cell.velocity_changes.insert(response.velocity_change);

        trace!(pitch, delay, velocity_change = response.velocity_change, "Echo measured");
        Some(response)
    }

    pub fn average_delay(&self, pitch: u8, velocity: u8) -> Option<f64> {
        let cell = self.cells.get(&(pitch, velocity))?;
        average(cell.delays.iter().map(|&d| d as f64))
    }

    pub fn average_velocity_change(&self, pitch: u8, velocity: u8) -> Option<f64> {
        let cell = self.cells.get(&(pitch, velocity))?;
        average(cell.velocity_changes.iter().map(|&v| v as f64))
    }

    /// Mean of every recorded delay, rounded to ticks
    pub fn suggested_anticipation(&self) -> Option<Ticks> {
        let all = self
            .cells
            .values()
            .flat_map(|cell| cell.delays.iter().map(|&d| d as f64));
        average(all).map(|mean| mean.round() as Ticks)
    }

    /// Number of samples currently held
    pub fn samples(&self) -> usize {
        self.cells.values().map(|cell| cell.delays.len()).sum()
    }

    pub fn clear(&mut self) {
        self.pending = [None; PITCHES];
        for cell in self.cells.values_mut() {
            cell.delays.clear();
            cell.velocity_changes.clear();
        }
    }
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_within_window_is_recorded() {
        let mut stats = ResponseStats::new(500, 8);
        stats.record_output(60, 80, 1000);

        let response = stats.record_input(60, 70, 1120).unwrap();
        assert_eq!(response.delay, 120);
        assert_eq!(response.velocity_change, -10);
        assert_eq!(stats.average_delay(60, 80), Some(120.0));
        assert_eq!(stats.average_velocity_change(60, 80), Some(-10.0));

        // already matched
        assert!(stats.record_input(60, 70, 1130).is_none());
    }

    #[test]
    fn test_late_or_unknown_input_ignored() {
        let mut stats = ResponseStats::new(500, 8);
        assert!(stats.record_input(60, 70, 10).is_none());

        stats.record_output(60, 80, 0);
        assert!(stats.record_input(60, 70, 501).is_none());
        assert_eq!(stats.samples(), 0);
        assert_eq!(stats.suggested_anticipation(), None);
    }

    #[test]
    fn test_suggested_anticipation_averages_all_cells() {
        let mut stats = ResponseStats::new(500, 8);
        stats.record_output(60, 80, 0);
        stats.record_input(60, 80, 100);
        stats.record_output(72, 40, 0);
        stats.record_input(72, 40, 151);

        assert_eq!(stats.samples(), 2);
        assert_eq!(stats.suggested_anticipation(), Some(126));
    }

    #[test]
    fn test_cell_history_is_bounded() {
        let mut stats = ResponseStats::new(500, 2);
        for (i, delay) in [100, 200, 300].iter().enumerate() {
            let t = i as Ticks * 1000;
            stats.record_output(60, 64, t);
            stats.record_input(60, 64, t + delay);
        }
        assert_eq!(stats.average_delay(60, 64), Some(250.0));

        stats.clear();
        assert_eq!(stats.samples(), 0);
        assert_eq!(stats.average_delay(60, 64), None);
    }
}
