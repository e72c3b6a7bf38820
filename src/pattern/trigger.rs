// Pattern Trigger - Rhythm-tolerance capture of live notes
//
// Onsets are accumulated while their inter-onset intervals stay close to the
// first one. Once the target length is reached the capture is turned into
// `PatternParameters` ready to be started by the scheduler.

use crate::error::{EngineError, EngineResult};
use crate::midi::event::{NoteEvent, NoteKind};
use crate::scheduler::slots::{Direction, PatternParameters};
use crate::timing::{RingHistory, Ticks};
use tracing::{debug, trace};

pub const MIN_SEQUENCE_LENGTH: usize = 2;
pub const MAX_SEQUENCE_LENGTH: usize = 200;

const ATTACK_HISTORY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Nothing captured (initial state, and after a trigger)
    Idle,
    Capturing,
}

/// What a note-on did to the capture
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// Onset added; `captured` notes are now buffered
    Appended { captured: usize },
    /// Rhythm broke; the capture restarted from this onset
    Rejected { ioi: u32, first_ioi: u32 },
    /// Target length reached
    Triggered(PatternParameters),
}

#[derive(Debug, Clone)]
pub struct PatternTrigger {
    state: CaptureState,
    tolerance: f64,
    sequence_length: usize,
    direction: Direction,
    /// Onset times of the captured notes, newest first
    attacks: RingHistory<Ticks>,
    pitches: Vec<u8>,
    velocities: Vec<u8>,
    iois: Vec<u32>,
    durations: Vec<Option<u32>>,
}

impl PatternTrigger {
    pub const DEFAULT_TOLERANCE: f64 = 0.90;
    pub const DEFAULT_SEQUENCE_LENGTH: usize = 4;

    pub fn new(tolerance: f64, sequence_length: usize) -> EngineResult<Self> {
        let mut trigger = Self::default();
        trigger.set_tolerance(tolerance)?;
        trigger.set_sequence_length(sequence_length)?;
        Ok(trigger)
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn captured(&self) -> usize {
        self.pitches.len()
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Accepted ratio between an interval and the first one, in (0, 1)
    pub fn set_tolerance(&mut self, tolerance: f64) -> EngineResult<()> {
        if !(tolerance > 0.0 && tolerance < 1.0) {
            return Err(EngineError::Configuration(format!(
                "tolerance must be in (0, 1), got {}",
                tolerance
            )));
        }
        self.tolerance = tolerance;
        Ok(())
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn set_sequence_length(&mut self, length: usize) -> EngineResult<()> {
        if !(MIN_SEQUENCE_LENGTH..=MAX_SEQUENCE_LENGTH).contains(&length) {
            return Err(EngineError::Configuration(format!(
                "sequence length must be in {}..={}, got {}",
                MIN_SEQUENCE_LENGTH, MAX_SEQUENCE_LENGTH, length
            )));
        }
        self.sequence_length = length;
        Ok(())
    }

    /// Direction given to newly triggered patterns
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    pub fn toggle_direction(&mut self) -> Direction {
        self.direction = self.direction.reversed();
        self.direction
    }

    /// Route a decoded note event
    ///
    /// Note-offs never produce an outcome; a note-off that does not match the
    /// last captured note is reported as a `TimingAnomaly` and leaves the
    /// capture untouched.
    pub fn on_event(&mut self, event: &NoteEvent) -> EngineResult<Option<TriggerOutcome>> {
        match event.kind {
            NoteKind::On => self
                .on_note_on(event.pitch, event.velocity, event.timestamp)
                .map(Some),
            NoteKind::Off => self.on_note_off(event.pitch, event.timestamp).map(|_| None),
        }
    }

    pub fn on_note_on(
        &mut self,
        pitch: u8,
        velocity: u8,
        time: Ticks,
    ) -> EngineResult<TriggerOutcome> {
        if self.state == CaptureState::Idle {
            self.reset_capture(pitch, velocity, time);
            return Ok(TriggerOutcome::Appended { captured: 1 });
        }

        let last = self.attacks.latest().copied().unwrap_or(time);
        let ioi = u32::try_from((time - last).max(0)).unwrap_or(u32::MAX);

        if let Some(&first_ioi) = self.iois.first() {
            let (ioi0, ioin) = (first_ioi as f64, ioi as f64);
            if ioin < ioi0 * self.tolerance || ioin > ioi0 / self.tolerance {
                debug!(ioi, first_ioi, "Rhythm outside tolerance, capture restarted");
                self.reset_capture(pitch, velocity, time);
                return Ok(TriggerOutcome::Rejected { ioi, first_ioi });
            }
        }
        self.iois.push(ioi);

        if self.pitches.len() + 1 >= self.sequence_length {
            let params = self.build_pattern(pitch);
            self.clear();
            return params.map(TriggerOutcome::Triggered);
        }

        self.attacks.insert(time);
        self.pitches.push(pitch);
        self.velocities.push(velocity);
        self.durations.push(None);
        trace!(pitch, ioi, captured = self.pitches.len(), "Onset captured");
        Ok(TriggerOutcome::Appended {
            captured: self.pitches.len(),
        })
    }

    pub fn on_note_off(&mut self, pitch: u8, time: Ticks) -> EngineResult<()> {
        let Some(&last_pitch) = self.pitches.last() else {
            return Ok(());
        };
        if last_pitch != pitch {
            return Err(EngineError::TimingAnomaly(format!(
                "note-off {} does not match last captured note {}",
                pitch, last_pitch
            )));
        }

        let onset = self.attacks.latest().copied().unwrap_or(time);
        if let Some(slot @ None) = self.durations.last_mut() {
            *slot = Some(u32::try_from((time - onset).max(0)).unwrap_or(u32::MAX));
        }
        Ok(())
    }

    /// Start a new capture seeded with a single onset
    fn reset_capture(&mut self, pitch: u8, velocity: u8, time: Ticks) {
        self.clear();
        self.attacks.insert(time);
        self.pitches.push(pitch);
        self.velocities.push(velocity);
        self.durations.push(None);
        self.state = CaptureState::Capturing;
    }

    /// Drop the capture and go back to idle
    pub fn clear(&mut self) {
        self.attacks.clear();
        self.pitches.clear();
        self.velocities.clear();
        self.iois.clear();
        self.durations.clear();
        self.state = CaptureState::Idle;
    }

    // Step 0 is the cycle step: its offset moves from the first captured pitch
    // to the trigger pitch. Playback starts on step 1 from the trigger pitch.
    fn build_pattern(&self, trigger_pitch: u8) -> EngineResult<PatternParameters> {
        let first = self.pitches.first().copied().unwrap_or(trigger_pitch) as i16;

        let mut offsets: Vec<i8> = self
            .pitches
            .iter()
            .map(|&p| (p as i16 - first) as i8)
            .collect();
        if let Some(cycle) = offsets.first_mut() {
            *cycle = (trigger_pitch as i16 - first) as i8;
        }

        // Approximation: a note still held at trigger time (or never released
        // cleanly) lasts as long as the interval that followed it.
        let durations: Vec<u32> = self
            .durations
            .iter()
            .zip(&self.iois)
            .map(|(d, &ioi)| d.unwrap_or(ioi))
            .collect();

        PatternParameters::new(
            offsets,
            self.velocities.clone(),
            self.iois.clone(),
            durations,
            trigger_pitch as i32,
            self.direction,
        )
    }
}

impl Default for PatternTrigger {
    fn default() -> Self {
        Self {
            state: CaptureState::Idle,
            tolerance: Self::DEFAULT_TOLERANCE,
            sequence_length: Self::DEFAULT_SEQUENCE_LENGTH,
            direction: Direction::Forward,
            attacks: RingHistory::new(ATTACK_HISTORY),
            pitches: Vec::with_capacity(MAX_SEQUENCE_LENGTH),
            velocities: Vec::with_capacity(MAX_SEQUENCE_LENGTH),
            iois: Vec::with_capacity(MAX_SEQUENCE_LENGTH),
            durations: Vec::with_capacity(MAX_SEQUENCE_LENGTH),
        }
    }
}
