// Tumble Engine - Owns all scheduling state and drives it from the poll loop
//
// One engine per process loop. `tick` samples the clock once, so every
// decision made in an iteration sees the same time.

use crate::analysis::ResponseStats;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::messaging::channels::NoteConsumer;
use crate::midi::backend::{MidiError, NoteOutput};
use crate::midi::event::{MidiMessage, NoteEvent, NoteKind};
use crate::pattern::trigger::{
    MAX_SEQUENCE_LENGTH, MIN_SEQUENCE_LENGTH, PatternTrigger, TriggerOutcome,
};
use crate::scheduler::queue::{EventScheduler, PollReport};
use crate::scheduler::slots::{Direction, DirectionTransform, ParameterSlotTable, SlotId};
use crate::timing::{Clock, Ticks};
use rand::SeedableRng;
use rand::rngs::StdRng;
use ringbuf::traits::Consumer;
use tracing::{debug, info, warn};

const SENSITIVITY_STEP: f64 = 1.02;
const TOLERANCE_MIN: f64 = 0.01;
const TOLERANCE_MAX: f64 = 0.99;

/// Running counters, mostly for logs and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub notes_in: u64,
    pub controls: u64,
    pub echoes: u64,
    pub patterns_started: u64,
    pub patterns_declined: u64,
    pub anomalies: u64,
}

/// Output wrapper remembering emitted notes for echo matching
struct TrackedOutput<'a, O: NoteOutput + ?Sized> {
    inner: &'a mut O,
    response: Option<&'a mut ResponseStats>,
    now: Ticks,
}

impl<O: NoteOutput + ?Sized> NoteOutput for TrackedOutput<'_, O> {
    fn send(&mut self, message: MidiMessage) -> Result<(), MidiError> {
        self.inner.send(message)?;
        if let (Some(stats), MidiMessage::NoteOn { note, velocity, .. }) =
            (self.response.as_deref_mut(), message)
        {
            stats.record_output(note, velocity, self.now);
        }
        Ok(())
    }
}

pub struct TumbleEngine {
    config: EngineConfig,
    clock: Clock,
    trigger: PatternTrigger,
    slots: ParameterSlotTable,
    scheduler: EventScheduler,
    response: Option<ResponseStats>,
    /// Pitches whose last note-on was an echo of our own output
    echo_held: [bool; 128],
    rng: StdRng,
    stats: EngineStats,
}

impl TumbleEngine {
    pub fn new(config: EngineConfig, mut clock: Clock) -> EngineResult<Self> {
        config.validate()?;
        clock.set_ticks_per_second(config.ticks_per_second)?;

        let trigger = PatternTrigger::new(config.tolerance, config.sequence_length)?;
        let response = config.response.enabled.then(|| {
            ResponseStats::new(
                config.ms_to_ticks(config.response.window_ms),
                config.response.history,
            )
        });
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            tolerance = config.tolerance,
            length = config.sequence_length,
            anticipation_ms = config.anticipation_ms,
            slots = config.slot_count,
            "Engine ready"
        );

        Ok(Self {
            slots: ParameterSlotTable::new(config.slot_count),
            scheduler: EventScheduler::new(config.scheduler_settings()),
            config,
            clock,
            trigger,
            response,
            echo_held: [false; 128],
            rng,
            stats: EngineStats::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Engine clock; give a clone to the capture thread so timestamps match
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn now(&self) -> Ticks {
        self.clock.now()
    }

    pub fn slots(&self) -> &ParameterSlotTable {
        &self.slots
    }

    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    pub fn trigger(&self) -> &PatternTrigger {
        &self.trigger
    }

    pub fn response(&self) -> Option<&ResponseStats> {
        self.response.as_ref()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// One loop iteration at the clock's current time
    pub fn tick<O: NoteOutput + ?Sized>(
        &mut self,
        rx: &mut NoteConsumer,
        out: &mut O,
    ) -> Option<PollReport> {
        let now = self.clock.now();
        self.tick_at(now, rx, out)
    }

    /// Drain the capture queue, then poll the scheduler if it is due
    pub fn tick_at<O: NoteOutput + ?Sized>(
        &mut self,
        now: Ticks,
        rx: &mut NoteConsumer,
        out: &mut O,
    ) -> Option<PollReport> {
        while let Some(event) = rx.try_pop() {
            self.handle_event(&event, now);
        }
        self.poll(now, out)
    }

    /// Scheduler poll, gated by the poll interval
    pub fn poll<O: NoteOutput + ?Sized>(&mut self, now: Ticks, out: &mut O) -> Option<PollReport> {
        let mut tracked = TrackedOutput {
            inner: out,
            response: self.response.as_mut(),
            now,
        };
        let report = self.scheduler.check_poll(now, &mut self.slots, &mut tracked)?;
        if report.dropped_output > 0 {
            warn!(dropped = report.dropped_output, "MIDI output dropped this tick");
        }
        Some(report)
    }

    /// Route one live note; returns the slot of a pattern it started
    pub fn handle_event(&mut self, event: &NoteEvent, now: Ticks) -> Option<SlotId> {
        self.stats.notes_in += 1;

        if self.config.controls.is_control(event.pitch) {
            if event.kind == NoteKind::On {
                self.stats.controls += 1;
                self.apply_control(event.pitch);
            }
            return None;
        }

        if self.take_echo(event) {
            return None;
        }

        match self.trigger.on_event(event) {
            Ok(Some(TriggerOutcome::Triggered(params))) => {
                match self
                    .scheduler
                    .start_pattern(params, &mut self.slots, &mut self.rng, now)
                {
                    Ok(slot) => {
                        self.stats.patterns_started += 1;
                        Some(slot)
                    }
                    Err(EngineError::CapacityExceeded { capacity }) => {
                        self.stats.patterns_declined += 1;
                        warn!(capacity, "Parameter space is full, pattern not started");
                        None
                    }
                    Err(e) => {
                        self.stats.patterns_declined += 1;
                        warn!("Pattern not started: {}", e);
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(e) => {
                self.stats.anomalies += 1;
                warn!("{}", e);
                None
            }
        }
    }

    // Echoes of our own notes are measured, never captured
    fn take_echo(&mut self, event: &NoteEvent) -> bool {
        let Some(response) = self.response.as_mut() else {
            return false;
        };
        let held = &mut self.echo_held[event.pitch as usize & 0x7F];

        match event.kind {
            NoteKind::On => {
                if response
                    .record_input(event.pitch, event.velocity, event.timestamp)
                    .is_some()
                {
                    *held = true;
                    self.stats.echoes += 1;
                    return true;
                }
                false
            }
            NoteKind::Off => std::mem::replace(held, false),
        }
    }

    fn apply_control(&mut self, pitch: u8) {
        let controls = &self.config.controls;
        if pitch == controls.direction_key {
            let direction = self.toggle_direction();
            info!(?direction, "Direction of new patterns changed");
        } else if pitch == controls.length_up_key {
            let length = (self.trigger.sequence_length() + 1).min(MAX_SEQUENCE_LENGTH);
            self.apply_length(length);
        } else if pitch == controls.length_down_key {
            let length = self
                .trigger
                .sequence_length()
                .saturating_sub(1)
                .max(MIN_SEQUENCE_LENGTH);
            self.apply_length(length);
        }
    }

    fn apply_length(&mut self, length: usize) {
        if self.set_sequence_length(length).is_ok() {
            info!(length, "Sequence length changed");
        }
    }

    pub fn toggle_direction(&mut self) -> Direction {
        self.trigger.toggle_direction()
    }

    pub fn set_sequence_length(&mut self, length: usize) -> EngineResult<()> {
        self.trigger.set_sequence_length(length)?;
        self.config.sequence_length = length;
        Ok(())
    }

    pub fn set_tolerance(&mut self, tolerance: f64) -> EngineResult<()> {
        self.trigger.set_tolerance(tolerance)?;
        self.config.tolerance = tolerance;
        Ok(())
    }

    /// Tighten the rhythm check
    pub fn increase_sensitivity(&mut self) -> f64 {
        self.scale_tolerance(SENSITIVITY_STEP)
    }

    /// Loosen the rhythm check
    pub fn decrease_sensitivity(&mut self) -> f64 {
        self.scale_tolerance(1.0 / SENSITIVITY_STEP)
    }

    fn scale_tolerance(&mut self, factor: f64) -> f64 {
        let tolerance = (self.trigger.tolerance() * factor).clamp(TOLERANCE_MIN, TOLERANCE_MAX);
        // clamped into (0, 1), cannot fail
        let _ = self.set_tolerance(tolerance);
        debug!(tolerance, "Tolerance changed");
        self.trigger.tolerance()
    }

    pub fn set_anticipation_ms(&mut self, ms: u32) {
        self.config.anticipation_ms = ms;
        self.scheduler.set_anticipation(self.config.ms_to_ticks(ms));
    }

    /// Mean measured echo delay, if response measurement is on
    pub fn suggested_anticipation(&self) -> Option<Ticks> {
        self.response.as_ref()?.suggested_anticipation()
    }

    fn transform(&mut self, transform: DirectionTransform) -> usize {
        let count = self.slots.apply_transform(transform, &mut self.rng);
        info!(?transform, patterns = count, "Directions changed");
        count
    }

    pub fn forward_directions(&mut self) -> usize {
        self.transform(DirectionTransform::Forward)
    }

    pub fn invert_directions(&mut self) -> usize {
        self.transform(DirectionTransform::Invert)
    }

    pub fn reverse_directions(&mut self) -> usize {
        self.transform(DirectionTransform::Reverse)
    }

    pub fn randomize_directions(&mut self) -> usize {
        self.transform(DirectionTransform::Randomize)
    }

    /// Stop one pattern immediately
    pub fn stop_pattern(&mut self, slot: SlotId) -> bool {
        self.scheduler.retire_slot(slot, &mut self.slots)
    }

    /// Stop every pattern and release sounding notes
    pub fn shutdown<O: NoteOutput + ?Sized>(&mut self, out: &mut O) -> usize {
        let stopped = self.slots.deactivate_all();
        let released = self.scheduler.flush(out);
        self.trigger.clear();
        info!(stopped, released, "Engine shut down");
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseConfig;
    use crate::messaging::channels::create_note_channel;
    use crate::timing::ManualCycles;
    use ringbuf::traits::Producer;
    use std::sync::Arc;

    fn engine(config: EngineConfig) -> (TumbleEngine, ManualCycles) {
        let cycles = ManualCycles::micros();
        let clock = Clock::new(Arc::new(cycles.clone()));
        let config = EngineConfig {
            rng_seed: Some(11),
            ..config
        };
        (TumbleEngine::new(config, clock).unwrap(), cycles)
    }

    fn play(engine: &mut TumbleEngine, onsets: &[(Ticks, u8)]) -> Vec<Option<SlotId>> {
        onsets
            .iter()
            .map(|&(t, p)| engine.handle_event(&NoteEvent::note_on(p, 90, t), t))
            .collect()
    }

    #[test]
    fn test_uniform_phrase_starts_pattern() {
        let (mut engine, _) = engine(EngineConfig::default());
        let started = play(&mut engine, &[(0, 60), (500, 62), (1000, 64), (1500, 65)]);

        assert!(started[..3].iter().all(Option::is_none));
        let slot = started[3].unwrap();
        assert!(engine.slots().is_live(slot));
        assert_eq!(engine.stats().patterns_started, 1);
        // first step anticipated by 125 ticks
        assert_eq!(engine.scheduler().next_fire_tick(), Some(1875));
    }

    #[test]
    fn test_control_keys_are_not_captured() {
        let (mut engine, _) = engine(EngineConfig::default());
        engine.handle_event(&NoteEvent::note_on(96, 90, 0), 0);
        assert_eq!(engine.trigger().sequence_length(), 5);
        engine.handle_event(&NoteEvent::note_on(95, 90, 0), 0);
        engine.handle_event(&NoteEvent::note_on(95, 90, 0), 0);
        engine.handle_event(&NoteEvent::note_on(95, 90, 0), 0);
        engine.handle_event(&NoteEvent::note_on(95, 90, 0), 0);
        assert_eq!(engine.trigger().sequence_length(), 2);

        engine.handle_event(&NoteEvent::note_on(21, 90, 0), 0);
        engine.handle_event(&NoteEvent::note_off(21, 10), 10);
        assert_eq!(engine.trigger().direction(), Direction::Backward);
        assert_eq!(engine.trigger().captured(), 0);
        assert_eq!(engine.stats().controls, 6);
        assert_eq!(engine.stats().anomalies, 0);
    }

    #[test]
    fn test_full_table_declines_pattern() {
        let (mut engine, _) = engine(EngineConfig {
            slot_count: 1,
            sequence_length: 2,
            ..EngineConfig::default()
        });
        let started = play(&mut engine, &[(0, 60), (300, 62), (1000, 64), (1300, 66)]);
        assert!(started[1].is_some());
        assert!(started[3].is_none());
        assert_eq!(engine.stats().patterns_declined, 1);
        assert_eq!(engine.slots().active_count(), 1);
    }

    #[test]
    fn test_note_off_anomaly_is_counted_not_fatal() {
        let (mut engine, _) = engine(EngineConfig::default());
        play(&mut engine, &[(0, 60), (500, 62)]);
        engine.handle_event(&NoteEvent::note_off(60, 600), 600);
        assert_eq!(engine.stats().anomalies, 1);
        assert_eq!(engine.trigger().captured(), 2);
    }

    #[test]
    fn test_tick_drains_queue_and_plays() {
        let (mut engine, cycles) = engine(EngineConfig {
            sequence_length: 2,
            ..EngineConfig::default()
        });
        let (mut tx, mut rx) = create_note_channel(16);
        let mut out: Vec<MidiMessage> = Vec::new();

        tx.try_push(NoteEvent::note_on(60, 100, 0)).unwrap();
        tx.try_push(NoteEvent::note_on(64, 100, 400)).unwrap();
        cycles.advance_millis(400);
        engine.tick(&mut rx, &mut out);
        assert_eq!(engine.slots().active_count(), 1);

        // first step at 400 + 400 - 125
        cycles.advance_millis(275);
        engine.tick(&mut rx, &mut out);
        assert_eq!(
            out,
            vec![MidiMessage::NoteOn {
                channel: 0,
                note: 68,
                velocity: 100
            }]
        );
    }

    #[test]
    fn test_sensitivity_is_clamped() {
        let (mut engine, _) = engine(EngineConfig::default());
        assert!((engine.increase_sensitivity() - 0.918).abs() < 1e-9);
        for _ in 0..20 {
            engine.increase_sensitivity();
        }
        assert_eq!(engine.trigger().tolerance(), 0.99);
        for _ in 0..400 {
            engine.decrease_sensitivity();
        }
        assert_eq!(engine.trigger().tolerance(), 0.01);
        assert!(engine.set_tolerance(1.2).is_err());
    }

    #[test]
    fn test_invert_then_forward_directions() {
        let (mut engine, _) = engine(EngineConfig {
            sequence_length: 2,
            ..EngineConfig::default()
        });
        play(&mut engine, &[(0, 60), (300, 62), (1000, 64), (1300, 66)]);
        assert_eq!(engine.invert_directions(), 2);
        assert!(
            engine
                .slots()
                .iter_active()
                .all(|(_, p)| p.direction() == Direction::Backward)
        );
        assert_eq!(engine.forward_directions(), 2);
        assert_eq!(engine.reverse_directions(), 2);
        assert_eq!(engine.randomize_directions(), 2);
    }

    #[test]
    fn test_echoes_are_measured_not_captured() {
        let (mut engine, _) = engine(EngineConfig {
            sequence_length: 2,
            response: ResponseConfig {
                enabled: true,
                ..ResponseConfig::default()
            },
            ..EngineConfig::default()
        });
        let mut out: Vec<MidiMessage> = Vec::new();
        play(&mut engine, &[(0, 60), (400, 64)]);
        engine.poll(675, &mut out);
        assert_eq!(out.len(), 1);

        // the instrument plays 68 back 90 ticks later
        engine.handle_event(&NoteEvent::note_on(68, 100, 765), 765);
        engine.handle_event(&NoteEvent::note_off(68, 800), 800);
        assert_eq!(engine.stats().echoes, 1);
        assert_eq!(engine.stats().anomalies, 0);
        assert_eq!(engine.trigger().captured(), 0);
        assert_eq!(engine.suggested_anticipation(), Some(90));
    }

    #[test]
    fn test_shutdown_releases_and_stops() {
        let (mut engine, _) = engine(EngineConfig {
            sequence_length: 2,
            ..EngineConfig::default()
        });
        let mut out: Vec<MidiMessage> = Vec::new();
        play(&mut engine, &[(0, 60), (400, 64)]);
        engine.poll(675, &mut out);
        out.clear();

        assert_eq!(engine.shutdown(&mut out), 1);
        assert_eq!(out, vec![MidiMessage::NoteOff { channel: 0, note: 68 }]);
        assert_eq!(engine.slots().active_count(), 0);
        assert!(engine.scheduler().is_empty());
    }

    #[test]
    fn test_stop_pattern() {
        let (mut engine, _) = engine(EngineConfig {
            sequence_length: 2,
            ..EngineConfig::default()
        });
        let slot = play(&mut engine, &[(0, 60), (400, 64)])[1].unwrap();
        assert!(engine.stop_pattern(slot));
        let mut out: Vec<MidiMessage> = Vec::new();
        engine.poll(10_000, &mut out);
        assert!(out.is_empty());
    }
}
