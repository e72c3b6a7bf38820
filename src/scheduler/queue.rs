// Event Scheduler - Time-ordered pending tasks fired by a cooperative poll
//
// Pattern tasks look their parameters up in the slot table at fire time and
// reschedule themselves; every emitted note-on queues a matching note-off.

use crate::error::{EngineError, EngineResult};
use crate::midi::backend::NoteOutput;
use crate::midi::event::MidiMessage;
use crate::scheduler::slots::{ParameterSlotTable, PatternParameters, SlotId};
use crate::timing::Ticks;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::{debug, info, trace, warn};

/// What a scheduled event does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Play the next step of the pattern held in the slot
    Pattern(SlotId),
    /// Release a note emitted earlier
    NoteOff { channel: u8, pitch: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Active,
    Retired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub fire_tick: Ticks,
    pub task: Task,
    pub status: EventStatus,
    seq: u64,
}

// BinaryHeap is a max-heap: earliest fire tick first, then insertion order
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_tick
            .cmp(&self.fire_tick)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Scheduler parameters, all times in ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Lookahead subtracted from a pattern's first fire time
    pub anticipation: Ticks,
    pub poll_interval: Ticks,
    /// Valid pitch window; a step leaving it retires the pattern
    pub pitch_min: i32,
    pub pitch_max: i32,
    pub channel: u8,
    /// Maximum number of pending events
    pub capacity: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            anticipation: 125,
            poll_interval: 10,
            pitch_min: 21,
            pitch_max: 96,
            channel: 0,
            capacity: 2048,
        }
    }
}

/// Outcome of one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Pattern steps played
    pub fired: usize,
    /// Patterns stopped (range exit or external deactivation)
    pub retired: usize,
    /// Note-offs sent
    pub released: usize,
    /// Messages the output refused
    pub dropped_output: usize,
}

impl PollReport {
    pub fn is_idle(&self) -> bool {
        *self == PollReport::default()
    }
}

pub struct EventScheduler {
    settings: SchedulerSettings,
    queue: BinaryHeap<ScheduledEvent>,
    /// Events produced while scanning, queued once the scan is over
    deferred: Vec<ScheduledEvent>,
    next_seq: u64,
    last_poll: Option<Ticks>,
}

impl EventScheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            settings,
            queue: BinaryHeap::with_capacity(settings.capacity),
            deferred: Vec::new(),
            next_seq: 0,
            last_poll: None,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn set_anticipation(&mut self, anticipation: Ticks) {
        self.settings.anticipation = anticipation.max(0);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.settings.capacity
    }

    /// Earliest pending fire tick
    pub fn next_fire_tick(&self) -> Option<Ticks> {
        self.queue.peek().map(|e| e.fire_tick)
    }

    /// Pending events, in no particular order
    pub fn pending(&self) -> impl Iterator<Item = &ScheduledEvent> + '_ {
        self.queue.iter()
    }

    fn make_event(&mut self, fire_tick: Ticks, task: Task) -> ScheduledEvent {
        let seq = self.next_seq;
        self.next_seq += 1;
        ScheduledEvent {
            fire_tick,
            task,
            status: EventStatus::Active,
            seq,
        }
    }

    /// Queue `task` to fire at `fire_tick`
    pub fn schedule_at(&mut self, fire_tick: Ticks, task: Task) -> EngineResult<()> {
        if self.queue.len() >= self.settings.capacity {
            return Err(EngineError::CapacityExceeded {
                capacity: self.settings.capacity,
            });
        }
        let event = self.make_event(fire_tick, task);
        self.queue.push(event);
        Ok(())
    }

    /// Queue the first step of the pattern in `slot`
    ///
    /// The fire time is pulled forward by the anticipation and never lands
    /// before `now`.
    pub fn schedule_pattern(
        &mut self,
        slot: SlotId,
        first_interval: u32,
        now: Ticks,
    ) -> EngineResult<Ticks> {
        let fire_tick = (now + first_interval as Ticks - self.settings.anticipation).max(now);
        self.schedule_at(fire_tick, Task::Pattern(slot))?;
        Ok(fire_tick)
    }

    /// Allocate a slot for `params` and schedule its first step
    ///
    /// On a full table or queue nothing is started and the error is returned
    /// for the caller to log.
    pub fn start_pattern<R: Rng + ?Sized>(
        &mut self,
        params: PatternParameters,
        slots: &mut ParameterSlotTable,
        rng: &mut R,
        now: Ticks,
    ) -> EngineResult<SlotId> {
        let first_interval = params.first_interval();
        let steps = params.len();
        let slot = slots.allocate(params, rng)?;

        match self.schedule_pattern(slot, first_interval, now) {
            Ok(fire_tick) => {
                info!(%slot, steps, fire_tick, "Pattern started");
                Ok(slot)
            }
            Err(e) => {
                slots.retire(slot);
                Err(e)
            }
        }
    }

    /// Stop a pattern now instead of at its next firing
    pub fn retire_slot(&mut self, slot: SlotId, slots: &mut ParameterSlotTable) -> bool {
        let mut events = std::mem::take(&mut self.queue).into_vec();
        let mut found = false;
        for event in events.iter_mut() {
            if event.task == Task::Pattern(slot) && event.status == EventStatus::Active {
                event.status = EventStatus::Retired;
                found = true;
            }
        }
        self.queue = BinaryHeap::from(events);
        slots.retire(slot) || found
    }

    /// Fire every event due at or before `now`
    ///
    /// Events produced by the scan (reschedules, note-offs) are queued after
    /// it, so one call never fires the same event twice. Output failures are
    /// counted in the report and do not stop scheduling.
    pub fn poll<O: NoteOutput + ?Sized>(
        &mut self,
        now: Ticks,
        slots: &mut ParameterSlotTable,
        out: &mut O,
    ) -> PollReport {
        let mut report = PollReport::default();

        while let Some(top) = self.queue.peek() {
            if top.fire_tick > now {
                break;
            }
            let Some(event) = self.queue.pop() else {
                break;
            };
            if event.status == EventStatus::Retired {
                continue;
            }

            match event.task {
                Task::Pattern(slot) => self.fire_pattern(event, slot, now, slots, out, &mut report),
                Task::NoteOff { channel, pitch } => {
                    match out.send(MidiMessage::NoteOff {
                        channel,
                        note: pitch,
                    }) {
                        Ok(()) => report.released += 1,
                        Err(e) => {
                            report.dropped_output += 1;
                            warn!(pitch, "Note-off dropped: {}", e);
                        }
                    }
                }
            }
        }

        for event in std::mem::take(&mut self.deferred) {
            self.requeue(event, slots, out, &mut report);
        }

        report
    }

    /// Poll only if the poll interval has elapsed since the previous poll
    pub fn check_poll<O: NoteOutput + ?Sized>(
        &mut self,
        now: Ticks,
        slots: &mut ParameterSlotTable,
        out: &mut O,
    ) -> Option<PollReport> {
        if let Some(last) = self.last_poll {
            if now - last < self.settings.poll_interval {
                return None;
            }
        }
        self.last_poll = Some(now);
        Some(self.poll(now, slots, out))
    }

    fn fire_pattern<O: NoteOutput + ?Sized>(
        &mut self,
        event: ScheduledEvent,
        slot: SlotId,
        now: Ticks,
        slots: &mut ParameterSlotTable,
        out: &mut O,
        report: &mut PollReport,
    ) {
        let params = match slots.get_mut(slot) {
            Ok(params) if params.is_active() => params,
            Ok(_) => {
                debug!(%slot, "Pattern deactivated, event retired");
                report.retired += 1;
                return;
            }
            Err(e) => {
                debug!(%slot, "Event retired: {}", e);
                report.retired += 1;
                return;
            }
        };

        let step = match params.next_step() {
            Ok(step) => step,
            Err(e) => {
                warn!(%slot, "Corrupt pattern retired: {}", e);
                params.deactivate();
                report.retired += 1;
                return;
            }
        };

        if step.pitch < self.settings.pitch_min || step.pitch > self.settings.pitch_max {
            info!(%slot, pitch = step.pitch, "Pattern left the keyboard, retired");
            params.deactivate();
            report.retired += 1;
            return;
        }

        let pitch = step.pitch as u8;
        let channel = self.settings.channel;
        trace!(%slot, pitch, velocity = step.velocity, now, "Pattern step");

        match out.send(MidiMessage::NoteOn {
            channel,
            note: pitch,
            velocity: step.velocity,
        }) {
            Ok(()) => {
                let off = self.make_event(
                    now + step.duration.max(1) as Ticks,
                    Task::NoteOff { channel, pitch },
                );
                self.deferred.push(off);
            }
            Err(e) => {
                report.dropped_output += 1;
                warn!(%slot, pitch, "Note-on dropped: {}", e);
            }
        }
        report.fired += 1;

        params.advance(step.pitch);
        let next = self.make_event(
            event.fire_tick + step.interval.max(1) as Ticks,
            Task::Pattern(slot),
        );
        self.deferred.push(next);
    }

    fn requeue<O: NoteOutput + ?Sized>(
        &mut self,
        event: ScheduledEvent,
        slots: &mut ParameterSlotTable,
        out: &mut O,
        report: &mut PollReport,
    ) {
        if self.queue.len() < self.settings.capacity {
            self.queue.push(event);
            return;
        }

        // No room left: release the note now, stop the pattern
        match event.task {
            Task::NoteOff { channel, pitch } => {
                warn!(pitch, "Event queue full, note released early");
                match out.send(MidiMessage::NoteOff {
                    channel,
                    note: pitch,
                }) {
                    Ok(()) => report.released += 1,
                    Err(_) => report.dropped_output += 1,
                }
            }
            Task::Pattern(slot) => {
                warn!(%slot, "Event queue full, pattern retired");
                if slots.retire(slot) {
                    report.retired += 1;
                }
            }
        }
    }

    /// Send every pending note-off now and drop all pattern tasks
    pub fn flush<O: NoteOutput + ?Sized>(&mut self, out: &mut O) -> usize {
        let mut released = 0;
        let mut events = std::mem::take(&mut self.queue).into_sorted_vec();
        // into_sorted_vec is ascending by Ord, i.e. latest first here
        events.reverse();

        for event in events {
            if let Task::NoteOff { channel, pitch } = event.task {
                match out.send(MidiMessage::NoteOff {
                    channel,
                    note: pitch,
                }) {
                    Ok(()) => released += 1,
                    Err(e) => warn!(pitch, "Note-off dropped during flush: {}", e),
                }
            }
        }
        self.deferred.clear();
        debug!(released, "Scheduler flushed");
        released
    }
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new(SchedulerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::backend::MidiError;
    use crate::scheduler::slots::Direction;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            anticipation: 100,
            poll_interval: 10,
            pitch_min: 21,
            pitch_max: 96,
            channel: 0,
            capacity: 64,
        }
    }

    fn climbing(start: i32) -> PatternParameters {
        // cycle +12, then +2 and +4
        PatternParameters::new(
            vec![12, 2, 4],
            vec![100, 90, 80],
            vec![500, 400, 300],
            vec![200, 150, 100],
            start,
            Direction::Forward,
        )
        .unwrap()
    }

    fn note_ons(out: &[MidiMessage]) -> Vec<u8> {
        out.iter()
            .filter_map(|m| match m {
                MidiMessage::NoteOn { note, .. } => Some(*note),
                _ => None,
            })
            .collect()
    }

    struct Unplugged;

    impl NoteOutput for Unplugged {
        fn send(&mut self, _message: MidiMessage) -> Result<(), MidiError> {
            Err(MidiError::Disconnected)
        }
    }

    #[test]
    fn test_first_fire_is_anticipated() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut slots = ParameterSlotTable::new(4);
        let mut scheduler = EventScheduler::new(settings());

        scheduler
            .start_pattern(climbing(60), &mut slots, &mut rng, 1000)
            .unwrap();
        assert_eq!(scheduler.next_fire_tick(), Some(1400));
    }

    #[test]
    fn test_anticipation_underflow_fires_immediately() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut slots = ParameterSlotTable::new(4);
        let mut scheduler = EventScheduler::new(SchedulerSettings {
            anticipation: 800,
            ..settings()
        });

        scheduler
            .start_pattern(climbing(60), &mut slots, &mut rng, 1000)
            .unwrap();
        assert_eq!(scheduler.next_fire_tick(), Some(1000));
    }

    #[test]
    fn test_pattern_plays_and_reschedules() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut slots = ParameterSlotTable::new(4);
        let mut scheduler = EventScheduler::new(settings());
        let mut out = Vec::new();

        scheduler
            .start_pattern(climbing(60), &mut slots, &mut rng, 0)
            .unwrap();

        let report = scheduler.poll(400, &mut slots, &mut out);
        assert_eq!(report.fired, 1);
        assert_eq!(note_ons(&out), vec![62]);
        // step 1 interval is 400; note-off after 150
        assert_eq!(scheduler.next_fire_tick(), Some(550));

        scheduler.poll(550, &mut slots, &mut out);
        assert_eq!(out.last(), Some(&MidiMessage::NoteOff { channel: 0, note: 62 }));

        scheduler.poll(800, &mut slots, &mut out);
        assert_eq!(note_ons(&out), vec![62, 66]);
    }

    #[test]
    fn test_poll_twice_without_time_fires_nothing_twice() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut slots = ParameterSlotTable::new(4);
        let mut scheduler = EventScheduler::new(settings());
        let mut out = Vec::new();

        scheduler
            .start_pattern(climbing(60), &mut slots, &mut rng, 0)
            .unwrap();

        let first = scheduler.poll(400, &mut slots, &mut out);
        let second = scheduler.poll(400, &mut slots, &mut out);
        assert_eq!(first.fired, 1);
        assert!(second.is_idle());
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_range_exit_retires_and_frees_slot() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut slots = ParameterSlotTable::new(1);
        let mut scheduler = EventScheduler::new(SchedulerSettings {
            pitch_max: 64,
            ..settings()
        });
        let mut out = Vec::new();

        let slot = scheduler
            .start_pattern(climbing(60), &mut slots, &mut rng, 0)
            .unwrap();

        // 62 plays, then 66 would exceed the window
        scheduler.poll(400, &mut slots, &mut out);
        let report = scheduler.poll(800, &mut slots, &mut out);
        assert_eq!(report.retired, 1);
        assert_eq!(report.fired, 0);
        assert_eq!(note_ons(&out), vec![62]);
        assert!(!slots.is_live(slot));

        let again = scheduler.start_pattern(climbing(40), &mut slots, &mut rng, 800);
        assert!(again.is_ok());
    }

    #[test]
    fn test_external_deactivation_retires_at_next_fire() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut slots = ParameterSlotTable::new(4);
        let mut scheduler = EventScheduler::new(settings());
        let mut out = Vec::new();

        let slot = scheduler
            .start_pattern(climbing(60), &mut slots, &mut rng, 0)
            .unwrap();
        slots.retire(slot);

        let report = scheduler.poll(1000, &mut slots, &mut out);
        assert_eq!(report.retired, 1);
        assert!(out.is_empty());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_retire_slot_marks_pending_event() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut slots = ParameterSlotTable::new(4);
        let mut scheduler = EventScheduler::new(settings());
        let mut out = Vec::new();

        let slot = scheduler
            .start_pattern(climbing(60), &mut slots, &mut rng, 0)
            .unwrap();
        assert!(scheduler.retire_slot(slot, &mut slots));
        assert!(scheduler.pending().all(|e| e.status == EventStatus::Retired));

        let report = scheduler.poll(1000, &mut slots, &mut out);
        assert!(report.is_idle());
        assert!(out.is_empty());
    }

    #[test]
    fn test_output_failure_keeps_scheduling() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut slots = ParameterSlotTable::new(4);
        let mut scheduler = EventScheduler::new(settings());

        let slot = scheduler
            .start_pattern(climbing(60), &mut slots, &mut rng, 0)
            .unwrap();
        let report = scheduler.poll(400, &mut slots, &mut Unplugged);
        assert_eq!(report.fired, 1);
        assert_eq!(report.dropped_output, 1);
        assert!(slots.is_live(slot));
        assert_eq!(scheduler.len(), 1);
        assert_eq!(slots.get(slot).unwrap().current_pitch(), 62);
    }

    #[test]
    fn test_check_poll_respects_interval() {
        let mut slots = ParameterSlotTable::new(4);
        let mut scheduler = EventScheduler::new(settings());
        let mut out = Vec::new();

        assert!(scheduler.check_poll(0, &mut slots, &mut out).is_some());
        assert!(scheduler.check_poll(5, &mut slots, &mut out).is_none());
        assert!(scheduler.check_poll(10, &mut slots, &mut out).is_some());
    }

    #[test]
    fn test_queue_capacity() {
        let mut scheduler = EventScheduler::new(SchedulerSettings {
            capacity: 2,
            ..settings()
        });
        let off = Task::NoteOff { channel: 0, pitch: 60 };
        scheduler.schedule_at(10, off).unwrap();
        scheduler.schedule_at(20, off).unwrap();
        assert_eq!(
            scheduler.schedule_at(30, off),
            Err(EngineError::CapacityExceeded { capacity: 2 })
        );
    }

    #[test]
    fn test_full_queue_keeps_note_off_and_retires_pattern() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut slots = ParameterSlotTable::new(4);
        let mut scheduler = EventScheduler::new(SchedulerSettings {
            capacity: 1,
            ..settings()
        });
        let mut out = Vec::new();

        let slot = scheduler
            .start_pattern(climbing(60), &mut slots, &mut rng, 0)
            .unwrap();
        let report = scheduler.poll(400, &mut slots, &mut out);
        assert_eq!(report.fired, 1);
        assert_eq!(report.retired, 1);
        assert!(!slots.is_live(slot));
        // only the note-off is left
        assert_eq!(scheduler.next_fire_tick(), Some(550));
    }

    #[test]
    fn test_flush_releases_notes_and_drops_patterns() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut slots = ParameterSlotTable::new(4);
        let mut scheduler = EventScheduler::new(settings());
        let mut out = Vec::new();

        scheduler
            .start_pattern(climbing(60), &mut slots, &mut rng, 0)
            .unwrap();
        scheduler.poll(400, &mut slots, &mut out);
        out.clear();

        assert_eq!(scheduler.flush(&mut out), 1);
        assert_eq!(out, vec![MidiMessage::NoteOff { channel: 0, note: 62 }]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_events_fire_in_time_order() {
        let mut slots = ParameterSlotTable::new(1);
        let mut scheduler = EventScheduler::new(settings());
        let mut out = Vec::new();

        scheduler.schedule_at(30, Task::NoteOff { channel: 0, pitch: 3 }).unwrap();
        scheduler.schedule_at(10, Task::NoteOff { channel: 0, pitch: 1 }).unwrap();
        scheduler.schedule_at(10, Task::NoteOff { channel: 0, pitch: 2 }).unwrap();

        scheduler.poll(30, &mut slots, &mut out);
        let pitches: Vec<u8> = out
            .iter()
            .filter_map(|m| match m {
                MidiMessage::NoteOff { note, .. } => Some(*note),
                _ => None,
            })
            .collect();
        assert_eq!(pitches, vec![1, 2, 3]);
    }
}
