// Parameter slots - Fixed table of reusable pattern records
//
// Each running pattern owns one slot. Slots are addressed through `SlotId`
// handles carrying a generation, so a handle kept by a scheduled event
// cannot reach a record that was retired and handed to another pattern.

use crate::error::{EngineError, EngineResult};
use rand::Rng;
use std::fmt;

/// Lowest and highest MIDI note numbers
pub const MIDI_PITCH_MIN: i32 = 0;
pub const MIDI_PITCH_MAX: i32 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: usize,
    generation: u32,
}

impl SlotId {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Melodic direction of a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward = 1,
    Backward = -1,
}

impl Direction {
    pub fn sign(self) -> i32 {
        self as i32
    }

    pub fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// Bulk change applied to every running pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionTransform {
    /// Back to the captured motion
    Forward,
    /// Everything moves against the captured motion
    Invert,
    /// Flip each pattern's current direction
    Reverse,
    /// Coin flip per pattern
    Randomize,
}

/// One step of a pattern, ready to be played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternStep {
    pub pitch: i32,
    pub velocity: u8,
    pub duration: u32,
    pub interval: u32,
}

/// Parameters and playback cursor of one generative pattern
///
/// `pitch_offsets[0]` is the cycle delta (how far the pattern climbs per
/// repetition); the other offsets are relative to the first captured pitch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PatternParameters {
    pitch_offsets: Vec<i8>,
    velocities: Vec<u8>,
    inter_onset_intervals: Vec<u32>,
    durations: Vec<u32>,
    cursor: usize,
    current_pitch: i32,
    direction: Direction,
    active: bool,
}

impl PatternParameters {
    /// Commit a captured pattern. Every sequence must have the same non-zero
    /// length; the cursor starts on step 1 (wrapping for one-step patterns).
    pub fn new(
        pitch_offsets: Vec<i8>,
        velocities: Vec<u8>,
        inter_onset_intervals: Vec<u32>,
        durations: Vec<u32>,
        current_pitch: i32,
        direction: Direction,
    ) -> EngineResult<Self> {
        let len = pitch_offsets.len();
        if len == 0 {
            return Err(EngineError::Configuration(
                "pattern must contain at least one step".to_string(),
            ));
        }
        for other in [velocities.len(), inter_onset_intervals.len(), durations.len()] {
            if other != len {
                return Err(EngineError::Bounds { index: other, len });
            }
        }

        Ok(Self {
            pitch_offsets,
            velocities,
            inter_onset_intervals,
            durations,
            cursor: 1 % len,
            current_pitch,
            direction,
            active: true,
        })
    }

    pub fn len(&self) -> usize {
        self.pitch_offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pitch_offsets.is_empty()
    }

    pub fn pitch_offsets(&self) -> &[i8] {
        &self.pitch_offsets
    }

    pub fn velocities(&self) -> &[u8] {
        &self.velocities
    }

    pub fn inter_onset_intervals(&self) -> &[u32] {
        &self.inter_onset_intervals
    }

    pub fn durations(&self) -> &[u32] {
        &self.durations
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current_pitch(&self) -> i32 {
        self.current_pitch
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Interval before the first note of the pattern
    pub fn first_interval(&self) -> u32 {
        self.inter_onset_intervals.first().copied().unwrap_or(0)
    }

    /// Step at the cursor, with its pitch clamped to the MIDI range
    pub fn next_step(&self) -> EngineResult<PatternStep> {
        let i = self.cursor;
        let len = self.len();
        let bounds = || EngineError::Bounds { index: i, len };

        let offset = *self.pitch_offsets.get(i).ok_or_else(bounds)? as i32;
        let pitch = (self.current_pitch + self.direction.sign() * offset)
            .clamp(MIDI_PITCH_MIN, MIDI_PITCH_MAX);

        Ok(PatternStep {
            pitch,
            velocity: *self.velocities.get(i).ok_or_else(bounds)?,
            duration: *self.durations.get(i).ok_or_else(bounds)?,
            interval: *self.inter_onset_intervals.get(i).ok_or_else(bounds)?,
        })
    }

    /// Record `pitch` as played and move the cursor, looping at the end
    pub fn advance(&mut self, pitch: i32) {
        self.current_pitch = pitch;
        self.cursor += 1;
        if self.cursor >= self.len() {
            self.cursor = 0;
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    params: PatternParameters,
}

/// Fixed-size table of pattern slots
#[derive(Debug, Clone)]
pub struct ParameterSlotTable {
    slots: Vec<Slot>,
}

impl ParameterSlotTable {
    pub const DEFAULT_SIZE: usize = 256;

    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![Slot::default(); size.max(1)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.params.active).count()
    }

    /// Store `params` in a free slot
    ///
    /// Probing starts at a random index and wraps, so churn is spread over the
    /// table. A full table declines with `CapacityExceeded`.
    pub fn allocate<R: Rng + ?Sized>(
        &mut self,
        mut params: PatternParameters,
        rng: &mut R,
    ) -> EngineResult<SlotId> {
        let size = self.slots.len();
        let start = rng.gen_range(0..size);

        for k in 0..size {
            let index = (start + k) % size;
            let slot = &mut self.slots[index];
            if !slot.params.active {
                slot.generation = slot.generation.wrapping_add(1);
                params.active = true;
                slot.params = params;
                return Ok(SlotId {
                    index,
                    generation: slot.generation,
                });
            }
        }

        Err(EngineError::CapacityExceeded { capacity: size })
    }

    fn slot(&self, id: SlotId) -> EngineResult<&Slot> {
        let len = self.slots.len();
        let slot = self.slots.get(id.index).ok_or(EngineError::Bounds {
            index: id.index,
            len,
        })?;
        if slot.generation != id.generation {
            return Err(EngineError::StaleSlot { slot: id });
        }
        Ok(slot)
    }

    pub fn get(&self, id: SlotId) -> EngineResult<&PatternParameters> {
        self.slot(id).map(|s| &s.params)
    }

    pub fn get_mut(&mut self, id: SlotId) -> EngineResult<&mut PatternParameters> {
        self.slot(id)?;
        Ok(&mut self.slots[id.index].params)
    }

    /// True while the handle is current and its pattern is running
    pub fn is_live(&self, id: SlotId) -> bool {
        self.get(id).map(|p| p.active).unwrap_or(false)
    }

    /// Mark the slot free. Stale handles are ignored.
    pub fn retire(&mut self, id: SlotId) -> bool {
        match self.get_mut(id) {
            Ok(params) if params.active => {
                params.active = false;
                true
            }
            _ => false,
        }
    }

    /// Stop every running pattern; returns how many were active
    pub fn deactivate_all(&mut self) -> usize {
        let mut count = 0;
        for slot in self.slots.iter_mut().filter(|s| s.params.active) {
            slot.params.active = false;
            count += 1;
        }
        count
    }

    /// Change the direction of every active slot; inactive slots are untouched
    pub fn apply_transform<R: Rng + ?Sized>(
        &mut self,
        transform: DirectionTransform,
        rng: &mut R,
    ) -> usize {
        let mut count = 0;
        for slot in self.slots.iter_mut().filter(|s| s.params.active) {
            let params = &mut slot.params;
            params.direction = match transform {
                DirectionTransform::Forward => Direction::Forward,
                DirectionTransform::Invert => Direction::Backward,
                DirectionTransform::Reverse => params.direction.reversed(),
                DirectionTransform::Randomize => {
                    if rng.gen_bool(0.5) {
                        Direction::Forward
                    } else {
                        Direction::Backward
                    }
                }
            };
            count += 1;
        }
        count
    }

    pub fn iter_active(&self) -> impl Iterator<Item = (SlotId, &PatternParameters)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.params.active)
            .map(|(index, s)| {
                (
                    SlotId {
                        index,
                        generation: s.generation,
                    },
                    &s.params,
                )
            })
    }
}

impl Default for ParameterSlotTable {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIZE)
    }
}
