// MIDI types events

use crate::timing::Ticks;

/// Channel voice message understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    PitchBend { channel: u8, value: i16 },
}

impl MidiMessage {
    /// Parse un RAW MIDI message
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        if data.len() < 2 {
            return None;
        }
        let channel = status & 0x0F;
        let (d1, d2) = (data[0] & 0x7F, data[1] & 0x7F);

        match status & 0xF0 {
            // Velocity 0 = Note Off
            0x90 if d2 == 0 => Some(MidiMessage::NoteOff { channel, note: d1 }),
            0x90 => Some(MidiMessage::NoteOn {
                channel,
                note: d1,
                velocity: d2,
            }),
            0x80 => Some(MidiMessage::NoteOff { channel, note: d1 }),
            0xB0 => Some(MidiMessage::ControlChange {
                channel,
                controller: d1,
                value: d2,
            }),
            0xE0 => {
                let value = ((d2 as i16) << 7) | d1 as i16;
                Some(MidiMessage::PitchBend { channel, value })
            }
            _ => None,
        }
    }

    /// Encode to the three-byte wire form
    pub fn to_bytes(&self) -> [u8; 3] {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => [0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiMessage::NoteOff { channel, note } => [0x80 | (channel & 0x0F), note & 0x7F, 0],
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => [0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F],
            MidiMessage::PitchBend { channel, value } => {
                let value = value.clamp(0, 0x3FFF) as u16;
                [
                    0xE0 | (channel & 0x0F),
                    (value & 0x7F) as u8,
                    (value >> 7) as u8,
                ]
            }
        }
    }

    /// All notes off (CC 123)
    pub fn all_notes_off(channel: u8) -> Self {
        MidiMessage::ControlChange {
            channel,
            controller: 123,
            value: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    On,
    Off,
}

/// Decoded note event, stamped with the capture clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub kind: NoteKind,
    pub channel: u8,
    pub pitch: u8,
    pub velocity: u8,
    pub timestamp: Ticks,
}

impl NoteEvent {
    pub fn note_on(pitch: u8, velocity: u8, timestamp: Ticks) -> Self {
        Self {
            kind: NoteKind::On,
            channel: 0,
            pitch: pitch & 0x7F,
            velocity: velocity & 0x7F,
            timestamp,
        }
    }

    pub fn note_off(pitch: u8, timestamp: Ticks) -> Self {
        Self {
            kind: NoteKind::Off,
            channel: 0,
            pitch: pitch & 0x7F,
            velocity: 0,
            timestamp,
        }
    }

    /// Decode raw bytes; anything other than a note message yields `None`
    pub fn from_bytes(bytes: &[u8], timestamp: Ticks) -> Option<Self> {
        match MidiMessage::from_bytes(bytes)? {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => Some(Self {
                kind: NoteKind::On,
                channel,
                pitch: note,
                velocity,
                timestamp,
            }),
            MidiMessage::NoteOff { channel, note } => Some(Self {
                kind: NoteKind::Off,
                channel,
                pitch: note,
                velocity: 0,
                timestamp,
            }),
            _ => None,
        }
    }

    pub fn is_note_on(&self) -> bool {
        self.kind == NoteKind::On
    }

    pub fn is_note_off(&self) -> bool {
        self.kind == NoteKind::Off
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on() {
        let bytes = [0x90, 60, 100]; // Note On, note 60 (C4), velocity 100
        let event = MidiMessage::from_bytes(&bytes).unwrap();

        assert_eq!(
            event,
            MidiMessage::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100
            }
        );
    }

    #[test]
    fn test_note_off_explicit() {
        let bytes = [0x80, 60, 0];
        let event = MidiMessage::from_bytes(&bytes).unwrap();
        assert_eq!(event, MidiMessage::NoteOff { channel: 0, note: 60 });
    }

    #[test]
    fn test_note_off_velocity_zero() {
        // Note On avec velocity 0 = Note Off
        let event = NoteEvent::from_bytes(&[0x90, 64, 0], 12).unwrap();
        assert!(event.is_note_off());
        assert_eq!(event.pitch, 64);
        assert_eq!(event.timestamp, 12);
    }

    #[test]
    fn test_channel_is_kept() {
        let event = MidiMessage::from_bytes(&[0x9F, 60, 100]).unwrap();
        match event {
            MidiMessage::NoteOn { channel, .. } => assert_eq!(channel, 15),
            _ => panic!("Expected NoteOn"),
        }
    }

    #[test]
    fn test_pitch_bend() {
        let event = MidiMessage::from_bytes(&[0xE0, 0x00, 0x40]).unwrap();
        // 0x40 << 7 | 0x00 = 8192 (centre)
        assert_eq!(event, MidiMessage::PitchBend { channel: 0, value: 8192 });
    }

    #[test]
    fn test_invalid_messages() {
        assert!(MidiMessage::from_bytes(&[]).is_none());
        assert!(MidiMessage::from_bytes(&[0x90, 60]).is_none());
        assert!(MidiMessage::from_bytes(&[0xF0, 0x00, 0x00]).is_none());
    }

    #[test]
    fn test_control_change_is_not_a_note() {
        assert!(NoteEvent::from_bytes(&[0xB0, 7, 127], 0).is_none());
    }

    #[test]
    fn test_encode_note_messages() {
        let on = MidiMessage::NoteOn {
            channel: 2,
            note: 72,
            velocity: 90,
        };
        assert_eq!(on.to_bytes(), [0x92, 72, 90]);
        assert_eq!(MidiMessage::from_bytes(&on.to_bytes()), Some(on));

        let off = MidiMessage::NoteOff { channel: 2, note: 72 };
        assert_eq!(off.to_bytes(), [0x82, 72, 0]);
        assert_eq!(MidiMessage::all_notes_off(1).to_bytes(), [0xB1, 123, 0]);
    }
}
