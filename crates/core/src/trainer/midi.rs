//! MIDI wire messages and the outputs they are sent to.

use std::{cell::RefCell, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::Result;

pub const ALL_NOTES_OFF: u8 = 123;

/// MIDI message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MidiMessage {
    NoteOn {
        channel: u8,
        note: u8,
        velocity: u8,
    },
    NoteOff {
        channel: u8,
        note: u8,
    },
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
    ProgramChange {
        channel: u8,
        program: u8,
    },
    PitchBend {
        channel: u8,
        value: u16,
    },
    Clock,
    Start,
    Stop,
    Continue,
}

impl MidiMessage {
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::NoteOn {
            channel: channel & 0x0f,
            note: note & 0x7f,
            velocity: velocity.min(127),
        }
    }

    pub fn note_off(channel: u8, note: u8) -> Self {
        Self::NoteOff {
            channel: channel & 0x0f,
            note: note & 0x7f,
        }
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self::ControlChange {
            channel: channel & 0x0f,
            controller: controller & 0x7f,
            value: value.min(127),
        }
    }

    /// Parse a MIDI message from raw bytes. Note-on with velocity zero is a
    /// note-off.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let &status = bytes.first()?;

        match status {
            0xF8 => return Some(Self::Clock),
            0xFA => return Some(Self::Start),
            0xFC => return Some(Self::Stop),
            0xFB => return Some(Self::Continue),
            _ => {}
        }

        let channel = status & 0x0F;
        let data1 = *bytes.get(1)? & 0x7f;
        let data2 = || bytes.get(2).map(|value| value & 0x7f);

        match status & 0xF0 {
            0x90 => {
                let velocity = data2()?;
                if velocity == 0 {
                    Some(Self::NoteOff {
                        channel,
                        note: data1,
                    })
                } else {
                    Some(Self::NoteOn {
                        channel,
                        note: data1,
                        velocity,
                    })
                }
            }
            0x80 => Some(Self::NoteOff {
                channel,
                note: data1,
            }),
            0xB0 => Some(Self::ControlChange {
                channel,
                controller: data1,
                value: data2()?,
            }),
            0xC0 => Some(Self::ProgramChange {
                channel,
                program: data1,
            }),
            0xE0 => {
                let value = (u16::from(data2()?) << 7) | u16::from(data1);
                Some(Self::PitchBend { channel, value })
            }
            _ => None,
        }
    }

    /// Convert to raw MIDI bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Self::NoteOn {
                channel,
                note,
                velocity,
            } => vec![0x90 | (channel & 0x0f), note, velocity],
            Self::NoteOff { channel, note } => vec![0x80 | (channel & 0x0f), note, 0],
            Self::ControlChange {
                channel,
                controller,
                value,
            } => vec![0xB0 | (channel & 0x0f), controller, value],
            Self::ProgramChange { channel, program } => vec![0xC0 | (channel & 0x0f), program],
            Self::PitchBend { channel, value } => {
                vec![0xE0 | (channel & 0x0f), (value & 0x7F) as u8, (value >> 7) as u8]
            }
            Self::Clock => vec![0xF8],
            Self::Start => vec![0xFA],
            Self::Stop => vec![0xFC],
            Self::Continue => vec![0xFB],
        }
    }
}

/// Sustain off followed by all-notes-off on every channel.
pub fn panic_messages() -> Vec<MidiMessage> {
    (0..16)
        .flat_map(|channel| {
            [
                MidiMessage::control_change(channel, super::SUSTAIN_CONTROLLER, 0),
                MidiMessage::control_change(channel, ALL_NOTES_OFF, 0),
            ]
        })
        .collect()
}

/// An external MIDI output.
pub trait MidiSink {
    fn name(&self) -> &str;
    fn send(&mut self, message: &MidiMessage) -> Result<()>;
}

/// Keeps every message in memory. Clones share one log, so a caller can
/// hand a clone to a session and read the messages back afterwards.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    name: String,
    messages: Rc<RefCell<Vec<MidiMessage>>>,
}

impl RecordingSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Rc::default(),
        }
    }

    pub fn messages(&self) -> Vec<MidiMessage> {
        self.messages.borrow().clone()
    }

    pub fn take(&self) -> Vec<MidiMessage> {
        std::mem::take(&mut *self.messages.borrow_mut())
    }
}

impl MidiSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, message: &MidiMessage) -> Result<()> {
        self.messages.borrow_mut().push(*message);
        Ok(())
    }
}

/// Local sound generation used when no external output is selected.
pub trait Synth {
    /// Starts `pitch` for `duration` seconds at `velocity` in `[0, 1]`.
    fn trigger(&mut self, track: usize, pitch: u8, duration: f64, velocity: f32);
    fn release_all(&mut self);
}

/// A synth event as seen by [`RecordingSynth`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthNote {
    pub track: usize,
    pub pitch: u8,
    pub frequency: f64,
    pub duration: f64,
    pub velocity: f32,
}

#[derive(Debug, Default)]
struct SynthLog {
    notes: Vec<SynthNote>,
    releases: usize,
}

/// Records triggered notes instead of sounding them; clones share one log.
#[derive(Debug, Default, Clone)]
pub struct RecordingSynth {
    log: Rc<RefCell<SynthLog>>,
}

impl RecordingSynth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notes(&self) -> Vec<SynthNote> {
        self.log.borrow().notes.clone()
    }

    pub fn releases(&self) -> usize {
        self.log.borrow().releases
    }
}

impl Synth for RecordingSynth {
    fn trigger(&mut self, track: usize, pitch: u8, duration: f64, velocity: f32) {
        self.log.borrow_mut().notes.push(SynthNote {
            track,
            pitch,
            frequency: midi_to_frequency(pitch),
            duration,
            velocity,
        });
    }

    fn release_all(&mut self) {
        self.log.borrow_mut().releases += 1;
    }
}

/// Equal temperament, A4 (69) = 440 Hz.
pub fn midi_to_frequency(pitch: u8) -> f64 {
    440.0 * 2f64.powf((f64::from(pitch) - 69.0) / 12.0)
}

#[cfg(feature = "midi")]
pub use port::{output_port_names, MidiOutputPort};

#[cfg(feature = "midi")]
mod port {
    use midir::{MidiOutput, MidiOutputConnection};

    use super::{MidiMessage, MidiSink};
    use crate::{Result, SoundVizError};

    const CLIENT_NAME: &str = "soundviz";

    /// Names of the MIDI outputs currently visible to the system.
    pub fn output_port_names() -> Result<Vec<String>> {
        let output = MidiOutput::new(CLIENT_NAME)
            .map_err(|err| SoundVizError::DeviceNotSupported(err.to_string()))?;
        Ok(output
            .ports()
            .iter()
            .filter_map(|port| output.port_name(port).ok())
            .collect())
    }

    /// A connected hardware or virtual MIDI output.
    pub struct MidiOutputPort {
        name: String,
        connection: MidiOutputConnection,
    }

    impl MidiOutputPort {
        /// Connects to the first port whose name contains `pattern`, or to
        /// the first port when `pattern` is empty.
        pub fn connect(pattern: &str) -> Result<Self> {
            let output = MidiOutput::new(CLIENT_NAME)
                .map_err(|err| SoundVizError::DeviceNotSupported(err.to_string()))?;
            let ports = output.ports();
            let (port, name) = ports
                .iter()
                .filter_map(|port| output.port_name(port).ok().map(|name| (port, name)))
                .find(|(_, name)| pattern.is_empty() || name.contains(pattern))
                .ok_or_else(|| {
                    SoundVizError::DeviceNotFound(format!("no MIDI output matching `{pattern}`"))
                })?;
            let connection = output
                .connect(port, "soundviz-out")
                .map_err(|err| SoundVizError::DeviceNotFound(err.to_string()))?;
            tracing::info!(port = %name, "midi output connected");
            Ok(Self { name, connection })
        }
    }

    impl MidiSink for MidiOutputPort {
        fn name(&self) -> &str {
            &self.name
        }

        fn send(&mut self, message: &MidiMessage) -> Result<()> {
            self.connection
                .send(&message.to_bytes())
                .map_err(|err| SoundVizError::msg(format!("midi send failed: {err}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_channel_messages() {
        assert_eq!(
            MidiMessage::from_bytes(&[0x93, 60, 100]),
            Some(MidiMessage::NoteOn {
                channel: 3,
                note: 60,
                velocity: 100
            })
        );
        assert_eq!(
            MidiMessage::from_bytes(&[0x90, 60, 0]),
            Some(MidiMessage::NoteOff {
                channel: 0,
                note: 60
            })
        );
        assert_eq!(
            MidiMessage::from_bytes(&[0xE1, 0x00, 0x40]),
            Some(MidiMessage::PitchBend {
                channel: 1,
                value: 8192
            })
        );
        assert_eq!(MidiMessage::from_bytes(&[0xF8]), Some(MidiMessage::Clock));
    }

    #[test]
    fn truncated_messages_are_rejected() {
        assert_eq!(MidiMessage::from_bytes(&[]), None);
        assert_eq!(MidiMessage::from_bytes(&[0x90, 60]), None);
        assert_eq!(MidiMessage::from_bytes(&[0xB0]), None);
        assert_eq!(MidiMessage::from_bytes(&[0xF0, 1, 2]), None);
    }

    #[test]
    fn encodes_wire_bytes() {
        assert_eq!(MidiMessage::note_on(2, 64, 200).to_bytes(), vec![0x92, 64, 127]);
        assert_eq!(MidiMessage::note_off(2, 64).to_bytes(), vec![0x82, 64, 0]);
        assert_eq!(
            MidiMessage::control_change(15, 64, 127).to_bytes(),
            vec![0xBF, 64, 127]
        );
        assert_eq!(
            MidiMessage::PitchBend {
                channel: 0,
                value: 8192
            }
            .to_bytes(),
            vec![0xE0, 0x00, 0x40]
        );
    }

    #[test]
    fn panic_covers_every_channel() {
        let messages = panic_messages();
        assert_eq!(messages.len(), 32);
        assert_eq!(messages[0], MidiMessage::control_change(0, 64, 0));
        assert_eq!(messages[31], MidiMessage::control_change(15, ALL_NOTES_OFF, 0));
    }

    #[test]
    fn recording_handles_share_their_log() {
        let sink = RecordingSink::new("test");
        let mut boxed: Box<dyn MidiSink> = Box::new(sink.clone());
        boxed.send(&MidiMessage::Start).unwrap();
        assert_eq!(sink.messages(), vec![MidiMessage::Start]);
        assert_eq!(sink.take().len(), 1);
        assert!(sink.messages().is_empty());

        let synth = RecordingSynth::new();
        let mut boxed: Box<dyn Synth> = Box::new(synth.clone());
        boxed.trigger(0, 69, 0.5, 1.0);
        boxed.release_all();
        assert_eq!(synth.notes()[0].frequency, 440.0);
        assert_eq!(synth.releases(), 1);
    }

    #[test]
    fn concert_pitch() {
        assert!((midi_to_frequency(69) - 440.0).abs() < 1e-9);
        assert!((midi_to_frequency(81) - 880.0).abs() < 1e-9);
    }
}
