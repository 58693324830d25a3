use std::{cell::RefCell, rc::Rc};

use super::midi::{midi_to_frequency, Synth};

/// Voices beyond this steal the oldest one.
pub const MAX_VOICES: usize = 32;
/// Headroom so a handful of full-velocity voices stays inside `[-1, 1]`.
const MASTER_GAIN: f32 = 0.2;

/// Attack, decay and release in seconds; sustain is a level in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.25,
            release: 1.05,
        }
    }
}

impl Envelope {
    /// Level while the key is held, `held` seconds after the attack began.
    fn held_level(&self, held: f32) -> f32 {
        if held < self.attack {
            held / self.attack.max(f32::EPSILON)
        } else if held < self.attack + self.decay {
            let progress = (held - self.attack) / self.decay.max(f32::EPSILON);
            1.0 - (1.0 - self.sustain) * progress
        } else {
            self.sustain
        }
    }
}

#[derive(Debug, Clone)]
struct Voice {
    pitch: u8,
    frequency: f32,
    gain: f32,
    start: u64,
    release_at: u64,
}

impl Voice {
    fn level(&self, envelope: &Envelope, clock: u64, sample_rate: f32) -> Option<f32> {
        let seconds = |samples: u64| samples as f32 / sample_rate;
        if clock < self.release_at {
            return Some(envelope.held_level(seconds(clock - self.start)));
        }
        let released = seconds(clock - self.release_at);
        if released >= envelope.release {
            return None;
        }
        let from = envelope.held_level(seconds(self.release_at - self.start));
        Some(from * (1.0 - released / envelope.release))
    }

    fn sample(&self, clock: u64, sample_rate: f32) -> f32 {
        let phase = (self.frequency * (clock - self.start) as f32 / sample_rate).fract();
        // Triangle in [-1, 1].
        4.0 * (phase - 0.5).abs() - 1.0
    }
}

#[derive(Debug)]
struct Voices {
    sample_rate: u32,
    envelope: Envelope,
    clock: u64,
    active: Vec<Voice>,
}

/// Polyphonic triangle synth. Notes triggered by a session start at the
/// next rendered sample; clones share the voices, so one handle can render
/// while another sits inside a session.
#[derive(Debug, Clone)]
pub struct PolySynth {
    voices: Rc<RefCell<Voices>>,
}

impl PolySynth {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_envelope(sample_rate, Envelope::default())
    }

    pub fn with_envelope(sample_rate: u32, envelope: Envelope) -> Self {
        Self {
            voices: Rc::new(RefCell::new(Voices {
                sample_rate: sample_rate.max(1),
                envelope,
                clock: 0,
                active: Vec::new(),
            })),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.voices.borrow().sample_rate
    }

    /// Voices still sounding, including those in their release tail.
    pub fn active_voices(&self) -> usize {
        self.voices.borrow().active.len()
    }

    pub fn sounding_pitches(&self) -> Vec<u8> {
        self.voices.borrow().active.iter().map(|v| v.pitch).collect()
    }

    /// Mixes the next `count` samples and drops voices whose release ended.
    pub fn render(&self, count: usize) -> Vec<f32> {
        let mut voices = self.voices.borrow_mut();
        let sample_rate = voices.sample_rate as f32;
        let envelope = voices.envelope;
        let mut out = Vec::with_capacity(count);

        for _ in 0..count {
            let clock = voices.clock;
            let mut mix = 0.0;
            voices.active.retain(|voice| match voice.level(&envelope, clock, sample_rate) {
                Some(level) => {
                    mix += voice.sample(clock, sample_rate) * level * voice.gain;
                    true
                }
                None => false,
            });
            out.push((mix * MASTER_GAIN).clamp(-1.0, 1.0));
            voices.clock += 1;
        }
        out
    }
}

impl Synth for PolySynth {
    fn trigger(&mut self, _track: usize, pitch: u8, duration: f64, velocity: f32) {
        let mut voices = self.voices.borrow_mut();
        let start = voices.clock;
        let held = (duration.max(0.0) * f64::from(voices.sample_rate)).round() as u64;
        if voices.active.len() >= MAX_VOICES {
            voices.active.remove(0);
        }
        voices.active.push(Voice {
            pitch,
            frequency: midi_to_frequency(pitch) as f32,
            gain: velocity.clamp(0.0, 1.0),
            start,
            release_at: start + held,
        });
    }

    /// Moves every held voice into its release.
    fn release_all(&mut self) {
        let mut voices = self.voices.borrow_mut();
        let now = voices.clock;
        for voice in &mut voices.active {
            voice.release_at = voice.release_at.min(now);
        }
    }
}
