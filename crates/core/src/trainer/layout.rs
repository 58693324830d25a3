//! Falling-note piano roll geometry.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::{Hand, Note, Score, TrackState};

pub const FIRST_KEY: u8 = 21;
pub const LAST_KEY: u8 = 108;
pub const KEYBOARD_HEIGHT: f32 = 90.0;
const FALL_START_Y: f32 = -40.0;
const BLACK_KEY_WIDTH: f32 = 0.6;
const NOTE_WIDTH: f32 = 0.9;

pub const LEFT_HAND_COLOR: &str = "#60a5fa";
pub const RIGHT_HAND_COLOR: &str = "#fb923c";
pub const TRACK_COLORS: [&str; 8] = [
    "#60a5fa", "#34d399", "#fbbf24", "#f87171", "#a78bfa", "#fb7185", "#4ade80", "#22d3ee",
];

pub fn is_black_key(pitch: u8) -> bool {
    matches!(pitch % 12, 1 | 3 | 6 | 8 | 10)
}

fn white_keys_before(pitch: u8) -> usize {
    (FIRST_KEY..pitch.clamp(FIRST_KEY, LAST_KEY + 1))
        .filter(|&key| !is_black_key(key))
        .count()
}

pub fn white_key_count() -> usize {
    white_keys_before(LAST_KEY + 1)
}

fn ease_in_out_cubic(t: f32) -> f32 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

/// One key of the on-screen keyboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyRect {
    pub pitch: u8,
    pub x: f32,
    pub width: f32,
    pub height: f32,
    pub black: bool,
    pub pressed: bool,
}

/// A visible note; `y` is the bottom edge, the note spans `y - height..y`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteRect {
    pub id: String,
    pub pitch: u8,
    pub track: usize,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub color: &'static str,
    /// The practice wait is holding for this pitch.
    pub waiting: bool,
}

#[derive(Debug, Clone)]
pub struct PianoRoll {
    width: f32,
    height: f32,
    fall_duration: f64,
}

impl PianoRoll {
    pub fn new(width: f32, height: f32, fall_duration: f64) -> Self {
        Self {
            width: width.max(0.0),
            height: height.max(0.0),
            fall_duration: if fall_duration > 0.0 { fall_duration } else { 4.0 },
        }
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.width = width.max(0.0);
        self.height = height.max(0.0);
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn white_key_width(&self) -> f32 {
        self.width / white_key_count() as f32
    }

    pub fn key_width(&self, pitch: u8) -> f32 {
        let white = self.white_key_width();
        if is_black_key(pitch) {
            white * BLACK_KEY_WIDTH
        } else {
            white
        }
    }

    /// Left edge of a key; black keys straddle the boundary of the white key
    /// before them.
    pub fn midi_to_x(&self, pitch: u8) -> f32 {
        let white = self.white_key_width();
        let x = white_keys_before(pitch) as f32 * white;
        if is_black_key(pitch) {
            x - white * 0.3
        } else {
            x
        }
    }

    pub fn hit_line_y(&self) -> f32 {
        self.height - KEYBOARD_HEIGHT - 6.0
    }

    /// How far ahead of the playhead notes are drawn.
    pub fn draw_ahead(&self) -> f64 {
        self.fall_duration + 0.3
    }

    pub fn keyboard(&self, live_keys: &HashSet<u8>) -> Vec<KeyRect> {
        let (white, black): (Vec<u8>, Vec<u8>) =
            (FIRST_KEY..=LAST_KEY).partition(|&pitch| !is_black_key(pitch));
        white
            .into_iter()
            .chain(black)
            .map(|pitch| {
                let black = is_black_key(pitch);
                KeyRect {
                    pitch,
                    x: self.midi_to_x(pitch),
                    width: self.key_width(pitch),
                    height: if black {
                        KEYBOARD_HEIGHT * 0.6
                    } else {
                        KEYBOARD_HEIGHT
                    },
                    black,
                    pressed: live_keys.contains(&pitch),
                }
            })
            .collect()
    }

    /// Rectangles of every enabled note visible at `now`.
    ///
    /// Before its start a note falls from above the canvas to the hit line
    /// with an ease-in-out curve; while sounding it shrinks on the hit line.
    pub fn visible_notes(
        &self,
        score: &Score,
        tracks: &TrackState,
        hand: Hand,
        now: f64,
        waiting: &[u8],
    ) -> Vec<NoteRect> {
        let lane_height = self.height - KEYBOARD_HEIGHT;
        let target = self.hit_line_y();
        let mut overlaps: HashMap<(i64, u8), usize> = HashMap::new();
        let mut rects = Vec::new();

        for (index, track) in score.tracks.iter().enumerate() {
            if !tracks.is_enabled(index) {
                continue;
            }
            for note in track.notes.iter().filter(|note| hand.plays(note.pitch)) {
                if now >= note.end() || note.time - now > self.draw_ahead() {
                    continue;
                }
                let base_height =
                    (note.duration as f32 * lane_height / self.fall_duration as f32).max(6.0);

                let (y, height) = if now < note.time {
                    let progress =
                        (1.0 - (note.time - now) / self.fall_duration).clamp(0.0, 1.0) as f32;
                    let eased = ease_in_out_cubic(progress);
                    (FALL_START_Y + (target - FALL_START_Y) * eased, base_height)
                } else {
                    let remaining = ((note.end() - now) / note.duration).clamp(0.0, 1.0) as f32;
                    let height = base_height * remaining;
                    if height < 1.5 {
                        continue;
                    }
                    (target, height)
                };

                // Spread notes that share a pitch and a 10 ms start slot.
                let slot = overlaps
                    .entry(((note.time * 100.0).round() as i64, note.pitch))
                    .or_insert(0);
                let direction = if *slot % 2 == 0 { 1.0 } else { -1.0 };
                let shift = direction * (*slot).min(2) as f32;
                *slot += 1;

                rects.push(NoteRect {
                    id: note.id.clone(),
                    pitch: note.pitch,
                    track: index,
                    x: self.midi_to_x(note.pitch) + shift,
                    y,
                    width: self.key_width(note.pitch) * NOTE_WIDTH,
                    height,
                    color: note_color(note, score.tracks.len()),
                    waiting: waiting.contains(&note.pitch),
                });
            }
        }
        rects
    }
}

/// Tracks one and two are blue and orange, further tracks cycle through the
/// palette; single track scores are coloured by hand.
pub fn note_color(note: &Note, track_count: usize) -> &'static str {
    if track_count > 1 {
        match note.track {
            0 => LEFT_HAND_COLOR,
            1 => RIGHT_HAND_COLOR,
            track => TRACK_COLORS[track % TRACK_COLORS.len()],
        }
    } else if Hand::Left.plays(note.pitch) {
        LEFT_HAND_COLOR
    } else {
        RIGHT_HAND_COLOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roll() -> PianoRoll {
        PianoRoll::new(1040.0, 590.0, 4.0)
    }

    fn score(tracks: usize) -> Score {
        let tracks: Vec<_> = (0..tracks)
            .map(|_| {
                serde_json::json!({
                    "notes": [
                        { "pitch": 48, "time": 2.0, "duration": 1.0 },
                        { "pitch": 72, "time": 10.0, "duration": 1.0 }
                    ]
                })
            })
            .collect();
        Score::from_json(&serde_json::json!({ "tracks": tracks }).to_string()).unwrap()
    }

    #[test]
    fn keyboard_geometry() {
        let roll = roll();
        assert_eq!(white_key_count(), 52);
        assert_eq!(roll.white_key_width(), 20.0);
        assert_eq!(roll.midi_to_x(21), 0.0);
        // A#0 sits across the boundary between A0 and B0.
        assert!((roll.midi_to_x(22) - 14.0).abs() < 1e-4);
        assert!((roll.key_width(22) - 12.0).abs() < 1e-4);
        assert_eq!(roll.midi_to_x(23), 20.0);
        assert_eq!(roll.midi_to_x(108), 51.0 * 20.0);
        assert_eq!(roll.hit_line_y(), 494.0);
        assert_eq!(roll.keyboard(&HashSet::new()).len(), 88);
    }

    #[test]
    fn black_keys() {
        let black: Vec<u8> = (60..72).filter(|&p| is_black_key(p)).collect();
        assert_eq!(black, vec![61, 63, 66, 68, 70]);
    }

    #[test]
    fn notes_fall_to_the_hit_line() {
        let roll = roll();
        let score = score(1);
        let tracks = TrackState::new(1);

        let rects = roll.visible_notes(&score, &tracks, Hand::Both, 0.0, &[]);
        assert_eq!(rects.len(), 1);
        // Two seconds out: halfway through the eased fall.
        assert!((rects[0].y - (-40.0 + 534.0 * 0.5)).abs() < 1e-3);
        assert!((rects[0].height - 125.0).abs() < 1e-3);
        assert_eq!(rects[0].color, LEFT_HAND_COLOR);

        let rects = roll.visible_notes(&score, &tracks, Hand::Both, 2.5, &[48]);
        assert_eq!(rects[0].y, roll.hit_line_y());
        assert!((rects[0].height - 62.5).abs() < 1e-3);
        assert!(rects[0].waiting);

        assert!(roll
            .visible_notes(&score, &tracks, Hand::Both, 3.0, &[])
            .is_empty());
        assert!(roll
            .visible_notes(&score, &tracks, Hand::Right, 0.0, &[])
            .is_empty());
    }

    #[test]
    fn muted_tracks_are_hidden_and_colours_follow_tracks() {
        let roll = roll();
        let score = score(3);
        let mut tracks = TrackState::new(3);
        tracks.set_muted(0, true);

        let rects = roll.visible_notes(&score, &tracks, Hand::Both, 0.0, &[]);
        let colors: Vec<_> = rects.iter().map(|r| r.color).collect();
        assert_eq!(colors, vec![RIGHT_HAND_COLOR, TRACK_COLORS[2]]);
        // Identical notes on different tracks are nudged apart.
        assert_ne!(rects[0].x, rects[1].x);
    }
}
