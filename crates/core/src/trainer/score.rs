use std::{
    collections::{HashMap, VecDeque},
    path::Path,
};

use midly::{MetaMessage, MidiMessage as SmfMessage, Smf, Timing, TrackEventKind};
use serde::{Deserialize, Serialize};

use crate::{timeline::DEFAULT_BPM, Result, SoundVizError};

pub const SUSTAIN_CONTROLLER: u8 = 64;
const DEFAULT_TEMPO_US: f64 = 500_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    /// Start in seconds.
    pub time: f64,
    pub duration: f64,
    /// Normalised to `[0, 1]`.
    #[serde(default = "default_velocity")]
    pub velocity: f32,
    #[serde(default)]
    pub track: usize,
    #[serde(default)]
    pub id: String,
}

impl Note {
    pub fn end(&self) -> f64 {
        self.time + self.duration
    }
}

fn default_velocity() -> f32 {
    0.8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlChange {
    pub controller: u8,
    pub time: f64,
    /// Normalised to `[0, 1]`.
    pub value: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Track {
    pub name: String,
    pub channel: u8,
    pub notes: Vec<Note>,
    pub control_changes: Vec<ControlChange>,
}

impl Track {
    pub fn sustain_events(&self) -> impl Iterator<Item = &ControlChange> {
        self.control_changes
            .iter()
            .filter(|cc| cc.controller == SUSTAIN_CONTROLLER)
    }
}

/// A parsed note file: per-track notes in seconds plus the first tempo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Score {
    pub name: String,
    pub bpm: f64,
    pub tracks: Vec<Track>,
}

impl Default for Score {
    fn default() -> Self {
        Self {
            name: String::new(),
            bpm: DEFAULT_BPM,
            tracks: Vec::new(),
        }
    }
}

impl Score {
    /// Loads a Standard MIDI File or a JSON score, picked by content.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mut score = Self::from_bytes(&bytes)?;
        if score.name.is_empty() {
            score.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(score)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(b"MThd") {
            return Self::from_midi_bytes(bytes);
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|_| SoundVizError::InvalidFileType("not a MIDI or JSON score".into()))?;
        if text.trim_start().starts_with('{') {
            Self::from_json(text)
        } else {
            Err(SoundVizError::InvalidFileType(
                "not a MIDI or JSON score".into(),
            ))
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut score: Score = serde_json::from_str(text)?;
        if !(score.bpm.is_finite() && score.bpm > 0.0) {
            score.bpm = DEFAULT_BPM;
        }
        score.normalize();
        Ok(score)
    }

    pub fn from_midi_bytes(bytes: &[u8]) -> Result<Self> {
        let smf = Smf::parse(bytes)?;
        let tempo_map = TempoMap::from_smf(&smf);

        let tracks = smf
            .tracks
            .iter()
            .enumerate()
            .map(|(index, events)| parse_track(index, events, &tempo_map))
            .collect();

        let mut score = Score {
            name: String::new(),
            bpm: tempo_map.first_bpm(),
            tracks,
        };
        score.normalize();
        tracing::debug!(
            tracks = score.tracks.len(),
            notes = score.note_count(),
            bpm = score.bpm,
            "parsed midi file"
        );
        Ok(score)
    }

    /// Sorts notes by start time and assigns track indices and ids.
    fn normalize(&mut self) {
        for (track_index, track) in self.tracks.iter_mut().enumerate() {
            track.channel &= 0x0f;
            track.notes.retain(|note| {
                note.pitch < 128 && note.time.is_finite() && note.duration.is_finite()
            });
            track
                .notes
                .sort_by(|a, b| a.time.total_cmp(&b.time).then(a.pitch.cmp(&b.pitch)));
            for (note_index, note) in track.notes.iter_mut().enumerate() {
                note.track = track_index;
                note.time = note.time.max(0.0);
                note.duration = note.duration.max(0.0);
                note.velocity = note.velocity.clamp(0.0, 1.0);
                note.id = format!("t{track_index}n{note_index}");
            }
            track
                .control_changes
                .sort_by(|a, b| a.time.total_cmp(&b.time));
            if track.name.is_empty() {
                track.name = format!("Track {}", track_index + 1);
            }
        }
    }

    /// End of the last sounding note.
    pub fn duration(&self) -> f64 {
        self.notes().map(Note::end).fold(0.0, f64::max)
    }

    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|track| track.notes.len()).sum()
    }

    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.tracks.iter().flat_map(|track| track.notes.iter())
    }
}

/// Tick to seconds conversion built from every tempo event in the file.
struct TempoMap {
    ticks_per_beat: Option<f64>,
    first_tempo: Option<f64>,
    seconds_per_tick: f64,
    /// `(tick, seconds at tick, microseconds per beat)`, sorted by tick.
    segments: Vec<(u64, f64, f64)>,
}

impl TempoMap {
    fn from_smf(smf: &Smf<'_>) -> Self {
        let mut changes: Vec<(u64, f64)> = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += u64::from(event.delta.as_int());
                if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                    changes.push((tick, f64::from(tempo.as_int())));
                }
            }
        }
        changes.sort_by_key(|&(tick, _)| tick);
        let first_tempo = changes.first().map(|&(_, tempo)| tempo);

        match smf.header.timing {
            Timing::Metrical(ticks) => {
                let ticks_per_beat = f64::from(ticks.as_int().max(1));
                let mut segments = vec![(0u64, 0.0, DEFAULT_TEMPO_US)];
                for (tick, tempo) in changes {
                    let Some(&(last_tick, last_seconds, last_tempo)) = segments.last() else {
                        continue;
                    };
                    let seconds = last_seconds
                        + (tick - last_tick) as f64 * last_tempo / 1_000_000.0 / ticks_per_beat;
                    if tick == last_tick {
                        segments.pop();
                    }
                    segments.push((tick, seconds, tempo));
                }
                Self {
                    ticks_per_beat: Some(ticks_per_beat),
                    first_tempo,
                    seconds_per_tick: 0.0,
                    segments,
                }
            }
            Timing::Timecode(fps, subframe) => Self {
                ticks_per_beat: None,
                first_tempo,
                seconds_per_tick: 1.0 / (f64::from(fps.as_f32()) * f64::from(subframe.max(1))),
                segments: changes
                    .into_iter()
                    .map(|(tick, tempo)| (tick, 0.0, tempo))
                    .collect(),
            },
        }
    }

    fn seconds(&self, tick: u64) -> f64 {
        let Some(ticks_per_beat) = self.ticks_per_beat else {
            return tick as f64 * self.seconds_per_tick;
        };
        let index = self.segments.partition_point(|&(start, _, _)| start <= tick);
        let (start, seconds, tempo) = self.segments[index.saturating_sub(1)];
        seconds + (tick - start) as f64 * tempo / 1_000_000.0 / ticks_per_beat
    }

    /// BPM of the first explicit tempo event, 120 without one.
    fn first_bpm(&self) -> f64 {
        self.first_tempo
            .map(|tempo| 60_000_000.0 / tempo)
            .filter(|bpm| bpm.is_finite() && *bpm > 0.0)
            .unwrap_or(DEFAULT_BPM)
    }
}

fn parse_track(index: usize, events: &[midly::TrackEvent<'_>], tempo: &TempoMap) -> Track {
    let mut name = String::new();
    let mut channel = None;
    let mut open: HashMap<(u8, u8), VecDeque<(u64, u8)>> = HashMap::new();
    let mut pending: Vec<(u8, u64, u64, u8)> = Vec::new();
    let mut control_changes = Vec::new();
    let mut tick = 0u64;

    for event in events {
        tick += u64::from(event.delta.as_int());
        match event.kind {
            TrackEventKind::Meta(MetaMessage::TrackName(raw)) if name.is_empty() => {
                name = String::from_utf8_lossy(raw).trim().to_string();
            }
            TrackEventKind::Midi {
                channel: ch,
                message,
            } => {
                let ch = ch.as_int();
                match message {
                    SmfMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        channel = channel.or(Some(ch));
                        open.entry((ch, key.as_int()))
                            .or_default()
                            .push_back((tick, vel.as_int()));
                    }
                    SmfMessage::NoteOn { key, .. } | SmfMessage::NoteOff { key, .. } => {
                        if let Some((start, vel)) = open
                            .get_mut(&(ch, key.as_int()))
                            .and_then(VecDeque::pop_front)
                        {
                            pending.push((key.as_int(), start, tick, vel));
                        }
                    }
                    SmfMessage::Controller { controller, value } => {
                        channel = channel.or(Some(ch));
                        control_changes.push(ControlChange {
                            controller: controller.as_int(),
                            time: tempo.seconds(tick),
                            value: f32::from(value.as_int()) / 127.0,
                        });
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    // Notes still held at the end of the track last until its final tick.
    for ((_, key), starts) in open {
        for (start, vel) in starts {
            pending.push((key, start, tick, vel));
        }
    }

    let notes = pending
        .into_iter()
        .map(|(pitch, start, end, vel)| {
            let time = tempo.seconds(start);
            Note {
                pitch,
                time,
                duration: tempo.seconds(end) - time,
                velocity: f32::from(vel) / 127.0,
                track: index,
                id: String::new(),
            }
        })
        .collect();

    Track {
        name,
        channel: channel.unwrap_or(0),
        notes,
        control_changes,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use midly::{
        num::{u15, u24, u28, u4, u7},
        Format, Header, TrackEvent,
    };

    use super::*;

    fn midi(channel: u8, message: SmfMessage, delta: u32) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::from(delta),
            kind: TrackEventKind::Midi {
                channel: u4::from(channel),
                message,
            },
        }
    }

    fn on(key: u8, vel: u8) -> SmfMessage {
        SmfMessage::NoteOn {
            key: u7::from(key),
            vel: u7::from(vel),
        }
    }

    fn off(key: u8) -> SmfMessage {
        SmfMessage::NoteOff {
            key: u7::from(key),
            vel: u7::from(0),
        }
    }

    /// Two tracks at 480 ppq: a conductor track that switches from 120 to 60
    /// BPM after two beats, and a piano track on channel 2.
    pub(crate) fn sample_midi() -> Vec<u8> {
        let conductor = vec![
            TrackEvent {
                delta: u28::from(0),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(500_000))),
            },
            TrackEvent {
                delta: u28::from(960),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(1_000_000))),
            },
            TrackEvent {
                delta: u28::from(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ];
        let piano = vec![
            TrackEvent {
                delta: u28::from(0),
                kind: TrackEventKind::Meta(MetaMessage::TrackName(b"Piano")),
            },
            midi(2, on(60, 127), 0),
            midi(2, on(64, 64), 0),
            midi(2, off(60), 480),
            // Velocity zero note-on ends the note.
            midi(2, on(64, 0), 0),
            midi(
                2,
                SmfMessage::Controller {
                    controller: u7::from(64),
                    value: u7::from(127),
                },
                480,
            ),
            midi(2, on(67, 100), 0),
            midi(2, off(67), 480),
            TrackEvent {
                delta: u28::from(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ];
        let smf = Smf {
            header: Header {
                format: Format::Parallel,
                timing: Timing::Metrical(u15::from(480)),
            },
            tracks: vec![conductor, piano],
        };
        let mut bytes = Vec::new();
        smf.write(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn parses_notes_with_tempo_changes() {
        let score = Score::from_midi_bytes(&sample_midi()).unwrap();
        assert_eq!(score.tracks.len(), 2);
        assert_eq!(score.bpm, 120.0);

        let piano = &score.tracks[1];
        assert_eq!(piano.name, "Piano");
        assert_eq!(piano.channel, 2);
        assert_eq!(piano.notes.len(), 3);

        let pitches: Vec<u8> = piano.notes.iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![60, 64, 67]);
        assert!((piano.notes[0].duration - 0.5).abs() < 1e-9);
        assert!((piano.notes[0].velocity - 1.0).abs() < 1e-6);
        // Third note starts after the switch to 60 BPM and lasts one beat.
        assert!((piano.notes[2].time - 1.0).abs() < 1e-9);
        assert!((piano.notes[2].duration - 1.0).abs() < 1e-9);
        assert_eq!(piano.notes[2].id, "t1n2");
        assert!((score.duration() - 2.0).abs() < 1e-9);

        let sustain: Vec<_> = piano.sustain_events().collect();
        assert_eq!(sustain.len(), 1);
        assert!((sustain[0].time - 1.0).abs() < 1e-9);
        assert_eq!(sustain[0].value, 1.0);
    }

    #[test]
    fn parses_json_scores() {
        let score = Score::from_json(
            r#"{
                "bpm": 90,
                "tracks": [{
                    "name": "RH",
                    "notes": [
                        { "pitch": 64, "time": 1.0, "duration": 0.5 },
                        { "pitch": 60, "time": 0.0, "duration": 0.5, "velocity": 0.5 }
                    ]
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(score.bpm, 90.0);
        let notes = &score.tracks[0].notes;
        assert_eq!(notes[0].pitch, 60);
        assert_eq!(notes[0].id, "t0n0");
        assert_eq!(notes[1].velocity, 0.8);
    }

    #[test]
    fn load_dispatches_on_content() {
        let dir = tempfile::tempdir().unwrap();
        let midi_path = dir.path().join("song.mid");
        std::fs::write(&midi_path, sample_midi()).unwrap();
        let score = Score::load(&midi_path).unwrap();
        assert_eq!(score.name, "song");

        let text_path = dir.path().join("notes.txt");
        std::fs::write(&text_path, "C D E F G").unwrap();
        assert!(matches!(
            Score::load(&text_path).unwrap_err(),
            SoundVizError::InvalidFileType(_)
        ));
    }
}
