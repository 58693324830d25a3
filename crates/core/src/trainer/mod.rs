//! MIDI piano trainer: score playback on a transport clock, hit scoring and
//! the practice mode that waits for each chord.

use std::{
    collections::{BTreeSet, HashSet},
    fmt,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{
    timeline::{ScheduledEvent, Scheduler, Transport, TransportState},
    Result, SoundVizError, TrainerConfig,
};

mod index;
mod layout;
mod midi;
mod score;
mod synth;

pub use index::{
    bucket_of, build_practice_groups, ExpectedNote, ExpectedNoteIndex, Miss, PracticeFeedback,
    PracticeGroup, PracticeStats,
};
pub use layout::{
    is_black_key, note_color, white_key_count, KeyRect, NoteRect, PianoRoll, FIRST_KEY,
    KEYBOARD_HEIGHT, LAST_KEY, LEFT_HAND_COLOR, RIGHT_HAND_COLOR, TRACK_COLORS,
};
#[cfg(feature = "midi")]
pub use midi::{output_port_names, MidiOutputPort};
pub use midi::{
    midi_to_frequency, panic_messages, MidiMessage, MidiSink, RecordingSink, RecordingSynth,
    Synth, SynthNote, ALL_NOTES_OFF,
};
pub use score::{ControlChange, Note, Score, Track, SUSTAIN_CONTROLLER};
pub use synth::{Envelope, PolySynth, MAX_VOICES};

/// Keys below middle C belong to the left hand.
const SPLIT_POINT: u8 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    Left,
    Right,
    #[default]
    Both,
}

impl Hand {
    pub fn plays(self, pitch: u8) -> bool {
        match self {
            Self::Left => pitch < SPLIT_POINT,
            Self::Right => pitch >= SPLIT_POINT,
            Self::Both => true,
        }
    }
}

impl fmt::Display for Hand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Both => "both",
        })
    }
}

impl FromStr for Hand {
    type Err = SoundVizError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "both" => Ok(Self::Both),
            other => Err(SoundVizError::msg(format!("unknown hand `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PracticeMode {
    #[default]
    Listen,
    Practice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Scheduled,
    Playing,
    Paused,
    WaitingForInput,
}

/// Per-track mute and solo flags. While any track is soloed only soloed
/// tracks sound; otherwise every unmuted track does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackState {
    muted: Vec<bool>,
    solo: Vec<bool>,
}

impl TrackState {
    pub fn new(tracks: usize) -> Self {
        Self {
            muted: vec![false; tracks],
            solo: vec![false; tracks],
        }
    }

    pub fn len(&self) -> usize {
        self.muted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.muted.is_empty()
    }

    pub fn is_muted(&self, track: usize) -> bool {
        self.muted.get(track).copied().unwrap_or(false)
    }

    pub fn is_solo(&self, track: usize) -> bool {
        self.solo.get(track).copied().unwrap_or(false)
    }

    pub fn any_solo(&self) -> bool {
        self.solo.iter().any(|&solo| solo)
    }

    pub fn is_enabled(&self, track: usize) -> bool {
        if self.any_solo() {
            self.is_solo(track)
        } else {
            track < self.len() && !self.is_muted(track)
        }
    }

    /// Muting a track takes it out of solo. Returns `false` for an unknown
    /// track.
    pub fn set_muted(&mut self, track: usize, muted: bool) -> bool {
        let Some(flag) = self.muted.get_mut(track) else {
            return false;
        };
        *flag = muted;
        if muted {
            self.solo[track] = false;
        }
        true
    }

    /// Soloing a track unmutes it.
    pub fn set_solo(&mut self, track: usize, solo: bool) -> bool {
        let Some(flag) = self.solo.get_mut(track) else {
            return false;
        };
        *flag = solo;
        if solo {
            self.muted[track] = false;
        }
        true
    }
}

/// What the transport does when it passes a scheduled time.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportAction {
    NoteOn {
        track: usize,
        channel: u8,
        pitch: u8,
        velocity: f32,
        duration: f64,
    },
    /// The key of a scheduled note goes up.
    KeyUp { pitch: u8 },
    /// Delayed note-off for the external output.
    NoteOff { channel: u8, pitch: u8 },
    Sustain { channel: u8, value: u8 },
    PracticeWait { group: usize },
}

/// Something the front-end should react to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrainerEvent {
    NoteOn { track: usize, pitch: u8 },
    NoteOff { pitch: u8 },
    Waiting { group: usize, pitches: Vec<u8> },
    Resumed { group: usize, waited: f64 },
    Hit { pitch: u8, id: String, time: f64 },
    /// A played note matched no expected note.
    Unmatched { pitch: u8, time: f64 },
    /// A note outside the chord the practice wait is holding for.
    WrongNote { pitch: u8, time: f64 },
    Looped { to: f64 },
    Finished { feedback: Option<PracticeFeedback> },
}

#[derive(Debug, Clone)]
struct PracticeWait {
    group: usize,
    time: f64,
    required: BTreeSet<u8>,
    hit: BTreeSet<u8>,
    /// Wall seconds spent waiting so far.
    waited: f64,
}

/// One loaded score and everything needed to play and score it.
pub struct TrainerSession {
    config: TrainerConfig,
    score: Option<Score>,
    duration: f64,
    tracks: TrackState,
    transport: Transport,
    scheduler: Scheduler<TransportAction>,
    index: ExpectedNoteIndex,
    groups: Vec<PracticeGroup>,
    wait: Option<PracticeWait>,
    stats: PracticeStats,
    hits: u32,
    live_keys: HashSet<u8>,
    mode: PracticeMode,
    hand: Hand,
    note_wait: bool,
    loop_range: Option<(f64, f64)>,
    tail_ms: u64,
    thru: bool,
    output: Option<Box<dyn MidiSink>>,
    synth: Option<Box<dyn Synth>>,
}

impl fmt::Debug for TrainerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainerSession")
            .field("state", &self.state())
            .field("position", &self.transport.position())
            .field("mode", &self.mode)
            .field("hand", &self.hand)
            .field("output", &self.output.as_ref().map(|output| output.name()))
            .finish_non_exhaustive()
    }
}

impl TrainerSession {
    pub fn new(config: TrainerConfig) -> Self {
        let tail_ms = config.tail_ms;
        Self {
            config,
            score: None,
            duration: 0.0,
            tracks: TrackState::default(),
            transport: Transport::default(),
            scheduler: Scheduler::new(),
            index: ExpectedNoteIndex::default(),
            groups: Vec::new(),
            wait: None,
            stats: PracticeStats::default(),
            hits: 0,
            live_keys: HashSet::new(),
            mode: PracticeMode::default(),
            hand: Hand::default(),
            note_wait: false,
            loop_range: None,
            tail_ms,
            thru: false,
            output: None,
            synth: None,
        }
    }

    /// Routes playback to an external MIDI output. While one is set the
    /// local synth stays silent.
    pub fn with_output(mut self, output: Box<dyn MidiSink>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_synth(mut self, synth: Box<dyn Synth>) -> Self {
        self.synth = Some(synth);
        self
    }

    pub fn set_output(&mut self, output: Option<Box<dyn MidiSink>>) {
        if let Some(output) = &output {
            tracing::info!(output = output.name(), "midi output selected");
        }
        self.output = output;
    }

    /// Replaces any loaded score. Statistics, hit flags, live keys and the
    /// transport start over, so loading the same score twice yields the
    /// same state.
    pub fn load(&mut self, score: Score) {
        self.release_sound();
        self.transport = Transport::new(score.bpm);
        self.tracks = TrackState::new(score.tracks.len());
        self.index = ExpectedNoteIndex::from_score(&score);
        self.groups.clear();
        self.wait = None;
        self.stats = PracticeStats::default();
        self.hits = 0;
        self.live_keys.clear();
        self.duration = score.duration();
        tracing::info!(
            name = %score.name,
            tracks = score.tracks.len(),
            notes = score.note_count(),
            duration = self.duration,
            bpm = score.bpm,
            "score loaded"
        );
        self.score = Some(score);
        self.reschedule();
    }

    pub fn unload(&mut self) {
        self.release_sound();
        self.transport.stop();
        self.score = None;
        self.duration = 0.0;
        self.tracks = TrackState::default();
        self.scheduler.clear();
        self.index.clear();
        self.groups.clear();
        self.wait = None;
        self.stats = PracticeStats::default();
        self.hits = 0;
        self.live_keys.clear();
    }

    pub fn state(&self) -> SessionState {
        if self.score.is_none() {
            return SessionState::Idle;
        }
        if self.wait.is_some() {
            return SessionState::WaitingForInput;
        }
        match self.transport.state() {
            TransportState::Started => SessionState::Playing,
            TransportState::Paused => SessionState::Paused,
            TransportState::Stopped => SessionState::Scheduled,
        }
    }

    pub fn score(&self) -> Option<&Score> {
        self.score.as_ref()
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn position(&self) -> f64 {
        self.transport.position()
    }

    pub fn bpm(&self) -> f64 {
        self.transport.bpm()
    }

    pub fn speed(&self) -> f64 {
        self.transport.speed()
    }

    pub fn mode(&self) -> PracticeMode {
        self.mode
    }

    pub fn hand(&self) -> Hand {
        self.hand
    }

    pub fn note_wait(&self) -> bool {
        self.note_wait
    }

    pub fn tracks(&self) -> &TrackState {
        &self.tracks
    }

    pub fn live_keys(&self) -> &HashSet<u8> {
        &self.live_keys
    }

    pub fn stats(&self) -> &PracticeStats {
        &self.stats
    }

    pub fn feedback(&self) -> PracticeFeedback {
        PracticeFeedback::from(&self.stats)
    }

    /// Number of played notes that matched an expected note.
    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn expected_notes(&self) -> &ExpectedNoteIndex {
        &self.index
    }

    pub fn groups(&self) -> &[PracticeGroup] {
        &self.groups
    }

    pub fn scheduled_events(&self) -> &[ScheduledEvent<TransportAction>] {
        self.scheduler.events()
    }

    /// Pitches the practice wait still needs.
    pub fn waiting_for(&self) -> Vec<u8> {
        self.wait
            .as_ref()
            .map(|wait| wait.required.difference(&wait.hit).copied().collect())
            .unwrap_or_default()
    }

    pub fn loop_range(&self) -> Option<(f64, f64)> {
        self.loop_range
    }

    pub fn tail_ms(&self) -> u64 {
        self.tail_ms
    }

    pub fn midi_thru(&self) -> bool {
        self.thru
    }

    /// Hit window in seconds for the current mode.
    pub fn tolerance(&self) -> f64 {
        let factor = match self.mode {
            PracticeMode::Practice => self.config.practice_tolerance_factor,
            PracticeMode::Listen => self.config.listen_tolerance_factor,
        };
        self.config.base_tolerance * factor
    }

    /// Starts after the configured start delay.
    pub fn play(&mut self) -> Result<()> {
        if self.score.is_none() {
            return Err(SoundVizError::InvalidInput("no score loaded"));
        }
        if self.wait.is_some() || self.transport.is_started() {
            return Ok(());
        }
        self.transport.start_in(self.config.start_delay);
        tracing::info!(position = self.transport.position(), "playback started");
        Ok(())
    }

    pub fn pause(&mut self) {
        self.transport.pause();
    }

    /// Stops, rewinds and silences every channel of the external output.
    pub fn stop(&mut self) {
        self.rewind();
        self.transport.stop();
        self.release_sound();
        for message in panic_messages() {
            self.send(&message);
        }
        tracing::info!("playback stopped");
    }

    pub fn restart(&mut self) -> Result<()> {
        if self.score.is_none() {
            return Err(SoundVizError::InvalidInput("no score loaded"));
        }
        self.rewind();
        self.transport.stop();
        self.transport.start_in(self.config.start_delay);
        Ok(())
    }

    /// Moves the playhead, clamped to the score. Cancels a practice wait.
    pub fn seek(&mut self, position: f64) {
        let position = if position.is_finite() {
            position.clamp(0.0, self.duration)
        } else {
            0.0
        };
        self.transport.seek(position);
        self.scheduler.seek(position);
        self.wait = None;
        self.live_keys.clear();
    }

    /// Scales the score tempo; returns the resulting BPM.
    pub fn set_speed(&mut self, factor: f64) -> f64 {
        self.transport.set_speed(factor)
    }

    /// Switching mode resets the practice statistics.
    pub fn set_mode(&mut self, mode: PracticeMode) {
        self.mode = mode;
        self.stats = PracticeStats::default();
        self.resume_if_waiting(false);
        self.reschedule();
    }

    pub fn set_note_wait(&mut self, enabled: bool) {
        self.note_wait = enabled;
        if !enabled {
            self.resume_if_waiting(true);
        }
        self.reschedule();
    }

    pub fn set_hand(&mut self, hand: Hand) {
        self.hand = hand;
        self.reschedule();
    }

    pub fn set_loop(&mut self, start: f64, end: f64) -> Result<()> {
        if !(start.is_finite() && end.is_finite()) || start < 0.0 || end <= start {
            return Err(SoundVizError::InvalidInput(
                "loop end must be after a non-negative start",
            ));
        }
        self.loop_range = Some((start, end));
        Ok(())
    }

    pub fn clear_loop(&mut self) {
        self.loop_range = None;
    }

    pub fn set_muted(&mut self, track: usize, muted: bool) -> Result<()> {
        if !self.tracks.set_muted(track, muted) {
            return Err(SoundVizError::InvalidInput("track index out of range"));
        }
        self.reschedule();
        Ok(())
    }

    pub fn set_solo(&mut self, track: usize, solo: bool) -> Result<()> {
        if !self.tracks.set_solo(track, solo) {
            return Err(SoundVizError::InvalidInput("track index out of range"));
        }
        self.reschedule();
        Ok(())
    }

    /// Delay between a scheduled note's end and its external note-off.
    pub fn set_tail_ms(&mut self, tail_ms: u64) {
        self.tail_ms = tail_ms;
        self.reschedule();
    }

    pub fn set_midi_thru(&mut self, thru: bool) {
        self.thru = thru;
    }

    /// Advances playback by `wall` seconds and fires every event passed.
    pub fn tick(&mut self, wall: f64) -> Vec<TrainerEvent> {
        let mut events = Vec::new();
        if let Some(wait) = &mut self.wait {
            wait.waited += wall.max(0.0);
        }
        let Some(position) = self.transport.advance(wall) else {
            return events;
        };

        let looping = self
            .loop_range
            .filter(|&(start, end)| end > start && position >= end);
        let limit = looping.map_or(position, |(_, end)| end);

        while let Some(event) = self.scheduler.next_due(limit) {
            if self.fire(event, &mut events) {
                return events;
            }
        }

        if let Some((start, _)) = looping {
            self.transport.seek(start);
            self.scheduler.seek(start);
            events.push(TrainerEvent::Looped { to: start });
        } else if self.duration > 0.0 && position >= self.duration {
            events.push(self.finish());
        }
        events
    }

    /// Feeds one message from the player's MIDI keyboard.
    pub fn handle_midi_input(&mut self, bytes: &[u8]) -> Vec<TrainerEvent> {
        let mut events = Vec::new();
        let Some(message) = MidiMessage::from_bytes(bytes) else {
            tracing::debug!(?bytes, "ignoring unparsable midi input");
            return events;
        };
        let now = self.transport.position();

        match message {
            MidiMessage::NoteOn { note, velocity, .. } => {
                self.live_keys.insert(note);
                if self.thru {
                    self.send(&MidiMessage::note_on(0, note, velocity));
                }
                if self.score.is_some() {
                    events.push(self.check_hit(note, now));
                }
                let Some(wait) = &mut self.wait else {
                    return events;
                };
                if wait.required.contains(&note) {
                    wait.hit.insert(note);
                    if wait.required.is_subset(&wait.hit) {
                        if let Some(event) = self.resume_if_waiting(true) {
                            events.push(event);
                        }
                    }
                } else {
                    self.stats.misses.push(Miss {
                        pitch: note,
                        time: now,
                    });
                    events.push(TrainerEvent::WrongNote {
                        pitch: note,
                        time: now,
                    });
                }
            }
            MidiMessage::NoteOff { note, .. } => {
                self.live_keys.remove(&note);
                if self.thru {
                    self.send(&MidiMessage::note_off(0, note));
                }
            }
            MidiMessage::ControlChange {
                controller, value, ..
            } => {
                if self.thru {
                    self.send(&MidiMessage::control_change(0, controller, value));
                }
            }
            _ => {}
        }
        events
    }

    fn check_hit(&mut self, pitch: u8, time: f64) -> TrainerEvent {
        let tolerance = self.tolerance();
        match self.index.match_hit(pitch, time, tolerance) {
            Some(note) => {
                let id = note.id.clone();
                self.hits += 1;
                tracing::debug!(pitch, time, %id, "note hit");
                TrainerEvent::Hit { pitch, id, time }
            }
            None => TrainerEvent::Unmatched { pitch, time },
        }
    }

    /// Ends a practice wait. With `completed` the chord counts as played and
    /// the transport continues.
    fn resume_if_waiting(&mut self, completed: bool) -> Option<TrainerEvent> {
        let wait = self.wait.take()?;
        if !completed {
            return None;
        }
        self.stats.correct += wait.required.len();
        self.stats.timings.push(wait.waited);
        self.transport.start();
        tracing::debug!(
            group = wait.group,
            time = wait.time,
            waited = wait.waited,
            "practice wait resolved"
        );
        Some(TrainerEvent::Resumed {
            group: wait.group,
            waited: wait.waited,
        })
    }

    /// Returns `true` when the event paused playback.
    fn fire(
        &mut self,
        event: ScheduledEvent<TransportAction>,
        events: &mut Vec<TrainerEvent>,
    ) -> bool {
        match event.action {
            TransportAction::NoteOn {
                track,
                channel,
                pitch,
                velocity,
                duration,
            } => {
                self.live_keys.insert(pitch);
                if self.output.is_some() {
                    let velocity = (velocity * 127.0).round() as u8;
                    self.send(&MidiMessage::note_on(channel, pitch, velocity));
                } else if let Some(synth) = &mut self.synth {
                    synth.trigger(track, pitch, duration, velocity);
                }
                events.push(TrainerEvent::NoteOn { track, pitch });
            }
            TransportAction::KeyUp { pitch } => {
                self.live_keys.remove(&pitch);
                events.push(TrainerEvent::NoteOff { pitch });
            }
            TransportAction::NoteOff { channel, pitch } => {
                self.send(&MidiMessage::note_off(channel, pitch));
            }
            TransportAction::Sustain { channel, value } => {
                self.send(&MidiMessage::control_change(
                    channel,
                    SUSTAIN_CONTROLLER,
                    value,
                ));
            }
            TransportAction::PracticeWait { group } => {
                return self.pause_for_group(group, event.time, events);
            }
        }
        false
    }

    fn pause_for_group(&mut self, index: usize, at: f64, events: &mut Vec<TrainerEvent>) -> bool {
        if !self.note_wait || self.mode != PracticeMode::Practice {
            return false;
        }
        let Some(group) = self.groups.get(index) else {
            return false;
        };
        if self.wait.as_ref().is_some_and(|wait| wait.group == index) {
            return false;
        }

        let required: BTreeSet<u8> = group.pitches.iter().copied().collect();
        events.push(TrainerEvent::Waiting {
            group: index,
            pitches: required.iter().copied().collect(),
        });
        self.wait = Some(PracticeWait {
            group: index,
            time: group.time,
            required,
            hit: BTreeSet::new(),
            waited: 0.0,
        });
        self.transport.pause();
        self.transport.seek(at);
        tracing::debug!(group = index, time = at, "waiting for chord");
        true
    }

    fn finish(&mut self) -> TrainerEvent {
        // Release whatever is still sounding before rewinding.
        for event in self.scheduler.due(f64::INFINITY) {
            if let TransportAction::NoteOff { channel, pitch } = event.action {
                self.send(&MidiMessage::note_off(channel, pitch));
            }
        }
        self.rewind();
        self.transport.stop();
        let feedback = (self.mode == PracticeMode::Practice).then(|| self.feedback());
        tracing::info!(hits = self.hits, "playback finished");
        TrainerEvent::Finished { feedback }
    }

    fn rewind(&mut self) {
        self.scheduler.seek(0.0);
        self.wait = None;
        self.live_keys.clear();
    }

    fn release_sound(&mut self) {
        if let Some(synth) = &mut self.synth {
            synth.release_all();
        }
    }

    fn send(&mut self, message: &MidiMessage) {
        let Some(output) = &mut self.output else {
            return;
        };
        if let Err(err) = output.send(message) {
            tracing::warn!(%err, output = output.name(), "midi send failed");
        }
    }

    /// Rebuilds the event list from the score and the current filters,
    /// keeping the playhead where it is.
    fn reschedule(&mut self) {
        let Some(score) = &self.score else {
            self.scheduler.clear();
            return;
        };
        let tail = self.tail_ms as f64 / 1000.0;
        let mut events = Vec::new();

        // Waits go first so they fire before notes sharing their time.
        self.groups = if self.mode == PracticeMode::Practice {
            build_practice_groups(score, self.hand, self.config.chord_tolerance)
        } else {
            Vec::new()
        };
        for (group, practice) in self.groups.iter().enumerate() {
            events.push(ScheduledEvent::new(
                (practice.time - self.config.wait_lead).max(0.0),
                TransportAction::PracticeWait { group },
            ));
        }

        let mut scheduled = 0;
        for (index, track) in score.tracks.iter().enumerate() {
            if !self.tracks.is_enabled(index) {
                continue;
            }
            for note in track.notes.iter().filter(|note| self.hand.plays(note.pitch)) {
                events.push(ScheduledEvent::new(
                    note.time,
                    TransportAction::NoteOn {
                        track: index,
                        channel: track.channel,
                        pitch: note.pitch,
                        velocity: note.velocity,
                        duration: note.duration,
                    },
                ));
                events.push(ScheduledEvent::new(
                    note.end(),
                    TransportAction::KeyUp { pitch: note.pitch },
                ));
                events.push(ScheduledEvent::new(
                    note.end() + tail,
                    TransportAction::NoteOff {
                        channel: track.channel,
                        pitch: note.pitch,
                    },
                ));
                scheduled += 1;
            }
            for sustain in track.sustain_events() {
                events.push(ScheduledEvent::new(
                    sustain.time,
                    TransportAction::Sustain {
                        channel: track.channel,
                        value: (sustain.value * 127.0).round() as u8,
                    },
                ));
            }
        }

        if self.mode == PracticeMode::Practice {
            self.stats.total = scheduled;
        }
        tracing::debug!(
            events = events.len(),
            groups = self.groups.len(),
            "transport rescheduled"
        );
        self.scheduler.set_events(events);
        self.scheduler.seek(self.transport.position());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(notes: &[(u8, f64, f64)]) -> Score {
        let notes: Vec<_> = notes
            .iter()
            .map(|&(pitch, time, duration)| {
                serde_json::json!({ "pitch": pitch, "time": time, "duration": duration, "velocity": 1.0 })
            })
            .collect();
        Score::from_json(&serde_json::json!({ "tracks": [{ "channel": 3, "notes": notes }] }).to_string())
            .unwrap()
    }

    fn session_with_sink() -> (TrainerSession, RecordingSink) {
        let sink = RecordingSink::new("test");
        let session = TrainerSession::new(TrainerConfig::default()).with_output(Box::new(sink.clone()));
        (session, sink)
    }

    fn run(session: &mut TrainerSession, seconds: f64) -> Vec<TrainerEvent> {
        let mut events = Vec::new();
        let mut elapsed = 0.0;
        while elapsed < seconds {
            events.extend(session.tick(0.01));
            elapsed += 0.01;
        }
        events
    }

    #[test]
    fn hands_split_at_middle_c() {
        assert!(Hand::Left.plays(59));
        assert!(!Hand::Left.plays(60));
        assert!(Hand::Right.plays(60));
        assert!(Hand::Both.plays(0));
        assert_eq!("Right".parse::<Hand>().unwrap(), Hand::Right);
        assert!("feet".parse::<Hand>().is_err());
    }

    #[test]
    fn solo_overrides_mute() {
        let mut tracks = TrackState::new(3);
        assert!(tracks.set_muted(0, true));
        assert!(!tracks.is_enabled(0));
        assert!(tracks.is_enabled(1));

        tracks.set_solo(0, true);
        assert!(!tracks.is_muted(0));
        assert!(tracks.is_enabled(0));
        assert!(!tracks.is_enabled(1));

        tracks.set_muted(0, true);
        assert!(!tracks.is_solo(0));
        assert!(!tracks.set_solo(7, true));
    }

    #[test]
    fn states_follow_the_transport() {
        let mut session = TrainerSession::new(TrainerConfig::default());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.play().is_err());

        session.load(score(&[(60, 0.5, 0.5)]));
        assert_eq!(session.state(), SessionState::Scheduled);
        session.play().unwrap();
        assert_eq!(session.state(), SessionState::Playing);
        session.pause();
        assert_eq!(session.state(), SessionState::Paused);
        session.unload();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn playback_sends_notes_on_the_track_channel() {
        let (mut session, sink) = session_with_sink();
        session.load(score(&[(60, 0.0, 0.5), (72, 1.5, 0.5)]));
        session.play().unwrap();

        let events = run(&mut session, 0.2);
        assert!(events.contains(&TrainerEvent::NoteOn { track: 0, pitch: 60 }));
        assert!(session.live_keys().contains(&60));
        assert_eq!(sink.take(), vec![MidiMessage::note_on(3, 60, 127)]);

        // Key goes up at the note end, the note-off follows after the tail.
        run(&mut session, 0.4);
        assert!(!session.live_keys().contains(&60));
        assert!(sink.messages().is_empty());
        run(&mut session, 0.1);
        assert_eq!(sink.take(), vec![MidiMessage::note_off(3, 60)]);
    }

    #[test]
    fn local_synth_only_without_output() {
        let synth = RecordingSynth::new();
        let mut session =
            TrainerSession::new(TrainerConfig::default()).with_synth(Box::new(synth.clone()));
        session.load(score(&[(69, 0.0, 0.5)]));
        session.play().unwrap();
        run(&mut session, 0.2);
        assert_eq!(synth.notes().len(), 1);
        assert_eq!(synth.notes()[0].frequency, 440.0);

        session.set_output(Some(Box::new(RecordingSink::new("out"))));
        session.restart().unwrap();
        run(&mut session, 0.2);
        assert_eq!(synth.notes().len(), 1);
    }

    #[test]
    fn stop_sends_panic() {
        let (mut session, sink) = session_with_sink();
        session.load(score(&[(60, 0.0, 0.5)]));
        session.play().unwrap();
        run(&mut session, 0.3);
        sink.take();

        session.stop();
        assert_eq!(session.position(), 0.0);
        assert_eq!(session.state(), SessionState::Scheduled);
        assert_eq!(sink.messages(), panic_messages());
    }

    #[test]
    fn scoring_uses_mode_tolerance() {
        let mut session = TrainerSession::new(TrainerConfig::default());
        session.load(score(&[(60, 0.0, 0.5), (62, 0.0, 0.5)]));
        assert!((session.tolerance() - 0.12).abs() < 1e-9);

        let events = session.handle_midi_input(&[0x90, 60, 100]);
        assert!(matches!(&events[0], TrainerEvent::Hit { pitch: 60, id, .. } if id == "t0n0"));
        assert_eq!(session.hits(), 1);
        // Already matched.
        let events = session.handle_midi_input(&[0x90, 60, 100]);
        assert!(matches!(events[0], TrainerEvent::Unmatched { pitch: 60, .. }));

        session.set_mode(PracticeMode::Practice);
        assert!((session.tolerance() - 0.08).abs() < 1e-9);
        assert!(session.live_keys().contains(&60));
        session.handle_midi_input(&[0x90, 60, 0]);
        assert!(!session.live_keys().contains(&60));
    }

    #[test]
    fn practice_waits_for_the_whole_chord() {
        let (mut session, _sink) = session_with_sink();
        session.load(score(&[(60, 0.0, 0.5), (64, 0.02, 0.5), (67, 1.0, 0.5)]));
        session.set_mode(PracticeMode::Practice);
        session.set_note_wait(true);
        assert_eq!(session.stats().total, 3);
        assert_eq!(session.groups().len(), 2);
        session.play().unwrap();

        let events = session.tick(0.1);
        assert_eq!(
            events,
            vec![TrainerEvent::Waiting {
                group: 0,
                pitches: vec![60, 64]
            }]
        );
        assert_eq!(session.state(), SessionState::WaitingForInput);

        // Time passes but the transport holds.
        assert!(session.tick(0.5).is_empty());
        assert_eq!(session.position(), 0.0);

        let events = session.handle_midi_input(&[0x90, 62, 90]);
        assert!(events.contains(&TrainerEvent::WrongNote { pitch: 62, time: 0.0 }));
        session.handle_midi_input(&[0x90, 60, 90]);
        assert_eq!(session.waiting_for(), vec![64]);
        assert_eq!(session.state(), SessionState::WaitingForInput);

        let events = session.handle_midi_input(&[0x90, 64, 90]);
        assert!(matches!(events.last(), Some(TrainerEvent::Resumed { group: 0, .. })));
        assert_eq!(session.state(), SessionState::Playing);
        assert_eq!(session.stats().correct, 2);
        assert_eq!(session.stats().misses.len(), 1);
        assert!((session.stats().timings[0] - 0.5).abs() < 1e-9);

        let events = session.tick(0.05);
        assert!(events.contains(&TrainerEvent::NoteOn { track: 0, pitch: 60 }));
        assert!(events.contains(&TrainerEvent::NoteOn { track: 0, pitch: 64 }));
    }

    #[test]
    fn coarse_ticks_still_stop_at_the_chord() {
        let (mut session, _sink) = session_with_sink();
        session.load(score(&[(60, 0.5, 0.5), (72, 2.0, 0.5)]));
        session.set_mode(PracticeMode::Practice);
        session.set_note_wait(true);
        session.play().unwrap();

        assert!(session.tick(0.07).is_empty());
        assert!(session.tick(0.3).is_empty());
        let events = session.tick(0.3);
        assert_eq!(
            events,
            vec![TrainerEvent::Waiting {
                group: 0,
                pitches: vec![60]
            }]
        );
        assert!((session.position() - 0.48).abs() < 1e-9);
    }

    #[test]
    fn seeking_past_a_chord_skips_its_wait() {
        let (mut session, _sink) = session_with_sink();
        session.load(score(&[(60, 0.5, 0.5), (72, 2.0, 0.5)]));
        session.set_mode(PracticeMode::Practice);
        session.set_note_wait(true);
        session.seek(1.0);
        session.play().unwrap();

        let events = run(&mut session, 0.5);
        assert!(!events
            .iter()
            .any(|event| matches!(event, TrainerEvent::Waiting { .. })));
        let events = run(&mut session, 0.6);
        assert!(events.contains(&TrainerEvent::Waiting {
            group: 1,
            pitches: vec![72]
        }));
    }

    #[test]
    fn finishing_reports_practice_feedback() {
        let (mut session, sink) = session_with_sink();
        session.load(score(&[(60, 0.0, 0.2)]));
        session.set_mode(PracticeMode::Practice);
        session.play().unwrap();

        let events = run(&mut session, 0.5);
        let Some(TrainerEvent::Finished { feedback: Some(feedback) }) = events.last() else {
            panic!("expected feedback, got {events:?}");
        };
        assert_eq!(feedback.total, 1);
        assert_eq!(feedback.accuracy_percent, 0);
        assert_eq!(session.state(), SessionState::Scheduled);
        assert_eq!(session.position(), 0.0);
        // The trailing note-off is flushed on the way out.
        assert_eq!(sink.messages().last(), Some(&MidiMessage::note_off(3, 60)));
    }

    #[test]
    fn loop_jumps_back_to_start() {
        let mut session = TrainerSession::new(TrainerConfig::default());
        session.load(score(&[(60, 0.0, 0.1), (62, 0.5, 0.1), (64, 2.0, 0.1)]));
        assert!(session.set_loop(1.0, 0.5).is_err());
        session.set_loop(0.4, 1.0).unwrap();
        session.seek(0.4);
        session.play().unwrap();

        let events = run(&mut session, 0.75);
        assert!(events.contains(&TrainerEvent::Looped { to: 0.4 }));
        assert!(!events.contains(&TrainerEvent::NoteOn { track: 0, pitch: 64 }));
        assert!(session.position() < 1.0);
    }

    #[test]
    fn muting_and_hand_filter_reschedule() {
        let mut session = TrainerSession::new(TrainerConfig::default());
        session.load(score(&[(48, 0.0, 0.5), (72, 0.0, 0.5)]));
        let note_ons = |session: &TrainerSession| {
            session
                .scheduled_events()
                .iter()
                .filter(|event| matches!(event.action, TransportAction::NoteOn { .. }))
                .count()
        };
        assert_eq!(note_ons(&session), 2);
        session.set_hand(Hand::Left);
        assert_eq!(note_ons(&session), 1);
        session.set_muted(0, true).unwrap();
        assert_eq!(note_ons(&session), 0);
        assert!(session.set_muted(4, true).is_err());
    }

    #[test]
    fn thru_echoes_on_channel_zero() {
        let (mut session, sink) = session_with_sink();
        session.handle_midi_input(&[0x95, 60, 100]);
        assert!(sink.messages().is_empty());

        session.set_midi_thru(true);
        session.handle_midi_input(&[0x95, 60, 100]);
        session.handle_midi_input(&[0x85, 60, 0]);
        session.handle_midi_input(&[0xB5, 64, 127]);
        assert_eq!(
            sink.messages(),
            vec![
                MidiMessage::note_on(0, 60, 100),
                MidiMessage::note_off(0, 60),
                MidiMessage::control_change(0, 64, 127),
            ]
        );
    }

    #[test]
    fn speed_scales_bpm() {
        let mut session = TrainerSession::new(TrainerConfig::default());
        session.load(score(&[(60, 0.0, 0.5)]));
        assert_eq!(session.set_speed(0.5), 60.0);
        assert_eq!(session.set_speed(5.0), 300.0);
    }
}
