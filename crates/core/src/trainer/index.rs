use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Hand, Note, Score};

/// One note the player is expected to hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedNote {
    pub pitch: u8,
    pub time: f64,
    pub id: String,
    pub track: usize,
    pub matched: bool,
}

/// Expected notes bucketed by start time in 100 ms steps.
#[derive(Debug, Clone, Default)]
pub struct ExpectedNoteIndex {
    buckets: BTreeMap<i64, Vec<ExpectedNote>>,
    len: usize,
}

/// Bucket key of a time: `round(time * 10)`.
pub fn bucket_of(time: f64) -> i64 {
    (time * 10.0).round() as i64
}

impl ExpectedNoteIndex {
    pub fn from_score(score: &Score) -> Self {
        let mut index = Self::default();
        for note in score.notes() {
            index.insert(note);
        }
        index
    }

    fn insert(&mut self, note: &Note) {
        self.buckets
            .entry(bucket_of(note.time))
            .or_default()
            .push(ExpectedNote {
                pitch: note.pitch,
                time: note.time,
                id: note.id.clone(),
                track: note.track,
                matched: false,
            });
        self.len += 1;
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket(&self, key: i64) -> &[ExpectedNote] {
        self.buckets.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExpectedNote> {
        self.buckets.values().flatten()
    }

    pub fn matched_count(&self) -> usize {
        self.iter().filter(|note| note.matched).count()
    }

    /// Marks the unmatched entry of `pitch` closest to `time` as matched,
    /// provided it lies within `tolerance`. Every bucket overlapping the
    /// window is searched.
    pub fn match_hit(&mut self, pitch: u8, time: f64, tolerance: f64) -> Option<&ExpectedNote> {
        let range = bucket_of(time - tolerance)..=bucket_of(time + tolerance);
        let mut best: Option<(i64, usize, f64)> = None;
        for (&key, notes) in self.buckets.range(range) {
            for (position, note) in notes.iter().enumerate() {
                if note.matched || note.pitch != pitch {
                    continue;
                }
                let distance = (note.time - time).abs();
                if distance > tolerance {
                    continue;
                }
                if best.map(|(_, _, d)| distance < d).unwrap_or(true) {
                    best = Some((key, position, distance));
                }
            }
        }

        let (key, position, _) = best?;
        let note = self.buckets.get_mut(&key)?.get_mut(position)?;
        note.matched = true;
        Some(&*note)
    }
}

/// Notes whose starts fall within the chord tolerance of the first one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeGroup {
    pub time: f64,
    pub pitches: Vec<u8>,
    pub ids: Vec<String>,
}

/// Groups the notes played by `hand` into chords, in time order.
pub fn build_practice_groups(score: &Score, hand: Hand, tolerance: f64) -> Vec<PracticeGroup> {
    let mut notes: Vec<&Note> = score
        .notes()
        .filter(|note| hand.plays(note.pitch))
        .collect();
    notes.sort_by(|a, b| a.time.total_cmp(&b.time));

    let mut groups: Vec<PracticeGroup> = Vec::new();
    for note in notes {
        match groups.last_mut() {
            Some(group) if (note.time - group.time).abs() <= tolerance => {
                group.pitches.push(note.pitch);
                group.ids.push(note.id.clone());
            }
            _ => groups.push(PracticeGroup {
                time: note.time,
                pitches: vec![note.pitch],
                ids: vec![note.id.clone()],
            }),
        }
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Miss {
    pub pitch: u8,
    pub time: f64,
}

/// Practice results collected between loads or mode changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PracticeStats {
    pub total: usize,
    pub correct: usize,
    pub misses: Vec<Miss>,
    /// Delay between each group's time and the moment it was completed.
    pub timings: Vec<f64>,
}

impl PracticeStats {
    pub fn accuracy_percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (self.correct as f64 / self.total as f64 * 100.0).round() as u32
    }
}

/// End-of-run summary shown after a practice pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeFeedback {
    pub accuracy_percent: u32,
    pub correct: usize,
    pub total: usize,
    pub misses: Vec<Miss>,
}

impl From<&PracticeStats> for PracticeFeedback {
    fn from(stats: &PracticeStats) -> Self {
        Self {
            accuracy_percent: stats.accuracy_percent(),
            correct: stats.correct,
            total: stats.total,
            misses: stats.misses.clone(),
        }
    }
}
