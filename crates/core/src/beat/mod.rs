//! Energy history based onset detection.
//!
//! The detector is fed one frequency frame per animation tick. It keeps a
//! rolling window of frame energies and reports a beat whenever the current
//! energy stands out against that window, which keeps the threshold adaptive
//! to quiet and loud passages alike.

mod history;

use std::{fmt, time::Duration};

use crossbeam_channel::{bounded, Receiver, TrySendError};
use serde::{Deserialize, Serialize};

use crate::{BeatConfig, FrequencyFrame};

pub use history::EnergyHistory;

const MIN_MULTIPLIER: f32 = 1.0;
const MAX_MULTIPLIER: f32 = 3.0;

/// Frequency range an event was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeatBand {
    Overall,
    Bass,
    Mids,
    Treble,
}

impl fmt::Display for BeatBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Overall => "overall",
            Self::Bass => "bass",
            Self::Mids => "mids",
            Self::Treble => "treble",
        };
        f.write_str(name)
    }
}

/// A discrete onset. Transient: delivered to subscribers and not stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub energy: f32,
    pub band: BeatBand,
    pub timestamp: Duration,
    /// How far the energy exceeded its rolling mean, in `[0, 1]`.
    pub intensity: f32,
}

/// Energy statistics published after every processed frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyReading {
    pub total_energy: f32,
    pub average_energy: f32,
    pub variance: f32,
    pub bass: f32,
    pub mids: f32,
    pub treble: f32,
}

/// Anything that can hand out the latest frequency frame.
pub trait FrameSource {
    /// Returns `None` while no analysis data is available.
    fn frequency_frame(&mut self) -> Option<FrequencyFrame>;
}

/// Handle returned by the subscription methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<T> = Box<dyn FnMut(&T) -> bool + Send>;

/// Ordered list of listeners. A listener returning `false` is dropped.
pub struct Observers<T> {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener<T>)>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            listeners: Vec::new(),
        }
    }
}

impl<T> Observers<T> {
    pub fn subscribe<F>(&mut self, mut listener: F) -> SubscriptionId
    where
        F: FnMut(&T) + Send + 'static,
    {
        self.subscribe_retained(move |value| {
            listener(value);
            true
        })
    }

    /// Like [`Observers::subscribe`], but the listener decides whether it
    /// stays registered.
    pub fn subscribe_retained<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn notify(&mut self, value: &T) {
        self.listeners.retain_mut(|(_, listener)| listener(value));
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<T> fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Adaptive-threshold beat detector over overall and per-band energies.
#[derive(Debug)]
pub struct BeatDetector {
    running: bool,
    threshold: f32,
    min_time_between_beats: Duration,
    last_beat: Option<Duration>,
    energy_history: EnergyHistory,
    average_energy: f32,
    variance: f32,
    bass: BandState,
    mids: BandState,
    treble: BandState,
    beat_observers: Observers<BeatEvent>,
    energy_observers: Observers<EnergyReading>,
}

#[derive(Debug)]
struct BandState {
    band: BeatBand,
    history: EnergyHistory,
    multiplier: f32,
}

impl BandState {
    fn new(band: BeatBand, capacity: usize, multiplier: f32) -> Self {
        Self {
            band,
            history: EnergyHistory::new(capacity),
            multiplier: clamp_multiplier(multiplier),
        }
    }

    /// Compares `value` against the window of previous readings, then records it.
    fn observe(&mut self, value: f32, gate_open: bool, now: Duration) -> Option<BeatEvent> {
        let mean = self.history.mean();
        let fires = gate_open && self.history.is_full() && value > mean * self.multiplier;
        self.history.push(value);

        fires.then(|| BeatEvent {
            energy: value,
            band: self.band,
            timestamp: now,
            intensity: intensity(value, mean),
        })
    }
}

impl Default for BeatDetector {
    fn default() -> Self {
        Self::new(&BeatConfig::default())
    }
}

impl BeatDetector {
    pub fn new(config: &BeatConfig) -> Self {
        let band_capacity = (config.history_size / 2).max(1);
        Self {
            running: false,
            threshold: clamp_multiplier(config.threshold),
            min_time_between_beats: Duration::from_millis(config.min_time_between_beats_ms),
            last_beat: None,
            energy_history: EnergyHistory::new(config.history_size),
            average_energy: 0.0,
            variance: 0.0,
            bass: BandState::new(BeatBand::Bass, band_capacity, config.bass_threshold),
            mids: BandState::new(BeatBand::Mids, band_capacity, config.mids_threshold),
            treble: BandState::new(BeatBand::Treble, band_capacity, config.treble_threshold),
            beat_observers: Observers::default(),
            energy_observers: Observers::default(),
        }
    }

    /// Enables detection. Returns `false` if it was already running.
    pub fn start(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        tracing::info!("beat detection started");
        true
    }

    pub fn stop(&mut self) {
        if self.running {
            tracing::info!("beat detection stopped");
        }
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Registers a beat listener. Any number of listeners may be attached.
    pub fn on_beat<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&BeatEvent) + Send + 'static,
    {
        self.beat_observers.subscribe(listener)
    }

    /// Registers a listener for the per-frame energy statistics.
    pub fn on_energy_change<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&EnergyReading) + Send + 'static,
    {
        self.energy_observers.subscribe(listener)
    }

    /// Delivers beats into a bounded channel. Beats are dropped while the
    /// channel is full; the subscription ends when the receiver is dropped.
    pub fn beat_channel(&mut self, capacity: usize) -> Receiver<BeatEvent> {
        let (sender, receiver) = bounded(capacity.max(1));
        self.beat_observers
            .subscribe_retained(move |event| match sender.try_send(event.clone()) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
        receiver
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.beat_observers.unsubscribe(id) || self.energy_observers.unsubscribe(id)
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = clamp_multiplier(threshold);
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_band_thresholds(&mut self, bass: f32, mids: f32, treble: f32) {
        self.bass.multiplier = clamp_multiplier(bass);
        self.mids.multiplier = clamp_multiplier(mids);
        self.treble.multiplier = clamp_multiplier(treble);
    }

    /// Returns the bass, mids and treble multipliers.
    pub fn band_thresholds(&self) -> (f32, f32, f32) {
        (
            self.bass.multiplier,
            self.mids.multiplier,
            self.treble.multiplier,
        )
    }

    pub fn set_min_time_between_beats(&mut self, interval: Duration) {
        self.min_time_between_beats = interval;
    }

    pub fn min_time_between_beats(&self) -> Duration {
        self.min_time_between_beats
    }

    pub fn average_energy(&self) -> f32 {
        self.average_energy
    }

    pub fn variance(&self) -> f32 {
        self.variance
    }

    pub fn history_len(&self) -> usize {
        self.energy_history.len()
    }

    /// Clears every history and forgets the last beat. Subscribers stay.
    pub fn reset(&mut self) {
        self.energy_history.clear();
        self.bass.history.clear();
        self.mids.history.clear();
        self.treble.history.clear();
        self.last_beat = None;
        self.average_energy = 0.0;
        self.variance = 0.0;
        tracing::info!("beat detector reset");
    }

    /// Polls `source` for its latest frame and processes it.
    pub fn analyze<S>(&mut self, source: &mut S, now: Duration) -> Vec<BeatEvent>
    where
        S: FrameSource + ?Sized,
    {
        if !self.running {
            return Vec::new();
        }
        let frame = source.frequency_frame();
        self.process(frame.as_ref(), now)
    }

    /// Processes one frame taken at `now`. A stopped detector or a missing
    /// frame leaves all state untouched.
    pub fn process(&mut self, frame: Option<&FrequencyFrame>, now: Duration) -> Vec<BeatEvent> {
        if !self.running {
            return Vec::new();
        }
        let Some(frame) = frame.filter(|frame| !frame.is_empty()) else {
            tracing::trace!("no frequency data this tick");
            return Vec::new();
        };

        let total_energy = frame.rms();
        let window_full = self.energy_history.is_full();
        if window_full {
            self.average_energy = self.energy_history.mean();
            self.variance = self.energy_history.variance();
        }

        let since_last_beat = self.last_beat.map(|last| now.saturating_sub(last));
        let refractory_over =
            since_last_beat.map_or(true, |elapsed| elapsed > self.min_time_between_beats);
        let band_gate_open =
            since_last_beat.map_or(true, |elapsed| elapsed > self.min_time_between_beats / 2);

        let mut events = Vec::new();
        if refractory_over
            && window_full
            && total_energy > self.average_energy * self.threshold
            && total_energy > self.variance * 2.0
        {
            self.last_beat = Some(now);
            events.push(BeatEvent {
                energy: total_energy,
                band: BeatBand::Overall,
                timestamp: now,
                intensity: intensity(total_energy, self.average_energy),
            });
        }
        self.energy_history.push(total_energy);

        let (bass, mids, treble) = (frame.bass(), frame.mids(), frame.treble());
        events.extend(self.bass.observe(bass, band_gate_open, now));
        events.extend(self.mids.observe(mids, band_gate_open, now));
        events.extend(self.treble.observe(treble, band_gate_open, now));

        for event in &events {
            tracing::debug!(
                band = %event.band,
                energy = event.energy,
                intensity = event.intensity,
                "beat"
            );
            self.beat_observers.notify(event);
        }

        self.energy_observers.notify(&EnergyReading {
            total_energy,
            average_energy: self.average_energy,
            variance: self.variance,
            bass,
            mids,
            treble,
        });

        events
    }
}

fn clamp_multiplier(value: f32) -> f32 {
    if value.is_nan() {
        return MIN_MULTIPLIER;
    }
    value.clamp(MIN_MULTIPLIER, MAX_MULTIPLIER)
}

/// Relative excess of `value` over `mean`, clamped to `[0, 1]`.
fn intensity(value: f32, mean: f32) -> f32 {
    if !(mean > 0.0) || !mean.is_finite() {
        return 0.0;
    }
    let ratio = (value - mean) / mean;
    if ratio.is_nan() {
        0.0
    } else {
        ratio.clamp(0.0, 1.0)
    }
}
