//! Clocks and event scheduling shared by the visualiser and the trainer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 300.0;
pub const DEFAULT_BPM: f64 = 120.0;

/// A per-frame callback driver with a single running flag.
///
/// Starting an already running loop is a no-op, so two loops can never run
/// side by side; a tick after `stop` does nothing.
#[derive(Debug, Default, Clone)]
pub struct FrameLoop {
    running: bool,
    frame: u64,
    elapsed: Duration,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the loop was already running.
    pub fn start(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        true
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of frames produced so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Advances by one frame of `delta` and returns the time of that frame,
    /// or `None` while stopped.
    pub fn tick(&mut self, delta: Duration) -> Option<Duration> {
        if !self.running {
            return None;
        }
        self.frame += 1;
        self.elapsed += delta;
        Some(self.elapsed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Stopped,
    Started,
    Paused,
}

/// Playback clock measured in score seconds.
///
/// The tempo is expressed as BPM against the score's own tempo, so changing
/// speed scales how fast score time passes without touching event times.
#[derive(Debug, Clone)]
pub struct Transport {
    state: TransportState,
    position: f64,
    lead_in: f64,
    original_bpm: f64,
    bpm: f64,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(DEFAULT_BPM)
    }
}

impl Transport {
    pub fn new(original_bpm: f64) -> Self {
        let original_bpm = sanitize_bpm(original_bpm);
        Self {
            state: TransportState::Stopped,
            position: 0.0,
            lead_in: 0.0,
            original_bpm,
            bpm: original_bpm,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state == TransportState::Started
    }

    /// Current position in score seconds.
    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn original_bpm(&self) -> f64 {
        self.original_bpm
    }

    /// Resets the reference tempo and the playback tempo with it.
    pub fn set_original_bpm(&mut self, bpm: f64) {
        self.original_bpm = sanitize_bpm(bpm);
        self.bpm = self.original_bpm;
    }

    /// Ratio between the playback tempo and the reference tempo.
    pub fn speed(&self) -> f64 {
        self.bpm / self.original_bpm
    }

    /// Sets the tempo to `original × factor`, clamped to 20–300 BPM.
    pub fn set_speed(&mut self, factor: f64) -> f64 {
        let factor = if factor.is_finite() { factor } else { 1.0 };
        self.bpm = (self.original_bpm * factor).clamp(MIN_BPM, MAX_BPM);
        self.bpm
    }

    pub fn start(&mut self) {
        self.start_in(0.0);
    }

    /// Starts after `lead_in` wall seconds have passed.
    pub fn start_in(&mut self, lead_in: f64) {
        self.state = TransportState::Started;
        self.lead_in = lead_in.max(0.0);
    }

    pub fn pause(&mut self) {
        if self.state == TransportState::Started {
            self.state = TransportState::Paused;
            self.lead_in = 0.0;
        }
    }

    /// Stops and rewinds to zero.
    pub fn stop(&mut self) {
        self.state = TransportState::Stopped;
        self.position = 0.0;
        self.lead_in = 0.0;
    }

    pub fn seek(&mut self, position: f64) {
        self.position = if position.is_finite() {
            position.max(0.0)
        } else {
            0.0
        };
    }

    /// Moves the clock forward by `wall` seconds and returns the new position,
    /// or `None` unless started and past the start delay.
    pub fn advance(&mut self, wall: f64) -> Option<f64> {
        if self.state != TransportState::Started {
            return None;
        }
        let mut wall = wall.max(0.0);
        if self.lead_in > 0.0 {
            let consumed = wall.min(self.lead_in);
            self.lead_in -= consumed;
            wall -= consumed;
            if self.lead_in > 0.0 {
                return None;
            }
        }
        self.position += wall * self.speed();
        Some(self.position)
    }
}

fn sanitize_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() && bpm > 0.0 {
        bpm
    } else {
        DEFAULT_BPM
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent<A> {
    pub time: f64,
    pub action: A,
}

impl<A> ScheduledEvent<A> {
    pub fn new(time: f64, action: A) -> Self {
        Self { time, action }
    }
}

/// Time ordered list of actions, consumed as a transport passes them.
/// Actions sharing a time fire in insertion order.
#[derive(Debug, Clone)]
pub struct Scheduler<A> {
    events: Vec<ScheduledEvent<A>>,
    next_event: usize,
}

impl<A> Default for Scheduler<A> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            next_event: 0,
        }
    }
}

impl<A: Clone> Scheduler<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, time: f64, action: A) {
        let index = self.events.partition_point(|event| event.time <= time);
        self.events.insert(index, ScheduledEvent::new(time, action));
        if index < self.next_event {
            self.next_event += 1;
        }
    }

    pub fn set_events(&mut self, mut events: Vec<ScheduledEvent<A>>) {
        events.sort_by(|a, b| a.time.total_cmp(&b.time));
        self.events = events;
        self.next_event = 0;
    }

    /// Drops every event.
    pub fn clear(&mut self) {
        self.events.clear();
        self.next_event = 0;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events still waiting to fire.
    pub fn pending(&self) -> usize {
        self.events.len() - self.next_event
    }

    pub fn events(&self) -> &[ScheduledEvent<A>] {
        &self.events
    }

    /// Re-arms every event at or after `position`.
    pub fn seek(&mut self, position: f64) {
        self.next_event = self.events.partition_point(|event| event.time < position);
    }

    /// Pops the next event whose time is at or before `position`.
    pub fn next_due(&mut self, position: f64) -> Option<ScheduledEvent<A>> {
        let event = self.events.get(self.next_event)?;
        if event.time > position {
            return None;
        }
        self.next_event += 1;
        Some(event.clone())
    }

    /// Pops every event due at `position`.
    pub fn due(&mut self, position: f64) -> Vec<ScheduledEvent<A>> {
        std::iter::from_fn(|| self.next_due(position)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_loop_never_runs_twice() {
        let mut frames = FrameLoop::new();
        assert!(frames.tick(Duration::from_millis(16)).is_none());
        assert!(frames.start());
        assert!(!frames.start());
        assert_eq!(frames.tick(Duration::from_millis(16)), Some(Duration::from_millis(16)));
        frames.stop();
        assert!(frames.tick(Duration::from_millis(16)).is_none());
        assert_eq!(frames.frame(), 1);
    }

    #[test]
    fn transport_lead_in_and_speed() {
        let mut transport = Transport::new(100.0);
        assert!(transport.advance(1.0).is_none());

        transport.start_in(0.07);
        assert!(transport.advance(0.05).is_none());
        let position = transport.advance(0.05).unwrap();
        assert!((position - 0.03).abs() < 1e-9);

        assert_eq!(transport.set_speed(0.5), 50.0);
        let position = transport.advance(1.0).unwrap();
        assert!((position - 0.53).abs() < 1e-9);

        transport.pause();
        assert!(transport.advance(1.0).is_none());
        transport.stop();
        assert_eq!(transport.position(), 0.0);
        assert_eq!(transport.state(), TransportState::Stopped);
    }

    #[test]
    fn speed_is_clamped_to_bpm_range() {
        let mut transport = Transport::new(120.0);
        assert_eq!(transport.set_speed(10.0), MAX_BPM);
        assert_eq!(transport.set_speed(0.01), MIN_BPM);
        assert_eq!(Transport::new(f64::NAN).original_bpm(), DEFAULT_BPM);
    }

    #[test]
    fn scheduler_fires_in_time_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(1.0, "b");
        scheduler.schedule(0.5, "a");
        scheduler.schedule(1.0, "c");
        scheduler.schedule(2.0, "d");

        let fired: Vec<_> = scheduler.due(1.0).into_iter().map(|e| e.action).collect();
        assert_eq!(fired, vec!["a", "b", "c"]);
        assert!(scheduler.due(1.5).is_empty());
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn seeking_rearms_events() {
        let mut scheduler = Scheduler::new();
        scheduler.set_events(vec![
            ScheduledEvent::new(0.0, 0),
            ScheduledEvent::new(1.0, 1),
            ScheduledEvent::new(2.0, 2),
        ]);
        assert_eq!(scheduler.due(5.0).len(), 3);

        scheduler.seek(1.0);
        let fired: Vec<_> = scheduler.due(5.0).into_iter().map(|e| e.action).collect();
        assert_eq!(fired, vec![1, 2]);
    }
}
