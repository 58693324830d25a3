use std::{f32::consts::PI, time::Duration};

use serde::{Deserialize, Serialize};

/// Easing curves used by beat accents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Easing {
    QuadOut,
    CubicOut,
    ElasticOut,
}

impl Easing {
    /// Maps linear progress in `[0, 1]` onto the curve.
    pub fn apply(self, progress: f32) -> f32 {
        let p = progress.clamp(0.0, 1.0);
        match self {
            Self::QuadOut => 1.0 - (1.0 - p).powi(2),
            Self::CubicOut => 1.0 - (1.0 - p).powi(3),
            Self::ElasticOut => {
                if p == 0.0 || p == 1.0 {
                    p
                } else {
                    2f32.powf(-10.0 * p) * ((p * 10.0 - 0.75) * (2.0 * PI) / 3.0).sin() + 1.0
                }
            }
        }
    }
}

/// A value kicked to a peak and eased back to its baseline over a fixed
/// duration. Sampled with the current frame time.
#[derive(Debug, Clone, PartialEq)]
pub struct Decay {
    baseline: f32,
    peak: f32,
    started: Option<Duration>,
    duration: Duration,
    easing: Easing,
}

impl Decay {
    pub fn new(duration: Duration, easing: Easing) -> Self {
        Self {
            baseline: 0.0,
            peak: 0.0,
            started: None,
            duration,
            easing,
        }
    }

    pub fn with_baseline(mut self, baseline: f32) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn baseline(&self) -> f32 {
        self.baseline
    }

    /// Restarts the animation from `peak`.
    pub fn trigger(&mut self, peak: f32, now: Duration) {
        self.peak = peak;
        self.started = Some(now);
    }

    pub fn reset(&mut self) {
        self.started = None;
    }

    fn progress(&self, now: Duration) -> Option<f32> {
        let started = self.started?;
        if self.duration.is_zero() {
            return Some(1.0);
        }
        let elapsed = now.saturating_sub(started).as_secs_f32();
        Some((elapsed / self.duration.as_secs_f32()).min(1.0))
    }

    pub fn value(&self, now: Duration) -> f32 {
        match self.progress(now) {
            Some(p) if p < 1.0 => {
                self.peak + (self.baseline - self.peak) * self.easing.apply(p)
            }
            _ => self.baseline,
        }
    }

    pub fn is_finished(&self, now: Duration) -> bool {
        self.progress(now).map(|p| p >= 1.0).unwrap_or(true)
    }
}

/// Hue and rotation accumulators advanced once per drawn frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorCycle {
    hue: f32,
    hue_step: f32,
    rotation: f32,
    rotation_step: f32,
}

impl ColorCycle {
    pub fn new(start_hue: f32, hue_step: f32) -> Self {
        Self {
            hue: start_hue.rem_euclid(360.0),
            hue_step,
            rotation: 0.0,
            rotation_step: 0.0,
        }
    }

    pub fn with_rotation(mut self, step: f32) -> Self {
        self.rotation_step = step;
        self
    }

    pub fn hue(&self) -> f32 {
        self.hue
    }

    /// Accumulated rotation in radians.
    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn advance(&mut self) {
        self.hue = (self.hue + self.hue_step).rem_euclid(360.0);
        self.rotation += self.rotation_step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn curves_hit_their_endpoints() {
        for easing in [Easing::QuadOut, Easing::CubicOut, Easing::ElasticOut] {
            assert_eq!(easing.apply(0.0), 0.0);
            assert!((easing.apply(1.0) - 1.0).abs() < 1e-6);
        }
        assert!((Easing::QuadOut.apply(0.5) - 0.75).abs() < 1e-6);
        assert!((Easing::CubicOut.apply(0.5) - 0.875).abs() < 1e-6);
    }

    #[test]
    fn decay_returns_to_baseline() {
        let mut decay = Decay::new(ms(400), Easing::QuadOut);
        assert_eq!(decay.value(ms(0)), 0.0);

        decay.trigger(1.0, ms(1_000));
        assert_eq!(decay.value(ms(1_000)), 1.0);
        assert!((decay.value(ms(1_200)) - 0.25).abs() < 1e-6);
        assert_eq!(decay.value(ms(1_400)), 0.0);
        assert!(decay.is_finished(ms(1_400)));
    }

    #[test]
    fn elastic_decay_settles_on_custom_baseline() {
        let mut amplitude = Decay::new(ms(800), Easing::ElasticOut).with_baseline(1.0);
        amplitude.trigger(1.5, ms(0));
        assert_eq!(amplitude.value(ms(0)), 1.5);
        assert_eq!(amplitude.value(ms(800)), 1.0);
        assert!(amplitude.value(ms(400)) > 0.9);
    }

    #[test]
    fn hue_wraps_around() {
        let mut colors = ColorCycle::new(359.75, 0.5).with_rotation(0.005);
        colors.advance();
        assert!((colors.hue() - 0.25).abs() < 1e-4);
        assert!((colors.rotation() - 0.005).abs() < 1e-6);
    }
}
