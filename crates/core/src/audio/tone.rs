use std::{f32::consts::PI, time::Duration};

/// Decaying sine used to check that the analysis path produces data.
#[derive(Debug, Clone)]
pub struct ToneSource {
    frequency: f32,
    sample_rate: u32,
    total_samples: usize,
    position: usize,
}

const START_GAIN: f32 = 0.1;
const END_GAIN: f32 = 0.01;

impl ToneSource {
    pub fn new(frequency: f32, duration: Duration, sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1);
        Self {
            frequency,
            sample_rate,
            total_samples: (duration.as_secs_f64() * sample_rate as f64).round() as usize,
            position: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.total_samples
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_samples as f64 / self.sample_rate as f64)
    }

    pub fn position(&self) -> Duration {
        Duration::from_secs_f64(self.position as f64 / self.sample_rate as f64)
    }

    /// Renders up to `count` samples, exponentially ramping the gain down.
    pub fn read(&mut self, count: usize) -> Vec<f32> {
        let end = (self.position + count).min(self.total_samples);
        let total = self.total_samples.max(1) as f32;
        let samples = (self.position..end)
            .map(|index| {
                let progress = index as f32 / total;
                let gain = START_GAIN * (END_GAIN / START_GAIN).powf(progress);
                let phase = 2.0 * PI * self.frequency * index as f32 / self.sample_rate as f32;
                gain * phase.sin()
            })
            .collect();
        self.position = end;
        samples
    }
}
