use std::{collections::VecDeque, f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{AudioConfig, Result, SoundVizError};

/// Fraction of the bins that counts as bass.
const BASS_END: f32 = 0.1;
/// Upper edge of the mid band; everything above is treble.
const MIDS_END: f32 = 0.4;

/// One snapshot of byte magnitudes, one value per FFT bin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyFrame {
    pub bins: Vec<u8>,
}

impl FrequencyFrame {
    pub fn new(bins: Vec<u8>) -> Self {
        Self { bins }
    }

    /// A frame where every bin holds the same magnitude.
    pub fn filled(len: usize, value: u8) -> Self {
        Self {
            bins: vec![value; len],
        }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Root mean square over every bin.
    pub fn rms(&self) -> f32 {
        if self.bins.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .bins
            .iter()
            .map(|&value| {
                let value = value as f32;
                value * value
            })
            .sum();
        (sum / self.bins.len() as f32).sqrt()
    }

    pub fn average(&self) -> f32 {
        mean_of(&self.bins)
    }

    /// Mean magnitude of the lowest tenth of the bins.
    pub fn bass(&self) -> f32 {
        let end = band_edge(self.bins.len(), BASS_END);
        mean_of(&self.bins[..end])
    }

    /// Mean magnitude of the bins between 10% and 40% of the range.
    pub fn mids(&self) -> f32 {
        let start = band_edge(self.bins.len(), BASS_END);
        let end = band_edge(self.bins.len(), MIDS_END);
        mean_of(&self.bins[start..end])
    }

    /// Mean magnitude of the upper 60% of the bins.
    pub fn treble(&self) -> f32 {
        let start = band_edge(self.bins.len(), MIDS_END);
        mean_of(&self.bins[start..])
    }

    /// Average of the bins in `[start, end)`, clipped to the frame.
    pub fn average_range(&self, start: usize, end: usize) -> f32 {
        let end = end.min(self.bins.len());
        if start >= end {
            return 0.0;
        }
        mean_of(&self.bins[start..end])
    }
}

/// One snapshot of the waveform, one byte per sample, 128 meaning silence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeDomainFrame {
    pub samples: Vec<u8>,
}

impl TimeDomainFrame {
    pub fn new(samples: Vec<u8>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample `index` mapped back to `[-1, 1]`.
    pub fn normalized(&self, index: usize) -> f32 {
        self.samples
            .get(index)
            .map(|&value| (value as f32 - 128.0) / 128.0)
            .unwrap_or(0.0)
    }
}

fn band_edge(len: usize, fraction: f32) -> usize {
    ((len as f32 * fraction).floor() as usize).min(len)
}

fn mean_of(values: &[u8]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v as f32).sum::<f32>() / values.len() as f32
}

/// Analysis tap in the style of a Web Audio analyser node: keeps the most
/// recent `fft_size` samples and turns them into byte frames on demand.
pub struct SpectrumAnalyser {
    sample_rate: u32,
    fft_size: usize,
    smoothing_time_constant: f32,
    min_decibels: f32,
    max_decibels: f32,
    buffer: VecDeque<f32>,
    smoothed: Vec<f32>,
    latest: Option<FrequencyFrame>,
    window: Vec<f32>,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl SpectrumAnalyser {
    pub fn new(config: &AudioConfig) -> Self {
        Self::with_fft_size(config.sample_rate, config.fft_size)
            .with_smoothing(config.smoothing_time_constant)
            .with_decibel_range(config.min_decibels, config.max_decibels)
    }

    /// Creates an analyser with the default smoothing and decibel range.
    pub fn with_fft_size(sample_rate: u32, fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        Self {
            sample_rate,
            fft_size,
            smoothing_time_constant: 0.8,
            min_decibels: -90.0,
            max_decibels: -10.0,
            buffer: VecDeque::with_capacity(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            latest: None,
            window: blackman_window(fft_size),
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn with_smoothing(mut self, smoothing: f32) -> Self {
        self.set_smoothing_time_constant(smoothing);
        self
    }

    pub fn with_decibel_range(mut self, min_decibels: f32, max_decibels: f32) -> Self {
        if min_decibels < max_decibels {
            self.min_decibels = min_decibels;
            self.max_decibels = max_decibels;
        }
        self
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn smoothing_time_constant(&self) -> f32 {
        self.smoothing_time_constant
    }

    pub fn set_smoothing_time_constant(&mut self, smoothing: f32) {
        self.smoothing_time_constant = smoothing.clamp(0.0, 1.0);
    }

    /// Centre frequency in Hz of bin `index`.
    pub fn bin_frequency(&self, index: usize) -> f32 {
        index as f32 * self.sample_rate as f32 / self.fft_size as f32
    }

    /// Appends samples, keeping only the newest `fft_size` of them.
    pub fn push_samples(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        self.latest = None;
        let skip = samples.len().saturating_sub(self.fft_size);
        for &sample in &samples[skip..] {
            if self.buffer.len() == self.fft_size {
                self.buffer.pop_front();
            }
            self.buffer.push_back(sample);
        }
    }

    /// Drops buffered samples and the smoothing state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.latest = None;
        self.smoothed.iter_mut().for_each(|value| *value = 0.0);
    }

    /// Latest byte frequency frame. Smoothing advances once per block of
    /// pushed samples; reading again before the next push returns the same
    /// frame.
    pub fn frequency_data(&mut self) -> Result<FrequencyFrame> {
        if let Some(frame) = &self.latest {
            return Ok(frame.clone());
        }
        let size = self.fft_size;
        let padding = size - self.buffer.len();
        let smoothing = self.smoothing_time_constant;
        let (min_db, max_db) = (self.min_decibels, self.max_decibels);

        let mut input = vec![0.0_f32; size];
        for (index, sample) in self.buffer.iter().enumerate() {
            input[padding + index] = *sample * self.window[padding + index];
        }

        let magnitudes: Vec<f32> = {
            let fft = self.prepare_fft(size)?;
            fft.input.copy_from_slice(&input);
            fft.plan
                .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;
            fft.spectrum
                .iter()
                .take(size / 2)
                .map(|bin| bin.norm() / size as f32)
                .collect()
        };

        let scale = 255.0 / (max_db - min_db);
        let mut bins = Vec::with_capacity(size / 2);
        for (smoothed, magnitude) in self.smoothed.iter_mut().zip(magnitudes) {
            *smoothed = smoothing * *smoothed + (1.0 - smoothing) * magnitude;
            let decibels = if *smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                f32::NEG_INFINITY
            };
            let byte = (scale * (decibels - min_db)).floor();
            bins.push(if byte.is_finite() {
                byte.clamp(0.0, 255.0) as u8
            } else {
                0
            });
        }

        let frame = FrequencyFrame { bins };
        self.latest = Some(frame.clone());
        Ok(frame)
    }

    /// Byte waveform, `frequency_bin_count` long: the leading part of the
    /// `fft_size` window, which is left padded with silence until full.
    pub fn time_domain_data(&self) -> TimeDomainFrame {
        let len = self.frequency_bin_count();
        let padding = self.fft_size - self.buffer.len();
        let mut samples = vec![128_u8; padding.min(len)];
        samples.extend(
            self.buffer
                .iter()
                .take(len - samples.len())
                .map(|sample| (128.0 + sample * 128.0).floor().clamp(0.0, 255.0) as u8),
        );
        TimeDomainFrame { samples }
    }

    fn prepare_fft(&mut self, size: usize) -> Result<&mut FftResources> {
        let rebuild = self
            .fft
            .as_ref()
            .map(|fft| fft.size != size)
            .unwrap_or(true);

        if rebuild {
            let plan = self.fft_planner.plan_fft_forward(size);
            let scratch = plan.make_scratch_vec();
            let spectrum = plan.make_output_vec();
            let input = plan.make_input_vec();
            self.fft = Some(FftResources {
                size,
                plan,
                scratch,
                spectrum,
                input,
            });
        }

        self.fft
            .as_mut()
            .ok_or_else(|| SoundVizError::Fft("fft plan unavailable".into()))
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("sample_rate", &self.sample_rate)
            .field("fft_size", &self.fft_size)
            .field("smoothing_time_constant", &self.smoothing_time_constant)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

fn blackman_window(len: usize) -> Vec<f32> {
    let n = len as f32;
    (0..len)
        .map(|index| {
            let x = index as f32 / n;
            0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn silent_input_produces_zero_bins() {
        let mut analyser = SpectrumAnalyser::with_fft_size(44_100, 256);
        analyser.push_samples(&[0.0; 256]);

        let frame = analyser.frequency_data().unwrap();
        assert_eq!(frame.len(), 128);
        assert!(frame.bins.iter().all(|&bin| bin == 0));
        assert!(analyser.time_domain_data().samples.iter().all(|&s| s == 128));
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let mut analyser = SpectrumAnalyser::with_fft_size(1024, 256).with_smoothing(0.0);
        // 64 Hz at 1024 Hz sample rate and 256 points lands exactly on bin 16.
        analyser.push_samples(&sine(64.0, 1024, 256));

        let frame = analyser.frequency_data().unwrap();
        let peak = frame
            .bins
            .iter()
            .enumerate()
            .max_by_key(|(_, &value)| value)
            .map(|(index, _)| index)
            .unwrap();
        assert_eq!(peak, 16);
        assert!((analyser.bin_frequency(peak) - 64.0).abs() < f32::EPSILON);
    }

    #[test]
    fn smoothing_carries_previous_magnitudes() {
        let mut analyser = SpectrumAnalyser::with_fft_size(1024, 256).with_smoothing(0.8);
        analyser.push_samples(&sine(64.0, 1024, 256));
        let loud = analyser.frequency_data().unwrap();

        analyser.push_samples(&[0.0; 256]);
        let decayed = analyser.frequency_data().unwrap();
        assert!(decayed.bins[16] > 0);
        assert!(decayed.bins[16] <= loud.bins[16]);
    }

    #[test]
    fn repeated_reads_return_the_same_frame() {
        let mut analyser = SpectrumAnalyser::with_fft_size(1024, 256).with_smoothing(0.8);
        analyser.push_samples(&sine(64.0, 1024, 256));

        let first = analyser.frequency_data().unwrap();
        assert_eq!(analyser.frequency_data().unwrap(), first);
        assert_eq!(analyser.frequency_data().unwrap(), first);

        analyser.push_samples(&[]);
        assert_eq!(analyser.frequency_data().unwrap(), first);

        // New samples advance the smoothing again.
        analyser.push_samples(&sine(64.0, 1024, 256));
        assert!(analyser.frequency_data().unwrap().bins[16] > first.bins[16]);
    }

    #[test]
    fn keeps_only_newest_samples() {
        let mut analyser = SpectrumAnalyser::with_fft_size(100, 64);
        analyser.push_samples(&[1.0; 100]);
        analyser.push_samples(&[-1.0; 40]);

        // Half a window: 24 of the older samples, then the first new ones.
        let frame = analyser.time_domain_data();
        assert_eq!(frame.len(), analyser.frequency_bin_count());
        assert_eq!(frame.samples[0], 255);
        assert_eq!(frame.samples[23], 255);
        assert_eq!(frame.samples[24], 0);
        assert_eq!(frame.samples[31], 0);
    }

    #[test]
    fn waveform_is_padded_until_the_window_fills() {
        let mut analyser = SpectrumAnalyser::with_fft_size(100, 64);
        analyser.push_samples(&[1.0; 40]);

        let frame = analyser.time_domain_data();
        assert_eq!(frame.len(), 32);
        assert_eq!(frame.samples[23], 128);
        assert_eq!(frame.samples[24], 255);
    }

    #[test]
    fn band_averages_follow_bin_ranges() {
        let mut bins = vec![0_u8; 100];
        bins[..10].iter_mut().for_each(|b| *b = 200);
        bins[10..40].iter_mut().for_each(|b| *b = 100);
        bins[40..].iter_mut().for_each(|b| *b = 50);
        let frame = FrequencyFrame::new(bins);

        assert_eq!(frame.bass(), 200.0);
        assert_eq!(frame.mids(), 100.0);
        assert_eq!(frame.treble(), 50.0);
        assert_eq!(FrequencyFrame::filled(16, 10).rms(), 10.0);
        assert_eq!(FrequencyFrame::default().bass(), 0.0);
    }
}
