//! Audio source adapter.
//!
//! Microphone, system audio, in-memory files, files on disk and the test
//! tone all feed one [`SpectrumAnalyser`]. Only file based sources and the
//! test tone are routed to output; live capture is analysis only so the
//! speakers never feed back into the microphone.

mod capture;
mod file;
mod tone;

use std::{collections::VecDeque, fmt, path::Path, time::Duration};

use crossbeam_channel::{bounded, Receiver};
use serde::Serialize;

use crate::{
    AudioConfig, FrameSource, FrequencyFrame, Result, SoundVizError, SpectrumAnalyser,
    TimeDomainFrame,
};

pub use capture::{
    default_backend, CaptureBackend, CaptureHandle, CaptureStream, NoCaptureBackend, SampleSender,
};
#[cfg(feature = "capture")]
pub use capture::cpal_backend;
pub use file::{decode_wav, encode_wav, is_wav, DecodedAudio, FileLoader};
pub use tone::ToneSource;

/// Capacity of the channel between a capture callback and the adapter.
const CAPTURE_QUEUE: usize = 64;

/// Kind of input currently feeding the analyser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Microphone,
    SystemAudio,
    AudioFile,
    UploadedFile,
    TestTone,
}

impl SourceKind {
    /// Whether the source is audible. Live capture never is.
    pub fn routes_to_output(self) -> bool {
        matches!(self, Self::AudioFile | Self::UploadedFile | Self::TestTone)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Microphone => "microphone",
            Self::SystemAudio => "system audio",
            Self::AudioFile => "audio file",
            Self::UploadedFile => "uploaded file",
            Self::TestTone => "test tone",
        };
        f.write_str(name)
    }
}

/// Lifecycle of the processing context hosting the sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

/// Playback position of a routed source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackStatus {
    pub kind: SourceKind,
    pub label: String,
    pub position: Duration,
    pub duration: Option<Duration>,
    pub playing: bool,
    pub finished: bool,
}

/// Snapshot used to diagnose an apparently silent source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioDiagnostics {
    pub frequency_sum: u64,
    pub time_domain_sum: u64,
    pub average_frequency: f32,
    pub average_time_domain: f32,
    pub playing: bool,
    pub context: ContextState,
    pub has_source: bool,
}

enum SourceInput {
    File(DecodedAudio),
    Tone(ToneSource),
    Capture {
        stream: Box<dyn CaptureStream>,
        samples: Receiver<Vec<f32>>,
    },
}

struct ActiveSource {
    kind: SourceKind,
    label: String,
    sample_rate: u32,
    playing: bool,
    input: SourceInput,
}

impl ActiveSource {
    fn release(&mut self) {
        if let SourceInput::Capture { stream, .. } = &mut self.input {
            stream.stop();
        }
    }

    fn is_finished(&self) -> bool {
        match &self.input {
            SourceInput::File(audio) => audio.is_finished(),
            SourceInput::Tone(tone) => tone.is_finished(),
            SourceInput::Capture { .. } => false,
        }
    }
}

/// Presents every supported input as one analysis tap.
pub struct AudioSourceAdapter {
    config: AudioConfig,
    context: ContextState,
    analyser: SpectrumAnalyser,
    backend: Box<dyn CaptureBackend>,
    loader: FileLoader,
    source: Option<ActiveSource>,
    volume: f32,
    sensitivity: u8,
    output: VecDeque<f32>,
    pending_frames: f64,
}

impl AudioSourceAdapter {
    /// Creates an adapter using the capture backend compiled into this build.
    pub fn new(config: AudioConfig) -> Self {
        Self::with_backend(config, default_backend())
    }

    pub fn with_backend(config: AudioConfig, backend: Box<dyn CaptureBackend>) -> Self {
        let analyser = SpectrumAnalyser::new(&config);
        let loader = FileLoader::new(&config);
        let volume = config.volume.clamp(0.0, 1.0);
        Self {
            config,
            context: ContextState::Suspended,
            analyser,
            backend,
            loader,
            source: None,
            volume,
            sensitivity: 2,
            output: VecDeque::new(),
            pending_frames: 0.0,
        }
    }

    /// Replaces the loader used by [`AudioSourceAdapter::connect_uploaded_file`].
    pub fn with_loader(mut self, loader: FileLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn context_state(&self) -> ContextState {
        self.context
    }

    pub fn resume(&mut self) -> Result<()> {
        match self.context {
            ContextState::Closed => Err(SoundVizError::ContextClosed),
            ContextState::Running => Ok(()),
            ContextState::Suspended => {
                self.context = ContextState::Running;
                tracing::info!("audio context resumed");
                Ok(())
            }
        }
    }

    pub fn suspend(&mut self) {
        if self.context == ContextState::Running {
            self.context = ContextState::Suspended;
            tracing::info!("audio context suspended");
        }
    }

    /// Releases the current source and closes the context for good.
    pub fn close(&mut self) {
        self.disconnect();
        self.context = ContextState::Closed;
        tracing::info!("audio context closed");
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        self.source.as_ref().map(|source| source.kind)
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_some()
    }

    pub fn connect_microphone(&mut self) -> Result<()> {
        self.connect_capture(SourceKind::Microphone)
    }

    pub fn connect_system_audio(&mut self) -> Result<()> {
        self.connect_capture(SourceKind::SystemAudio)
    }

    /// Connects an in-memory audio file and starts playing it.
    pub fn connect_audio_file(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.prepare()?;
        let audio = decode_wav(name, bytes)?;
        self.attach_file(SourceKind::AudioFile, name.to_string(), audio);
        Ok(())
    }

    /// Loads a file from disk, bounded by the load timeout and retried on
    /// failure, then starts playing it.
    pub fn connect_uploaded_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(SoundVizError::InvalidInput("empty file path"));
        }
        self.prepare()?;
        let audio = self.loader.load(path)?;
        self.attach_file(SourceKind::UploadedFile, path.display().to_string(), audio);
        Ok(())
    }

    pub fn connect_test_tone(&mut self, frequency: f32, duration: Duration) -> Result<()> {
        self.prepare()?;
        let tone = ToneSource::new(frequency, duration, self.config.sample_rate);
        let sample_rate = tone.sample_rate();
        self.attach(ActiveSource {
            kind: SourceKind::TestTone,
            label: format!("{frequency} Hz"),
            sample_rate,
            playing: true,
            input: SourceInput::Tone(tone),
        });
        Ok(())
    }

    /// Stops capture streams and drops file data. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
            tracing::info!(kind = %source.kind, label = %source.label, "audio source disconnected");
        }
        self.output.clear();
        self.pending_frames = 0.0;
    }

    pub fn play(&mut self) -> Result<()> {
        let source = self
            .source
            .as_mut()
            .filter(|source| source.kind.routes_to_output())
            .ok_or(SoundVizError::InvalidInput("no playable source connected"))?;
        if source.is_finished() {
            if let SourceInput::File(audio) = &mut source.input {
                audio.rewind();
            }
        }
        source.playing = true;
        Ok(())
    }

    pub fn pause(&mut self) {
        if let Some(source) = self.source.as_mut() {
            if source.kind.routes_to_output() {
                source.playing = false;
            }
        }
    }

    /// Flips between playing and paused, returning whether it now plays.
    pub fn toggle_playback(&mut self) -> Result<bool> {
        let playing = self
            .source
            .as_ref()
            .map(|source| source.playing)
            .unwrap_or(false);
        if playing {
            self.pause();
            Ok(false)
        } else {
            self.play()?;
            Ok(true)
        }
    }

    pub fn playback_status(&self) -> Option<PlaybackStatus> {
        let source = self.source.as_ref()?;
        let (position, duration) = match &source.input {
            SourceInput::File(audio) => (audio.position(), Some(audio.duration())),
            SourceInput::Tone(tone) => (tone.position(), Some(tone.duration())),
            SourceInput::Capture { .. } => (Duration::ZERO, None),
        };
        Some(PlaybackStatus {
            kind: source.kind,
            label: source.label.clone(),
            position,
            duration,
            playing: source.playing,
            finished: source.is_finished(),
        })
    }

    /// Moves the source forward by `elapsed` wall time and feeds the
    /// analyser. Routed sources also queue volume-scaled output samples.
    pub fn advance(&mut self, elapsed: Duration) {
        if self.context != ContextState::Running {
            return;
        }
        let Some(source) = self.source.as_mut() else {
            return;
        };

        let block = match &mut source.input {
            SourceInput::Capture { samples, .. } => samples.try_iter().flatten().collect(),
            input => {
                self.pending_frames += elapsed.as_secs_f64() * source.sample_rate as f64;
                let count = self.pending_frames.floor() as usize;
                self.pending_frames -= count as f64;
                if !source.playing {
                    // A stopped element still feeds silence, so the spectrum decays.
                    self.analyser.push_samples(&vec![0.0; count]);
                    return;
                }
                match input {
                    SourceInput::File(audio) => audio.read(count).to_vec(),
                    SourceInput::Tone(tone) => tone.read(count),
                    SourceInput::Capture { .. } => Vec::new(),
                }
            }
        };

        if source.kind.routes_to_output() {
            let limit = source.sample_rate as usize;
            self.output
                .extend(block.iter().map(|sample| sample * self.volume));
            let overflow = self.output.len().saturating_sub(limit);
            self.output.drain(..overflow);
        }
        if source.is_finished() && source.playing {
            source.playing = false;
            tracing::info!(label = %source.label, "playback finished");
        }
        self.analyser.push_samples(&block);
    }

    /// Takes the audible samples queued since the last call. Always empty
    /// for live capture sources.
    pub fn take_output(&mut self) -> Vec<f32> {
        self.output.drain(..).collect()
    }

    /// Latest frequency frame, or `None` while nothing is connected.
    pub fn frequency_data(&mut self) -> Option<FrequencyFrame> {
        self.source.as_ref()?;
        match self.analyser.frequency_data() {
            Ok(frame) => Some(frame),
            Err(err) => {
                tracing::warn!(%err, "frequency analysis failed");
                None
            }
        }
    }

    /// Latest waveform frame, or `None` while nothing is connected.
    pub fn time_domain_data(&self) -> Option<TimeDomainFrame> {
        self.source.as_ref()?;
        Some(self.analyser.time_domain_data())
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
    }

    pub fn sensitivity(&self) -> u8 {
        self.sensitivity
    }

    /// Maps the 1–10 sensitivity scale onto the analyser smoothing: higher
    /// sensitivity means less smoothing.
    pub fn set_sensitivity(&mut self, sensitivity: u8) {
        self.sensitivity = sensitivity.clamp(1, 10);
        let smoothing = sensitivity_to_smoothing(self.sensitivity);
        self.analyser.set_smoothing_time_constant(smoothing);
    }

    pub fn smoothing_time_constant(&self) -> f32 {
        self.analyser.smoothing_time_constant()
    }

    pub fn analyser(&self) -> &SpectrumAnalyser {
        &self.analyser
    }

    pub fn check_audio_data(&mut self) -> AudioDiagnostics {
        let frequency = self.frequency_data().unwrap_or_default();
        let time_domain = self.time_domain_data().unwrap_or_default();
        let frequency_sum: u64 = frequency.bins.iter().map(|&v| v as u64).sum();
        let time_domain_sum: u64 = time_domain.samples.iter().map(|&v| v as u64).sum();

        AudioDiagnostics {
            frequency_sum,
            time_domain_sum,
            average_frequency: average(frequency_sum, frequency.len()),
            average_time_domain: average(time_domain_sum, time_domain.len()),
            playing: self.source.as_ref().map(|s| s.playing).unwrap_or(false),
            context: self.context,
            has_source: self.source.is_some(),
        }
    }

    fn connect_capture(&mut self, kind: SourceKind) -> Result<()> {
        self.prepare()?;
        let (sender, receiver) = bounded(CAPTURE_QUEUE);
        let handle = self.backend.open(kind, sender).map_err(|err| {
            tracing::warn!(%err, %kind, "capture failed");
            err
        })?;
        self.attach(ActiveSource {
            kind,
            label: kind.to_string(),
            sample_rate: handle.sample_rate,
            playing: true,
            input: SourceInput::Capture {
                stream: handle.stream,
                samples: receiver,
            },
        });
        Ok(())
    }

    /// Resumes the context and releases the previous source.
    fn prepare(&mut self) -> Result<()> {
        self.resume()?;
        self.disconnect();
        Ok(())
    }

    fn attach_file(&mut self, kind: SourceKind, label: String, audio: DecodedAudio) {
        let sample_rate = audio.sample_rate();
        self.attach(ActiveSource {
            kind,
            label,
            sample_rate,
            playing: true,
            input: SourceInput::File(audio),
        });
    }

    fn attach(&mut self, source: ActiveSource) {
        self.analyser = SpectrumAnalyser::with_fft_size(source.sample_rate, self.config.fft_size)
            .with_smoothing(self.analyser.smoothing_time_constant())
            .with_decibel_range(self.config.min_decibels, self.config.max_decibels);
        tracing::info!(
            kind = %source.kind,
            label = %source.label,
            sample_rate = source.sample_rate,
            audible = source.kind.routes_to_output(),
            "audio source connected"
        );
        self.source = Some(source);
    }
}

impl FrameSource for AudioSourceAdapter {
    fn frequency_frame(&mut self) -> Option<FrequencyFrame> {
        self.frequency_data()
    }
}

impl fmt::Debug for AudioSourceAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSourceAdapter")
            .field("context", &self.context)
            .field("source", &self.source_kind())
            .field("volume", &self.volume)
            .field("sensitivity", &self.sensitivity)
            .field("analyser", &self.analyser)
            .finish()
    }
}

/// `1 - s/10`, kept within `[0.1, 0.9]`.
pub fn sensitivity_to_smoothing(sensitivity: u8) -> f32 {
    (1.0 - sensitivity as f32 / 10.0).clamp(0.1, 0.9)
}

fn average(sum: u64, len: usize) -> f32 {
    if len == 0 {
        0.0
    } else {
        sum as f32 / len as f32
    }
}
