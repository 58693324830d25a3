use std::{
    io::Cursor,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use crossbeam_channel::{bounded, RecvTimeoutError};

use crate::{AudioConfig, Result, SoundVizError};

/// Fully decoded mono audio with a playback cursor.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    samples: Vec<f32>,
    sample_rate: u32,
    cursor: usize,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate: sample_rate.max(1),
            cursor: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn position(&self) -> Duration {
        Duration::from_secs_f64(self.cursor as f64 / self.sample_rate as f64)
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.samples.len()
    }

    /// Returns up to `count` samples from the cursor and advances it.
    pub fn read(&mut self, count: usize) -> &[f32] {
        let start = self.cursor.min(self.samples.len());
        let end = (start + count).min(self.samples.len());
        self.cursor = end;
        &self.samples[start..end]
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

/// Whether `bytes` start with a RIFF/WAVE header.
pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Decodes WAV bytes into mono `f32` samples, averaging the channels.
pub fn decode_wav(name: &str, bytes: &[u8]) -> Result<DecodedAudio> {
    if !is_wav(bytes) {
        return Err(SoundVizError::InvalidFileType(format!(
            "`{name}` is not a WAV audio file"
        )));
    }

    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_value = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / max_value))
                .collect::<std::result::Result<_, _>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
    };

    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    tracing::debug!(
        name,
        sample_rate = spec.sample_rate,
        channels,
        "decoded wav file"
    );
    Ok(DecodedAudio::new(samples, spec.sample_rate))
}

/// Loads audio files from disk on a worker thread, bounded by a timeout and
/// retried a fixed number of times.
#[derive(Debug, Clone)]
pub struct FileLoader {
    timeout: Duration,
    attempts: u32,
    retry_delay: Duration,
}

impl FileLoader {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.load_timeout_ms),
            attempts: config.load_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Loads and decodes `path`. Timeouts and unsupported file types fail
    /// immediately; read and decode errors are retried.
    pub fn load(&self, path: &Path) -> Result<DecodedAudio> {
        let what = path.display().to_string();
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            match self.load_once(path) {
                Ok(audio) => return Ok(audio),
                Err(err @ SoundVizError::LoadTimeout { .. })
                | Err(err @ SoundVizError::InvalidFileType(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(%err, attempt, max = self.attempts, path = %what, "audio load failed");
                    last_error = Some(err);
                    if attempt < self.attempts && !self.retry_delay.is_zero() {
                        thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        Err(SoundVizError::LoadFailed {
            what,
            attempts: self.attempts,
            reason: last_error
                .map(|err| err.to_string())
                .unwrap_or_else(|| "unknown error".into()),
        })
    }

    fn load_once(&self, path: &Path) -> Result<DecodedAudio> {
        let (sender, receiver) = bounded(1);
        let owned: PathBuf = path.to_path_buf();
        thread::spawn(move || {
            let result = read_and_decode(&owned);
            let _ = sender.send(result);
        });

        match receiver.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(SoundVizError::LoadTimeout {
                what: path.display().to_string(),
                seconds: self.timeout.as_secs_f32(),
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(SoundVizError::msg("audio loader thread exited unexpectedly"))
            }
        }
    }
}

fn read_and_decode(path: &Path) -> Result<DecodedAudio> {
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    decode_wav(&name, &bytes)
}

/// Encodes mono samples as a 16-bit WAV file in memory.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in samples {
            writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_loader() -> FileLoader {
        FileLoader::new(&AudioConfig::default())
            .with_timeout(Duration::from_secs(5))
            .with_retry_delay(Duration::ZERO)
    }

    #[test]
    fn decodes_encoded_samples() {
        let bytes = encode_wav(&[0.0, 0.5, -0.5, 1.0], 8_000).unwrap();
        let mut audio = decode_wav("tone.wav", &bytes).unwrap();

        assert_eq!(audio.sample_rate(), 8_000);
        assert_eq!(audio.len(), 4);
        let first = audio.read(2).to_vec();
        assert!((first[1] - 0.5).abs() < 1e-3);
        assert_eq!(audio.read(10).len(), 2);
        assert!(audio.is_finished());
    }

    #[test]
    fn rejects_non_wav_bytes() {
        let err = decode_wav("song.mp3", b"ID3\x03\x00 not audio").unwrap_err();
        assert!(matches!(err, SoundVizError::InvalidFileType(_)));
    }

    #[test]
    fn missing_file_fails_after_all_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let err = quick_loader()
            .load(&dir.path().join("missing.wav"))
            .unwrap_err();

        match err {
            SoundVizError::LoadFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn loads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        std::fs::write(&path, encode_wav(&[0.25; 441], 44_100).unwrap()).unwrap();

        let audio = quick_loader().load(&path).unwrap();
        assert_eq!(audio.len(), 441);
        assert!((audio.duration().as_secs_f64() - 0.01).abs() < 1e-9);
    }
}
