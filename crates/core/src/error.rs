/// Result alias that carries the custom [`SoundVizError`] type.
pub type Result<T> = std::result::Result<T, SoundVizError>;

/// Common error type for the core crate.
///
/// Device and loading failures are all recoverable: the caller reports them
/// as a status message and may retry or pick another source.
#[derive(Debug, thiserror::Error)]
pub enum SoundVizError {
    /// The user or the platform refused access to a capture device.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// No device of the requested kind is present.
    #[error("no device found: {0}")]
    DeviceNotFound(String),
    /// The platform or the selected backend cannot provide this source.
    #[error("not supported: {0}")]
    DeviceNotSupported(String),
    /// A file did not become ready within the load timeout.
    #[error("timed out after {seconds:.1}s while loading {what}")]
    LoadTimeout { what: String, seconds: f32 },
    /// A file could not be loaded even after retrying.
    #[error("failed to load {what} after {attempts} attempt(s): {reason}")]
    LoadFailed {
        what: String,
        attempts: u32,
        reason: String,
    },
    /// The provided file is not of a type this component understands.
    #[error("invalid file type: {0}")]
    InvalidFileType(String),
    /// The audio context has been closed and can no longer host sources.
    #[error("audio context is closed")]
    ContextClosed,
    /// Input rejected by a precondition.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Free form message used by the application layer.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed Standard MIDI File.
    #[error("midi: {0}")]
    Midi(#[from] midly::Error),
    /// Malformed or unsupported WAV data.
    #[error("wav: {0}")]
    Wav(#[from] hound::Error),
    /// Malformed JSON configuration or score.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// FFT planning or processing failure.
    #[error("fft: {0}")]
    Fft(String),
}

impl SoundVizError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Whether the failure belongs to the device/load taxonomy that the UI
    /// boundary recovers from by retrying or switching source.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_)
                | Self::DeviceNotFound(_)
                | Self::DeviceNotSupported(_)
                | Self::LoadTimeout { .. }
                | Self::LoadFailed { .. }
                | Self::InvalidFileType(_)
                | Self::ContextClosed
        )
    }
}

impl From<&str> for SoundVizError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SoundVizError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<realfft::FftError> for SoundVizError {
    fn from(value: realfft::FftError) -> Self {
        Self::Fft(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_are_recoverable() {
        assert!(SoundVizError::PermissionDenied("mic".into()).is_recoverable());
        assert!(SoundVizError::ContextClosed.is_recoverable());
        assert!(SoundVizError::LoadFailed {
            what: "song.wav".into(),
            attempts: 3,
            reason: "bad header".into(),
        }
        .is_recoverable());
        assert!(!SoundVizError::msg("boom").is_recoverable());
    }

    #[test]
    fn load_failure_mentions_attempts() {
        let err = SoundVizError::LoadFailed {
            what: "song.wav".into(),
            attempts: 3,
            reason: "bad header".into(),
        };
        let text = err.to_string();
        assert!(text.contains("3 attempt"));
        assert!(text.contains("song.wav"));
    }
}
