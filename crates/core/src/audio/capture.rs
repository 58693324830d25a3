use crossbeam_channel::Sender;

use crate::{Result, SoundVizError};

use super::SourceKind;

/// Blocks of mono samples produced by a live capture device.
pub type SampleSender = Sender<Vec<f32>>;

/// A running capture stream. Dropping or stopping it releases the device.
pub trait CaptureStream {
    fn stop(&mut self);
}

/// An opened device stream together with its native sample rate.
pub struct CaptureHandle {
    pub sample_rate: u32,
    pub stream: Box<dyn CaptureStream>,
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// Opens microphone or system-audio capture and pushes sample blocks into
/// the provided sender.
pub trait CaptureBackend {
    fn open(&mut self, kind: SourceKind, sink: SampleSender) -> Result<CaptureHandle>;
}

/// Backend used when no capture support is compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCaptureBackend;

impl CaptureBackend for NoCaptureBackend {
    fn open(&mut self, kind: SourceKind, _sink: SampleSender) -> Result<CaptureHandle> {
        Err(SoundVizError::DeviceNotSupported(format!(
            "{kind} capture is not available in this build"
        )))
    }
}

/// Returns the best capture backend compiled into this build.
pub fn default_backend() -> Box<dyn CaptureBackend> {
    #[cfg(feature = "capture")]
    {
        Box::new(cpal_backend::CpalBackend::new())
    }
    #[cfg(not(feature = "capture"))]
    {
        Box::new(NoCaptureBackend)
    }
}

#[cfg(feature = "capture")]
pub mod cpal_backend {
    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        FromSample, Sample, SizedSample,
    };

    use super::{CaptureBackend, CaptureHandle, CaptureStream, SampleSender};
    use crate::{audio::SourceKind, Result, SoundVizError};

    /// Microphone capture through the platform's default cpal host.
    pub struct CpalBackend {
        host: cpal::Host,
    }

    impl CpalBackend {
        pub fn new() -> Self {
            Self {
                host: cpal::default_host(),
            }
        }
    }

    impl Default for CpalBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    struct CpalStream(Option<cpal::Stream>);

    impl CaptureStream for CpalStream {
        fn stop(&mut self) {
            if let Some(stream) = self.0.take() {
                let _ = stream.pause();
            }
        }
    }

    impl CaptureBackend for CpalBackend {
        fn open(&mut self, kind: SourceKind, sink: SampleSender) -> Result<CaptureHandle> {
            if kind != SourceKind::Microphone {
                return Err(SoundVizError::DeviceNotSupported(format!(
                    "{kind} capture is not supported by the cpal backend"
                )));
            }

            let device = self
                .host
                .default_input_device()
                .ok_or_else(|| SoundVizError::DeviceNotFound("no default input device".into()))?;
            let supported = device.default_input_config().map_err(|err| match err {
                cpal::DefaultStreamConfigError::DeviceNotAvailable => {
                    SoundVizError::DeviceNotFound(err.to_string())
                }
                other => classify(other.to_string()),
            })?;

            let format = supported.sample_format();
            let channels = supported.channels().max(1) as usize;
            let sample_rate = supported.sample_rate().0;
            let config: cpal::StreamConfig = supported.into();

            let stream = match format {
                cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, sink),
                cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, sink),
                cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, sink),
                other => {
                    return Err(SoundVizError::DeviceNotSupported(format!(
                        "input sample format {other:?} is not supported"
                    )))
                }
            }
            .map_err(|err| match err {
                cpal::BuildStreamError::DeviceNotAvailable => {
                    SoundVizError::DeviceNotFound(err.to_string())
                }
                other => classify(other.to_string()),
            })?;
            stream
                .play()
                .map_err(|err| classify(err.to_string()))?;

            tracing::info!(sample_rate, channels, ?format, "microphone stream opened");
            Ok(CaptureHandle {
                sample_rate,
                stream: Box::new(CpalStream(Some(stream))),
            })
        }
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        channels: usize,
        sink: SampleSender,
    ) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let _ = sink.try_send(downmix(data, channels));
            },
            |err| tracing::warn!(%err, "capture stream error"),
            None,
        )
    }

    /// Averages interleaved frames of any cpal sample type into mono `f32`.
    pub(crate) fn downmix<T>(data: &[T], channels: usize) -> Vec<f32>
    where
        T: Sample,
        f32: FromSample<T>,
    {
        data.chunks(channels.max(1))
            .map(|frame| {
                frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32
            })
            .collect()
    }

    fn classify(message: String) -> SoundVizError {
        let lower = message.to_lowercase();
        if lower.contains("permission") || lower.contains("denied") {
            SoundVizError::PermissionDenied(message)
        } else {
            SoundVizError::DeviceNotSupported(message)
        }
    }

}
