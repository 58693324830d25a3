//! End-to-end checks for the visualiser: audio file in, beats and draw lists out.

use std::time::Duration;

use soundviz_core::{
    audio::encode_wav, AudioConfig, AudioSourceAdapter, BeatBand, BeatConfig, BeatDetector,
    DrawCommand, FrameInput, FrameLoop, SourceKind, VisualiserConfig, VisualiserHost,
    VisualiserKind,
};

const SAMPLE_RATE: u32 = 44_100;

/// One second of silence followed by one second of a loud 440 Hz tone.
fn silence_then_tone() -> Vec<f32> {
    let silence = std::iter::repeat(0.0).take(SAMPLE_RATE as usize);
    let tone = (0..SAMPLE_RATE).map(|i| {
        (2.0 * std::f32::consts::PI * 440.0 * i as f32 / SAMPLE_RATE as f32).sin() * 0.8
    });
    silence.chain(tone).collect()
}

fn adapter_with(samples: &[f32]) -> AudioSourceAdapter {
    let mut audio = AudioSourceAdapter::new(AudioConfig::default());
    let wav = encode_wav(samples, SAMPLE_RATE).unwrap();
    audio.connect_audio_file("burst.wav", &wav).unwrap();
    audio
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onset_after_silence_is_a_beat() {
        let mut audio = adapter_with(&silence_then_tone());
        assert_eq!(audio.source_kind(), Some(SourceKind::AudioFile));
        let mut detector = BeatDetector::new(&BeatConfig::default());
        detector.start();

        let interval = Duration::from_secs_f64(1.0 / 60.0);
        let mut frames = FrameLoop::new();
        frames.start();
        let mut beats = Vec::new();
        while let Some(now) = frames.tick(interval) {
            audio.advance(interval);
            beats.extend(
                detector
                    .analyze(&mut audio, now)
                    .into_iter()
                    .filter(|event| event.band == BeatBand::Overall),
            );
            if frames.frame() >= 110 {
                frames.stop();
            }
        }

        assert_eq!(beats.len(), 1, "one onset, one beat: {beats:?}");
        let first = beats[0].timestamp.as_secs_f64();
        assert!((0.99..=1.1).contains(&first), "first beat at {first}");
        assert!(beats[0].energy > 0.0);
    }

    #[test]
    fn renderers_draw_the_connected_source() {
        let mut audio = adapter_with(&silence_then_tone()[SAMPLE_RATE as usize..]);
        let mut host = VisualiserHost::new(&VisualiserConfig::default());
        assert!(host.switch_to(VisualiserKind::Spectrum).is_empty());

        let interval = Duration::from_millis(20);
        let mut last = Default::default();
        for frame in 1..=10u32 {
            audio.advance(interval);
            let frequency = audio.frequency_data();
            let time_domain = audio.time_domain_data();
            last = host.on_frame(
                &FrameInput::new(frequency.as_ref(), time_domain.as_ref()),
                interval * frame,
            );
        }
        let bars = last
            .iter()
            .filter(|command| matches!(command, DrawCommand::FillRect { height, .. } if *height > 1.0))
            .count();
        assert!(bars > 1, "a loud tone should raise some bars");

        // Switching clears the previous renderer and starts the new one.
        let cleared = host.switch_to(VisualiserKind::Waveform);
        assert!(cleared.is_clear());
        assert_eq!(host.active(), Some(VisualiserKind::Waveform));

        audio.advance(interval);
        let time_domain = audio.time_domain_data();
        let list = host.on_frame(&FrameInput::new(None, time_domain.as_ref()), interval * 11);
        assert!(list
            .iter()
            .any(|command| matches!(command, DrawCommand::Polyline { .. })));
    }

    #[test]
    fn disconnect_stops_analysis() {
        let mut audio = adapter_with(&silence_then_tone());
        audio.advance(Duration::from_millis(50));
        assert!(audio.frequency_data().is_some());

        audio.disconnect();
        audio.disconnect();
        assert!(!audio.is_connected());
        assert!(audio.frequency_data().is_none());
        assert!(audio.time_domain_data().is_none());
    }
}
