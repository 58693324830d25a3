use std::time::Duration;

use crate::{BeatBand, BeatEvent, VisualiserConfig};

use super::{
    bar_value, ColorCycle, Decay, DrawCommand, DrawList, Easing, FrameInput, Glow, GradientStop,
    Hsla, Paint, Renderer, VisualiserKind,
};

pub const MIN_BARS: usize = 32;
pub const MAX_BARS: usize = 256;
const BAR_SPACING: f32 = 2.0;
const BASS_SHARE: f32 = 0.2;
const COLOR_BOOST: f32 = 50.0;

/// Vertical bars over the frequency spectrum with a faint reflection.
#[derive(Debug, Clone)]
pub struct SpectrumRenderer {
    active: bool,
    width: f32,
    height: f32,
    num_bars: usize,
    bar_width: f32,
    sensitivity: f32,
    colors: ColorCycle,
    beat: Decay,
    bass: Decay,
    color_boost: Decay,
}

impl SpectrumRenderer {
    pub fn new(config: &VisualiserConfig) -> Self {
        let mut renderer = Self {
            active: false,
            width: config.width,
            height: config.height,
            num_bars: config.num_bars.clamp(MIN_BARS, MAX_BARS),
            bar_width: 0.0,
            sensitivity: config.sensitivity,
            colors: ColorCycle::new(0.0, 0.5),
            beat: Decay::new(Duration::from_millis(400), Easing::QuadOut),
            bass: Decay::new(Duration::from_millis(300), Easing::QuadOut),
            color_boost: Decay::new(Duration::from_millis(500), Easing::QuadOut),
        };
        renderer.update_bar_width();
        renderer
    }

    pub fn num_bars(&self) -> usize {
        self.num_bars
    }

    pub fn set_num_bars(&mut self, bars: usize) {
        self.num_bars = bars.clamp(MIN_BARS, MAX_BARS);
        self.update_bar_width();
    }

    pub fn bar_width(&self) -> f32 {
        self.bar_width
    }

    fn update_bar_width(&mut self) {
        let bars = self.num_bars as f32;
        self.bar_width = ((self.width - bars * BAR_SPACING) / bars).max(0.0);
    }
}

impl Renderer for SpectrumRenderer {
    fn kind(&self) -> VisualiserKind {
        VisualiserKind::Spectrum
    }

    fn start(&mut self) -> bool {
        !std::mem::replace(&mut self.active, true)
    }

    fn stop(&mut self) -> DrawList {
        self.active = false;
        DrawList::cleared()
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn resize(&mut self, width: f32, height: f32) {
        self.width = width.max(0.0);
        self.height = height.max(0.0);
        self.update_bar_width();
    }

    fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity;
    }

    fn on_beat(&mut self, event: &BeatEvent, now: Duration) {
        if event.band == BeatBand::Bass {
            self.bass.trigger((event.intensity * 2.0).min(1.0), now);
        }
        self.beat.trigger(event.intensity.min(1.0), now);
        self.color_boost.trigger(COLOR_BOOST, now);
    }

    fn on_frame(&mut self, input: &FrameInput<'_>, now: Duration) -> DrawList {
        let mut list = DrawList::new();
        if !self.active {
            return list;
        }
        let Some(frequency) = input.frequency else {
            return list;
        };

        let hue = self.colors.hue();
        let beat = self.beat.value(now);
        let bass = self.bass.value(now);
        let boost = self.color_boost.value(now);

        list.push(DrawCommand::FillRect {
            x: 0.0,
            y: 0.0,
            width: self.width,
            height: self.height,
            paint: Paint::vertical(
                0.0,
                self.height,
                vec![
                    GradientStop::new(0.0, Hsla::new(hue, 20.0, 5.0, 0.1)),
                    GradientStop::new(1.0, Hsla::new(hue + 180.0, 20.0, 10.0, 0.1)),
                ],
            ),
            glow: None,
        });

        let step = frequency.len() / self.num_bars;
        let bass_bars = self.num_bars as f32 * BASS_SHARE;
        for i in 0..self.num_bars {
            let mut value = bar_value(&frequency.bins, i, step) * self.sensitivity;
            if (i as f32) < bass_bars {
                value *= 1.0 + bass * 0.5;
            }

            let bar_height = (value / 255.0 * self.height * 0.8).max(2.0);
            let x = i as f32 * (self.bar_width + BAR_SPACING);
            let y = self.height - bar_height;

            let bar_hue = hue + i as f32 * 2.0 + boost;
            let saturation = 70.0 + beat * 30.0;
            let lightness = 50.0 + value / 255.0 * 30.0 + beat * 20.0;
            let color = Hsla::opaque(bar_hue, saturation, lightness);

            list.push(DrawCommand::FillRect {
                x,
                y,
                width: self.bar_width,
                height: bar_height,
                paint: Paint::vertical(
                    y,
                    y + bar_height,
                    vec![
                        GradientStop::new(0.0, Hsla::opaque(bar_hue, saturation, lightness + 20.0)),
                        GradientStop::new(0.7, color),
                        GradientStop::new(1.0, Hsla::opaque(bar_hue, saturation, lightness - 20.0)),
                    ],
                ),
                glow: (beat > 0.1).then_some(Glow {
                    color,
                    blur: 20.0 * beat,
                }),
            });

            let reflection = bar_height * 0.3;
            list.push(DrawCommand::FillRect {
                x,
                y: self.height,
                width: self.bar_width,
                height: reflection,
                paint: Paint::vertical(
                    self.height,
                    self.height + reflection,
                    vec![
                        GradientStop::new(0.0, Hsla::new(bar_hue, saturation, lightness - 30.0, 0.3)),
                        GradientStop::new(1.0, Hsla::new(bar_hue, saturation, lightness - 30.0, 0.0)),
                    ],
                ),
                glow: None,
            });
        }

        self.colors.advance();
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrequencyFrame;

    fn renderer() -> SpectrumRenderer {
        let mut renderer = SpectrumRenderer::new(&VisualiserConfig {
            width: 1000.0,
            height: 500.0,
            num_bars: 100,
            ..VisualiserConfig::default()
        });
        renderer.start();
        renderer
    }

    fn bar_heights(list: &DrawList) -> Vec<f32> {
        // First command is the background, then bar/reflection pairs.
        list.iter()
            .skip(1)
            .step_by(2)
            .filter_map(|command| match command {
                DrawCommand::FillRect { height, .. } => Some(*height),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn bar_count_is_clamped() {
        let mut renderer = renderer();
        renderer.set_num_bars(4);
        assert_eq!(renderer.num_bars(), MIN_BARS);
        renderer.set_num_bars(1_000);
        assert_eq!(renderer.num_bars(), MAX_BARS);
    }

    #[test]
    fn bars_scale_with_magnitude() {
        let mut renderer = renderer();
        let silent = FrequencyFrame::filled(1024, 0);
        let loud = FrequencyFrame::filled(1024, 255);

        let heights = bar_heights(&renderer.on_frame(&FrameInput::new(Some(&silent), None), Duration::ZERO));
        assert_eq!(heights.len(), 100);
        assert!(heights.iter().all(|&h| h == 2.0));

        let heights = bar_heights(&renderer.on_frame(&FrameInput::new(Some(&loud), None), Duration::ZERO));
        assert!(heights.iter().all(|&h| (h - 400.0).abs() < 1e-3));
    }

    #[test]
    fn bass_beat_boosts_low_bars_only() {
        let mut renderer = renderer();
        let frame = FrequencyFrame::filled(1024, 100);
        renderer.on_beat(
            &BeatEvent {
                energy: 1.0,
                band: BeatBand::Bass,
                timestamp: Duration::ZERO,
                intensity: 0.5,
            },
            Duration::ZERO,
        );
        let heights = bar_heights(&renderer.on_frame(&FrameInput::new(Some(&frame), None), Duration::ZERO));
        assert!(heights[0] > heights[50]);
        assert!((heights[0] / heights[50] - 1.5).abs() < 1e-3);
        assert_eq!(heights[19], heights[0]);
        assert_eq!(heights[20], heights[50]);
    }

    #[test]
    fn missing_frame_draws_nothing() {
        let mut renderer = renderer();
        assert!(renderer.on_frame(&FrameInput::default(), Duration::ZERO).is_empty());
        assert!(renderer.stop().is_clear());
    }
}
