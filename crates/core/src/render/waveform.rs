use std::{collections::VecDeque, time::Duration};

use crate::{BeatEvent, TimeDomainFrame, VisualiserConfig};

use super::{
    ColorCycle, Decay, DrawCommand, DrawList, Easing, FrameInput, Glow, GradientStop, Hsla, Paint,
    Point, Renderer, VisualiserKind,
};

pub const MIN_HISTORY: usize = 1;
pub const MAX_HISTORY: usize = 20;
const OVERLAY_BARS: usize = 64;

/// Oscilloscope trace with fading trails and a faint spectrum overlay.
#[derive(Debug, Clone)]
pub struct WaveformRenderer {
    active: bool,
    width: f32,
    height: f32,
    sensitivity: f32,
    line_width: f32,
    max_history: usize,
    history: VecDeque<TimeDomainFrame>,
    colors: ColorCycle,
    beat: Decay,
    amplitude: Decay,
}

impl WaveformRenderer {
    pub fn new(config: &VisualiserConfig) -> Self {
        Self {
            active: false,
            width: config.width,
            height: config.height,
            sensitivity: config.sensitivity,
            line_width: config.line_width.clamp(1.0, 10.0),
            max_history: config.waveform_history.clamp(MIN_HISTORY, MAX_HISTORY),
            history: VecDeque::new(),
            colors: ColorCycle::new(180.0, 0.5),
            beat: Decay::new(Duration::from_millis(500), Easing::QuadOut),
            amplitude: Decay::new(Duration::from_millis(800), Easing::ElasticOut).with_baseline(1.0),
        }
    }

    pub fn set_line_width(&mut self, width: f32) {
        self.line_width = width.clamp(1.0, 10.0);
    }

    pub fn line_width(&self) -> f32 {
        self.line_width
    }

    pub fn set_max_history(&mut self, frames: usize) {
        self.max_history = frames.clamp(MIN_HISTORY, MAX_HISTORY);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn trace(&self, data: &TimeDomainFrame, amplitude: f32) -> Vec<Point> {
        let slice = self.width / data.len().max(1) as f32;
        let center = self.height / 2.0;
        (0..data.len())
            .map(|i| {
                let y = center + data.normalized(i) * center * 0.8 * self.sensitivity * amplitude;
                Point::new(i as f32 * slice, y)
            })
            .collect()
    }

    fn draw_trace(
        &self,
        list: &mut DrawList,
        data: &TimeDomainFrame,
        alpha: f32,
        beat: f32,
        amplitude: f32,
    ) {
        let hue = self.colors.hue();
        let trace_hue = hue + beat * 60.0;
        let saturation = 70.0 + beat * 30.0;
        let lightness = 50.0 + beat * 30.0;
        let points = self.trace(data, amplitude);

        list.push(DrawCommand::Polyline {
            points: points.clone(),
            width: self.line_width + beat * 3.0,
            color: Hsla::new(trace_hue, saturation, lightness, alpha),
            glow: (beat > 0.1 && alpha > 0.8).then_some(Glow {
                color: Hsla::opaque(trace_hue, saturation, lightness),
                blur: 20.0 * beat,
            }),
        });

        if alpha > 0.8 {
            let mut outline = Vec::with_capacity(points.len() + 2);
            outline.push(Point::new(0.0, self.height));
            outline.extend(points);
            outline.push(Point::new(self.width, self.height));
            list.push(DrawCommand::Fill {
                points: outline,
                paint: Paint::vertical(
                    0.0,
                    self.height,
                    vec![
                        GradientStop::new(0.0, Hsla::new(hue, 70.0, 60.0, 0.1)),
                        GradientStop::new(0.5, Hsla::new(hue, 70.0, 50.0, 0.2)),
                        GradientStop::new(1.0, Hsla::new(hue, 70.0, 40.0, 0.1)),
                    ],
                ),
            });
        }
    }
}

impl Renderer for WaveformRenderer {
    fn kind(&self) -> VisualiserKind {
        VisualiserKind::Waveform
    }

    fn start(&mut self) -> bool {
        !std::mem::replace(&mut self.active, true)
    }

    fn stop(&mut self) -> DrawList {
        self.active = false;
        self.history.clear();
        DrawList::cleared()
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn resize(&mut self, width: f32, height: f32) {
        self.width = width.max(0.0);
        self.height = height.max(0.0);
    }

    fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity;
    }

    fn on_beat(&mut self, event: &BeatEvent, now: Duration) {
        self.beat.trigger(event.intensity.min(1.0), now);
        self.amplitude.trigger(1.0 + event.intensity * 0.5, now);
    }

    fn on_frame(&mut self, input: &FrameInput<'_>, now: Duration) -> DrawList {
        let mut list = DrawList::new();
        if !self.active {
            return list;
        }
        let Some(time_domain) = input.time_domain else {
            return list;
        };

        let beat = self.beat.value(now);
        let amplitude = self.amplitude.value(now);

        list.push(DrawCommand::FillRect {
            x: 0.0,
            y: 0.0,
            width: self.width,
            height: self.height,
            paint: Paint::solid(Hsla::new(0.0, 0.0, 0.0, 0.1)),
            glow: None,
        });

        self.history.push_back(time_domain.clone());
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }

        let trails = self.history.len();
        for (i, frame) in self.history.iter().take(trails - 1).enumerate() {
            let alpha = (i + 1) as f32 / trails as f32 * 0.3;
            self.draw_trace(&mut list, frame, alpha, beat, amplitude);
        }
        self.draw_trace(&mut list, time_domain, 1.0, beat, amplitude);

        if let Some(frequency) = input.frequency {
            let hue = self.colors.hue();
            let bar_width = self.width / OVERLAY_BARS as f32;
            for i in 0..OVERLAY_BARS {
                let value = frequency.bins.get(i * 4).copied().unwrap_or(0) as f32;
                let height = value / 255.0 * self.height * 0.3;
                list.push(DrawCommand::FillRect {
                    x: i as f32 * bar_width,
                    y: self.height - height,
                    width: bar_width * 0.8,
                    height,
                    paint: Paint::solid(Hsla::new(
                        hue + i as f32 * 2.0,
                        60.0,
                        50.0,
                        0.1 + value / 255.0 * 0.2,
                    )),
                    glow: None,
                });
            }
        }

        self.colors.advance();
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BeatBand, FrequencyFrame};

    fn renderer() -> WaveformRenderer {
        let mut renderer = WaveformRenderer::new(&VisualiserConfig {
            width: 512.0,
            height: 400.0,
            ..VisualiserConfig::default()
        });
        renderer.start();
        renderer
    }

    fn polylines(list: &DrawList) -> Vec<&Vec<Point>> {
        list.iter()
            .filter_map(|command| match command {
                DrawCommand::Polyline { points, .. } => Some(points),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn silence_is_a_flat_line() {
        let mut renderer = renderer();
        let frame = TimeDomainFrame::new(vec![128; 256]);
        let list = renderer.on_frame(&FrameInput::new(None, Some(&frame)), Duration::ZERO);
        let traces = polylines(&list);
        assert_eq!(traces.len(), 1);
        assert!(traces[0].iter().all(|p| p.y == 200.0));
        assert_eq!(traces[0][1].x, 2.0);
    }

    #[test]
    fn trails_are_bounded_by_history() {
        let mut renderer = renderer();
        renderer.set_max_history(3);
        let frame = TimeDomainFrame::new(vec![128; 64]);
        let mut list = DrawList::new();
        for _ in 0..10 {
            list = renderer.on_frame(&FrameInput::new(None, Some(&frame)), Duration::ZERO);
        }
        assert_eq!(renderer.history_len(), 3);
        assert_eq!(polylines(&list).len(), 3);

        renderer.set_max_history(100);
        renderer.stop();
        assert_eq!(renderer.history_len(), 0);
    }

    #[test]
    fn beat_swells_amplitude() {
        let mut renderer = renderer();
        let frame = TimeDomainFrame::new(vec![192; 16]);
        let input = FrameInput::new(None, Some(&frame));

        let calm = polylines(&renderer.on_frame(&input, Duration::ZERO))[0][0].y;
        renderer.on_beat(
            &BeatEvent {
                energy: 1.0,
                band: BeatBand::Overall,
                timestamp: Duration::from_secs(1),
                intensity: 1.0,
            },
            Duration::from_secs(1),
        );
        let list = renderer.on_frame(&input, Duration::from_secs(1));
        let swollen = polylines(&list).last().unwrap()[0].y;
        assert!((calm - 280.0).abs() < 1e-3);
        assert!((swollen - 320.0).abs() < 1e-3);

        let list = renderer.on_frame(&input, Duration::from_secs(2));
        assert!((polylines(&list).last().unwrap()[0].y - 280.0).abs() < 1e-3);
    }

    #[test]
    fn overlay_samples_every_fourth_bin() {
        let mut renderer = renderer();
        let wave = TimeDomainFrame::new(vec![128; 32]);
        let spectrum = FrequencyFrame::filled(512, 255);
        let list = renderer.on_frame(&FrameInput::new(Some(&spectrum), Some(&wave)), Duration::ZERO);
        let overlay = list
            .iter()
            .filter(|command| matches!(command, DrawCommand::FillRect { height, .. } if *height > 0.0 && *height < 400.0))
            .count();
        assert_eq!(overlay, OVERLAY_BARS);
    }
}
