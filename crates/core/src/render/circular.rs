use std::{f32::consts::TAU, time::Duration};

use crate::{BeatEvent, VisualiserConfig};

use super::{
    bar_value, ColorCycle, Decay, DrawCommand, DrawList, Easing, FrameInput, Glow, GradientStop,
    Hsla, Paint, Point, Renderer, VisualiserKind,
};

const NUM_BARS: usize = 128;

/// Radial bars around a pulsing core, slowly rotating.
#[derive(Debug, Clone)]
pub struct CircularRenderer {
    active: bool,
    width: f32,
    height: f32,
    center: Point,
    radius: f32,
    max_radius: f32,
    num_bars: usize,
    sensitivity: f32,
    colors: ColorCycle,
    beat: Decay,
    pulse: Decay,
}

impl CircularRenderer {
    pub fn new(config: &VisualiserConfig) -> Self {
        let mut renderer = Self {
            active: false,
            width: 0.0,
            height: 0.0,
            center: Point::new(0.0, 0.0),
            radius: 0.0,
            max_radius: 0.0,
            num_bars: NUM_BARS,
            sensitivity: config.sensitivity,
            colors: ColorCycle::new(0.0, 0.5).with_rotation(0.005),
            beat: Decay::new(Duration::from_millis(600), Easing::QuadOut),
            pulse: Decay::new(Duration::from_millis(800), Easing::CubicOut),
        };
        renderer.resize(config.width, config.height);
        renderer
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn max_radius(&self) -> f32 {
        self.max_radius
    }

    pub fn rotation(&self) -> f32 {
        self.colors.rotation()
    }

    pub fn set_num_bars(&mut self, bars: usize) {
        self.num_bars = bars.clamp(super::spectrum::MIN_BARS, super::spectrum::MAX_BARS);
    }

    fn draw_center(&self, list: &mut DrawList, hue: f32, beat: f32) {
        list.push(DrawCommand::Circle {
            center: self.center,
            radius: self.radius * 0.8,
            paint: Paint::Radial {
                center: self.center,
                radius: self.radius * 0.8,
                stops: vec![
                    GradientStop::new(0.0, Hsla::new(hue, 80.0, 60.0, 0.8)),
                    GradientStop::new(0.7, Hsla::new(hue, 80.0, 40.0, 0.4)),
                    GradientStop::new(1.0, Hsla::new(hue, 80.0, 20.0, 0.0)),
                ],
            },
        });
        list.push(DrawCommand::Circle {
            center: self.center,
            radius: self.radius * 0.3,
            paint: Paint::solid(Hsla::opaque(hue, 60.0, 30.0)),
        });
        if beat > 0.1 {
            list.push(DrawCommand::Circle {
                center: self.center,
                radius: self.radius * 0.3 * (1.0 + beat),
                paint: Paint::solid(Hsla::new(hue, 80.0, 80.0, beat * 0.5)),
            });
        }
    }
}

impl Renderer for CircularRenderer {
    fn kind(&self) -> VisualiserKind {
        VisualiserKind::Circular
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
        self.center = Point::new(self.width / 2.0, self.height / 2.0);
        self.max_radius = self.width.min(self.height) * 0.3;
        self.radius = self.max_radius * 0.3;
    }

    fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity;
    }

    fn on_beat(&mut self, event: &BeatEvent, now: Duration) {
        self.beat.trigger(event.intensity.min(1.0), now);
        self.pulse.trigger(self.max_radius * 0.2, now);
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
        let rotation = self.colors.rotation();
        let beat = self.beat.value(now);
        let pulse = self.pulse.value(now);

        list.push(DrawCommand::FillRect {
            x: 0.0,
            y: 0.0,
            width: self.width,
            height: self.height,
            paint: Paint::Radial {
                center: self.center,
                radius: self.max_radius * 2.0,
                stops: vec![
                    GradientStop::new(0.0, Hsla::new(hue, 30.0, 8.0, 0.1)),
                    GradientStop::new(0.5, Hsla::new(hue + 120.0, 30.0, 5.0, 0.1)),
                    GradientStop::new(1.0, Hsla::new(hue + 240.0, 30.0, 3.0, 0.1)),
                ],
            },
            glow: None,
        });

        if pulse > 0.0 {
            list.push(DrawCommand::Circle {
                center: self.center,
                radius: pulse,
                paint: Paint::Radial {
                    center: self.center,
                    radius: pulse,
                    stops: vec![
                        GradientStop::new(0.0, Hsla::new(hue, 80.0, 60.0, 0.3)),
                        GradientStop::new(1.0, Hsla::new(hue, 80.0, 60.0, 0.0)),
                    ],
                },
            });
        }

        let angle_step = TAU / self.num_bars as f32;
        let step = frequency.len() / self.num_bars;
        for i in 0..self.num_bars {
            let value = bar_value(&frequency.bins, i, step) * self.sensitivity;
            let angle = i as f32 * angle_step + rotation;
            let bar_height = value / 255.0 * self.max_radius * 0.6;
            let (sin, cos) = angle.sin_cos();
            let inner = Point::new(
                self.center.x + cos * self.radius,
                self.center.y + sin * self.radius,
            );
            let outer = Point::new(
                self.center.x + cos * (self.radius + bar_height),
                self.center.y + sin * (self.radius + bar_height),
            );

            let bar_hue = hue + i as f32 * 3.0;
            let saturation = 70.0 + beat * 30.0;
            let lightness = 50.0 + value / 255.0 * 30.0 + beat * 20.0;
            let color = Hsla::opaque(bar_hue, saturation, lightness);

            list.push(DrawCommand::Line {
                from: inner,
                to: outer,
                width: 3.0 + value / 255.0 * 3.0,
                color,
                glow: (beat > 0.1).then_some(Glow {
                    color,
                    blur: 15.0 * beat,
                }),
            });
            list.push(DrawCommand::Circle {
                center: outer,
                radius: 2.0 + value / 255.0 * 2.0,
                paint: Paint::solid(Hsla::opaque(
                    bar_hue + 30.0,
                    saturation + 20.0,
                    lightness + 10.0,
                )),
            });
        }

        self.draw_center(&mut list, hue, beat);
        self.colors.advance();
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BeatBand, FrequencyFrame};

    fn renderer() -> CircularRenderer {
        let mut renderer = CircularRenderer::new(&VisualiserConfig {
            width: 1000.0,
            height: 600.0,
            ..VisualiserConfig::default()
        });
        renderer.start();
        renderer
    }

    // Without a pulse the background is followed directly by the first bar.
    fn pulse_radius(list: &DrawList) -> Option<f32> {
        match list.commands().get(1) {
            Some(DrawCommand::Circle { radius, .. }) => Some(*radius),
            _ => None,
        }
    }

    #[test]
    fn geometry_follows_canvas() {
        let renderer = renderer();
        assert!((renderer.max_radius() - 180.0).abs() < 1e-4);
        assert!((renderer.radius() - 54.0).abs() < 1e-4);
    }

    #[test]
    fn rotation_advances_each_frame() {
        let mut renderer = renderer();
        let frame = FrequencyFrame::filled(1024, 50);
        for _ in 0..10 {
            renderer.on_frame(&FrameInput::new(Some(&frame), None), Duration::ZERO);
        }
        assert!((renderer.rotation() - 0.05).abs() < 1e-5);
    }

    #[test]
    fn beat_pulse_decays() {
        let mut renderer = renderer();
        let frame = FrequencyFrame::filled(1024, 50);
        let input = FrameInput::new(Some(&frame), None);
        renderer.on_beat(
            &BeatEvent {
                energy: 1.0,
                band: BeatBand::Overall,
                timestamp: Duration::ZERO,
                intensity: 0.9,
            },
            Duration::ZERO,
        );

        let first = pulse_radius(&renderer.on_frame(&input, Duration::ZERO)).unwrap();
        assert!((first - 36.0).abs() < 1e-4);
        let later = pulse_radius(&renderer.on_frame(&input, Duration::from_millis(400))).unwrap();
        assert!(later < first);
        assert!(pulse_radius(&renderer.on_frame(&input, Duration::from_millis(800))).is_none());
    }
}
