//! Frame renderers.
//!
//! Renderers do not own a canvas. Each frame they turn the latest analysis
//! frames into a [`DrawList`] that any backend can rasterise, which keeps the
//! visual logic testable without a window.

mod circular;
mod decay;
mod spectrum;
mod waveform;

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{BeatEvent, FrequencyFrame, SoundVizError, TimeDomainFrame, VisualiserConfig};

pub use circular::CircularRenderer;
pub use decay::{ColorCycle, Decay, Easing};
pub use spectrum::SpectrumRenderer;
pub use waveform::WaveformRenderer;

/// Colour in CSS hsla terms: hue in degrees, saturation and lightness in
/// percent, alpha in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hsla {
    pub h: f32,
    pub s: f32,
    pub l: f32,
    pub a: f32,
}

impl Hsla {
    pub fn new(h: f32, s: f32, l: f32, a: f32) -> Self {
        Self {
            h: h.rem_euclid(360.0),
            s: s.clamp(0.0, 100.0),
            l: l.clamp(0.0, 100.0),
            a: a.clamp(0.0, 1.0),
        }
    }

    pub fn opaque(h: f32, s: f32, l: f32) -> Self {
        Self::new(h, s, l, 1.0)
    }
}

impl fmt::Display for Hsla {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hsla({}, {}%, {}%, {})", self.h, self.s, self.l, self.a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    pub offset: f32,
    pub color: Hsla,
}

impl GradientStop {
    pub fn new(offset: f32, color: Hsla) -> Self {
        Self { offset, color }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Paint {
    Solid { color: Hsla },
    Linear { from: Point, to: Point, stops: Vec<GradientStop> },
    Radial { center: Point, radius: f32, stops: Vec<GradientStop> },
}

impl Paint {
    pub fn solid(color: Hsla) -> Self {
        Self::Solid { color }
    }

    pub fn vertical(top: f32, bottom: f32, stops: Vec<GradientStop>) -> Self {
        Self::Linear {
            from: Point::new(0.0, top),
            to: Point::new(0.0, bottom),
            stops,
        }
    }
}

/// Shadow blur around a shape, drawn in the shape's own colour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Glow {
    pub color: Hsla,
    pub blur: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum DrawCommand {
    Clear,
    FillRect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        paint: Paint,
        glow: Option<Glow>,
    },
    Line {
        from: Point,
        to: Point,
        width: f32,
        color: Hsla,
        glow: Option<Glow>,
    },
    Circle {
        center: Point,
        radius: f32,
        paint: Paint,
    },
    Polyline {
        points: Vec<Point>,
        width: f32,
        color: Hsla,
        glow: Option<Glow>,
    },
    /// Closed polygon.
    Fill { points: Vec<Point>, paint: Paint },
}

/// Commands for one frame, in painting order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrawList {
    commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cleared() -> Self {
        Self {
            commands: vec![DrawCommand::Clear],
        }
    }

    pub fn push(&mut self, command: DrawCommand) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn is_clear(&self) -> bool {
        matches!(self.commands.as_slice(), [DrawCommand::Clear])
    }

    pub fn iter(&self) -> impl Iterator<Item = &DrawCommand> {
        self.commands.iter()
    }
}

/// Latest analysis data handed to a renderer each frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameInput<'a> {
    pub frequency: Option<&'a FrequencyFrame>,
    pub time_domain: Option<&'a TimeDomainFrame>,
}

impl<'a> FrameInput<'a> {
    pub fn new(
        frequency: Option<&'a FrequencyFrame>,
        time_domain: Option<&'a TimeDomainFrame>,
    ) -> Self {
        Self {
            frequency,
            time_domain,
        }
    }
}

/// A visual strategy driven once per animation frame.
///
/// An inactive renderer draws nothing. Stopping returns the draw list that
/// wipes its region.
pub trait Renderer {
    fn kind(&self) -> VisualiserKind;
    /// Returns `false` when already active.
    fn start(&mut self) -> bool;
    fn stop(&mut self) -> DrawList;
    fn is_active(&self) -> bool;
    fn resize(&mut self, width: f32, height: f32);
    fn set_sensitivity(&mut self, sensitivity: f32);
    fn on_beat(&mut self, event: &BeatEvent, now: Duration);
    fn on_frame(&mut self, input: &FrameInput<'_>, now: Duration) -> DrawList;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualiserKind {
    Spectrum,
    Circular,
    Waveform,
}

impl VisualiserKind {
    pub const ALL: [VisualiserKind; 3] = [Self::Spectrum, Self::Circular, Self::Waveform];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spectrum => "spectrum",
            Self::Circular => "circular",
            Self::Waveform => "waveform",
        }
    }
}

impl fmt::Display for VisualiserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisualiserKind {
    type Err = SoundVizError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "spectrum" => Ok(Self::Spectrum),
            "circular" => Ok(Self::Circular),
            "waveform" => Ok(Self::Waveform),
            other => Err(SoundVizError::msg(format!(
                "unknown visualiser `{other}` (expected spectrum, circular or waveform)"
            ))),
        }
    }
}

/// Tagged union over the three renderers.
#[derive(Debug, Clone)]
pub enum Visualiser {
    Spectrum(SpectrumRenderer),
    Circular(CircularRenderer),
    Waveform(WaveformRenderer),
}

impl Visualiser {
    pub fn new(kind: VisualiserKind, config: &VisualiserConfig) -> Self {
        match kind {
            VisualiserKind::Spectrum => Self::Spectrum(SpectrumRenderer::new(config)),
            VisualiserKind::Circular => Self::Circular(CircularRenderer::new(config)),
            VisualiserKind::Waveform => Self::Waveform(WaveformRenderer::new(config)),
        }
    }

    fn inner(&self) -> &dyn Renderer {
        match self {
            Self::Spectrum(renderer) => renderer,
            Self::Circular(renderer) => renderer,
            Self::Waveform(renderer) => renderer,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Renderer {
        match self {
            Self::Spectrum(renderer) => renderer,
            Self::Circular(renderer) => renderer,
            Self::Waveform(renderer) => renderer,
        }
    }
}

impl Renderer for Visualiser {
    fn kind(&self) -> VisualiserKind {
        self.inner().kind()
    }

    fn start(&mut self) -> bool {
        self.inner_mut().start()
    }

    fn stop(&mut self) -> DrawList {
        self.inner_mut().stop()
    }

    fn is_active(&self) -> bool {
        self.inner().is_active()
    }

    fn resize(&mut self, width: f32, height: f32) {
        self.inner_mut().resize(width, height)
    }

    fn set_sensitivity(&mut self, sensitivity: f32) {
        self.inner_mut().set_sensitivity(sensitivity)
    }

    fn on_beat(&mut self, event: &BeatEvent, now: Duration) {
        self.inner_mut().on_beat(event, now)
    }

    fn on_frame(&mut self, input: &FrameInput<'_>, now: Duration) -> DrawList {
        self.inner_mut().on_frame(input, now)
    }
}

/// Owns one renderer of each kind and keeps at most one of them active.
#[derive(Debug, Clone)]
pub struct VisualiserHost {
    renderers: Vec<Visualiser>,
    active: Option<VisualiserKind>,
}

impl VisualiserHost {
    pub fn new(config: &VisualiserConfig) -> Self {
        Self {
            renderers: VisualiserKind::ALL
                .iter()
                .map(|&kind| Visualiser::new(kind, config))
                .collect(),
            active: None,
        }
    }

    pub fn active(&self) -> Option<VisualiserKind> {
        self.active
    }

    pub fn renderer(&self, kind: VisualiserKind) -> Option<&Visualiser> {
        self.renderers.iter().find(|renderer| renderer.kind() == kind)
    }

    pub fn renderer_mut(&mut self, kind: VisualiserKind) -> Option<&mut Visualiser> {
        self.renderers
            .iter_mut()
            .find(|renderer| renderer.kind() == kind)
    }

    /// Stops the active renderer and starts `kind`. Returns the clearing
    /// draw list of the renderer that was stopped, empty when none was.
    pub fn switch_to(&mut self, kind: VisualiserKind) -> DrawList {
        if self.active == Some(kind) {
            return DrawList::new();
        }
        let cleared = self.stop();
        if let Some(renderer) = self.renderer_mut(kind) {
            renderer.start();
            self.active = Some(kind);
            tracing::info!(visualiser = %kind, "visualiser started");
        }
        cleared
    }

    pub fn stop(&mut self) -> DrawList {
        let Some(kind) = self.active.take() else {
            return DrawList::new();
        };
        tracing::info!(visualiser = %kind, "visualiser stopped");
        self.renderer_mut(kind)
            .map(|renderer| renderer.stop())
            .unwrap_or_default()
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        for renderer in &mut self.renderers {
            renderer.resize(width, height);
        }
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        for renderer in &mut self.renderers {
            renderer.set_sensitivity(sensitivity);
        }
    }

    pub fn on_beat(&mut self, event: &BeatEvent, now: Duration) {
        if let Some(kind) = self.active {
            if let Some(renderer) = self.renderer_mut(kind) {
                renderer.on_beat(event, now);
            }
        }
    }

    pub fn on_frame(&mut self, input: &FrameInput<'_>, now: Duration) -> DrawList {
        let Some(kind) = self.active else {
            return DrawList::new();
        };
        self.renderer_mut(kind)
            .map(|renderer| renderer.on_frame(input, now))
            .unwrap_or_default()
    }
}

/// Averages `step` bins starting at `index * step`, treating missing bins
/// as silence.
pub(crate) fn bar_value(bins: &[u8], index: usize, step: usize) -> f32 {
    let step = step.max(1);
    let start = index * step;
    let end = (start + step).min(bins.len());
    if start >= end {
        return 0.0;
    }
    let sum: u32 = bins[start..end].iter().map(|&v| v as u32).sum();
    sum as f32 / (end - start) as f32
}
