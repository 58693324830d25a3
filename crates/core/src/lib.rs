//! Core library for the Soundviz visualiser and piano trainer.
//!
//! Two front-ends share this crate. The visualiser pulls frames from an
//! [`AudioSourceAdapter`], feeds them to a [`BeatDetector`] and turns both
//! into draw lists through one of the renderers in [`render`]. The trainer
//! loads a [`Score`], plays it on a [`Transport`] and scores live MIDI input
//! in a [`TrainerSession`].

pub mod analysis;
pub mod audio;
pub mod beat;
pub mod config;
pub mod error;
pub mod render;
pub mod timeline;
pub mod trainer;

pub use analysis::{FrequencyFrame, SpectrumAnalyser, TimeDomainFrame};
pub use audio::{AudioSourceAdapter, ContextState, SourceKind};
pub use beat::{BeatBand, BeatDetector, BeatEvent, EnergyReading, FrameSource, SubscriptionId};
pub use config::{AppConfig, AudioConfig, BeatConfig, TrainerConfig, VisualiserConfig};
pub use error::{Result, SoundVizError};
pub use render::{DrawCommand, DrawList, FrameInput, Renderer, VisualiserHost, VisualiserKind};
pub use timeline::{FrameLoop, ScheduledEvent, Scheduler, Transport, TransportState};
pub use trainer::{
    Hand, MidiMessage, MidiSink, PianoRoll, PracticeMode, Score, SessionState, TrainerEvent,
    TrainerSession,
};
