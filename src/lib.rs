#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod error;
mod parameters;
mod processor;
mod sample;
mod synth;
mod tape;

// public, flat re-exports
pub use error::Error;

pub use parameters::{LfoTarget, SynthParameters};
pub use processor::{NoteEvent, Synth};
pub use sample::{SampleBuffer, SampleData, SampleSource};

pub use synth::{
    EnvelopeStage, Grain, GrainEngine, GrainEngineParameters, GrainInfo, GrainParameters,
    PlaybackRegion, Voice,
};
pub use tape::{TapeDamageProcessor, TapeDelay, TapeWearEngine};

pub use utils::dsp::lfo::{Lfo, LfoWaveform};

// public mods
pub mod utils;
