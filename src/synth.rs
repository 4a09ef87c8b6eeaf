//! Granular playback: grains, the grain scheduler and polyphonic voices.

mod engine;
mod grain;
mod voice;

pub use engine::{GrainEngine, GrainEngineParameters, GrainInfo, PlaybackRegion};
pub use grain::{Grain, GrainParameters};
pub use voice::{EnvelopeStage, Voice};
