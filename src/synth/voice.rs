//! One polyphonic note: an ADSR envelope generator driving a grain engine.

use std::sync::Arc;

use crate::{
    sample::SampleSource,
    synth::engine::{GrainEngine, GrainEngineParameters, GrainInfo, PlaybackRegion},
    tape::TapeWearEngine,
    utils::speed_from_note,
};

// -------------------------------------------------------------------------------------------------

/// Current envelope processing stage of a [`Voice`].
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum EnvelopeStage {
    /// Before attack and after release (silent).
    #[default]
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

// -------------------------------------------------------------------------------------------------

/// A single polyphonic voice: couples one ADSR envelope to one exclusively
/// owned [`GrainEngine`].
///
/// Voices live in a fixed pool and are reset on note completion, never
/// reallocated per note. The envelope advances sample by sample so stage
/// transitions are sample-accurate, while the resulting gain is applied
/// per block.
pub struct Voice {
    engine: GrainEngine,

    active: bool,
    note: Option<u8>,
    velocity: f32,
    /// Blocks since note on, for voice stealing.
    age: u64,

    stage: EnvelopeStage,
    envelope_value: f32,
    attack_rate: f32,
    decay_rate: f32,
    sustain_level: f32,
    release_rate: f32,

    sample_rate: f32,
    /// Pitch ratio of the playing note, relative to middle C.
    note_ratio: f32,

    // Pre-allocated scratch buffers for the grain engine output
    temp_left: Vec<f32>,
    temp_right: Vec<f32>,
}

impl Voice {
    pub fn new() -> Self {
        Self::with_engine(GrainEngine::new())
    }

    /// Deterministic variant for tests: the grain engine's stochastic
    /// parts are seeded from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_engine(GrainEngine::with_seed(seed))
    }

    fn with_engine(engine: GrainEngine) -> Self {
        Self {
            engine,
            active: false,
            note: None,
            velocity: 1.0,
            age: 0,
            stage: EnvelopeStage::Idle,
            envelope_value: 0.0,
            attack_rate: 0.001,
            decay_rate: 0.001,
            sustain_level: 0.8,
            release_rate: 0.0001,
            sample_rate: 44100.0,
            note_ratio: 1.0,
            temp_left: Vec::new(),
            temp_right: Vec::new(),
        }
    }

    /// Allocate scratch buffers and reset all state. Not real-time safe.
    pub fn prepare(&mut self, sample_rate: u32, max_block_size: usize) {
        self.sample_rate = sample_rate as f32;
        self.engine.prepare(sample_rate);
        self.temp_left.resize(max_block_size, 0.0);
        self.temp_right.resize(max_block_size, 0.0);
        self.reset();
    }

    /// Stop playback and return to the idle state, making the voice
    /// available for reuse.
    pub fn reset(&mut self) {
        self.active = false;
        self.note = None;
        self.stage = EnvelopeStage::Idle;
        self.envelope_value = 0.0;
        self.age = 0;
        self.engine.reset();
    }

    /// Start the voice on a MIDI note, restarting the envelope and the
    /// grain engine.
    pub fn note_on(&mut self, note: u8, velocity: f32) {
        self.note = Some(note);
        self.velocity = velocity;
        self.active = true;
        self.age = 0;
        self.note_ratio = speed_from_note(note);
        self.stage = EnvelopeStage::Attack;
        self.engine.reset();
    }

    /// Move the envelope to release, from any stage.
    pub fn note_off(&mut self) {
        if self.active {
            self.stage = EnvelopeStage::Release;
        }
    }

    /// Derive envelope rates from millisecond times and a 0-100 sustain
    /// percentage. Zero times snap the transition within one sample.
    pub fn set_adsr(
        &mut self,
        attack_ms: f32,
        decay_ms: f32,
        sustain_percent: f32,
        release_ms: f32,
    ) {
        let rate_from_ms = |time_ms: f32, sample_rate: f32| {
            if time_ms > 0.0 {
                1.0 / (time_ms * 0.001 * sample_rate)
            } else {
                1.0
            }
        };
        self.attack_rate = rate_from_ms(attack_ms, self.sample_rate);
        self.decay_rate = rate_from_ms(decay_ms, self.sample_rate);
        self.sustain_level = (sustain_percent / 100.0).clamp(0.0, 1.0);
        self.release_rate = rate_from_ms(release_ms, self.sample_rate);
    }

    /// Replace the grain engine's control values.
    pub fn set_grain_parameters(&mut self, params: GrainEngineParameters) {
        self.engine.set_parameters(params);
    }

    /// Attach or detach the shared wear engine.
    pub fn set_wear_engine(&mut self, wear: Option<Arc<TapeWearEngine>>) {
        self.engine.set_wear_engine(wear);
    }

    /// Set the wear damage depth for newly triggered grains.
    pub fn set_wear_amount(&mut self, amount: f32) {
        self.engine.set_wear_amount(amount);
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn is_releasing(&self) -> bool {
        self.stage == EnvelopeStage::Release
    }

    /// The playing MIDI note. None when idle.
    pub fn current_note(&self) -> Option<u8> {
        self.note
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn envelope_value(&self) -> f32 {
        self.envelope_value
    }

    /// Blocks processed since the last note on.
    pub fn age(&self) -> u64 {
        self.age
    }

    /// Called once per processed block by the voice pool.
    pub fn increment_age(&mut self) {
        self.age += 1;
    }

    /// Advance the voice by one block, mixing its enveloped grain output
    /// into the stereo buffers. Does nothing once the voice is idle.
    pub fn process<S: SampleSource>(&mut self, source: &S, left: &mut [f32], right: &mut [f32]) {
        if !self.active {
            return;
        }
        let frames = left
            .len()
            .min(right.len())
            .min(self.temp_left.len())
            .min(self.temp_right.len());

        self.advance_envelope(frames);

        if self.stage == EnvelopeStage::Idle {
            self.reset();
            return;
        }

        self.temp_left[..frames].fill(0.0);
        self.temp_right[..frames].fill(0.0);
        self.engine.process(
            source,
            &mut self.temp_left[..frames],
            &mut self.temp_right[..frames],
            self.note_ratio,
        );

        let gain = self.envelope_value * self.velocity;
        for (output, temp) in left[..frames].iter_mut().zip(self.temp_left.iter()) {
            *output += temp * gain;
        }
        for (output, temp) in right[..frames].iter_mut().zip(self.temp_right.iter()) {
            *output += temp * gain;
        }
    }

    /// Run the envelope state machine one sample at a time for the block,
    /// so stage transitions land on exact sample positions.
    fn advance_envelope(&mut self, frames: usize) {
        for _ in 0..frames {
            match self.stage {
                EnvelopeStage::Attack => {
                    self.envelope_value += self.attack_rate;
                    if self.envelope_value >= 1.0 {
                        self.envelope_value = 1.0;
                        self.stage = EnvelopeStage::Decay;
                    }
                }
                EnvelopeStage::Decay => {
                    self.envelope_value -= self.decay_rate;
                    if self.envelope_value <= self.sustain_level {
                        self.envelope_value = self.sustain_level;
                        self.stage = EnvelopeStage::Sustain;
                    }
                }
                EnvelopeStage::Sustain => {
                    self.envelope_value = self.sustain_level;
                }
                EnvelopeStage::Release => {
                    self.envelope_value -= self.release_rate;
                    if self.envelope_value <= 0.0 {
                        self.envelope_value = 0.0;
                        self.stage = EnvelopeStage::Idle;
                        return;
                    }
                }
                EnvelopeStage::Idle => return,
            }
        }
    }

    /// Telemetry passthrough: all active grains of this voice.
    pub fn active_grains(&self) -> Vec<GrainInfo> {
        self.engine.active_grains()
    }

    /// Telemetry passthrough: source regions touched by active grains.
    pub fn playback_regions(&self) -> Vec<PlaybackRegion> {
        self.engine.playback_regions()
    }

    pub fn active_grain_count(&self) -> usize {
        self.engine.active_grain_count()
    }
}

impl Default for Voice {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------
