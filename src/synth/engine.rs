//! Grain pool scheduling: derives, triggers and advances grains at a
//! density controlled rate.

use std::sync::Arc;

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    error::Error,
    sample::SampleSource,
    synth::grain::{Grain, GrainParameters},
    tape::{TapeDamageProcessor, TapeWearEngine},
};

// -------------------------------------------------------------------------------------------------

/// Control values for a [`GrainEngine`], replaced wholesale each block.
#[derive(Debug, Clone)]
pub struct GrainEngineParameters {
    /// Normalized playback position in the sample (0-1).
    pub position: f32,
    /// Grain size in milliseconds.
    pub grain_size_ms: f32,
    /// Grains triggered per second.
    pub density: f32,
    /// Pitch offset in semitones.
    pub pitch_semitones: f32,
    /// Random start position jitter (0-1).
    pub spray: f32,
    /// Random stereo spread per grain (0-1).
    pub pan_spread: f32,
    /// Grain envelope attack portion (0-1).
    pub attack_ratio: f32,
    /// Grain envelope release portion (0-1).
    pub release_ratio: f32,
    /// Normalized start of the playback window (0-1).
    pub crop_start: f32,
    /// Normalized end of the playback window (0-1).
    pub crop_end: f32,
    /// Source gain in dB.
    pub sample_gain_db: f32,
}

impl Default for GrainEngineParameters {
    fn default() -> Self {
        Self {
            position: 0.0,
            grain_size_ms: 100.0,
            density: 10.0,
            pitch_semitones: 0.0,
            spray: 0.0,
            pan_spread: 0.5,
            attack_ratio: 0.25,
            release_ratio: 0.25,
            crop_start: 0.0,
            crop_end: 1.0,
            sample_gain_db: 0.0,
        }
    }
}

impl GrainEngineParameters {
    /// Validate host supplied parameters. The audio path clamps instead,
    /// so this is only a configuration aid.
    pub fn validate(&self) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&self.position) {
            return Err(Error::ParameterError(
                "Grain position must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.grain_size_ms <= 0.0 {
            return Err(Error::ParameterError(
                "Grain size must be positive".to_string(),
            ));
        }
        if self.density <= 0.0 {
            return Err(Error::ParameterError(
                "Grain density must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.spray) {
            return Err(Error::ParameterError(
                "Grain spray must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.pan_spread) {
            return Err(Error::ParameterError(
                "Grain pan spread must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.attack_ratio) || !(0.0..=1.0).contains(&self.release_ratio)
        {
            return Err(Error::ParameterError(
                "Grain attack and release ratios must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.crop_start)
            || !(0.0..=1.0).contains(&self.crop_end)
            || self.crop_start > self.crop_end
        {
            return Err(Error::ParameterError(
                "Crop region bounds must be an ordered pair within 0.0 to 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Telemetry snapshot of one active grain, for visualization.
#[derive(Debug, Clone, Copy)]
pub struct GrainInfo {
    /// Absolute start position in the sample, in frames.
    pub position: f32,
    /// Progress through the grain (0-1).
    pub progress: f32,
    /// Stereo position in \[-1, 1\].
    pub pan: f32,
    /// Grain duration in frames.
    pub duration: usize,
}

/// Min/max source frames touched by an active grain.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackRegion {
    pub start_frame: usize,
    pub end_frame: usize,
}

// -------------------------------------------------------------------------------------------------

/// Schedules grain triggers at a density derived rate over a fixed pool of
/// [`GrainEngine::MAX_GRAINS`] grains, deriving each grain's parameters
/// from the current control values plus randomization.
///
/// Inactive pool slots are reused; when the pool is exhausted, triggers
/// are silently dropped. Each slot owns a matching [`TapeDamageProcessor`]
/// so concurrent grains keep independent filter state.
pub struct GrainEngine {
    grains: [Grain; Self::MAX_GRAINS],
    damage_processors: [TapeDamageProcessor; Self::MAX_GRAINS],
    params: GrainEngineParameters,
    sample_rate: f64,
    /// Fractional sample counter, accumulated across blocks.
    samples_since_last_grain: f64,
    wear: Option<Arc<TapeWearEngine>>,
    wear_amount: f32,
    rng: SmallRng,
}

impl GrainEngine {
    /// Fixed grain pool size.
    pub const MAX_GRAINS: usize = 128;
    /// Shortest allowed grain duration in frames.
    const MIN_GRAIN_FRAMES: usize = 64;
    /// Densities floor here to keep the trigger interval finite.
    const MIN_DENSITY: f32 = 0.1;

    pub fn new() -> Self {
        Self::with_parts(
            SmallRng::from_os_rng(),
            std::array::from_fn(|_| TapeDamageProcessor::new()),
        )
    }

    /// Deterministic variant for tests: the trigger RNG and every damage
    /// processor are seeded from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_parts(
            SmallRng::seed_from_u64(seed),
            std::array::from_fn(|index| {
                TapeDamageProcessor::with_seed(seed.wrapping_add(index as u64 + 1))
            }),
        )
    }

    fn with_parts(
        rng: SmallRng,
        damage_processors: [TapeDamageProcessor; Self::MAX_GRAINS],
    ) -> Self {
        Self {
            grains: [Grain::new(); Self::MAX_GRAINS],
            damage_processors,
            params: GrainEngineParameters::default(),
            sample_rate: 44100.0,
            samples_since_last_grain: 0.0,
            wear: None,
            wear_amount: 0.0,
            rng,
        }
    }

    pub fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate as f64;
        for processor in &mut self.damage_processors {
            processor.prepare(sample_rate);
        }
        self.reset();
    }

    /// Stop all grains and restart the trigger accumulator.
    pub fn reset(&mut self) {
        for grain in &mut self.grains {
            grain.stop();
        }
        self.samples_since_last_grain = 0.0;
    }

    /// Replace the control values used for upcoming triggers.
    pub fn set_parameters(&mut self, params: GrainEngineParameters) {
        self.params = params;
    }

    pub fn parameters(&self) -> &GrainEngineParameters {
        &self.params
    }

    /// Attach or detach the shared wear engine queried by grain reads.
    pub fn set_wear_engine(&mut self, wear: Option<Arc<TapeWearEngine>>) {
        self.wear = wear;
    }

    /// Set the wear damage depth copied to newly triggered grains.
    pub fn set_wear_amount(&mut self, amount: f32) {
        self.wear_amount = amount.clamp(0.0, 1.0);
    }

    /// Advance the engine by one block, triggering new grains as the
    /// density interval elapses and summing all active grains into the
    /// caller's pre-cleared stereo buffers.
    pub fn process<S: SampleSource>(
        &mut self,
        source: &S,
        left: &mut [f32],
        right: &mut [f32],
        note_ratio: f32,
    ) {
        if !source.is_loaded() {
            return;
        }

        let samples_per_grain =
            self.sample_rate / f64::from(self.params.density.max(Self::MIN_DENSITY));
        for _ in 0..left.len().min(right.len()) {
            self.samples_since_last_grain += 1.0;
            if self.samples_since_last_grain >= samples_per_grain {
                self.trigger_grain(source, note_ratio);
                self.samples_since_last_grain = 0.0;
            }
        }

        let wear = self.wear.as_deref();
        for (grain, damage) in self.grains.iter_mut().zip(self.damage_processors.iter_mut()) {
            if grain.is_active() {
                grain.process(source, damage, wear, left, right);
            }
        }
    }

    /// Derive parameters for a new grain and start it on a free pool slot.
    /// With no free slot the trigger is dropped.
    fn trigger_grain<S: SampleSource>(&mut self, source: &S, note_ratio: f32) {
        let Some(index) = self.grains.iter().position(|grain| !grain.is_active()) else {
            return;
        };
        let source_frames = source.frame_count();
        if source_frames == 0 {
            return;
        }

        let crop_start = self.params.crop_start.clamp(0.0, 1.0);
        let crop_end = self.params.crop_end.clamp(crop_start, 1.0);

        // Start position: spray jitter around the playback position,
        // kept inside the crop window
        let mut position = self.params.position;
        let spray = self.params.spray.clamp(0.0, 1.0);
        if spray > 0.0 {
            position += self.bipolar() * spray;
        }
        let position = position.clamp(crop_start, crop_end);
        let start_position = (position as f64 * (source_frames - 1) as f64) as usize;

        let mut duration = (self.params.grain_size_ms as f64 * 0.001 * self.sample_rate) as usize;
        duration = duration.max(Self::MIN_GRAIN_FRAMES);

        let pitch_ratio = 2.0f32.powf(self.params.pitch_semitones / 12.0) * note_ratio;

        // Shrink the window so reads at this pitch stay inside the crop
        // region
        let crop_end_frame = (crop_end as f64 * (source_frames - 1) as f64) as usize;
        if pitch_ratio > 0.0 {
            let max_read_samples = (crop_end_frame.saturating_sub(start_position) as f64
                / pitch_ratio as f64) as usize;
            duration = duration.min(max_read_samples.max(Self::MIN_GRAIN_FRAMES));
        }

        let pan_spread = self.params.pan_spread.clamp(0.0, 1.0);
        let pan = if pan_spread > 0.0 {
            self.bipolar() * pan_spread
        } else {
            0.0
        };

        let grain = &mut self.grains[index];
        grain.set_wear_amount(self.wear_amount);
        grain.start(GrainParameters {
            start_position,
            duration,
            pitch_ratio,
            pan,
            amplitude: 1.0,
            attack_ratio: self.params.attack_ratio.clamp(0.0, 1.0),
            release_ratio: self.params.release_ratio.clamp(0.0, 1.0),
            gain_db: self.params.sample_gain_db,
        });
    }

    fn bipolar(&mut self) -> f32 {
        self.rng.random::<f32>() * 2.0 - 1.0
    }

    pub fn active_grain_count(&self) -> usize {
        self.grains.iter().filter(|grain| grain.is_active()).count()
    }

    /// Snapshot of all active grains for visualization.
    /// Allocates; do not call from the audio thread.
    pub fn active_grains(&self) -> Vec<GrainInfo> {
        self.grains
            .iter()
            .filter(|grain| grain.is_active())
            .map(|grain| GrainInfo {
                position: grain.parameters().start_position as f32,
                progress: grain.progress(),
                pan: grain.parameters().pan,
                duration: grain.parameters().duration,
            })
            .collect()
    }

    /// Source frame ranges touched by all active grains.
    /// Allocates; do not call from the audio thread.
    pub fn playback_regions(&self) -> Vec<PlaybackRegion> {
        self.grains
            .iter()
            .filter(|grain| grain.is_active())
            .map(|grain| {
                let (start_frame, end_frame) = grain.playback_region();
                PlaybackRegion {
                    start_frame,
                    end_frame,
                }
            })
            .collect()
    }
}

impl Default for GrainEngine {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------
