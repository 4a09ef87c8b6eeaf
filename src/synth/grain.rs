//! A single grain: an enveloped, pitched read window over the sample store.

use crate::{
    sample::SampleSource,
    tape::{TapeDamageProcessor, TapeWearEngine},
    utils::{db_to_linear, panning_factors},
};

// -------------------------------------------------------------------------------------------------

/// Parameters for one grain, fixed for the grain's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct GrainParameters {
    /// Start offset in the source, in sample frames.
    pub start_position: usize,
    /// Grain duration in sample frames.
    pub duration: usize,
    /// Playback speed (1.0 = original pitch).
    pub pitch_ratio: f32,
    /// Stereo position in \[-1, 1\].
    pub pan: f32,
    /// Grain volume.
    pub amplitude: f32,
    /// Attack portion of the grain envelope (0-1).
    pub attack_ratio: f32,
    /// Release portion of the grain envelope (0-1).
    pub release_ratio: f32,
    /// Source gain in dB, applied per sample read.
    pub gain_db: f32,
}

impl Default for GrainParameters {
    fn default() -> Self {
        Self {
            start_position: 0,
            duration: 4410, // 100ms at 44.1kHz
            pitch_ratio: 1.0,
            pan: 0.0,
            amplitude: 1.0,
            attack_ratio: 0.25,
            release_ratio: 0.25,
            gain_db: 0.0,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Grain envelope over normalized progress: a sine ramp attack, a flat
/// sustain and a cosine ramp release. Zero sized attack or release
/// segments degenerate to the flat sustain value.
fn envelope_value(progress: f32, attack_ratio: f32, release_ratio: f32) -> f32 {
    if attack_ratio > 0.0 && progress < attack_ratio {
        return (progress / attack_ratio * std::f32::consts::FRAC_PI_2).sin();
    }
    let release_start = 1.0 - release_ratio;
    if release_ratio > 0.0 && progress > release_start {
        return ((progress - release_start) / release_ratio * std::f32::consts::FRAC_PI_2).cos();
    }
    1.0
}

// -------------------------------------------------------------------------------------------------

/// A single grain of audio: one slot of a fixed pool, reused without
/// reallocation across its Idle -> active -> Idle lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct Grain {
    params: GrainParameters,
    /// Linear gain derived from `params.gain_db` at start time.
    gain: f32,
    /// Wear damage depth for this grain, copied from the engine at start.
    wear_amount: f32,
    /// Fractional playback offset within the grain, in source frames.
    position: f64,
    samples_processed: usize,
    active: bool,
    /// Lowest and highest source frame visited, for diagnostics.
    min_source_frame: f64,
    max_source_frame: f64,
}

impl Default for Grain {
    fn default() -> Self {
        Self::new()
    }
}

impl Grain {
    /// Wear amounts below this leave the damage chain untouched.
    const WEAR_THRESHOLD: f32 = 0.001;

    /// Create a new inactive grain.
    pub const fn new() -> Self {
        Self {
            params: GrainParameters {
                start_position: 0,
                duration: 4410,
                pitch_ratio: 1.0,
                pan: 0.0,
                amplitude: 1.0,
                attack_ratio: 0.25,
                release_ratio: 0.25,
                gain_db: 0.0,
            },
            gain: 1.0,
            wear_amount: 0.0,
            position: 0.0,
            samples_processed: 0,
            active: false,
            min_source_frame: 0.0,
            max_source_frame: 0.0,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Set the wear damage depth applied to this grain's reads.
    pub fn set_wear_amount(&mut self, amount: f32) {
        self.wear_amount = amount.clamp(0.0, 1.0);
    }

    /// Activate the grain with the given parameters, restarting position
    /// and progress.
    pub fn start(&mut self, params: GrainParameters) {
        self.gain = db_to_linear(params.gain_db);
        self.min_source_frame = params.start_position as f64;
        self.max_source_frame = params.start_position as f64;
        self.params = params;
        self.position = 0.0;
        self.samples_processed = 0;
        self.active = true;
    }

    /// Deactivate immediately, without a fade. The voice envelope covers
    /// audible declicking.
    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Advance the grain by up to `left.len()` samples, mixing its panned
    /// output into the stereo buffers. Returns whether the grain is still
    /// active afterwards.
    pub fn process<S: SampleSource>(
        &mut self,
        source: &S,
        damage: &mut TapeDamageProcessor,
        wear: Option<&TapeWearEngine>,
        left: &mut [f32],
        right: &mut [f32],
    ) -> bool {
        if !self.active || !source.is_loaded() {
            return false;
        }

        let (left_gain, right_gain) = panning_factors(self.params.pan);
        let source_frames = source.frame_count();
        let channel_count = source.channel_count();
        let wear = wear.filter(|w| w.is_enabled() && self.wear_amount > Self::WEAR_THRESHOLD);

        for (left, right) in left.iter_mut().zip(right.iter_mut()) {
            if self.samples_processed >= self.params.duration {
                self.active = false;
                break;
            }

            let source_position = self.params.start_position as f64 + self.position;

            // Average all source channels to mono before panning
            let mut sample = source.interpolated_sample_at(0, source_position);
            if channel_count > 1 {
                for channel in 1..channel_count {
                    sample += source.interpolated_sample_at(channel, source_position);
                }
                sample /= channel_count as f32;
            }

            sample *= self.gain;

            if let Some(wear) = wear {
                let read_frame = source_position.rem_euclid(source_frames as f64) as usize;
                wear.decrement_life(read_frame);
                let damage_level = wear.damage_at(read_frame) * self.wear_amount;
                sample = damage.process_sample(sample, damage_level);
            }

            let progress = self.samples_processed as f32 / self.params.duration as f32;
            sample *= envelope_value(progress, self.params.attack_ratio, self.params.release_ratio);
            sample *= self.params.amplitude;

            *left += sample * left_gain;
            *right += sample * right_gain;

            self.min_source_frame = self.min_source_frame.min(source_position);
            self.max_source_frame = self.max_source_frame.max(source_position);

            self.position += self.params.pitch_ratio as f64;
            self.samples_processed += 1;
        }

        self.active
    }

    pub fn parameters(&self) -> &GrainParameters {
        &self.params
    }

    /// Progress through the grain in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        if self.params.duration == 0 {
            return 0.0;
        }
        (self.samples_processed as f32 / self.params.duration as f32).min(1.0)
    }

    /// Lowest and highest source frame this grain visited since it
    /// started, for diagnostics.
    pub fn playback_region(&self) -> (usize, usize) {
        (
            self.min_source_frame.max(0.0) as usize,
            self.max_source_frame.max(0.0) as usize,
        )
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SampleData;

    fn constant_source(value: f32, frames: usize) -> SampleData {
        SampleData::new(vec![vec![value; frames]], 44100)
    }

    fn process_all(
        grain: &mut Grain,
        source: &SampleData,
        left: &mut [f32],
        right: &mut [f32],
    ) -> bool {
        let mut damage = TapeDamageProcessor::with_seed(1);
        damage.prepare(44100);
        grain.process(source, &mut damage, None, left, right)
    }

    #[test]
    fn envelope_boundaries_are_continuous() {
        // the attack branch reaches 1.0 exactly where the sustain starts
        let attack_end = envelope_value(0.25 - 1e-7, 0.25, 0.25);
        assert!((attack_end - 1.0).abs() < 1e-5);
        assert_eq!(envelope_value(0.25, 0.25, 0.25), 1.0);
        // and the release branch starts at 1.0
        let release_start = envelope_value(0.75 + 1e-7, 0.25, 0.25);
        assert!((release_start - 1.0).abs() < 1e-5);
        assert_eq!(envelope_value(0.75, 0.25, 0.25), 1.0);
    }

    #[test]
    fn zero_ratios_degenerate_to_sustain() {
        for progress in [0.0, 0.1, 0.5, 0.9, 1.0] {
            assert_eq!(envelope_value(progress, 0.0, 0.0), 1.0);
        }
    }

    #[test]
    fn envelope_ramps_are_symmetric() {
        let rising = envelope_value(0.125, 0.25, 0.25);
        let falling = envelope_value(0.875, 0.25, 0.25);
        assert!((rising - falling).abs() < 1e-5);
        assert!(rising > 0.0 && rising < 1.0);
    }

    #[test]
    fn grain_deactivates_exactly_at_duration() {
        let source = constant_source(1.0, 44100);
        let mut grain = Grain::new();
        grain.start(GrainParameters {
            duration: 100,
            ..GrainParameters::default()
        });

        let mut left = vec![0.0; 99];
        let mut right = vec![0.0; 99];
        assert!(process_all(&mut grain, &source, &mut left, &mut right));
        assert!(grain.is_active());

        // one more sample exhausts the duration
        let mut left = vec![0.0; 2];
        let mut right = vec![0.0; 2];
        assert!(!process_all(&mut grain, &source, &mut left, &mut right));
        assert!(!grain.is_active());
        assert!(left[0] != 0.0);
        assert_eq!(left[1], 0.0);
    }

    #[test]
    fn output_is_constant_power_panned() {
        let source = constant_source(1.0, 44100);
        let mut grain = Grain::new();
        grain.start(GrainParameters {
            duration: 1000,
            attack_ratio: 0.0,
            release_ratio: 0.0,
            pan: 0.0,
            ..GrainParameters::default()
        });

        let mut left = vec![0.0; 16];
        let mut right = vec![0.0; 16];
        process_all(&mut grain, &source, &mut left, &mut right);
        for (left, right) in left.iter().zip(right.iter()) {
            assert!((left - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
            assert_eq!(left, right);
        }
    }

    #[test]
    fn gain_is_applied_in_db() {
        let source = constant_source(1.0, 44100);
        let mut grain = Grain::new();
        grain.start(GrainParameters {
            duration: 1000,
            attack_ratio: 0.0,
            release_ratio: 0.0,
            gain_db: -6.0,
            ..GrainParameters::default()
        });

        let mut left = vec![0.0; 4];
        let mut right = vec![0.0; 4];
        process_all(&mut grain, &source, &mut left, &mut right);
        let expected = db_to_linear(-6.0) * std::f32::consts::FRAC_1_SQRT_2;
        assert!((left[0] - expected).abs() < 1e-5);
    }

    #[test]
    fn stereo_sources_are_averaged_to_mono() {
        let source = SampleData::new(vec![vec![1.0; 1000], vec![0.0; 1000]], 44100);
        let mut grain = Grain::new();
        grain.start(GrainParameters {
            duration: 100,
            attack_ratio: 0.0,
            release_ratio: 0.0,
            ..GrainParameters::default()
        });

        let mut left = vec![0.0; 4];
        let mut right = vec![0.0; 4];
        process_all(&mut grain, &source, &mut left, &mut right);
        assert!((left[0] - 0.5 * std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
    }

    #[test]
    fn playback_region_tracks_visited_frames() {
        let source = constant_source(1.0, 44100);
        let mut grain = Grain::new();
        grain.start(GrainParameters {
            start_position: 1000,
            duration: 100,
            pitch_ratio: 2.0,
            ..GrainParameters::default()
        });

        let mut left = vec![0.0; 50];
        let mut right = vec![0.0; 50];
        process_all(&mut grain, &source, &mut left, &mut right);

        let (start, end) = grain.playback_region();
        assert_eq!(start, 1000);
        // 50 samples at pitch 2.0 visit up to frame 1000 + 49 * 2
        assert_eq!(end, 1098);
        assert!((grain.progress() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn unloaded_source_deactivates_processing() {
        let source = SampleData::empty();
        let mut grain = Grain::new();
        grain.start(GrainParameters::default());

        let mut left = vec![0.0; 16];
        let mut right = vec![0.0; 16];
        assert!(!process_all(&mut grain, &source, &mut left, &mut right));
        assert!(left.iter().all(|sample| *sample == 0.0));
    }

    #[test]
    fn wear_reads_decrement_region_life() {
        use std::sync::Arc;

        let source = constant_source(1.0, 51200);
        let wear = Arc::new(TapeWearEngine::new());
        wear.prepare(51200);
        wear.set_enabled(true);
        wear.set_max_life(100.0);

        let mut grain = Grain::new();
        grain.set_wear_amount(1.0);
        grain.start(GrainParameters {
            start_position: 0,
            duration: 50,
            ..GrainParameters::default()
        });

        let mut damage = TapeDamageProcessor::with_seed(1);
        damage.prepare(44100);
        let mut left = vec![0.0; 50];
        let mut right = vec![0.0; 50];
        grain.process(&source, &mut damage, Some(&wear), &mut left, &mut right);

        // one hit per processed sample, all within the first region
        assert_eq!(wear.region_hits(0), 50);
        assert!((wear.region_life(0) - 0.5).abs() < 1e-4);
    }
}
