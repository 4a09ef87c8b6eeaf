//! Per-grain tape damage synthesis.

use rand::{rngs::SmallRng, Rng, SeedableRng};

// -------------------------------------------------------------------------------------------------

/// Stateful filter chain simulating worn tape for a single grain: loss of
/// highs, added noise and saturation, all scaled by a damage level.
///
/// The chain is purely spectral; tape speed wobble (wow/flutter) is not
/// modeled in this stage.
#[derive(Debug, Clone)]
pub struct TapeDamageProcessor {
    filter_state: f32,
    sample_rate: f32,
    rng: SmallRng,
}

impl TapeDamageProcessor {
    /// Lowpass cutoff at maximum damage.
    const MIN_CUTOFF_HZ: f32 = 500.0;
    /// Lowpass cutoff with no damage.
    const MAX_CUTOFF_HZ: f32 = 20_000.0;
    /// Damage levels below this pass through untouched.
    const BYPASS_THRESHOLD: f32 = 0.001;

    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_os_rng())
    }

    /// Deterministic variant for tests: the noise stage draws from a
    /// generator seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        Self {
            filter_state: 0.0,
            sample_rate: 44100.0,
            rng,
        }
    }

    pub fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate as f32;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.filter_state = 0.0;
    }

    /// Run one sample through the damage chain. `damage` is the scaled
    /// wear level in `[0, 1]`.
    #[inline]
    pub fn process_sample(&mut self, input: f32, damage: f32) -> f32 {
        if damage < Self::BYPASS_THRESHOLD {
            return input;
        }

        // High frequency loss: single pole lowpass whose cutoff falls
        // linearly from 20 kHz down to 500 Hz with damage.
        let cutoff = Self::MAX_CUTOFF_HZ - damage * (Self::MAX_CUTOFF_HZ - Self::MIN_CUTOFF_HZ);
        let coefficient = (-std::f32::consts::TAU * cutoff / self.sample_rate).exp();
        self.filter_state = coefficient * self.filter_state + (1.0 - coefficient) * input;
        let filtered = self.filter_state;

        // Tape noise, mixed in proportion to its own level.
        let noise_amount = damage * 0.0005;
        let noise = (self.rng.random::<f32>() * 2.0 - 1.0) * noise_amount;
        let with_noise = filtered * (1.0 - noise_amount) + noise;

        // Saturation: drive rises from 1x (clean) to 5x with damage,
        // compensated by the same factor after the clip.
        let drive = 1.0 + damage * 4.0;
        (with_noise * drive).tanh() / drive
    }
}

impl Default for TapeDamageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negligible_damage_passes_through() {
        let mut processor = TapeDamageProcessor::with_seed(1);
        processor.prepare(44100);
        for input in [0.0, 0.5, -1.0, 0.123] {
            assert_eq!(processor.process_sample(input, 0.0), input);
            assert_eq!(processor.process_sample(input, 0.0009), input);
        }
    }

    #[test]
    fn silence_stays_near_silent_at_full_damage() {
        let mut processor = TapeDamageProcessor::with_seed(1);
        processor.prepare(44100);
        for _ in 0..1000 {
            let output = processor.process_sample(0.0, 1.0);
            // only the tiny noise floor remains
            assert!(output.abs() < 0.001);
        }
    }

    #[test]
    fn damage_attenuates_high_frequencies() {
        let mut processor = TapeDamageProcessor::with_seed(1);
        processor.prepare(44100);
        // alternating +1/-1 is the highest representable frequency
        let mut peak = 0.0f32;
        for index in 0..1000 {
            let input = if index % 2 == 0 { 1.0 } else { -1.0 };
            let output = processor.process_sample(input, 1.0);
            if index > 100 {
                peak = peak.max(output.abs());
            }
        }
        assert!(peak < 0.1, "Nyquist tone should be strongly damped, got {peak}");
    }

    #[test]
    fn saturation_is_bounded() {
        let mut processor = TapeDamageProcessor::with_seed(1);
        processor.prepare(44100);
        for _ in 0..1000 {
            let output = processor.process_sample(10.0, 1.0);
            // tanh caps the drive-compensated output at 1/drive
            assert!(output.abs() <= 0.2 + 1e-6);
        }
    }

    #[test]
    fn seeded_processors_are_deterministic() {
        let mut first = TapeDamageProcessor::with_seed(42);
        let mut second = TapeDamageProcessor::with_seed(42);
        first.prepare(44100);
        second.prepare(44100);
        for index in 0..100 {
            let input = (index as f32 * 0.01).sin();
            assert_eq!(
                first.process_sample(input, 0.5),
                second.process_sample(input, 0.5)
            );
        }
    }
}
