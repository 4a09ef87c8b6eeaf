//! Oscillators for modulation.

use rand::{rngs::SmallRng, Rng, SeedableRng};

// -------------------------------------------------------------------------------------------------

/// Waveform types for LFO oscillators.
#[derive(
    Debug, Default, Copy, Clone, PartialEq, strum::Display, strum::EnumString, strum::VariantNames,
)]
pub enum LfoWaveform {
    #[default]
    Sine,
    Triangle,
    Square,
    /// A fresh random value every sample.
    Noise,
    /// Sample & hold: a new random value each time the phase wraps.
    SteppedNoise,
}

// -------------------------------------------------------------------------------------------------

/// Simple non bandlimited oscillator which produces a bipolar modulation
/// signal from a phase accumulator in `[0, 1)`.
#[derive(Debug, Clone)]
pub struct Lfo {
    phase: f64,
    last_phase: f64,
    phase_inc: f64,
    waveform: LfoWaveform,
    held_value: f32,
    rng: SmallRng,
}

impl Lfo {
    pub fn new(sample_rate: u32, rate: f32, waveform: LfoWaveform) -> Self {
        Self::with_rng(sample_rate, rate, waveform, SmallRng::from_os_rng())
    }

    /// Deterministic variant for tests: the noise waveforms draw from a
    /// generator seeded with `seed`.
    pub fn with_seed(sample_rate: u32, rate: f32, waveform: LfoWaveform, seed: u64) -> Self {
        Self::with_rng(sample_rate, rate, waveform, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(sample_rate: u32, rate: f32, waveform: LfoWaveform, mut rng: SmallRng) -> Self {
        let held_value = rng.random::<f32>() * 2.0 - 1.0;
        Self {
            phase: 0.0,
            last_phase: 0.0,
            phase_inc: rate as f64 / sample_rate as f64,
            waveform,
            held_value,
            rng,
        }
    }

    /// Set a new rate in Hz with the given sampling rate.
    pub fn set_rate(&mut self, sample_rate: u32, rate: f32) {
        self.phase_inc = rate as f64 / sample_rate as f64;
    }

    /// Set a new waveform.
    pub fn set_waveform(&mut self, waveform: LfoWaveform) {
        self.waveform = waveform;
    }

    /// Reset the phase and redraw the held noise value.
    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.last_phase = 0.0;
        self.held_value = self.bipolar();
    }

    /// The current phase in `[0, 1)`.
    pub fn phase(&self) -> f32 {
        self.phase as f32
    }

    /// Current output value without advancing the phase.
    pub fn value(&self) -> f32 {
        match self.waveform {
            LfoWaveform::Sine | LfoWaveform::Triangle | LfoWaveform::Square => {
                Self::shape(self.waveform, self.phase)
            }
            LfoWaveform::Noise | LfoWaveform::SteppedNoise => self.held_value,
        }
    }

    /// Advance the phase by one sample and return the value in `[-1, 1]`.
    pub fn next(&mut self) -> f32 {
        let value = match self.waveform {
            LfoWaveform::Noise => {
                self.held_value = self.bipolar();
                self.held_value
            }
            LfoWaveform::SteppedNoise => {
                // a wrap moved the phase below the previous sample's phase
                if self.phase < self.last_phase {
                    self.held_value = self.bipolar();
                }
                self.held_value
            }
            waveform => Self::shape(waveform, self.phase),
        };

        self.last_phase = self.phase;
        self.phase += self.phase_inc;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        value
    }

    /// Advance the phase by `frames` samples without generating output.
    /// Cheaply reaches a mid-block sample value.
    pub fn skip(&mut self, frames: usize) {
        if frames == 0 {
            return;
        }
        let advanced = self.phase + self.phase_inc * frames as f64;
        if advanced >= 1.0 && self.waveform == LfoWaveform::SteppedNoise {
            self.held_value = self.bipolar();
        }
        self.phase = advanced.fract();
        self.last_phase = self.phase;
    }

    fn shape(waveform: LfoWaveform, phase: f64) -> f32 {
        match waveform {
            LfoWaveform::Sine => (phase * std::f64::consts::TAU).sin() as f32,
            LfoWaveform::Triangle => {
                // -1 up to 1 at phase 0.25, back down to -1
                if phase < 0.25 {
                    (phase * 4.0) as f32
                } else if phase < 0.75 {
                    (2.0 - phase * 4.0) as f32
                } else {
                    (phase * 4.0 - 4.0) as f32
                }
            }
            LfoWaveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            LfoWaveform::Noise | LfoWaveform::SteppedNoise => 0.0,
        }
    }

    fn bipolar(&mut self) -> f32 {
        self.rng.random::<f32>() * 2.0 - 1.0
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_starts_at_zero() {
        let mut lfo = Lfo::with_seed(100, 1.0, LfoWaveform::Sine, 1);
        let first = lfo.next();
        assert!(first.abs() < 1e-6);
        // quarter cycle later the sine peaks
        lfo.skip(24);
        assert!((lfo.next() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn triangle_shape() {
        let mut lfo = Lfo::with_seed(100, 1.0, LfoWaveform::Triangle, 1);
        assert_eq!(lfo.next(), 0.0);
        lfo.skip(24); // phase 0.25
        assert!((lfo.next() - 1.0).abs() < 1e-6);
        lfo.skip(49); // phase 0.75
        assert!((lfo.next() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn square_splits_at_half_phase() {
        let mut lfo = Lfo::with_seed(100, 1.0, LfoWaveform::Square, 1);
        for _ in 0..50 {
            assert_eq!(lfo.next(), 1.0);
        }
        for _ in 0..50 {
            assert_eq!(lfo.next(), -1.0);
        }
    }

    #[test]
    fn stepped_noise_holds_until_wrap() {
        let mut lfo = Lfo::with_seed(100, 1.0, LfoWaveform::SteppedNoise, 7);
        let held = lfo.next();
        for _ in 0..99 {
            assert_eq!(lfo.next(), held);
        }
        // the next call sees the wrapped phase and redraws
        let redrawn = lfo.next();
        assert_ne!(redrawn, held);
        for _ in 0..99 {
            assert_eq!(lfo.next(), redrawn);
        }
    }

    #[test]
    fn noise_changes_every_sample() {
        let mut lfo = Lfo::with_seed(100, 1.0, LfoWaveform::Noise, 3);
        let first = lfo.next();
        let second = lfo.next();
        assert_ne!(first, second);
        assert!((-1.0..=1.0).contains(&first));
        assert!((-1.0..=1.0).contains(&second));
    }

    #[test]
    fn skip_matches_stepwise_advance() {
        let mut skipped = Lfo::with_seed(1000, 2.5, LfoWaveform::Sine, 1);
        let mut stepped = Lfo::with_seed(1000, 2.5, LfoWaveform::Sine, 1);
        skipped.skip(123);
        for _ in 0..123 {
            stepped.next();
        }
        assert!((skipped.next() - stepped.next()).abs() < 1e-6);
    }
}
