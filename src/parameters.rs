//! Per-block control snapshot and LFO modulation routing.

use crate::utils::dsp::lfo::LfoWaveform;

// -------------------------------------------------------------------------------------------------

/// Voice and grain parameters the LFO can bias.
///
/// Each target has a fixed modulation range applied at full LFO amount;
/// biased values are clamped back into their host ranges before use.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::VariantNames,
)]
pub enum LfoTarget {
    Position,
    GrainSize,
    Density,
    Pitch,
    Spray,
    PanSpread,
    GrainAttack,
    GrainRelease,
    VoiceAttack,
    VoiceDecay,
    VoiceSustain,
    VoiceRelease,
}

impl LfoTarget {
    /// Modulation range applied at 100% LFO amount, in the target's unit.
    pub(crate) fn modulation_range(self) -> f32 {
        match self {
            Self::Position => 0.5,
            Self::GrainSize => 500.0,
            Self::Density => 50.0,
            Self::Pitch => 12.0,
            Self::Spray => 0.5,
            Self::PanSpread => 0.5,
            Self::GrainAttack => 0.25,
            Self::GrainRelease => 0.25,
            Self::VoiceAttack => 500.0,
            Self::VoiceDecay => 500.0,
            Self::VoiceSustain => 25.0,
            Self::VoiceRelease => 1000.0,
        }
    }

    pub(crate) fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

// -------------------------------------------------------------------------------------------------

/// Snapshot of all named float controls, consumed once per audio block.
///
/// The host replaces the whole struct between blocks; no smoothing is
/// applied beyond the tape delay's explicit time ramp and the wear model's
/// cumulative state.
#[derive(Debug, Clone)]
pub struct SynthParameters {
    // Grain engine
    /// Normalized playback position in the sample (0-1).
    pub position: f32,
    /// Grain size in ms (10-2000).
    pub grain_size_ms: f32,
    /// Grains per second (1-200).
    pub density: f32,
    /// Pitch offset in semitones (-48..48).
    pub pitch_semitones: f32,
    /// Grain start jitter (0-1).
    pub spray: f32,
    /// Random pan spread per grain (0-1).
    pub pan_spread: f32,
    /// Grain envelope attack portion (0-1).
    pub grain_attack: f32,
    /// Grain envelope release portion (0-1).
    pub grain_release: f32,
    /// Normalized crop window start (0-1).
    pub crop_start: f32,
    /// Normalized crop window end (0-1).
    pub crop_end: f32,
    /// Source gain in dB.
    pub sample_gain_db: f32,

    // Voice envelope
    /// Voice attack time in ms (0-5000).
    pub voice_attack_ms: f32,
    /// Voice decay time in ms (0-5000).
    pub voice_decay_ms: f32,
    /// Voice sustain level in percent (0-100).
    pub voice_sustain: f32,
    /// Voice release time in ms (0-10000).
    pub voice_release_ms: f32,

    // LFO
    /// LFO rate in Hz.
    pub lfo_rate_hz: f32,
    pub lfo_waveform: LfoWaveform,
    /// LFO modulation depth (0-1).
    pub lfo_amount: f32,

    // Tape delay
    /// Echo delay time in ms (0-2000).
    pub delay_time_ms: f32,
    /// Delay flutter amount (0-1).
    pub delay_flutter: f32,
    /// Tape hiss amount (0-1).
    pub delay_hiss: f32,
    /// Delay feedback amount (0-1).
    pub delay_feedback: f32,

    // Tape wear
    /// Wear damage depth (0-1). Zero disables the wear model.
    pub wear_damage: f32,
    /// Read hits until a wear region is fully worn.
    pub wear_max_life: f32,
}

impl Default for SynthParameters {
    fn default() -> Self {
        Self {
            position: 0.0,
            grain_size_ms: 100.0,
            density: 10.0,
            pitch_semitones: 0.0,
            spray: 0.0,
            pan_spread: 0.5,
            grain_attack: 0.25,
            grain_release: 0.25,
            crop_start: 0.0,
            crop_end: 1.0,
            sample_gain_db: 0.0,

            voice_attack_ms: 10.0,
            voice_decay_ms: 100.0,
            voice_sustain: 80.0,
            voice_release_ms: 500.0,

            lfo_rate_hz: 1.0,
            lfo_waveform: LfoWaveform::Sine,
            lfo_amount: 0.5,

            delay_time_ms: 300.0,
            delay_flutter: 0.0,
            delay_hiss: 0.0,
            delay_feedback: 0.0,

            wear_damage: 0.0,
            wear_max_life: 1000.0,
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn lfo_targets_have_unique_bits() {
        use strum::VariantNames;
        let mut seen = 0u32;
        for name in LfoTarget::VARIANTS {
            let target = LfoTarget::from_str(name).unwrap();
            assert_eq!(seen & target.bit(), 0);
            seen |= target.bit();
        }
        assert_eq!(seen.count_ones() as usize, LfoTarget::VARIANTS.len());
    }

    #[test]
    fn targets_parse_from_names() {
        assert_eq!(LfoTarget::from_str("Position").unwrap(), LfoTarget::Position);
        assert_eq!(LfoTarget::Position.to_string(), "Position");
        assert!(LfoTarget::from_str("NotATarget").is_err());
    }
}
