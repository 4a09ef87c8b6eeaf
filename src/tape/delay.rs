//! Stereo tape echo with flutter, hiss and a saturated feedback path.

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::utils::dsp::filters::dc::DcFilter;

// -------------------------------------------------------------------------------------------------

/// Stereo circular delay line with a smoothed, flutter modulated delay
/// time, optional hiss and a soft clipped, DC blocked feedback path.
///
/// The delay runs continuously across notes; only a transport reset clears
/// its state.
#[derive(Debug, Clone)]
pub struct TapeDelay {
    sample_rate: f32,
    buffer_left: Vec<f32>,
    buffer_right: Vec<f32>,
    write_pos: usize,

    delay_time_ms: f32,
    feedback: f32,
    flutter_amount: f32,
    hiss_amount: f32,

    smoothed_delay: f32,
    target_delay: f32,

    lfo_phase1: f32,
    lfo_phase2: f32,

    dc_filter_left: DcFilter,
    dc_filter_right: DcFilter,

    rng: SmallRng,
}

impl TapeDelay {
    /// Longest supported delay time.
    const MAX_DELAY_SECONDS: f32 = 2.0;
    /// Extra buffer room for flutter excursion.
    const FLUTTER_HEADROOM: f32 = 0.05;
    /// One-pole ramp coefficient for delay time changes.
    const SMOOTHING_COEFF: f32 = 0.001;
    /// Two incommensurate flutter rates, summed with a 0.6/0.4 weighting.
    const LFO_FREQ1_HZ: f32 = 3.8;
    const LFO_FREQ2_HZ: f32 = 5.7;
    /// Maximum flutter excursion relative to the current delay time.
    const FLUTTER_DEPTH: f32 = 0.04;
    /// Feedback path DC blocker coefficient.
    const DC_COEFFICIENT: f32 = 0.995;

    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_os_rng())
    }

    /// Deterministic variant for tests: hiss noise draws from a generator
    /// seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        Self {
            sample_rate: 0.0,
            buffer_left: Vec::new(),
            buffer_right: Vec::new(),
            write_pos: 0,
            delay_time_ms: 300.0,
            feedback: 0.0,
            flutter_amount: 0.0,
            hiss_amount: 0.0,
            smoothed_delay: 0.0,
            target_delay: 0.0,
            lfo_phase1: 0.0,
            lfo_phase2: 0.0,
            dc_filter_left: DcFilter::new(Self::DC_COEFFICIENT),
            dc_filter_right: DcFilter::new(Self::DC_COEFFICIENT),
            rng,
        }
    }

    /// Allocate the delay buffers for the given sample rate and snap the
    /// delay time ramp to its target. Not real-time safe.
    pub fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate as f32;

        // max delay + flutter headroom + 4 frames for Hermite interpolation
        let buffer_frames = (self.sample_rate
            * Self::MAX_DELAY_SECONDS
            * (1.0 + Self::FLUTTER_HEADROOM)) as usize
            + 4;
        self.buffer_left = vec![0.0; buffer_frames];
        self.buffer_right = vec![0.0; buffer_frames];

        self.target_delay = self.delay_time_ms * 0.001 * self.sample_rate;
        self.smoothed_delay = self.target_delay;
        self.write_pos = 0;
    }

    /// Clear all delay state: buffers, LFO phases, DC blockers and the
    /// delay time ramp.
    pub fn reset(&mut self) {
        self.buffer_left.fill(0.0);
        self.buffer_right.fill(0.0);
        self.write_pos = 0;
        self.lfo_phase1 = 0.0;
        self.lfo_phase2 = 0.0;
        self.dc_filter_left.reset();
        self.dc_filter_right.reset();
        self.smoothed_delay = self.target_delay;
    }

    /// Set a new delay time target in ms. The effective delay ramps toward
    /// it to avoid clicks.
    pub fn set_delay_time(&mut self, delay_ms: f32) {
        self.delay_time_ms = delay_ms.clamp(0.0, Self::MAX_DELAY_SECONDS * 1000.0);
        self.target_delay = self.delay_time_ms * 0.001 * self.sample_rate;
    }

    /// Set the feedback amount (0 = single echo).
    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback.clamp(0.0, 1.0);
    }

    /// Set the flutter amount in range \[0, 1\].
    pub fn set_flutter(&mut self, amount: f32) {
        self.flutter_amount = amount.clamp(0.0, 1.0);
    }

    /// Set the tape hiss amount in range \[0, 1\].
    pub fn set_hiss(&mut self, amount: f32) {
        self.hiss_amount = amount.clamp(0.0, 1.0);
    }

    /// Process a block of stereo audio in place, adding the wet signal.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        if self.buffer_left.is_empty() {
            return;
        }
        let buffer_frames = self.buffer_left.len();
        let lfo_inc1 = Self::LFO_FREQ1_HZ / self.sample_rate;
        let lfo_inc2 = Self::LFO_FREQ2_HZ / self.sample_rate;

        for (left, right) in left.iter_mut().zip(right.iter_mut()) {
            // Ramp the delay time toward its target
            self.smoothed_delay +=
                Self::SMOOTHING_COEFF * (self.target_delay - self.smoothed_delay);

            // Flutter offset from the two sine LFOs
            let lfo1 = (self.lfo_phase1 * std::f32::consts::TAU).sin();
            let lfo2 = (self.lfo_phase2 * std::f32::consts::TAU).sin();
            let flutter_offset = self.flutter_amount
                * Self::FLUTTER_DEPTH
                * self.smoothed_delay
                * (lfo1 * 0.6 + lfo2 * 0.4);

            self.lfo_phase1 += lfo_inc1;
            if self.lfo_phase1 >= 1.0 {
                self.lfo_phase1 -= 1.0;
            }
            self.lfo_phase2 += lfo_inc2;
            if self.lfo_phase2 >= 1.0 {
                self.lfo_phase2 -= 1.0;
            }

            // Interpolated read behind the write cursor
            let mut read_pos = self.write_pos as f32 - self.smoothed_delay - flutter_offset;
            while read_pos < 0.0 {
                read_pos += buffer_frames as f32;
            }
            let mut wet_left = Self::hermite_interpolate(&self.buffer_left, read_pos);
            let mut wet_right = Self::hermite_interpolate(&self.buffer_right, read_pos);

            // Hiss lands on the wet signal only
            if self.hiss_amount > 0.0 {
                wet_left += (self.rng.random::<f32>() * 2.0 - 1.0) * self.hiss_amount * 0.03;
                wet_right += (self.rng.random::<f32>() * 2.0 - 1.0) * self.hiss_amount * 0.03;
            }

            // Feedback path: scale, cubic soft clip, block DC
            let mut feedback_left = wet_left * self.feedback;
            let mut feedback_right = wet_right * self.feedback;

            feedback_left -= feedback_left * feedback_left * feedback_left / 3.0;
            feedback_right -= feedback_right * feedback_right * feedback_right / 3.0;

            feedback_left = self.dc_filter_left.process_sample(feedback_left);
            feedback_right = self.dc_filter_right.process_sample(feedback_right);

            self.buffer_left[self.write_pos] = *left + feedback_left;
            self.buffer_right[self.write_pos] = *right + feedback_right;

            *left += wet_left;
            *right += wet_right;

            self.write_pos += 1;
            if self.write_pos >= buffer_frames {
                self.write_pos = 0;
            }
        }
    }

    /// 4-point, 3rd order Hermite interpolation with wrapping indices.
    /// `position` must already be wrapped into `[0, buffer.len())`.
    fn hermite_interpolate(buffer: &[f32], position: f32) -> f32 {
        let frames = buffer.len() as isize;
        let index = position as isize;
        let fraction = position - index as f32;

        let index_m1 = (index - 1).rem_euclid(frames) as usize;
        let index_0 = index.rem_euclid(frames) as usize;
        let index_1 = ((index + 1) % frames) as usize;
        let index_2 = ((index + 2) % frames) as usize;

        let y0 = buffer[index_m1];
        let y1 = buffer[index_0];
        let y2 = buffer[index_1];
        let y3 = buffer[index_2];

        let c0 = y1;
        let c1 = 0.5 * (y2 - y0);
        let c2 = y0 - 2.5 * y1 + 2.0 * y2 - 0.5 * y3;
        let c3 = 0.5 * (y3 - y0) + 1.5 * (y1 - y2);

        ((c3 * fraction + c2) * fraction + c1) * fraction + c0
    }
}

impl Default for TapeDelay {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------
