//! An example which renders a few notes of the granular tape synth
//! offline into a stereo WAV file.

use patina::{LfoTarget, LfoWaveform, Synth, SynthParameters};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

// Render parameters (tweak as needed!)

const OUTPUT_PATH: &str = "render-notes.wav";

const SAMPLE_RATE: u32 = 44100;
const BLOCK_SIZE: usize = 512;
const RENDER_SECONDS: usize = 8;

// Granular parameters
const GRAIN_SIZE_MS: f32 = 120.0;
const GRAIN_DENSITY: f32 = 25.0;
const GRAIN_SPRAY: f32 = 0.15;
const GRAIN_PAN_SPREAD: f32 = 0.4;
const GRAIN_POSITION: f32 = 0.2;

// Tape parameters
const DELAY_TIME_MS: f32 = 420.0;
const DELAY_FEEDBACK: f32 = 0.45;
const DELAY_FLUTTER: f32 = 0.3;
const DELAY_HISS: f32 = 0.1;
const WEAR_DAMAGE: f32 = 0.6;
const WEAR_MAX_LIFE: f32 = 5000.0;

/// Notes to play as (start_block, note, velocity, length_in_blocks).
const NOTES: [(usize, u8, f32, usize); 4] = [
    (0, 48, 0.9, 300),
    (40, 60, 0.8, 260),
    (80, 64, 0.7, 220),
    (120, 67, 0.6, 180),
];

// -------------------------------------------------------------------------------------------------

fn main() {
    simple_logger::init_with_level(log::Level::Info).expect("Failed to initialize logger");

    let mut synth = Synth::new();
    synth.prepare(SAMPLE_RATE, BLOCK_SIZE);

    // Source material: a slowly decaying two partial drone
    let frames = SAMPLE_RATE as usize * 2;
    let sample: Vec<f32> = (0..frames)
        .map(|index| {
            let time = index as f32 / SAMPLE_RATE as f32;
            let tone = (std::f32::consts::TAU * 110.0 * time).sin() * 0.5
                + (std::f32::consts::TAU * 165.5 * time).sin() * 0.3
                + (std::f32::consts::TAU * 331.7 * time).sin() * 0.1;
            tone * (-time * 0.8).exp()
        })
        .collect();
    synth
        .load_sample(vec![sample], SAMPLE_RATE)
        .expect("Failed to load the generated sample");

    synth.set_parameters(SynthParameters {
        grain_size_ms: GRAIN_SIZE_MS,
        density: GRAIN_DENSITY,
        spray: GRAIN_SPRAY,
        pan_spread: GRAIN_PAN_SPREAD,
        position: GRAIN_POSITION,
        voice_attack_ms: 250.0,
        voice_release_ms: 1500.0,
        lfo_rate_hz: 0.2,
        lfo_waveform: LfoWaveform::Sine,
        lfo_amount: 0.6,
        delay_time_ms: DELAY_TIME_MS,
        delay_feedback: DELAY_FEEDBACK,
        delay_flutter: DELAY_FLUTTER,
        delay_hiss: DELAY_HISS,
        wear_damage: WEAR_DAMAGE,
        wear_max_life: WEAR_MAX_LIFE,
        ..SynthParameters::default()
    });
    // sweep the grain position with the LFO
    synth.set_lfo_target(LfoTarget::Position, true);

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer =
        hound::WavWriter::create(OUTPUT_PATH, spec).expect("Failed to create output file");

    let total_blocks = SAMPLE_RATE as usize * RENDER_SECONDS / BLOCK_SIZE;
    let mut left = vec![0.0f32; BLOCK_SIZE];
    let mut right = vec![0.0f32; BLOCK_SIZE];

    for block in 0..total_blocks {
        for (start, note, velocity, length) in NOTES {
            if block == start {
                synth.note_on(note, velocity);
            } else if block == start + length {
                synth.note_off(note);
            }
        }

        left.fill(0.0);
        right.fill(0.0);
        synth.process_block(&mut left, &mut right);

        for (left, right) in left.iter().zip(right.iter()) {
            writer.write_sample(*left).unwrap();
            writer.write_sample(*right).unwrap();
        }
    }

    writer.finalize().expect("Failed to finalize output file");

    let worn_regions = synth
        .wear()
        .life_map()
        .iter()
        .filter(|life| **life < 1.0)
        .count();
    log::info!("Rendered {RENDER_SECONDS}s to {OUTPUT_PATH} ({worn_regions} worn tape regions)");
}
