//! Tape degradation and echo simulation.

mod damage;
mod delay;
mod wear;

pub use damage::TapeDamageProcessor;
pub use delay::TapeDelay;
pub use wear::TapeWearEngine;
