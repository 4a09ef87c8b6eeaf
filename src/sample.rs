//! Shared sample storage, read continuously by the granular playback
//! engines and replaced wholesale by non-real-time load operations.

use std::sync::{Arc, Mutex};

use assume::assume;

use crate::error::Error;

// -------------------------------------------------------------------------------------------------

/// Read access to decoded multichannel audio with wraparound addressing.
///
/// All reads are safe on an unloaded source and return silence. Positions
/// outside `[0, frame_count)` wrap around, so grain playback can read past
/// either end of the sample without branching.
pub trait SampleSource {
    /// Is any sample data present?
    fn is_loaded(&self) -> bool;
    /// Number of sample frames per channel.
    fn frame_count(&self) -> usize;
    /// Number of audio channels.
    fn channel_count(&self) -> usize;
    /// Sample rate of the stored audio data.
    fn sample_rate(&self) -> u32;
    /// Raw sample read with wraparound addressing.
    fn sample_at(&self, channel: usize, position: isize) -> f32;
    /// Linearly interpolated sample read with wraparound addressing.
    /// For integer positions this returns exactly the raw sample.
    fn interpolated_sample_at(&self, channel: usize, position: f64) -> f32;
}

// -------------------------------------------------------------------------------------------------

/// Immutable, decoded multichannel audio data with planar channel layout.
#[derive(Debug, Default)]
pub struct SampleData {
    channels: Vec<Box<[f32]>>,
    sample_rate: u32,
}

impl SampleData {
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels: channels.into_iter().map(Vec::into_boxed_slice).collect(),
            sample_rate,
        }
    }
}

impl SampleSource for SampleData {
    fn is_loaded(&self) -> bool {
        self.frame_count() > 0
    }

    fn frame_count(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    fn sample_at(&self, channel: usize, position: isize) -> f32 {
        let frames = self.frame_count();
        if frames == 0 || channel >= self.channels.len() {
            return 0.0;
        }
        let index = position.rem_euclid(frames as isize) as usize;
        let data = &self.channels[channel];
        assume!(unsafe: index < data.len());
        data[index]
    }

    #[inline]
    fn interpolated_sample_at(&self, channel: usize, position: f64) -> f32 {
        let frames = self.frame_count();
        if frames == 0 || channel >= self.channels.len() {
            return 0.0;
        }
        let position = position.rem_euclid(frames as f64);
        let index0 = (position as usize).min(frames - 1);
        let index1 = if index0 + 1 < frames { index0 + 1 } else { 0 };
        let fraction = (position - index0 as f64) as f32;

        let data = &self.channels[channel];
        assume!(unsafe: index0 < data.len());
        assume!(unsafe: index1 < data.len());
        let sample0 = data[index0];
        let sample1 = data[index1];

        sample0 + fraction * (sample1 - sample0)
    }
}

// -------------------------------------------------------------------------------------------------

/// Shared sample store: mutated only by non-real-time load operations,
/// read continuously by the audio path.
///
/// Data and metadata travel together in a single `Arc<SampleData>` which is
/// swapped under a lock, so readers can never observe a torn buffer. The
/// audio thread takes one [`SampleBuffer::snapshot`] per block; the lock is
/// held only momentarily and never across a block.
#[derive(Debug)]
pub struct SampleBuffer {
    data: Mutex<Arc<SampleData>>,
}

impl SampleBuffer {
    /// Create a new, unloaded sample buffer.
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Arc::new(SampleData::empty())),
        }
    }

    /// Replace the buffer contents with new decoded audio data.
    ///
    /// `channels` holds one Vec of sample frames per audio channel; all
    /// channels must have the same, non-zero length.
    pub fn load(&self, channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<(), Error> {
        let frame_count = channels.first().map(Vec::len).unwrap_or(0);
        if frame_count == 0 {
            return Err(Error::SampleBufferError(
                "Sample data must contain at least one channel and frame".to_string(),
            ));
        }
        if channels.iter().any(|c| c.len() != frame_count) {
            return Err(Error::SampleBufferError(
                "All sample data channels must have the same length".to_string(),
            ));
        }
        if sample_rate == 0 {
            return Err(Error::SampleBufferError(
                "Sample rate must be non-zero".to_string(),
            ));
        }

        log::info!(
            "Loading sample: {} channel(s), {} frames at {} Hz",
            channels.len(),
            frame_count,
            sample_rate
        );
        let data = Arc::new(SampleData::new(channels, sample_rate));
        *self.data.lock().expect("Sample buffer lock is poisoned") = data;
        Ok(())
    }

    /// Clear the buffer. Readers see an unloaded source from the next
    /// snapshot on.
    pub fn unload(&self) {
        log::info!("Unloading sample");
        *self.data.lock().expect("Sample buffer lock is poisoned") = Arc::new(SampleData::empty());
    }

    /// Is any sample data present?
    pub fn is_loaded(&self) -> bool {
        self.snapshot().is_loaded()
    }

    /// Fetch the current sample data. Holds the swap lock only for the
    /// duration of an `Arc` clone.
    pub fn snapshot(&self) -> Arc<SampleData> {
        self.data
            .lock()
            .expect("Sample buffer lock is poisoned")
            .clone()
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_data() -> SampleData {
        SampleData::new(vec![vec![0.0, 1.0, 2.0, 3.0]], 44100)
    }

    #[test]
    fn interpolated_matches_raw_at_integer_positions() {
        let data = test_data();
        for position in 0..4 {
            assert_eq!(
                data.interpolated_sample_at(0, position as f64),
                data.sample_at(0, position)
            );
        }
    }

    #[test]
    fn interpolation_between_equal_neighbors_is_constant() {
        let data = SampleData::new(vec![vec![0.5, 0.5, 1.0]], 44100);
        for fraction in [0.1, 0.25, 0.5, 0.75, 0.99] {
            assert_eq!(data.interpolated_sample_at(0, fraction), 0.5);
        }
    }

    #[test]
    fn reads_wrap_around() {
        let data = test_data();
        assert_eq!(data.sample_at(0, 4), 0.0);
        assert_eq!(data.sample_at(0, 5), 1.0);
        assert_eq!(data.sample_at(0, -1), 3.0);
        // interpolation between the last and first frame
        let wrapped = data.interpolated_sample_at(0, 3.5);
        assert!((wrapped - 1.5).abs() < 1e-6);
        assert_eq!(data.interpolated_sample_at(0, -1.0), 3.0);
    }

    #[test]
    fn unloaded_source_reads_silence() {
        let data = SampleData::empty();
        assert!(!data.is_loaded());
        assert_eq!(data.sample_at(0, 123), 0.0);
        assert_eq!(data.interpolated_sample_at(0, 123.5), 0.0);
    }

    #[test]
    fn out_of_range_channel_reads_silence() {
        let data = test_data();
        assert_eq!(data.sample_at(2, 0), 0.0);
        assert_eq!(data.interpolated_sample_at(2, 0.0), 0.0);
    }

    #[test]
    fn load_validates_input() {
        let buffer = SampleBuffer::new();
        assert!(buffer.load(vec![], 44100).is_err());
        assert!(buffer.load(vec![vec![]], 44100).is_err());
        assert!(buffer
            .load(vec![vec![0.0; 10], vec![0.0; 11]], 44100)
            .is_err());
        assert!(buffer.load(vec![vec![0.0; 10]], 0).is_err());
        assert!(!buffer.is_loaded());

        assert!(buffer.load(vec![vec![0.0; 10]], 44100).is_ok());
        assert!(buffer.is_loaded());
        assert_eq!(buffer.snapshot().frame_count(), 10);
    }

    #[test]
    fn load_swaps_wholesale() {
        let buffer = SampleBuffer::new();
        buffer.load(vec![vec![1.0; 10]], 44100).unwrap();
        let old_snapshot = buffer.snapshot();

        buffer.load(vec![vec![2.0; 20], vec![2.0; 20]], 48000).unwrap();
        // old snapshots stay valid and unchanged
        assert_eq!(old_snapshot.frame_count(), 10);
        assert_eq!(old_snapshot.sample_at(0, 0), 1.0);

        let new_snapshot = buffer.snapshot();
        assert_eq!(new_snapshot.frame_count(), 20);
        assert_eq!(new_snapshot.channel_count(), 2);
        assert_eq!(new_snapshot.sample_rate(), 48000);

        buffer.unload();
        assert!(!buffer.is_loaded());
    }
}
