//! Cumulative playback wear model, shared by all grains.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use crate::utils::AtomicF32;

// -------------------------------------------------------------------------------------------------

/// Wear state of one fixed slice of the loaded sample.
#[derive(Debug)]
struct WearRegion {
    /// Remaining life, 0-1 normalized (1.0 = pristine).
    life: AtomicF32,
    /// Total read hits, for diagnostics.
    hits: AtomicU32,
}

impl WearRegion {
    const fn new() -> Self {
        Self {
            life: AtomicF32::new(1.0),
            hits: AtomicU32::new(0),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Region partitioned model of cumulative playback wear across the loaded
/// sample.
///
/// The sample's frame range is split into [`Self::REGION_COUNT`] contiguous,
/// equal width regions, each holding a life value that every grain read
/// wears down. The engine is shared between the audio thread (which
/// decrements life) and visualizer threads (which read the life map); all
/// state is single-word atomics, so no locking is needed and readers may
/// observe slightly stale values.
#[derive(Debug)]
pub struct TapeWearEngine {
    regions: [WearRegion; Self::REGION_COUNT],
    total_frames: AtomicUsize,
    max_life_hits: AtomicF32,
    enabled: AtomicBool,
}

impl TapeWearEngine {
    pub const REGION_COUNT: usize = 512;

    const MIN_LIFE_HITS: f32 = 25.0;
    const MAX_LIFE_HITS: f32 = 1_000_000.0;

    pub fn new() -> Self {
        Self {
            regions: std::array::from_fn(|_| WearRegion::new()),
            total_frames: AtomicUsize::new(0),
            max_life_hits: AtomicF32::new(1000.0),
            enabled: AtomicBool::new(false),
        }
    }

    /// Repartition the regions over a newly loaded sample of the given
    /// length and restore full life: wear describes the loaded medium.
    pub fn prepare(&self, total_frames: usize) {
        self.total_frames.store(total_frames, Ordering::Relaxed);
        self.reset();
    }

    /// Restore all regions to full life and clear the hit counters.
    pub fn reset(&self) {
        for region in &self.regions {
            region.life.store(1.0);
            region.hits.store(0, Ordering::Relaxed);
        }
    }

    /// Enable or disable wear tracking. When disabled, reads neither wear
    /// down regions nor report damage.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Set how many read hits fully wear out a region.
    pub fn set_max_life(&self, hits: f32) {
        self.max_life_hits
            .store(hits.clamp(Self::MIN_LIFE_HITS, Self::MAX_LIFE_HITS));
    }

    /// Wear down the region owning `frame` by one read hit.
    ///
    /// Plain load/store instead of a CAS loop: the audio thread is the only
    /// writer, and a lost hit under a race would be inaudible.
    #[inline]
    pub fn decrement_life(&self, frame: usize) {
        if !self.is_enabled() {
            return;
        }
        if let Some(region) = self.region_for_frame(frame) {
            let life = region.life.load();
            region
                .life
                .store((life - 1.0 / self.max_life_hits.load()).max(0.0));
            region.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Damage level in `[0, 1]` of the region owning `frame`
    /// (the inverse of its remaining life).
    #[inline]
    pub fn damage_at(&self, frame: usize) -> f32 {
        if !self.is_enabled() {
            return 0.0;
        }
        match self.region_for_frame(frame) {
            Some(region) => 1.0 - region.life.load(),
            None => 0.0,
        }
    }

    /// Copy of the complete per-region life map, for visualization.
    /// Allocates; do not call from the audio thread.
    pub fn life_map(&self) -> Vec<f32> {
        self.regions.iter().map(|region| region.life.load()).collect()
    }

    /// Life of a single region, 1.0 for out of range indices.
    pub fn region_life(&self, region: usize) -> f32 {
        match self.regions.get(region) {
            Some(region) => region.life.load(),
            None => 1.0,
        }
    }

    /// Total read hits recorded for a region, for diagnostics.
    pub fn region_hits(&self, region: usize) -> u32 {
        match self.regions.get(region) {
            Some(region) => region.hits.load(Ordering::Relaxed),
            None => 0,
        }
    }

    /// Restore a single region's life, e.g. from stored host state.
    /// Out of range region indices are ignored.
    pub fn set_region_life(&self, region: usize, life: f32) {
        if let Some(region) = self.regions.get(region) {
            region.life.store(life.clamp(0.0, 1.0));
        }
    }

    fn region_for_frame(&self, frame: usize) -> Option<&WearRegion> {
        let total_frames = self.total_frames.load(Ordering::Relaxed);
        if total_frames == 0 {
            return None;
        }
        let index = ((frame * Self::REGION_COUNT) / total_frames).min(Self::REGION_COUNT - 1);
        Some(&self.regions[index])
    }
}

impl Default for TapeWearEngine {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------
