//! Sample positions for area lookups
//!
//! The renderer decides where inside a footprint each texel fetch lands.
//! A [`SampleSource`] stands in for that: lookups ask it how many samples
//! to take and then pull that many `(u, v)` pairs in `[0, 1)`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of 2D sample positions
pub trait SampleSource {
    /// Start a new lookup wanting `requested` samples; returns how many
    /// pairs the caller should draw
    fn begin(&mut self, requested: usize) -> usize;

    /// Next sample position in `[0, 1)`
    fn next_pair(&mut self) -> [f32; 2];
}

/// Columns and rows of the stratum grid for `count` samples
fn strata(count: usize) -> (usize, usize) {
    let columns = (count as f64).sqrt().ceil().max(1.0) as usize;
    let rows = count.div_ceil(columns).max(1);
    (columns, rows)
}

/// Stratified random positions, one per cell of a near-square grid
#[derive(Debug, Clone)]
pub struct JitteredSampler {
    rng: StdRng,
    columns: usize,
    rows: usize,
    index: usize,
}

impl JitteredSampler {
    /// Reproducible sampler
    pub fn new(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// Sampler seeded from the operating system
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            columns: 1,
            rows: 1,
            index: 0,
        }
    }
}

impl SampleSource for JitteredSampler {
    fn begin(&mut self, requested: usize) -> usize {
        let count = requested.max(1);
        (self.columns, self.rows) = strata(count);
        self.index = 0;
        count
    }

    fn next_pair(&mut self) -> [f32; 2] {
        let cell = self.index % (self.columns * self.rows);
        self.index += 1;
        let cx = (cell % self.columns) as f32;
        let cy = (cell / self.columns) as f32;
        let u = (cx + self.rng.gen::<f32>()) / self.columns as f32;
        let v = (cy + self.rng.gen::<f32>()) / self.rows as f32;
        // Rounding can land exactly on 1.0
        [u.min(1.0 - f32::EPSILON), v.min(1.0 - f32::EPSILON)]
    }
}

/// Deterministic stratum centres
///
/// A single sample sits at `(0.5, 0.5)`, so a one-sample area lookup
/// degenerates to a point lookup at the footprint centre.
#[derive(Debug, Clone, Default)]
pub struct GridSampler {
    columns: usize,
    rows: usize,
    index: usize,
}

impl GridSampler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleSource for GridSampler {
    fn begin(&mut self, requested: usize) -> usize {
        let count = requested.max(1);
        (self.columns, self.rows) = strata(count);
        self.index = 0;
        count
    }

    fn next_pair(&mut self) -> [f32; 2] {
        let (columns, rows) = (self.columns.max(1), self.rows.max(1));
        let cell = self.index % (columns * rows);
        self.index += 1;
        [
            ((cell % columns) as f32 + 0.5) / columns as f32,
            ((cell / columns) as f32 + 0.5) / rows as f32,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_grid_sample_is_centred() {
        let mut sampler = GridSampler::new();
        assert_eq!(sampler.begin(1), 1);
        assert_eq!(sampler.next_pair(), [0.5, 0.5]);
    }

    #[test]
    fn test_grid_covers_strata() {
        let mut sampler = GridSampler::new();
        assert_eq!(sampler.begin(4), 4);
        let pairs: Vec<_> = (0..4).map(|_| sampler.next_pair()).collect();
        assert_eq!(
            pairs,
            vec![[0.25, 0.25], [0.75, 0.25], [0.25, 0.75], [0.75, 0.75]]
        );
    }

    #[test]
    fn test_zero_request_still_samples() {
        assert_eq!(GridSampler::new().begin(0), 1);
        assert_eq!(JitteredSampler::new(1).begin(0), 1);
    }

    #[test]
    fn test_jitter_stays_in_its_cell() {
        let mut sampler = JitteredSampler::new(7);
        let count = sampler.begin(9);
        for i in 0..count {
            let [u, v] = sampler.next_pair();
            assert!((0.0..1.0).contains(&u) && (0.0..1.0).contains(&v));
            let (cx, cy) = ((i % 3) as f32, (i / 3) as f32);
            assert!(u >= cx / 3.0 - 1e-6 && u <= (cx + 1.0) / 3.0 + 1e-6);
            assert!(v >= cy / 3.0 - 1e-6 && v <= (cy + 1.0) / 3.0 + 1e-6);
        }
    }

    #[test]
    fn test_seeded_samplers_repeat() {
        let mut a = JitteredSampler::new(42);
        let mut b = JitteredSampler::new(42);
        a.begin(5);
        b.begin(5);
        for _ in 0..5 {
            assert_eq!(a.next_pair(), b.next_pair());
        }
    }
}
