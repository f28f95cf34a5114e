use rand::Rng;

use crate::RngGen;

/// Number of key tuples remembered by a single worker.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// A bounded, worker-private collection of previously written lookup keys.
///
/// Until the cache is full, every recorded entry is appended. Afterwards,
/// each recorded entry replaces a uniformly chosen slot with a fixed
/// probability of 1/10, and is dropped otherwise.
///
/// Note that this is only an approximation of reservoir sampling:
/// an unbiased reservoir would replace the i-th entry with probability
/// `capacity / i`, while here the probability stays constant and recently
/// written keys are favored.
pub struct SampleCache<T> {
    entries: Vec<T>,
    capacity: usize,
    rng: RngGen,
}

impl<T: Clone> SampleCache<T> {
    /// Probability of replacing a slot once the cache is full,
    /// expressed as a `numerator / denominator` ratio.
    pub const REPLACEMENT_RATIO: (u32, u32) = (1, 10);

    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, RngGen::new(rand::thread_rng().gen()))
    }

    pub fn with_rng(capacity: usize, rng: RngGen) -> Self {
        assert!(capacity > 0, "sample cache capacity must not be zero");
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            rng,
        }
    }

    /// Remembers `entry`, see the type-level docs for the replacement policy.
    pub fn record(&mut self, entry: T) {
        if self.entries.len() < self.capacity {
            self.entries.push(entry);
            return;
        }

        let (numerator, denominator) = Self::REPLACEMENT_RATIO;
        if self.rng.gen_ratio(numerator, denominator) {
            let slot = self.rng.gen_range(0..self.entries.len());
            self.entries[slot] = entry;
        }
    }

    /// Returns a uniformly chosen entry, or `None` if nothing was recorded yet.
    pub fn sample(&mut self) -> Option<T> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..self.entries.len());
        Some(self.entries[idx].clone())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }
}
