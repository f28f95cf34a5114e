use anyhow::Result;
use rand::Rng;
use rand_distr::{Distribution, WeightedIndex};

use crate::RngGen;

/// Draws items proportionally to their weights.
///
/// The cumulative weights are computed once, during construction.
/// Each draw samples a uniform value in `[0, total_weight)` and returns
/// the first item whose cumulative weight exceeds it, so items with
/// a weight of zero are never returned.
pub struct TaskScheduler<T> {
    items: Vec<(T, u64)>,
    dist: WeightedIndex<u64>,
    rng: RngGen,
}

impl<T: Copy> TaskScheduler<T> {
    pub fn new(weights: impl IntoIterator<Item = (T, u64)>) -> Result<Self> {
        Self::with_rng(weights, RngGen::new(rand::thread_rng().gen()))
    }

    /// Fails if the weights sum up to zero - in that case no item
    /// could ever be drawn.
    pub fn with_rng(weights: impl IntoIterator<Item = (T, u64)>, rng: RngGen) -> Result<Self> {
        let items: Vec<(T, u64)> = weights.into_iter().collect();
        let total = items
            .iter()
            .try_fold(0u64, |acc, (_, w)| acc.checked_add(*w))
            .ok_or_else(|| anyhow::anyhow!("Sum of the operation weights overflows"))?;
        anyhow::ensure!(
            total > 0,
            "Total weight of the operations is zero, no operation can be chosen",
        );

        let dist = WeightedIndex::new(items.iter().map(|(_, w)| *w))?;
        Ok(Self { items, dist, rng })
    }

    pub fn next(&mut self) -> T {
        self.items[self.dist.sample(&mut self.rng)].0
    }

    pub fn total_weight(&self) -> u64 {
        self.items.iter().map(|(_, w)| w).sum()
    }

    pub fn weight_of(&self, item: &T) -> u64
    where
        T: PartialEq,
    {
        self.items
            .iter()
            .filter(|(i, _)| i == item)
            .map(|(_, w)| w)
            .sum()
    }
}

impl<T: std::fmt::Display> std::fmt::Display for TaskScheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let items_str = self
            .items
            .iter()
            .map(|(item, weight)| format!("{item}={weight}"))
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{{{items_str}}}")
    }
}
