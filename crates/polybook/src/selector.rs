//! Weighted choice between book candidates
//!
//! A record with weight `w` is picked with probability `w / total`. Rather
//! than expanding each record into `w` copies, the selector keeps running
//! prefix sums of the weights and binary-searches a uniform draw into them.
//! Zero-weight records contribute no interval and can never be picked.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::codec::BookRecord;
use crate::error::{BookError, BookResult};

/// Picks book records in proportion to their weight
#[derive(Debug, Clone)]
pub struct WeightedSelector<R: Rng = StdRng> {
    rng: R,
}

impl WeightedSelector<StdRng> {
    /// Selector seeded from the operating system
    pub fn from_entropy() -> Self {
        WeightedSelector {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Reproducible selector for tests and replays
    pub fn seeded(seed: u64) -> Self {
        WeightedSelector {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: Rng> WeightedSelector<R> {
    pub fn new(rng: R) -> Self {
        WeightedSelector { rng }
    }

    /// Index into `candidates` of the chosen record
    pub fn select_index(&mut self, candidates: &[BookRecord]) -> BookResult<usize> {
        let mut cumulative = Vec::with_capacity(candidates.len());
        let mut indices = Vec::with_capacity(candidates.len());
        let mut total = 0u64;

        for (i, record) in candidates.iter().enumerate() {
            if record.weight == 0 {
                continue;
            }
            total += u64::from(record.weight);
            cumulative.push(total);
            indices.push(i);
        }

        if total == 0 {
            return Err(BookError::NoBookMove);
        }

        let draw = self.rng.random_range(0..total);
        let slot = cumulative.partition_point(|&upper| upper <= draw);
        Ok(indices[slot])
    }

    /// The chosen record
    pub fn select<'a>(&mut self, candidates: &'a [BookRecord]) -> BookResult<&'a BookRecord> {
        let index = self.select_index(candidates)?;
        Ok(&candidates[index])
    }
}
