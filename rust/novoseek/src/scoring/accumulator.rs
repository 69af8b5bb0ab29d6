//! Accumulator for per spectrum results coming out of parallel iterators.
//!
//! Collects both the results and the timings in a single pass, using the
//! fold-reduce pattern so each thread only touches its own accumulator.
//! Rayon merges accumulators left to right, so input order is preserved.

use super::timings::InferenceTimings;
use rayon::iter::{
    FromParallelIterator,
    IntoParallelIterator,
    ParallelIterator,
};

#[derive(Debug)]
pub(crate) struct BatchAccumulator<T> {
    pub(crate) res: Vec<T>,
    pub(crate) timings: InferenceTimings,
}

impl<T> Default for BatchAccumulator<T> {
    fn default() -> Self {
        Self {
            res: Vec::new(),
            timings: InferenceTimings::default(),
        }
    }
}

impl<T> BatchAccumulator<T> {
    pub(crate) fn reduce(mut self, other: Self) -> Self {
        self.res.extend(other.res);
        self.timings += other.timings;
        self
    }

    pub(crate) fn fold(mut self, item: (T, InferenceTimings)) -> Self {
        self.res.push(item.0);
        self.timings += item.1;
        self
    }
}

impl<T> FromIterator<(T, InferenceTimings)> for BatchAccumulator<T> {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (T, InferenceTimings)>,
    {
        iter.into_iter()
            .fold(BatchAccumulator::default(), BatchAccumulator::fold)
    }
}

impl<T: Send> FromParallelIterator<(T, InferenceTimings)> for BatchAccumulator<T> {
    fn from_par_iter<I>(par_iter: I) -> Self
    where
        I: IntoParallelIterator<Item = (T, InferenceTimings)>,
    {
        par_iter
            .into_par_iter()
            .fold(BatchAccumulator::default, BatchAccumulator::fold)
            .reduce(BatchAccumulator::default, BatchAccumulator::reduce)
    }
}
