//! # Id Range
//!
//! Questions live in an id arena. Two counters in the store bound the live part of it.
//!
//! - `end`: number of ids ever handed out, only ever incremented
//! - `start`: bulk-delete low-water mark, only moves up to a previously observed `end`
//!
//! An id is addressable iff `start <= id < end`. Both counters are always read together
//! so a torn pair never shows up as a valid range.
use std::ops::Range;

use crate::store::{QuestionStore, StoreResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdRange {
    pub start: u64,
    pub end: u64,
}

impl IdRange {
    /// A pair with `start > end` is treated as empty rather than trusted.
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.start <= id && id < self.end
    }

    pub fn ids(&self) -> Range<u64> {
        self.start..self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Splits the range into consecutive sub-ranges of at most `size` ids.
    pub fn batches(&self, size: u64) -> impl Iterator<Item = Range<u64>> + use<> {
        let (start, end) = (self.start, self.end);
        let size = size.max(1);

        (start..end)
            .step_by(size as usize)
            .map(move |from| from..(from + size).min(end))
    }
}

/// Reserves the next id. Backed by the store's atomic increment of `end`, never a
/// read-then-write, so concurrent callers never share an id.
///
/// There is no rollback: an id stays issued even if its body is never written.
pub async fn allocate(store: &dyn QuestionStore) -> StoreResult<u64> {
    let end = store.advance_end().await?;

    Ok(end - 1)
}
