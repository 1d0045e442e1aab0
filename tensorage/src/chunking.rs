//! Row-aligned batching of tensors.
//!
//! Tensors are split along their first axis into batches holding at most `chunk_size`
//! elements (but always at least one row). Splitting by element count rather than by bytes
//! keeps the rule independent of the element type.
use std::{num::NonZeroUsize, ops::Range};

use crate::tensor::{Tensor, TensorResult};

/// How the rows of a tensor are distributed over batches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchPlan {
    rows: usize,
    rows_per_batch: usize,
}

impl BatchPlan {
    /// Plan for a tensor of `shape`, which must have at least one axis.
    ///
    /// `rows_per_batch = max(1, chunk_size / product(shape[1..]))`.
    pub fn new(shape: &[usize], chunk_size: NonZeroUsize) -> Self {
        let rows = shape.first().copied().unwrap_or(0);
        let elements_per_row: usize = shape.iter().skip(1).product();
        let rows_per_batch = match elements_per_row {
            0 => rows.max(1),
            n => (chunk_size.get() / n).max(1),
        };
        Self { rows, rows_per_batch }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn rows_per_batch(&self) -> usize {
        self.rows_per_batch
    }

    pub fn num_batches(&self) -> usize {
        self.rows.div_ceil(self.rows_per_batch)
    }

    /// Row ranges of every batch, in order. Batch `i` starts at `i * rows_per_batch`.
    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.num_batches()).map(|i| {
            let start = i * self.rows_per_batch;
            start..(start + self.rows_per_batch).min(self.rows)
        })
    }

    /// Split `tensor` into its batches. The tensor's first axis must match the plan.
    pub fn split(&self, tensor: &Tensor) -> TensorResult<Vec<Tensor>> {
        self.ranges().map(|range| tensor.slice_rows(range)).collect()
    }
}
