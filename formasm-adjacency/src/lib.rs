//! Compressed incidence relations.
//!
//! An [`Adjacency`] stores a list of rows of indices contiguously, in the same way that the
//! row offsets and column indices of a CSR matrix store its sparsity pattern. It is used to
//! represent incidence between mesh entities (e.g. the vertices of each cell, or the cells
//! adjacent to each facet) as well as per-cell tables of degrees of freedom.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjacency {
    // Always has length num_rows + 1, with offsets[0] == 0
    offsets: Vec<usize>,
    indices: Vec<usize>,
}

impl Debug for Adjacency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl Default for Adjacency {
    fn default() -> Self {
        Self::new()
    }
}

impl Adjacency {
    pub fn new() -> Self {
        Self {
            offsets: vec![0],
            indices: Vec::new(),
        }
    }

    /// Creates an adjacency in which every row has exactly `row_len` entries.
    ///
    /// # Panics
    ///
    /// Panics if `row_len` is zero and `indices` is non-empty, or if the number of indices
    /// is not divisible by `row_len`.
    pub fn from_uniform_rows(row_len: usize, indices: Vec<usize>) -> Self {
        if row_len == 0 {
            assert!(indices.is_empty(), "Rows of length zero can not hold indices.");
            return Self::new();
        }
        assert_eq!(indices.len() % row_len, 0, "Number of indices must be divisible by row length.");
        let num_rows = indices.len() / row_len;
        let offsets = (0..=num_rows).map(|i| i * row_len).collect();
        Self { offsets, indices }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn row(&self, index: usize) -> Option<&[usize]> {
        let begin = *self.offsets.get(index)?;
        let end = *self.offsets.get(index + 1)?;
        Some(&self.indices[begin..end])
    }

    pub fn iter<'a>(&'a self) -> impl 'a + ExactSizeIterator<Item = &'a [usize]> {
        self.offsets
            .windows(2)
            .map(move |w| &self.indices[w[0]..w[1]])
    }

    /// The largest index stored in any row.
    pub fn max_index(&self) -> Option<usize> {
        self.indices.iter().copied().max()
    }

    pub fn push(&mut self, row: &[usize]) {
        self.indices.extend_from_slice(row);
        self.offsets.push(self.indices.len());
    }

    /// Begin a new row that can be populated one index at a time.
    ///
    /// The row is committed when the returned appender is dropped, so that the result is
    /// equivalent to a single call to [`push`](Self::push).
    pub fn begin_row(&mut self) -> RowAppender<'_> {
        RowAppender { adjacency: self }
    }

    /// Computes the transposed relation.
    ///
    /// If this adjacency relates each row `i` to the indices `j` in row `i`, the transpose
    /// relates each `j` in `0 .. num_targets` to all rows `i` that contain `j`, in increasing
    /// order of `i`. A row containing the same index several times contributes as many entries.
    ///
    /// # Panics
    ///
    /// Panics if any index is greater than or equal to `num_targets`.
    pub fn transpose(&self, num_targets: usize) -> Adjacency {
        let mut counts = vec![0usize; num_targets + 1];
        for &j in &self.indices {
            assert!(j < num_targets, "Index {} out of bounds for {} targets.", j, num_targets);
            counts[j + 1] += 1;
        }
        for j in 0..num_targets {
            counts[j + 1] += counts[j];
        }
        let offsets = counts;
        let mut next = offsets[..num_targets].to_vec();
        let mut indices = vec![0; self.indices.len()];
        for (i, row) in self.iter().enumerate() {
            for &j in row {
                indices[next[j]] = i;
                next[j] += 1;
            }
        }
        Adjacency { offsets, indices }
    }
}

/// Appends indices to the last row of an [`Adjacency`].
#[derive(Debug)]
pub struct RowAppender<'a> {
    adjacency: &'a mut Adjacency,
}

impl<'a> RowAppender<'a> {
    pub fn push_single(&mut self, index: usize) -> &mut Self {
        self.adjacency.indices.push(index);
        self
    }
}

impl<'a> Drop for RowAppender<'a> {
    fn drop(&mut self) {
        let end = self.adjacency.indices.len();
        self.adjacency.offsets.push(end);
    }
}

impl<'a> From<&'a [Vec<usize>]> for Adjacency {
    fn from(rows: &'a [Vec<usize>]) -> Self {
        let mut adjacency = Self::new();
        for row in rows {
            adjacency.push(row);
        }
        adjacency
    }
}

impl<'a> From<&'a Vec<Vec<usize>>> for Adjacency {
    fn from(rows: &'a Vec<Vec<usize>>) -> Self {
        Self::from(rows.as_slice())
    }
}

impl From<Vec<Vec<usize>>> for Adjacency {
    fn from(rows: Vec<Vec<usize>>) -> Self {
        Self::from(rows.as_slice())
    }
}

impl<'a> From<&'a Adjacency> for Vec<Vec<usize>> {
    fn from(adjacency: &'a Adjacency) -> Self {
        adjacency.iter().map(|row| row.to_vec()).collect()
    }
}

impl From<Adjacency> for Vec<Vec<usize>> {
    fn from(adjacency: Adjacency) -> Self {
        Self::from(&adjacency)
    }
}
