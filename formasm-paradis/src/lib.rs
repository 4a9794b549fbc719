//! paradis
//! =======
//!
//! Parallel processing of disjoint subsets.
//!
//! The central type is [`DisjointSubsets`], a collection of subsets of indices in which no
//! index appears in more than one subset. Given a storage that exposes indexed records
//! (see [`ParallelIndexedCollection`]), the subsets can be processed in parallel with mutable
//! access to the records they index, without any locking: disjointness guarantees that no two
//! threads ever touch the same record.

pub mod coloring;
pub mod slice;

use formasm_adjacency::Adjacency;
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Facilitates parallel mutable access to records stored in a collection.
///
/// # Safety
///
/// An implementor must ensure that it is sound for multiple threads to obtain mutable records
/// for *distinct* indices concurrently, and that every index in `0 .. len` of the collection
/// that created the access refers to a valid record.
///
/// It is the responsibility of the consumer that no two live mutable records ever refer to the
/// same index, whether on the same thread or on different threads.
pub unsafe trait ParallelIndexedAccess: Sync + Send + Clone {
    type RecordMut<'r>
    where
        Self: 'r;

    /// Obtain a mutable record for the given index.
    ///
    /// # Safety
    ///
    /// The index must be in bounds, and no other record for the same index may be alive.
    unsafe fn get_unchecked_mut<'r>(&'r self, index: usize) -> Self::RecordMut<'r>;
}

/// An indexed collection that exposes parallel indexed access to its contents.
///
/// Since creating an access requires a mutable borrow of the collection, the access is the
/// only way to reach the collection's records for as long as it lives.
///
/// # Safety
///
/// Consumers may access records with indices in `0 .. len()`, so an incorrect length may lead
/// to unsoundness.
pub unsafe trait ParallelIndexedCollection<'a> {
    type Access: ParallelIndexedAccess + 'a;

    fn create_access(&'a mut self) -> Self::Access;
    fn len(&self) -> usize;
}

/// The records indexed by a single subset, together with the label of the subset.
pub struct SubsetAccess<'a, Access> {
    label: usize,
    global_indices: &'a [usize],
    access: Access,
}

impl<'a, Access: ParallelIndexedAccess> SubsetAccess<'a, Access> {
    pub fn label(&self) -> usize {
        self.label
    }

    pub fn global_indices(&self) -> &[usize] {
        self.global_indices
    }

    pub fn len(&self) -> usize {
        self.global_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global_indices.is_empty()
    }

    /// Mutable access to the record associated with the `local_index`-th index of the subset.
    ///
    /// The record borrows the subset access, so at most one record of the subset can be alive
    /// at any time. This keeps duplicate indices within a subset sound.
    ///
    /// # Panics
    ///
    /// Panics if `local_index` is out of bounds for the subset.
    pub fn get_mut(&mut self, local_index: usize) -> Access::RecordMut<'_> {
        let global_index = self.global_indices[local_index];
        // Indices are in bounds of the storage (checked when the iterator was created) and
        // disjoint from the indices of every other subset
        unsafe { self.access.get_unchecked_mut(global_index) }
    }
}

/// A set of labeled subsets of indices, in which the intersection of indices between any two
/// subsets is empty.
///
/// Indices may be repeated *within* a subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisjointSubsets {
    max_index: Option<usize>,
    subsets: Adjacency,
    labels: Vec<usize>,
}

/// Returned when two subsets share an index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SubsetsNotDisjointError {
    /// The shared index.
    pub index: usize,
    /// Labels of the two subsets that contain the index.
    pub labels: (usize, usize),
}

impl fmt::Display for SubsetsNotDisjointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Subsets with labels {} and {} share index {}",
            self.labels.0, self.labels.1, self.index
        )
    }
}

impl Error for SubsetsNotDisjointError {}

impl DisjointSubsets {
    /// Constructs disjoint subsets, verifying that no index is shared between subsets.
    ///
    /// # Panics
    ///
    /// Panics if the number of labels does not match the number of subsets.
    pub fn try_from_disjoint_subsets(
        subsets: impl Into<Adjacency>,
        labels: Vec<usize>,
    ) -> Result<Self, SubsetsNotDisjointError> {
        let subsets = subsets.into();
        assert_eq!(subsets.len(), labels.len(), "Must have exactly one label per subset.");

        let max_index = subsets.max_index();
        let table_len = max_index.map(|idx| idx + 1).unwrap_or(0);
        // owner[idx] is the position of the subset that first claimed idx
        let mut owner = vec![usize::MAX; table_len];
        for (subset_idx, subset) in subsets.iter().enumerate() {
            for &idx in subset {
                let current_owner = owner[idx];
                if current_owner == usize::MAX {
                    owner[idx] = subset_idx;
                } else if current_owner != subset_idx {
                    return Err(SubsetsNotDisjointError {
                        index: idx,
                        labels: (labels[current_owner], labels[subset_idx]),
                    });
                }
            }
        }

        Ok(Self {
            max_index,
            subsets,
            labels,
        })
    }

    /// Constructs disjoint subsets without verifying disjointness.
    ///
    /// # Safety
    ///
    /// The subsets must be disjoint, and `max_index` must be the largest index in any subset.
    pub unsafe fn from_disjoint_subsets_unchecked(
        subsets: impl Into<Adjacency>,
        labels: Vec<usize>,
        max_index: Option<usize>,
    ) -> Self {
        let subsets = subsets.into();
        assert_eq!(subsets.len(), labels.len(), "Must have exactly one label per subset.");
        debug_assert_eq!(max_index, subsets.max_index());
        Self {
            max_index,
            subsets,
            labels,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn max_index(&self) -> Option<usize> {
        self.max_index
    }

    pub fn subsets(&self) -> &Adjacency {
        &self.subsets
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Create a parallel iterator over the subsets, with mutable access to the records of
    /// `storage` indexed by each subset.
    ///
    /// # Panics
    ///
    /// Panics if any subset contains an index that exceeds the length reported by `storage`.
    pub fn subsets_par_iter<'a, Storage>(
        &'a self,
        storage: &'a mut Storage,
    ) -> impl 'a + IndexedParallelIterator<Item = SubsetAccess<'a, Storage::Access>>
    where
        Storage: ?Sized + ParallelIndexedCollection<'a>,
    {
        if let Some(max_index) = self.max_index {
            assert!(max_index < storage.len(), "Subsets contain indices out of bounds.");
        }
        let access = storage.create_access();
        let subsets = &self.subsets;
        let labels = &self.labels;

        (0..self.len()).into_par_iter().map(move |i| SubsetAccess {
            label: labels[i],
            global_indices: subsets.row(i).unwrap_or_default(),
            access: access.clone(),
        })
    }
}
