//! Global tensors receiving assembled contributions.
use crate::dofmap::tabulate_macro_dofs;
use crate::form::Form;
use crate::topology::FacetTopology;
use crate::Real;
use eyre::eyre;
use itertools::iproduct;
use formasm_paradis::{ParallelIndexedAccess, ParallelIndexedCollection};
use formasm_traits::allocators::GeometryAllocator;
use nalgebra::{DVector, DefaultAllocator, DimName, Scalar};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::slice::ParallelSliceMut;
use std::marker::PhantomData;
use std::slice;

/// The shape, and for matrices the sparsity pattern, of the global tensor of a form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorLayout {
    shape: Vec<usize>,
    sparsity_pattern: Option<SparsityPattern>,
}

impl TensorLayout {
    pub fn new(shape: Vec<usize>) -> Self {
        Self {
            shape,
            sparsity_pattern: None,
        }
    }

    /// # Panics
    ///
    /// Panics if the layout does not describe a matrix with the same dimensions as the pattern.
    pub fn with_sparsity_pattern(mut self, pattern: SparsityPattern) -> Self {
        assert_eq!(
            self.shape,
            [pattern.major_dim(), pattern.minor_dim()],
            "Sparsity pattern dimensions must match the shape of the layout."
        );
        self.sparsity_pattern = Some(pattern);
        self
    }

    /// Computes the layout of the global tensor of the given form.
    ///
    /// For rank 2 forms, the sparsity pattern contains the couplings between the dofs of every
    /// cell and, if `facets` is given and the form has interior facet integrals, the couplings
    /// between the dofs of the two cells adjacent to each interior facet.
    pub fn from_form<T, D>(form: &Form<T, D>, facets: Option<&FacetTopology>) -> eyre::Result<Self>
    where
        T: Scalar,
        D: DimName,
        DefaultAllocator: GeometryAllocator<T, D>,
    {
        let layout = Self::new(form.shape());
        match form.function_spaces() {
            [rows, cols] => {
                let num_cells = rows.num_cells();
                let mut coordinates =
                    Vec::with_capacity(num_cells * rows.max_local_dimension() * cols.max_local_dimension());
                let mut row_dofs = Vec::new();
                let mut col_dofs = Vec::new();
                for cell in 0..num_cells {
                    row_dofs.resize(rows.local_dimension(cell), 0);
                    col_dofs.resize(cols.local_dimension(cell), 0);
                    rows.tabulate_dofs(&mut row_dofs, cell);
                    cols.tabulate_dofs(&mut col_dofs, cell);
                    push_block(&mut coordinates, &row_dofs, &col_dofs);
                }

                if let Some(facets) = facets.filter(|_| !form.interior_facet_integrals().is_empty()) {
                    for facet in 0..facets.num_facets() {
                        if let &[c0, c1] = facets.facet_cells(facet) {
                            tabulate_macro_dofs(&**rows, (c0, c1), &mut row_dofs);
                            tabulate_macro_dofs(&**cols, (c0, c1), &mut col_dofs);
                            push_block(&mut coordinates, &row_dofs, &col_dofs);
                        }
                    }
                }

                let pattern = sparsity_pattern_from_coordinates(rows.global_dimension(), cols.global_dimension(), coordinates)?;
                Ok(layout.with_sparsity_pattern(pattern))
            }
            _ => Ok(layout),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn sparsity_pattern(&self) -> Option<&SparsityPattern> {
        self.sparsity_pattern.as_ref()
    }
}

fn push_block(coordinates: &mut Vec<(usize, usize)>, rows: &[usize], cols: &[usize]) {
    coordinates.extend(iproduct!(rows.iter().copied(), cols.iter().copied()));
}

/// Builds a sparsity pattern containing exactly the given (possibly duplicate) coordinates.
fn sparsity_pattern_from_coordinates(
    num_rows: usize,
    num_cols: usize,
    mut coordinates: Vec<(usize, usize)>,
) -> eyre::Result<SparsityPattern> {
    coordinates.par_sort_unstable();
    coordinates.dedup();

    let mut row_offsets = Vec::with_capacity(num_rows + 1);
    let mut column_indices = Vec::with_capacity(coordinates.len());
    row_offsets.push(0);
    for (i, j) in coordinates {
        if i >= num_rows {
            return Err(eyre!("Row index {i} out of bounds for {num_rows} rows"));
        }
        // Consecutive empty rows
        while row_offsets.len() <= i {
            row_offsets.push(column_indices.len());
        }
        column_indices.push(j);
    }
    while row_offsets.len() <= num_rows {
        row_offsets.push(column_indices.len());
    }

    Ok(SparsityPattern::try_from_offsets_and_indices(
        num_rows,
        num_cols,
        row_offsets,
        column_indices,
    )?)
}

/// Storage that assembly writes to from parallel workers.
///
/// Workers only ever write to disjoint sets of entries (scalars are reduced before being
/// written).
pub enum ScatterTarget<'a, T> {
    Scalar(&'a mut T),
    Vector(&'a mut [T]),
    Matrix(CsrScatterTarget<'a, T>),
}

/// A global tensor of rank 0, 1 or 2 that accumulates local contributions.
pub trait GlobalTensor<T: Scalar>: Send {
    fn rank(&self) -> usize;

    fn shape(&self) -> Vec<usize>;

    /// Resizes the tensor to the given layout and sets all entries to zero.
    fn init(&mut self, layout: &TensorLayout) -> eyre::Result<()>;

    /// Sets all entries to zero, keeping the layout.
    fn zero(&mut self);

    /// Adds a dense block of values at the given global indices.
    ///
    /// `dofs` holds one index array per dimension of the tensor, and `values` is the row-major
    /// block with one entry per combination of indices.
    fn add(&mut self, values: &[T], dofs: &[&[usize]]);

    /// Parallel access to the entries of the tensor.
    fn scatter_target(&mut self) -> ScatterTarget<'_, T>;

    /// Finalizes the tensor after all contributions have been added.
    fn apply(&mut self) -> eyre::Result<()>;
}

/// A global scalar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalScalar<T> {
    value: T,
}

impl<T: Real> Default for GlobalScalar<T> {
    fn default() -> Self {
        Self { value: T::zero() }
    }
}

impl<T: Real> GlobalScalar<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn value(&self) -> T {
        self.value
    }
}

impl<T: Real> GlobalTensor<T> for GlobalScalar<T> {
    fn rank(&self) -> usize {
        0
    }

    fn shape(&self) -> Vec<usize> {
        Vec::new()
    }

    fn init(&mut self, _layout: &TensorLayout) -> eyre::Result<()> {
        self.value = T::zero();
        Ok(())
    }

    fn zero(&mut self) {
        self.value = T::zero();
    }

    fn add(&mut self, values: &[T], _dofs: &[&[usize]]) {
        self.value += values[0];
    }

    fn scatter_target(&mut self) -> ScatterTarget<'_, T> {
        ScatterTarget::Scalar(&mut self.value)
    }

    fn apply(&mut self) -> eyre::Result<()> {
        Ok(())
    }
}

/// A dense global vector.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVector<T: Scalar> {
    vector: DVector<T>,
}

impl<T: Real> Default for GlobalVector<T> {
    fn default() -> Self {
        Self::from(DVector::zeros(0))
    }
}

impl<T: Scalar> From<DVector<T>> for GlobalVector<T> {
    fn from(vector: DVector<T>) -> Self {
        Self { vector }
    }
}

impl<T: Real> GlobalVector<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_vector(&self) -> &DVector<T> {
        &self.vector
    }

    pub fn into_vector(self) -> DVector<T> {
        self.vector
    }
}

impl<T: Real> GlobalTensor<T> for GlobalVector<T> {
    fn rank(&self) -> usize {
        1
    }

    fn shape(&self) -> Vec<usize> {
        vec![self.vector.len()]
    }

    fn init(&mut self, layout: &TensorLayout) -> eyre::Result<()> {
        match layout.shape() {
            &[len] => {
                self.vector = DVector::zeros(len);
                Ok(())
            }
            shape => Err(eyre!("Cannot initialize a vector with shape {shape:?}")),
        }
    }

    fn zero(&mut self) {
        self.vector.fill(T::zero());
    }

    fn add(&mut self, values: &[T], dofs: &[&[usize]]) {
        for (&value, &i) in values.iter().zip(dofs[0]) {
            self.vector[i] += value;
        }
    }

    fn scatter_target(&mut self) -> ScatterTarget<'_, T> {
        ScatterTarget::Vector(self.vector.as_mut_slice())
    }

    fn apply(&mut self) -> eyre::Result<()> {
        Ok(())
    }
}

/// A sparse global matrix in CSR format.
///
/// Entries added outside the sparsity pattern are buffered, and inserted into the pattern by
/// [`GlobalTensor::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalMatrix<T: Scalar> {
    matrix: CsrMatrix<T>,
    pending: Vec<(usize, usize, T)>,
}

impl<T: Real> Default for GlobalMatrix<T> {
    fn default() -> Self {
        Self::from(CsrMatrix::zeros(0, 0))
    }
}

impl<T: Scalar> From<CsrMatrix<T>> for GlobalMatrix<T> {
    fn from(matrix: CsrMatrix<T>) -> Self {
        Self {
            matrix,
            pending: Vec::new(),
        }
    }
}

impl<T: Real> GlobalMatrix<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_csr(&self) -> &CsrMatrix<T> {
        &self.matrix
    }

    pub fn into_csr(self) -> CsrMatrix<T> {
        self.matrix
    }

    /// The number of added entries waiting to be inserted into the sparsity pattern.
    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    fn add_entry(&mut self, i: usize, j: usize, value: T) {
        let mut row = self.matrix.row_mut(i);
        let (cols, values) = row.cols_and_values_mut();
        match cols.binary_search(&j) {
            Ok(local_index) => values[local_index] += value,
            Err(_) => self.pending.push((i, j, value)),
        }
    }
}

impl<T: Real> GlobalTensor<T> for GlobalMatrix<T> {
    fn rank(&self) -> usize {
        2
    }

    fn shape(&self) -> Vec<usize> {
        vec![self.matrix.nrows(), self.matrix.ncols()]
    }

    fn init(&mut self, layout: &TensorLayout) -> eyre::Result<()> {
        let pattern = match (layout.shape(), layout.sparsity_pattern()) {
            (_, Some(pattern)) => pattern.clone(),
            (&[nrows, ncols], None) => SparsityPattern::zeros(nrows, ncols),
            (shape, None) => return Err(eyre!("Cannot initialize a matrix with shape {shape:?}")),
        };
        let values = vec![T::zero(); pattern.nnz()];
        self.matrix = CsrMatrix::try_from_pattern_and_values(pattern, values)
            .map_err(|err| eyre!("Failed to build CSR matrix from sparsity pattern: {err}"))?;
        self.pending.clear();
        Ok(())
    }

    fn zero(&mut self) {
        self.matrix.values_mut().fill(T::zero());
        self.pending.clear();
    }

    fn add(&mut self, values: &[T], dofs: &[&[usize]]) {
        let (rows, cols) = (dofs[0], dofs[1]);
        for (local_row, &i) in rows.iter().enumerate() {
            for (local_col, &j) in cols.iter().enumerate() {
                self.add_entry(i, j, values[local_row * cols.len() + local_col]);
            }
        }
    }

    fn scatter_target(&mut self) -> ScatterTarget<'_, T> {
        let (row_offsets, col_indices, values) = self.matrix.csr_data_mut();
        ScatterTarget::Matrix(CsrScatterTarget {
            row_offsets,
            col_indices,
            values,
        })
    }

    fn apply(&mut self) -> eyre::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut coo = CooMatrix::new(self.matrix.nrows(), self.matrix.ncols());
        for (i, j, &value) in self.matrix.triplet_iter() {
            coo.push(i, j, value);
        }
        for (i, j, value) in self.pending.drain(..) {
            coo.push(i, j, value);
        }
        self.matrix = CsrMatrix::from(&coo);
        Ok(())
    }
}

/// The rows of a CSR matrix, accessible in parallel through [`formasm_paradis::DisjointSubsets`].
///
/// The sparsity pattern can not change through this target, so entries outside the pattern must
/// be collected elsewhere.
pub struct CsrScatterTarget<'a, T> {
    row_offsets: &'a [usize],
    col_indices: &'a [usize],
    values: &'a mut [T],
}

/// Parallel access to the rows of a [`CsrScatterTarget`].
pub struct CsrRowsAccess<'a, T> {
    row_offsets: &'a [usize],
    col_indices: &'a [usize],
    values: *mut T,
    marker: PhantomData<&'a mut [T]>,
}

impl<'a, T> Clone for CsrRowsAccess<'a, T> {
    fn clone(&self) -> Self {
        Self {
            row_offsets: self.row_offsets,
            col_indices: self.col_indices,
            values: self.values,
            marker: PhantomData,
        }
    }
}

unsafe impl<'a, T: Send + Sync> Send for CsrRowsAccess<'a, T> {}
unsafe impl<'a, T: Send + Sync> Sync for CsrRowsAccess<'a, T> {}

/// A mutable row of a CSR matrix with a fixed sparsity pattern.
#[derive(Debug)]
pub struct ScatterRow<'a, T> {
    col_indices: &'a [usize],
    values: &'a mut [T],
}

impl<'a, T: Real> ScatterRow<'a, T> {
    /// Adds `value` to the entry in column `col`.
    ///
    /// Returns `false` without modifying the row if the column is not in the sparsity pattern.
    pub fn add(&mut self, col: usize, value: T) -> bool {
        match self.col_indices.binary_search(&col) {
            Ok(local_index) => {
                self.values[local_index] += value;
                true
            }
            Err(_) => false,
        }
    }
}

unsafe impl<'a, T: Send + Sync> ParallelIndexedAccess for CsrRowsAccess<'a, T> {
    type RecordMut<'r> = ScatterRow<'r, T> where Self: 'r;

    unsafe fn get_unchecked_mut<'r>(&'r self, row: usize) -> ScatterRow<'r, T> {
        let begin = *self.row_offsets.get_unchecked(row);
        let end = *self.row_offsets.get_unchecked(row + 1);
        ScatterRow {
            col_indices: &self.col_indices[begin..end],
            values: slice::from_raw_parts_mut(self.values.add(begin), end - begin),
        }
    }
}

unsafe impl<'a, 'b: 'a, T: 'a + Send + Sync> ParallelIndexedCollection<'a> for CsrScatterTarget<'b, T> {
    type Access = CsrRowsAccess<'a, T>;

    fn create_access(&'a mut self) -> Self::Access {
        CsrRowsAccess {
            row_offsets: self.row_offsets,
            col_indices: self.col_indices,
            values: self.values.as_mut_ptr(),
            marker: PhantomData,
        }
    }

    fn len(&self) -> usize {
        self.row_offsets.len() - 1
    }
}
