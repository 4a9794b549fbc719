//! Interfaces of the compiled integral kernels that produce local element tensors.
//!
//! A kernel writes a dense local tensor in row-major order: for a rank 2 form with local
//! dimensions `n0` (test space) and `n1` (trial space), entry `(i, j)` is stored at
//! `i * n1 + j`. The output buffer is zeroed before every invocation. For interior facet
//! kernels the local dimensions are those of the macro element formed by both cells.
//!
//! Coefficients are passed as one slice of local values per coefficient of the form, restricted
//! to the cell (or, for interior facets, to both cells, concatenated).
use crate::mesh::Mesh;
use formasm_traits::allocators::GeometryAllocator;
use nalgebra::{DefaultAllocator, DimName, OPoint, Scalar};

/// A cell of the mesh, as seen by a kernel.
#[derive(Debug, Clone)]
pub struct CellGeometry<'a, T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: GeometryAllocator<T, D>,
{
    index: usize,
    vertex_indices: &'a [usize],
    mesh_vertices: &'a [OPoint<T, D>],
}

impl<'a, T, D> CellGeometry<'a, T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: GeometryAllocator<T, D>,
{
    pub fn new(mesh: &'a Mesh<T, D>, cell: usize) -> Self {
        Self {
            index: cell,
            vertex_indices: mesh.cell_vertices(cell),
            mesh_vertices: mesh.vertices(),
        }
    }

    /// Index of the cell in the mesh.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Global indices of the cell's vertices, in increasing order.
    pub fn vertex_indices(&self) -> &'a [usize] {
        self.vertex_indices
    }

    pub fn num_vertices(&self) -> usize {
        self.vertex_indices.len()
    }

    /// Coordinates of the local vertex with the given index.
    pub fn vertex(&self, local_index: usize) -> &'a OPoint<T, D> {
        &self.mesh_vertices[self.vertex_indices[local_index]]
    }

    pub fn vertices(&self) -> impl 'a + ExactSizeIterator<Item = &'a OPoint<T, D>> {
        let mesh_vertices = self.mesh_vertices;
        self.vertex_indices.iter().map(move |&v| &mesh_vertices[v])
    }
}

/// Computes the local tensor of a cell integral.
pub trait CellKernel<T, D>: Send + Sync
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: GeometryAllocator<T, D>,
{
    fn tabulate_tensor(&self, output: &mut [T], coefficients: &[Vec<T>], cell: &CellGeometry<T, D>) -> eyre::Result<()>;
}

/// Computes the local tensor of an integral over a facet on the boundary of the mesh.
pub trait ExteriorFacetKernel<T, D>: Send + Sync
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: GeometryAllocator<T, D>,
{
    /// `local_facet` is the index of the facet within the cell, i.e. the local index of the cell
    /// vertex opposite to the facet.
    fn tabulate_tensor(
        &self,
        output: &mut [T],
        coefficients: &[Vec<T>],
        cell: &CellGeometry<T, D>,
        local_facet: usize,
    ) -> eyre::Result<()>;
}

/// Computes the local macro tensor of an integral over a facet shared by two cells.
pub trait InteriorFacetKernel<T, D>: Send + Sync
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: GeometryAllocator<T, D>,
{
    fn tabulate_tensor(
        &self,
        output: &mut [T],
        coefficients: &[Vec<T>],
        cells: [&CellGeometry<T, D>; 2],
        local_facets: [usize; 2],
    ) -> eyre::Result<()>;
}
