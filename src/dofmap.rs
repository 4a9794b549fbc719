//! Local-to-global maps of degrees of freedom.
use crate::mesh::Mesh;
use eyre::ensure;
use formasm_adjacency::Adjacency;
use formasm_traits::allocators::GeometryAllocator;
use nalgebra::{DefaultAllocator, DimName, Scalar};

/// Maps the local degrees of freedom of each cell to global indices.
pub trait DofMap: Send + Sync {
    /// The number of global degrees of freedom.
    fn global_dimension(&self) -> usize;

    /// The number of cells the map is defined on.
    fn num_cells(&self) -> usize;

    /// The number of local degrees of freedom on the given cell.
    fn local_dimension(&self, cell: usize) -> usize;

    fn max_local_dimension(&self) -> usize;

    /// Writes the global indices of the local degrees of freedom of `cell` to `output`.
    ///
    /// # Panics
    ///
    /// May panic if the length of `output` is not equal to the local dimension of the cell.
    fn tabulate_dofs(&self, output: &mut [usize], cell: usize);
}

/// Writes the degrees of freedom of the macro element formed by two cells to `output`.
///
/// The dofs of `cells.0` come first, followed by the dofs of `cells.1` at an offset equal to the
/// local dimension of `cells.0`. The output is resized as needed.
pub fn tabulate_macro_dofs(dofmap: &(impl ?Sized + DofMap), cells: (usize, usize), output: &mut Vec<usize>) {
    let (cell0, cell1) = cells;
    let n0 = dofmap.local_dimension(cell0);
    let n1 = dofmap.local_dimension(cell1);
    output.resize(n0 + n1, 0);
    let (dofs0, dofs1) = output.split_at_mut(n0);
    dofmap.tabulate_dofs(dofs0, cell0);
    dofmap.tabulate_dofs(dofs1, cell1);
}

/// A dof map that stores the global dofs of every cell explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabulatedDofMap {
    global_dimension: usize,
    cell_dofs: Adjacency,
    max_local_dimension: usize,
}

impl TabulatedDofMap {
    /// Creates a dof map from a table with one row of global dofs per cell.
    pub fn from_cell_dofs(global_dimension: usize, cell_dofs: impl Into<Adjacency>) -> eyre::Result<Self> {
        let cell_dofs = cell_dofs.into();
        if let Some(max_dof) = cell_dofs.max_index() {
            ensure!(
                max_dof < global_dimension,
                "Dof {max_dof} is out of bounds for a global dimension of {global_dimension}"
            );
        }
        let max_local_dimension = cell_dofs.iter().map(<[usize]>::len).max().unwrap_or(0);
        Ok(Self {
            global_dimension,
            cell_dofs,
            max_local_dimension,
        })
    }

    /// Continuous piecewise linear dofs on the vertices of the mesh.
    ///
    /// Each vertex carries `block_size` consecutive dofs, so that the dofs of vertex `v` are
    /// `block_size * v .. block_size * (v + 1)`.
    pub fn lagrange_p1<T, D>(mesh: &Mesh<T, D>, block_size: usize) -> Self
    where
        T: Scalar,
        D: DimName,
        DefaultAllocator: GeometryAllocator<T, D>,
    {
        let mut cell_dofs = Adjacency::new();
        for vertices in mesh.cells().iter() {
            let mut row = cell_dofs.begin_row();
            for &v in vertices {
                for b in 0..block_size {
                    row.push_single(block_size * v + b);
                }
            }
        }
        Self {
            global_dimension: block_size * mesh.num_vertices(),
            cell_dofs,
            max_local_dimension: block_size * (mesh.topological_dim() + 1),
        }
    }

    /// Discontinuous dofs: every cell owns `dofs_per_cell` dofs that are not shared with any other cell.
    pub fn discontinuous<T, D>(mesh: &Mesh<T, D>, dofs_per_cell: usize) -> Self
    where
        T: Scalar,
        D: DimName,
        DefaultAllocator: GeometryAllocator<T, D>,
    {
        let mut cell_dofs = Adjacency::new();
        for cell in 0..mesh.num_cells() {
            let mut row = cell_dofs.begin_row();
            for dof in dofs_per_cell * cell..dofs_per_cell * (cell + 1) {
                row.push_single(dof);
            }
        }
        Self {
            global_dimension: dofs_per_cell * mesh.num_cells(),
            cell_dofs,
            max_local_dimension: dofs_per_cell,
        }
    }

    pub fn cell_dofs(&self, cell: usize) -> &[usize] {
        self.cell_dofs.row(cell).unwrap_or_default()
    }
}

impl DofMap for TabulatedDofMap {
    fn global_dimension(&self) -> usize {
        self.global_dimension
    }

    fn num_cells(&self) -> usize {
        self.cell_dofs.len()
    }

    fn local_dimension(&self, cell: usize) -> usize {
        self.cell_dofs(cell).len()
    }

    fn max_local_dimension(&self) -> usize {
        self.max_local_dimension
    }

    fn tabulate_dofs(&self, output: &mut [usize], cell: usize) {
        output.copy_from_slice(self.cell_dofs(cell));
    }
}
