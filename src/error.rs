//! Error types reported by mesh construction and assembly.
//!
//! All fallible public operations return [`eyre::Result`]. The typed errors in this module are
//! wrapped in the report and can be recovered with [`eyre::Report::downcast_ref`].
use std::error::Error;
use std::fmt;

/// Configuration errors detected while validating the inputs of an assembly call.
///
/// Every variant is fatal for the call that reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    /// Only scalars, vectors and matrices can be assembled.
    UnsupportedRank { rank: usize },
    /// The rank of the form differs from the rank of the target tensor.
    RankMismatch { form_rank: usize, tensor_rank: usize },
    /// The target tensor was not reinitialized and its shape differs from the shape of the form.
    ShapeMismatch { form_shape: Vec<usize>, tensor_shape: Vec<usize> },
    /// A function space has a different number of cells than the mesh.
    DofMapCellCountMismatch {
        space: usize,
        dofmap_cells: usize,
        mesh_cells: usize,
    },
    /// Sub-domain markers were supplied for the cell integrals.
    CellSubDomainsNotSupported,
    /// The form has cell integrals for sub-domains only, but no default cell integral.
    MissingDefaultCellIntegral,
    /// A mesh function is defined on entities of the wrong dimension.
    MarkerDimensionMismatch { expected: usize, actual: usize },
    /// A mesh function does not hold exactly one value per entity.
    MarkerSizeMismatch {
        dim: usize,
        expected: usize,
        actual: usize,
    },
    /// The facet orientation is not defined on facets.
    FacetOrientationDimension { expected: usize, actual: usize },
    /// The facet orientation names a cell that is not adjacent to the facet.
    InvalidFacetOrientation { facet: usize, cell: usize },
    /// Two cells of the same color share a row degree of freedom.
    ColoringNotDofDisjoint {
        color: usize,
        dof: usize,
        cells: (usize, usize),
    },
    /// The per-cell output buffer does not have one entry per cell.
    CellValuesSizeMismatch { expected: usize, actual: usize },
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use AssemblyError::*;
        match self {
            UnsupportedRank { rank } => write!(f, "Cannot assemble form of rank {rank}, rank must be at most 2"),
            RankMismatch { form_rank, tensor_rank } => write!(
                f,
                "Form of rank {form_rank} cannot be assembled into a tensor of rank {tensor_rank}"
            ),
            ShapeMismatch {
                form_shape,
                tensor_shape,
            } => write!(
                f,
                "Form has shape {form_shape:?}, but the global tensor has shape {tensor_shape:?}"
            ),
            DofMapCellCountMismatch {
                space,
                dofmap_cells,
                mesh_cells,
            } => write!(
                f,
                "Dof map of function space {space} is defined on {dofmap_cells} cells, \
                 but the mesh has {mesh_cells} cells"
            ),
            CellSubDomainsNotSupported => write!(
                f,
                "Sub-domains are not supported by the parallel cell assembly, \
                 only the default cell integral can be assembled"
            ),
            MissingDefaultCellIntegral => write!(f, "Form has cell integrals, but no default cell integral"),
            MarkerDimensionMismatch { expected, actual } => write!(
                f,
                "Expected mesh function on entities of dimension {expected}, got dimension {actual}"
            ),
            MarkerSizeMismatch { dim, expected, actual } => write!(
                f,
                "Mesh function on dimension {dim} has {actual} values, but the mesh has {expected} entities"
            ),
            FacetOrientationDimension { expected, actual } => write!(
                f,
                "Expecting facet orientation to be defined on facets (dimension {expected}), got dimension {actual}"
            ),
            InvalidFacetOrientation { facet, cell } => write!(
                f,
                "Illegal facet orientation for facet {facet}: cell {cell} is not adjacent to the facet"
            ),
            ColoringNotDofDisjoint { color, dof, cells } => write!(
                f,
                "Cells {} and {} of color {color} share the global dof {dof}",
                cells.0, cells.1
            ),
            CellValuesSizeMismatch { expected, actual } => write!(
                f,
                "Per-cell output must have one entry per cell ({expected}), got {actual}"
            ),
        }
    }
}

impl Error for AssemblyError {}

/// Errors detected while building a mesh or computing its connectivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// Only intervals, triangles and tetrahedra are supported.
    UnsupportedCellSize { vertices_per_cell: usize },
    /// The topological dimension of the cells exceeds the geometric dimension.
    TopologicalDimensionTooLarge { topological_dim: usize, geometric_dim: usize },
    VertexOutOfBounds {
        cell: usize,
        vertex: usize,
        num_vertices: usize,
    },
    /// A cell references the same vertex more than once.
    DegenerateCell { cell: usize },
    /// A facet is shared by more than two cells.
    NonManifoldFacet { facet: usize, num_cells: usize },
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use TopologyError::*;
        match self {
            UnsupportedCellSize { vertices_per_cell } => write!(
                f,
                "Cells with {vertices_per_cell} vertices are not supported, expected 2, 3 or 4"
            ),
            TopologicalDimensionTooLarge {
                topological_dim,
                geometric_dim,
            } => write!(
                f,
                "Cells of topological dimension {topological_dim} cannot be embedded in dimension {geometric_dim}"
            ),
            VertexOutOfBounds {
                cell,
                vertex,
                num_vertices,
            } => write!(
                f,
                "Cell {cell} references vertex {vertex}, but the mesh has {num_vertices} vertices"
            ),
            DegenerateCell { cell } => write!(f, "Cell {cell} references the same vertex more than once"),
            NonManifoldFacet { facet, num_cells } => write!(
                f,
                "Facet {facet} is shared by {num_cells} cells, at most 2 are allowed"
            ),
        }
    }
}

impl Error for TopologyError {}

/// Invalid parameters passed to a procedural mesh generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshGenerationError {
    /// The number of subdivisions along some axis is zero.
    ZeroSubdivisions,
    /// The box has zero or negative extent along some axis.
    DegenerateBox,
}

impl fmt::Display for MeshGenerationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MeshGenerationError::ZeroSubdivisions => write!(f, "Number of subdivisions must be at least 1"),
            MeshGenerationError::DegenerateBox => {
                write!(f, "Box corners must satisfy p0 < p1 in every coordinate")
            }
        }
    }
}

impl Error for MeshGenerationError {}
