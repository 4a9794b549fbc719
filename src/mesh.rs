use crate::error::TopologyError;
use crate::topology::{CellColoring, FacetTopology};
use formasm_adjacency::Adjacency;
use formasm_traits::allocators::GeometryAllocator;
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName, OPoint, Scalar};
use serde::{Deserialize, Serialize};

pub mod procedural;

/// Index-based simplicial mesh (intervals, triangles or tetrahedra) embedded in `D` dimensions.
///
/// The vertex indices of every cell are stored in increasing order. With this convention, local
/// facet `i` of a cell is the facet opposite local vertex `i`, and two cells sharing a facet agree
/// on the order of the facet's vertices.
///
/// Facet connectivity and the cell coloring are derived data. They are not computed implicitly:
/// call [`Mesh::init_facets`] and [`Mesh::init_cell_coloring`] before querying them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct Mesh<T: Scalar, D>
where
    D: DimName,
    DefaultAllocator: GeometryAllocator<T, D>,
{
    #[serde(bound(
        serialize = "<DefaultAllocator as Allocator<T, D>>::Buffer: Serialize",
        deserialize = "<DefaultAllocator as Allocator<T, D>>::Buffer: Deserialize<'de>"
    ))]
    vertices: Vec<OPoint<T, D>>,
    cells: Adjacency,
    topological_dim: usize,
    data: MeshData,
    #[serde(skip)]
    facets: Option<FacetTopology>,
    #[serde(skip)]
    cell_coloring: Option<CellColoring>,
}

impl<T, D> Mesh<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: GeometryAllocator<T, D>,
{
    /// Construct a mesh from vertices and cells with `N` vertices each.
    ///
    /// The vertex indices of each cell are sorted. Cells must reference distinct, in-bounds
    /// vertices, and `N - 1` must not exceed the geometric dimension `D`.
    pub fn try_from_vertices_and_cells<const N: usize>(
        vertices: Vec<OPoint<T, D>>,
        cells: Vec<[usize; N]>,
    ) -> Result<Self, TopologyError> {
        if !(2..=4).contains(&N) {
            return Err(TopologyError::UnsupportedCellSize { vertices_per_cell: N });
        }
        let topological_dim = N - 1;
        if topological_dim > D::dim() {
            return Err(TopologyError::TopologicalDimensionTooLarge {
                topological_dim,
                geometric_dim: D::dim(),
            });
        }

        let num_vertices = vertices.len();
        let mut indices = Vec::with_capacity(N * cells.len());
        for (cell_index, mut cell) in cells.into_iter().enumerate() {
            cell.sort_unstable();
            if let Some(&vertex) = cell.iter().find(|&&v| v >= num_vertices) {
                return Err(TopologyError::VertexOutOfBounds {
                    cell: cell_index,
                    vertex,
                    num_vertices,
                });
            }
            if cell.windows(2).any(|pair| pair[0] == pair[1]) {
                return Err(TopologyError::DegenerateCell { cell: cell_index });
            }
            indices.extend_from_slice(&cell);
        }

        Ok(Self {
            vertices,
            cells: Adjacency::from_uniform_rows(N, indices),
            topological_dim,
            data: MeshData::default(),
            facets: None,
            cell_coloring: None,
        })
    }

    pub fn vertices(&self) -> &[OPoint<T, D>] {
        &self.vertices
    }

    /// Cell-to-vertex connectivity.
    pub fn cells(&self) -> &Adjacency {
        &self.cells
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn topological_dim(&self) -> usize {
        self.topological_dim
    }

    pub fn geometric_dim(&self) -> usize {
        D::dim()
    }

    /// The (sorted) vertex indices of the given cell.
    ///
    /// # Panics
    ///
    /// Panics if the cell index is out of bounds.
    pub fn cell_vertices(&self, cell: usize) -> &[usize] {
        let n = self.topological_dim + 1;
        &self.cells.indices()[n * cell..n * (cell + 1)]
    }

    /// The number of entities of the given dimension, if known.
    ///
    /// Facets (dimension `D - 1` for `D > 1`) are only counted once [`Mesh::init_facets`] has been
    /// called.
    pub fn entity_count(&self, dim: usize) -> Option<usize> {
        if dim == self.topological_dim {
            Some(self.num_cells())
        } else if dim == 0 {
            Some(self.num_vertices())
        } else if dim + 1 == self.topological_dim {
            self.facets.as_ref().map(FacetTopology::num_facets)
        } else {
            None
        }
    }

    pub fn data(&self) -> &MeshData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut MeshData {
        &mut self.data
    }

    /// Computes facets and facet-cell incidence, unless they are already available.
    pub fn init_facets(&mut self) -> eyre::Result<&FacetTopology> {
        let facets = match self.facets.take() {
            Some(facets) => facets,
            None => FacetTopology::compute(&self.cells, self.num_vertices(), self.topological_dim)?,
        };
        Ok(self.facets.insert(facets))
    }

    pub fn facets(&self) -> Option<&FacetTopology> {
        self.facets.as_ref()
    }

    /// Computes the vertex-based cell coloring, unless it is already available.
    pub fn init_cell_coloring(&mut self) -> &CellColoring {
        let cells = &self.cells;
        self.cell_coloring
            .get_or_insert_with(|| CellColoring::compute(cells))
    }

    pub fn cell_coloring(&self) -> Option<&CellColoring> {
        self.cell_coloring.as_ref()
    }
}

/// Values attached to the mesh entities of a single topological dimension.
///
/// A mesh function without values is treated as if it had not been supplied at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshFunction<V> {
    dim: usize,
    values: Vec<V>,
}

/// Sub-domain labels of mesh entities. Entities labeled `None` are unmarked.
pub type SubDomainMarkers = MeshFunction<Option<usize>>;

impl<V> MeshFunction<V> {
    pub fn new(dim: usize, values: Vec<V>) -> Self {
        Self { dim, values }
    }

    pub fn from_value(dim: usize, num_entities: usize, value: V) -> Self
    where
        V: Clone,
    {
        Self::new(dim, vec![value; num_entities])
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn values(&self) -> &[V] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [V] {
        &mut self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, entity: usize) -> Option<&V> {
        self.values.get(entity)
    }

    pub fn set(&mut self, entity: usize, value: V) {
        self.values[entity] = value;
    }
}

/// Auxiliary mesh functions stored alongside the mesh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshData {
    /// Sub-domain labels of exterior facets.
    pub exterior_facet_domains: Option<SubDomainMarkers>,
    /// Facets flagged `false` are not treated as exterior, even if they only have one adjacent cell.
    pub exterior_facets: Option<MeshFunction<bool>>,
    /// For each interior facet, the adjacent cell that comes first in interior facet integrals.
    pub facet_orientation: Option<MeshFunction<usize>>,
}
