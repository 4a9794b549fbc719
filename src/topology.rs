//! Derived mesh connectivity: facets, facet-cell incidence and cell colorings.
use crate::error::{AssemblyError, TopologyError};
use formasm_adjacency::Adjacency;
use formasm_paradis::coloring::sequential_greedy_coloring;
use formasm_paradis::DisjointSubsets;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Facets of a simplicial mesh together with their incidence to cells.
///
/// Facets are numbered in order of first appearance when visiting the local facets of each cell
/// in turn. For meshes of intervals the facets are the vertices themselves, and facet `i` is
/// vertex `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetTopology {
    facet_vertices: Adjacency,
    // Row c holds the facets of cell c, ordered by local facet index
    cell_facets: Adjacency,
    facet_cells: Adjacency,
}

// Large enough for the facets of tetrahedra
type FacetKey = [usize; 3];

fn facet_key(cell_vertices: &[usize], local_facet: usize) -> FacetKey {
    let mut key = [usize::MAX; 3];
    let opposite = cell_vertices.iter().enumerate().filter(|(i, _)| *i != local_facet);
    for (slot, (_, &v)) in key.iter_mut().zip(opposite) {
        *slot = v;
    }
    key
}

impl FacetTopology {
    /// Computes the facets of the given cells.
    ///
    /// Each cell must list its vertices in increasing order, and all cells must have
    /// `topological_dim + 1` vertices.
    pub fn compute(cells: &Adjacency, num_vertices: usize, topological_dim: usize) -> Result<Self, TopologyError> {
        let vertices_per_cell = topological_dim + 1;
        if !(2..=4).contains(&vertices_per_cell) {
            return Err(TopologyError::UnsupportedCellSize { vertices_per_cell });
        }

        let mut facet_indices = FxHashMap::default();
        let mut facet_vertices = Adjacency::new();
        if topological_dim == 1 {
            for v in 0..num_vertices {
                facet_indices.insert([v, usize::MAX, usize::MAX], v);
                facet_vertices.push(&[v]);
            }
        }

        let mut cell_facets = Adjacency::new();
        for cell_vertices in cells.iter() {
            let mut row = cell_facets.begin_row();
            for local_facet in 0..cell_vertices.len() {
                let key = facet_key(cell_vertices, local_facet);
                let next_index = facet_vertices.len();
                let facet = *facet_indices.entry(key).or_insert(next_index);
                if facet == next_index {
                    facet_vertices.push(&key[..topological_dim]);
                }
                row.push_single(facet);
            }
        }

        let facet_cells = cell_facets.transpose(facet_vertices.len());
        if let Some((facet, adjacent)) = facet_cells
            .iter()
            .enumerate()
            .find(|(_, adjacent)| adjacent.len() > 2)
        {
            return Err(TopologyError::NonManifoldFacet {
                facet,
                num_cells: adjacent.len(),
            });
        }

        Ok(Self {
            facet_vertices,
            cell_facets,
            facet_cells,
        })
    }

    pub fn num_facets(&self) -> usize {
        self.facet_vertices.len()
    }

    /// The sorted vertex indices of the given facet.
    pub fn facet_vertices(&self, facet: usize) -> &[usize] {
        self.facet_vertices.row(facet).unwrap_or_default()
    }

    /// The facets of the given cell, ordered by local facet index.
    pub fn cell_facets(&self, cell: usize) -> &[usize] {
        self.cell_facets.row(cell).unwrap_or_default()
    }

    /// The cells adjacent to the given facet, in increasing order.
    pub fn facet_cells(&self, facet: usize) -> &[usize] {
        self.facet_cells.row(facet).unwrap_or_default()
    }

    pub fn is_interior(&self, facet: usize) -> bool {
        self.facet_cells(facet).len() == 2
    }

    pub fn is_exterior(&self, facet: usize) -> bool {
        self.facet_cells(facet).len() == 1
    }

    /// The local index of `facet` within `cell`, or `None` if the facet does not belong to the cell.
    pub fn local_facet_index(&self, cell: usize, facet: usize) -> Option<usize> {
        self.cell_facets(cell).iter().position(|&f| f == facet)
    }

    /// The two cells adjacent to an interior facet, or `None` if the facet is not interior.
    ///
    /// If `first` is given, it determines the cell that comes first in the returned pair, and it
    /// must be one of the two adjacent cells. Otherwise the cells are returned in increasing order.
    pub fn ordered_cells(&self, facet: usize, first: Option<usize>) -> Result<Option<(usize, usize)>, AssemblyError> {
        let (c0, c1) = match self.facet_cells(facet) {
            &[c0, c1] => (c0, c1),
            _ => return Ok(None),
        };
        match first {
            None => Ok(Some((c0, c1))),
            Some(cell) if cell == c0 => Ok(Some((c0, c1))),
            Some(cell) if cell == c1 => Ok(Some((c1, c0))),
            Some(cell) => Err(AssemblyError::InvalidFacetOrientation { facet, cell }),
        }
    }
}

/// A partition of the cells of a mesh into colors, such that no two cells of the same color
/// share a vertex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellColoring {
    colors: Vec<DisjointSubsets>,
}

impl CellColoring {
    /// Greedily colors cells given their cell-to-vertex connectivity.
    ///
    /// Each color class is stored as disjoint subsets of vertices, labeled by cell index.
    pub fn compute(cells: &Adjacency) -> Self {
        Self {
            colors: sequential_greedy_coloring(cells),
        }
    }

    pub fn num_colors(&self) -> usize {
        self.colors.len()
    }

    /// The cells of the given color, in increasing order.
    ///
    /// # Panics
    ///
    /// Panics if the color index is out of bounds.
    pub fn cells_of_color(&self, color: usize) -> &[usize] {
        self.colors[color].labels()
    }

    pub fn color_classes(&self) -> &[DisjointSubsets] {
        &self.colors
    }

    pub fn num_cells(&self) -> usize {
        self.colors.iter().map(DisjointSubsets::len).sum()
    }
}
