use formasm::error::{AssemblyError, TopologyError};
use formasm::mesh::procedural::{create_unit_cube_mesh, create_unit_interval_mesh, create_unit_square_mesh};
use formasm::mesh::Mesh;
use formasm::topology::{CellColoring, FacetTopology};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Checks that local facet `i` of every cell consists of the cell vertices other than vertex `i`.
fn assert_local_facets_are_opposite_vertices(cells: &formasm::adjacency::Adjacency, facets: &FacetTopology) {
    for (cell, vertices) in cells.iter().enumerate() {
        for (local_facet, &facet) in facets.cell_facets(cell).iter().enumerate() {
            let expected: Vec<_> = vertices
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != local_facet)
                .map(|(_, &v)| v)
                .collect();
            assert_eq!(facets.facet_vertices(facet), expected.as_slice());
            assert_eq!(facets.local_facet_index(cell, facet), Some(local_facet));
            assert!(facets.facet_cells(facet).contains(&cell));
        }
    }
}

#[test]
fn unit_square_facets() {
    let mut mesh = create_unit_square_mesh::<f64>(1, 1).unwrap();
    let cells = mesh.cells().clone();
    let facets = mesh.init_facets().unwrap();

    assert_eq!(facets.num_facets(), 5);
    let interior: Vec<_> = (0..5).filter(|&f| facets.is_interior(f)).collect();
    assert_eq!(interior.len(), 1);
    assert_eq!(facets.facet_cells(interior[0]), &[0, 1]);
    assert_eq!(facets.facet_vertices(interior[0]), &[0, 3]);
    assert_eq!((0..5).filter(|&f| facets.is_exterior(f)).count(), 4);

    assert_local_facets_are_opposite_vertices(&cells, facets);
}

#[test]
fn unit_cube_facets() {
    let mut mesh = create_unit_cube_mesh::<f64>(1, 1, 1).unwrap();
    let cells = mesh.cells().clone();
    let facets = mesh.init_facets().unwrap();

    assert_eq!(facets.num_facets(), 18);
    assert_eq!((0..18).filter(|&f| facets.is_interior(f)).count(), 6);
    assert_eq!((0..18).filter(|&f| facets.is_exterior(f)).count(), 12);
    assert_local_facets_are_opposite_vertices(&cells, facets);
}

#[test]
fn interval_facets_are_vertices() {
    let mut mesh = create_unit_interval_mesh::<f64>(3).unwrap();
    let facets = mesh.init_facets().unwrap();

    assert_eq!(facets.num_facets(), 4);
    for v in 0..4 {
        assert_eq!(facets.facet_vertices(v), &[v]);
    }
    assert_eq!(facets.facet_cells(0), &[0]);
    assert_eq!(facets.facet_cells(1), &[0, 1]);
    assert_eq!(facets.facet_cells(2), &[1, 2]);
    assert_eq!(facets.facet_cells(3), &[2]);
    assert_eq!(facets.cell_facets(1), &[2, 1]);
}

#[test]
fn facets_shared_by_more_than_two_cells_are_rejected() {
    let vertices = vec![
        nalgebra::Point3::new(0.0, 0.0, 0.0),
        nalgebra::Point3::new(1.0, 0.0, 0.0),
        nalgebra::Point3::new(0.0, 1.0, 0.0),
        nalgebra::Point3::new(0.0, -1.0, 0.0),
        nalgebra::Point3::new(0.0, 0.0, 1.0),
    ];
    let cells = vec![[0, 1, 2], [0, 1, 3], [0, 1, 4]];
    let mut mesh = Mesh::try_from_vertices_and_cells(vertices, cells).unwrap();

    let err = mesh.init_facets().unwrap_err();
    assert_eq!(
        err.downcast_ref::<TopologyError>(),
        Some(&TopologyError::NonManifoldFacet { facet: 2, num_cells: 3 })
    );
}

#[test]
fn ordered_cells_respects_orientation() {
    let mut mesh = create_unit_interval_mesh::<f64>(2).unwrap();
    let facets = mesh.init_facets().unwrap();

    assert_eq!(facets.ordered_cells(1, None), Ok(Some((0, 1))));
    assert_eq!(facets.ordered_cells(1, Some(0)), Ok(Some((0, 1))));
    assert_eq!(facets.ordered_cells(1, Some(1)), Ok(Some((1, 0))));
    assert_eq!(
        facets.ordered_cells(1, Some(5)),
        Err(AssemblyError::InvalidFacetOrientation { facet: 1, cell: 5 })
    );
    assert_eq!(facets.ordered_cells(0, None), Ok(None));
}

fn assert_valid_coloring(cells: &formasm::adjacency::Adjacency, coloring: &CellColoring) {
    let mut colored = vec![0; cells.len()];
    for color in 0..coloring.num_colors() {
        let color_cells = coloring.cells_of_color(color);
        assert!(!color_cells.is_empty());
        assert!(color_cells.windows(2).all(|pair| pair[0] < pair[1]));

        let mut vertices = BTreeSet::new();
        for &cell in color_cells {
            colored[cell] += 1;
            for &v in cells.row(cell).unwrap() {
                assert!(vertices.insert(v), "Vertex {v} is shared by two cells of color {color}");
            }
        }
    }
    assert!(colored.iter().all(|&count| count == 1));
    assert_eq!(coloring.num_cells(), cells.len());
}

#[test]
fn unit_cube_coloring_is_vertex_disjoint() {
    let mesh = create_unit_cube_mesh::<f64>(2, 2, 2).unwrap();
    let coloring = CellColoring::compute(mesh.cells());
    assert_valid_coloring(mesh.cells(), &coloring);
    // All tetrahedra of a cube share its diagonal
    assert!(coloring.num_colors() >= 6);
}

proptest! {
    #[test]
    fn unit_square_coloring_is_vertex_disjoint(nx in 1..6usize, ny in 1..6usize) {
        let mut mesh = create_unit_square_mesh::<f64>(nx, ny).unwrap();
        let cells = mesh.cells().clone();
        let coloring = mesh.init_cell_coloring();
        assert_valid_coloring(&cells, coloring);
    }
}
