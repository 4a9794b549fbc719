use super::{assembly_error, dg_space, p1_space};
use crate::{GeometricMatrixKernel, JumpKernel, OnesKernel, ScalarKernel};
use formasm::assembly::local::{CellGeometry, CellKernel};
use formasm::assembly::{Assembler, AssemblyOptions, SubDomains};
use formasm::dofmap::{DofMap, TabulatedDofMap};
use formasm::error::AssemblyError;
use formasm::form::Form;
use formasm::mesh::procedural::{create_unit_interval_mesh, create_unit_square_mesh};
use formasm::mesh::MeshFunction;
use formasm::tensor::{GlobalMatrix, GlobalScalar, GlobalVector};
use nalgebra::{U1, U2};
use std::sync::Arc;

#[test]
fn cell_sub_domains_are_rejected() {
    let mut mesh = create_unit_square_mesh::<f64>(2, 2).unwrap();
    let form: Form<f64, U2> = Form::new(vec![p1_space(&mesh)]).with_cell_integral(OnesKernel);
    let markers = MeshFunction::from_value(2, mesh.num_cells(), Some(1));

    let result = Assembler::default().assemble(
        &mut GlobalVector::new(),
        &form,
        &mut mesh,
        &SubDomains::new().with_cells(&markers),
    );
    assert_eq!(assembly_error(result), AssemblyError::CellSubDomainsNotSupported);

    // Markers without values are ignored
    let empty = MeshFunction::new(2, Vec::new());
    Assembler::default()
        .assemble(
            &mut GlobalVector::new(),
            &form,
            &mut mesh,
            &SubDomains::new().with_cells(&empty),
        )
        .unwrap();
}

#[test]
fn cell_integrals_need_default_kernel() {
    let mut mesh = create_unit_square_mesh::<f64>(1, 1).unwrap();
    let form: Form<f64, U2> = Form::new(vec![]).with_cell_integral_on(1, ScalarKernel);

    let result = Assembler::default().assemble(&mut GlobalScalar::default(), &form, &mut mesh, &SubDomains::new());
    assert_eq!(assembly_error(result), AssemblyError::MissingDefaultCellIntegral);

    let mut values = vec![0.0; 2];
    let result = Assembler::default().assemble_cell_values(&mut values, &form, &mesh);
    assert_eq!(assembly_error(result), AssemblyError::MissingDefaultCellIntegral);
}

#[test]
fn form_and_tensor_must_agree() {
    let mut mesh = create_unit_square_mesh::<f64>(2, 2).unwrap();
    let space = p1_space(&mesh);
    let matrix_form: Form<f64, U2> =
        Form::new(vec![space.clone(), space.clone()]).with_cell_integral(GeometricMatrixKernel);

    let result = Assembler::default().assemble(&mut GlobalVector::new(), &matrix_form, &mut mesh, &SubDomains::new());
    assert_eq!(
        assembly_error(result),
        AssemblyError::RankMismatch {
            form_rank: 2,
            tensor_rank: 1
        }
    );

    let vector_form: Form<f64, U2> = Form::new(vec![space.clone()]).with_cell_integral(OnesKernel);
    let keep_layout = Assembler::new(AssemblyOptions::default().with_reset_sparsity(false));
    let result = keep_layout.assemble(&mut GlobalVector::new(), &vector_form, &mut mesh, &SubDomains::new());
    assert_eq!(
        assembly_error(result),
        AssemblyError::ShapeMismatch {
            form_shape: vec![9],
            tensor_shape: vec![0]
        }
    );

    let tensor_form: Form<f64, U2> = Form::new(vec![space.clone(), space.clone(), space]);
    let result = Assembler::default().assemble(&mut GlobalMatrix::new(), &tensor_form, &mut mesh, &SubDomains::new());
    assert_eq!(assembly_error(result), AssemblyError::UnsupportedRank { rank: 3 });
}

#[test]
fn dof_maps_must_cover_mesh() {
    let mut mesh = create_unit_square_mesh::<f64>(2, 2).unwrap();
    let other_mesh = create_unit_square_mesh::<f64>(1, 1).unwrap();
    let form: Form<f64, U2> = Form::new(vec![p1_space(&mesh), p1_space(&other_mesh)]);

    let result = Assembler::default().assemble(&mut GlobalMatrix::new(), &form, &mut mesh, &SubDomains::new());
    assert_eq!(
        assembly_error(result),
        AssemblyError::DofMapCellCountMismatch {
            space: 1,
            dofmap_cells: 2,
            mesh_cells: 8
        }
    );
}

#[test]
fn cells_of_same_color_must_not_share_row_dofs() {
    let mut mesh = create_unit_interval_mesh::<f64>(4).unwrap();
    // Cells 0 and 2 share no vertex, so they get the same color, but they share dof 0
    let space: Arc<dyn DofMap> =
        Arc::new(TabulatedDofMap::from_cell_dofs(3, vec![vec![0], vec![1], vec![0], vec![2]]).unwrap());
    let form: Form<f64, U1> = Form::new(vec![space]).with_cell_integral(OnesKernel);

    let result = Assembler::default().assemble(&mut GlobalVector::new(), &form, &mut mesh, &SubDomains::new());
    assert_eq!(
        assembly_error(result),
        AssemblyError::ColoringNotDofDisjoint {
            color: 0,
            dof: 0,
            cells: (0, 2)
        }
    );
}

#[test]
fn facet_orientation_must_be_valid() {
    let mut mesh = create_unit_interval_mesh::<f64>(3).unwrap();
    let form: Form<f64, U1> = Form::new(vec![dg_space(&mesh, 1)]).with_interior_facet_integral(JumpKernel);

    mesh.data_mut().facet_orientation = Some(MeshFunction::new(1, vec![0, 1, 2]));
    let result = Assembler::default().assemble(&mut GlobalVector::new(), &form, &mut mesh, &SubDomains::new());
    assert_eq!(
        assembly_error(result),
        AssemblyError::FacetOrientationDimension { expected: 0, actual: 1 }
    );

    mesh.data_mut().facet_orientation = Some(MeshFunction::new(0, vec![0, 2, 1, 2]));
    let result = Assembler::default().assemble(&mut GlobalVector::new(), &form, &mut mesh, &SubDomains::new());
    assert_eq!(
        assembly_error(result),
        AssemblyError::InvalidFacetOrientation { facet: 1, cell: 2 }
    );

    // An empty orientation must still be defined on facets
    mesh.data_mut().facet_orientation = Some(MeshFunction::new(1, Vec::new()));
    let result = Assembler::default().assemble(&mut GlobalVector::new(), &form, &mut mesh, &SubDomains::new());
    assert_eq!(
        assembly_error(result),
        AssemblyError::FacetOrientationDimension { expected: 0, actual: 1 }
    );

    // and is otherwise the same as none at all
    mesh.data_mut().facet_orientation = Some(MeshFunction::new(0, Vec::new()));
    Assembler::default()
        .assemble(&mut GlobalVector::new(), &form, &mut mesh, &SubDomains::new())
        .unwrap();
}

#[test]
fn facet_markers_must_match_facets() {
    let mut mesh = create_unit_interval_mesh::<f64>(3).unwrap();
    let form: Form<f64, U1> = Form::new(vec![dg_space(&mesh, 1)]).with_interior_facet_integral(JumpKernel);

    let wrong_dim = MeshFunction::from_value(1, 3, None);
    let result = Assembler::default().assemble(
        &mut GlobalVector::new(),
        &form,
        &mut mesh,
        &SubDomains::new().with_interior_facets(&wrong_dim),
    );
    assert_eq!(
        assembly_error(result),
        AssemblyError::MarkerDimensionMismatch { expected: 0, actual: 1 }
    );

    let wrong_len = MeshFunction::from_value(0, 3, None);
    let result = Assembler::default().assemble(
        &mut GlobalVector::new(),
        &form,
        &mut mesh,
        &SubDomains::new().with_interior_facets(&wrong_len),
    );
    assert_eq!(
        assembly_error(result),
        AssemblyError::MarkerSizeMismatch {
            dim: 0,
            expected: 4,
            actual: 3
        }
    );
}

#[test]
fn cell_values_need_scalar_form_and_one_value_per_cell() {
    let mesh = create_unit_square_mesh::<f64>(2, 2).unwrap();
    let scalar_form: Form<f64, U2> = Form::new(vec![]).with_cell_integral(ScalarKernel);
    let vector_form: Form<f64, U2> = Form::new(vec![p1_space(&mesh)]).with_cell_integral(OnesKernel);

    let mut values = vec![0.0; mesh.num_cells() - 1];
    let result = Assembler::default().assemble_cell_values(&mut values, &scalar_form, &mesh);
    assert_eq!(
        assembly_error(result),
        AssemblyError::CellValuesSizeMismatch { expected: 8, actual: 7 }
    );

    let mut values = vec![0.0; mesh.num_cells()];
    let result = Assembler::default().assemble_cell_values(&mut values, &vector_form, &mesh);
    assert_eq!(
        assembly_error(result),
        AssemblyError::RankMismatch {
            form_rank: 1,
            tensor_rank: 0
        }
    );
}

struct FailingKernel;

impl CellKernel<f64, U2> for FailingKernel {
    fn tabulate_tensor(&self, _: &mut [f64], _: &[Vec<f64>], cell: &CellGeometry<f64, U2>) -> eyre::Result<()> {
        if cell.index() == 5 {
            eyre::bail!("Kernel failure");
        }
        Ok(())
    }
}

#[test]
fn kernel_errors_are_propagated() {
    let mut mesh = create_unit_square_mesh::<f64>(2, 2).unwrap();
    let form: Form<f64, U2> = Form::new(vec![p1_space(&mesh)]).with_cell_integral(FailingKernel);

    for num_threads in [1, 4] {
        let result = Assembler::new(AssemblyOptions::default().with_num_threads(num_threads)).assemble(
            &mut GlobalVector::new(),
            &form,
            &mut mesh,
            &SubDomains::new(),
        );
        let err = result.unwrap_err();
        assert_eq!(err.root_cause().to_string(), "Kernel failure");
        assert!(err.to_string().contains("cell 5"));
    }
}
