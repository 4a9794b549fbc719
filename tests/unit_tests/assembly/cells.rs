use super::{assembler, p1_space};
use crate::{reference_matrix, reference_vector, GeometricMatrixKernel, LoadKernel, ScalarKernel};
use formasm::assembly::local::{CellGeometry, CellKernel};
use formasm::assembly::{Assembler, AssemblyOptions, SubDomains};
use formasm::dofmap::{DofMap, TabulatedDofMap};
use formasm::form::{Coefficient, Constant, Form};
use formasm::mesh::procedural::{create_unit_cube_mesh, create_unit_square_mesh};
use formasm::mesh::Mesh;
use formasm::tensor::{GlobalMatrix, GlobalScalar, GlobalVector};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector, U2, U3};
use nalgebra_sparse::CsrMatrix;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

fn assemble_matrix(mesh: &mut Mesh<f64, U3>, num_threads: usize) -> CsrMatrix<f64> {
    let space = p1_space(mesh);
    let form: Form<f64, U3> = Form::new(vec![space.clone(), space]).with_cell_integral(GeometricMatrixKernel);
    let mut matrix = GlobalMatrix::<f64>::new();
    assembler(num_threads)
        .assemble(&mut matrix, &form, mesh, &SubDomains::new())
        .unwrap();
    matrix.into_csr()
}

#[test]
fn matrix_assembly_is_independent_of_thread_count() {
    let mut mesh = create_unit_cube_mesh::<f64>(4, 4, 4).unwrap();
    let coloring = mesh.init_cell_coloring();
    let largest_color = (0..coloring.num_colors())
        .map(|color| coloring.cells_of_color(color).len())
        .max()
        .unwrap();
    assert!(largest_color > 1);

    let serial = assemble_matrix(&mut mesh, 1);
    let parallel = assemble_matrix(&mut mesh, 4);
    assert_eq!(serial, parallel);

    let repeated = assemble_matrix(&mut mesh, 4);
    assert_eq!(parallel, repeated);
}

#[test]
fn matrix_assembly_matches_serial_reference() {
    let mut mesh = create_unit_cube_mesh::<f64>(2, 2, 2).unwrap();
    let dofmap = TabulatedDofMap::lagrange_p1(&mesh, 1);
    let expected = reference_matrix(&mesh, &dofmap, &GeometricMatrixKernel, &[]);

    for num_threads in [1, 3, 8] {
        let matrix = assemble_matrix(&mut mesh, num_threads);
        assert_eq!(matrix.nrows(), 27);
        assert_matrix_eq!(DMatrix::from(&matrix), expected, comp = abs, tol = 1e-10);
    }
}

#[test]
fn vector_assembly_matches_serial_reference() {
    let mut mesh = create_unit_square_mesh::<f64>(4, 4).unwrap();
    let dofmap = TabulatedDofMap::lagrange_p1(&mesh, 1);
    let expected = reference_vector(&mesh, &dofmap, &LoadKernel, &[vec![2.0]]);

    let space: Arc<dyn DofMap> = Arc::new(dofmap);
    let form: Form<f64, U2> = Form::new(vec![space])
        .with_coefficient(Arc::new(Constant::scalar(2.0)))
        .with_cell_integral(LoadKernel);

    let mut serial = GlobalVector::<f64>::new();
    let mut parallel = GlobalVector::<f64>::new();
    assembler(1)
        .assemble(&mut serial, &form, &mut mesh, &SubDomains::new())
        .unwrap();
    assembler(4)
        .assemble(&mut parallel, &form, &mut mesh, &SubDomains::new())
        .unwrap();

    assert_eq!(serial, parallel);
    assert_matrix_eq!(serial.as_vector().clone(), expected, comp = abs, tol = 1e-10);
}

#[test]
fn scalar_assembly_equals_sum_of_cell_values() {
    let mut mesh = create_unit_cube_mesh::<f64>(2, 2, 2).unwrap();
    let coefficient = Constant::from_values(vec![0.5, 0.25]);
    let coefficients = vec![coefficient.values().to_vec()];
    let form: Form<f64, U3> = Form::new(vec![])
        .with_coefficient(Arc::new(coefficient))
        .with_cell_integral(ScalarKernel);

    let mut cell_values = vec![0.0; mesh.num_cells()];
    assembler(4)
        .assemble_cell_values(&mut cell_values, &form, &mesh)
        .unwrap();
    for (cell, &value) in cell_values.iter().enumerate() {
        let mut expected = [0.0];
        ScalarKernel
            .tabulate_tensor(&mut expected, &coefficients, &CellGeometry::new(&mesh, cell))
            .unwrap();
        assert_eq!(value, expected[0]);
    }

    let mut scalar = GlobalScalar::new(100.0);
    assembler(4)
        .assemble(&mut scalar, &form, &mut mesh, &SubDomains::new())
        .unwrap();
    let sum: f64 = cell_values.iter().sum();
    assert_scalar_eq!(scalar.value(), sum, comp = abs, tol = 1e-10);
}

#[test]
fn reassembly_adds_or_replaces_values() {
    let mut mesh = create_unit_square_mesh::<f64>(3, 3).unwrap();
    let space = p1_space(&mesh);
    let form: Form<f64, U2> = Form::new(vec![space.clone(), space]).with_cell_integral(GeometricMatrixKernel);

    let mut matrix = GlobalMatrix::<f64>::new();
    Assembler::default()
        .assemble(&mut matrix, &form, &mut mesh, &SubDomains::new())
        .unwrap();
    let once = matrix.clone();

    let keep_layout = AssemblyOptions::default().with_reset_sparsity(false);
    Assembler::new(keep_layout.with_add_values(true))
        .assemble(&mut matrix, &form, &mut mesh, &SubDomains::new())
        .unwrap();
    assert_eq!(matrix.as_csr().pattern(), once.as_csr().pattern());
    assert_matrix_eq!(
        DMatrix::from(matrix.as_csr()),
        2.0 * DMatrix::from(once.as_csr()),
        comp = abs,
        tol = 1e-10
    );

    Assembler::new(keep_layout)
        .assemble(&mut matrix, &form, &mut mesh, &SubDomains::new())
        .unwrap();
    assert_eq!(matrix, once);
}

#[test]
fn entries_outside_existing_pattern_are_merged() {
    let mut mesh = create_unit_square_mesh::<f64>(3, 2).unwrap();
    let dofmap = TabulatedDofMap::lagrange_p1(&mesh, 1);
    let expected = reference_matrix(&mesh, &dofmap, &GeometricMatrixKernel, &[]);
    let space: Arc<dyn DofMap> = Arc::new(dofmap);
    let form: Form<f64, U2> = Form::new(vec![space.clone(), space]).with_cell_integral(GeometricMatrixKernel);

    // Only the diagonal is in the pattern of the existing matrix
    let mut matrix = GlobalMatrix::from(CsrMatrix::<f64>::identity(mesh.num_vertices()));
    let options = AssemblyOptions::default()
        .with_reset_sparsity(false)
        .with_num_threads(4);
    Assembler::new(options)
        .assemble(&mut matrix, &form, &mut mesh, &SubDomains::new())
        .unwrap();

    assert_eq!(matrix.num_pending(), 0);
    assert_matrix_eq!(DMatrix::from(matrix.as_csr()), expected, comp = abs, tol = 1e-10);
}

#[test]
fn form_without_integrals_gives_zero_tensor() {
    let mut mesh = create_unit_square_mesh::<f64>(2, 2).unwrap();
    let form: Form<f64, U2> = Form::new(vec![p1_space(&mesh)]);

    let mut vector = GlobalVector::from(DVector::repeat(3, 1.0));
    Assembler::default()
        .assemble(&mut vector, &form, &mut mesh, &SubDomains::new())
        .unwrap();
    assert_eq!(vector.into_vector(), DVector::zeros(9));
    assert!(mesh.cell_coloring().is_none());
    assert!(mesh.facets().is_none());

    let mut cell_values = vec![1.0; mesh.num_cells()];
    let scalar_form: Form<f64, U2> = Form::new(vec![]);
    Assembler::default()
        .assemble_cell_values(&mut cell_values, &scalar_form, &mesh)
        .unwrap();
    assert!(cell_values.iter().all(|&value| value == 1.0));
}

/// Scalar coefficient counting how it is accessed.
#[derive(Default)]
struct CountingCoefficient {
    gathered: AtomicBool,
    num_gathers: AtomicUsize,
    num_restricts: AtomicUsize,
    num_restricts_before_gather: AtomicUsize,
    fail_gather: bool,
}

impl Coefficient<f64> for CountingCoefficient {
    fn local_dimension(&self, _cell: usize) -> usize {
        1
    }

    fn restrict(&self, output: &mut [f64], _cell: usize) -> eyre::Result<()> {
        if !self.gathered.load(Ordering::SeqCst) {
            self.num_restricts_before_gather.fetch_add(1, Ordering::SeqCst);
        }
        self.num_restricts.fetch_add(1, Ordering::SeqCst);
        output[0] = 1.0;
        Ok(())
    }

    fn gather(&self) -> eyre::Result<()> {
        self.num_gathers.fetch_add(1, Ordering::SeqCst);
        if self.fail_gather {
            eyre::bail!("Gather failure");
        }
        self.gathered.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Rank 1 cell kernel counting its invocations.
#[derive(Clone, Default)]
struct CountingKernel {
    calls: Arc<AtomicUsize>,
}

impl CellKernel<f64, U3> for CountingKernel {
    fn tabulate_tensor(&self, output: &mut [f64], coefficients: &[Vec<f64>], _: &CellGeometry<f64, U3>) -> eyre::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        output.fill(coefficients[0][0]);
        Ok(())
    }
}

#[test]
fn coefficients_are_gathered_once_before_kernels_run() {
    let mut mesh = create_unit_cube_mesh::<f64>(4, 4, 4).unwrap();
    let space: Arc<dyn DofMap> = Arc::new(TabulatedDofMap::lagrange_p1(&mesh, 3));
    let coefficient = Arc::new(CountingCoefficient::default());
    let kernel = CountingKernel::default();
    let form: Form<f64, U3> = Form::new(vec![space.clone(), space])
        .with_coefficient(coefficient.clone())
        .with_cell_integral(kernel.clone());

    let mut serial = GlobalMatrix::<f64>::new();
    assembler(1)
        .assemble(&mut serial, &form, &mut mesh, &SubDomains::new())
        .unwrap();
    assert_eq!(coefficient.num_gathers.load(Ordering::SeqCst), 1);

    for call in 2..=4 {
        coefficient.gathered.store(false, Ordering::SeqCst);
        let mut parallel = GlobalMatrix::<f64>::new();
        assembler(8)
            .assemble(&mut parallel, &form, &mut mesh, &SubDomains::new())
            .unwrap();
        assert_eq!(coefficient.num_gathers.load(Ordering::SeqCst), call);
        assert_eq!(parallel.as_csr(), serial.as_csr());
    }

    assert_eq!(coefficient.num_restricts_before_gather.load(Ordering::SeqCst), 0);
    assert_eq!(coefficient.num_restricts.load(Ordering::SeqCst), 4 * mesh.num_cells());
    assert_eq!(kernel.calls.load(Ordering::SeqCst), 4 * mesh.num_cells());
}

#[test]
fn gather_failure_stops_assembly_before_kernels_run() {
    let mut mesh = create_unit_cube_mesh::<f64>(2, 2, 2).unwrap();
    let coefficient = Arc::new(CountingCoefficient {
        fail_gather: true,
        ..Default::default()
    });
    let kernel = CountingKernel::default();
    let form: Form<f64, U3> = Form::new(vec![p1_space(&mesh)])
        .with_coefficient(coefficient.clone())
        .with_cell_integral(kernel.clone());

    let err = assembler(4)
        .assemble(&mut GlobalVector::new(), &form, &mut mesh, &SubDomains::new())
        .unwrap_err();
    assert_eq!(err.root_cause().to_string(), "Gather failure");
    assert_eq!(coefficient.num_gathers.load(Ordering::SeqCst), 1);
    assert_eq!(coefficient.num_restricts.load(Ordering::SeqCst), 0);
    assert_eq!(kernel.calls.load(Ordering::SeqCst), 0);
}
