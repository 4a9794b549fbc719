//! The assembly passes over cells, exterior facets and interior facets.
use crate::assembly::buffers::LocalAssemblyContext;
use crate::assembly::local::{CellGeometry, CellKernel};
use crate::error::AssemblyError;
use crate::form::Form;
use crate::mesh::{Mesh, MeshFunction, SubDomainMarkers};
use crate::tensor::{GlobalTensor, ScatterTarget};
use crate::topology::{CellColoring, FacetTopology};
use crate::Real;
use eyre::{eyre, WrapErr};
use formasm_adjacency::Adjacency;
use formasm_paradis::DisjointSubsets;
use formasm_traits::allocators::GeometryAllocator;
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName, Scalar};
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator, ParallelIterator};
use std::cell::RefCell;
use thread_local::ThreadLocal;

/// Computes the local tensor of a cell into the context.
fn compute_cell_tensor<T, D>(
    context: &mut LocalAssemblyContext<T>,
    kernel: &dyn CellKernel<T, D>,
    form: &Form<T, D>,
    mesh: &Mesh<T, D>,
    cell: usize,
) -> eyre::Result<()>
where
    T: Real,
    D: DimName,
    DefaultAllocator: GeometryAllocator<T, D>,
{
    context.update_cell(form, cell)?;
    let geometry = CellGeometry::new(mesh, cell);
    kernel
        .tabulate_tensor(&mut context.element_tensor, &context.coefficients, &geometry)
        .wrap_err_with(|| format!("Cell integral failed on cell {cell}"))
}

/// Adds a local tensor to the global tensor.
fn add_to_tensor<T, Tensor>(tensor: &mut Tensor, values: &[T], dofs: &[Vec<usize>])
where
    T: Scalar,
    Tensor: ?Sized + GlobalTensor<T>,
{
    match dofs {
        [] => tensor.add(values, &[]),
        [rows] => tensor.add(values, &[rows.as_slice()]),
        [rows, cols] => tensor.add(values, &[rows.as_slice(), cols.as_slice()]),
        _ => {
            let dofs: Vec<_> = dofs.iter().map(Vec::as_slice).collect();
            tensor.add(values, &dofs)
        }
    }
}

/// Collects the row dofs of the given cells of one color as disjoint subsets labeled by cell.
fn row_dof_subsets<T, D>(form: &Form<T, D>, cells: &[usize], color: usize) -> eyre::Result<DisjointSubsets>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: GeometryAllocator<T, D>,
{
    let space = form
        .function_spaces()
        .first()
        .ok_or_else(|| eyre!("Row dofs are only defined for forms of rank 1 or 2"))?;
    let mut rows = Adjacency::new();
    let mut dofs = Vec::new();
    for &cell in cells {
        dofs.resize(space.local_dimension(cell), 0);
        space.tabulate_dofs(&mut dofs, cell);
        rows.push(&dofs);
    }
    DisjointSubsets::try_from_disjoint_subsets(rows, cells.to_vec()).map_err(|err| {
        AssemblyError::ColoringNotDofDisjoint {
            color,
            dof: err.index,
            cells: err.labels,
        }
        .into()
    })
}

/// Assembles the cell integral one color at a time, processing the cells of each color in
/// parallel on the current rayon thread pool.
///
/// Returns the number of assembled cells.
pub(crate) fn assemble_cells<T, D, Tensor>(
    tensor: &mut Tensor,
    kernel: &dyn CellKernel<T, D>,
    form: &Form<T, D>,
    mesh: &Mesh<T, D>,
    coloring: &CellColoring,
) -> eyre::Result<usize>
where
    T: Real,
    D: DimName,
    Tensor: ?Sized + GlobalTensor<T>,
    DefaultAllocator: GeometryAllocator<T, D>,
    <DefaultAllocator as Allocator<T, D>>::Buffer: Sync,
{
    let mut workspace: ThreadLocal<RefCell<LocalAssemblyContext<T>>> = ThreadLocal::new();

    for (color_index, color) in coloring.color_classes().iter().enumerate() {
        let cells = color.labels();
        match tensor.scatter_target() {
            ScatterTarget::Scalar(value) => {
                let sum = cells
                    .par_iter()
                    .map(|&cell| {
                        let context = &mut *workspace.get_or_default().borrow_mut();
                        compute_cell_tensor(context, kernel, form, mesh, cell)?;
                        Ok::<_, eyre::Report>(context.element_tensor[0])
                    })
                    .try_reduce(T::zero, |a, b| Ok(a + b))?;
                *value += sum;
            }
            ScatterTarget::Vector(entries) => {
                let rows = row_dof_subsets(form, cells, color_index)?;
                rows.subsets_par_iter(entries)
                    .map(|mut subset| {
                        let context = &mut *workspace.get_or_default().borrow_mut();
                        compute_cell_tensor(context, kernel, form, mesh, subset.label())?;
                        debug_assert_eq!(subset.global_indices(), context.dofs[0].as_slice());

                        for (local_index, &value) in context.element_tensor.iter().enumerate() {
                            *subset.get_mut(local_index) += value;
                        }
                        Ok(())
                    })
                    .collect::<eyre::Result<()>>()?;
            }
            ScatterTarget::Matrix(mut matrix) => {
                let rows = row_dof_subsets(form, cells, color_index)?;
                rows.subsets_par_iter(&mut matrix)
                    .map(|mut subset| {
                        let context = &mut *workspace.get_or_default().borrow_mut();
                        compute_cell_tensor(context, kernel, form, mesh, subset.label())?;

                        let LocalAssemblyContext {
                            element_tensor,
                            dofs,
                            overflow,
                            ..
                        } = context;
                        let (row_dofs, col_dofs) = (&dofs[0], &dofs[1]);
                        let num_cols = col_dofs.len();
                        for (local_row, &global_row) in row_dofs.iter().enumerate() {
                            let mut row = subset.get_mut(local_row);
                            for (local_col, &global_col) in col_dofs.iter().enumerate() {
                                let value = element_tensor[local_row * num_cols + local_col];
                                if !row.add(global_col, value) {
                                    overflow.push((global_row, global_col, value));
                                }
                            }
                        }
                        Ok(())
                    })
                    .collect::<eyre::Result<()>>()?;
            }
        }

        // Entries outside the sparsity pattern were collected per thread
        for context in workspace.iter_mut() {
            for (i, j, value) in context.get_mut().overflow.drain(..) {
                tensor.add(&[value], &[&[i], &[j]]);
            }
        }
    }

    Ok(coloring.num_cells())
}

/// Evaluates the cell integral of a rank 0 form on every cell, writing the value of cell `c`
/// to `values[c]`.
pub(crate) fn assemble_cell_values<T, D>(
    values: &mut [T],
    kernel: &dyn CellKernel<T, D>,
    form: &Form<T, D>,
    mesh: &Mesh<T, D>,
) -> eyre::Result<()>
where
    T: Real,
    D: DimName,
    DefaultAllocator: GeometryAllocator<T, D>,
    <DefaultAllocator as Allocator<T, D>>::Buffer: Sync,
{
    let workspace: ThreadLocal<RefCell<LocalAssemblyContext<T>>> = ThreadLocal::new();
    values
        .par_iter_mut()
        .enumerate()
        .map(|(cell, value)| {
            let context = &mut *workspace.get_or_default().borrow_mut();
            compute_cell_tensor(context, kernel, form, mesh, cell)?;
            *value = context.element_tensor[0];
            Ok(())
        })
        .collect()
}

/// Assembles the exterior facet integrals sequentially.
///
/// Facets with two adjacent cells, and facets flagged `false` in `exterior_facets`, are skipped.
/// Marked facets whose sub-domain has no kernel contribute nothing.
///
/// Returns the number of assembled facets.
pub(crate) fn assemble_exterior_facets<T, D, Tensor>(
    tensor: &mut Tensor,
    form: &Form<T, D>,
    mesh: &Mesh<T, D>,
    facets: &FacetTopology,
    domains: Option<&SubDomainMarkers>,
    exterior_facets: Option<&MeshFunction<bool>>,
) -> eyre::Result<usize>
where
    T: Real,
    D: DimName,
    Tensor: ?Sized + GlobalTensor<T>,
    DefaultAllocator: GeometryAllocator<T, D>,
{
    let integrals = form.exterior_facet_integrals();
    let mut context = LocalAssemblyContext::default();
    let mut num_assembled = 0;

    for facet in 0..facets.num_facets() {
        let cell = match facets.facet_cells(facet) {
            &[cell] => cell,
            _ => continue,
        };
        if exterior_facets.map_or(false, |flags| !flags.values()[facet]) {
            continue;
        }
        let marker = domains.and_then(|markers| markers.values()[facet]);
        let kernel = match integrals.resolve(marker) {
            Some(kernel) => kernel,
            None => continue,
        };
        let local_facet = facets
            .local_facet_index(cell, facet)
            .ok_or_else(|| eyre!("Facet {facet} is not a facet of its adjacent cell {cell}"))?;

        context.update_cell(form, cell)?;
        let geometry = CellGeometry::new(mesh, cell);
        kernel
            .tabulate_tensor(&mut context.element_tensor, &context.coefficients, &geometry, local_facet)
            .wrap_err_with(|| format!("Exterior facet integral failed on facet {facet}"))?;
        add_to_tensor(tensor, &context.element_tensor, &context.dofs);
        num_assembled += 1;
    }

    Ok(num_assembled)
}

/// Assembles the interior facet integrals sequentially.
///
/// The two cells of each facet are ordered by `orientation` if given, and otherwise by increasing
/// cell index. The kernel produces one macro tensor for both cells, which is scattered through the
/// macro dofs of the facet.
///
/// Returns the number of assembled facets.
pub(crate) fn assemble_interior_facets<T, D, Tensor>(
    tensor: &mut Tensor,
    form: &Form<T, D>,
    mesh: &Mesh<T, D>,
    facets: &FacetTopology,
    domains: Option<&SubDomainMarkers>,
    orientation: Option<&MeshFunction<usize>>,
) -> eyre::Result<usize>
where
    T: Real,
    D: DimName,
    Tensor: ?Sized + GlobalTensor<T>,
    DefaultAllocator: GeometryAllocator<T, D>,
{
    let integrals = form.interior_facet_integrals();
    let mut context = LocalAssemblyContext::default();
    let mut num_assembled = 0;

    for facet in 0..facets.num_facets() {
        if !facets.is_interior(facet) {
            continue;
        }
        let marker = domains.and_then(|markers| markers.values()[facet]);
        let kernel = match integrals.resolve(marker) {
            Some(kernel) => kernel,
            None => continue,
        };

        let first = orientation.map(|orientation| orientation.values()[facet]);
        let (cell0, cell1) = facets
            .ordered_cells(facet, first)?
            .ok_or_else(|| eyre!("Interior facet {facet} does not have two cells"))?;
        let local_facet = |cell| {
            facets
                .local_facet_index(cell, facet)
                .ok_or_else(|| eyre!("Facet {facet} is not a facet of its adjacent cell {cell}"))
        };
        let local_facets = [local_facet(cell0)?, local_facet(cell1)?];

        context.update_interior_facet(form, (cell0, cell1))?;
        let geometry0 = CellGeometry::new(mesh, cell0);
        let geometry1 = CellGeometry::new(mesh, cell1);
        kernel
            .tabulate_tensor(
                &mut context.element_tensor,
                &context.macro_coefficients,
                [&geometry0, &geometry1],
                local_facets,
            )
            .wrap_err_with(|| format!("Interior facet integral failed on facet {facet}"))?;
        add_to_tensor(tensor, &context.element_tensor, &context.macro_dofs);
        num_assembled += 1;
    }

    Ok(num_assembled)
}
