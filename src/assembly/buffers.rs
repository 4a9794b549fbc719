use crate::dofmap::tabulate_macro_dofs;
use crate::form::Form;
use crate::Real;
use eyre::WrapErr;
use formasm_traits::allocators::GeometryAllocator;
use nalgebra::{DefaultAllocator, DimName};

/// Scratch storage for computing and scattering the local tensor of one mesh entity.
///
/// A context is owned by a single worker and reused for every entity the worker visits, so that
/// buffers are only reallocated when they need to grow.
#[derive(Debug)]
pub struct LocalAssemblyContext<T> {
    pub(crate) element_tensor: Vec<T>,
    // One array of global dofs per function space
    pub(crate) dofs: Vec<Vec<usize>>,
    pub(crate) macro_dofs: Vec<Vec<usize>>,
    // One array of local values per coefficient
    pub(crate) coefficients: Vec<Vec<T>>,
    pub(crate) macro_coefficients: Vec<Vec<T>>,
    // Matrix entries that fall outside the sparsity pattern of the target
    pub(crate) overflow: Vec<(usize, usize, T)>,
}

impl<T> Default for LocalAssemblyContext<T> {
    fn default() -> Self {
        Self {
            element_tensor: Vec::new(),
            dofs: Vec::new(),
            macro_dofs: Vec::new(),
            coefficients: Vec::new(),
            macro_coefficients: Vec::new(),
            overflow: Vec::new(),
        }
    }
}

impl<T: Real> LocalAssemblyContext<T> {
    /// Prepares the context for the given cell: tabulates dofs, restricts coefficients and
    /// zeroes the element tensor.
    pub fn update_cell<D>(&mut self, form: &Form<T, D>, cell: usize) -> eyre::Result<()>
    where
        D: DimName,
        DefaultAllocator: GeometryAllocator<T, D>,
    {
        let spaces = form.function_spaces();
        self.dofs.resize_with(spaces.len(), Vec::new);
        for (dofs, space) in self.dofs.iter_mut().zip(spaces) {
            dofs.resize(space.local_dimension(cell), 0);
            space.tabulate_dofs(dofs, cell);
        }

        let coefficients = form.coefficients();
        self.coefficients.resize_with(coefficients.len(), Vec::new);
        for (index, (values, coefficient)) in self.coefficients.iter_mut().zip(coefficients).enumerate() {
            values.resize(coefficient.local_dimension(cell), T::zero());
            coefficient
                .restrict(values, cell)
                .wrap_err_with(|| format!("Failed to restrict coefficient {index} to cell {cell}"))?;
        }

        reset_tensor(&mut self.element_tensor, self.dofs.iter().map(Vec::len));
        Ok(())
    }

    /// Prepares the context for the macro element formed by two cells sharing a facet.
    ///
    /// Dofs and coefficient values of `cells.0` come first, followed by those of `cells.1`.
    pub fn update_interior_facet<D>(&mut self, form: &Form<T, D>, cells: (usize, usize)) -> eyre::Result<()>
    where
        D: DimName,
        DefaultAllocator: GeometryAllocator<T, D>,
    {
        let spaces = form.function_spaces();
        self.macro_dofs.resize_with(spaces.len(), Vec::new);
        for (dofs, space) in self.macro_dofs.iter_mut().zip(spaces) {
            tabulate_macro_dofs(&**space, cells, dofs);
        }

        let coefficients = form.coefficients();
        self.macro_coefficients
            .resize_with(coefficients.len(), Vec::new);
        for (index, (values, coefficient)) in self
            .macro_coefficients
            .iter_mut()
            .zip(coefficients)
            .enumerate()
        {
            let n0 = coefficient.local_dimension(cells.0);
            let n1 = coefficient.local_dimension(cells.1);
            values.resize(n0 + n1, T::zero());
            let (values0, values1) = values.split_at_mut(n0);
            coefficient
                .restrict(values0, cells.0)
                .and_then(|_| coefficient.restrict(values1, cells.1))
                .wrap_err_with(|| {
                    format!(
                        "Failed to restrict coefficient {index} to cells {} and {}",
                        cells.0, cells.1
                    )
                })?;
        }

        reset_tensor(&mut self.element_tensor, self.macro_dofs.iter().map(Vec::len));
        Ok(())
    }

    pub fn element_tensor(&self) -> &[T] {
        &self.element_tensor
    }

    pub fn dofs(&self) -> &[Vec<usize>] {
        &self.dofs
    }

    pub fn macro_dofs(&self) -> &[Vec<usize>] {
        &self.macro_dofs
    }

    pub fn coefficients(&self) -> &[Vec<T>] {
        &self.coefficients
    }

    pub fn macro_coefficients(&self) -> &[Vec<T>] {
        &self.macro_coefficients
    }
}

fn reset_tensor<T: Real>(tensor: &mut Vec<T>, dims: impl Iterator<Item = usize>) {
    let len = dims.product();
    tensor.clear();
    tensor.resize(len, T::zero());
}
