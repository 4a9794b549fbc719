//! Variational forms: function spaces, coefficients and integral kernels.
use crate::assembly::local::{CellKernel, ExteriorFacetKernel, InteriorFacetKernel};
use crate::dofmap::DofMap;
use crate::error::AssemblyError;
use eyre::{ensure, WrapErr};
use formasm_traits::allocators::GeometryAllocator;
use nalgebra::{DVector, DefaultAllocator, DimName, Scalar};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thread_local::ThreadLocal;

/// The kernels of one integration domain: an optional default kernel for unmarked entities, and
/// kernels for individual sub-domains.
#[derive(Debug, Clone)]
pub struct IntegralCollection<K> {
    default: Option<K>,
    by_domain: BTreeMap<usize, K>,
}

impl<K> Default for IntegralCollection<K> {
    fn default() -> Self {
        Self {
            default: None,
            by_domain: BTreeMap::new(),
        }
    }
}

impl<K> IntegralCollection<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&mut self, kernel: K) {
        self.default = Some(kernel);
    }

    pub fn insert(&mut self, domain: usize, kernel: K) {
        self.by_domain.insert(domain, kernel);
    }

    pub fn default_kernel(&self) -> Option<&K> {
        self.default.as_ref()
    }

    pub fn domain_kernel(&self, domain: usize) -> Option<&K> {
        self.by_domain.get(&domain)
    }

    pub fn has_sub_domains(&self) -> bool {
        !self.by_domain.is_empty()
    }

    // (has default, sub-domains)
    fn describe(&self) -> (bool, Vec<usize>) {
        (self.default.is_some(), self.by_domain.keys().copied().collect())
    }

    /// Whether no kernel at all is registered.
    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_domain.is_empty()
    }

    /// The kernel that applies to an entity with the given sub-domain marker.
    ///
    /// Unmarked entities use the default kernel. Marked entities use the kernel registered for
    /// their sub-domain, and `None` is returned if there is no such kernel.
    pub fn resolve(&self, marker: Option<usize>) -> Option<&K> {
        match marker {
            None => self.default_kernel(),
            Some(domain) => self.domain_kernel(domain),
        }
    }
}

/// A function entering a form, evaluated cell by cell.
pub trait Coefficient<T>: Send + Sync {
    /// The number of local values on the given cell.
    fn local_dimension(&self, cell: usize) -> usize;

    /// Writes the local values of the coefficient on `cell` to `output`.
    fn restrict(&self, output: &mut [T], cell: usize) -> eyre::Result<()>;

    /// Makes values owned by other processes available before assembly starts.
    ///
    /// Called once per assembly call, before any kernel is invoked.
    fn gather(&self) -> eyre::Result<()> {
        Ok(())
    }
}

/// A coefficient with the same values on every cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant<T> {
    values: Vec<T>,
}

impl<T: Scalar> Constant<T> {
    pub fn scalar(value: T) -> Self {
        Self { values: vec![value] }
    }

    pub fn from_values(values: Vec<T>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }
}

impl<T: Scalar + Send + Sync> Coefficient<T> for Constant<T> {
    fn local_dimension(&self, _cell: usize) -> usize {
        self.values.len()
    }

    fn restrict(&self, output: &mut [T], _cell: usize) -> eyre::Result<()> {
        output.clone_from_slice(&self.values);
        Ok(())
    }
}

/// A finite element function given by its global coefficient vector in a function space.
pub struct DiscreteFunction<T: Scalar> {
    dofmap: Arc<dyn DofMap>,
    vector: DVector<T>,
    workspace: ThreadLocal<RefCell<Vec<usize>>>,
}

impl<T: Scalar> fmt::Debug for DiscreteFunction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscreteFunction")
            .field("global_dimension", &self.dofmap.global_dimension())
            .field("vector", &self.vector)
            .finish()
    }
}

impl<T: Scalar> DiscreteFunction<T> {
    pub fn new(dofmap: Arc<dyn DofMap>, vector: DVector<T>) -> eyre::Result<Self> {
        ensure!(
            vector.len() == dofmap.global_dimension(),
            "Vector of length {} does not match the global dimension {} of the function space",
            vector.len(),
            dofmap.global_dimension()
        );
        Ok(Self {
            dofmap,
            vector,
            workspace: ThreadLocal::new(),
        })
    }

    pub fn vector(&self) -> &DVector<T> {
        &self.vector
    }

    pub fn dofmap(&self) -> &Arc<dyn DofMap> {
        &self.dofmap
    }
}

impl<T: Scalar + Send + Sync> Coefficient<T> for DiscreteFunction<T> {
    fn local_dimension(&self, cell: usize) -> usize {
        self.dofmap.local_dimension(cell)
    }

    fn restrict(&self, output: &mut [T], cell: usize) -> eyre::Result<()> {
        let dofs = &mut *self.workspace.get_or_default().borrow_mut();
        dofs.resize(self.dofmap.local_dimension(cell), 0);
        self.dofmap.tabulate_dofs(dofs, cell);
        for (value, &dof) in output.iter_mut().zip(dofs.iter()) {
            *value = self.vector[dof].clone();
        }
        Ok(())
    }
}

pub type CellIntegrals<T, D> = IntegralCollection<Box<dyn CellKernel<T, D>>>;
pub type ExteriorFacetIntegrals<T, D> = IntegralCollection<Box<dyn ExteriorFacetKernel<T, D>>>;
pub type InteriorFacetIntegrals<T, D> = IntegralCollection<Box<dyn InteriorFacetKernel<T, D>>>;

/// A variational form of rank 0 (scalar), 1 (vector) or 2 (matrix).
///
/// The rank is the number of function spaces. For rank 2 forms, space 0 is the test space
/// (rows of the matrix) and space 1 is the trial space (columns).
pub struct Form<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: GeometryAllocator<T, D>,
{
    function_spaces: Vec<Arc<dyn DofMap>>,
    coefficients: Vec<Arc<dyn Coefficient<T>>>,
    cell_integrals: CellIntegrals<T, D>,
    exterior_facet_integrals: ExteriorFacetIntegrals<T, D>,
    interior_facet_integrals: InteriorFacetIntegrals<T, D>,
}

impl<T, D> fmt::Debug for Form<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: GeometryAllocator<T, D>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Form")
            .field("rank", &self.rank())
            .field("shape", &self.shape())
            .field("num_coefficients", &self.coefficients.len())
            .field("cell_integrals", &self.cell_integrals.describe())
            .field("exterior_facet_integrals", &self.exterior_facet_integrals.describe())
            .field("interior_facet_integrals", &self.interior_facet_integrals.describe())
            .finish()
    }
}

impl<T, D> Form<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: GeometryAllocator<T, D>,
{
    /// Creates a form without coefficients or integrals on the given function spaces.
    pub fn new(function_spaces: Vec<Arc<dyn DofMap>>) -> Self {
        Self {
            function_spaces,
            coefficients: Vec::new(),
            cell_integrals: IntegralCollection::new(),
            exterior_facet_integrals: IntegralCollection::new(),
            interior_facet_integrals: IntegralCollection::new(),
        }
    }

    pub fn with_coefficient(mut self, coefficient: Arc<dyn Coefficient<T>>) -> Self {
        self.coefficients.push(coefficient);
        self
    }

    pub fn with_cell_integral(mut self, kernel: impl CellKernel<T, D> + 'static) -> Self {
        self.cell_integrals.set_default(Box::new(kernel));
        self
    }

    pub fn with_cell_integral_on(mut self, domain: usize, kernel: impl CellKernel<T, D> + 'static) -> Self {
        self.cell_integrals.insert(domain, Box::new(kernel));
        self
    }

    pub fn with_exterior_facet_integral(mut self, kernel: impl ExteriorFacetKernel<T, D> + 'static) -> Self {
        self.exterior_facet_integrals.set_default(Box::new(kernel));
        self
    }

    pub fn with_exterior_facet_integral_on(
        mut self,
        domain: usize,
        kernel: impl ExteriorFacetKernel<T, D> + 'static,
    ) -> Self {
        self.exterior_facet_integrals.insert(domain, Box::new(kernel));
        self
    }

    pub fn with_interior_facet_integral(mut self, kernel: impl InteriorFacetKernel<T, D> + 'static) -> Self {
        self.interior_facet_integrals.set_default(Box::new(kernel));
        self
    }

    pub fn with_interior_facet_integral_on(
        mut self,
        domain: usize,
        kernel: impl InteriorFacetKernel<T, D> + 'static,
    ) -> Self {
        self.interior_facet_integrals.insert(domain, Box::new(kernel));
        self
    }

    pub fn rank(&self) -> usize {
        self.function_spaces.len()
    }

    /// The global dimension of each function space.
    pub fn shape(&self) -> Vec<usize> {
        self.function_spaces
            .iter()
            .map(|space| space.global_dimension())
            .collect()
    }

    pub fn function_spaces(&self) -> &[Arc<dyn DofMap>] {
        &self.function_spaces
    }

    pub fn coefficients(&self) -> &[Arc<dyn Coefficient<T>>] {
        &self.coefficients
    }

    pub fn cell_integrals(&self) -> &CellIntegrals<T, D> {
        &self.cell_integrals
    }

    pub fn exterior_facet_integrals(&self) -> &ExteriorFacetIntegrals<T, D> {
        &self.exterior_facet_integrals
    }

    pub fn interior_facet_integrals(&self) -> &InteriorFacetIntegrals<T, D> {
        &self.interior_facet_integrals
    }

    /// Verifies that the form can be assembled over a mesh with `num_cells` cells.
    pub fn check(&self, num_cells: usize) -> eyre::Result<()> {
        if self.rank() > 2 {
            return Err(AssemblyError::UnsupportedRank { rank: self.rank() }.into());
        }
        for (space, dofmap) in self.function_spaces.iter().enumerate() {
            if dofmap.num_cells() != num_cells {
                return Err(AssemblyError::DofMapCellCountMismatch {
                    space,
                    dofmap_cells: dofmap.num_cells(),
                    mesh_cells: num_cells,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Synchronizes the values of all coefficients.
    pub fn gather_coefficients(&self) -> eyre::Result<()> {
        for (index, coefficient) in self.coefficients.iter().enumerate() {
            coefficient
                .gather()
                .wrap_err_with(|| format!("Failed to gather coefficient {index}"))?;
        }
        Ok(())
    }
}
