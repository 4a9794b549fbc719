//! Assembly of global tensors from variational forms.
//!
//! An assembly call runs the following steps:
//!
//! 1. validate the form against the mesh and the target tensor,
//! 2. gather coefficient values,
//! 3. initialize the tensor (build its sparsity pattern, or zero it unless adding to it),
//! 4. assemble cell integrals in parallel, one color class of cells at a time,
//! 5. assemble exterior facet integrals,
//! 6. assemble interior facet integrals,
//! 7. finalize the tensor.
//!
//! The cell pass scatters into the tensor from several threads at once. This is sound because
//! cells of the same color never share a vertex, and the row dofs of the cells of each color are
//! verified to be disjoint before they are scattered. Facet passes run sequentially.
use crate::error::AssemblyError;
use crate::form::Form;
use crate::mesh::{Mesh, MeshFunction, SubDomainMarkers};
use crate::tensor::{GlobalTensor, TensorLayout};
use crate::topology::FacetTopology;
use crate::Real;
use eyre::eyre;
use formasm_traits::allocators::GeometryAllocator;
use log::{debug, trace};
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

pub mod buffers;
pub mod global;
pub mod local;

/// Options controlling an [`Assembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyOptions {
    /// Number of worker threads for the cell pass. Zero uses the global rayon thread pool.
    pub num_threads: usize,
    /// Whether to rebuild the layout (and sparsity pattern) of the tensor before assembly.
    pub reset_sparsity: bool,
    /// Whether to add to the existing values of a tensor that is not reset, instead of zeroing it.
    pub add_values: bool,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            num_threads: 0,
            reset_sparsity: true,
            add_values: false,
        }
    }
}

impl AssemblyOptions {
    pub fn with_num_threads(self, num_threads: usize) -> Self {
        Self { num_threads, ..self }
    }

    pub fn with_reset_sparsity(self, reset_sparsity: bool) -> Self {
        Self { reset_sparsity, ..self }
    }

    pub fn with_add_values(self, add_values: bool) -> Self {
        Self { add_values, ..self }
    }
}

/// Sub-domain markers for each integration domain.
///
/// Markers without values are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubDomains<'a> {
    pub cells: Option<&'a SubDomainMarkers>,
    pub exterior_facets: Option<&'a SubDomainMarkers>,
    pub interior_facets: Option<&'a SubDomainMarkers>,
}

impl<'a> SubDomains<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cells(self, markers: &'a SubDomainMarkers) -> Self {
        Self {
            cells: Some(markers),
            ..self
        }
    }

    pub fn with_exterior_facets(self, markers: &'a SubDomainMarkers) -> Self {
        Self {
            exterior_facets: Some(markers),
            ..self
        }
    }

    pub fn with_interior_facets(self, markers: &'a SubDomainMarkers) -> Self {
        Self {
            interior_facets: Some(markers),
            ..self
        }
    }
}

/// Checks that a mesh function holds one value per entity of the given dimension.
///
/// Returns `None` for empty mesh functions.
fn check_mesh_function<V>(
    function: Option<&MeshFunction<V>>,
    dim: usize,
    num_entities: usize,
) -> Result<Option<&MeshFunction<V>>, AssemblyError> {
    match function.filter(|function| !function.is_empty()) {
        None => Ok(None),
        Some(function) if function.dim() != dim => Err(AssemblyError::MarkerDimensionMismatch {
            expected: dim,
            actual: function.dim(),
        }),
        Some(function) if function.len() != num_entities => Err(AssemblyError::MarkerSizeMismatch {
            dim,
            expected: num_entities,
            actual: function.len(),
        }),
        Some(function) => Ok(Some(function)),
    }
}

/// Assembles global tensors from forms over a mesh.
///
/// With a nonzero number of threads, the cell pass runs on a dedicated thread pool that is built
/// on first use and reused by later assembly calls (and by clones of the assembler).
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    options: AssemblyOptions,
    thread_pool: OnceLock<Arc<ThreadPool>>,
}

impl Assembler {
    pub fn new(options: AssemblyOptions) -> Self {
        Self {
            options,
            thread_pool: OnceLock::new(),
        }
    }

    /// Runs the cell pass on the given pool instead of building one.
    ///
    /// The number of threads in the options is ignored.
    pub fn with_thread_pool(self, pool: Arc<ThreadPool>) -> Self {
        Self {
            options: self.options,
            thread_pool: OnceLock::from(pool),
        }
    }

    pub fn options(&self) -> &AssemblyOptions {
        &self.options
    }

    /// The pool used for the cell pass, or `None` if the global rayon pool is used.
    pub fn thread_pool(&self) -> eyre::Result<Option<&Arc<ThreadPool>>> {
        if let Some(pool) = self.thread_pool.get() {
            return Ok(Some(pool));
        }
        if self.options.num_threads == 0 {
            return Ok(None);
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.options.num_threads)
            .build()?;
        debug!("Built assembly thread pool with {} threads", pool.current_num_threads());
        Ok(Some(self.thread_pool.get_or_init(|| Arc::new(pool))))
    }

    /// Runs `op` on the assembly thread pool.
    fn install<R: Send>(&self, op: impl Send + FnOnce() -> R) -> eyre::Result<R> {
        match self.thread_pool()? {
            Some(pool) => {
                debug!("Running cell assembly on {} threads", pool.current_num_threads());
                Ok(pool.install(op))
            }
            None => {
                debug!("Running cell assembly on {} threads", rayon::current_num_threads());
                Ok(op())
            }
        }
    }

    /// Assembles the form into the global tensor.
    ///
    /// Computes facets and the cell coloring of the mesh if the form needs them and they are not
    /// yet available. On error, the contents of the tensor are unspecified.
    pub fn assemble<T, D, Tensor>(
        &self,
        tensor: &mut Tensor,
        form: &Form<T, D>,
        mesh: &mut Mesh<T, D>,
        sub_domains: &SubDomains,
    ) -> eyre::Result<()>
    where
        T: Real,
        D: DimName,
        Tensor: ?Sized + GlobalTensor<T>,
        DefaultAllocator: GeometryAllocator<T, D>,
        <DefaultAllocator as Allocator<T, D>>::Buffer: Sync,
    {
        let timer = Instant::now();
        form.check(mesh.num_cells())?;
        if tensor.rank() != form.rank() {
            return Err(AssemblyError::RankMismatch {
                form_rank: form.rank(),
                tensor_rank: tensor.rank(),
            }
            .into());
        }

        let has_cell_integrals = !form.cell_integrals().is_empty();
        let has_exterior_integrals = !form.exterior_facet_integrals().is_empty();
        let has_interior_integrals = !form.interior_facet_integrals().is_empty();
        if has_exterior_integrals || has_interior_integrals {
            mesh.init_facets()?;
        }
        if has_cell_integrals {
            mesh.init_cell_coloring();
        }
        let mesh = &*mesh;

        form.gather_coefficients()?;
        self.init_global_tensor(tensor, form, mesh)?;

        // Cells
        if has_cell_integrals {
            if sub_domains.cells.map_or(false, |markers| !markers.is_empty()) {
                return Err(AssemblyError::CellSubDomainsNotSupported.into());
            }
            let kernel = form
                .cell_integrals()
                .default_kernel()
                .ok_or(AssemblyError::MissingDefaultCellIntegral)?;
            let coloring = mesh
                .cell_coloring()
                .ok_or_else(|| eyre!("Cell coloring must be initialized before assembling cells"))?;

            let pass_timer = Instant::now();
            let num_cells =
                self.install(|| global::assemble_cells(&mut *tensor, &**kernel, form, mesh, coloring))??;
            debug!(
                "Assembled {} cells in {} colors in {:.2?}",
                num_cells,
                coloring.num_colors(),
                pass_timer.elapsed()
            );
        } else {
            trace!("Form has no cell integrals, skipping cell assembly");
        }

        // Exterior facets
        if has_exterior_integrals {
            let (facets, facet_dim) = self.facets_of(mesh)?;
            let domains = check_mesh_function(sub_domains.exterior_facets, facet_dim, facets.num_facets())?;
            let exterior_facets =
                check_mesh_function(mesh.data().exterior_facets.as_ref(), facet_dim, facets.num_facets())?;

            let pass_timer = Instant::now();
            let num_facets =
                global::assemble_exterior_facets(tensor, form, mesh, facets, domains, exterior_facets)?;
            debug!("Assembled {} exterior facets in {:.2?}", num_facets, pass_timer.elapsed());
        } else {
            trace!("Form has no exterior facet integrals, skipping exterior facet assembly");
        }

        // Interior facets
        if has_interior_integrals {
            let (facets, facet_dim) = self.facets_of(mesh)?;
            let domains = check_mesh_function(sub_domains.interior_facets, facet_dim, facets.num_facets())?;
            // The dimension is checked even for an empty orientation
            let orientation = match mesh.data().facet_orientation.as_ref() {
                Some(orientation) if orientation.dim() != facet_dim => {
                    return Err(AssemblyError::FacetOrientationDimension {
                        expected: facet_dim,
                        actual: orientation.dim(),
                    }
                    .into())
                }
                orientation => check_mesh_function(orientation, facet_dim, facets.num_facets())?,
            };

            let pass_timer = Instant::now();
            let num_facets = global::assemble_interior_facets(tensor, form, mesh, facets, domains, orientation)?;
            debug!("Assembled {} interior facets in {:.2?}", num_facets, pass_timer.elapsed());
        } else {
            trace!("Form has no interior facet integrals, skipping interior facet assembly");
        }

        tensor.apply()?;
        debug!("Assembled form of rank {} in {:.2?}", form.rank(), timer.elapsed());
        Ok(())
    }

    /// Assembles the form, using the exterior facet sub-domains stored in the mesh data.
    ///
    /// A facet orientation stored in the mesh data must be defined on facets, even when it holds
    /// no values. An empty orientation on facets is ignored.
    pub fn assemble_with_mesh_data<T, D, Tensor>(
        &self,
        tensor: &mut Tensor,
        form: &Form<T, D>,
        mesh: &mut Mesh<T, D>,
    ) -> eyre::Result<()>
    where
        T: Real,
        D: DimName,
        Tensor: ?Sized + GlobalTensor<T>,
        DefaultAllocator: GeometryAllocator<T, D>,
        <DefaultAllocator as Allocator<T, D>>::Buffer: Sync,
    {
        let exterior_facet_domains = mesh.data().exterior_facet_domains.clone();
        let sub_domains = SubDomains {
            exterior_facets: exterior_facet_domains.as_ref(),
            ..SubDomains::default()
        };
        self.assemble(tensor, form, mesh, &sub_domains)
    }

    /// Evaluates the cell integral of a rank 0 form on each cell, writing the value of cell `c`
    /// to `values[c]`.
    ///
    /// Facet integrals are not evaluated.
    pub fn assemble_cell_values<T, D>(&self, values: &mut [T], form: &Form<T, D>, mesh: &Mesh<T, D>) -> eyre::Result<()>
    where
        T: Real,
        D: DimName,
        DefaultAllocator: GeometryAllocator<T, D>,
        <DefaultAllocator as Allocator<T, D>>::Buffer: Sync,
    {
        form.check(mesh.num_cells())?;
        if form.rank() != 0 {
            return Err(AssemblyError::RankMismatch {
                form_rank: form.rank(),
                tensor_rank: 0,
            }
            .into());
        }
        if values.len() != mesh.num_cells() {
            return Err(AssemblyError::CellValuesSizeMismatch {
                expected: mesh.num_cells(),
                actual: values.len(),
            }
            .into());
        }
        form.gather_coefficients()?;

        let kernel = match form.cell_integrals().default_kernel() {
            Some(kernel) => kernel,
            None if form.cell_integrals().has_sub_domains() => {
                return Err(AssemblyError::MissingDefaultCellIntegral.into())
            }
            None => {
                trace!("Form has no cell integrals, skipping cell assembly");
                return Ok(());
            }
        };

        let timer = Instant::now();
        self.install(|| global::assemble_cell_values(values, &**kernel, form, mesh))??;
        debug!("Assembled values of {} cells in {:.2?}", mesh.num_cells(), timer.elapsed());
        Ok(())
    }

    fn init_global_tensor<T, D, Tensor>(&self, tensor: &mut Tensor, form: &Form<T, D>, mesh: &Mesh<T, D>) -> eyre::Result<()>
    where
        T: Real,
        D: DimName,
        Tensor: ?Sized + GlobalTensor<T>,
        DefaultAllocator: GeometryAllocator<T, D>,
    {
        if self.options.reset_sparsity {
            let timer = Instant::now();
            let layout = TensorLayout::from_form(form, mesh.facets())?;
            tensor.init(&layout)?;
            debug!("Initialized global tensor with shape {:?} in {:.2?}", layout.shape(), timer.elapsed());
        } else {
            let form_shape = form.shape();
            let tensor_shape = tensor.shape();
            if form_shape != tensor_shape {
                return Err(AssemblyError::ShapeMismatch {
                    form_shape,
                    tensor_shape,
                }
                .into());
            }
            if !self.options.add_values {
                tensor.zero();
            }
        }
        Ok(())
    }

    fn facets_of<'a, T, D>(&self, mesh: &'a Mesh<T, D>) -> eyre::Result<(&'a FacetTopology, usize)>
    where
        T: Real,
        D: DimName,
        DefaultAllocator: GeometryAllocator<T, D>,
    {
        let facets = mesh
            .facets()
            .ok_or_else(|| eyre!("Facets must be initialized before assembling facet integrals"))?;
        Ok((facets, mesh.topological_dim() - 1))
    }
}
