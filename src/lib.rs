//! Parallel assembly of finite element variational forms.
//!
//! `formasm` sums the local tensors produced by integral kernels over the cells, exterior facets
//! and interior facets of a simplicial mesh into a global scalar, vector or sparse matrix. Cells
//! are colored so that no two cells of the same color share a vertex, which lets the cells of
//! each color scatter into the global tensor concurrently without locking.
pub mod assembly;
pub mod dofmap;
pub mod error;
pub mod form;
pub mod mesh;
pub mod tensor;
pub mod topology;

pub use formasm_traits::Real;

pub extern crate formasm_adjacency as adjacency;
pub extern crate formasm_paradis as paradis;
pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
