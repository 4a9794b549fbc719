use nalgebra::RealField;

pub use nalgebra;

/// Scalar type used for geometry and tensor values throughout `formasm`.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

pub mod allocators;
