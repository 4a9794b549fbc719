//! Helper traits for allocator trait bounds.
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName, Scalar};

/// An allocator for points and vectors in the geometric dimension `D`.
///
/// Used as a trait alias so that generic mesh and kernel code only needs a single bound.
pub trait GeometryAllocator<T: Scalar, D: DimName>: Allocator<T, D> {}

impl<T, D> GeometryAllocator<T, D> for DefaultAllocator
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
}
