use crate::{ParallelIndexedAccess, ParallelIndexedCollection};
use std::marker::PhantomData;

/// Parallel access to the elements of a mutable slice.
pub struct ParallelSliceAccess<'a, T> {
    ptr: *mut T,
    marker: PhantomData<&'a mut T>,
}

impl<'a, T> Clone for ParallelSliceAccess<'a, T> {
    fn clone(&self) -> Self {
        Self {
            ptr: self.ptr,
            marker: PhantomData,
        }
    }
}

unsafe impl<'a, T: Send + Sync> Sync for ParallelSliceAccess<'a, T> {}
unsafe impl<'a, T: Send + Sync> Send for ParallelSliceAccess<'a, T> {}

unsafe impl<'a, T: Send + Sync> ParallelIndexedAccess for ParallelSliceAccess<'a, T> {
    type RecordMut<'r> = &'r mut T where Self: 'r;

    unsafe fn get_unchecked_mut<'r>(&'r self, index: usize) -> &'r mut T {
        &mut *self.ptr.add(index)
    }
}

unsafe impl<'a, T: 'a + Send + Sync> ParallelIndexedCollection<'a> for [T] {
    type Access = ParallelSliceAccess<'a, T>;

    fn create_access(&'a mut self) -> Self::Access {
        ParallelSliceAccess {
            ptr: self.as_mut_ptr(),
            marker: PhantomData,
        }
    }

    fn len(&self) -> usize {
        <[T]>::len(self)
    }
}
