use std::ptr::NonNull;

/// Releases a resource that an owning box no longer needs.
///
/// Every closure accepting a `NonNull<T>` is a deleter, so most custom deleters are written
/// inline at the point where a raw pointer is adopted:
///
/// ```
/// use std::ptr::NonNull;
///
/// use shared_box::ExclusiveBox;
///
/// let raw = NonNull::from(Box::leak(Box::new(42_u32)));
///
/// // SAFETY: The pointer came from `Box::leak()` and the deleter frees it as a `Box<u32>`.
/// let owned = unsafe {
///     ExclusiveBox::from_raw_with_deleter(raw, |ptr: NonNull<u32>| {
///         // SAFETY: The box only calls the deleter with the pointer it owns.
///         drop(unsafe { Box::from_raw(ptr.as_ptr()) });
///     })
/// };
///
/// assert_eq!(*owned, 42);
/// ```
pub trait Deleter<T: ?Sized> {
    /// Destroys the target of `ptr` and releases the storage it occupies.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that:
    ///
    /// 1. `ptr` is owned by the caller and nothing else will access the target afterwards.
    /// 2. `ptr` refers to a resource that this deleter knows how to release (e.g. a pointer
    ///    obtained from a `Box<T>` when the deleter is [`DefaultDelete`]).
    unsafe fn delete(&mut self, ptr: NonNull<T>);
}

/// The deleter used when no custom deleter is supplied.
///
/// Releases the target as a `Box<T>`. For slices this is the array form of deletion: every
/// element is dropped and the whole allocation is freed, so the scalar/array distinction is
/// carried by the pointer type instead of by the caller's discipline.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    #[cfg_attr(test, mutants::skip)] // Mutation causes leaks or double frees.
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        // SAFETY: The caller guarantees that the pointer came from a `Box<T>` we now own.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

impl<T, F> Deleter<T> for F
where
    T: ?Sized,
    F: FnMut(NonNull<T>),
{
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        self(ptr);
    }
}
