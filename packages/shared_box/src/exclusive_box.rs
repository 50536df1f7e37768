use std::any::type_name;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::{fmt, iter};

use crate::{DefaultDelete, Deleter, ERR_NULL_DEREF};

/// Sole owner of a heap resource, released through a deleter when the box is dropped.
///
/// An `ExclusiveBox` either owns exactly one pointer or is null. Ownership can be moved to
/// another box, handed out as a raw pointer via [`release()`][Self::release] or transferred into
/// a [`SharedBox`][crate::SharedBox], but never duplicated: the type is not `Clone`.
///
/// The deleter runs at most once for every pointer the box has owned: when the box is dropped,
/// when [`reset()`][Self::reset] replaces the target or when [`clear()`][Self::clear] empties it.
///
/// # Examples
///
/// ```
/// use shared_box::ExclusiveBox;
///
/// let mut greeting = ExclusiveBox::new("Hello".to_string());
/// greeting.push_str(", world");
///
/// assert_eq!(&*greeting, "Hello, world");
///
/// // Moving ownership out leaves a null box behind.
/// let moved = greeting.take();
/// assert!(greeting.is_null());
/// assert_eq!(&*moved, "Hello, world");
/// ```
///
/// Slices are released with the array form of the default deleter:
///
/// ```
/// use shared_box::ExclusiveBox;
///
/// let numbers = ExclusiveBox::<[u64]>::new_default_slice(5);
///
/// assert_eq!(numbers.len(), 5);
/// assert!(numbers.iter().all(|n| *n == 0));
/// ```
///
/// # Thread safety
///
/// The box is `Send` if both the target and the deleter are `Send`, and `Sync` if both are `Sync`.
pub struct ExclusiveBox<T: ?Sized, D: Deleter<T> = DefaultDelete> {
    ptr: Option<NonNull<T>>,
    deleter: D,

    // We own a `T` and may drop it.
    _owns: PhantomData<T>,
}

impl<T> ExclusiveBox<T> {
    /// Moves `value` to the heap and takes ownership of it.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T: ?Sized> ExclusiveBox<T> {
    /// Takes ownership of the contents of a `Box`.
    #[must_use]
    pub fn from_box(boxed: Box<T>) -> Self {
        Self {
            ptr: Some(NonNull::from(Box::leak(boxed))),
            deleter: DefaultDelete,
            _owns: PhantomData,
        }
    }

    /// Hands the target back as a `Box`, or `None` if the box is null.
    #[must_use]
    pub fn into_box(mut self) -> Option<Box<T>> {
        self.release().map(|ptr| {
            // SAFETY: With the default deleter, every owned pointer came from a `Box<T>`.
            unsafe { Box::from_raw(ptr.as_ptr()) }
        })
    }
}

impl<E> ExclusiveBox<[E]> {
    /// Takes ownership of the elements of a `Vec`, shrinking its allocation to fit.
    #[must_use]
    pub fn from_vec(values: Vec<E>) -> Self {
        Self::from_box(values.into_boxed_slice())
    }

    /// Allocates a slice of `len` default-initialized elements.
    #[must_use]
    pub fn new_default_slice(len: usize) -> Self
    where
        E: Default,
    {
        Self::from_box(iter::repeat_with(E::default).take(len).collect())
    }
}

impl<T: ?Sized, D: Deleter<T>> ExclusiveBox<T, D> {
    /// Creates a null box that owns nothing.
    #[must_use]
    pub fn null() -> Self
    where
        D: Default,
    {
        Self::null_with_deleter(D::default())
    }

    /// Creates a null box that will use `deleter` for any pointer it adopts later.
    #[must_use]
    pub fn null_with_deleter(deleter: D) -> Self {
        Self {
            ptr: None,
            deleter,
            _owns: PhantomData,
        }
    }

    /// Takes ownership of a raw pointer, releasing it with a default-constructed deleter.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that:
    ///
    /// 1. `ptr` is not owned by anything else and is not used through any other path afterwards.
    /// 2. `ptr` refers to a resource that a `D` can release (for [`DefaultDelete`], a pointer that
    ///    was obtained from a `Box<T>`).
    #[must_use]
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self
    where
        D: Default,
    {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { Self::from_raw_with_deleter(ptr, D::default()) }
    }

    /// Takes ownership of a raw pointer, releasing it with the provided deleter.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that:
    ///
    /// 1. `ptr` is not owned by anything else and is not used through any other path afterwards.
    /// 2. `deleter` can release `ptr` (the deleter and the allocation kind must match).
    #[must_use]
    pub unsafe fn from_raw_with_deleter(ptr: NonNull<T>, deleter: D) -> Self {
        Self {
            ptr: Some(ptr),
            deleter,
            _owns: PhantomData,
        }
    }

    /// Whether the box owns nothing.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// The owned pointer, if any.
    ///
    /// Ownership is retained by the box.
    #[must_use]
    pub fn get(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Borrows the target, or returns `None` if the box is null.
    #[must_use]
    pub fn as_ref(&self) -> Option<&T> {
        // SAFETY: We own the target exclusively, so a shared borrow tied to `&self` is valid.
        self.ptr.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Borrows the target exclusively, or returns `None` if the box is null.
    #[must_use]
    pub fn as_mut(&mut self) -> Option<&mut T> {
        // SAFETY: We own the target exclusively, so an exclusive borrow tied to `&mut self`
        // is valid.
        self.ptr.map(|mut ptr| unsafe { ptr.as_mut() })
    }

    /// The deleter that will release the owned pointer.
    #[must_use]
    pub fn deleter(&self) -> &D {
        &self.deleter
    }

    /// The deleter that will release the owned pointer, for modification.
    #[must_use]
    pub fn deleter_mut(&mut self) -> &mut D {
        &mut self.deleter
    }

    /// Gives up ownership of the target without releasing it.
    ///
    /// The box is null afterwards. The caller becomes responsible for releasing the returned
    /// pointer.
    #[must_use = "the released pointer leaks unless the caller releases it"]
    pub fn release(&mut self) -> Option<NonNull<T>> {
        self.ptr.take()
    }

    /// Releases the current target (if any) and takes ownership of `ptr` instead.
    ///
    /// # Safety
    ///
    /// If `ptr` is `Some`, the caller must uphold the same guarantees as for
    /// [`from_raw_with_deleter()`][Self::from_raw_with_deleter] with this box's deleter. In
    /// particular, `ptr` must not be the pointer this box already owns.
    #[cfg_attr(test, mutants::skip)] // Mutation causes leaks or double frees.
    pub unsafe fn reset(&mut self, ptr: Option<NonNull<T>>) {
        // Zero-sized targets all share one dangling address, so only sized ones can be told apart.
        debug_assert!(
            ptr.is_none()
                || self.as_ref().is_none_or(|current| mem::size_of_val(current) == 0)
                || !ptr::eq(self.addr_ptr(), ptr_addr(ptr)),
            "reset() with the pointer the box already owns would release it while still owned"
        );

        // We detach the old pointer before calling the deleter so a panicking deleter
        // cannot cause the same pointer to be released again when the box is dropped.
        if let Some(old) = mem::replace(&mut self.ptr, ptr) {
            // SAFETY: We owned `old` and have just given up every other path to it.
            unsafe {
                self.deleter.delete(old);
            }
        }
    }

    /// Releases the current target, if any, leaving the box null.
    ///
    /// Calling this on a null box does nothing.
    pub fn clear(&mut self) {
        // SAFETY: Adopting no pointer has no requirements.
        unsafe {
            self.reset(None);
        }
    }

    /// Moves ownership out into a new box, leaving this one null.
    #[must_use]
    pub fn take(&mut self) -> Self
    where
        D: Default,
    {
        mem::replace(self, Self::null())
    }

    /// Exchanges the targets and deleters of two boxes.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Decomposes the box into its pointer and deleter without releasing anything.
    #[must_use = "the returned pointer leaks unless the caller releases it"]
    pub fn into_raw_parts(self) -> (Option<NonNull<T>>, D) {
        let mut this = ManuallyDrop::new(self);

        let ptr = this.ptr.take();

        // SAFETY: `this` is never dropped or used again, so the deleter is moved out exactly once.
        let deleter = unsafe { ptr::read(&this.deleter) };

        (ptr, deleter)
    }

    /// Converts the box into one that owns a different view of the same target, typically a
    /// trait object.
    ///
    /// Prefer the safe conversions generated by [`define_box_dyn_cast!`][crate::define_box_dyn_cast]
    /// for unsizing into trait objects.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that:
    ///
    /// 1. The reference returned by `cast_fn` refers to the same object as its input, starting at
    ///    the same address (e.g. an unsizing coercion `x as &mut dyn Trait`).
    /// 2. The deleter can release the resulting `U` pointer as if it were the original `T`.
    /// 3. `U` is not `Send` or `Sync` unless `T` is too.
    #[must_use]
    pub unsafe fn cast_unchecked<U, F>(self, cast_fn: F) -> ExclusiveBox<U, D>
    where
        U: ?Sized,
        D: Deleter<U>,
        F: FnOnce(&mut T) -> &mut U,
    {
        let (ptr, deleter) = self.into_raw_parts();

        let ptr = ptr.map(|mut ptr| {
            // SAFETY: We own the target exclusively and nothing else can reference it.
            let target = unsafe { ptr.as_mut() };
            NonNull::from(cast_fn(target))
        });

        ExclusiveBox {
            ptr,
            deleter,
            _owns: PhantomData,
        }
    }

    fn addr_ptr(&self) -> *const () {
        ptr_addr(self.ptr)
    }
}

fn ptr_addr<T: ?Sized>(ptr: Option<NonNull<T>>) -> *const () {
    ptr.map_or(ptr::null(), |ptr| ptr.cast::<()>().as_ptr().cast_const())
}

impl<T: ?Sized, D: Deleter<T>> Drop for ExclusiveBox<T, D> {
    #[cfg_attr(test, mutants::skip)] // Mutation causes leaks or double frees.
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T: ?Sized, D: Deleter<T> + Default> Default for ExclusiveBox<T, D> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<T> for ExclusiveBox<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> From<Box<T>> for ExclusiveBox<T> {
    fn from(boxed: Box<T>) -> Self {
        Self::from_box(boxed)
    }
}

impl<E> From<Vec<E>> for ExclusiveBox<[E]> {
    fn from(values: Vec<E>) -> Self {
        Self::from_vec(values)
    }
}

impl<T: ?Sized, D: Deleter<T>> Deref for ExclusiveBox<T, D> {
    type Target = T;

    /// Borrows the target.
    ///
    /// # Panics
    ///
    /// Panics if the box is null.
    fn deref(&self) -> &Self::Target {
        self.as_ref().expect(ERR_NULL_DEREF)
    }
}

impl<T: ?Sized, D: Deleter<T>> DerefMut for ExclusiveBox<T, D> {
    /// Borrows the target exclusively.
    ///
    /// # Panics
    ///
    /// Panics if the box is null.
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut().expect(ERR_NULL_DEREF)
    }
}

// Boxes compare by the address they own, not by the value behind it.
impl<T: ?Sized, D: Deleter<T>> PartialEq for ExclusiveBox<T, D> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.addr_ptr(), other.addr_ptr())
    }
}

impl<T: ?Sized, D: Deleter<T>> Eq for ExclusiveBox<T, D> {}

impl<T: ?Sized, D: Deleter<T>> PartialOrd for ExclusiveBox<T, D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized, D: Deleter<T>> Ord for ExclusiveBox<T, D> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr_ptr().cmp(&other.addr_ptr())
    }
}

impl<T: ?Sized, D: Deleter<T>> Hash for ExclusiveBox<T, D> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr_ptr().hash(state);
    }
}

impl<T: ?Sized, D: Deleter<T>> fmt::Pointer for ExclusiveBox<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.addr_ptr(), f)
    }
}

impl<T: ?Sized, D: Deleter<T>> fmt::Debug for ExclusiveBox<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveBox")
            .field("ptr", &self.addr_ptr())
            .field("deleter", &type_name::<D>())
            .finish_non_exhaustive()
    }
}

// SAFETY: The box owns its target and deleter exclusively, so moving the box to another
// thread moves both; this is valid whenever both are `Send`.
unsafe impl<T: ?Sized + Send, D: Deleter<T> + Send> Send for ExclusiveBox<T, D> {}

// SAFETY: Shared access to the box only grants shared access to the target and deleter,
// which is valid whenever both are `Sync`.
unsafe impl<T: ?Sized + Sync, D: Deleter<T> + Sync> Sync for ExclusiveBox<T, D> {}
