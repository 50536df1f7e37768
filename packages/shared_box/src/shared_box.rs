use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::ptr::{self, NonNull};

use crate::{
    ControlBlock, DefaultDelete, Deleter, ERR_NULL_DEREF, ExclusiveBox, FusedBlock, OwningBlock,
    SelfReferencing,
};

/// A shared-ownership pointer: the target is destroyed when the last `SharedBox` referring to it
/// is dropped.
///
/// Every `SharedBox` is either null or refers to a control block that counts the owners of a
/// payload and knows how to destroy it. Cloning a handle registers another owner; dropping or
/// overwriting one unregisters it. The count is atomic, so handles to the same payload may be
/// cloned and dropped on different threads.
///
/// The handle caches a pointer to its target, so dereferencing never goes through the control
/// block. After a [`cast()`][Self::cast], different handles sharing the same control block may
/// point at different views of the payload (e.g. the whole object and a trait object, or a field).
///
/// # Construction
///
/// * [`new()`][Self::new] moves a value into a single allocation shared with the control block.
/// * [`from_box()`][Self::from_box], [`from_exclusive()`][Self::from_exclusive] and
///   [`from_raw_with_deleter()`][Self::from_raw_with_deleter] adopt an existing allocation and
///   release it through its deleter.
/// * [`null()`][Self::null] (also [`Default`]) owns nothing.
///
/// # Examples
///
/// ```
/// use shared_box::SharedBox;
///
/// let a = SharedBox::new(5_u32);
/// assert_eq!(a.strong_count(), 1);
///
/// let b = a.clone();
/// assert_eq!(a.strong_count(), 2);
/// assert_eq!(*a, 5);
/// assert_eq!(*b, 5);
///
/// drop(a);
/// assert_eq!(b.strong_count(), 1);
/// assert_eq!(*b, 5);
/// ```
///
/// # Comparisons
///
/// Equality, ordering and hashing use the address of the target, not the value behind it and not
/// the control block. Use [`same_owner()`][Self::same_owner] to check whether two handles keep
/// the same payload alive.
///
/// # Thread safety
///
/// Like `std::sync::Arc`, the handle is `Send` and `Sync` if the target is both `Send` and `Sync`,
/// because the target can be reached from every handle and is dropped on whichever thread drops
/// the last one.
pub struct SharedBox<T: ?Sized> {
    inner: Option<Shared<T>>,

    // We own a share of a `T` and may drop it.
    _owns: PhantomData<T>,
}

/// The non-null state of a `SharedBox`. Keeping both pointers in one `Option` guarantees that
/// they are null together.
struct Shared<T: ?Sized> {
    ptr: NonNull<T>,
    block: NonNull<ControlBlock>,
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Shared<T> {}

impl<T: ?Sized> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.block == other.block
    }
}

impl<T> SharedBox<T> {
    /// Moves `value` into a new allocation that also holds the control block.
    ///
    /// This is the most efficient way to create a `SharedBox`: one allocation, one free.
    #[must_use]
    pub fn new(value: T) -> Self {
        let (ptr, block) = FusedBlock::allocate(value);

        // SAFETY: The fused block was just created with a strong count of 1 that we now own,
        // and `ptr` points to its payload.
        unsafe { Self::from_parts(ptr, block) }
    }

    /// Like [`new()`][Self::new] but also wires the object's [`SelfRef`][crate::SelfRef], so
    /// the object can later call [`shared_from_self()`][SelfReferencing::shared_from_self].
    #[must_use]
    pub fn new_self_referencing(value: T) -> Self
    where
        T: SelfReferencing,
    {
        let (ptr, block) = FusedBlock::allocate_self_referencing(value);

        // SAFETY: The fused block was just created with a strong count of 1 that we now own,
        // and `ptr` points to its payload.
        unsafe { Self::from_parts(ptr, block) }
    }
}

impl<T: ?Sized> SharedBox<T> {
    /// Creates a null handle that owns nothing.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            inner: None,
            _owns: PhantomData,
        }
    }

    /// Takes ownership of the contents of a `Box`, releasing it as a `Box` when the last handle
    /// is dropped.
    ///
    /// This allocates a separate control block. Prefer [`new()`][Self::new] for sized values.
    #[must_use]
    pub fn from_box(boxed: Box<T>) -> Self {
        let ptr = NonNull::from(Box::leak(boxed));

        // SAFETY: The pointer came from a `Box<T>` that we own, which is what `DefaultDelete`
        // releases.
        unsafe { Self::from_raw_with_deleter(ptr, DefaultDelete) }
    }

    /// Takes ownership of a raw pointer obtained from a `Box<T>`.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` was obtained from a `Box<T>`, is not owned by
    /// anything else and is not used through any other path afterwards.
    #[must_use]
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { Self::from_raw_with_deleter(ptr, DefaultDelete) }
    }

    /// Takes ownership of a raw pointer, releasing it with `deleter` when the last handle is
    /// dropped.
    ///
    /// The deleter may run on any thread that drops a handle.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that:
    ///
    /// 1. `ptr` is not owned by anything else and is not used through any other path afterwards.
    /// 2. `deleter` can release `ptr` (the deleter and the allocation kind must match).
    #[must_use]
    pub unsafe fn from_raw_with_deleter<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        D: Deleter<T> + Send + 'static,
    {
        // SAFETY: Forwarding safety requirements to the caller.
        let block = unsafe { OwningBlock::allocate(ptr, deleter) };

        // SAFETY: The owning block was just created with a strong count of 1 that we now own,
        // and it owns `ptr`.
        unsafe { Self::from_parts(ptr, block) }
    }

    /// Transfers ownership out of an [`ExclusiveBox`], keeping its deleter.
    ///
    /// A null exclusive box becomes a null shared box.
    #[must_use]
    pub fn from_exclusive<D>(exclusive: ExclusiveBox<T, D>) -> Self
    where
        D: Deleter<T> + Send + 'static,
    {
        match exclusive.into_raw_parts() {
            // SAFETY: The exclusive box owned the pointer with this deleter and handed both
            // over to us.
            (Some(ptr), deleter) => unsafe { Self::from_raw_with_deleter(ptr, deleter) },
            (None, _) => Self::null(),
        }
    }

    /// Like [`from_exclusive()`][Self::from_exclusive] but also wires the object's
    /// [`SelfRef`][crate::SelfRef], so the object can later call
    /// [`shared_from_self()`][SelfReferencing::shared_from_self].
    #[must_use]
    pub fn from_exclusive_self_referencing<D>(exclusive: ExclusiveBox<T, D>) -> Self
    where
        T: SelfReferencing,
        D: Deleter<T> + Send + 'static,
    {
        match exclusive.into_raw_parts() {
            (Some(ptr), deleter) => {
                // SAFETY: The exclusive box owned the pointer with this deleter and handed both
                // over to us. An owned target is valid for reads.
                let block = unsafe { OwningBlock::allocate_self_referencing(ptr, deleter) };

                // SAFETY: The owning block was just created with a strong count of 1 that we
                // now own, and it owns `ptr`.
                unsafe { Self::from_parts(ptr, block) }
            }
            (None, _) => Self::null(),
        }
    }

    /// Assembles a handle from a payload pointer and one owned share of a control block.
    ///
    /// # Safety
    ///
    /// The caller must transfer ownership of one share of `block` to the new handle, and `ptr`
    /// must point into the payload that `block` keeps alive.
    #[must_use]
    pub(crate) unsafe fn from_parts(ptr: NonNull<T>, block: NonNull<ControlBlock>) -> Self {
        Self {
            inner: Some(Shared { ptr, block }),
            _owns: PhantomData,
        }
    }

    /// Whether the handle owns nothing.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    /// Borrows the target, or returns `None` if the handle is null.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: We hold a share, so the payload is alive for as long as `self` is borrowed.
        // Shared handles only ever hand out shared references.
        self.inner.map(|shared| unsafe { shared.ptr.as_ref() })
    }

    /// The cached pointer to the target, or `None` if the handle is null.
    ///
    /// The pointer is valid for shared access for as long as any handle sharing its control
    /// block is alive.
    #[must_use]
    pub fn ptr(&self) -> Option<NonNull<T>> {
        self.inner.map(|shared| shared.ptr)
    }

    /// Best-effort number of handles sharing the control block, or 0 if the handle is null.
    ///
    /// Other threads may change the count at any time; use this for diagnostics, never for
    /// synchronization.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        self.inner.map_or(0, |shared| {
            // SAFETY: We hold a share, so the block is alive.
            unsafe { shared.block.as_ref() }.count().unsigned_abs()
        })
    }

    /// Whether both handles share the same control block, i.e. keep the same payload alive.
    ///
    /// This holds even if the handles point at different views of the payload. Two null handles
    /// are considered to share the same (absent) owner.
    #[must_use]
    pub fn same_owner<U: ?Sized>(&self, other: &SharedBox<U>) -> bool {
        self.block() == other.block()
    }

    fn block(&self) -> Option<NonNull<ControlBlock>> {
        self.inner.map(|shared| shared.block)
    }

    fn addr_ptr(&self) -> *const () {
        self.inner.map_or(ptr::null(), |shared| {
            shared.ptr.cast::<()>().as_ptr().cast_const()
        })
    }

    /// Moves ownership out into a new handle, leaving this one null.
    ///
    /// The strong count does not change.
    #[must_use]
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Replaces this handle with the contents of `source`, leaving `source` null.
    ///
    /// The share previously held by this handle is released, which destroys the old payload if
    /// it was the last one. The strong count of the adopted payload does not change.
    pub fn assign_from(&mut self, source: &mut Self) {
        *self = source.take();
    }

    /// Converts the handle into one that points at a different view of the same payload,
    /// keeping the payload alive through the same control block.
    ///
    /// `cast_fn` may return the target itself as another type (e.g. an unsizing coercion to a
    /// trait object) or any reference borrowed from it (e.g. a field). A null handle stays null
    /// and `cast_fn` is not called.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::fmt::Display;
    ///
    /// use shared_box::SharedBox;
    ///
    /// struct Config {
    ///     name: String,
    ///     retries: u32,
    /// }
    ///
    /// let config = SharedBox::new(Config {
    ///     name: "primary".to_string(),
    ///     retries: 3,
    /// });
    ///
    /// fn retries_of(config: &Config) -> &(dyn Display + 'static) {
    ///     &config.retries
    /// }
    ///
    /// let name: SharedBox<String> = config.cast_clone(|c| &c.name);
    /// let retries: SharedBox<dyn Display> = config.cast(retries_of);
    ///
    /// assert_eq!(*name, "primary");
    /// assert_eq!(retries.to_string(), "3");
    /// assert!(name.same_owner(&retries));
    /// ```
    #[must_use]
    pub fn cast<U, F>(self, cast_fn: F) -> SharedBox<U>
    where
        T: Send + Sync + 'static,
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        // SAFETY: `T: 'static` means any reference produced from `&T` lives as long as the
        // payload, and `T: Send + Sync` means no `U` view can be more thread-mobile than `T`.
        unsafe { self.cast_unchecked(cast_fn) }
    }

    /// Like [`cast()`][Self::cast] but registers a new owner, leaving this handle intact.
    #[must_use]
    pub fn cast_clone<U, F>(&self, cast_fn: F) -> SharedBox<U>
    where
        T: Send + Sync + 'static,
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        self.clone().cast(cast_fn)
    }

    /// Like [`cast()`][Self::cast] but without the `Send + Sync + 'static` requirements.
    ///
    /// Prefer the safe conversions generated by [`define_box_dyn_cast!`][crate::define_box_dyn_cast]
    /// for unsizing into trait objects.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that:
    ///
    /// 1. The reference returned by `cast_fn` remains valid for as long as the payload is alive
    ///    (it borrows from the target, or is `'static`), even if `T` itself borrows data with a
    ///    shorter lifetime than `U` allows.
    /// 2. `SharedBox<U>` is not `Send` or `Sync` unless `SharedBox<T>` is, because the last
    ///    handle, whichever type it has, drops the `T`.
    #[must_use]
    pub unsafe fn cast_unchecked<U, F>(self, cast_fn: F) -> SharedBox<U>
    where
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        let Some(shared) = self.inner else {
            return SharedBox::null();
        };

        // SAFETY: We hold a share, so the payload is alive while `cast_fn` runs.
        let target = unsafe { shared.ptr.as_ref() };
        let ptr = NonNull::from(cast_fn(target));

        // Our share moves into the new handle.
        mem::forget(self);

        // SAFETY: We transfer the share we held, and `ptr` was derived from the payload.
        unsafe { SharedBox::from_parts(ptr, shared.block) }
    }
}

impl<T: ?Sized> Clone for SharedBox<T> {
    /// Creates another handle to the same target, registering a new owner.
    fn clone(&self) -> Self {
        if let Some(shared) = self.inner {
            // SAFETY: We hold a share, so the block is alive.
            unsafe { shared.block.as_ref() }.incref();
        }

        Self {
            inner: self.inner,
            _owns: PhantomData,
        }
    }

    /// Makes this handle share the target of `source`.
    ///
    /// Assigning a handle from one that already holds the same state (including itself) changes
    /// nothing; otherwise the previous share is released after the new one is registered.
    fn clone_from(&mut self, source: &Self) {
        if self.inner == source.inner {
            return;
        }

        // The new share is registered before the old one is released.
        drop(mem::replace(self, source.clone()));
    }
}

impl<T: ?Sized> Drop for SharedBox<T> {
    #[cfg_attr(test, mutants::skip)] // Mutation causes use-after-free or leaks.
    fn drop(&mut self) {
        if let Some(shared) = self.inner.take() {
            // SAFETY: We own one share and the handle is null from now on.
            unsafe {
                ControlBlock::decref(shared.block);
            }
        }
    }
}

impl<T: ?Sized> Default for SharedBox<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<T> for SharedBox<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> From<Box<T>> for SharedBox<T> {
    fn from(boxed: Box<T>) -> Self {
        Self::from_box(boxed)
    }
}

impl<T: ?Sized, D> From<ExclusiveBox<T, D>> for SharedBox<T>
where
    D: Deleter<T> + Send + 'static,
{
    fn from(exclusive: ExclusiveBox<T, D>) -> Self {
        Self::from_exclusive(exclusive)
    }
}

impl<T: ?Sized> Deref for SharedBox<T> {
    type Target = T;

    /// Borrows the target.
    ///
    /// # Panics
    ///
    /// Panics if the handle is null.
    fn deref(&self) -> &Self::Target {
        self.get().expect(ERR_NULL_DEREF)
    }
}

impl<T: ?Sized> PartialEq for SharedBox<T> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.addr_ptr(), other.addr_ptr())
    }
}

impl<T: ?Sized> Eq for SharedBox<T> {}

impl<T: ?Sized> PartialOrd for SharedBox<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized> Ord for SharedBox<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr_ptr().cmp(&other.addr_ptr())
    }
}

impl<T: ?Sized> Hash for SharedBox<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr_ptr().hash(state);
    }
}

impl<T: ?Sized> fmt::Pointer for SharedBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.addr_ptr(), f)
    }
}

impl<T: ?Sized> fmt::Debug for SharedBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBox")
            .field("ptr", &self.addr_ptr())
            .field("block", &self.block())
            .field("strong_count", &self.strong_count())
            .finish_non_exhaustive()
    }
}

// SAFETY: The last handle drops the target on whatever thread it lives on (needs `Send`) and all
// handles can reach the target concurrently (needs `Sync`). The control block is thread-safe.
unsafe impl<T: ?Sized + Send + Sync> Send for SharedBox<T> {}

// SAFETY: A `&SharedBox` can be cloned into an owning handle on another thread, so the same
// requirements as for `Send` apply.
unsafe impl<T: ?Sized + Send + Sync> Sync for SharedBox<T> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};
    use testing::DropCounter;

    use super::*;

    assert_impl_all!(SharedBox<u32>: Send, Sync, Clone);
    assert_impl_all!(SharedBox<[u32]>: Send, Sync);
    assert_not_impl_any!(SharedBox<Rc<u32>>: Send, Sync);
    // Cell is Send but not Sync, so the handle can be neither.
    assert_not_impl_any!(SharedBox<Cell<u32>>: Send, Sync);

    #[test]
    fn count_walks_through_copies() {
        let a = SharedBox::new(5_i32);
        assert_eq!(a.strong_count(), 1);

        let b = a.clone();
        assert_eq!(a.strong_count(), 2);
        assert_eq!(*a, 5);
        assert_eq!(*b, 5);

        drop(a);
        assert_eq!(b.strong_count(), 1);
        assert_eq!(*b, 5);
    }

    #[test]
    fn null_handle_is_inert() {
        let null = SharedBox::<u32>::null();

        assert!(null.is_null());
        assert!(null.get().is_none());
        assert!(null.ptr().is_none());
        assert_eq!(null.strong_count(), 0);

        let copy = null.clone();
        assert!(copy.is_null());
        assert_eq!(copy, null);
    }

    #[test]
    fn take_leaves_source_null_without_count_change() {
        let counter = DropCounter::new();
        let mut a = SharedBox::new(counter.tracked());
        let witness = a.clone();
        let original = a.ptr();

        let b = a.take();

        assert!(a.is_null());
        assert_eq!(b.ptr(), original);
        assert_eq!(witness.strong_count(), 2);

        drop(a);
        drop(b);
        assert_eq!(counter.drops(), 0);

        drop(witness);
        assert_eq!(counter.drops(), 1);
    }

    #[test]
    fn assign_from_releases_old_and_moves_new() {
        let old_counter = DropCounter::new();
        let new_counter = DropCounter::new();

        let mut target = SharedBox::new(old_counter.tracked());
        let mut source = SharedBox::new(new_counter.tracked());

        target.assign_from(&mut source);

        assert_eq!(old_counter.drops(), 1);
        assert!(source.is_null());
        assert_eq!(target.strong_count(), 1);

        drop(target);
        assert_eq!(new_counter.drops(), 1);
    }

    #[test]
    fn clone_from_self_state_is_noop() {
        let counter = DropCounter::new();
        let mut a = SharedBox::new(counter.tracked());
        let b = a.clone();

        a.clone_from(&b);

        assert_eq!(a.strong_count(), 2);
        assert_eq!(counter.drops(), 0);
    }

    #[test]
    fn clone_from_other_releases_previous() {
        let old_counter = DropCounter::new();
        let new_counter = DropCounter::new();

        let mut a = SharedBox::new(old_counter.tracked());
        let b = SharedBox::new(new_counter.tracked());

        a.clone_from(&b);

        assert_eq!(old_counter.drops(), 1);
        assert!(a.same_owner(&b));
        assert_eq!(b.strong_count(), 2);
    }

    #[test]
    fn from_box_uses_owning_block() {
        let counter = DropCounter::new();
        let boxed = Box::new(counter.tracked());
        let original = NonNull::from(&*boxed);

        let shared = SharedBox::from_box(boxed);

        // The payload stays where the box put it.
        assert_eq!(shared.ptr(), Some(original));

        drop(shared);
        assert_eq!(counter.drops(), 1);
    }

    #[test]
    fn from_null_exclusive_is_null() {
        let shared = SharedBox::from_exclusive(ExclusiveBox::<u32>::null());

        assert!(shared.is_null());
    }

    #[test]
    fn compares_by_target_address() {
        let a = SharedBox::new(1_u32);
        let b = SharedBox::new(1_u32);
        let a2 = a.clone();

        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert!(SharedBox::<u32>::null() < a);

        let set: HashSet<_> = [a.clone(), a2, b.clone()].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn cast_to_field_shares_owner_at_offset() {
        struct Pair {
            _first: u64,
            second: u64,
        }

        let pair = SharedBox::new(Pair {
            _first: 1,
            second: 2,
        });

        let second: SharedBox<u64> = pair.cast_clone(|p| &p.second);

        assert_eq!(*second, 2);
        assert!(second.same_owner(&pair));
        assert_ne!(
            second.ptr().map(NonNull::cast::<()>),
            pair.ptr().map(NonNull::cast::<()>)
        );
        assert_eq!(pair.strong_count(), 2);

        drop(pair);
        assert_eq!(*second, 2);
        assert_eq!(second.strong_count(), 1);
    }

    #[test]
    fn cast_null_stays_null() {
        let null = SharedBox::<u32>::null();

        let cast: SharedBox<dyn fmt::Debug> =
            null.cast(|_| unreachable!("null handles are never cast"));

        assert!(cast.is_null());
    }

    #[test]
    #[should_panic]
    fn deref_null_panics() {
        let null = SharedBox::<u32>::null();
        let _value: u32 = *null;
    }

    #[test]
    fn debug_reports_count() {
        let a = SharedBox::new(1_u8);
        let _b = a.clone();

        assert!(format!("{a:?}").contains("strong_count: 2"));
    }
}
