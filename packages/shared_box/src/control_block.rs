use std::any::type_name;
use std::mem::{ManuallyDrop, offset_of};
use std::process;
use std::ptr::NonNull;
use std::sync::atomic::{self, AtomicIsize, Ordering};

use tracing::trace;

use crate::{Deleter, SelfReferencing};

/// Counts above this abort the process. The gap up to `isize::MAX` absorbs increments that
/// race with the check on other threads.
const MAX_STRONG_COUNT: isize = isize::MAX / 2;

/// Header shared by every control block, tracking how many `SharedBox` handles keep a payload
/// alive and remembering how to destroy the payload without knowing its type.
///
/// The concrete block types embed this header as their first field (`#[repr(C)]`), so a pointer
/// to the header is also a pointer to the whole block. The `destroy` function is monomorphized
/// for the concrete block type and is the only thing that knows what to free.
#[repr(C)]
#[derive(Debug)]
pub(crate) struct ControlBlock {
    strong: AtomicIsize,

    /// Destroys the payload and frees the block. Called exactly once, after the strong count
    /// has reached zero.
    destroy: unsafe fn(NonNull<ControlBlock>),
}

impl ControlBlock {
    /// A header with a strong count of 1, owned by the `SharedBox` about to be created.
    fn new(destroy: unsafe fn(NonNull<Self>)) -> Self {
        Self {
            strong: AtomicIsize::new(1),
            destroy,
        }
    }

    /// Registers one more owner.
    ///
    /// The caller must already be an owner, so the count cannot concurrently reach zero.
    pub(crate) fn incref(&self) {
        // Relaxed is enough: a new owner is derived from an existing one, which already keeps
        // the payload alive, and no data is published by the increment.
        let previous = self.strong.fetch_add(1, Ordering::Relaxed);

        if previous > MAX_STRONG_COUNT {
            // An overflowing count would eventually free a payload that is still in use.
            process::abort();
        }
    }

    /// Registers one more owner unless the payload is already being destroyed.
    ///
    /// Returns whether the caller is now an owner.
    pub(crate) fn try_incref(&self) -> bool {
        let result = self
            .strong
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |count| {
                if count == 0 {
                    None
                } else {
                    count.checked_add(1)
                }
            });

        match result {
            Ok(previous) if previous > MAX_STRONG_COUNT => process::abort(),
            Ok(_) => true,
            Err(_) => false,
        }
    }

    /// Best-effort snapshot of the strong count, for diagnostics only.
    pub(crate) fn count(&self) -> isize {
        self.strong.load(Ordering::Relaxed)
    }

    /// Gives up one ownership share, destroying the payload and the block if it was the last one.
    ///
    /// # Safety
    ///
    /// The caller must own one share of the strong count of a live block and must not use
    /// `block` (or any payload pointer derived from it) after this call.
    #[cfg_attr(test, mutants::skip)] // Mutation causes use-after-free or leaks.
    pub(crate) unsafe fn decref(block: NonNull<Self>) {
        // SAFETY: The caller owns a share, so the block is alive until we give it up below.
        let header = unsafe { block.as_ref() };

        // Release publishes our accesses to the payload to whichever thread ends up destroying it.
        if header.strong.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }

        // Acquire pairs with the Release decrements of every other former owner, so all their
        // accesses to the payload happen-before the destruction below.
        atomic::fence(Ordering::Acquire);

        let destroy = header.destroy;

        // SAFETY: We observed the 1 -> 0 transition, so we are the only party left with access
        // to the block and no further increments are legal.
        unsafe {
            destroy(block);
        }
    }
}

/// A control block for a payload that lives in its own allocation and is released by a deleter.
#[repr(C)]
pub(crate) struct OwningBlock<T: ?Sized, D: Deleter<T>> {
    header: ControlBlock,
    ptr: NonNull<T>,
    deleter: D,
}

impl<T: ?Sized, D: Deleter<T>> OwningBlock<T, D> {
    /// Allocates a block that takes ownership of `ptr`, with a strong count of 1.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` is exclusively owned by the caller and that
    /// `deleter` can release it. Ownership of `ptr` transfers to the returned block.
    #[must_use]
    pub(crate) unsafe fn allocate(ptr: NonNull<T>, deleter: D) -> NonNull<ControlBlock> {
        Self::allocate_with(ptr, deleter, Self::destroy)
    }

    /// Like [`allocate()`][Self::allocate] but also wires the payload's `SelfRef` to the new
    /// block, and unwires it again before the payload is released.
    ///
    /// # Safety
    ///
    /// Same as [`allocate()`][Self::allocate]; in addition `ptr` must be valid for reads.
    #[must_use]
    pub(crate) unsafe fn allocate_self_referencing(
        ptr: NonNull<T>,
        deleter: D,
    ) -> NonNull<ControlBlock>
    where
        T: SelfReferencing,
    {
        let block = Self::allocate_with(ptr, deleter, Self::destroy_self_referencing);

        // SAFETY: The caller guarantees that the payload is valid and we now own it.
        let payload = unsafe { ptr.as_ref() };
        payload.self_ref().wire(block, ptr.cast::<()>());

        block
    }

    fn allocate_with(
        ptr: NonNull<T>,
        deleter: D,
        destroy: unsafe fn(NonNull<ControlBlock>),
    ) -> NonNull<ControlBlock> {
        let block = Box::new(Self {
            header: ControlBlock::new(destroy),
            ptr,
            deleter,
        });

        trace!(
            payload = type_name::<T>(),
            deleter = type_name::<D>(),
            "allocated owning control block"
        );

        NonNull::from(Box::leak(block)).cast::<ControlBlock>()
    }

    #[cfg_attr(test, mutants::skip)] // Mutation causes use-after-free or leaks.
    unsafe fn destroy_self_referencing(header: NonNull<ControlBlock>)
    where
        T: SelfReferencing,
    {
        let block = header.cast::<Self>().as_ptr();

        // SAFETY: The block is alive and we are its last owner, so the fields are readable.
        let ptr = unsafe { (*block).ptr };

        // SAFETY: The payload is not released until the deleter runs below.
        unsafe { ptr.as_ref() }.self_ref().unwire();

        // SAFETY: Forwarding our own guarantees; this block was allocated by `allocate_with()`.
        unsafe {
            Self::destroy(header);
        }
    }

    // The header must stay valid while the deleter runs, because the payload may look at it
    // through its `SelfRef` while being dropped.
    #[cfg_attr(test, mutants::skip)] // Mutation causes use-after-free or leaks.
    unsafe fn destroy(header: NonNull<ControlBlock>) {
        // This function is only ever installed into the header of an `OwningBlock<T, D>`
        // allocated by `allocate()`, and the header is its first field.
        let block = header.cast::<Self>().as_ptr();

        // SAFETY: The block is alive and we are its last owner, so the fields are readable.
        let ptr = unsafe { (*block).ptr };

        // SAFETY: As above; nothing else touches the deleter, so we may borrow it exclusively.
        let deleter = unsafe { &mut (*block).deleter };

        // SAFETY: The block owned `ptr` exclusively and `allocate()` requires the deleter to
        // match it.
        unsafe {
            deleter.delete(ptr);
        }

        // SAFETY: The payload is gone, only the block allocation itself remains to be freed.
        drop(unsafe { Box::from_raw(block) });

        trace!(
            payload = type_name::<T>(),
            "destroyed owning control block"
        );
    }
}

/// A control block and its payload, colocated in a single allocation.
#[repr(C)]
pub(crate) struct FusedBlock<T> {
    header: ControlBlock,

    // Dropped explicitly by `destroy()` before the allocation is freed.
    value: ManuallyDrop<T>,
}

impl<T> FusedBlock<T> {
    /// Allocates a block containing `value`, with a strong count of 1.
    ///
    /// Returns the payload pointer and the block pointer, both pointing into the same allocation.
    #[must_use]
    pub(crate) fn allocate(value: T) -> (NonNull<T>, NonNull<ControlBlock>) {
        Self::allocate_with(value, Self::destroy)
    }

    /// Like [`allocate()`][Self::allocate] but also wires the payload's `SelfRef` to the new
    /// block, and unwires it again before the payload is dropped.
    #[must_use]
    pub(crate) fn allocate_self_referencing(value: T) -> (NonNull<T>, NonNull<ControlBlock>)
    where
        T: SelfReferencing,
    {
        let (value, block) = Self::allocate_with(value, Self::destroy_self_referencing);

        // SAFETY: The payload was just initialized and we hold the only share of the block.
        let payload = unsafe { value.as_ref() };
        payload.self_ref().wire(block, value.cast::<()>());

        (value, block)
    }

    fn allocate_with(
        value: T,
        destroy: unsafe fn(NonNull<ControlBlock>),
    ) -> (NonNull<T>, NonNull<ControlBlock>) {
        let block = NonNull::from(Box::leak(Box::new(Self {
            header: ControlBlock::new(destroy),
            value: ManuallyDrop::new(value),
        })));

        // SAFETY: We are making a pointer to a known field at a compiler-guaranteed offset
        // inside the allocation we just created.
        let value = unsafe { block.byte_add(offset_of!(Self, value)) }.cast::<T>();

        trace!(
            payload = type_name::<T>(),
            "allocated fused control block"
        );

        (value, block.cast::<ControlBlock>())
    }

    #[cfg_attr(test, mutants::skip)] // Mutation causes use-after-free or leaks.
    unsafe fn destroy(header: NonNull<ControlBlock>) {
        // This function is only ever installed into the header of a `FusedBlock<T>` allocated
        // by `allocate()`, and the header is its first field.
        let block = header.cast::<Self>().as_ptr();

        // SAFETY: We are the last owner, the payload is initialized and is never touched again.
        // The header stays valid while the payload is dropped.
        unsafe {
            ManuallyDrop::drop(&mut (*block).value);
        }

        // SAFETY: The payload is gone; this frees the single combined allocation.
        drop(unsafe { Box::from_raw(block) });

        trace!(
            payload = type_name::<T>(),
            "destroyed fused control block"
        );
    }

    #[cfg_attr(test, mutants::skip)] // Mutation causes use-after-free or leaks.
    unsafe fn destroy_self_referencing(header: NonNull<ControlBlock>)
    where
        T: SelfReferencing,
    {
        let block = header.cast::<Self>().as_ptr();

        // SAFETY: We are the last owner and the payload has not been dropped yet.
        let value = unsafe { &(*block).value };
        value.self_ref().unwire();

        // SAFETY: Forwarding our own guarantees; this block was allocated by `allocate_with()`.
        unsafe {
            Self::destroy(header);
        }
    }
}
