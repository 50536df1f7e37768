use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::{ControlBlock, Error, Result, SharedBox};

/// Back-reference from an object to the control block of the [`SharedBox`] that owns it.
///
/// Embed a `SelfRef` in a type that implements [`SelfReferencing`]. It starts out unwired and is
/// wired by [`SharedBox::new_self_referencing()`] or
/// [`SharedBox::from_exclusive_self_referencing()`] when the object is placed into a
/// `SharedBox`. User code can never wire it.
///
/// The back-reference does not keep the object alive. It is unwired again right before the
/// object is dropped, so a `SelfRef` moved out of a dying object refers to nothing.
///
/// A wired `SelfRef` also remembers the address of the object it belongs to. Only that object
/// can use it: a `SelfRef` that has been moved into another object is treated as unwired.
///
/// Cloning a `SelfRef` produces an unwired one, because the clone belongs to a different object.
pub struct SelfRef {
    block: AtomicPtr<ControlBlock>,

    // Address of the payload that was placed into the `SharedBox`. Stays set after unwiring,
    // which lets the payload tell "being destroyed" apart from "never shared".
    payload: AtomicPtr<()>,
}

impl SelfRef {
    /// Creates an unwired back-reference.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            block: AtomicPtr::new(ptr::null_mut()),
            payload: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Whether the owning object currently lives in a self-referencing [`SharedBox`].
    #[must_use]
    pub fn is_wired(&self) -> bool {
        !self.block.load(Ordering::Acquire).is_null()
    }

    /// Records the control block that owns `payload`, the object containing this back-reference.
    ///
    /// Any earlier record is replaced.
    pub(crate) fn wire(&self, block: NonNull<ControlBlock>, payload: NonNull<()>) {
        self.payload.store(payload.as_ptr(), Ordering::Relaxed);
        self.block.store(block.as_ptr(), Ordering::Release);
    }

    /// Forgets the control block, keeping the payload address.
    ///
    /// Called by the control block right before the payload is dropped.
    pub(crate) fn unwire(&self) {
        self.block.store(ptr::null_mut(), Ordering::Release);
    }

    /// The control block that owns `payload`, if this back-reference was wired for it.
    fn block_for(&self, payload: NonNull<()>) -> Result<NonNull<ControlBlock>> {
        let block = self.block.load(Ordering::Acquire);
        let recorded = self.payload.load(Ordering::Relaxed);

        if recorded.is_null() || !ptr::addr_eq(recorded, payload.as_ptr()) {
            return Err(Error::NotShared);
        }

        NonNull::new(block).ok_or(Error::Expired)
    }
}

impl Default for SelfRef {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SelfRef {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl fmt::Debug for SelfRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfRef")
            .field("block", &self.block.load(Ordering::Relaxed))
            .field("payload", &self.payload.load(Ordering::Relaxed))
            .finish()
    }
}

/// Lets an object that is owned by a [`SharedBox`] obtain new shared handles to itself.
///
/// Only [`SharedBox::new_self_referencing()`] and [`SharedBox::from_exclusive_self_referencing()`]
/// wire the back-reference. The other constructors cannot tell whether a type implements this
/// trait, so an object placed into a `SharedBox` through them stays unwired and
/// [`shared_from_self()`][Self::shared_from_self] returns [`Error::NotShared`].
///
/// # Safety
///
/// Implementations must return from [`self_ref()`][Self::self_ref] a [`SelfRef`] that is stored
/// inline in `self` (as a field of `self`, or of a value `self` contains inline) and must always
/// return the same one. The framework relies on this to know that an object whose `SelfRef` is
/// wired lives inside the payload of the recorded control block.
///
/// # Examples
///
/// ```
/// use shared_box::{SelfRef, SelfReferencing, SharedBox};
///
/// struct Session {
///     name: String,
///     self_ref: SelfRef,
/// }
///
/// // SAFETY: The `SelfRef` is a field of the session itself.
/// unsafe impl SelfReferencing for Session {
///     fn self_ref(&self) -> &SelfRef {
///         &self.self_ref
///     }
/// }
///
/// let session = SharedBox::new_self_referencing(Session {
///     name: "main".to_string(),
///     self_ref: SelfRef::new(),
/// });
///
/// // Code holding only `&Session` can mint a new owner.
/// let also_session = session.shared_from_self().unwrap();
///
/// assert_eq!(also_session.name, "main");
/// assert_eq!(session.strong_count(), 2);
/// ```
pub unsafe trait SelfReferencing {
    /// The back-reference embedded in this object.
    fn self_ref(&self) -> &SelfRef;

    /// Creates a new [`SharedBox`] that shares ownership of this object with the existing ones.
    ///
    /// This never allocates; it only registers another owner with the existing control block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotShared`] if the object was never placed into a [`SharedBox`] through
    /// a self-referencing constructor (e.g. it lives on the stack or in a plain `Box`).
    ///
    /// Returns [`Error::Expired`] if the last owner has already been dropped and the object is
    /// being destroyed (e.g. when called from the object's own `Drop`).
    fn shared_from_self(&self) -> Result<SharedBox<Self>> {
        let payload = NonNull::from(self);
        let block = self.self_ref().block_for(payload.cast::<()>())?;

        // SAFETY: The back-reference was wired for exactly this object, and the trait contract
        // guarantees that it lives inside `self`. The block unwires it before the payload is
        // dropped and frees its own memory only afterwards, so a wired block is still allocated.
        let header = unsafe { block.as_ref() };

        if !header.try_incref() {
            return Err(Error::Expired);
        }

        // SAFETY: We now own one share of the block, and `self` is the payload it owns.
        Ok(unsafe { SharedBox::from_parts(payload, block) })
    }
}
