use thiserror::Error;

/// Errors that can occur when an object asks for a new shared handle to itself.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The object is not owned by a [`SharedBox`][crate::SharedBox] created through one of the
    /// self-referencing constructors, so there is no control block to share.
    #[error("object is not owned by a self-referencing SharedBox")]
    NotShared,

    /// The last [`SharedBox`][crate::SharedBox] owning the object is gone and the object is being
    /// destroyed, so no new owner may be created.
    #[error("object is being destroyed and can no longer be shared")]
    Expired,
}

/// A specialized `Result` type for shared box operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
