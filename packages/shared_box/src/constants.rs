// Dereferencing a null box is a caller bug, never a recoverable condition (we panic).
pub(crate) const ERR_NULL_DEREF: &str = "dereferenced a null box - check `is_null()` or use \
    `get()` before accessing the target";
