//! Error surfaces: user-visible exceptions and internal status codes.
//!
//! Two classes of failure, matching the original runtime's split between
//! `KOS_OBJ_ID` exception objects and `KOS_STATUS` internal codes:
//! [`ExceptionKind`] is what a mutator observes via [`Ctx`](crate::ctx::Ctx)'s
//! pending-exception slot; [`InternalError`] is the `Result<T, E>` type
//! threaded through the collector and lock-free containers before it either
//! gets converted into an exception or resolved internally (e.g. "help and
//! retry").
use thiserror::Error;

/// User-visible exception kinds. Exactly the seven kinds spec.md §7 lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExceptionKind {
    #[error("out of memory")]
    OutOfMemory,
    #[error("bad type")]
    BadType,
    #[error("index out of range")]
    IndexOutOfRange,
    #[error("read only")]
    ReadOnly,
    #[error("no such property")]
    NoSuchProperty,
    #[error("setter raised")]
    SetterRaised,
    #[error("empty")]
    Empty,
}

/// Internal status codes threaded through the call chain before becoming an
/// exception (or being handled transparently, e.g. `SuccessReturn` is used
/// to unwind a helper loop without it being an actual failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InternalError {
    #[error("exception pending")]
    ExceptionPending,
    #[error("out of memory")]
    OutOfMemory,
    #[error("internal error")]
    Internal,
    #[error("not found")]
    NotFound,
    #[error("OS error {0}")]
    Errno(i32),
    #[error("setter invocation required")]
    Setter,
    #[error("success (early return)")]
    SuccessReturn,
}

impl From<InternalError> for ExceptionKind {
    /// Converts an internal status into the exception a mutator observes at
    /// an API boundary. `ExceptionPending`/`Setter`/`SuccessReturn` are not
    /// meant to cross this boundary as-is; callers that reach this impl with
    /// one of those have a bug in their error handling, so the conservative
    /// choice (`Internal` -> treated like OOM-class failure) avoids silently
    /// losing the error even though it should not normally happen.
    fn from(err: InternalError) -> Self {
        match err {
            InternalError::OutOfMemory => ExceptionKind::OutOfMemory,
            InternalError::NotFound => ExceptionKind::NoSuchProperty,
            InternalError::Setter => ExceptionKind::SetterRaised,
            InternalError::ExceptionPending
            | InternalError::Internal
            | InternalError::Errno(_)
            | InternalError::SuccessReturn => ExceptionKind::BadType,
        }
    }
}

pub type Result<T> = std::result::Result<T, InternalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_no_such_property() {
        assert_eq!(
            ExceptionKind::from(InternalError::NotFound),
            ExceptionKind::NoSuchProperty
        );
    }

    #[test]
    fn setter_maps_to_setter_raised() {
        assert_eq!(
            ExceptionKind::from(InternalError::Setter),
            ExceptionKind::SetterRaised
        );
    }
}
