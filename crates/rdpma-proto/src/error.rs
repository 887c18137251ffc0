//! Error kinds for the rdpma wire protocol (spec §7).

use thiserror::Error;

/// Result type used throughout the rdpma crates.
pub type Result<T> = std::result::Result<T, Error>;

/// System-level error surfaced to the client as a negated POSIX-like code.
///
/// Mirrors `enum rdpma_system_error` in the original client: `NONE`,
/// `NO_HNDLR`, `OVERFLOW`, `DIED`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Received an imm-data control word whose message kind has no handler.
    #[error("no handler for message kind")]
    NoHandler,

    /// A bounded counter or id space (queue slot ids, page count) overflowed.
    #[error("internal counter or id space overflow")]
    Overflow,

    /// The peer disconnected, or a signal interrupted a blocking wait.
    #[error("peer died or wait was interrupted")]
    Died,

    /// A GET found no value for the key (`READ_ABORTED` in-band reply).
    #[error("key not found")]
    NotFound,

    /// A CQ completion carried a non-success status.
    #[error("work completion failed: {0}")]
    CompletionFailed(String),

    /// The control word encoded a field value out of its bit range.
    #[error("control word field out of range: {0}")]
    FieldOutOfRange(&'static str),
}

impl Error {
    /// Negated POSIX-like errno this error maps to, per spec §7.
    ///
    /// `NotFound` and `CompletionFailed` are not part of the in-band
    /// `rdpma_system_error` enum; they are protocol-engine-level outcomes
    /// and have no errno mapping.
    pub fn errno(self) -> Option<i32> {
        match self {
            Error::NoHandler => Some(-libc_enoprotoopt()),
            Error::Overflow => Some(-libc_eoverflow()),
            Error::Died => Some(-libc_ehostdown()),
            Error::NotFound | Error::CompletionFailed(_) | Error::FieldOutOfRange(_) => None,
        }
    }
}

// Small local stand-ins for the libc errno constants the original kernel
// module translates into (ENOPROTOOPT, EOVERFLOW, EHOSTDOWN); kept as
// plain constants rather than pulling the `libc` crate into this crate,
// which otherwise has no use for it.
const fn libc_enoprotoopt() -> i32 {
    92
}
const fn libc_eoverflow() -> i32 {
    75
}
const fn libc_ehostdown() -> i32 {
    112
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_matches_spec() {
        assert_eq!(Error::NoHandler.errno(), Some(-92));
        assert_eq!(Error::Overflow.errno(), Some(-75));
        assert_eq!(Error::Died.errno(), Some(-112));
        assert_eq!(Error::NotFound.errno(), None);
    }
}
