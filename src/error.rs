//! The typed error taxonomy returned by every fallible operation in this crate.

use std::path::PathBuf;

use crate::digest::Digest;

/// Identifies what sort of object a lookup or corruption error refers to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ObjectKind {
    /// An opaque content-addressed blob.
    Blob,
    /// A committed package (manifest + blobs).
    Package,
    /// A mutable, human-readable alias for a digest.
    Tag,
    /// A named remote repository entry in a [`Config`](crate::config::Config).
    Remote,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Package => "package",
            ObjectKind::Tag => "tag",
            ObjectKind::Remote => "remote",
        };
        f.write_str(s)
    }
}

/// The error type returned by every operation in this crate.
///
/// Expected races (e.g. a concurrent writer finishing first during a rename) are recovered
/// locally wherever they occur and never surface as one of these variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A blob, package, or tag was requested that does not exist in the store.
    #[error("unknown {kind}: {id}")]
    UnknownObject {
        /// The kind of object that was looked up.
        kind: ObjectKind,
        /// The identifier (digest or tag name) that could not be found.
        id: String,
    },

    /// A stored object's recomputed digest disagrees with its name, or a manifest failed to
    /// parse from its canonical on-disk form.
    #[error("corrupt {kind}: {detail}")]
    Corruption {
        /// The kind of object found to be corrupt.
        kind: ObjectKind,
        /// A human-readable description of the mismatch.
        detail: String,
    },

    /// An unexpected filesystem failure occurred.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path the operation was acting on, if known.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Input was malformed: an invalid digest string, a path that escapes the store root, or a
    /// path containing a `..` component.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A tag or object already exists where a caller expected to create one.
    ///
    /// Most callers treat this condition as success (content-addressed writes are idempotent by
    /// design), but it is exposed for tag operations, which are not content-addressed.
    #[error("already exists: {0}")]
    AlreadyExists(Digest),
}

impl Error {
    pub(crate) fn unknown_blob(digest: Digest) -> Self {
        Error::UnknownObject {
            kind: ObjectKind::Blob,
            id: digest.to_hex(),
        }
    }

    pub(crate) fn unknown_package(reference: impl Into<String>) -> Self {
        Error::UnknownObject {
            kind: ObjectKind::Package,
            id: reference.into(),
        }
    }

    pub(crate) fn unknown_tag(name: impl Into<String>) -> Self {
        Error::UnknownObject {
            kind: ObjectKind::Tag,
            id: name.into(),
        }
    }

    pub(crate) fn unknown_remote(name: impl Into<String>) -> Self {
        Error::UnknownObject {
            kind: ObjectKind::Remote,
            id: name.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// A convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;
