//! A single node in a [`Manifest`](super::Manifest): a file, directory, symlink, or mask.

use std::cmp::Ordering;

use crate::digest::Digest;

/// The closed set of kinds a manifest [`Entry`] may take.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EntryKind {
    /// A regular file or symbolic link.
    Blob,
    /// A directory.
    Tree,
    /// An explicit deletion recorded when one layer overlays another.
    ///
    /// A mask carries no digest content of its own, but it still participates in tree hashing so
    /// that a directory's digest reflects the masks it contains.
    Mask,
}

impl EntryKind {
    /// The single-byte tag used when serializing this kind into a tree's canonical form.
    pub(crate) fn tag(self) -> u8 {
        match self {
            EntryKind::Blob => b'b',
            EntryKind::Tree => b't',
            EntryKind::Mask => b'm',
        }
    }

    /// Orders blobs and masks (leaves) before trees, as required by the sort rule: within one
    /// tree, children are ordered with blobs before trees, and a mask is structurally a leaf with
    /// no descendants of its own.
    fn sort_rank(self) -> u8 {
        match self {
            EntryKind::Blob | EntryKind::Mask => 0,
            EntryKind::Tree => 1,
        }
    }
}

/// One entry in a manifest: a name, the kind of node it is, its mode bits, and (for blobs and
/// trees) the digest of its content.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    /// The path component within its parent tree. Never contains `/`.
    pub name: String,
    /// What sort of node this entry represents.
    pub kind: EntryKind,
    /// POSIX-style permission and file-type bits.
    ///
    /// Only the permission and file-type bits are canonical; timestamps, ownership, and extended
    /// attributes are not captured here so that identical content yields identical digests across
    /// machines.
    pub mode: u32,
    /// The digest of this entry's content.
    ///
    /// For a blob this is the hash of the file bytes (or, for a symlink, the UTF-8 bytes of its
    /// target). For a tree this is the hash of its canonical child list. `None` for masks, which
    /// carry no content.
    pub digest: Option<Digest>,
    /// The size of the entry's content in bytes, if known. `None` for trees and masks.
    pub size: Option<u64>,
}

impl Entry {
    /// Returns `true` if this entry's mode bits have the symlink type bit set.
    pub fn is_symlink(&self) -> bool {
        self.mode & 0o170000 == 0o120000
    }

    /// Returns `true` if this entry's mode bits mark it as executable by its owner.
    pub fn is_executable(&self) -> bool {
        self.mode & 0o100 != 0
    }

    /// Orders entries the way a single tree's children are ordered for hashing and for
    /// [`walk()`](super::Manifest::walk): blobs and masks before trees, then lexicographically
    /// by name within a kind.
    pub(crate) fn canonical_cmp(&self, other: &Entry) -> Ordering {
        self.kind
            .sort_rank()
            .cmp(&other.kind.sort_rank())
            .then_with(|| self.name.cmp(&other.name))
    }
}
