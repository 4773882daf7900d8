//! The manifest model: hashing directory trees into canonical, comparable snapshots.

mod diff;
mod entry;
mod manifest;

pub use diff::{diff, Diff, DiffKind};
pub use entry::{Entry, EntryKind};
pub use manifest::{compute_entry, compute_manifest, Manifest, ManifestBuilder, Walk};
