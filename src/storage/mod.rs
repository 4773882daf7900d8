//! Durable storage of blobs, packages, and tags.
//!
//! The on-disk layout is a deliberate part of this crate's contract (see the root
//! documentation): any tool that understands the `blobs`/`packages`/`tags` directory structure
//! can read a repository without going through this crate at all.

pub mod fs;

pub use fs::FsRepository;
