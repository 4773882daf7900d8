//! The filesystem-backed storage backend: the only backend this crate implements.

mod blob;
mod manifest;
mod package;
mod repository;
mod tag;

pub use blob::BlobStorage;
pub use manifest::ManifestStorage;
pub use package::{Package, PackageStorage};
pub use repository::FsRepository;
pub use tag::{TagEntry, TagStorage};
