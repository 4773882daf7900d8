//! A filesystem-backed repository: the top-level handle composing blob, package, and tag
//! storage under one root directory.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::digest::Digest;
use crate::error::Error;
use crate::tracking::Manifest;

use super::blob::BlobStorage;
use super::package::{Package, PackageStorage};
use super::tag::{TagEntry, TagStorage};

const BLOBS_SUBDIR: &str = "blobs";
const PACKAGES_SUBDIR: &str = "packages";
const TAGS_SUBDIR: &str = "tags";

/// A complete object store rooted at a single directory on the local filesystem.
///
/// Lays out its root as three independent subdirectories (`blobs`, `packages`, `tags`); any of
/// the three may be read and written without reference to the others, but [`FsRepository`] itself
/// is what ties commits, renders, and tags together into one coherent API.
#[derive(Clone, Debug)]
pub struct FsRepository {
    root: PathBuf,
    blobs: BlobStorage,
    packages: PackageStorage,
    tags: TagStorage,
}

impl FsRepository {
    /// Opens (creating if necessary) a repository rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        let blobs = BlobStorage::new(root.join(BLOBS_SUBDIR))?;
        let packages = PackageStorage::new(root.join(PACKAGES_SUBDIR))?;
        let tags = TagStorage::new(root.join(TAGS_SUBDIR))?;
        Ok(FsRepository {
            root,
            blobs,
            packages,
            tags,
        })
    }

    /// The root directory this repository is stored under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Commits the contents of `source_dir` as a new package, returning it.
    pub fn commit_dir(&self, source_dir: &Path) -> Result<Package, Error> {
        info!(path = %source_dir.display(), "committing directory");
        self.packages.commit_dir(&self.blobs, source_dir)
    }

    /// Reads package information for the package identified by `digest`.
    pub fn read_package(&self, digest: Digest) -> Result<Package, Error> {
        self.packages.read_package(digest)
    }

    /// Removes a package from the repository. Its blobs are left in place, since other packages
    /// may still reference them.
    pub fn remove_package(&self, digest: Digest) -> Result<(), Error> {
        self.packages.remove_package(digest)
    }

    /// Lists every package currently committed to this repository.
    pub fn list_packages(&self) -> Result<Vec<Package>, Error> {
        self.packages.list_packages()
    }

    /// Renders a manifest's blobs onto disk at the repository's rendered-cache location,
    /// returning the path.
    pub fn render_manifest(&self, manifest: &Manifest) -> Result<PathBuf, Error> {
        self.blobs.render_manifest(manifest)
    }

    /// Renders a manifest's blobs onto disk at an arbitrary destination directory.
    pub fn render_manifest_into(&self, manifest: &Manifest, dest: &Path) -> Result<(), Error> {
        self.blobs.render_into(manifest, dest)
    }

    /// Binds `name` to `target`, recording the change in the tag's history.
    pub fn set_tag(&self, name: &str, target: Digest) -> Result<(), Error> {
        self.tags.set_tag(name, target)
    }

    /// Reads the current binding of a tag.
    pub fn read_tag(&self, name: &str) -> Result<TagEntry, Error> {
        self.tags.read_tag(name)
    }

    /// Reads every binding ever recorded for a tag, oldest first.
    pub fn read_tag_history(&self, name: &str) -> Result<Vec<TagEntry>, Error> {
        self.tags.read_history(name)
    }

    /// Lists every tag name currently bound in this repository.
    pub fn list_tags(&self) -> Result<Vec<String>, Error> {
        self.tags.list_tags()
    }

    /// Verifies that a package's cached manifest still matches the data recorded under its
    /// `diff` directory, and that the digest naming the package matches both.
    ///
    /// Returns `Ok(())` if the package is intact, or `Err(Error::Corruption)` describing the
    /// first mismatch found.
    pub fn check_package(&self, digest: Digest) -> Result<(), Error> {
        let package = self.read_package(digest)?;
        let cached = package.read_manifest()?;
        let recomputed = package.compute_manifest()?;

        if cached.digest() != recomputed.digest() {
            return Err(Error::Corruption {
                kind: crate::error::ObjectKind::Package,
                detail: format!(
                    "cached manifest digest {} does not match recomputed digest {}",
                    cached.digest(),
                    recomputed.digest()
                ),
            });
        }

        if recomputed.digest() != digest {
            return Err(Error::Corruption {
                kind: crate::error::ObjectKind::Package,
                detail: format!(
                    "package directory name {} does not match its content digest {}",
                    digest,
                    recomputed.digest()
                ),
            });
        }

        for (path, entry) in recomputed.walk() {
            if entry.kind != crate::tracking::EntryKind::Blob {
                continue;
            }
            let blob_digest = entry.digest.expect("blob entry must carry a digest");
            if let Err(e) = self.blobs.open_blob(blob_digest) {
                return Err(Error::Corruption {
                    kind: crate::error::ObjectKind::Blob,
                    detail: format!("entry at {} references missing blob {}: {}", path, blob_digest, e),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn commit_render_and_tag_round_trip() {
        let store_dir = tempfile::tempdir().unwrap();
        let repo = FsRepository::open(store_dir.path()).unwrap();

        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("hello.txt"), b"world").unwrap();

        let package = repo.commit_dir(src.path()).unwrap();
        let digest = package.digest().unwrap();

        repo.set_tag("latest", digest).unwrap();
        assert_eq!(repo.read_tag("latest").unwrap().target, digest);

        let manifest = package.read_manifest().unwrap();
        let rendered = repo.render_manifest(&manifest).unwrap();
        assert_eq!(fs::read(rendered.join("hello.txt")).unwrap(), b"world");

        repo.check_package(digest).unwrap();
    }

    #[test]
    fn check_package_detects_blob_deletion() {
        let store_dir = tempfile::tempdir().unwrap();
        let repo = FsRepository::open(store_dir.path()).unwrap();

        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("hello.txt"), b"world").unwrap();
        let package = repo.commit_dir(src.path()).unwrap();
        let digest = package.digest().unwrap();

        let entry = package
            .read_manifest()
            .unwrap()
            .get_path("hello.txt")
            .unwrap()
            .unwrap()
            .clone();
        let blob_path = store_dir.path().join("blobs").join(entry.digest.unwrap().to_hex());
        fs::remove_file(blob_path).unwrap();

        assert!(matches!(repo.check_package(digest), Err(Error::Corruption { .. })));
    }

    #[test]
    fn list_packages_skips_staging_dirs() {
        let store_dir = tempfile::tempdir().unwrap();
        let repo = FsRepository::open(store_dir.path()).unwrap();
        assert!(repo.list_packages().unwrap().is_empty());
    }
}
