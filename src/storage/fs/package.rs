//! Packages: immutable, content-addressed collections of file data plus their cached manifest.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::digest::Digest;
use crate::error::Error;
use crate::tracking::Manifest;

use super::blob::BlobStorage;
use super::manifest::ManifestStorage;

const DIFF_DIR: &str = "diff";
const META_DIR: &str = "meta";

/// A single package on disk: a `diff` directory holding its rendered file data, and a `meta`
/// directory holding its cached manifest.
///
/// A package is considered completely immutable once committed; its identity (see
/// [`Package::digest`]) is the hash of everything under `diff`.
#[derive(Clone, Debug)]
pub struct Package {
    root: PathBuf,
}

impl Package {
    fn new(root: PathBuf) -> Self {
        Package { root }
    }

    /// The digest that identifies this package, taken from its directory name.
    pub fn digest(&self) -> Result<Digest, Error> {
        let name = self
            .root
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("{:?} is not a valid package path", self.root)))?;
        name.parse()
    }

    /// The root directory under which this package is stored.
    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    /// The directory holding this package's rendered file data.
    pub fn diff_dir(&self) -> PathBuf {
        self.root.join(DIFF_DIR)
    }

    /// The directory holding this package's cached manifest.
    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    /// Reads the cached manifest for this package. Cheap: requires no hashing.
    pub fn read_manifest(&self) -> Result<Manifest, Error> {
        ManifestStorage::new(self.meta_dir()).read()
    }

    /// Recomputes this package's manifest directly from its file data, bypassing the cache.
    ///
    /// Used to verify a package against corruption; in the common case
    /// [`Package::read_manifest`] is far cheaper and should be preferred.
    pub fn compute_manifest(&self) -> Result<Manifest, Error> {
        super::manifest::recompute(&self.diff_dir())
    }
}

fn ensure_package_dirs(root: &Path) -> Result<Package, Error> {
    fs::create_dir_all(root.join(DIFF_DIR)).map_err(|e| Error::io(root, e))?;
    fs::create_dir_all(root.join(META_DIR)).map_err(|e| Error::io(root, e))?;
    Ok(Package::new(root.to_path_buf()))
}

/// Manages the on-disk storage of packages under a single root directory.
#[derive(Clone, Debug)]
pub struct PackageStorage {
    root: PathBuf,
}

impl PackageStorage {
    /// Opens package storage rooted at `root`, which is created if it does not already exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        Ok(PackageStorage { root })
    }

    /// Reads package information for the package identified by `digest`.
    pub fn read_package(&self, digest: Digest) -> Result<Package, Error> {
        let path = self.root.join(digest.to_hex());
        if !path.exists() {
            return Err(Error::unknown_package(digest.to_hex()));
        }
        Ok(Package::new(path))
    }

    /// Removes a package from storage.
    pub fn remove_package(&self, digest: Digest) -> Result<(), Error> {
        let path = self.root.join(digest.to_hex());
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::unknown_package(digest.to_hex())),
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    /// Lists every package currently in storage.
    pub fn list_packages(&self) -> Result<Vec<Package>, Error> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.root, e)),
        };

        let mut packages = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.root, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("work-") {
                continue;
            }
            packages.push(Package::new(entry.path()));
        }
        Ok(packages)
    }

    /// Commits the contents of `source_dir` as a new package.
    ///
    /// `source_dir`'s file data is hashed and moved into `blobs` (the content-addressed, shared
    /// store, deduplicating against anything already committed) before the package's own `diff`
    /// directory is populated by hardlinking straight back out of `blobs`: a package never holds
    /// its own private copy of file bytes, only the blob store does. The manifest is written to
    /// the package's `meta` directory, and the whole package is atomically renamed into place
    /// under its digest. If another writer commits an identical tree first, the race is resolved
    /// by discarding this writer's staged copy and returning the already-committed package.
    pub fn commit_dir(&self, blobs: &BlobStorage, source_dir: &Path) -> Result<Package, Error> {
        info!(path = %source_dir.display(), "hashing and storing package contents");
        let manifest = blobs.commit_dir(source_dir)?;
        let digest = manifest.digest();
        let final_root = self.root.join(digest.to_hex());

        if final_root.exists() {
            debug!(%digest, "package already exists");
            return self.read_package(digest);
        }

        let staging_root = self.root.join(format!("work-{}", uuid::Uuid::new_v4()));
        let staged = ensure_package_dirs(&staging_root)?;
        fs::remove_dir(staged.diff_dir()).map_err(|e| Error::io(staged.diff_dir(), e))?;

        blobs.render_into(&manifest, &staged.diff_dir())?;
        ManifestStorage::new(staged.meta_dir()).write(&manifest)?;

        match fs::rename(&staging_root, &final_root) {
            Ok(()) => {}
            Err(_) if final_root.exists() => {
                debug!(%digest, "package already exists");
                fs::remove_dir_all(&staging_root).map_err(|e| Error::io(&staging_root, e))?;
            }
            Err(e) => return Err(Error::io(&staging_root, e)),
        }

        self.read_package(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_then_read_back() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"payload").unwrap();

        let store_dir = tempfile::tempdir().unwrap();
        let blobs = BlobStorage::new(store_dir.path().join("blobs")).unwrap();
        let packages = PackageStorage::new(store_dir.path().join("packages")).unwrap();

        let package = packages.commit_dir(&blobs, src.path()).unwrap();
        let digest = package.digest().unwrap();

        let read_back = packages.read_package(digest).unwrap();
        assert_eq!(read_back.read_manifest().unwrap().digest(), digest);
    }

    #[test]
    fn commit_is_idempotent() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"payload").unwrap();

        let store_dir = tempfile::tempdir().unwrap();
        let blobs = BlobStorage::new(store_dir.path().join("blobs")).unwrap();
        let packages = PackageStorage::new(store_dir.path().join("packages")).unwrap();

        let a = packages.commit_dir(&blobs, src.path()).unwrap();
        let b = packages.commit_dir(&blobs, src.path()).unwrap();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn remove_unknown_package_fails() {
        let store_dir = tempfile::tempdir().unwrap();
        let packages = PackageStorage::new(store_dir.path()).unwrap();
        let digest = crate::digest::hash_slice(b"nope");
        assert!(matches!(packages.remove_package(digest), Err(Error::UnknownObject { .. })));
    }
}
