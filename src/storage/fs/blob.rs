//! Content-addressed storage of individual blobs (files and symlink targets), and of whole
//! directory trees rendered from them.

use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::debug;

use crate::digest::Digest;
use crate::error::Error;
use crate::tracking::{self, EntryKind, Manifest};

const READONLY_MODE: u32 = 0o444;

/// A content-addressed store of blobs, keyed by the hex digest of their bytes.
///
/// Blobs are written once and never modified; a write that lands on a digest which is already
/// present is a safe no-op rather than an error, since the content is by definition identical.
#[derive(Clone, Debug)]
pub struct BlobStorage {
    root: PathBuf,
}

impl BlobStorage {
    /// Opens a blob store rooted at `root`, which is created if it does not already exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        Ok(BlobStorage { root })
    }

    fn blob_path(&self, digest: Digest) -> PathBuf {
        self.root.join(digest.to_hex())
    }

    /// A fresh, unused path under this store's root named `work-<uuid>`, used as a staging
    /// location for both single files and whole directory trees before they are renamed into
    /// their final content-addressed location.
    fn work_path(&self) -> PathBuf {
        self.root.join(format!("work-{}", uuid::Uuid::new_v4()))
    }

    /// Opens a handle to the blob identified by `digest`.
    pub fn open_blob(&self, digest: Digest) -> Result<File, Error> {
        let path = self.blob_path(digest);
        File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::unknown_blob(digest)
            } else {
                Error::io(path, e)
            }
        })
    }

    /// Reads `data` to completion and stores it as a blob, returning its digest.
    ///
    /// The stream is hashed while it is written to a staging file under this store's root, then
    /// the staging file is atomically renamed into place. If another writer commits the same
    /// digest first, the race is resolved silently: the staging file is discarded and the
    /// already-committed blob is left untouched.
    pub fn write_blob<R: Read>(&self, mut data: R) -> Result<Digest, Error> {
        let working_path = self.work_path();
        let mut working_file = File::create(&working_path).map_err(|e| Error::io(&working_path, e))?;

        let digest = {
            let mut writer = crate::digest::HashWriter::new(&mut working_file);
            io::copy(&mut data, &mut writer).map_err(|e| Error::io(&working_path, e))?;
            writer.digest()
        };

        self.commit_staged_file(working_path, digest)?;
        Ok(digest)
    }

    fn commit_staged_file(&self, working_path: PathBuf, digest: Digest) -> Result<(), Error> {
        let final_path = self.blob_path(digest);
        match fs::rename(&working_path, &final_path) {
            Ok(()) => {
                fs::set_permissions(&final_path, fs::Permissions::from_mode(READONLY_MODE))
                    .map_err(|e| Error::io(&final_path, e))?;
                // Pinned to epoch zero once, here, rather than on every hardlinked copy: a blob
                // file's inode is shared across every package that references it, so touching its
                // mtime after the fact would touch every renderer's view of it at once.
                filetime::set_file_mtime(&final_path, FileTime::zero())
                    .map_err(|e| Error::io(&final_path, e))?;
            }
            Err(e) if final_path.exists() => {
                debug!(%digest, "blob already exists");
                let _ = fs::remove_file(&working_path);
                let _ = e;
            }
            Err(e) => return Err(Error::io(&working_path, e)),
        }
        Ok(())
    }

    /// Commits the contents of `source_dir` as a package's file data.
    ///
    /// The source tree is copied into a staging area, hashed into a [`Manifest`], and every
    /// regular file is moved into the blob store under its digest (symlinks are stored as blobs
    /// of their UTF-8 target text). The staging area itself is finally renamed into this store's
    /// rendered-cache slot for the resulting manifest digest, so a subsequent
    /// [`BlobStorage::render_manifest`] of the same manifest is instant.
    pub fn commit_dir(&self, source_dir: &Path) -> Result<Manifest, Error> {
        let working_path = self.work_path();
        copy_tree(source_dir, &working_path)?;

        debug!(path = %working_path.display(), "computing manifest for staged tree");
        let manifest = tracking::compute_manifest(&working_path)?;

        debug!(digest = %manifest.digest(), "committing blobs");
        for (rel_path, entry) in manifest.walk() {
            if entry.kind != EntryKind::Blob {
                continue;
            }

            let rendered_path = join_rel(&working_path, &rel_path);
            let digest = entry.digest.expect("blob entry must carry a digest");

            if entry.is_symlink() {
                let target = fs::read_link(&rendered_path).map_err(|e| Error::io(&rendered_path, e))?;
                let target = target.to_str().ok_or_else(|| {
                    Error::InvalidInput(format!("symlink target at {:?} is not valid UTF-8", rendered_path))
                })?;
                let written = self.write_blob(io::Cursor::new(target.as_bytes()))?;
                debug_assert_eq!(written, digest, "symlink blob digest must match manifest entry");
                continue;
            }

            self.commit_staged_file(rendered_path, digest)?;
        }

        let rendered_dir = self.root.join(manifest.digest().to_hex());
        match fs::rename(&working_path, &rendered_dir) {
            Ok(()) => {}
            Err(_) if rendered_dir.exists() => {
                fs::remove_dir_all(&working_path).map_err(|e| Error::io(&working_path, e))?;
            }
            Err(e) => return Err(Error::io(&working_path, e)),
        }

        self.render_manifest(&manifest)?;
        Ok(manifest)
    }

    /// Renders a manifest's blobs onto disk as a real directory tree, reusing a previously
    /// rendered cache if one exists for this manifest's digest.
    ///
    /// Regular files are hard-linked from the blob store (never copied); symlinks are recreated
    /// from their blob's stored target text. Returns the path to the rendered tree.
    pub fn render_manifest(&self, manifest: &Manifest) -> Result<PathBuf, Error> {
        let rendered_dir = self.root.join(manifest.digest().to_hex());
        self.render_into(manifest, &rendered_dir)?;
        Ok(rendered_dir)
    }

    /// Shared rendering logic used both by `commit_dir`'s caching step and by public
    /// `render_manifest` calls against arbitrary destinations (e.g. a package's `diff` directory).
    pub(crate) fn render_into(&self, manifest: &Manifest, dest: &Path) -> Result<(), Error> {
        for (rel_path, entry) in manifest.walk() {
            let target_path = join_rel(dest, &rel_path);

            match entry.kind {
                EntryKind::Tree => {
                    fs::create_dir_all(&target_path).map_err(|e| Error::io(&target_path, e))?;
                }
                EntryKind::Blob => {
                    let digest = entry.digest.expect("blob entry must carry a digest");
                    let blob_path = self.blob_path(digest);

                    if entry.is_symlink() {
                        let mut contents = String::new();
                        self.open_blob(digest)?
                            .read_to_string(&mut contents)
                            .map_err(|e| Error::io(&blob_path, e))?;
                        match symlink(&contents, &target_path) {
                            Ok(()) => {}
                            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                            Err(e) => return Err(Error::io(&target_path, e)),
                        }
                        continue;
                    }

                    match fs::hard_link(&blob_path, &target_path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {
                            return Err(Error::unknown_blob(digest))
                        }
                        Err(e) => return Err(Error::io(&target_path, e)),
                    }
                }
                EntryKind::Mask => {}
            }
        }

        // Permissions are applied in a second, reverse-order pass: a directory must stay
        // writable while its children are still being created inside it.
        //
        // This pass only touches TREE entries. A rendered regular file is a hardlink to the blob
        // store (see above), sharing one inode with that blob and with every other package that
        // references the same content; chmod-ing or touching its mtime here would rewrite the
        // blob's own `0o444` mode (and every other renderer's view of it) out from under it.
        // Blob mode and mtime are fixed once, when the blob itself is written
        // (`commit_staged_file`), and never revisited. Symlinks carry their own inode per
        // rendered path, so their mtime is still safe to pin here.
        let mut entries: Vec<_> = manifest.walk().collect();
        entries.reverse();
        for (rel_path, entry) in entries {
            if entry.kind == EntryKind::Mask {
                continue;
            }
            let target_path = join_rel(dest, &rel_path);

            if entry.is_symlink() {
                let _ = filetime::set_symlink_file_times(&target_path, FileTime::zero(), FileTime::zero());
                continue;
            }

            if entry.kind != EntryKind::Tree {
                continue;
            }

            let mode = entry.mode & 0o7777;
            fs::set_permissions(&target_path, fs::Permissions::from_mode(mode))
                .map_err(|e| Error::io(&target_path, e))?;
            filetime::set_file_mtime(&target_path, FileTime::zero())
                .map_err(|e| Error::io(&target_path, e))?;
        }

        Ok(())
    }
}

fn join_rel(base: &Path, rel_path: &str) -> PathBuf {
    let trimmed = rel_path.trim_start_matches('/');
    if trimmed.is_empty() {
        base.to_path_buf()
    } else {
        base.join(trimmed)
    }
}

/// Recursively copies a directory tree, preserving symlinks rather than following them.
pub(crate) fn copy_tree(src: &Path, dest: &Path) -> Result<(), Error> {
    fs::create_dir_all(dest).map_err(|e| Error::io(dest, e))?;

    for entry in fs::read_dir(src).map_err(|e| Error::io(src, e))? {
        let entry = entry.map_err(|e| Error::io(src, e))?;
        let file_type = entry.file_type().map_err(|e| Error::io(entry.path(), e))?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path).map_err(|e| Error::io(&src_path, e))?;
            symlink(&target, &dest_path).map_err(|e| Error::io(&dest_path, e))?;
        } else if file_type.is_dir() {
            copy_tree(&src_path, &dest_path)?;
        } else {
            fs::copy(&src_path, &dest_path).map_err(|e| Error::io(&dest_path, e))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_blob_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = BlobStorage::new(dir.path()).unwrap();

        let a = storage.write_blob(io::Cursor::new(b"hello")).unwrap();
        let b = storage.write_blob(io::Cursor::new(b"hello")).unwrap();
        assert_eq!(a, b);

        let mut contents = String::new();
        storage.open_blob(a).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello");
    }

    #[test]
    fn open_unknown_blob_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = BlobStorage::new(dir.path()).unwrap();
        let digest = crate::digest::hash_slice(b"nope");
        assert!(matches!(storage.open_blob(digest), Err(Error::UnknownObject { .. })));
    }

    #[test]
    fn commit_dir_round_trips_through_render() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub/file.txt"), b"payload").unwrap();
        symlink("file.txt", src.path().join("sub/link")).unwrap();

        let store_dir = tempfile::tempdir().unwrap();
        let storage = BlobStorage::new(store_dir.path()).unwrap();
        let manifest = storage.commit_dir(src.path()).unwrap();

        let rendered = storage.render_manifest(&manifest).unwrap();
        assert_eq!(fs::read(rendered.join("sub/file.txt")).unwrap(), b"payload");
        assert_eq!(fs::read_link(rendered.join("sub/link")).unwrap(), Path::new("file.txt"));
    }
}
