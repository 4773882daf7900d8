//! The on-disk, line-based serialization of a [`Manifest`], stored alongside a package's file
//! data so that reading a package's manifest never requires re-hashing its contents.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::str::FromStr;

use crate::digest::Digest;
use crate::error::Error;
use crate::tracking::{compute_manifest, Entry, EntryKind, Manifest, ManifestBuilder};

const MANIFEST_FILE: &str = "manifest";

/// Reads and writes the cached manifest file kept in a directory (typically a package's `meta`
/// directory).
#[derive(Clone, Debug)]
pub struct ManifestStorage {
    root: std::path::PathBuf,
}

impl ManifestStorage {
    /// Points at the manifest file location under `root`.
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        ManifestStorage { root: root.into() }
    }

    fn manifest_path(&self) -> std::path::PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Serializes `manifest` into this storage's file, overwriting any previous contents.
    pub fn write(&self, manifest: &Manifest) -> Result<(), Error> {
        fs::create_dir_all(&self.root).map_err(|e| Error::io(&self.root, e))?;
        let path = self.manifest_path();

        let mut file = fs::File::create(&path).map_err(|e| Error::io(&path, e))?;
        for (rel_path, entry) in manifest.walk() {
            writeln!(file, "{}", serialize_line(&rel_path, entry)).map_err(|e| Error::io(&path, e))?;
        }
        Ok(())
    }

    /// Reads back a previously written manifest.
    pub fn read(&self) -> Result<Manifest, Error> {
        let path = self.manifest_path();
        let file = fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Corruption {
                    kind: crate::error::ObjectKind::Package,
                    detail: format!("missing manifest file at {}", path.display()),
                }
            } else {
                Error::io(&path, e)
            }
        })?;

        let mut builder = ManifestBuilder::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| Error::io(&path, e))?;
            if line.is_empty() {
                continue;
            }
            let (rel_path, entry) = parse_line(&line).map_err(|detail| Error::Corruption {
                kind: crate::error::ObjectKind::Package,
                detail,
            })?;
            insert_at(&mut builder, &rel_path, entry);
        }

        Ok(builder.finalize())
    }
}

fn serialize_line(rel_path: &str, entry: &Entry) -> String {
    let kind = match entry.kind {
        EntryKind::Blob => "b",
        EntryKind::Tree => "t",
        EntryKind::Mask => "m",
    };
    let digest = entry.digest.map(|d| d.to_hex()).unwrap_or_default();
    format!("{}\t{}\t{:07o}\t{}", rel_path, kind, entry.mode, digest)
}

fn parse_line(line: &str) -> Result<(String, Entry), String> {
    let mut parts = line.splitn(4, '\t');
    let rel_path = parts.next().ok_or("missing path field")?.to_string();
    let kind = parts.next().ok_or("missing kind field")?;
    let mode = parts.next().ok_or("missing mode field")?;
    let digest = parts.next().unwrap_or("");

    let kind = match kind {
        "b" => EntryKind::Blob,
        "t" => EntryKind::Tree,
        "m" => EntryKind::Mask,
        other => return Err(format!("unrecognized entry kind tag {:?}", other)),
    };
    let mode = u32::from_str_radix(mode, 8).map_err(|e| format!("invalid mode field: {}", e))?;
    let digest = if digest.is_empty() {
        None
    } else {
        Some(Digest::from_str(digest).map_err(|e| format!("invalid digest field: {}", e))?)
    };

    let name = rel_path.rsplit('/').next().unwrap_or("").to_string();
    let entry = Entry {
        name,
        kind,
        mode,
        digest,
        size: None,
    };
    Ok((rel_path, entry))
}

/// Inserts a manifest line's entry into the builder's in-progress tree at the given path.
///
/// Tree entries encountered in the serialized stream (including the root, at path `""`) only
/// ever carry mode bits; their digest is recomputed by [`ManifestBuilder::finalize`], so only
/// the mode is applied here.
fn insert_at(builder: &mut ManifestBuilder, rel_path: &str, entry: Entry) {
    builder.insert(rel_path, entry);
}

/// Recomputes a package's manifest directly from its file data, bypassing the cached
/// serialization entirely. Used to verify that a cached manifest still matches its data.
pub fn recompute(diff_dir: &Path) -> Result<Manifest, Error> {
    compute_manifest(diff_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn write_then_read_round_trips_digest() {
        let src = tempfile::tempdir().unwrap();
        write_file(&src.path().join("a/b.txt"), "hello");
        let original = compute_manifest(src.path()).unwrap();

        let meta_dir = tempfile::tempdir().unwrap();
        let storage = ManifestStorage::new(meta_dir.path());
        storage.write(&original).unwrap();

        let read_back = storage.read().unwrap();
        assert_eq!(read_back.digest(), original.digest());
    }

    #[test]
    fn missing_manifest_file_is_corruption() {
        let meta_dir = tempfile::tempdir().unwrap();
        let storage = ManifestStorage::new(meta_dir.path());
        assert!(matches!(storage.read(), Err(Error::Corruption { .. })));
    }
}
