//! Tags: mutable, human-readable names bound to a digest, with a full history of every binding.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::digest::Digest;
use crate::error::Error;

/// One recorded binding of a tag to a digest at a point in time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TagEntry {
    /// Seconds since the Unix epoch when this binding was recorded.
    pub created: u64,
    /// The digest the tag pointed at as of this entry.
    pub target: Digest,
}

/// Manages the on-disk storage of tags under a single root directory.
///
/// Each tag is an append-only file of `<unix-timestamp> <hex-digest>` lines, one per write, with
/// the newest binding last. Reading a tag's current value costs one pass over its (typically
/// small) history file.
#[derive(Clone, Debug)]
pub struct TagStorage {
    root: PathBuf,
}

impl TagStorage {
    /// Opens tag storage rooted at `root`, which is created if it does not already exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        Ok(TagStorage { root })
    }

    fn tag_path(&self, name: &str) -> Result<PathBuf, Error> {
        validate_tag_name(name)?;
        Ok(self.root.join(name))
    }

    /// Appends a new binding of `name` to `target`, recorded with the current time.
    pub fn set_tag(&self, name: &str, target: Digest) -> Result<(), Error> {
        let path = self.tag_path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is after the Unix epoch")
            .as_secs();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        writeln!(file, "{} {}", created, target.to_hex()).map_err(|e| Error::io(&path, e))
    }

    /// Reads the most recently written binding for `name`.
    pub fn read_tag(&self, name: &str) -> Result<TagEntry, Error> {
        self.read_history(name)?
            .pop()
            .ok_or_else(|| Error::unknown_tag(name))
    }

    /// Reads every binding ever recorded for `name`, oldest first.
    pub fn read_history(&self, name: &str) -> Result<Vec<TagEntry>, Error> {
        let path = self.tag_path(name)?;
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::unknown_tag(name)),
            Err(e) => return Err(Error::io(&path, e)),
        };

        let mut history = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| Error::io(&path, e))?;
            if line.is_empty() {
                continue;
            }
            history.push(parse_tag_line(&line).map_err(|detail| Error::Corruption {
                kind: crate::error::ObjectKind::Tag,
                detail,
            })?);
        }
        Ok(history)
    }

    /// Lists every tag name currently in storage.
    pub fn list_tags(&self) -> Result<Vec<String>, Error> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.root, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.root, e))?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn validate_tag_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.contains("..") || name.starts_with('/') {
        return Err(Error::InvalidInput(format!("{:?} is not a valid tag name", name)));
    }
    Ok(())
}

fn parse_tag_line(line: &str) -> Result<TagEntry, String> {
    let mut parts = line.splitn(2, ' ');
    let created = parts.next().ok_or("missing timestamp field")?;
    let target = parts.next().ok_or("missing digest field")?;

    let created = created
        .parse::<u64>()
        .map_err(|e| format!("invalid timestamp field: {}", e))?;
    let target = target
        .parse::<Digest>()
        .map_err(|e| format!("invalid digest field: {}", e))?;

    Ok(TagEntry { created, target })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::hash_slice;

    #[test]
    fn read_after_write_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let tags = TagStorage::new(dir.path()).unwrap();
        let digest = hash_slice(b"v1");

        tags.set_tag("latest", digest).unwrap();
        assert_eq!(tags.read_tag("latest").unwrap().target, digest);
    }

    #[test]
    fn latest_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let tags = TagStorage::new(dir.path()).unwrap();

        tags.set_tag("latest", hash_slice(b"v1")).unwrap();
        tags.set_tag("latest", hash_slice(b"v2")).unwrap();

        assert_eq!(tags.read_tag("latest").unwrap().target, hash_slice(b"v2"));
        assert_eq!(tags.read_history("latest").unwrap().len(), 2);
    }

    #[test]
    fn unknown_tag_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tags = TagStorage::new(dir.path()).unwrap();
        assert!(matches!(tags.read_tag("missing"), Err(Error::UnknownObject { .. })));
    }

    #[test]
    fn rejects_escaping_tag_names() {
        let dir = tempfile::tempdir().unwrap();
        let tags = TagStorage::new(dir.path()).unwrap();
        assert!(matches!(
            tags.set_tag("../escape", hash_slice(b"v1")),
            Err(Error::InvalidInput(_))
        ));
    }
}
