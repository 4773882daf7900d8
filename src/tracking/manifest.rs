//! The manifest model: a hashed, canonical tree of [`Entry`] nodes representing a directory
//! snapshot.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::digest::{hash_bytes, hash_slice, Digest};
use crate::error::Error;

use super::entry::{Entry, EntryKind};

const DEFAULT_DIR_MODE: u32 = 0o040_755;
const SYMLINK_MODE: u32 = 0o120_777;

/// A single node under construction: either a directory still being assembled, or a finished
/// leaf (blob or mask) whose digest is already known.
#[derive(Debug)]
enum MutNode {
    Tree(MutTree),
    Leaf(Entry),
}

#[derive(Debug)]
struct MutTree {
    mode: u32,
    children: BTreeMap<String, MutNode>,
}

impl MutTree {
    fn new(mode: u32) -> Self {
        MutTree {
            mode,
            children: BTreeMap::new(),
        }
    }

    fn finalize(self) -> TreeNode {
        let mut children = BTreeMap::new();
        for (name, node) in self.children {
            let finalized = match node {
                MutNode::Tree(t) => Node::Tree(t.finalize()),
                MutNode::Leaf(e) => Node::Leaf(e),
            };
            children.insert(name, finalized);
        }

        let digest = compute_tree_digest(&children);
        let entry = Entry {
            name: String::new(),
            kind: EntryKind::Tree,
            mode: self.mode,
            digest: Some(digest),
            size: None,
        };

        TreeNode { entry, children }
    }
}

/// An appendable, resortable manifest under construction.
///
/// A builder has no stable digest of its own; call [`ManifestBuilder::finalize`] to compute one
/// and obtain an immutable [`Manifest`]. Builders exist precisely so that mutation (merging
/// sub-paths, walking a directory incrementally) never happens on a manifest whose digest has
/// already been handed out.
#[derive(Debug)]
pub struct ManifestBuilder {
    root: MutTree,
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        ManifestBuilder {
            root: MutTree::new(DEFAULT_DIR_MODE),
        }
    }
}

impl ManifestBuilder {
    /// Creates a new, empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finalizes construction, computing every tree digest bottom-up and returning an immutable
    /// [`Manifest`].
    pub fn finalize(self) -> Manifest {
        Manifest {
            root: self.root.finalize(),
        }
    }

    /// Inserts an already-known entry at `rel_path`, creating any missing intermediate
    /// directories with a default mode.
    ///
    /// Used to reassemble a builder from a flat, path-keyed stream (see the on-disk manifest
    /// format) rather than from a filesystem walk. A `Tree` entry at a path merges into (and
    /// overwrites the mode of) whatever is already there; any other kind replaces it outright.
    pub fn insert(&mut self, rel_path: &str, entry: Entry) {
        let parts: Vec<&str> = rel_path
            .split('/')
            .filter(|p| !p.is_empty() && *p != ".")
            .collect();

        if parts.is_empty() {
            self.root.mode = entry.mode;
            return;
        }

        let mut node = &mut self.root;
        for part in &parts[..parts.len() - 1] {
            node = sub_tree(node, part);
        }

        let name = parts[parts.len() - 1];
        match entry.kind {
            EntryKind::Tree => {
                let child = sub_tree(node, name);
                child.mode = entry.mode;
            }
            _ => {
                node.children.insert(name.to_string(), MutNode::Leaf(entry));
            }
        }
    }
}

/// Returns a mutable reference to the named child tree, creating it (or replacing a same-named
/// leaf) if necessary.
fn sub_tree<'a>(parent: &'a mut MutTree, name: &str) -> &'a mut MutTree {
    let slot = parent
        .children
        .entry(name.to_string())
        .or_insert_with(|| MutNode::Tree(MutTree::new(DEFAULT_DIR_MODE)));

    if !matches!(slot, MutNode::Tree(_)) {
        *slot = MutNode::Tree(MutTree::new(DEFAULT_DIR_MODE));
    }

    match slot {
        MutNode::Tree(t) => t,
        MutNode::Leaf(_) => unreachable!("just replaced with a Tree"),
    }
}

/// A node in a finalized [`Manifest`]: either a directory with canonically-ordered children, or
/// a finished leaf.
#[derive(Clone, Debug)]
enum Node {
    Tree(TreeNode),
    Leaf(Entry),
}

impl Node {
    fn entry(&self) -> &Entry {
        match self {
            Node::Tree(t) => &t.entry,
            Node::Leaf(e) => e,
        }
    }
}

#[derive(Clone, Debug)]
struct TreeNode {
    entry: Entry,
    children: BTreeMap<String, Node>,
}

impl TreeNode {
    /// Returns this tree's children sorted in canonical order: blobs and masks before trees,
    /// lexicographic by name within a kind.
    fn sorted_children(&self) -> Vec<(&str, &Node)> {
        let mut items: Vec<_> = self.children.iter().map(|(k, v)| (k.as_str(), v)).collect();
        items.sort_by(|(_, a), (_, b)| a.entry().canonical_cmp(b.entry()));
        items
    }
}

/// A rooted tree of [`Entry`] values, hashed bottom-up and immutable after construction.
///
/// The manifest's identifier is the digest of its root tree entry (see [`Manifest::digest`]).
#[derive(Clone, Debug)]
pub struct Manifest {
    root: TreeNode,
}

impl Manifest {
    /// Returns the root digest of this manifest.
    ///
    /// This is the identifier used to name the manifest's rendered cache, its persisted form
    /// under a package's `meta/` directory, and the package directory itself.
    pub fn digest(&self) -> Digest {
        self.root.entry.digest.expect("finalized tree always has a digest")
    }

    /// Returns the mode bits recorded for the manifest's root directory.
    pub fn root_mode(&self) -> u32 {
        self.root.entry.mode
    }

    /// Looks up the entry at `rel_path`.
    ///
    /// A leading `/` is optional; `.` components and empty components are collapsed. A `..`
    /// component is rejected with [`Error::InvalidInput`]. Looking up a path that descends
    /// through a blob (rather than a tree) yields `Ok(None)`, the same as any other path that
    /// does not exist.
    pub fn get_path(&self, rel_path: &str) -> Result<Option<&Entry>, Error> {
        let parts = normalize_path(rel_path)?;

        let mut current = &self.root;
        let mut iter = parts.iter().peekable();

        if iter.peek().is_none() {
            return Ok(Some(&current.entry));
        }

        loop {
            let Some(part) = iter.next() else {
                return Ok(Some(&current.entry));
            };

            match current.children.get(*part) {
                None => return Ok(None),
                Some(Node::Leaf(entry)) => {
                    return if iter.peek().is_none() { Ok(Some(entry)) } else { Ok(None) };
                }
                Some(Node::Tree(tree)) => {
                    if iter.peek().is_none() {
                        return Ok(Some(&tree.entry));
                    }
                    current = tree;
                }
            }
        }
    }

    /// Returns a lazy, restartable iterator over every entry in the manifest, in canonical order:
    /// the root first, then each tree's children (blobs and masks before subtrees,
    /// lexicographically by name within a kind), recursing depth-first.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: vec![Frame {
                path: String::new(),
                entry: Some(&self.root.entry),
                children: self.root.sorted_children(),
                index: 0,
            }],
        }
    }
}

fn normalize_path(rel_path: &str) -> Result<Vec<&str>, Error> {
    let mut parts = Vec::new();
    for part in rel_path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(Error::InvalidInput(format!(
                    "path {:?} contains a `..` component",
                    rel_path
                )))
            }
            other => parts.push(other),
        }
    }
    Ok(parts)
}

struct Frame<'a> {
    /// The path to the entry this frame represents (joined with `/`, no trailing slash).
    path: String,
    /// `Some` exactly once: the entry itself, yielded before any of its children.
    entry: Option<&'a Entry>,
    children: Vec<(&'a str, &'a Node)>,
    index: usize,
}

/// A lazy, restartable, stack-based depth-first iterator over a [`Manifest`]'s entries.
///
/// This never buffers more than one path's worth of ancestors at a time, so walking a manifest
/// with a very deep or very wide tree does not require holding the whole structure in memory
/// beyond what the manifest itself already occupies.
pub struct Walk<'a> {
    stack: Vec<Frame<'a>>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (String, &'a Entry);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;

            if let Some(entry) = frame.entry.take() {
                return Some((frame.path.clone(), entry));
            }

            if frame.index >= frame.children.len() {
                self.stack.pop();
                continue;
            }

            let (name, node) = frame.children[frame.index];
            frame.index += 1;

            let child_path = if frame.path.is_empty() {
                format!("/{}", name)
            } else {
                format!("{}/{}", frame.path, name)
            };

            match node {
                Node::Leaf(entry) => return Some((child_path, entry)),
                Node::Tree(tree) => {
                    self.stack.push(Frame {
                        path: child_path,
                        entry: Some(&tree.entry),
                        children: tree.sorted_children(),
                        index: 0,
                    });
                }
            }
        }
    }
}

/// Computes the canonical serialization of one tree's sorted children and hashes it.
///
/// For each child, in canonical order, the serialization concatenates: the name bytes, a NUL
/// separator, the mode as a fixed-width 7-digit octal string, a NUL separator, the kind's
/// single-byte tag, a NUL separator, and then (for a blob) the child's hex digest or (for a tree)
/// the child's raw digest bytes. Masks contribute no trailing digest bytes, since they carry no
/// content, but they still participate in the byte stream via their name/mode/tag, so a
/// directory's digest is sensitive to which paths it masks.
fn compute_tree_digest(children: &BTreeMap<String, Node>) -> Digest {
    let mut items: Vec<_> = children.iter().collect();
    items.sort_by(|(_, a), (_, b)| a.entry().canonical_cmp(b.entry()));

    let mut buf = Vec::new();
    for (name, node) in items {
        let entry = node.entry();
        buf.extend_from_slice(name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(format!("{:07o}", entry.mode).as_bytes());
        buf.push(0);
        buf.push(entry.kind.tag());
        buf.push(0);

        match entry.kind {
            EntryKind::Blob => {
                let digest = entry.digest.expect("blob entry must carry a digest");
                buf.extend_from_slice(digest.to_hex().as_bytes());
            }
            EntryKind::Tree => {
                let digest = entry.digest.expect("tree entry must carry a digest");
                buf.extend_from_slice(digest.as_bytes());
            }
            EntryKind::Mask => {}
        }
    }

    hash_slice(&buf)
}

/// Recursively walks a directory on disk, merging its contents into an existing builder's root.
///
/// Used both by [`compute_manifest`] (on a fresh builder) and by callers assembling a manifest
/// from more than one source path.
pub fn compute_entry(path: &Path, builder: &mut ManifestBuilder) -> Result<(), Error> {
    let metadata = fs::symlink_metadata(path).map_err(|e| Error::io(path, e))?;
    builder.root.mode = canonical_mode(&metadata);
    walk_dir(path, &mut builder.root)
}

/// Recursively walks a directory, producing a fully-hashed [`Manifest`].
pub fn compute_manifest(path: &Path) -> Result<Manifest, Error> {
    let mut builder = ManifestBuilder::new();
    compute_entry(path, &mut builder)?;
    Ok(builder.finalize())
}

fn walk_dir(path: &Path, tree: &mut MutTree) -> Result<(), Error> {
    let mut names: Vec<_> = fs::read_dir(path)
        .map_err(|e| Error::io(path, e))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::io(path, e))?;
    names.sort_by_key(|e| e.file_name());

    for dir_entry in names {
        let name = dir_entry
            .file_name()
            .into_string()
            .map_err(|_| Error::InvalidInput(format!("{:?} is not valid UTF-8", dir_entry.path())))?;
        let child_path = dir_entry.path();
        let metadata = fs::symlink_metadata(&child_path).map_err(|e| Error::io(&child_path, e))?;

        let node = if metadata.file_type().is_symlink() {
            let target = fs::read_link(&child_path).map_err(|e| Error::io(&child_path, e))?;
            let target = target.to_str().ok_or_else(|| {
                Error::InvalidInput(format!("symlink target at {:?} is not valid UTF-8", child_path))
            })?;
            let digest = hash_slice(target.as_bytes());
            MutNode::Leaf(Entry {
                name: name.clone(),
                kind: EntryKind::Blob,
                mode: SYMLINK_MODE,
                digest: Some(digest),
                size: Some(target.len() as u64),
            })
        } else if metadata.is_dir() {
            let mut subtree = MutTree::new(canonical_mode(&metadata));
            walk_dir(&child_path, &mut subtree)?;
            MutNode::Tree(subtree)
        } else {
            let mut file = File::open(&child_path).map_err(|e| Error::io(&child_path, e))?;
            let digest = hash_bytes(&mut file).map_err(|e| Error::io(&child_path, e))?;
            MutNode::Leaf(Entry {
                name: name.clone(),
                kind: EntryKind::Blob,
                mode: canonical_mode(&metadata),
                digest: Some(digest),
                size: Some(metadata.len()),
            })
        };

        tree.children.insert(name, node);
    }

    Ok(())
}

/// Only the file-type bits and permission bits of `metadata`'s mode are canonical; this strips
/// anything else the platform might report (there is nothing else on POSIX, but this keeps the
/// intent explicit).
fn canonical_mode(metadata: &fs::Metadata) -> u32 {
    metadata.permissions().mode() & 0o170_777
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn empty_directory_has_fixed_digest() {
        let dir = tempfile::tempdir().unwrap();
        let first = compute_manifest(dir.path()).unwrap();
        let second = compute_manifest(dir.path()).unwrap();
        assert_eq!(first.digest(), second.digest());
        assert_eq!(first.walk().count(), 1); // just the root
    }

    #[test]
    fn determinism() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a.txt"), "hello");
        let first = compute_manifest(dir.path()).unwrap();
        let second = compute_manifest(dir.path()).unwrap();
        assert_eq!(first.digest(), second.digest());
    }

    #[test]
    fn entry_ordering_s1() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a_file.txt"), "rootdata");
        write_file(&dir.path().join("z_file.txt"), "rootdata");
        write_file(&dir.path().join("dir1.0/file.txt"), "thebestdata");
        write_file(&dir.path().join("dir1.0/dir2.0/file.txt"), "somedata");
        write_file(&dir.path().join("dir1.0/dir2.1/file.txt"), "someotherdata");
        write_file(&dir.path().join("dir2.0/file.txt"), "evenmoredata");

        let manifest = compute_manifest(dir.path()).unwrap();
        let paths: Vec<String> = manifest.walk().map(|(p, _)| p).collect();

        assert_eq!(
            paths,
            vec![
                "",
                "/a_file.txt",
                "/z_file.txt",
                "/dir1.0",
                "/dir1.0/file.txt",
                "/dir1.0/dir2.0",
                "/dir1.0/dir2.0/file.txt",
                "/dir1.0/dir2.1",
                "/dir1.0/dir2.1/file.txt",
                "/dir2.0",
                "/dir2.0/file.txt",
            ]
        );
    }

    #[test]
    fn get_path_variants() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a_file.txt"), "data");
        let manifest = compute_manifest(dir.path()).unwrap();

        assert!(manifest.get_path("/").unwrap().is_some());
        assert!(manifest.get_path("a_file.txt").unwrap().is_some());
        assert!(manifest.get_path("/a_file.txt").unwrap().is_some());
        assert!(manifest.get_path("./a_file.txt").unwrap().is_some());
        assert!(manifest.get_path("missing.txt").unwrap().is_none());
        assert!(manifest.get_path("a_file.txt/nested").unwrap().is_none());
        assert!(matches!(manifest.get_path("../escape"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn symlink_shares_digest_with_identical_content_blob() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("target.txt"), "a/b/c.txt");
        std::os::unix::fs::symlink("a/b/c.txt", dir.path().join("link")).unwrap();

        let manifest = compute_manifest(dir.path()).unwrap();
        let file_entry = manifest.get_path("target.txt").unwrap().unwrap();
        let link_entry = manifest.get_path("link").unwrap().unwrap();

        assert_eq!(file_entry.digest, link_entry.digest);
        assert!(link_entry.is_symlink());
        assert!(!file_entry.is_symlink());
    }
}
