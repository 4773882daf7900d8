//! INI-style configuration: where a repository's data lives locally, and the addresses of any
//! named remotes.
//!
//! A [`Config`] is always constructed explicitly and passed to whatever needs it; this crate
//! keeps no mutable global configuration state. [`Config::current`] exists only as a read-only,
//! lazily-initialized convenience for callers (such as a demo binary) that have no better place
//! to thread a `Config` through from.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::Error;
use crate::storage::FsRepository;

const DEFAULT_STORAGE_ROOT_KEY: &str = "storage.root";
const REMOTE_TABLE_KEY: &str = "remote";

/// Parsed configuration, backed by an INI-format source.
///
/// ```ini
/// [storage]
/// root = /var/lib/spfs
///
/// [remote.origin]
/// address = file:///mnt/shared/spfs
/// ```
#[derive(Debug)]
pub struct Config {
    inner: config::Config,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            inner: config::Config::default(),
        }
    }
}

impl Config {
    /// An empty configuration with no storage root and no remotes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses a configuration from INI-format text.
    pub fn from_str(ini_text: &str) -> Result<Self, Error> {
        let inner = config::Config::builder()
            .add_source(config::File::from_str(ini_text, config::FileFormat::Ini))
            .build()
            .map_err(|e| Error::InvalidInput(format!("invalid configuration: {}", e)))?;
        Ok(Config { inner })
    }

    /// Reads and parses a configuration file from disk.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_str(&text)
    }

    /// The configured local storage root, if one is set.
    pub fn storage_root(&self) -> Option<PathBuf> {
        self.inner
            .get_string(DEFAULT_STORAGE_ROOT_KEY)
            .ok()
            .map(PathBuf::from)
    }

    /// Opens the repository at the configured storage root.
    pub fn open_repository(&self) -> Result<FsRepository, Error> {
        let root = self
            .storage_root()
            .ok_or_else(|| Error::InvalidInput("no [storage] root configured".into()))?;
        FsRepository::open(root)
    }

    /// The names of every remote defined in this configuration, sorted.
    pub fn list_remote_names(&self) -> Vec<String> {
        let table = match self.inner.get_table(REMOTE_TABLE_KEY) {
            Ok(table) => table,
            Err(_) => return Vec::new(),
        };
        let mut names: Vec<String> = table.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the configured address string for a named remote.
    pub fn get_remote_address(&self, name: &str) -> Result<String, Error> {
        let key = format!("{}.{}.address", REMOTE_TABLE_KEY, name);
        self.inner
            .get_string(&key)
            .map_err(|_| Error::unknown_remote(name))
    }

    /// Opens a remote repository by name.
    ///
    /// Only `file://` addresses are understood, since this crate implements a single,
    /// filesystem-backed storage type; a remote pointed at any other scheme is reported as
    /// invalid input rather than silently ignored.
    pub fn get_remote(&self, name: &str) -> Result<FsRepository, Error> {
        let address = self.get_remote_address(name)?;
        let path = address.strip_prefix("file://").ok_or_else(|| {
            Error::InvalidInput(format!(
                "remote {:?} has unsupported address scheme: {:?}",
                name, address
            ))
        })?;
        FsRepository::open(path)
    }
}

static CURRENT: OnceLock<Config> = OnceLock::new();

/// The default configuration file location: `$SPFS_CONFIG`, or `~/.spfs/config` if unset.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("SPFS_CONFIG") {
        return Some(PathBuf::from(path));
    }
    std::env::var("HOME").ok().map(|home| Path::new(&home).join(".spfs/config"))
}

impl Config {
    /// Returns a process-wide configuration, loaded once from [`default_config_path`] (or empty
    /// if no config file is found) and cached for the lifetime of the process.
    ///
    /// Prefer threading an explicitly constructed `Config` through instead; this exists for call
    /// sites with no natural place to do that.
    pub fn current() -> &'static Config {
        CURRENT.get_or_init(|| match default_config_path() {
            Some(path) if path.exists() => Config::load(&path).unwrap_or_default(),
            _ => Config::empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_remote_names_empty_by_default() {
        let config = Config::empty();
        assert!(config.list_remote_names().is_empty());
    }

    #[test]
    fn list_remote_names_reports_configured_remotes() {
        let config = Config::from_str("[remote.origin]\naddress=http://myaddress").unwrap();
        assert_eq!(config.list_remote_names(), vec!["origin".to_string()]);
    }

    #[test]
    fn get_remote_unknown_fails() {
        let config = Config::empty();
        assert!(matches!(config.get_remote("unknown"), Err(Error::UnknownObject { .. })));
    }

    #[test]
    fn get_remote_opens_file_backed_repository() {
        let dir = tempfile::tempdir().unwrap();
        let ini = format!("[remote.origin]\naddress=file://{}", dir.path().display());
        let config = Config::from_str(&ini).unwrap();

        let repo = config.get_remote("origin").unwrap();
        assert_eq!(repo.root(), dir.path());
    }

    #[test]
    fn storage_root_reads_from_storage_section() {
        let config = Config::from_str("[storage]\nroot=/var/lib/spfs").unwrap();
        assert_eq!(config.storage_root(), Some(PathBuf::from("/var/lib/spfs")));
    }
}
