//! Storage backends for session credentials
//!
//! A backend is a flat key/value map per persistence scope. The durable scope
//! survives a restart (the "remember me" choice); the ephemeral scope lives
//! only as long as the process. Backends are synchronous: reads happen on the
//! request path and must never wait on I/O.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::constants::DURABLE_FILE_NAME;
use crate::error::{Error, Result};

/// Where a session lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PersistenceScope {
    /// Survives restarts
    Durable,
    /// Cleared when the process exits
    Ephemeral,
}

impl PersistenceScope {
    /// Order in which `load` looks for a session.
    pub const READ_ORDER: [PersistenceScope; 2] =
        [PersistenceScope::Durable, PersistenceScope::Ephemeral];

    pub fn from_remember(remember: bool) -> Self {
        if remember {
            PersistenceScope::Durable
        } else {
            PersistenceScope::Ephemeral
        }
    }

    /// The scope a session saved here must not also appear in.
    pub fn other(self) -> Self {
        match self {
            PersistenceScope::Durable => PersistenceScope::Ephemeral,
            PersistenceScope::Ephemeral => PersistenceScope::Durable,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PersistenceScope::Durable => "durable",
            PersistenceScope::Ephemeral => "ephemeral",
        }
    }
}

/// The three values that make up a stored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageKey {
    AccessCredential,
    RefreshCredential,
    Profile,
}

impl StorageKey {
    pub const ALL: [StorageKey; 3] = [
        StorageKey::AccessCredential,
        StorageKey::RefreshCredential,
        StorageKey::Profile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageKey::AccessCredential => "access_token",
            StorageKey::RefreshCredential => "refresh_token",
            StorageKey::Profile => "profile",
        }
    }

    fn parse(s: &str) -> Option<StorageKey> {
        StorageKey::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

/// Key/value persistence keyed by scope.
///
/// Implementations must be cheap to read. `remove` of an absent key is not an
/// error.
pub trait SessionStorage: Send + Sync {
    fn read(&self, scope: PersistenceScope, key: StorageKey) -> Result<Option<String>>;
    fn write(&self, scope: PersistenceScope, key: StorageKey, value: &str) -> Result<()>;
    fn remove(&self, scope: PersistenceScope, key: StorageKey) -> Result<()>;
}

/// Process-local storage for both scopes. Used in tests and by embedders that
/// persist nothing.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<(PersistenceScope, StorageKey), String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<(PersistenceScope, StorageKey), String>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("memory storage lock poisoned".into()))
    }
}

impl SessionStorage for MemoryStorage {
    fn read(&self, scope: PersistenceScope, key: StorageKey) -> Result<Option<String>> {
        Ok(self.entries()?.get(&(scope, key)).cloned())
    }

    fn write(&self, scope: PersistenceScope, key: StorageKey, value: &str) -> Result<()> {
        self.entries()?.insert((scope, key), value.to_owned());
        Ok(())
    }

    fn remove(&self, scope: PersistenceScope, key: StorageKey) -> Result<()> {
        self.entries()?.remove(&(scope, key));
        Ok(())
    }
}

/// Durable scope backed by a JSON file, ephemeral scope held in memory.
///
/// The file is read once at open; afterwards reads are served from memory and
/// every durable write rewrites the file atomically (temp file + rename,
/// mode 0600). The in-memory copy only changes once the file write succeeds.
pub struct FileStorage {
    path: PathBuf,
    durable: Mutex<BTreeMap<String, String>>,
    ephemeral: MemoryStorage,
}

impl FileStorage {
    /// Open (or create) `<dir>/session.json`.
    ///
    /// A file that fails to parse is logged and replaced with an empty one;
    /// a damaged session is the same as no session.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| Error::Storage(format!("creating storage directory: {e}")))?;
        let path = dir.join(DURABLE_FILE_NAME);

        let durable = if path.exists() {
            let contents = fs::read_to_string(&path)
                .map_err(|e| Error::Storage(format!("reading session file: {e}")))?;
            match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
                Ok(map) => {
                    info!(path = %path.display(), keys = map.len(), "loaded durable session file");
                    map
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "session file is corrupt, discarding");
                    let map = BTreeMap::new();
                    write_atomic(&path, &map)?;
                    map
                }
            }
        } else {
            info!(path = %path.display(), "session file not found, starting empty");
            let map = BTreeMap::new();
            write_atomic(&path, &map)?;
            map
        };

        Ok(Self {
            path,
            durable: Mutex::new(durable),
            ephemeral: MemoryStorage::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn durable(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.durable
            .lock()
            .map_err(|_| Error::Storage("session file lock poisoned".into()))
    }

    /// Apply `change` to a copy of the durable map, persist it, then commit.
    fn update_durable(&self, change: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let mut durable = self.durable()?;
        let mut next = durable.clone();
        change(&mut next);
        if next == *durable {
            return Ok(());
        }
        write_atomic(&self.path, &next)?;
        *durable = next;
        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn read(&self, scope: PersistenceScope, key: StorageKey) -> Result<Option<String>> {
        match scope {
            PersistenceScope::Durable => Ok(self.durable()?.get(key.as_str()).cloned()),
            PersistenceScope::Ephemeral => self.ephemeral.read(scope, key),
        }
    }

    fn write(&self, scope: PersistenceScope, key: StorageKey, value: &str) -> Result<()> {
        match scope {
            PersistenceScope::Durable => self.update_durable(|map| {
                map.insert(key.as_str().to_owned(), value.to_owned());
            }),
            PersistenceScope::Ephemeral => self.ephemeral.write(scope, key, value),
        }
    }

    fn remove(&self, scope: PersistenceScope, key: StorageKey) -> Result<()> {
        match scope {
            PersistenceScope::Durable => self.update_durable(|map| {
                map.remove(key.as_str());
            }),
            PersistenceScope::Ephemeral => self.ephemeral.remove(scope, key),
        }
    }
}

/// Write the durable map to `path` atomically.
///
/// Unknown keys found on disk are dropped on the next write.
fn write_atomic(path: &Path, data: &BTreeMap<String, String>) -> Result<()> {
    let known: BTreeMap<&str, &str> = data
        .iter()
        .filter(|(k, _)| StorageKey::parse(k).is_some())
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let json = serde_json::to_string_pretty(&known)
        .map_err(|e| Error::Storage(format!("serializing session file: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("session path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Storage(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::Storage(format!("setting session file permissions: {e}")))?;
    }

    fs::rename(&tmp_path, path)
        .map_err(|e| Error::Storage(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session file");
    Ok(())
}
