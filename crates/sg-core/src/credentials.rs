//! Credential store implementations
//!
//! [`FileCredentialStore`] keeps one file per credential entry in a single
//! directory. Every entry is replaced atomically (write to a hidden
//! temporary sibling, fsync, rename), so an interrupted write leaves either
//! the old or the new contents on disk, never a torn file. On Unix the
//! directory is mode 0700 and entries are mode 0600.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::traits::CredentialStore;
use sg_protocol::SessionCredentials;

/// Suffix for in-flight temporary files
const TEMP_SUFFIX: &str = ".tmp";

/// Directory-backed credential store
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    /// Create a store rooted at `dir` (created lazily on first save)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<SessionCredentials>, PersistenceError> {
        let dir = self.dir.clone();
        run_blocking(move || load_dir(&dir)).await
    }

    async fn save(&self, credentials: &SessionCredentials) -> Result<(), PersistenceError> {
        let dir = self.dir.clone();
        let credentials = credentials.clone();
        run_blocking(move || save_dir(&dir, &credentials)).await
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        let dir = self.dir.clone();
        run_blocking(move || clear_dir(&dir)).await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, PersistenceError>
where
    F: FnOnce() -> Result<T, PersistenceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))?
}

/// Check that an entry name is a plain, visible file name
pub fn validate_entry_name(name: &str) -> Result<(), PersistenceError> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name.ends_with(TEMP_SUFFIX);
    if invalid {
        return Err(PersistenceError::InvalidEntry(name.to_string()));
    }
    Ok(())
}

fn load_dir(dir: &Path) -> Result<Option<SessionCredentials>, PersistenceError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistenceError::io("read", dir, e)),
    };

    let mut credentials = SessionCredentials::new();
    for entry in entries {
        let entry = entry.map_err(|e| PersistenceError::io("read", dir, e))?;
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!("Skipping credential file with non UTF-8 name: {:?}", path);
            continue;
        };
        if validate_entry_name(&name).is_err() {
            continue;
        }
        let file_type = entry
            .file_type()
            .map_err(|e| PersistenceError::io("stat", &path, e))?;
        if !file_type.is_file() {
            continue;
        }

        let contents = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData {
                PersistenceError::NotUtf8(name.clone())
            } else {
                PersistenceError::io("read", &path, e)
            }
        })?;
        credentials.insert(name, contents);
    }

    if credentials.is_empty() {
        Ok(None)
    } else {
        tracing::debug!(
            "Loaded {} credential entries from {:?}",
            credentials.len(),
            dir
        );
        Ok(Some(credentials))
    }
}

fn save_dir(dir: &Path, credentials: &SessionCredentials) -> Result<(), PersistenceError> {
    for name in credentials.names() {
        validate_entry_name(name)?;
    }

    fs::create_dir_all(dir).map_err(|e| PersistenceError::io("create", dir, e))?;
    restrict_permissions(dir, 0o700)?;

    let mut written = 0usize;
    for (name, contents) in credentials.iter() {
        let path = dir.join(name);
        match fs::read_to_string(&path) {
            Ok(existing) if existing == contents => continue,
            _ => {}
        }
        write_atomic(dir, name, contents)?;
        written += 1;
    }

    // Drop entries that are no longer part of the set
    let mut removed = 0usize;
    for entry in fs::read_dir(dir).map_err(|e| PersistenceError::io("read", dir, e))? {
        let entry = entry.map_err(|e| PersistenceError::io("read", dir, e))?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if validate_entry_name(&name).is_err() || credentials.get(&name).is_some() {
            continue;
        }
        remove_file(&entry.path())?;
        removed += 1;
    }

    if written > 0 || removed > 0 {
        sync_dir(dir)?;
    }

    tracing::debug!(
        "Persisted credentials: {} written, {} removed",
        written,
        removed
    );
    Ok(())
}

fn clear_dir(dir: &Path) -> Result<(), PersistenceError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(PersistenceError::io("read", dir, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| PersistenceError::io("read", dir, e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| PersistenceError::io("stat", &path, e))?;
        if file_type.is_file() {
            remove_file(&path)?;
        }
    }

    sync_dir(dir)
}

fn write_atomic(dir: &Path, name: &str, contents: &str) -> Result<(), PersistenceError> {
    let target = dir.join(name);
    let temp = dir.join(format!(".{}{}", name, TEMP_SUFFIX));

    let result = (|| -> io::Result<()> {
        let mut file = fs::File::create(&temp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&temp);
        return Err(PersistenceError::io("write", &temp, e));
    }

    restrict_permissions(&temp, 0o600)?;
    fs::rename(&temp, &target).map_err(|e| PersistenceError::io("rename", &target, e))
}

fn remove_file(path: &Path) -> Result<(), PersistenceError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PersistenceError::io("remove", path, e)),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<(), PersistenceError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| PersistenceError::io("chmod", path, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<(), PersistenceError> {
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), PersistenceError> {
    fs::File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| PersistenceError::io("sync", dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), PersistenceError> {
    Ok(())
}

/// In-memory credential store, for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    stored: Mutex<Option<SessionCredentials>>,
    saves: AtomicUsize,
    clears: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryCredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with credentials
    pub fn with_credentials(credentials: SessionCredentials) -> Self {
        let store = Self::default();
        *store.lock() = Some(credentials);
        store
    }

    /// Currently stored credentials
    pub fn stored(&self) -> Option<SessionCredentials> {
        self.lock().clone()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Number of clears
    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail with an I/O error
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<SessionCredentials>> {
        // Poisoning only happens if a holder panicked; the data is a plain value
        self.stored.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<SessionCredentials>, PersistenceError> {
        Ok(self.lock().clone().filter(|c| !c.is_empty()))
    }

    async fn save(&self, credentials: &SessionCredentials) -> Result<(), PersistenceError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PersistenceError::io(
                "write",
                "memory",
                io::Error::new(io::ErrorKind::Other, "simulated write failure"),
            ));
        }
        *self.lock() = Some(credentials.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        *self.lock() = None;
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> SessionCredentials {
        let mut creds = SessionCredentials::new();
        creds.insert("creds.json", r#"{"noiseKey":"abc"}"#);
        creds.insert("pre-key-1.json", r#"{"k":1}"#);
        creds
    }

    #[tokio::test]
    async fn test_load_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("auth"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("auth"));

        store.save(&sample()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, sample());
    }

    #[tokio::test]
    async fn test_save_removes_dropped_entries() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store.save(&sample()).await.unwrap();

        let mut smaller = SessionCredentials::new();
        smaller.insert("creds.json", "{}");
        store.save(&smaller).await.unwrap();

        assert!(!dir.path().join("pre-key-1.json").exists());
        assert_eq!(store.load().await.unwrap().unwrap(), smaller);
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store.save(&sample()).await.unwrap();

        let hidden: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(hidden.is_empty());
    }

    #[tokio::test]
    async fn test_load_ignores_hidden_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".creds.json.tmp"), "partial").unwrap();
        fs::write(dir.path().join("creds.json"), "{}").unwrap();

        let store = FileCredentialStore::new(dir.path());
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("creds.json"), Some("{}"));
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store.save(&sample()).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_clear_missing_dir_ok() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("never-created"));
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("auth"));

        let mut creds = SessionCredentials::new();
        creds.insert("../escape.json", "{}");
        let err = store.save(&creds).await.unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidEntry(_)));
        assert!(!dir.path().join("escape.json").exists());
    }

    #[test]
    fn test_validate_entry_name() {
        assert!(validate_entry_name("creds.json").is_ok());
        assert!(validate_entry_name("app-state-sync-key-AAA=.json").is_ok());
        assert!(validate_entry_name("").is_err());
        assert!(validate_entry_name(".hidden").is_err());
        assert!(validate_entry_name("..").is_err());
        assert!(validate_entry_name("a/b").is_err());
        assert!(validate_entry_name("a\\b").is_err());
        assert!(validate_entry_name("x.tmp").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let auth = dir.path().join("auth");
        let store = FileCredentialStore::new(&auth);
        store.save(&sample()).await.unwrap();

        let mode = fs::metadata(auth.join("creds.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
        let dir_mode = fs::metadata(&auth).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn test_memory_store_failure_switch() {
        let store = MemoryCredentialStore::new();
        store.fail_saves(true);
        assert!(store.save(&sample()).await.is_err());
        assert_eq!(store.save_count(), 0);

        store.fail_saves(false);
        store.save(&sample()).await.unwrap();
        assert_eq!(store.stored(), Some(sample()));
    }
}
