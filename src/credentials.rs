//! Credential lifecycle: the access/refresh pair, its durable copy, and the
//! identity derived from it.
//!
//! [`CredentialManager`] is the single owner of the token pair. The gateway
//! reads it before every request and rewrites it after a renewal; everything
//! else goes through [`Gateway::set_credentials`](crate::gateway::Gateway::set_credentials)
//! and [`Gateway::logout`](crate::gateway::Gateway::logout), which also keep the
//! identity in step.
//!
//! Storage is pluggable through [`CredentialStore`]. Two stores ship with the
//! crate: [`MemoryStore`] and the JSON-file backed [`FileStore`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::config::LobbyClientConfig;
use crate::error::{LobbyClientError, Result};
use crate::protocol::{Credentials, Identity};

// ── Storage ─────────────────────────────────────────────────────────

/// Durable key/value storage for the token pair.
///
/// Implementations only need single-key operations; the manager guarantees
/// that both keys are written or removed together.
pub trait CredentialStore: Send + Sync + 'static {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn remove(&self, key: &str) -> Result<()>;
}

impl<S: CredentialStore + ?Sized> CredentialStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `entries`.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Copy of every stored entry.
    pub fn snapshot(&self) -> HashMap<String, String> {
        lock(&self.entries).clone()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object on disk.
///
/// Every write replaces the file through a sibling temp file and a rename, so
/// a crash mid-write leaves either the old or the new content.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    io: Mutex<()>,
}

impl FileStore {
    /// Create a store over the JSON file at `path`. The file is created on
    /// the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Mutex::new(()),
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Default::default()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Default::default());
        }
        match serde_json::from_str::<serde_json::Value>(&text)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(LobbyClientError::Storage(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
        }
    }

    fn write_map(&self, map: &serde_json::Map<String, serde_json::Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _io = lock(&self.io);
        Ok(self
            .read_map()?
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _io = lock(&self.io);
        let mut map = self.read_map()?;
        map.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        self.write_map(&map)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _io = lock(&self.io);
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

// ── Manager ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CredentialState {
    credentials: Option<Credentials>,
    identity: Option<Identity>,
    /// Bumped on every change to the pair, renewals included.
    generation: u64,
    /// Bumped when a login starts or ends; renewals keep it.
    epoch: u64,
}

impl CredentialState {
    fn adopt(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
        self.identity = None;
        self.generation += 1;
        self.epoch += 1;
    }

    fn forget(&mut self) {
        self.credentials = None;
        self.identity = None;
        self.generation += 1;
        self.epoch += 1;
    }
}

/// Owner of the token pair and the identity derived from it.
///
/// Memory and durable storage move together: after any operation returns,
/// storage holds both tokens or neither, and the identity is only present
/// while tokens are.
pub struct CredentialManager {
    store: Box<dyn CredentialStore>,
    access_key: String,
    refresh_key: String,
    state: Mutex<CredentialState>,
}

impl CredentialManager {
    /// Create a manager over `store` using the default `access`/`refresh` keys.
    ///
    /// The manager starts anonymous; call [`restore`](Self::restore) once at
    /// startup to pick up a persisted pair.
    pub fn new(store: impl CredentialStore) -> Self {
        Self::with_keys(store, "access", "refresh")
    }

    /// Create a manager using the storage keys from `config`.
    pub fn from_config(store: impl CredentialStore, config: &LobbyClientConfig) -> Self {
        Self::with_keys(store, &config.access_key, &config.refresh_key)
    }

    fn with_keys(store: impl CredentialStore, access_key: &str, refresh_key: &str) -> Self {
        Self {
            store: Box::new(store),
            access_key: access_key.to_string(),
            refresh_key: refresh_key.to_string(),
            state: Mutex::new(CredentialState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, CredentialState> {
        lock(&self.state)
    }

    /// Load the persisted pair, if any. Returns `true` when a pair was restored.
    ///
    /// A lone access or refresh token is treated as corrupt: both keys are
    /// erased and the manager stays anonymous.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read, or if erasing a lone token fails.
    pub fn restore(&self) -> Result<bool> {
        Ok(self.restore_login()?.is_some())
    }

    /// [`restore`](Self::restore), returning the epoch of the restored login.
    pub(crate) fn restore_login(&self) -> Result<Option<u64>> {
        let mut state = self.state();
        let access = self.store.get(&self.access_key)?;
        let refresh = self.store.get(&self.refresh_key)?;

        match (access, refresh) {
            (Some(access), Some(refresh)) => {
                state.adopt(Credentials { access, refresh });
                info!(epoch = state.epoch, "restored persisted credentials");
                Ok(Some(state.epoch))
            }
            (None, None) => {
                debug!("no persisted credentials");
                Ok(None)
            }
            _ => {
                warn!("persisted credentials are incomplete; discarding");
                self.erase_stored()?;
                Ok(None)
            }
        }
    }

    /// Persist and adopt a new token pair.
    ///
    /// The identity is reset; use
    /// [`Gateway::set_credentials`](crate::gateway::Gateway::set_credentials)
    /// to also look it up.
    ///
    /// # Errors
    ///
    /// Returns an error if the pair cannot be persisted. Storage is left
    /// empty in that case and the manager becomes anonymous, so memory and
    /// storage still agree.
    pub fn set_credentials(&self, credentials: Credentials) -> Result<()> {
        self.login(credentials).map(|_| ())
    }

    /// [`set_credentials`](Self::set_credentials), returning the epoch of the
    /// new login.
    pub(crate) fn login(&self, credentials: Credentials) -> Result<u64> {
        let mut state = self.state();
        if let Err(e) = self.persist(&credentials) {
            state.forget();
            return Err(e);
        }
        state.adopt(credentials);
        debug!(generation = state.generation, epoch = state.epoch, "credentials set");
        Ok(state.epoch)
    }

    /// Replace the pair after a token renewal, keeping the current identity
    /// and login epoch.
    ///
    /// On a persistence failure the manager becomes anonymous.
    pub(crate) fn rotate(&self, credentials: Credentials) -> Result<()> {
        let mut state = self.state();
        if let Err(e) = self.persist(&credentials) {
            state.forget();
            return Err(e);
        }
        state.credentials = Some(credentials);
        state.generation += 1;
        debug!(generation = state.generation, "credentials rotated");
        Ok(())
    }

    /// Forget the pair and the identity, in memory and in storage.
    ///
    /// Memory is always cleared, even when storage fails.
    ///
    /// # Errors
    ///
    /// Returns the first storage error encountered.
    pub fn clear_credentials(&self) -> Result<()> {
        let mut state = self.state();
        state.forget();
        debug!(generation = state.generation, "credentials cleared");
        self.erase_stored()
    }

    /// Clear the credentials only if `epoch` is still the current login.
    ///
    /// Returns `Ok(false)` without touching anything when another login has
    /// started or the credentials were cleared since.
    ///
    /// # Errors
    ///
    /// Same as [`clear_credentials`](Self::clear_credentials).
    pub fn clear_if_epoch(&self, epoch: u64) -> Result<bool> {
        let mut state = self.state();
        if state.epoch != epoch || state.credentials.is_none() {
            return Ok(false);
        }
        state.forget();
        debug!(epoch, "credentials cleared for failed login");
        self.erase_stored().map(|()| true)
    }

    /// Current access token.
    pub fn current_access(&self) -> Option<String> {
        self.state().credentials.as_ref().map(|c| c.access.clone())
    }

    /// Current refresh token.
    pub fn current_refresh(&self) -> Option<String> {
        self.state().credentials.as_ref().map(|c| c.refresh.clone())
    }

    /// Current pair, if authenticated.
    pub fn credentials(&self) -> Option<Credentials> {
        self.state().credentials.clone()
    }

    /// Returns `true` while a pair is held.
    pub fn is_authenticated(&self) -> bool {
        self.state().credentials.is_some()
    }

    /// Profile of the logged-in user, once looked up.
    pub fn identity(&self) -> Option<Identity> {
        self.state().identity.clone()
    }

    /// Counter identifying the current login. Changes on set, restore and
    /// clear, but not when a renewal rotates the tokens.
    pub fn epoch(&self) -> u64 {
        self.state().epoch
    }

    /// Counter bumped on every credential change.
    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Generation and pair read under one lock.
    pub(crate) fn snapshot(&self) -> (u64, Option<Credentials>) {
        let state = self.state();
        (state.generation, state.credentials.clone())
    }

    /// Record the identity looked up for login `epoch`.
    ///
    /// Refused if the credentials were cleared or replaced in the meantime.
    pub(crate) fn set_identity(&self, epoch: u64, identity: Identity) -> bool {
        let mut state = self.state();
        if state.epoch != epoch || state.credentials.is_none() {
            return false;
        }
        state.identity = Some(identity);
        true
    }

    /// Write both keys; on a partial failure remove both again.
    fn persist(&self, credentials: &Credentials) -> Result<()> {
        let written = self
            .store
            .set(&self.access_key, &credentials.access)
            .and_then(|()| self.store.set(&self.refresh_key, &credentials.refresh));

        if let Err(e) = written {
            error!(error = %e, "failed to persist credentials; erasing stored tokens");
            if let Err(rollback) = self.erase_stored() {
                error!(error = %rollback, "failed to erase stored tokens");
            }
            return Err(e);
        }
        Ok(())
    }

    fn erase_stored(&self) -> Result<()> {
        let access = self.store.remove(&self.access_key);
        let refresh = self.store.remove(&self.refresh_key);
        access.and(refresh)
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("CredentialManager")
            .field("authenticated", &state.credentials.is_some())
            .field("has_identity", &state.identity.is_some())
            .field("generation", &state.generation)
            .field("epoch", &state.epoch)
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    /// Store that refuses to write one particular key.
    struct FlakyStore {
        inner: Arc<MemoryStore>,
        failing_key: &'static str,
    }

    impl CredentialStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            if key == self.failing_key {
                return Err(LobbyClientError::Storage("disk full".into()));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    fn identity(name: &str) -> Identity {
        Identity {
            id: Some(1),
            username: name.into(),
            extra: Default::default(),
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "guess-lobby-client-{}-{}-{name}.json",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[test]
    fn set_then_read_returns_exact_values() {
        let manager = CredentialManager::new(MemoryStore::new());
        manager
            .set_credentials(Credentials::new("a1", "r1"))
            .unwrap();
        assert_eq!(manager.current_access().as_deref(), Some("a1"));
        assert_eq!(manager.current_refresh().as_deref(), Some("r1"));
        assert!(manager.is_authenticated());
    }

    #[test]
    fn clear_erases_memory_storage_and_identity() {
        let store = Arc::new(MemoryStore::new());
        let manager = CredentialManager::new(Arc::clone(&store));
        manager.set_credentials(Credentials::new("a", "r")).unwrap();
        assert!(manager.set_identity(manager.epoch(), identity("alice")));

        manager.clear_credentials().unwrap();
        assert!(manager.current_access().is_none());
        assert!(manager.current_refresh().is_none());
        assert!(manager.identity().is_none());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn identity_is_refused_while_anonymous() {
        let manager = CredentialManager::new(MemoryStore::new());
        assert!(!manager.set_identity(manager.epoch(), identity("ghost")));
        assert!(manager.identity().is_none());
    }

    #[test]
    fn rotate_keeps_identity_and_epoch() {
        let manager = CredentialManager::new(MemoryStore::new());
        let epoch = manager.login(Credentials::new("a", "r")).unwrap();
        manager.set_identity(epoch, identity("alice"));
        manager.rotate(Credentials::new("a2", "r2")).unwrap();
        assert_eq!(manager.identity().unwrap().username, "alice");
        assert_eq!(manager.current_access().as_deref(), Some("a2"));
        assert_eq!(manager.epoch(), epoch);
    }

    #[test]
    fn identity_for_an_earlier_login_is_refused() {
        let manager = CredentialManager::new(MemoryStore::new());
        let first = manager.login(Credentials::new("a", "r")).unwrap();
        manager.clear_credentials().unwrap();
        let second = manager.login(Credentials::new("b", "s")).unwrap();
        assert_ne!(first, second);

        assert!(!manager.set_identity(first, identity("alice")));
        assert!(manager.identity().is_none());
        assert!(manager.set_identity(second, identity("bob")));
        assert_eq!(manager.identity().unwrap().username, "bob");
    }

    #[test]
    fn clear_if_epoch_spares_a_newer_login() {
        let store = Arc::new(MemoryStore::new());
        let manager = CredentialManager::new(Arc::clone(&store));
        let first = manager.login(Credentials::new("a", "r")).unwrap();
        manager.login(Credentials::new("b", "s")).unwrap();

        assert!(!manager.clear_if_epoch(first).unwrap());
        assert_eq!(manager.current_access().as_deref(), Some("b"));
        assert_eq!(store.snapshot()["access"], "b");

        assert!(manager.clear_if_epoch(manager.epoch()).unwrap());
        assert!(!manager.is_authenticated());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn every_mutation_bumps_generation() {
        let manager = CredentialManager::new(MemoryStore::new());
        let g0 = manager.generation();
        manager.set_credentials(Credentials::new("a", "r")).unwrap();
        let g1 = manager.generation();
        manager.clear_credentials().unwrap();
        let g2 = manager.generation();
        assert!(g0 < g1 && g1 < g2);
    }

    #[test]
    fn restore_requires_both_tokens() {
        let store = Arc::new(MemoryStore::with_entries([("access", "a")]));
        let manager = CredentialManager::new(Arc::clone(&store));
        assert!(!manager.restore().unwrap());
        assert!(!manager.is_authenticated());
        assert!(store.snapshot().is_empty(), "lone token must be erased");
    }

    #[test]
    fn restore_adopts_complete_pair() {
        let manager = CredentialManager::new(MemoryStore::with_entries([
            ("access", "a"),
            ("refresh", "r"),
        ]));
        assert!(manager.restore().unwrap());
        assert_eq!(manager.current_access().as_deref(), Some("a"));
        assert_eq!(manager.current_refresh().as_deref(), Some("r"));
    }

    #[test]
    fn partial_persist_failure_leaves_storage_empty() {
        let inner = Arc::new(MemoryStore::with_entries([
            ("access", "old-a"),
            ("refresh", "old-r"),
        ]));
        let manager = CredentialManager::new(FlakyStore {
            inner: Arc::clone(&inner),
            failing_key: "refresh",
        });

        let err = manager
            .set_credentials(Credentials::new("new-a", "new-r"))
            .unwrap_err();
        assert!(matches!(err, LobbyClientError::Storage(_)));
        assert!(inner.snapshot().is_empty());
        assert!(!manager.is_authenticated());
    }

    /// Store whose refresh-token writes start failing once armed.
    struct ArmedStore {
        inner: Arc<MemoryStore>,
        armed: Arc<std::sync::atomic::AtomicBool>,
    }

    impl CredentialStore for ArmedStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            if key == "refresh" && self.armed.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(LobbyClientError::Storage("disk full".into()));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn failed_persist_drops_the_pair_held_in_memory() {
        let inner = Arc::new(MemoryStore::new());
        let armed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let manager = CredentialManager::new(ArmedStore {
            inner: Arc::clone(&inner),
            armed: Arc::clone(&armed),
        });
        let epoch = manager.login(Credentials::new("old-a", "old-r")).unwrap();
        assert!(manager.set_identity(epoch, identity("alice")));
        assert_eq!(inner.snapshot().len(), 2);

        armed.store(true, std::sync::atomic::Ordering::SeqCst);
        let before = manager.generation();
        let err = manager
            .set_credentials(Credentials::new("new-a", "new-r"))
            .unwrap_err();
        assert!(matches!(err, LobbyClientError::Storage(_)));

        assert!(inner.snapshot().is_empty());
        assert!(!manager.is_authenticated());
        assert!(manager.identity().is_none());
        assert!(manager.generation() > before);
        assert_ne!(manager.epoch(), epoch);
        assert!(!manager.restore().unwrap());
    }

    #[test]
    fn custom_keys_from_config() {
        let store = Arc::new(MemoryStore::new());
        let config = LobbyClientConfig::new("http://x").with_storage_keys("tok_a", "tok_r");
        let manager = CredentialManager::from_config(Arc::clone(&store), &config);
        manager.set_credentials(Credentials::new("a", "r")).unwrap();
        let stored = store.snapshot();
        assert_eq!(stored["tok_a"], "a");
        assert_eq!(stored["tok_r"], "r");
    }

    #[test]
    fn file_store_survives_a_new_manager() {
        let path = temp_path("survive");
        {
            let manager = CredentialManager::new(FileStore::new(&path));
            manager.set_credentials(Credentials::new("fa", "fr")).unwrap();
        }
        let manager = CredentialManager::new(FileStore::new(&path));
        assert!(manager.restore().unwrap());
        assert_eq!(manager.current_access().as_deref(), Some("fa"));

        manager.clear_credentials().unwrap();
        let reopened = FileStore::new(&path);
        assert!(reopened.get("access").unwrap().is_none());
        assert!(reopened.get("refresh").unwrap().is_none());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn file_store_rejects_non_object_content() {
        let path = temp_path("corrupt");
        fs::write(&path, "[1,2,3]").unwrap();
        let store = FileStore::new(&path);
        assert!(matches!(
            store.get("access").unwrap_err(),
            LobbyClientError::Storage(_)
        ));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn debug_does_not_leak_tokens() {
        let manager = CredentialManager::new(MemoryStore::new());
        manager
            .set_credentials(Credentials::new("leaky-access", "leaky-refresh"))
            .unwrap();
        let rendered = format!("{manager:?}");
        assert!(!rendered.contains("leaky"));
    }
}
