//! Durable key-value storage for session credentials
//!
//! The credential record is a flat map of well-known string keys to string
//! values. This module is pure storage: no expiry checks, no retries, no
//! policy. Every failure is logged here and returned to the caller.
//!
//! Two backends:
//! - [`FileCredentialStore`]: a JSON object on disk, written atomically
//!   (temp file + rename, 0600). A tokio Mutex serializes writers.
//! - [`MemoryCredentialStore`]: in-process map for tests and ephemeral
//!   runs, with switchable failure injection.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// Value stored for boolean flags.
pub const TRUE: &str = "true";

/// Well-known credential keys. Their string forms are the persisted names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialKey {
    AuthToken,
    RefreshToken,
    UserLoginName,
    TokenExpiration,
    RefreshTokenExpiration,
    IsLoggedIn,
    UserPin,
    PinVerified,
    LastPinVerification,
    PendingLoginInfo,
}

impl CredentialKey {
    /// Every key. Logout removes all of them.
    pub const ALL: [CredentialKey; 10] = [
        CredentialKey::AuthToken,
        CredentialKey::RefreshToken,
        CredentialKey::UserLoginName,
        CredentialKey::TokenExpiration,
        CredentialKey::RefreshTokenExpiration,
        CredentialKey::IsLoggedIn,
        CredentialKey::UserPin,
        CredentialKey::PinVerified,
        CredentialKey::LastPinVerification,
        CredentialKey::PendingLoginInfo,
    ];

    /// PIN material only. Resetting the PIN leaves tokens alone.
    pub const PIN: [CredentialKey; 3] = [
        CredentialKey::UserPin,
        CredentialKey::PinVerified,
        CredentialKey::LastPinVerification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CredentialKey::AuthToken => "authToken",
            CredentialKey::RefreshToken => "refreshToken",
            CredentialKey::UserLoginName => "userLoginName",
            CredentialKey::TokenExpiration => "tokenExpiration",
            CredentialKey::RefreshTokenExpiration => "refreshTokenExpiration",
            CredentialKey::IsLoggedIn => "isLoggedIn",
            CredentialKey::UserPin => "userPIN",
            CredentialKey::PinVerified => "pinVerified",
            CredentialKey::LastPinVerification => "lastPinVerification",
            CredentialKey::PendingLoginInfo => "pendingLoginInfo",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boxed future returned by [`CredentialStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Asynchronous, fallible key-value persistence for credentials.
///
/// Uses `Pin<Box<dyn Future>>` return types so components can share one
/// store as `Arc<dyn CredentialStore>`.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: CredentialKey) -> StoreFuture<'_, Option<String>>;

    fn set(&self, key: CredentialKey, value: String) -> StoreFuture<'_, ()>;

    /// Remove several keys at once. Absent keys are not an error.
    fn remove<'a>(&'a self, keys: &'a [CredentialKey]) -> StoreFuture<'a, ()>;

    /// Remove every entry, including keys this client does not know.
    fn clear(&self) -> StoreFuture<'_, ()>;

    /// Write several entries. Backends may override to persist them in one
    /// write; the default sets them one by one in order.
    fn set_many(&self, entries: Vec<(CredentialKey, String)>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            for (key, value) in entries {
                self.set(key, value).await?;
            }
            Ok(())
        })
    }

    /// Read a boolean flag. Anything other than `"true"` is false.
    fn get_flag(&self, key: CredentialKey) -> StoreFuture<'_, bool> {
        Box::pin(async move { Ok(self.get(key).await?.as_deref() == Some(TRUE)) })
    }
}

/// JSON-file credential store.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<BTreeMap<String, String>>,
}

impl FileCredentialStore {
    /// Load the record from `path`, creating it as `{}` when missing.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::Storage(format!("checking credential file: {e}")))?;
        let state = if exists {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Storage(format!("reading credential file: {e}")))?;
            let entries: BTreeMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), entries = entries.len(), "loaded credential record");
            entries
        } else {
            info!(path = %path.display(), "credential file not found, starting empty");
            let entries = BTreeMap::new();
            write_atomic(&path, &entries).await?;
            entries
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `mutate` to a copy of the record and persist it. The in-memory
    /// record only changes once the write has succeeded.
    async fn commit<F>(&self, op: &'static str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        mutate(&mut next);
        if next == *state {
            return Ok(());
        }
        if let Err(e) = write_atomic(&self.path, &next).await {
            error!(op, error = %e, "credential write failed");
            return Err(e);
        }
        *state = next;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: CredentialKey) -> StoreFuture<'_, Option<String>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.get(key.as_str()).cloned())
        })
    }

    fn set(&self, key: CredentialKey, value: String) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.commit("set", |m| {
                m.insert(key.as_str().to_string(), value);
            })
            .await?;
            debug!(%key, "stored credential");
            Ok(())
        })
    }

    fn set_many(&self, entries: Vec<(CredentialKey, String)>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let count = entries.len();
            self.commit("set_many", |m| {
                for (key, value) in entries {
                    m.insert(key.as_str().to_string(), value);
                }
            })
            .await?;
            debug!(count, "stored credentials");
            Ok(())
        })
    }

    fn remove<'a>(&'a self, keys: &'a [CredentialKey]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.commit("remove", |m| {
                for key in keys {
                    m.remove(key.as_str());
                }
            })
            .await?;
            debug!(count = keys.len(), "removed credentials");
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.commit("clear", |m| m.clear()).await?;
            debug!("cleared credential record");
            Ok(())
        })
    }
}

/// Write the record atomically: temp file in the same directory, 0600 on
/// unix, then rename over the target.
async fn write_atomic(path: &Path, data: &BTreeMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Storage(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential record");
    Ok(())
}

/// Store operations, for failure injection on [`MemoryCredentialStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Set,
    Remove,
    Clear,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, String>,
    failing: HashSet<StoreOp>,
}

/// In-process credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: std::sync::Mutex<MemoryState>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `op` fail with a storage error until
    /// [`recover`](Self::recover) is called.
    pub fn fail_on(&self, op: StoreOp) {
        self.lock().failing.insert(op);
    }

    pub fn recover(&self) {
        self.lock().failing.clear();
    }

    /// Raw read of an entry, bypassing failure injection.
    pub fn peek(&self, key: CredentialKey) -> Option<String> {
        self.lock().entries.get(key.as_str()).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn run<T>(&self, op: StoreOp, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> Result<T> {
        let mut state = self.lock();
        if state.failing.contains(&op) {
            error!(?op, "credential storage unavailable");
            return Err(Error::Storage(format!("{op:?} failed: storage unavailable")));
        }
        Ok(f(&mut state.entries))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: CredentialKey) -> StoreFuture<'_, Option<String>> {
        let result = self.run(StoreOp::Get, |m| m.get(key.as_str()).cloned());
        Box::pin(async move { result })
    }

    fn set(&self, key: CredentialKey, value: String) -> StoreFuture<'_, ()> {
        let result = self.run(StoreOp::Set, |m| {
            m.insert(key.as_str().to_string(), value);
        });
        Box::pin(async move { result })
    }

    fn remove<'a>(&'a self, keys: &'a [CredentialKey]) -> StoreFuture<'a, ()> {
        let result = self.run(StoreOp::Remove, |m| {
            for key in keys {
                m.remove(key.as_str());
            }
        });
        Box::pin(async move { result })
    }

    fn clear(&self) -> StoreFuture<'_, ()> {
        let result = self.run(StoreOp::Clear, |m| m.clear());
        Box::pin(async move { result })
    }
}
