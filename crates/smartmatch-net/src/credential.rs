//! Bearer credentials and the stores they are read from.
//!
//! The transport never caches a credential: it asks its [`CredentialStore`]
//! on every HTTP dispatch and on every WebSocket (re)connect, so a login or
//! logout is visible on the next operation without any invalidation step.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use smartmatch_core::logging::targets;

use crate::error::{NetworkError, Result};

/// Lookup key the token is stored under by default.
pub const DEFAULT_CREDENTIAL_KEY: &str = "token";

/// A bearer token, possibly absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(Option<String>);

impl Credential {
    /// A credential holding `token`. An empty token counts as absent.
    pub fn bearer(token: impl Into<String>) -> Self {
        let token = token.into();
        Self((!token.is_empty()).then_some(token))
    }

    /// No credential.
    pub fn anonymous() -> Self {
        Self(None)
    }

    /// The raw token.
    pub fn token(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Whether a token is present.
    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }

    /// Value of the `authorization` header: `Bearer <token>`, or empty.
    pub fn authorization_header(&self) -> String {
        match &self.0 {
            Some(token) => format!("Bearer {token}"),
            None => String::new(),
        }
    }

    /// Payload of the streaming `connection_init` message.
    pub fn connection_params(&self) -> Value {
        json!({ "authorization": self.token().unwrap_or_default() })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Credential(<redacted>)"),
            None => f.write_str("Credential(None)"),
        }
    }
}

/// Persistent client-side storage for credentials.
pub trait CredentialStore: Send + Sync {
    /// Current value stored under `key`, or `None`.
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`.
    fn store(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the value under `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Read the credential under `key`, treating store failures as absence.
pub fn read_credential(store: &dyn CredentialStore, key: &str) -> Credential {
    match store.load(key) {
        Ok(Some(token)) => Credential::bearer(token),
        Ok(None) => Credential::anonymous(),
        Err(e) => {
            tracing::warn!(target: targets::CREDENTIAL, key, error = %e, "credential store unreadable, continuing unauthenticated");
            Credential::anonymous()
        }
    }
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `token` under the default key.
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store
            .values
            .write()
            .insert(DEFAULT_CREDENTIAL_KEY.to_string(), token.into());
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// Credential store backed by a JSON object in a file.
///
/// The file is re-read on every load, so another process (or another client
/// session) logging in or out is picked up immediately. Writes go through a
/// uniquely named temporary file in the same directory, renamed over the
/// target, so concurrent writers never share a temporary.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Use the file at `path`. It need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Use `credentials.json` in the platform data directory
    /// (for example `~/.local/share/smartmatch` on Linux).
    pub fn in_data_dir() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("com", "SmartMatch", "smartmatch")
            .ok_or_else(|| NetworkError::Storage("no home directory for credential file".into()))?;
        Ok(Self::new(dirs.data_dir().join("credentials.json")))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(NetworkError::Storage(e.to_string())),
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&text)? {
            Value::Object(map) => Ok(map),
            _ => Err(NetworkError::Storage(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
        }
    }

    fn write_all(&self, map: &Map<String, Value>) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        let mut file = tempfile::NamedTempFile::new_in(parent)?;
        file.write_all(serde_json::to_string_pretty(map)?.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .read_all()?
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn store(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.read_all()?;
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.write_all(&map)?;
        tracing::debug!(target: targets::CREDENTIAL, key, path = %self.path.display(), "credential stored");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.read_all()?;
        if map.remove(key).is_some() {
            self.write_all(&map)?;
            tracing::debug!(target: targets::CREDENTIAL, key, "credential removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_header() {
        assert_eq!(Credential::bearer("abc").authorization_header(), "Bearer abc");
        assert_eq!(Credential::anonymous().authorization_header(), "");
        assert_eq!(Credential::bearer("").authorization_header(), "");
    }

    #[test]
    fn test_connection_params() {
        assert_eq!(
            Credential::bearer("abc").connection_params(),
            json!({"authorization": "abc"})
        );
        assert_eq!(
            Credential::anonymous().connection_params(),
            json!({"authorization": ""})
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", Credential::bearer("secret-token"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn test_memory_store_reads_fresh() {
        let store = MemoryCredentialStore::new();
        assert_eq!(read_credential(&store, DEFAULT_CREDENTIAL_KEY), Credential::anonymous());

        store.store(DEFAULT_CREDENTIAL_KEY, "t1").unwrap();
        assert_eq!(read_credential(&store, DEFAULT_CREDENTIAL_KEY).token(), Some("t1"));

        store.remove(DEFAULT_CREDENTIAL_KEY).unwrap();
        assert!(!read_credential(&store, DEFAULT_CREDENTIAL_KEY).is_present());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested").join("credentials.json"));

        assert_eq!(store.load("token").unwrap(), None);
        store.store("token", "abc").unwrap();
        store.store("refresh", "def").unwrap();
        assert_eq!(store.load("token").unwrap().as_deref(), Some("abc"));

        // A second handle on the same file sees the same state.
        let other = FileCredentialStore::new(store.path());
        other.remove("token").unwrap();
        assert_eq!(store.load("token").unwrap(), None);
        assert_eq!(store.load("refresh").unwrap().as_deref(), Some("def"));
    }

    #[test]
    fn test_concurrent_writers_leave_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = FileCredentialStore::new(&path);
                std::thread::spawn(move || {
                    for round in 0..20 {
                        store.store("token", &format!("t{i}-{round}")).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let token = FileCredentialStore::new(&path).load("token").unwrap();
        assert!(token.is_some_and(|t| t.ends_with("-19")));
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_corrupt_file_reads_as_anonymous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "[1, 2]").unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(store.load("token").is_err());
        assert_eq!(read_credential(&store, "token"), Credential::anonymous());
    }
}
