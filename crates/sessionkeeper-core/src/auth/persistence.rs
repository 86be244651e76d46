//! Versioned on-disk layout of the session record.
//!
//! The document is `{"version": N, "state": {...}}`. Older versions are
//! migrated when loaded; newer ones are refused.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use super::record::SessionRecord;

/// Name of the persisted document (without extension)
pub const STORAGE_NAME: &str = "auth-storage";

/// Current schema version written by `encode`
pub const SCHEMA_VERSION: u32 = 1;

/// Session window the version 0 client always applied.
const LEGACY_SESSION_WINDOW_DAYS: i64 = 7;

/// Keys the version 0 client persisted although they were transient.
const LEGACY_TRANSIENT_KEYS: &[&str] = &["isLoading", "error"];

const BOOL_KEYS: &[&str] = &[
    "isAuthenticated",
    "hasCompletedOnboarding",
    "hasPasscode",
    "isBiometricEnabled",
];

const TOKEN_KEYS: &[&str] = &["accessToken", "refreshToken", "passcodeSessionToken"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Session storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Session document version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u64, supported: u32 },
}

#[derive(Serialize)]
struct PersistedDocument<'a> {
    version: u32,
    state: &'a SessionRecord,
}

/// Serialize a record as the current schema version.
pub fn encode(record: &SessionRecord) -> Result<String, StoreError> {
    let doc = PersistedDocument {
        version: SCHEMA_VERSION,
        state: record,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Parse a persisted document of any supported version.
pub fn decode(contents: &str) -> Result<SessionRecord, StoreError> {
    let doc: Value = serde_json::from_str(contents)?;
    let version = doc.get("version").and_then(Value::as_u64).unwrap_or(0);
    let mut state = match doc.get("state") {
        Some(Value::Object(state)) => state.clone(),
        _ => Map::new(),
    };

    if version > u64::from(SCHEMA_VERSION) {
        return Err(StoreError::UnsupportedVersion {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }
    if version == 0 {
        debug!("Migrating session document from version 0");
        migrate_v0(&mut state);
    }

    let mut record: SessionRecord = serde_json::from_value(Value::Object(state))?;
    record.normalize();
    Ok(record)
}

/// Bring a version 0 state object up to the version 1 layout.
///
/// Version 0 wrote nulls for unset flags, empty strings for absent tokens,
/// transient UI fields, and sometimes no `tokenExpiresAt` at all.
fn migrate_v0(state: &mut Map<String, Value>) {
    for key in LEGACY_TRANSIENT_KEYS {
        state.remove(*key);
    }

    for key in BOOL_KEYS {
        if matches!(state.get(*key), Some(Value::Null)) {
            state.insert((*key).to_string(), Value::Bool(false));
        }
    }

    for key in TOKEN_KEYS {
        if matches!(state.get(*key), Some(Value::String(s)) if s.is_empty()) {
            state.insert((*key).to_string(), Value::Null);
        }
    }

    let issued_at = timestamp(state, "tokenIssuedAt").or_else(|| timestamp(state, "lastActivityAt"));
    if timestamp(state, "tokenExpiresAt").is_none() {
        if let Some(issued_at) = issued_at {
            let expires_at = issued_at + Duration::days(LEGACY_SESSION_WINDOW_DAYS);
            state.insert("tokenIssuedAt".into(), Value::String(issued_at.to_rfc3339()));
            state.insert("tokenExpiresAt".into(), Value::String(expires_at.to_rfc3339()));
        }
    }
}

fn timestamp(state: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    state
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Storage backend for the encoded session document.
pub trait SessionPersistence: Send + Sync {
    /// Load the stored record, `None` when nothing has been stored yet.
    fn load(&self) -> Result<Option<SessionRecord>, StoreError>;

    fn save(&self, record: &SessionRecord) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}

/// JSON document in a directory on disk.
pub struct FileSessionPersistence {
    path: PathBuf,
}

impl FileSessionPersistence {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", STORAGE_NAME)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionPersistence for FileSessionPersistence {
    fn load(&self) -> Result<Option<SessionRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        decode(&contents).map(Some)
    }

    fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = encode(record)?;

        // Write-then-rename so a crash never leaves a half-written document
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!(path = %self.path.display(), "Session document removed");
        }
        Ok(())
    }
}

/// In-process backend holding the encoded document.
#[derive(Default)]
pub struct MemorySessionPersistence {
    document: Mutex<Option<String>>,
}

impl MemorySessionPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already-encoded document, e.g. a legacy one.
    pub fn with_document(document: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(Some(document.into())),
        }
    }

    /// The currently stored document, if any.
    pub fn document(&self) -> Option<String> {
        self.document.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SessionPersistence for MemorySessionPersistence {
    fn load(&self) -> Result<Option<SessionRecord>, StoreError> {
        match self.document() {
            Some(contents) => decode(&contents).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let contents = encode(record)?;
        *self.document.lock().unwrap_or_else(|e| e.into_inner()) = Some(contents);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.document.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_writes_current_version() {
        let doc: Value = serde_json::from_str(&encode(&SessionRecord::default()).unwrap()).unwrap();
        assert_eq!(doc["version"], SCHEMA_VERSION);
        assert_eq!(doc["state"]["isAuthenticated"], false);
    }

    #[test]
    fn test_decode_current_version() {
        let mut record = SessionRecord::default();
        record.start_primary_session("at".into(), "rt".into(), Utc::now(), None, Duration::days(7));
        record.has_passcode = true;

        let decoded = decode(&encode(&record).unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_migrate_v0_document() {
        let legacy = r#"{
            "state": {
                "user": {"id": "test-user-123", "email": "test@example.com", "onboardingStatus": "wallets_pending"},
                "accessToken": "mock-access-token",
                "refreshToken": "mock-refresh-token",
                "isAuthenticated": true,
                "lastActivityAt": "2026-10-01T08:00:00Z",
                "hasPasscode": null,
                "passcodeSessionToken": "",
                "isLoading": true,
                "error": "stale"
            },
            "version": 0
        }"#;

        let record = decode(legacy).unwrap();
        assert!(record.is_session_valid());
        assert!(!record.has_passcode);
        assert!(record.passcode_session_token.is_none());

        let issued = DateTime::parse_from_rfc3339("2026-10-01T08:00:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(record.token_issued_at, Some(issued));
        assert_eq!(record.token_expires_at, Some(issued + Duration::days(7)));
        assert_eq!(record.user.as_ref().map(|u| u.id.as_str()), Some("test-user-123"));
    }

    #[test]
    fn test_migrate_v0_drops_authentication_without_tokens() {
        let legacy = r#"{"state": {"isAuthenticated": true, "accessToken": "at", "refreshToken": ""}, "version": 0}"#;
        let record = decode(legacy).unwrap();
        assert!(!record.is_authenticated);
        assert!(record.refresh_token.is_none());
    }

    #[test]
    fn test_decode_rejects_future_version() {
        let err = decode(r#"{"version": 9, "state": {}}"#).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion { found: 9, .. }));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("not json").unwrap_err(), StoreError::Malformed(_)));
    }

    #[test]
    fn test_file_persistence_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FileSessionPersistence::new(dir.path().join("nested"));
        assert!(persistence.load().unwrap().is_none());

        let mut record = SessionRecord::default();
        record.pending_verification_email = Some("ada@example.com".into());
        persistence.save(&record).unwrap();
        assert!(persistence.path().exists());
        assert_eq!(persistence.load().unwrap(), Some(record));

        persistence.clear().unwrap();
        assert!(!persistence.path().exists());
        persistence.clear().unwrap();
    }

    #[test]
    fn test_memory_persistence() {
        let persistence = MemorySessionPersistence::new();
        assert!(persistence.load().unwrap().is_none());

        persistence.save(&SessionRecord::default()).unwrap();
        assert!(persistence.document().unwrap().contains("\"version\": 1"));

        persistence.clear().unwrap();
        assert!(persistence.document().is_none());
    }
}
