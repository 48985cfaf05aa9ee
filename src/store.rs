//! Per-session artifact store.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/
//!   standup-2024-01-05-ba7816bf/
//!     session.json                        manifest record
//!     document-1f0c…@9a41….txt            text artifact, key "document-1f0c…:9a41…"
//!     transcript-77aa…@03be….json         record artifact
//! ```
//!
//! The store is the only component that touches these files. Reads of a
//! missing artifact are not errors (empty text, empty record); reads of an
//! artifact that exists but cannot be decoded are [`Error::CacheCorruption`].
//! Every write goes through a temporary file in the session directory that
//! is renamed into place, so a file under its final name is always complete.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::session::SessionId;

/// A structured artifact: a JSON object.
pub type Record = serde_json::Map<String, Value>;

/// On-disk encoding of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Text,
    Record,
}

impl ArtifactKind {
    fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Text => "txt",
            ArtifactKind::Record => "json",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "txt" => Some(ArtifactKind::Text),
            "json" => Some(ArtifactKind::Record),
            _ => None,
        }
    }
}

/// One artifact file found by [`ArtifactStore::list_artifacts`].
#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    /// Key as passed to the store (`name` or `name:fingerprint`).
    pub key: String,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
    pub modified: Option<SystemTime>,
}

/// One session directory found by [`ArtifactStore::list_sessions`].
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub id: SessionId,
    pub artifact_count: usize,
    pub total_bytes: u64,
    pub last_modified: Option<SystemTime>,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session: &SessionId) -> PathBuf {
        self.root.join(session.as_str())
    }

    /// Path an artifact lives at (whether or not it exists yet).
    pub fn artifact_path(
        &self,
        session: &SessionId,
        key: &str,
        kind: ArtifactKind,
    ) -> Result<PathBuf> {
        validate_key(key)?;
        let file_name = format!("{}.{}", key.replace(':', "@"), kind.extension());
        Ok(self.session_dir(session).join(file_name))
    }

    pub fn write_text(&self, session: &SessionId, key: &str, text: &str) -> Result<PathBuf> {
        let path = self.artifact_path(session, key, ArtifactKind::Text)?;
        write_atomic(&path, text.as_bytes())?;
        Ok(path)
    }

    /// Text artifact, or an empty string when absent.
    pub fn read_text(&self, session: &SessionId, key: &str) -> Result<String> {
        Ok(self.load_text(session, key)?.unwrap_or_default())
    }

    /// Text artifact, or `None` when absent.
    pub fn load_text(&self, session: &SessionId, key: &str) -> Result<Option<String>> {
        let path = self.artifact_path(session, key, ArtifactKind::Text)?;
        let Some(bytes) = read_optional(&path)? else {
            return Ok(None);
        };
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| Error::corrupt(&path, format!("not valid UTF-8: {e}")))
    }

    pub fn write_record(&self, session: &SessionId, key: &str, record: &Record) -> Result<PathBuf> {
        let path = self.artifact_path(session, key, ArtifactKind::Record)?;
        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::config(format!("record '{key}' is not serializable: {e}")))?;
        write_atomic(&path, &body)?;
        Ok(path)
    }

    /// Record artifact, or an empty map when absent.
    pub fn read_record(&self, session: &SessionId, key: &str) -> Result<Record> {
        Ok(self.load_record(session, key)?.unwrap_or_default())
    }

    /// Record artifact, or `None` when absent.
    pub fn load_record(&self, session: &SessionId, key: &str) -> Result<Option<Record>> {
        let path = self.artifact_path(session, key, ArtifactKind::Record)?;
        let Some(bytes) = read_optional(&path)? else {
            return Ok(None);
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) => Err(Error::corrupt(&path, "record is not a JSON object")),
            Err(e) => Err(Error::corrupt(&path, format!("malformed JSON: {e}"))),
        }
    }

    /// All session directories under the root, sorted by id.
    ///
    /// Directories whose names are not valid session ids are skipped.
    pub fn list_sessions(&self) -> Result<Vec<SessionEntry>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.root, e)),
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| SessionId::parse(name).ok())
            else {
                continue;
            };
            let artifacts = self.list_artifacts(&id)?;
            sessions.push(SessionEntry {
                artifact_count: artifacts.len(),
                total_bytes: artifacts.iter().map(|a| a.size_bytes).sum(),
                last_modified: artifacts.iter().filter_map(|a| a.modified).max(),
                id,
            });
        }
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    /// Artifacts stored for a session, sorted by key. Empty if the session
    /// directory does not exist.
    pub fn list_artifacts(&self, session: &SessionId) -> Result<Vec<ArtifactEntry>> {
        let dir = self.session_dir(session);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&dir, e)),
        };

        let mut artifacts = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            let path = entry.path();
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|s| s.to_str()),
            ) else {
                continue;
            };
            let Some(kind) = ArtifactKind::from_extension(ext) else {
                continue;
            };
            // Leftover temp files start with '.' and fail validation.
            let key = stem.replace('@', ":");
            if validate_key(&key).is_err() {
                continue;
            }
            let meta = entry.metadata().map_err(|e| Error::io(&path, e))?;
            artifacts.push(ArtifactEntry {
                key,
                kind,
                size_bytes: meta.len(),
                modified: meta.modified().ok(),
            });
        }
        artifacts.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(artifacts)
    }
}

/// Artifact keys are `name` or `name:fingerprint`, each part drawn from
/// `[A-Za-z0-9._-]` and not starting with `.`.
fn validate_key(key: &str) -> Result<()> {
    let mut parts = key.split(':');
    let name = parts.next().unwrap_or_default();
    let fingerprint = parts.next();
    if parts.next().is_some() {
        return Err(Error::config(format!(
            "artifact key '{key}' has more than one ':'"
        )));
    }
    for part in std::iter::once(name).chain(fingerprint) {
        let valid = !part.is_empty()
            && !part.starts_with('.')
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(Error::config(format!(
                "invalid artifact key '{key}': use letters, digits, '.', '_' or '-'"
            )));
        }
    }
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::config(format!("artifact path {} has no parent", path.display())))?;
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(dir)
        .map_err(|e| Error::io(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| Error::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ArtifactStore, SessionId) {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path().join("cache"));
        let session = SessionId::parse("standup-2024-01-05-ba7816bf").unwrap();
        (tmp, store, session)
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn record_roundtrip_is_exact() {
        let (_tmp, store, s) = setup();
        let rec = record(json!({"text": "hi"}));
        store.write_record(&s, "summary", &rec).unwrap();
        assert_eq!(store.read_record(&s, "summary").unwrap(), rec);
    }

    #[test]
    fn text_roundtrip_preserves_bytes() {
        let (_tmp, store, s) = setup();
        let text = "line one\n\n  indented — ünïcode\n";
        store.write_text(&s, "notes", text).unwrap();
        assert_eq!(store.read_text(&s, "notes").unwrap(), text);
    }

    #[test]
    fn missing_artifacts_read_as_empty() {
        let (_tmp, store, s) = setup();
        // Session directory exists but lacks the key.
        store.write_text(&s, "other", "x").unwrap();
        assert_eq!(store.read_text(&s, "nonexistent").unwrap(), "");
        assert!(store.read_record(&s, "nonexistent").unwrap().is_empty());
        assert!(store.load_text(&s, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn missing_session_directory_reads_as_empty() {
        let (_tmp, store, s) = setup();
        assert_eq!(store.read_text(&s, "anything").unwrap(), "");
        assert!(store.list_artifacts(&s).unwrap().is_empty());
        assert!(store.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn malformed_record_is_corruption() {
        let (_tmp, store, s) = setup();
        let path = store.artifact_path(&s, "summary", ArtifactKind::Record).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{\"text\": \"trunc").unwrap();

        let err = store.read_record(&s, "summary").unwrap_err();
        assert!(matches!(err, Error::CacheCorruption { .. }), "got {err:?}");
    }

    #[test]
    fn non_object_record_is_corruption() {
        let (_tmp, store, s) = setup();
        let path = store.artifact_path(&s, "summary", ArtifactKind::Record).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"[1, 2, 3]").unwrap();
        assert!(matches!(
            store.read_record(&s, "summary").unwrap_err(),
            Error::CacheCorruption { .. }
        ));
    }

    #[test]
    fn invalid_utf8_text_is_corruption() {
        let (_tmp, store, s) = setup();
        let path = store.artifact_path(&s, "notes", ArtifactKind::Text).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            store.read_text(&s, "notes").unwrap_err(),
            Error::CacheCorruption { .. }
        ));
    }

    #[test]
    fn fingerprinted_keys_map_to_safe_file_names() {
        let (_tmp, store, s) = setup();
        let path = store.write_text(&s, "summary:abc123", "x").unwrap();
        assert_eq!(path.file_name().unwrap(), "summary@abc123.txt");
        let listed = store.list_artifacts(&s).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "summary:abc123");
        assert_eq!(listed[0].kind, ArtifactKind::Text);
    }

    #[test]
    fn invalid_keys_are_rejected() {
        let (_tmp, store, s) = setup();
        for bad in ["", "../escape", "a/b", ".hidden", "a:b:c", "a:", "sp ace"] {
            let err = store.write_text(&s, bad, "x").unwrap_err();
            assert!(matches!(err, Error::ConfigurationError(_)), "accepted {bad:?}");
        }
    }

    #[test]
    fn writes_leave_no_temp_files() {
        let (_tmp, store, s) = setup();
        store.write_text(&s, "a", "1").unwrap();
        store.write_text(&s, "a", "2").unwrap();
        let names: Vec<String> = std::fs::read_dir(store.session_dir(&s))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt".to_string()]);
        assert_eq!(store.read_text(&s, "a").unwrap(), "2");
    }

    #[test]
    fn list_sessions_summarizes_each_directory() {
        let (_tmp, store, s) = setup();
        let other = SessionId::parse("retro-2024-02-01-00000000").unwrap();
        store.write_text(&s, "a", "12345").unwrap();
        store.write_record(&s, "b", &record(json!({}))).unwrap();
        store.write_text(&other, "a", "1").unwrap();
        std::fs::create_dir_all(store.root().join("not a session")).unwrap();

        let sessions = store.list_sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, other);
        assert_eq!(sessions[1].id, s);
        assert_eq!(sessions[1].artifact_count, 2);
        assert!(sessions[1].total_bytes >= 5);
    }
}
