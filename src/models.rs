//! Data types that flow between the collaborators, the cache and the CLI.
//!
//! Everything here is serde-serializable because everything here ends up as
//! a cached record.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// A timed piece of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

/// Speech-to-text output for one audio file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Document,
    Audio,
}

/// One ingested input, as listed in the session manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub file_name: String,
    pub content_type: String,
    /// Hex SHA-256 of the raw input bytes.
    pub content_hash: String,
    /// Key of the derived text/transcript artifact.
    pub artifact_key: String,
    pub added_at: DateTime<Utc>,
}

/// Contents of the `session` record in every session directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub title: String,
    pub date: NaiveDate,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
}

/// Returned by `MeetingService::open_session`.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub manifest: SessionManifest,
    /// `true` if this call created the session.
    pub created: bool,
}

/// A chunk of a source's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// File name of the source the chunk came from.
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// Retrieval index over every source in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionIndex {
    pub max_tokens: usize,
    /// Embedding model used for `vector`s, if any.
    #[serde(default)]
    pub embedding_model: Option<String>,
    pub chunks: Vec<IndexedChunk>,
}

impl SessionIndex {
    pub fn has_vectors(&self) -> bool {
        self.embedding_model.is_some() && self.chunks.iter().all(|c| c.vector.is_some())
    }
}

/// A search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub source: String,
    pub chunk_index: i64,
    pub score: f64,
    pub snippet: String,
}
