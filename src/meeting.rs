//! Meeting service.
//!
//! [`MeetingService`] is the request/response surface of the crate. Every
//! operation is a short sequence of collaborator calls, each wrapped in
//! [`Pipeline::get_or_compute`] so it runs at most once per input and
//! settings:
//!
//! | Operation | Artifact | Settings fingerprinted |
//! |-----------|----------|------------------------|
//! | [`ingest_document`](MeetingService::ingest_document) | `document-<hash16>` (text) | extractor engine, content type |
//! | [`transcribe_audio`](MeetingService::transcribe_audio) | `transcript-<hash16>` (record) | model, language |
//! | [`build_index`](MeetingService::build_index) | `index` (record) | chunk size, embedding model, sources |
//! | [`generate_agenda`](MeetingService::generate_agenda) | `agenda` (text) | model, temperature, token limit, template, sources |
//! | [`generate_summary`](MeetingService::generate_summary) | `summary` (text) | model, temperature, token limit, template, sources |
//!
//! The `session` manifest record is the one artifact updated in place: it
//! lists every ingested source so that index and generation settings can
//! include the sources' content hashes. Adding a source therefore changes
//! the key of every downstream artifact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::info;

use crate::api::ApiClient;
use crate::chunk::chunk_text;
use crate::config::{Config, Secrets};
use crate::embedding::{cosine_similarity, HostedEmbedder};
use crate::error::{Error, Result};
use crate::extract::{content_type_for_path, is_audio, LocalExtractor};
use crate::generate::ChatGenerator;
use crate::hashing::{digest_bytes, ContentHash};
use crate::models::{
    IndexedChunk, SearchHit, SessionIndex, SessionInfo, SessionManifest, SourceKind, SourceRef,
    Transcript,
};
use crate::pipeline::{Derived, Freshness, Pipeline};
use crate::session::{resolve_session_id, SessionId};
use crate::store::{ArtifactKind, ArtifactStore};
use crate::traits::{Collaborators, Disabled, Embedder, TextGenerator, Transcriber};
use crate::transcribe::HostedTranscriber;

/// Key of the per-session manifest record.
pub const MANIFEST_KEY: &str = "session";

const INDEX_ARTIFACT: &str = "index";
const AGENDA_ARTIFACT: &str = "agenda";
const SUMMARY_ARTIFACT: &str = "summary";

const AGENDA_TEMPLATE: &str = "agenda-v1";
const SUMMARY_TEMPLATE: &str = "summary-v1";

const AGENDA_SYSTEM: &str = "You prepare concise, well-structured meeting agendas.";
const SUMMARY_SYSTEM: &str =
    "You write accurate meeting summaries. Only state what the materials support.";

/// Maximum characters of chunk text returned as a search snippet.
const SNIPPET_CHARS: usize = 240;

/// Result of [`MeetingService::ingest_file`].
#[derive(Debug, Clone)]
pub enum Ingested {
    Document(Derived<String>),
    Audio(Derived<Transcript>),
}

impl Ingested {
    pub fn key(&self) -> &str {
        match self {
            Ingested::Document(d) => &d.key,
            Ingested::Audio(d) => &d.key,
        }
    }

    pub fn cached(&self) -> bool {
        match self {
            Ingested::Document(d) => d.cached,
            Ingested::Audio(d) => d.cached,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Ingested::Document(d) => &d.value,
            Ingested::Audio(d) => &d.value.text,
        }
    }
}

#[derive(Serialize)]
struct SourceFingerprint<'a> {
    content_hash: &'a str,
    artifact_key: &'a str,
}

pub struct MeetingService {
    config: Config,
    pipeline: Pipeline,
    collab: Collaborators,
    manifest_lock: Mutex<()>,
}

impl MeetingService {
    /// Build the service with the collaborators selected in `config`.
    ///
    /// Hosted collaborators share one [`ApiClient`]; it is only created when
    /// at least one of them is enabled, so a fully local configuration needs
    /// no API key.
    pub fn from_config(config: Config, secrets: &Secrets) -> anyhow::Result<Self> {
        let client = if config.hosted_features().is_empty() {
            None
        } else {
            Some(ApiClient::new(&config.api, secrets)?)
        };

        let transcriber: Arc<dyn Transcriber> = match &client {
            Some(client) if config.transcription.is_enabled() => Arc::new(
                HostedTranscriber::new(client.clone(), &config.transcription),
            ),
            _ => Arc::new(Disabled::new(
                "transcription",
                "transcription.provider = \"openai\"",
            )),
        };
        let generator: Arc<dyn TextGenerator> = match &client {
            Some(client) if config.generation.is_enabled() => {
                Arc::new(ChatGenerator::new(client.clone(), &config.generation))
            }
            _ => Arc::new(Disabled::new(
                "generation",
                "generation.provider = \"openai\"",
            )),
        };
        let embedder = match &client {
            Some(client) if config.embedding.is_enabled() => Some(Arc::new(
                HostedEmbedder::new(client.clone(), &config.embedding),
            ) as Arc<dyn Embedder>),
            _ => None,
        };

        let collab = Collaborators {
            extractor: Arc::new(LocalExtractor::new(&config.ocr)),
            transcriber,
            embedder,
            generator,
        };
        Ok(Self::with_collaborators(config, collab))
    }

    pub fn with_collaborators(config: Config, collab: Collaborators) -> Self {
        let pipeline = Pipeline::new(ArtifactStore::new(config.cache.root.clone()));
        Self {
            config,
            pipeline,
            collab,
            manifest_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        self.pipeline.store()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Sessions
    // ═══════════════════════════════════════════════════════════════════

    /// Resolve the session for a meeting and create its manifest if this is
    /// the first time it is seen. `primary` is the content that identifies
    /// the meeting (usually the first file ingested).
    pub async fn open_session(
        &self,
        title: &str,
        date: NaiveDate,
        primary: &[u8],
    ) -> Result<SessionInfo> {
        let hash = digest_bytes(primary);
        let id = resolve_session_id(title, date, &hash);

        let _guard = self.manifest_lock.lock().await;
        if let Some(manifest) = self.try_load_manifest(&id)? {
            return Ok(SessionInfo {
                id,
                manifest,
                created: false,
            });
        }

        let manifest = SessionManifest {
            title: title.trim().to_string(),
            date,
            content_hash: hash.to_hex(),
            created_at: Utc::now(),
            sources: Vec::new(),
        };
        self.save_manifest(&id, &manifest)?;
        info!(session = %id, "session created");
        Ok(SessionInfo {
            id,
            manifest,
            created: true,
        })
    }

    /// The manifest of an existing session.
    pub fn load_manifest(&self, session: &SessionId) -> Result<SessionManifest> {
        self.try_load_manifest(session)?.ok_or_else(|| {
            Error::config(format!(
                "unknown session '{session}'; ingest a file with a title and date first"
            ))
        })
    }

    fn try_load_manifest(&self, session: &SessionId) -> Result<Option<SessionManifest>> {
        read_manifest(self.store(), session)
    }

    fn save_manifest(&self, session: &SessionId, manifest: &SessionManifest) -> Result<()> {
        let record = match serde_json::to_value(manifest) {
            Ok(Value::Object(map)) => map,
            _ => return Err(Error::config("session manifest is not serializable")),
        };
        self.store().write_record(session, MANIFEST_KEY, &record)?;
        Ok(())
    }

    async fn record_source(
        &self,
        session: &SessionId,
        kind: SourceKind,
        file_name: &str,
        content_type: &str,
        hash: &ContentHash,
        artifact_key: &str,
    ) -> Result<()> {
        let _guard = self.manifest_lock.lock().await;
        let mut manifest = self.load_manifest(session)?;
        let content_hash = hash.to_hex();

        let source = SourceRef {
            kind,
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            content_hash: content_hash.clone(),
            artifact_key: artifact_key.to_string(),
            added_at: Utc::now(),
        };
        match manifest
            .sources
            .iter_mut()
            .find(|s| s.kind == kind && s.content_hash == content_hash)
        {
            Some(existing) if existing.artifact_key == artifact_key => return Ok(()),
            Some(existing) => *existing = source,
            None => manifest.sources.push(source),
        }
        self.save_manifest(session, &manifest)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Ingestion
    // ═══════════════════════════════════════════════════════════════════

    /// Extract a document's text (parsing or OCR) and add it to the session.
    pub async fn ingest_document(
        &self,
        session: &SessionId,
        file_name: &str,
        bytes: &[u8],
        freshness: Freshness,
    ) -> Result<Derived<String>> {
        self.load_manifest(session)?;
        let content_type = content_type_for_path(Path::new(file_name));
        let hash = digest_bytes(bytes);
        let settings = json!({
            "engine": self.collab.extractor.engine(),
            "content_type": content_type,
        });

        let derived: Derived<String> = self
            .pipeline
            .get_or_compute(
                session,
                &source_artifact("document", &hash),
                &settings,
                freshness,
                || self.collab.extractor.extract(bytes, content_type),
            )
            .await?;

        self.record_source(
            session,
            SourceKind::Document,
            file_name,
            content_type,
            &hash,
            &derived.key,
        )
        .await?;
        Ok(derived)
    }

    /// Transcribe an audio file and add the transcript to the session.
    pub async fn transcribe_audio(
        &self,
        session: &SessionId,
        file_name: &str,
        bytes: &[u8],
        freshness: Freshness,
    ) -> Result<Derived<Transcript>> {
        self.load_manifest(session)?;
        let content_type = content_type_for_path(Path::new(file_name));
        let hash = digest_bytes(bytes);
        let settings = json!({
            "model": self.collab.transcriber.model(),
            "language": self.config.transcription.language,
        });

        let derived: Derived<Transcript> = self
            .pipeline
            .get_or_compute_typed(
                session,
                &source_artifact("transcript", &hash),
                &settings,
                freshness,
                || self.collab.transcriber.transcribe(bytes, file_name),
            )
            .await?;

        self.record_source(
            session,
            SourceKind::Audio,
            file_name,
            content_type,
            &hash,
            &derived.key,
        )
        .await?;
        Ok(derived)
    }

    /// Route a file by content type: audio is transcribed, anything else is
    /// extracted.
    pub async fn ingest_file(
        &self,
        session: &SessionId,
        file_name: &str,
        bytes: &[u8],
        freshness: Freshness,
    ) -> Result<Ingested> {
        if is_audio(content_type_for_path(Path::new(file_name))) {
            self.transcribe_audio(session, file_name, bytes, freshness)
                .await
                .map(Ingested::Audio)
        } else {
            self.ingest_document(session, file_name, bytes, freshness)
                .await
                .map(Ingested::Document)
        }
    }

    /// Text of one ingested source, read back from its cached artifact.
    pub fn source_text(&self, session: &SessionId, source: &SourceRef) -> Result<String> {
        let missing = |kind| {
            let path = self
                .store()
                .artifact_path(session, &source.artifact_key, kind)
                .unwrap_or_else(|_| self.store().session_dir(session));
            Error::corrupt(&path, "listed in the session manifest but missing")
        };

        match source.kind {
            SourceKind::Document => self
                .store()
                .load_text(session, &source.artifact_key)?
                .ok_or_else(|| missing(ArtifactKind::Text)),
            SourceKind::Audio => {
                let record = self
                    .store()
                    .load_record(session, &source.artifact_key)?
                    .ok_or_else(|| missing(ArtifactKind::Record))?;
                let transcript: Transcript = serde_json::from_value(Value::Object(record))
                    .map_err(|e| {
                        Error::corrupt(
                            &record_path(self.store(), session, &source.artifact_key),
                            format!("transcript does not match expected shape: {e}"),
                        )
                    })?;
                Ok(transcript.text)
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Index & search
    // ═══════════════════════════════════════════════════════════════════

    /// Chunk every source in the session and, when embeddings are enabled,
    /// attach a vector to each chunk.
    pub async fn build_index(
        &self,
        session: &SessionId,
        freshness: Freshness,
    ) -> Result<Derived<SessionIndex>> {
        let manifest = self.load_manifest(session)?;
        let max_tokens = self.config.chunking.max_tokens;
        let embedding_model = self.collab.embedder.as_ref().map(|e| e.model().to_string());
        let settings = json!({
            "max_tokens": max_tokens,
            "embedding_model": embedding_model,
            "sources": source_fingerprints(&manifest),
        });

        let texts = manifest
            .sources
            .iter()
            .map(|source| -> Result<_> { Ok((source, self.source_text(session, source)?)) })
            .collect::<Result<Vec<_>>>()?;

        self.pipeline
            .get_or_compute_typed(session, INDEX_ARTIFACT, &settings, freshness, || async {
                let mut chunks = Vec::new();
                for (source, text) in &texts {
                    let source_id = &source.content_hash[..16];
                    chunks.extend(chunk_text(source_id, &source.file_name, text, max_tokens));
                }

                let vectors: Vec<Option<Vec<f32>>> = match &self.collab.embedder {
                    Some(embedder) if !chunks.is_empty() => {
                        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                        let vectors = embedder.embed(&texts).await?;
                        if vectors.len() != chunks.len() {
                            anyhow::bail!(
                                "embedder returned {} vectors for {} chunks",
                                vectors.len(),
                                chunks.len()
                            );
                        }
                        vectors.into_iter().map(Some).collect()
                    }
                    _ => vec![None; chunks.len()],
                };

                Ok::<_, anyhow::Error>(SessionIndex {
                    max_tokens,
                    embedding_model: embedding_model.clone(),
                    chunks: chunks
                        .into_iter()
                        .zip(vectors)
                        .map(|(chunk, vector)| IndexedChunk { chunk, vector })
                        .collect(),
                })
            })
            .await
    }

    /// Top `limit` chunks for `query`. Uses the cached index, building it
    /// first if needed.
    pub async fn search(
        &self,
        session: &SessionId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let index = self.build_index(session, Freshness::Reuse).await?.value;
        if limit == 0 || query.trim().is_empty() || index.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let scored: Vec<(f64, &IndexedChunk)> = match &self.collab.embedder {
            Some(embedder)
                if index.has_vectors()
                    && index.embedding_model.as_deref() == Some(embedder.model()) =>
            {
                let query_vec = embedder
                    .embed(&[query.to_string()])
                    .await
                    .map_err(|e| Error::DerivationFailed {
                        artifact: "query-embedding".to_string(),
                        source: e.into(),
                    })?
                    .into_iter()
                    .next()
                    .unwrap_or_default();
                index
                    .chunks
                    .iter()
                    .filter_map(|c| {
                        let vector = c.vector.as_deref()?;
                        Some((cosine_similarity(&query_vec, vector) as f64, c))
                    })
                    .collect()
            }
            _ => {
                let terms = tokenize(query);
                index
                    .chunks
                    .iter()
                    .map(|c| (keyword_score(&terms, &c.chunk.text), c))
                    .filter(|(score, _)| *score > 0.0)
                    .collect()
            }
        };

        let mut hits: Vec<SearchHit> = scored
            .into_iter()
            .map(|(score, c)| SearchHit {
                source: c.chunk.source.clone(),
                chunk_index: c.chunk.chunk_index,
                score,
                snippet: snippet(&c.chunk.text),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Generation
    // ═══════════════════════════════════════════════════════════════════

    /// Draft an agenda from the session's materials. Works on an empty
    /// session too, from the title and date alone.
    pub async fn generate_agenda(
        &self,
        session: &SessionId,
        freshness: Freshness,
    ) -> Result<Derived<String>> {
        let manifest = self.load_manifest(session)?;
        let materials = self.materials(session, &manifest)?;
        let prompt = format!(
            "Draft an agenda for the meeting \"{}\" on {}.\n\
             Return a numbered list of topics, each with a one-line goal.\n\n\
             Materials:\n{}",
            manifest.title,
            manifest.date,
            if materials.is_empty() {
                "(none provided)"
            } else {
                &materials
            }
        );
        self.generate(
            session,
            AGENDA_ARTIFACT,
            AGENDA_TEMPLATE,
            AGENDA_SYSTEM,
            &manifest,
            prompt,
            freshness,
        )
        .await
    }

    /// Summarize the session's materials. Needs at least one source.
    pub async fn generate_summary(
        &self,
        session: &SessionId,
        freshness: Freshness,
    ) -> Result<Derived<String>> {
        let manifest = self.load_manifest(session)?;
        if manifest.sources.is_empty() {
            return Err(Error::config(format!(
                "session '{session}' has no ingested sources to summarize"
            )));
        }
        let materials = self.materials(session, &manifest)?;
        let prompt = format!(
            "Summarize the meeting \"{}\" on {}.\n\
             Cover decisions, action items with owners, and open questions.\n\n\
             Materials:\n{}",
            manifest.title, manifest.date, materials
        );
        self.generate(
            session,
            SUMMARY_ARTIFACT,
            SUMMARY_TEMPLATE,
            SUMMARY_SYSTEM,
            &manifest,
            prompt,
            freshness,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn generate(
        &self,
        session: &SessionId,
        artifact: &str,
        template: &str,
        system: &str,
        manifest: &SessionManifest,
        prompt: String,
        freshness: Freshness,
    ) -> Result<Derived<String>> {
        let generation = &self.config.generation;
        let settings = json!({
            "model": self.collab.generator.model(),
            "temperature": generation.temperature,
            "max_tokens": generation.max_tokens,
            "template": template,
            "sources": source_fingerprints(manifest),
        });
        self.pipeline
            .get_or_compute(session, artifact, &settings, freshness, || {
                self.collab.generator.generate(system, &prompt)
            })
            .await
    }

    fn materials(&self, session: &SessionId, manifest: &SessionManifest) -> Result<String> {
        let mut out = String::new();
        for source in &manifest.sources {
            let text = self.source_text(session, source)?;
            if text.trim().is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&format!("### {}\n{}", source.file_name, text.trim()));
        }
        Ok(out)
    }
}

/// Manifest of `session`, or `None` if the session has never been opened.
pub fn read_manifest(store: &ArtifactStore, session: &SessionId) -> Result<Option<SessionManifest>> {
    let Some(record) = store.load_record(session, MANIFEST_KEY)? else {
        return Ok(None);
    };
    let path = record_path(store, session, MANIFEST_KEY);
    let manifest: SessionManifest = serde_json::from_value(Value::Object(record)).map_err(|e| {
        Error::corrupt(
            &path,
            format!("session manifest does not match expected shape: {e}"),
        )
    })?;
    let hashes = std::iter::once(&manifest.content_hash)
        .chain(manifest.sources.iter().map(|s| &s.content_hash));
    for hash in hashes {
        ContentHash::from_hex(hash).map_err(|e| {
            Error::corrupt(&path, format!("session manifest has a bad content hash: {e}"))
        })?;
    }
    Ok(Some(manifest))
}

fn record_path(store: &ArtifactStore, session: &SessionId, key: &str) -> PathBuf {
    store
        .artifact_path(session, key, ArtifactKind::Record)
        .unwrap_or_else(|_| store.session_dir(session))
}

fn source_artifact(prefix: &str, hash: &ContentHash) -> String {
    format!("{prefix}-{}", &hash.to_hex()[..16])
}

fn source_fingerprints(manifest: &SessionManifest) -> Vec<SourceFingerprint<'_>> {
    manifest
        .sources
        .iter()
        .map(|s| SourceFingerprint {
            content_hash: &s.content_hash,
            artifact_key: &s.artifact_key,
        })
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

/// Fraction of distinct query terms present in `text`.
fn keyword_score(terms: &[String], text: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let words = tokenize(text);
    let matched = terms
        .iter()
        .filter(|t| words.binary_search(t).is_ok())
        .count();
    matched as f64 / terms.len() as f64
}

fn snippet(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}…", &collapsed[..cut]),
        None => collapsed,
    }
}
