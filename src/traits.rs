//! Collaborator traits.
//!
//! The service never computes text, transcripts, vectors or completions
//! itself; it asks one of these collaborators and caches the answer. Each
//! trait is the whole contract: given identical input bytes and settings,
//! return equivalent output.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               MeetingService                 │
//! │  ingest_document  transcribe_audio  index …  │
//! └──────────────┬───────────────────────────────┘
//!                ▼
//!        Pipeline::get_or_compute
//!                │ miss
//!   ┌────────────┼─────────────┬────────────────┐
//!   ▼            ▼             ▼                ▼
//! TextExtractor Transcriber  Embedder      TextGenerator
//! (pdf/ooxml/   (hosted STT) (hosted       (hosted LLM)
//!  tesseract)                 embeddings)
//! ```
//!
//! Tests and embedders can plug in their own implementations through
//! [`Collaborators`].

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::Transcript;

// ═══════════════════════════════════════════════════════════════════════
// Collaborator Traits
// ═══════════════════════════════════════════════════════════════════════

/// Turns document bytes (PDF, Office, plain text, images) into text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Engine identifier folded into the cache key (e.g. `"local+tesseract:eng"`).
    fn engine(&self) -> String;

    async fn extract(&self, bytes: &[u8], content_type: &str) -> Result<String>;
}

/// Speech-to-text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Model identifier folded into the cache key.
    fn model(&self) -> &str;

    async fn transcribe(&self, audio: &[u8], file_name: &str) -> Result<Transcript>;
}

/// Text → embedding vectors, one per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Prompt → completion text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model(&self) -> &str;

    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;
}

/// The set of collaborators a `MeetingService` runs with.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn TextExtractor>,
    pub transcriber: Arc<dyn Transcriber>,
    /// `None` when embeddings are disabled; search falls back to keywords.
    pub embedder: Option<Arc<dyn Embedder>>,
    pub generator: Arc<dyn TextGenerator>,
}

// ═══════════════════════════════════════════════════════════════════════
// Disabled Collaborator
// ═══════════════════════════════════════════════════════════════════════

/// Stand-in for a collaborator turned off in the config. Every call fails
/// with a message naming the setting to change.
pub struct Disabled {
    feature: &'static str,
    setting: &'static str,
}

impl Disabled {
    pub fn new(feature: &'static str, setting: &'static str) -> Self {
        Self { feature, setting }
    }

    fn fail<T>(&self) -> Result<T> {
        bail!(
            "{} is disabled; set {} in the config to enable it",
            self.feature,
            self.setting
        )
    }
}

#[async_trait]
impl Transcriber for Disabled {
    fn model(&self) -> &str {
        "disabled"
    }

    async fn transcribe(&self, _audio: &[u8], _file_name: &str) -> Result<Transcript> {
        self.fail()
    }
}

#[async_trait]
impl TextGenerator for Disabled {
    fn model(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _system: &str, _prompt: &str) -> Result<String> {
        self.fail()
    }
}
