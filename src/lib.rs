//! # MeetEase
//!
//! Meeting preparation and follow-up over a content-addressed artifact cache.
//!
//! MeetEase ingests meeting documents and recordings, extracts their text
//! (document parsing, OCR, speech-to-text), indexes it for retrieval, and
//! asks a hosted language model for agendas and summaries. Every one of
//! those steps is expensive, so every one runs through the same memoized
//! pipeline: the result is stored under a key derived from the input bytes
//! and the settings that produced it, and reused until either changes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌──────────────────────┐
//! │  meet (CLI)  │──▶│ MeetingService │──▶│ Pipeline             │
//! └──────────────┘   └───────┬────────┘   │  get_or_compute      │
//!                            │            └──────────┬───────────┘
//!                            ▼ miss                  ▼
//!              ┌──────────────────────────┐   ┌──────────────┐
//!              │ Collaborators            │   │ ArtifactStore│
//!              │ extract / transcribe /   │   │ <root>/<id>/ │
//!              │ embed / generate         │   └──────────────┘
//!              └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! meet ingest --title "Q3 Planning" --date 2024-07-01 agenda.pdf call.m4a
//! meet search q3-planning-2024-07-01-9f86d081 "hiring budget"
//! meet summary q3-planning-2024-07-01-9f86d081
//! meet doctor --online
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`hashing`] | Content digests and settings fingerprints |
//! | [`session`] | Session ids from title, date and content |
//! | [`store`] | Per-session artifact files |
//! | [`pipeline`] | Memoized derivation |
//! | [`error`] | Error kinds and remediation hints |
//! | [`config`] | TOML configuration and secrets |
//! | [`models`] | Transcript, index and manifest types |
//! | [`chunk`] | Text chunking |
//! | [`extract`] | Document text extraction and OCR |
//! | [`api`] | Hosted API client |
//! | [`transcribe`] | Speech-to-text |
//! | [`embedding`] | Embeddings and cosine similarity |
//! | [`generate`] | Text generation |
//! | [`traits`] | Collaborator traits |
//! | [`meeting`] | Ingest, index, search, agenda, summary |
//! | [`stats`] | Session listings |
//! | [`doctor`] | Environment diagnostics |

pub mod api;
pub mod chunk;
pub mod config;
pub mod doctor;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod hashing;
pub mod meeting;
pub mod models;
pub mod pipeline;
pub mod session;
pub mod stats;
pub mod store;
pub mod traits;
pub mod transcribe;

pub use error::{Error, Result};
