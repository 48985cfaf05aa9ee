//! # MeetEase CLI (`meet`)
//!
//! ## Usage
//!
//! ```bash
//! meet --config ./meetease.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `meet session-id` | Print the session id for a title, date and file |
//! | `meet ingest` | Extract or transcribe files into a session |
//! | `meet index <session>` | Build the retrieval index |
//! | `meet search <session> "<query>"` | Search a session's materials |
//! | `meet agenda <session>` | Generate an agenda |
//! | `meet summary <session>` | Generate a summary |
//! | `meet sessions` | List sessions in the cache |
//! | `meet show <session>` | Show a session's sources and artifacts |
//! | `meet doctor` | Check configuration, API key and OCR |
//!
//! Results go to stdout, logs to stderr (`-v`, `-vv` or `RUST_LOG`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use meetease::config::{load_config, Config, Secrets};
use meetease::hashing::digest_bytes;
use meetease::meeting::{Ingested, MeetingService};
use meetease::pipeline::{Derived, Freshness};
use meetease::session::{resolve_session_id, SessionId};
use meetease::{doctor, stats};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG: &str = "meetease.toml";

/// MeetEase: meeting preparation and follow-up with a local artifact cache.
#[derive(Parser)]
#[command(
    name = "meet",
    version,
    about = "MeetEase — ingest meeting materials, then search, plan and summarize them",
    long_about = "MeetEase extracts text from documents (PDF, DOCX, PPTX, text, images via OCR) \
    and recordings (hosted speech-to-text), caches every derived artifact per session, and \
    generates agendas and summaries with a hosted language model."
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults to `./meetease.toml` if it exists.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug). `RUST_LOG` wins if set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the session id for a meeting without writing anything.
    SessionId {
        #[arg(long)]
        title: String,

        /// Meeting date (YYYY-MM-DD).
        #[arg(long)]
        date: NaiveDate,

        /// File whose content identifies the meeting.
        file: PathBuf,
    },

    /// Ingest files into a session.
    ///
    /// Audio is transcribed, everything else is extracted. Without
    /// `--session`, the session is derived from `--title`, `--date` and the
    /// first file, and created if needed.
    Ingest {
        #[arg(long, required_unless_present = "session")]
        title: Option<String>,

        /// Meeting date (YYYY-MM-DD).
        #[arg(long, required_unless_present = "session")]
        date: Option<NaiveDate>,

        /// Add to an existing session instead.
        #[arg(long, conflicts_with_all = ["title", "date"])]
        session: Option<String>,

        /// Recompute even if cached.
        #[arg(long)]
        force: bool,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Build (or reuse) the retrieval index for a session.
    Index {
        session: String,

        #[arg(long)]
        force: bool,
    },

    /// Search a session's materials.
    Search {
        session: String,

        query: String,

        #[arg(long, default_value_t = 5)]
        limit: usize,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate an agenda for a session.
    Agenda {
        session: String,

        #[arg(long)]
        force: bool,
    },

    /// Generate a summary of a session.
    Summary {
        session: String,

        #[arg(long)]
        force: bool,
    },

    /// List sessions in the cache root.
    Sessions,

    /// Show a session's manifest and artifacts.
    Show { session: String },

    /// Check configuration, API key, OCR engine and (optionally) the API.
    Doctor {
        /// Also call the hosted API.
        #[arg(long)]
        online: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Failure banner: the error, its causes, and a suggested fix.
fn report(err: &anyhow::Error) {
    eprintln!("❌ {err}");
    for cause in err.chain().skip(1) {
        eprintln!("   caused by: {cause}");
    }
    if let Some(kind) = err.chain().find_map(|e| e.downcast_ref::<meetease::Error>()) {
        eprintln!("\n💡 {}", kind.remediation());
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.clone().or_else(|| {
        let p = PathBuf::from(DEFAULT_CONFIG);
        p.exists().then_some(p)
    });
    // session-id is pure and must work without a valid config.
    let load = || load_config(config_path.as_deref());

    match cli.command {
        Commands::SessionId { title, date, file } => {
            let bytes = read_file(&file)?;
            println!("{}", resolve_session_id(&title, date, &digest_bytes(&bytes)));
        }
        Commands::Sessions => stats::run_sessions(&load()?)?,
        Commands::Show { session } => stats::run_show(&load()?, &SessionId::parse(&session)?)?,
        Commands::Doctor { online } => {
            let cfg = load()?;
            let secrets = Secrets::lookup(&cfg, |name| std::env::var(name).ok());
            if !doctor::run_doctor(&cfg, &secrets, online).await {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Ingest {
            title,
            date,
            session,
            force,
            files,
        } => {
            let service = build_service(load()?)?;
            let freshness = Freshness::from_force_flag(force);
            let session = match session {
                Some(id) => {
                    let id = SessionId::parse(&id)?;
                    service.load_manifest(&id)?;
                    id
                }
                None => {
                    let (Some(title), Some(date)) = (title, date) else {
                        bail!("--title and --date are required without --session");
                    };
                    let first = files.first().context("no files given")?;
                    let primary = read_file(first)?;
                    let info = service.open_session(&title, date, &primary).await?;
                    if info.created {
                        eprintln!("Created session {}", info.id);
                    }
                    info.id
                }
            };

            for file in &files {
                let bytes = read_file(file)?;
                let name = file_name(file);
                let ingested = service
                    .ingest_file(&session, &name, &bytes, freshness)
                    .await
                    .with_context(|| format!("failed to ingest {}", file.display()))?;
                let kind = match ingested {
                    Ingested::Document(_) => "document",
                    Ingested::Audio(_) => "transcript",
                };
                println!(
                    "✅ {name} → {kind} {} ({} chars, {})",
                    ingested.key(),
                    ingested.text().chars().count(),
                    origin(ingested.cached())
                );
            }
            println!("{session}");
        }
        Commands::Index { session, force } => {
            let session = SessionId::parse(&session)?;
            let service = build_service(load()?)?;
            let index = service
                .build_index(&session, Freshness::from_force_flag(force))
                .await?;
            println!(
                "✅ index {}: {} chunks, {} ({})",
                index.key,
                index.value.chunks.len(),
                match &index.value.embedding_model {
                    Some(model) if index.value.has_vectors() => format!("embedded with {model}"),
                    _ => "keyword only".to_string(),
                },
                origin(index.cached)
            );
        }
        Commands::Search {
            session,
            query,
            limit,
            json,
        } => {
            let session = SessionId::parse(&session)?;
            let service = build_service(load()?)?;
            let hits = service.search(&session, &query, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("No results.");
            } else {
                for (i, hit) in hits.iter().enumerate() {
                    println!(
                        "{}. [{:.3}] {} #{}",
                        i + 1,
                        hit.score,
                        hit.source,
                        hit.chunk_index
                    );
                    println!("   {}", hit.snippet);
                }
            }
        }
        Commands::Agenda { session, force } => {
            let session = SessionId::parse(&session)?;
            let service = build_service(load()?)?;
            let agenda = service
                .generate_agenda(&session, Freshness::from_force_flag(force))
                .await?;
            print_generated(&agenda);
        }
        Commands::Summary { session, force } => {
            let session = SessionId::parse(&session)?;
            let service = build_service(load()?)?;
            let summary = service
                .generate_summary(&session, Freshness::from_force_flag(force))
                .await?;
            print_generated(&summary);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn build_service(cfg: Config) -> Result<MeetingService> {
    let secrets = Secrets::from_env(&cfg)?;
    MeetingService::from_config(cfg, &secrets)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn origin(cached: bool) -> &'static str {
    if cached {
        "cached"
    } else {
        "computed"
    }
}

fn print_generated(derived: &Derived<String>) {
    eprintln!("{} ({})", derived.key, origin(derived.cached));
    println!("{}", derived.value);
}
