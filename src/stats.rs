//! Cache overview.
//!
//! `meet sessions` lists every session directory under the cache root with
//! its artifact count, size and last write; `meet show <session>` prints one
//! session's manifest and artifacts. Both read the store directly and need
//! no API key.

use std::time::SystemTime;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::meeting::read_manifest;
use crate::session::SessionId;
use crate::store::{ArtifactKind, ArtifactStore};

/// Print every session under the cache root.
pub fn run_sessions(config: &Config) -> Result<()> {
    let store = ArtifactStore::new(config.cache.root.clone());
    let sessions = store.list_sessions()?;

    println!("MeetEase — Sessions");
    println!("===================");
    println!();
    println!("  Cache root:  {}", store.root().display());
    println!("  Sessions:    {}", sessions.len());
    println!(
        "  Size:        {}",
        format_bytes(sessions.iter().map(|s| s.total_bytes).sum())
    );

    if !sessions.is_empty() {
        println!();
        println!(
            "  {:<44} {:>9} {:>10}   {}",
            "SESSION", "ARTIFACTS", "SIZE", "LAST WRITE"
        );
        println!("  {}", "-".repeat(80));
        for s in &sessions {
            println!(
                "  {:<44} {:>9} {:>10}   {}",
                s.id.as_str(),
                s.artifact_count,
                format_bytes(s.total_bytes),
                format_modified(s.last_modified)
            );
        }
    }

    println!();
    Ok(())
}

/// Print one session's manifest and artifact list.
pub fn run_show(config: &Config, session: &SessionId) -> Result<()> {
    let store = ArtifactStore::new(config.cache.root.clone());
    let manifest = read_manifest(&store, session)?
        .with_context(|| format!("no session '{}' under {}", session, store.root().display()))?;
    let artifacts = store.list_artifacts(session)?;

    println!("Session {}", session);
    println!();
    println!("  Title:       {}", manifest.title);
    println!("  Date:        {}", manifest.date);
    println!("  Created:     {}", manifest.created_at.format("%Y-%m-%d %H:%M UTC"));
    println!("  Directory:   {}", store.session_dir(session).display());

    if !manifest.sources.is_empty() {
        println!();
        println!("  Sources:");
        for source in &manifest.sources {
            println!(
                "    {:<8} {:<32} {}",
                format!("{:?}", source.kind).to_lowercase(),
                source.file_name,
                source.artifact_key
            );
        }
    }

    println!();
    println!("  {:<60} {:>6} {:>10}", "ARTIFACT", "KIND", "SIZE");
    println!("  {}", "-".repeat(80));
    for a in &artifacts {
        let kind = match a.kind {
            ArtifactKind::Text => "text",
            ArtifactKind::Record => "record",
        };
        println!(
            "  {:<60} {:>6} {:>10}",
            a.key,
            kind,
            format_bytes(a.size_bytes)
        );
    }
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_modified(modified: Option<SystemTime>) -> String {
    modified
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| format_ts_relative(d.as_secs() as i64, chrono::Utc::now().timestamp()))
        .unwrap_or_else(|| "never".to_string())
}

/// Format a Unix timestamp relative to `now` (e.g. "3 hours ago").
fn format_ts_relative(ts: i64, now: i64) -> String {
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
