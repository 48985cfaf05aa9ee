//! `meet doctor`: environment and configuration diagnostics.
//!
//! Prints the effective configuration (the API key only as set/unset),
//! then runs each check and reports it with a ✅ or ❌ banner. Failed
//! checks list their most likely causes.
//!
//! | Check | Runs when |
//! |-------|-----------|
//! | cache root writable | always |
//! | API key present | a hosted collaborator is enabled |
//! | OCR command runs | `ocr.engine != "disabled"` |
//! | API reachable (`GET /models`) | `--online` and a key is present |

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::process::Command;

use crate::api::ApiClient;
use crate::config::{Config, Secrets};

/// Outcome of one diagnostic check.
#[derive(Debug)]
pub struct Check {
    pub name: &'static str,
    pub outcome: std::result::Result<String, String>,
    /// Printed under a failed check.
    pub causes: &'static [&'static str],
}

impl Check {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }
}

const CACHE_CAUSES: &[&str] = &[
    "cache.root (or MEETEASE_CACHE_ROOT) points to a read-only location",
    "a file exists where the cache directory should be",
    "the disk is full",
];

const KEY_CAUSES: &[&str] = &[
    "the variable named by api.api_key_env is not exported",
    "the .env file is not in the working directory",
    "the key is wrapped in extra quotes or whitespace",
];

const OCR_CAUSES: &[&str] = &[
    "tesseract is not installed (apt install tesseract-ocr / brew install tesseract)",
    "ocr.command does not point to the binary",
    "the binary is not on PATH for this shell",
];

const API_CAUSES: &[&str] = &[
    "wrong or revoked API key",
    "api.base_url (or MEETEASE_API_BASE_URL) is wrong",
    "no network access or a proxy blocks the request",
];

/// Run every applicable check for `config`.
pub async fn run_checks(config: &Config, secrets: &Secrets, online: bool) -> Vec<Check> {
    let mut checks = vec![Check {
        name: "Cache root is writable",
        outcome: check_cache_root(&config.cache.root)
            .map_err(|e| format!("{e:#}")),
        causes: CACHE_CAUSES,
    }];

    let features = config.hosted_features();
    if !features.is_empty() {
        checks.push(Check {
            name: "API key is set",
            outcome: match secrets.api_key() {
                Some(_) => Ok(format!("{} (hidden)", config.api.api_key_env)),
                None => Err(format!(
                    "{} is not set; required by {}",
                    config.api.api_key_env,
                    features.join(", ")
                )),
            },
            causes: KEY_CAUSES,
        });
    }

    if config.ocr.is_enabled() {
        checks.push(Check {
            name: "OCR command runs",
            outcome: check_ocr(&config.ocr.command)
                .await
                .map_err(|e| format!("{e:#}")),
            causes: OCR_CAUSES,
        });
    }

    if online && secrets.api_key().is_some() {
        let outcome = match ApiClient::new(&config.api, secrets) {
            Ok(client) => client
                .get("models")
                .await
                .map(|_| format!("{} answered", client.base_url()))
                .map_err(|e| format!("{e:#}")),
            Err(e) => Err(format!("{e:#}")),
        };
        checks.push(Check {
            name: "API is reachable",
            outcome,
            causes: API_CAUSES,
        });
    }

    checks
}

fn check_cache_root(root: &Path) -> Result<String> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("cannot create {}", root.display()))?;
    let mut probe = tempfile::Builder::new()
        .prefix(".doctor-")
        .tempfile_in(root)
        .with_context(|| format!("cannot create files in {}", root.display()))?;
    probe
        .write_all(b"ok")
        .with_context(|| format!("cannot write to {}", root.display()))?;
    Ok(root.display().to_string())
}

async fn check_ocr(command: &str) -> Result<String> {
    let output = Command::new(command)
        .arg("--version")
        .output()
        .await
        .with_context(|| format!("failed to run '{command} --version'"))?;
    if !output.status.success() {
        bail!("'{command} --version' exited with {}", output.status);
    }
    // tesseract prints its version on stdout or stderr depending on release.
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    Ok(String::from_utf8_lossy(&text)
        .lines()
        .next()
        .unwrap_or(command)
        .trim()
        .to_string())
}

/// Print the configuration and check results. Returns `true` when every
/// check passed.
pub async fn run_doctor(config: &Config, secrets: &Secrets, online: bool) -> bool {
    print_config(config, secrets);

    println!("🧠 Running checks...\n");
    let checks = run_checks(config, secrets, online).await;
    for check in &checks {
        match &check.outcome {
            Ok(detail) => println!("✅ {}: {}", check.name, detail),
            Err(reason) => {
                println!("❌ {}:", check.name);
                println!("   {}", reason);
                println!("\n💡 Possible causes:");
                for (i, cause) in check.causes.iter().enumerate() {
                    println!("  {}. {}", i + 1, cause);
                }
                println!();
            }
        }
    }

    let failed = checks.iter().filter(|c| !c.passed()).count();
    println!();
    if failed == 0 {
        println!("✅ All good! MeetEase is ready.");
        if !online {
            println!("   (run `meet doctor --online` to also test the API connection)");
        }
    } else {
        println!(
            "❌ {} check{} failed. Fix the config file or .env, then run `meet doctor` again.",
            failed,
            if failed == 1 { "" } else { "s" }
        );
    }
    failed == 0
}

fn print_config(config: &Config, secrets: &Secrets) {
    let enabled = |on: bool, detail: &str| {
        if on {
            detail.to_string()
        } else {
            "disabled".to_string()
        }
    };
    println!("🔍 Effective configuration:");
    println!("  cache.root           = {}", config.cache.root.display());
    println!("  api.base_url         = {}", config.api.base_url);
    println!(
        "  {:<20} = {}",
        config.api.api_key_env,
        if secrets.api_key().is_some() {
            "(hidden)"
        } else {
            "(not set)"
        }
    );
    println!(
        "  ocr                  = {}",
        enabled(
            config.ocr.is_enabled(),
            &format!("{} -l {}", config.ocr.command, config.ocr.language)
        )
    );
    println!(
        "  transcription        = {}",
        enabled(config.transcription.is_enabled(), &config.transcription.model)
    );
    println!(
        "  embedding            = {}",
        enabled(config.embedding.is_enabled(), &config.embedding.model)
    );
    println!(
        "  generation           = {}",
        enabled(config.generation.is_enabled(), &config.generation.model)
    );
    println!("  chunking.max_tokens  = {}\n", config.chunking.max_tokens);
}
