//! Session identity.
//!
//! A session is one meeting's working set of cached artifacts. Its id is
//! the only address of its cache directory, so it must be a pure function
//! of (title, date, content hash):
//!
//! ```text
//! slugify(title) - YYYY-MM-DD - content_hash[..8]
//! "Q3 Planning!!", 2024-07-01, 9f86d081... → q3-planning-2024-07-01-9f86d081
//! ```

use std::fmt;

use chrono::NaiveDate;

use crate::error::{Error, Result};
use crate::hashing::ContentHash;

/// Slug used when a title has no word characters at all.
pub const DEFAULT_SLUG: &str = "session";

/// A validated session identifier, safe to use as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Validate an id supplied from outside (CLI flag, directory listing).
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::config("session id must not be empty"));
        }
        if let Some(bad) = raw.chars().find(|c| !is_word_char(*c) && *c != '-') {
            return Err(Error::config(format!(
                "session id '{raw}' contains invalid character '{bad}'"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Lowercase, collapse non-word runs into `-`, strip edge hyphens.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;
    for c in title.trim().chars().flat_map(char::to_lowercase) {
        if is_word_char(c) {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    if slug.is_empty() {
        DEFAULT_SLUG.to_string()
    } else {
        slug
    }
}

pub fn resolve_session_id(
    title: &str,
    meeting_date: NaiveDate,
    content_hash: &ContentHash,
) -> SessionId {
    SessionId(format!(
        "{}-{}-{}",
        slugify(title),
        meeting_date.format("%Y-%m-%d"),
        content_hash.short()
    ))
}
