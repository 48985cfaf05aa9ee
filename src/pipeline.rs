//! Memoized derivation.
//!
//! [`Pipeline::get_or_compute`] wraps any expensive operation (an OCR pass,
//! a transcription, an embedding batch, an LLM call) so that it runs at most
//! once per `(session, artifact name, settings)`:
//!
//! 1. `key = name + ":" + digest_settings(settings)`
//! 2. artifact present under `key` → return it (hit)
//! 3. otherwise run the computation, persist the result under `key`, return it (miss)
//!
//! Steps 2–3 run under an async mutex scoped to the key, so two callers
//! racing on the same key in one process see exactly one computation; the
//! second waits and then reads the first one's result. Different keys never
//! block each other.
//!
//! The pipeline does not know what the computation is. It does not retry
//! and does not expire anything: changing a setting changes the key, which
//! is the only invalidation, apart from [`Freshness::Force`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{BoxError, Error, Result};
use crate::hashing::digest_settings;
use crate::session::SessionId;
use crate::store::{ArtifactKind, ArtifactStore, Record};

/// Whether a cached artifact may satisfy the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Freshness {
    /// Return the cached artifact when present.
    #[default]
    Reuse,
    /// Recompute and overwrite, even if cached.
    Force,
}

impl Freshness {
    pub fn from_force_flag(force: bool) -> Self {
        if force {
            Freshness::Force
        } else {
            Freshness::Reuse
        }
    }
}

/// Output of a derivation plus where it came from.
#[derive(Debug, Clone)]
pub struct Derived<T> {
    pub value: T,
    /// Full artifact key (`name:fingerprint`).
    pub key: String,
    /// `true` if served from the cache without running the computation.
    pub cached: bool,
}

impl<T> Derived<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Derived<U> {
        Derived {
            value: f(self.value),
            key: self.key,
            cached: self.cached,
        }
    }
}

/// A value the store knows how to persist.
pub trait Artifact: Sized {
    const KIND: ArtifactKind;

    fn load(store: &ArtifactStore, session: &SessionId, key: &str) -> Result<Option<Self>>;

    fn save(&self, store: &ArtifactStore, session: &SessionId, key: &str) -> Result<()>;
}

impl Artifact for String {
    const KIND: ArtifactKind = ArtifactKind::Text;

    fn load(store: &ArtifactStore, session: &SessionId, key: &str) -> Result<Option<Self>> {
        store.load_text(session, key)
    }

    fn save(&self, store: &ArtifactStore, session: &SessionId, key: &str) -> Result<()> {
        store.write_text(session, key, self).map(|_| ())
    }
}

impl Artifact for Record {
    const KIND: ArtifactKind = ArtifactKind::Record;

    fn load(store: &ArtifactStore, session: &SessionId, key: &str) -> Result<Option<Self>> {
        store.load_record(session, key)
    }

    fn save(&self, store: &ArtifactStore, session: &SessionId, key: &str) -> Result<()> {
        store.write_record(session, key, self).map(|_| ())
    }
}

/// Cache key for an artifact derived with `settings`.
pub fn artifact_key<S: Serialize + ?Sized>(name: &str, settings: &S) -> Result<String> {
    if name.contains(':') {
        return Err(Error::config(format!(
            "artifact name '{name}' must not contain ':'"
        )));
    }
    Ok(format!("{name}:{}", digest_settings(settings)?))
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

pub struct Pipeline {
    store: ArtifactStore,
    locks: Mutex<HashMap<String, KeyLock>>,
}

impl Pipeline {
    pub fn new(store: ArtifactStore) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Return the artifact for `(session, name, settings)`, computing and
    /// persisting it on a miss.
    ///
    /// # Errors
    ///
    /// - [`Error::ConfigurationError`] if `settings` cannot be fingerprinted
    ///   or `name` is not a valid artifact name; `compute` is not called.
    /// - [`Error::CacheCorruption`] if a cached artifact exists but cannot be
    ///   read back. It is not treated as a miss.
    /// - [`Error::DerivationFailed`] if `compute` fails. Nothing is persisted.
    pub async fn get_or_compute<A, S, F, Fut, E>(
        &self,
        session: &SessionId,
        name: &str,
        settings: &S,
        freshness: Freshness,
        compute: F,
    ) -> Result<Derived<A>>
    where
        A: Artifact,
        S: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<A, E>>,
        E: Into<BoxError>,
    {
        let key = artifact_key(name, settings)?;
        let lease = self.lock_for(session, &key);
        let _guard = lease.lock.lock().await;

        if freshness == Freshness::Reuse {
            if let Some(value) = A::load(&self.store, session, &key)? {
                debug!(session = %session, key = %key, "cache hit");
                return Ok(Derived {
                    value,
                    key,
                    cached: true,
                });
            }
        }

        info!(session = %session, key = %key, ?freshness, "computing artifact");
        let value = compute().await.map_err(|e| Error::DerivationFailed {
            artifact: name.to_string(),
            source: e.into(),
        })?;
        value.save(&self.store, session, &key)?;
        debug!(session = %session, key = %key, "artifact stored");

        Ok(Derived {
            value,
            key,
            cached: false,
        })
    }

    /// [`get_or_compute`](Self::get_or_compute) for any serde type stored as
    /// a record. `T` must serialize to a JSON object.
    ///
    /// A cached record that no longer decodes into `T` is reported as
    /// [`Error::CacheCorruption`].
    pub async fn get_or_compute_typed<T, S, F, Fut, E>(
        &self,
        session: &SessionId,
        name: &str,
        settings: &S,
        freshness: Freshness,
        compute: F,
    ) -> Result<Derived<T>>
    where
        T: Serialize + DeserializeOwned,
        S: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        let derived: Derived<Record> = self
            .get_or_compute(session, name, settings, freshness, || async move {
                let value = compute().await.map_err(Into::<BoxError>::into)?;
                to_record(&value)
            })
            .await?;

        let path = self
            .store
            .artifact_path(session, &derived.key, ArtifactKind::Record)?;
        let Derived { value, key, cached } = derived;
        let typed = serde_json::from_value(Value::Object(value))
            .map_err(|e| Error::corrupt(&path, format!("record does not match expected shape: {e}")))?;
        Ok(Derived {
            value: typed,
            key,
            cached,
        })
    }

    fn lock_for(&self, session: &SessionId, key: &str) -> KeyLease<'_> {
        let id = format!("{session}/{key}");
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = locks.entry(id.clone()).or_default().clone();
        KeyLease {
            locks: &self.locks,
            id,
            lock,
        }
    }
}

/// A handle on one key's lock. The map entry is removed when the last
/// handle is dropped.
struct KeyLease<'a> {
    locks: &'a Mutex<HashMap<String, KeyLock>>,
    id: String,
    lock: KeyLock,
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.id);
        }
    }
}

fn to_record<T: Serialize>(value: &T) -> std::result::Result<Record, BoxError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(format!("expected a JSON object, computation produced {other}").into()),
    }
}
