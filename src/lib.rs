//! Objvault is an in-process, concurrency-safe object vault.
//!
//! Values live in memory, keyed by a stable identifier they report themselves,
//! and can be mirrored on demand to any number of pluggable persistence backends.
//! Persisting fans out to every backend in parallel and collects every failure;
//! loading merges the backends' data serially, in registration order.
//!
//! ## Core Components
//! - [`engine`]: The [`Vault`] itself plus two ready-made backends.
//! - [`token`]: Random tokens for minting keys.

pub mod engine;
pub mod token;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use engine::{JsonFilePersister, MemoryPersister, Vault};

/// Errors returned by the vault and its backends.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested key does not exist in the vault.
    #[error("key not found")]
    KeyNotFound,
    /// A single backend failed while persisting or loading.
    #[error("backend {backend} failed: {source}")]
    Backend {
        backend: String,
        #[source]
        source: Box<Error>,
    },
    /// One or more backends failed during a single persist call.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
    /// An I/O error occurred inside a backend.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A specialized Result type for vault operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure from one [`Vault::persist`] call, in the order the backends finished.
///
/// Receiving this does not mean persistence failed entirely, only that at least
/// one backend did. Backends missing from the list succeeded.
#[derive(Debug, Default)]
pub struct PersistenceError {
    errors: Vec<Error>,
}

impl PersistenceError {
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }

    pub(crate) fn push(&mut self, err: Error) {
        self.errors.push(err);
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "one or more persistence errors occurred:")?;
        for err in &self.errors {
            writeln!(f, "\t{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for PersistenceError {}

/// Anything that can be stored in a [`Vault`].
pub trait Keyed: Send + Sync {
    /// Must return the same key for the same object every time.
    /// A key that drifts leaves stale copies behind in the vault.
    fn key(&self) -> &str;
}

/// The vault's entries, keyed by [`Keyed::key`].
pub type Entries<V> = HashMap<String, Arc<V>>;

/// Long term storage for a [`Vault`].
#[async_trait]
pub trait Persister<V>: Send + Sync {
    /// Stores a snapshot of the vault.
    ///
    /// Called at most once per [`Vault::persist`], possibly while other
    /// backends persist the same snapshot.
    async fn persist(&self, snapshot: &Entries<V>) -> Result<()>;

    /// Returns the entire stored dataset. Generally only called at startup.
    async fn load(&self) -> Result<Entries<V>>;

    /// Name used in logs and in [`Error::Backend`].
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
