use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use crate::{Entries, Error, Keyed, Persister, Result};

/// Stores the vault as a single JSON object of `key -> value`.
///
/// Writes use an atomic "write-then-rename" strategy so a crash mid-write
/// never leaves a truncated file behind. Every write gets its own temporary
/// file next to the target, so overlapping writes never share one.
pub struct JsonFilePersister {
    path: PathBuf,
    dir: PathBuf,
}

impl JsonFilePersister {
    /// Persists to `path`, creating its parent directory if needed.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { path, dir })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<V> Persister<V> for JsonFilePersister
where
    V: Keyed + Serialize + DeserializeOwned + 'static,
{
    async fn persist(&self, snapshot: &Entries<V>) -> Result<()> {
        let bytes = {
            // Sorted keys keep the file diffable between runs.
            let ordered: BTreeMap<&str, &V> = snapshot
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_ref()))
                .collect();
            serde_json::to_vec_pretty(&ordered)?
        };

        let file_path = self.path.clone();
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut temp = NamedTempFile::new_in(&dir)?;
            temp.write_all(&bytes)?;
            temp.persist(&file_path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;

        debug!("Wrote {} entries to {:?}", snapshot.len(), self.path);
        Ok(())
    }

    async fn load(&self) -> Result<Entries<V>> {
        let path = self.path.clone();
        let content = tokio::task::spawn_blocking(move || fs::read(path))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        let content = match content {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("No vault file at {:?}, starting empty", self.path);
                return Ok(Entries::new());
            }
            Err(e) => return Err(e.into()),
        };

        let stored: HashMap<String, V> = serde_json::from_slice(&content)?;
        Ok(stored
            .into_iter()
            .map(|(key, value)| (key, Arc::new(value)))
            .collect())
    }

    fn name(&self) -> &str {
        "json-file"
    }
}
