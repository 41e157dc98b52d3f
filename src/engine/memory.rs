use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::RwLock;
use crate::{Entries, Keyed, Persister, Result};

/// A [`Persister`] that keeps the last persisted snapshot in memory.
///
/// Handy for tests and for sharing state between vaults in one process.
pub struct MemoryPersister<V> {
    data: RwLock<Entries<V>>,
    persist_count: RwLock<usize>,
}

impl<V: Keyed> MemoryPersister<V> {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Entries::new()),
            persist_count: RwLock::new(0),
        }
    }

    /// Starts out as if `items` had already been persisted.
    pub fn with_entries<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Arc<V>>,
    {
        let data = items
            .into_iter()
            .map(|item| {
                let item: Arc<V> = item.into();
                (item.key().to_string(), item)
            })
            .collect();
        Self {
            data: RwLock::new(data),
            persist_count: RwLock::new(0),
        }
    }

    /// The most recently persisted snapshot.
    pub async fn contents(&self) -> Entries<V> {
        self.data.read().await.clone()
    }

    /// How many times [`Persister::persist`] has been called.
    pub async fn persist_count(&self) -> usize {
        *self.persist_count.read().await
    }
}

impl<V: Keyed> Default for MemoryPersister<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V: Keyed> Persister<V> for MemoryPersister<V> {
    async fn persist(&self, snapshot: &Entries<V>) -> Result<()> {
        *self.data.write().await = snapshot.clone();
        *self.persist_count.write().await += 1;
        Ok(())
    }

    async fn load(&self) -> Result<Entries<V>> {
        Ok(self.data.read().await.clone())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
