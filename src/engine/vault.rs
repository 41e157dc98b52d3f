use std::sync::Arc;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info};
use tokio::sync::RwLock;
use crate::{Entries, Error, Keyed, PersistenceError, Persister, Result};

/// An in-memory object store mirrored to zero or more [`Persister`]s.
///
/// Writes (`put`, `load`) take the entry lock exclusively, reads share it.
/// Backends are only touched when [`Vault::persist`] or [`Vault::load`] is called.
pub struct Vault<V> {
    entries: RwLock<Entries<V>>,
    persisters: Vec<Arc<dyn Persister<V>>>,
}

impl<V: Keyed + 'static> Vault<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries::new()),
            persisters: Vec::new(),
        }
    }

    /// Adds a backend. Registration order decides the merge order of [`Vault::load`].
    pub fn register(&mut self, persister: Arc<dyn Persister<V>>) {
        debug!("Registered persister {}", persister.name());
        self.persisters.push(persister);
    }

    pub fn backend_count(&self) -> usize {
        self.persisters.len()
    }

    /// Writes one or more items under their own keys, replacing existing entries.
    pub async fn put<I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Arc<V>>,
    {
        let mut entries = self.entries.write().await;
        for item in items {
            let item: Arc<V> = item.into();
            entries.insert(item.key().to_string(), item);
        }
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// Returns the value last stored under `key`.
    pub async fn get(&self, key: &str) -> Result<Arc<V>> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or(Error::KeyNotFound)
    }

    /// Returns every entry whose value satisfies `predicate`.
    ///
    /// The predicate sees each value once, under a shared lock, so it must not
    /// block on the vault itself.
    pub async fn filter<F>(&self, mut predicate: F) -> Entries<V>
    where
        F: FnMut(&V) -> bool,
    {
        let entries = self.entries.read().await;
        let mut found = Entries::new();
        for (key, value) in entries.iter() {
            if predicate(value) {
                found.insert(key.clone(), value.clone());
            }
        }
        found
    }

    pub async fn size(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Hands a snapshot of the vault to every backend.
    ///
    /// All backends run in parallel and each is attempted exactly once; this call
    /// returns only after every one of them has finished. Failures are collected
    /// in completion order into [`Error::Persistence`].
    pub async fn persist(&self) -> Result<()> {
        // Values are shared, only the map is copied.
        let snapshot = Arc::new(self.entries.read().await.clone());

        let mut pending: FuturesUnordered<_> = self
            .persisters
            .iter()
            .map(|persister| {
                let persister = persister.clone();
                let snapshot = snapshot.clone();
                let name = persister.name().to_string();
                let task = tokio::spawn(async move {
                    persister.persist(&snapshot).await
                });
                async move { (name, task.await) }
            })
            .collect();

        let mut failures = PersistenceError::default();
        while let Some((name, outcome)) = pending.next().await {
            let err = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(join_err) => Error::Internal(format!("persist task aborted: {}", join_err)),
            };
            error!("Persister {} failed: {}", name, err);
            failures.push(Error::Backend {
                backend: name,
                source: Box::new(err),
            });
        }

        if failures.is_empty() {
            debug!("Persisted {} entries to {} backends", snapshot.len(), self.persisters.len());
            Ok(())
        } else {
            Err(failures.into())
        }
    }

    /// Merges every backend's stored data into the vault, serially and in
    /// registration order, later backends overwriting earlier ones.
    ///
    /// Stops at the first failing backend. Entries merged before the failure stay.
    pub async fn load(&self) -> Result<()> {
        let mut entries = self.entries.write().await;

        for persister in &self.persisters {
            let values = persister.load().await.map_err(|e| {
                error!("Persister {} failed to load: {}", persister.name(), e);
                Error::Backend {
                    backend: persister.name().to_string(),
                    source: Box::new(e),
                }
            })?;
            debug!("Merging {} entries from {}", values.len(), persister.name());
            entries.extend(values);
        }

        info!("Vault loaded. {} entries from {} backends.", entries.len(), self.persisters.len());
        Ok(())
    }
}

impl<V: Keyed + 'static> Default for Vault<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryPersister;
    use crate::token;
    use async_trait::async_trait;

    #[derive(Debug, PartialEq)]
    struct Thing {
        key: String,
        name: String,
        rank: i32,
    }

    impl Thing {
        fn new(name: &str, rank: i32) -> Self {
            Self { key: token::token(), name: name.to_string(), rank }
        }

        fn with_key(key: &str, name: &str) -> Self {
            Self { key: key.to_string(), name: name.to_string(), rank: 0 }
        }
    }

    impl Keyed for Thing {
        fn key(&self) -> &str {
            &self.key
        }
    }

    struct Broken;

    #[async_trait]
    impl Persister<Thing> for Broken {
        async fn persist(&self, _snapshot: &Entries<Thing>) -> Result<()> {
            Err(Error::Internal("disk on fire".to_string()))
        }

        async fn load(&self) -> Result<Entries<Thing>> {
            Err(Error::Internal("disk on fire".to_string()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    struct Panicky;

    #[async_trait]
    impl Persister<Thing> for Panicky {
        async fn persist(&self, _snapshot: &Entries<Thing>) -> Result<()> {
            panic!("backend blew up");
        }

        async fn load(&self) -> Result<Entries<Thing>> {
            Ok(Entries::new())
        }
    }

    /// Waits before looking at the snapshot, recording the size it saw.
    struct Slow {
        seen: RwLock<Option<usize>>,
    }

    #[async_trait]
    impl Persister<Thing> for Slow {
        async fn persist(&self, snapshot: &Entries<Thing>) -> Result<()> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            *self.seen.write().await = Some(snapshot.len());
            Ok(())
        }

        async fn load(&self) -> Result<Entries<Thing>> {
            Ok(Entries::new())
        }
    }

    #[tokio::test]
    async fn test_vault_crud() {
        let vault: Vault<Thing> = Vault::new();
        let thing = Arc::new(Thing::new("Peter", 10));
        vault.put([thing.clone()]).await.unwrap();

        let got = vault.get(thing.key()).await.unwrap();
        assert!(Arc::ptr_eq(&got, &thing));
        assert!(vault.exists(thing.key()).await);

        assert!(matches!(vault.get("not_a_key").await, Err(Error::KeyNotFound)));
        assert!(!vault.exists("not_a_key").await);
    }

    #[tokio::test]
    async fn test_put_overwrites_same_key() {
        let vault: Vault<Thing> = Vault::new();
        vault.put([Thing::with_key("a", "first")]).await.unwrap();
        vault.put([Thing::with_key("a", "second")]).await.unwrap();

        assert_eq!(vault.size().await, 1);
        assert_eq!(vault.get("a").await.unwrap().name, "second");
    }

    #[tokio::test]
    async fn test_last_write_wins_within_one_put() {
        let vault: Vault<Thing> = Vault::new();
        vault
            .put([Thing::with_key("a", "first"), Thing::with_key("a", "second")])
            .await
            .unwrap();
        assert_eq!(vault.get("a").await.unwrap().name, "second");
    }

    #[tokio::test]
    async fn test_vault_filtering() {
        let vault: Vault<Thing> = Vault::new();
        vault
            .put([
                Thing::new("Peter", 10),
                Thing::new("Piper", 11),
                Thing::new("Pickle", 19),
                Thing::new("Potato", 101),
                Thing::new("Pencil", 98),
                Thing::new("Porch", 645),
                Thing::new("Patio", 3),
                Thing::new("Keyboard", 88),
            ])
            .await
            .unwrap();

        let found = vault.filter(|t| t.name == "Peter").await;
        assert_eq!(found.len(), 1);
        for (key, item) in &found {
            assert_eq!(item.name, "Peter");
            assert_eq!(item.key(), key);
        }

        let high = vault.filter(|t| t.rank > 90).await;
        assert_eq!(high.len(), 3);
        assert_eq!(vault.size().await, 8);
    }

    #[tokio::test]
    async fn test_vault_size() {
        let vault: Vault<Thing> = Vault::new();
        assert_eq!(vault.size().await, 0);
        assert!(vault.is_empty().await);

        vault.put([Thing::new("Peter Parker", 0)]).await.unwrap();
        assert_eq!(vault.size().await, 1);

        vault
            .put([Thing::new("Tony Stark", 0), Thing::new("Frank Castle", 0)])
            .await
            .unwrap();
        assert_eq!(vault.size().await, 3);
        assert_eq!(vault.keys().await.len(), 3);
    }

    #[tokio::test]
    async fn test_persist_without_backends() {
        let vault: Vault<Thing> = Vault::new();
        vault.put([Thing::new("alone", 1)]).await.unwrap();
        vault.persist().await.unwrap();
        vault.load().await.unwrap();
        assert_eq!(vault.size().await, 1);
    }

    #[tokio::test]
    async fn test_persist_collects_every_failure() {
        let mut vault: Vault<Thing> = Vault::new();
        let good = Arc::new(MemoryPersister::<Thing>::new());
        vault.register(Arc::new(Broken));
        vault.register(good.clone());
        vault.register(Arc::new(Broken));
        vault.put([Thing::new("x", 1)]).await.unwrap();

        match vault.persist().await {
            Err(Error::Persistence(p)) => {
                assert_eq!(p.len(), 2);
                for err in p.errors() {
                    assert!(matches!(err, Error::Backend { backend, .. } if backend == "broken"));
                }
                assert!(p.to_string().contains("disk on fire"));
            }
            other => panic!("expected persistence error, got {:?}", other),
        }
        assert_eq!(good.persist_count().await, 1);
        assert_eq!(good.contents().await.len(), 1);
    }

    #[tokio::test]
    async fn test_load_merges_in_registration_order() {
        let first = Arc::new(MemoryPersister::<Thing>::with_entries([
            Thing::with_key("a", "from first"),
            Thing::with_key("b", "only first"),
        ]));
        let second = Arc::new(MemoryPersister::<Thing>::with_entries([Thing::with_key("a", "from second")]));

        let mut vault: Vault<Thing> = Vault::new();
        vault.register(first);
        vault.register(second);
        vault.load().await.unwrap();

        assert_eq!(vault.size().await, 2);
        assert_eq!(vault.get("a").await.unwrap().name, "from second");
        assert_eq!(vault.get("b").await.unwrap().name, "only first");
    }

    #[tokio::test]
    async fn test_load_stops_at_first_failure() {
        let first = Arc::new(MemoryPersister::<Thing>::with_entries([Thing::with_key("a", "kept")]));
        let last = Arc::new(MemoryPersister::<Thing>::with_entries([Thing::with_key("z", "never")]));

        let mut vault: Vault<Thing> = Vault::new();
        vault.register(first);
        vault.register(Arc::new(Broken));
        vault.register(last);

        let err = vault.load().await.unwrap_err();
        assert!(matches!(err, Error::Backend { ref backend, .. } if backend == "broken"));
        assert!(vault.exists("a").await);
        assert!(!vault.exists("z").await);
    }

    #[tokio::test]
    async fn test_panicking_backend_is_reported() {
        let mut vault: Vault<Thing> = Vault::new();
        let good = Arc::new(MemoryPersister::<Thing>::new());
        vault.register(Arc::new(Panicky));
        vault.register(good.clone());
        vault.put([Thing::new("x", 1)]).await.unwrap();

        match vault.persist().await {
            Err(Error::Persistence(p)) => {
                assert_eq!(p.len(), 1);
                assert!(matches!(
                    &p.errors()[0],
                    Error::Backend { source, .. } if matches!(**source, Error::Internal(_))
                ));
            }
            other => panic!("expected persistence error, got {:?}", other),
        }
        assert_eq!(good.persist_count().await, 1);
        assert_eq!(good.contents().await.len(), 1);
    }

    #[tokio::test]
    async fn test_put_during_persist_leaves_snapshot_alone() {
        let mut vault: Vault<Thing> = Vault::new();
        let slow = Arc::new(Slow { seen: RwLock::new(None) });
        vault.register(slow.clone());
        vault.put([Thing::with_key("a", "before")]).await.unwrap();

        let (persisted, _) = tokio::join!(vault.persist(), async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            vault.put([Thing::with_key("b", "during")]).await.unwrap();
        });
        persisted.unwrap();

        assert_eq!(*slow.seen.read().await, Some(1));
        assert_eq!(vault.size().await, 2);
    }
}
