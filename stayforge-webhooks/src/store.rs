//! Subscription persistence
//!
//! The dispatcher only ever reads from a store. Mutations come from
//! management code outside the delivery path.

use crate::subscription::{Subscription, SubscriptionUpdate};
use crate::{Result, WebhookError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Storage for subscriptions.
///
/// Listings come back in a stable order; the matcher preserves it.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Every subscription, in store order
    async fn list(&self) -> Result<Vec<Subscription>>;

    /// Enabled subscriptions, in store order
    async fn list_enabled(&self) -> Result<Vec<Subscription>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.enabled)
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Subscription>;

    /// Insert a new subscription. Fails if the id is taken.
    async fn create(&self, subscription: Subscription) -> Result<Subscription>;

    async fn update(&self, id: &str, update: SubscriptionUpdate) -> Result<Subscription>;

    /// Remove and return a subscription
    async fn delete(&self, id: &str) -> Result<Subscription>;

    async fn enable(&self, id: &str) -> Result<Subscription>;

    async fn disable(&self, id: &str) -> Result<Subscription>;
}

/// Insertion-ordered store held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from existing records, keeping their order
    pub fn with_subscriptions(subscriptions: Vec<Subscription>) -> Result<Self> {
        let store = Self::new();
        for subscription in subscriptions {
            store.insert(subscription)?;
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Subscription> {
        self.subscriptions.read().clone()
    }

    fn restore(&self, snapshot: Vec<Subscription>) {
        *self.subscriptions.write() = snapshot;
    }

    fn insert(&self, subscription: Subscription) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.write();
        if subscriptions.iter().any(|s| s.id() == subscription.id()) {
            return Err(WebhookError::DuplicateSubscription(
                subscription.id().to_string(),
            ));
        }
        subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    fn remove(&self, id: &str) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.write();
        match subscriptions.iter().position(|s| s.id() == id) {
            Some(index) => Ok(subscriptions.remove(index)),
            None => Err(WebhookError::SubscriptionNotFound(id.to_string())),
        }
    }

    /// Run `f` against the stored record and return the result
    fn with_subscription<F>(&self, id: &str, f: F) -> Result<Subscription>
    where
        F: FnOnce(&mut Subscription) -> Result<()>,
    {
        let mut subscriptions = self.subscriptions.write();
        match subscriptions.iter_mut().find(|s| s.id() == id) {
            Some(subscription) => {
                f(subscription)?;
                Ok(subscription.clone())
            }
            None => Err(WebhookError::SubscriptionNotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn list(&self) -> Result<Vec<Subscription>> {
        Ok(self.snapshot())
    }

    async fn list_enabled(&self) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Subscription> {
        self.subscriptions
            .read()
            .iter()
            .find(|s| s.id() == id)
            .cloned()
            .ok_or_else(|| WebhookError::SubscriptionNotFound(id.to_string()))
    }

    async fn create(&self, subscription: Subscription) -> Result<Subscription> {
        self.insert(subscription)
    }

    async fn update(&self, id: &str, update: SubscriptionUpdate) -> Result<Subscription> {
        self.with_subscription(id, |s| s.apply(update))
    }

    async fn delete(&self, id: &str) -> Result<Subscription> {
        self.remove(id)
    }

    async fn enable(&self, id: &str) -> Result<Subscription> {
        self.with_subscription(id, |s| {
            s.set_enabled(true);
            Ok(())
        })
    }

    async fn disable(&self, id: &str) -> Result<Subscription> {
        self.with_subscription(id, |s| {
            s.set_enabled(false);
            Ok(())
        })
    }
}

/// Default file name inside a store directory
pub const SUBSCRIPTIONS_FILE: &str = "subscriptions.json";

/// Store persisted as one JSON array, rewritten after every mutation.
///
/// Records are kept in memory between writes. On open they are ordered by
/// `created_at`, ties broken by id.
#[derive(Debug)]
pub struct JsonFileSubscriptionStore {
    path: PathBuf,
    inner: InMemorySubscriptionStore,
    write_lock: Mutex<()>,
}

impl JsonFileSubscriptionStore {
    /// Open `path`, starting empty if the file doesn't exist yet
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let mut subscriptions: Vec<Subscription> = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                WebhookError::Store(format!("corrupt store {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        subscriptions.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });

        tracing::debug!(
            path = %path.display(),
            count = subscriptions.len(),
            "Loaded subscription store"
        );

        Ok(Self {
            path,
            inner: InMemorySubscriptionStore::with_subscriptions(subscriptions)?,
            write_lock: Mutex::new(()),
        })
    }

    /// Open `<dir>/subscriptions.json`
    pub async fn open_dir(dir: impl AsRef<Path>) -> Result<Self> {
        tokio::fs::create_dir_all(dir.as_ref()).await?;
        Self::open(dir.as_ref().join(SUBSCRIPTIONS_FILE)).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.inner.snapshot())
            .map_err(|e| WebhookError::Store(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Apply a mutation and write it out, rolling memory back if the write fails
    async fn mutate<F>(&self, f: F) -> Result<Subscription>
    where
        F: FnOnce(&InMemorySubscriptionStore) -> Result<Subscription>,
    {
        let _guard = self.write_lock.lock().await;
        let before = self.inner.snapshot();

        let result = f(&self.inner)?;
        if let Err(e) = self.persist().await {
            self.inner.restore(before);
            tracing::error!(path = %self.path.display(), error = %e, "Failed to persist subscriptions");
            return Err(WebhookError::Store(e.to_string()));
        }
        Ok(result)
    }
}

#[async_trait]
impl SubscriptionStore for JsonFileSubscriptionStore {
    async fn list(&self) -> Result<Vec<Subscription>> {
        self.inner.list().await
    }

    async fn list_enabled(&self) -> Result<Vec<Subscription>> {
        self.inner.list_enabled().await
    }

    async fn get(&self, id: &str) -> Result<Subscription> {
        self.inner.get(id).await
    }

    async fn create(&self, subscription: Subscription) -> Result<Subscription> {
        self.mutate(|inner| inner.insert(subscription)).await
    }

    async fn update(&self, id: &str, update: SubscriptionUpdate) -> Result<Subscription> {
        self.mutate(|inner| inner.with_subscription(id, |s| s.apply(update)))
            .await
    }

    async fn delete(&self, id: &str) -> Result<Subscription> {
        self.mutate(|inner| inner.remove(id)).await
    }

    async fn enable(&self, id: &str) -> Result<Subscription> {
        self.mutate(|inner| {
            inner.with_subscription(id, |s| {
                s.set_enabled(true);
                Ok(())
            })
        })
        .await
    }

    async fn disable(&self, id: &str) -> Result<Subscription> {
        self.mutate(|inner| {
            inner.with_subscription(id, |s| {
                s.set_enabled(false);
                Ok(())
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(id: &str, pattern: &str) -> Subscription {
        Subscription::builder(pattern, "https://example.test/hook")
            .id(id)
            .build()
            .unwrap()
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "stayforge-store-{}-{}",
            name,
            uuid::Uuid::new_v4().simple()
        ))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemorySubscriptionStore::new();
        store.create(sub("a", "/**")).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().id(), "a");
        assert!(matches!(
            store.get("missing").await,
            Err(WebhookError::SubscriptionNotFound(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = InMemorySubscriptionStore::new();
        store.create(sub("a", "/**")).await.unwrap();

        assert!(matches!(
            store.create(sub("a", "/rooms")).await,
            Err(WebhookError::DuplicateSubscription(_))
        ));
    }

    #[tokio::test]
    async fn test_listing_keeps_insertion_order() {
        let store = InMemorySubscriptionStore::new();
        for id in ["c", "a", "b"] {
            store.create(sub(id, "/**")).await.unwrap();
        }

        let ids: Vec<_> = store
            .list()
            .await
            .unwrap()
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_enable_disable() {
        let store = InMemorySubscriptionStore::new();
        store.create(sub("a", "/**")).await.unwrap();
        store.create(sub("b", "/**")).await.unwrap();

        let disabled = store.disable("a").await.unwrap();
        assert!(!disabled.enabled);

        let enabled: Vec<_> = store.list_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id(), "b");

        store.enable("a").await.unwrap();
        assert_eq!(store.list_enabled().await.unwrap().len(), 2);
        assert!(store.disable("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = InMemorySubscriptionStore::new();
        store.create(sub("a", "/rooms")).await.unwrap();

        let update = SubscriptionUpdate::new().pattern("POST /keys/*").unwrap();
        let updated = store.update("a", update).await.unwrap();
        assert_eq!(updated.pattern.to_string(), "POST /keys/*");
        assert_eq!(updated.id(), "a");

        let removed = store.delete("a").await.unwrap();
        assert_eq!(removed.id(), "a");
        assert!(store.is_empty());
        assert!(store.delete("a").await.is_err());
    }

    #[tokio::test]
    async fn test_json_store_persists_across_reopen() {
        let dir = temp_dir("reopen");
        {
            let store = JsonFileSubscriptionStore::open_dir(&dir).await.unwrap();
            let mut signed = sub("a", "POST /rooms/*");
            signed.secret = Some("whsec_test".to_string());
            store.create(signed).await.unwrap();
            store.create(sub("b", "/**")).await.unwrap();
            store.disable("b").await.unwrap();
        }

        let store = JsonFileSubscriptionStore::open_dir(&dir).await.unwrap();
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id(), "a");
        assert_eq!(all[0].secret.as_deref(), Some("whsec_test"));
        assert!(!store.get("b").await.unwrap().enabled);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_json_store_missing_file_is_empty() {
        let dir = temp_dir("empty");
        let store = JsonFileSubscriptionStore::open(dir.join("none.json"))
            .await
            .unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_store_corrupt_file() {
        let dir = temp_dir("corrupt");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join(SUBSCRIPTIONS_FILE);
        tokio::fs::write(&path, b"{not json").await.unwrap();

        assert!(matches!(
            JsonFileSubscriptionStore::open(&path).await,
            Err(WebhookError::Store(_))
        ));

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_json_store_write_failure_rolls_back() {
        let dir = temp_dir("rollback");
        let store = JsonFileSubscriptionStore::open(dir.join("missing-dir").join("s.json"))
            .await
            .unwrap();

        assert!(matches!(
            store.create(sub("a", "/**")).await,
            Err(WebhookError::Store(_))
        ));
        assert!(store.list().await.unwrap().is_empty());
    }
}
