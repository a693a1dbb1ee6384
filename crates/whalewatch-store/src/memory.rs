use std::hash::Hash;
use std::time::Duration;

/// Remembers keys that were already admitted: trade ids at ingestion, signal
/// ids at finalization.
///
/// Backed by a moka cache so the set stays bounded; a key is forgotten after
/// `ttl` or when evicted under capacity pressure.
pub struct SeenSet {
    inner: moka::sync::Cache<String, ()>,
}

impl SeenSet {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: moka::sync::Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Atomically mark `key` as seen. Returns `true` only for the first caller.
    pub fn first_sighting(&self, key: &str) -> bool {
        self.inner.entry(key.to_string()).or_insert(()).is_fresh()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Forget a key so it can be admitted again.
    pub fn forget(&self, key: &str) {
        self.inner.invalidate(key);
    }
}

/// In-memory async TTL cache backed by moka.
///
/// Used for values that are expensive to resolve over the network, such as
/// market contexts.
pub struct TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: moka::future::Cache<K, V>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: moka::future::Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    pub async fn invalidate(&self, key: &K) {
        self.inner.invalidate(key).await;
    }
}
