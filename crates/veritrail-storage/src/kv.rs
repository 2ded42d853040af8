//! Ordered key-value store trait and implementations.
//!
//! The [`KvStore`] trait provides byte-level `get`/`set`/`delete` operations
//! over namespaced keys plus ordered range reads and atomic batch writes.
//!
//! # Ordering
//!
//! Keys within a namespace are compared as raw bytes. Callers that need
//! numeric order (event sequences, journal positions) encode numbers as
//! fixed-width zero-padded decimal so byte order and numeric order agree.
//!
//! # Namespacing
//!
//! Each audit log and each engine-owned structure uses its own namespace,
//! e.g. `veritrail:events:{log_id}` or `veritrail:checkpoints`. Namespaces
//! and keys must be non-empty and must not contain the null byte, which is
//! the internal separator.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_namespace(namespace: &str) -> StorageResult<()> {
    if namespace.is_empty() {
        return Err(StorageError::InvalidKey(
            "namespace must not be empty".into(),
        ));
    }
    if namespace.contains('\0') {
        return Err(StorageError::InvalidKey(
            "namespace must not contain null bytes".into(),
        ));
    }
    Ok(())
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key must not be empty".into()));
    }
    if key.contains('\0') {
        return Err(StorageError::InvalidKey(
            "key must not contain null bytes".into(),
        ));
    }
    Ok(())
}

/// `"{namespace}\0{key}"` as bytes.
#[cfg(feature = "kv")]
fn composite_key(namespace: &str, key: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(namespace.len().saturating_add(key.len()).saturating_add(1));
    buf.extend_from_slice(namespace.as_bytes());
    buf.push(0);
    buf.extend_from_slice(key.as_bytes());
    buf
}

/// `"{namespace}\x01"`: the first composite key past every key in
/// `namespace`, since `\x01` sorts directly after the `\0` separator.
#[cfg(feature = "kv")]
fn namespace_end(namespace: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(namespace.len().saturating_add(1));
    buf.extend_from_slice(namespace.as_bytes());
    buf.push(1);
    buf
}

fn count_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A key-value entry returned by range reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    /// The namespace this entry belongs to.
    pub namespace: String,
    /// The key within the namespace.
    pub key: String,
    /// The raw value bytes.
    pub value: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Namespaced, ordered key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a value by namespace and key.
    ///
    /// Returns `None` if the key does not exist.
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Set a value for a namespace and key, overwriting any existing value.
    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Write several keys of one namespace atomically. Either every entry is
    /// visible afterwards or none is.
    async fn set_batch(&self, namespace: &str, entries: Vec<(String, Vec<u8>)>)
    -> StorageResult<()>;

    /// Delete a key from a namespace.
    ///
    /// Returns `true` if the key existed and was deleted.
    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool>;

    /// Check if a key exists in a namespace.
    async fn exists(&self, namespace: &str, key: &str) -> StorageResult<bool>;

    /// List all keys in a namespace in ascending byte order.
    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>>;

    /// Read entries with `start <= key < end` in ascending byte order.
    /// `end = None` reads to the end of the namespace.
    async fn range(
        &self,
        namespace: &str,
        start: &str,
        end: Option<&str>,
    ) -> StorageResult<Vec<KvEntry>>;

    /// Delete all keys in a namespace, returning how many were removed.
    async fn clear_namespace(&self, namespace: &str) -> StorageResult<u64>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (always available)
// ---------------------------------------------------------------------------

/// In-memory ordered store for tests and ephemeral logs.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    data: std::sync::RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryKvStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn full_key(namespace: &str, key: &str) -> (String, String) {
        (namespace.to_string(), key.to_string())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(data.get(&Self::full_key(namespace, key)).cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        data.insert(Self::full_key(namespace, key), value);
        Ok(())
    }

    async fn set_batch(
        &self,
        namespace: &str,
        entries: Vec<(String, Vec<u8>)>,
    ) -> StorageResult<()> {
        validate_namespace(namespace)?;
        for (key, _) in &entries {
            validate_key(key)?;
        }
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        for (key, value) in entries {
            data.insert((namespace.to_string(), key), value);
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(data.remove(&Self::full_key(namespace, key)).is_some())
    }

    async fn exists(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(data.contains_key(&Self::full_key(namespace, key)))
    }

    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(data
            .range(Self::full_key(namespace, "")..)
            .take_while(|((ns, _), _)| ns == namespace)
            .map(|((_, k), _)| k.clone())
            .collect())
    }

    async fn range(
        &self,
        namespace: &str,
        start: &str,
        end: Option<&str>,
    ) -> StorageResult<Vec<KvEntry>> {
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(data
            .range(Self::full_key(namespace, start)..)
            .take_while(|((ns, k), _)| ns == namespace && end.is_none_or(|e| k.as_str() < e))
            .map(|((ns, k), v)| KvEntry {
                namespace: ns.clone(),
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }

    async fn clear_namespace(&self, namespace: &str) -> StorageResult<u64> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let before = data.len();
        data.retain(|(ns, _), _| ns != namespace);
        Ok(count_u64(before.saturating_sub(data.len())))
    }
}

// ---------------------------------------------------------------------------
// SurrealKV implementation (behind `kv` feature)
// ---------------------------------------------------------------------------

/// Persistent store backed by `SurrealKV`.
///
/// Every call runs in its own transaction; [`KvStore::set_batch`] commits
/// all of its entries in one.
///
/// # Example
///
/// ```rust,ignore
/// use veritrail_storage::SurrealKvStore;
///
/// let store = SurrealKvStore::open("./data/veritrail")?;
/// store.set("veritrail:heads", "payments", b"{}".to_vec()).await?;
/// ```
#[cfg(feature = "kv")]
pub struct SurrealKvStore {
    tree: surrealkv::Tree,
}

#[cfg(feature = "kv")]
impl std::fmt::Debug for SurrealKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealKvStore").finish_non_exhaustive()
    }
}

#[cfg(feature = "kv")]
impl SurrealKvStore {
    /// Open a persistent store at the given directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the store cannot be opened.
    pub fn open(path: impl AsRef<std::path::Path>) -> StorageResult<Self> {
        let tree = surrealkv::TreeBuilder::new()
            .with_path(path.as_ref().to_path_buf())
            .build()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        tracing::debug!(path = %path.as_ref().display(), "Opened SurrealKV store");
        Ok(Self { tree })
    }

    /// Close the store, flushing pending writes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the flush fails.
    pub async fn close(&self) -> StorageResult<()> {
        self.tree
            .close()
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))
    }

    /// Keys in `[start, end)` (composite form), read in one transaction.
    fn scan_keys(&self, start: &[u8], end: &[u8]) -> StorageResult<Vec<Vec<u8>>> {
        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        let mut iter = tx.range(start, end).map_err(|ref e| map_kv_err(e))?;
        iter.seek_first().map_err(|ref e| map_kv_err(e))?;
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key());
            iter.next().map_err(|ref e| map_kv_err(e))?;
        }
        Ok(keys)
    }
}

#[cfg(feature = "kv")]
fn map_kv_err(e: &surrealkv::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

#[cfg(feature = "kv")]
fn strip_namespace(raw_key: &[u8], namespace: &str) -> Option<String> {
    let prefix_len = namespace.len().saturating_add(1);
    raw_key
        .get(prefix_len..)
        .filter(|rest| !rest.is_empty())
        .and_then(|rest| std::str::from_utf8(rest).ok())
        .map(String::from)
}

#[cfg(feature = "kv")]
#[async_trait]
impl KvStore for SurrealKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        tx.get(&composite_key(namespace, key))
            .map_err(|ref e| map_kv_err(e))
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        tx.set(&composite_key(namespace, key), &value)
            .map_err(|ref e| map_kv_err(e))?;
        tx.commit().await.map_err(|ref e| map_kv_err(e))
    }

    async fn set_batch(
        &self,
        namespace: &str,
        entries: Vec<(String, Vec<u8>)>,
    ) -> StorageResult<()> {
        validate_namespace(namespace)?;
        for (key, _) in &entries {
            validate_key(key)?;
        }
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        for (key, value) in &entries {
            tx.set(&composite_key(namespace, key), value)
                .map_err(|ref e| map_kv_err(e))?;
        }
        tx.commit().await.map_err(|ref e| map_kv_err(e))
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        let ck = composite_key(namespace, key);
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        let existed = tx.get(&ck).map_err(|ref e| map_kv_err(e))?.is_some();
        if existed {
            tx.delete(&ck).map_err(|ref e| map_kv_err(e))?;
            tx.commit().await.map_err(|ref e| map_kv_err(e))?;
        }
        Ok(existed)
    }

    async fn exists(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        Ok(self.get(namespace, key).await?.is_some())
    }

    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        validate_namespace(namespace)?;
        let start = composite_key(namespace, "");
        let keys = self.scan_keys(&start, &namespace_end(namespace))?;
        Ok(keys
            .iter()
            .filter_map(|raw| strip_namespace(raw, namespace))
            .collect())
    }

    async fn range(
        &self,
        namespace: &str,
        start: &str,
        end: Option<&str>,
    ) -> StorageResult<Vec<KvEntry>> {
        validate_namespace(namespace)?;
        let lower = composite_key(namespace, start);
        let upper = end.map_or_else(|| namespace_end(namespace), |e| composite_key(namespace, e));
        let raw_keys = self.scan_keys(&lower, &upper)?;

        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        let mut entries = Vec::with_capacity(raw_keys.len());
        for raw in raw_keys {
            let Some(key) = strip_namespace(&raw, namespace) else {
                continue;
            };
            // Deleted between scan and read: skip.
            if let Some(value) = tx.get(&raw).map_err(|ref e| map_kv_err(e))? {
                entries.push(KvEntry {
                    namespace: namespace.to_string(),
                    key,
                    value,
                });
            }
        }
        Ok(entries)
    }

    async fn clear_namespace(&self, namespace: &str) -> StorageResult<u64> {
        validate_namespace(namespace)?;
        let start = composite_key(namespace, "");
        let keys = self.scan_keys(&start, &namespace_end(namespace))?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        for key in &keys {
            tx.delete(key).map_err(|ref e| map_kv_err(e))?;
        }
        tx.commit().await.map_err(|ref e| map_kv_err(e))?;
        Ok(count_u64(keys.len()))
    }
}

// ---------------------------------------------------------------------------
// Scoped store (namespace pre-bound)
// ---------------------------------------------------------------------------

/// A namespace-scoped view into a [`KvStore`] with typed JSON helpers.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use veritrail_storage::{MemoryKvStore, ScopedKvStore};
///
/// let store = Arc::new(MemoryKvStore::new());
/// let heads = ScopedKvStore::new(store, "veritrail:heads").unwrap();
///
/// heads.set_json("payments", &42_u64).await.unwrap();
/// let seq: Option<u64> = heads.get_json("payments").await.unwrap();
/// assert_eq!(seq, Some(42));
/// ```
#[derive(Clone)]
pub struct ScopedKvStore {
    inner: Arc<dyn KvStore>,
    namespace: String,
}

impl std::fmt::Debug for ScopedKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedKvStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl ScopedKvStore {
    /// Create a scoped view into `store` for `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the namespace is empty
    /// or contains null bytes.
    pub fn new(store: Arc<dyn KvStore>, namespace: impl Into<String>) -> StorageResult<Self> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        Ok(Self {
            inner: store,
            namespace,
        })
    }

    /// The namespace this store is scoped to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The underlying unscoped store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.inner
    }

    /// Get a raw byte value by key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the key is empty or invalid.
    pub async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        self.inner.get(&self.namespace, key).await
    }

    /// Set a raw byte value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the key is empty or invalid.
    pub async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        validate_key(key)?;
        self.inner.set(&self.namespace, key, value).await
    }

    /// Delete a key, returning `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the key is empty or invalid.
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        self.inner.delete(&self.namespace, key).await
    }

    /// List all keys in this namespace in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store operation fails.
    pub async fn list_keys(&self) -> StorageResult<Vec<String>> {
        self.inner.list_keys(&self.namespace).await
    }

    /// Delete all keys in this namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store operation fails.
    pub async fn clear(&self) -> StorageResult<u64> {
        self.inner.clear_namespace(&self.namespace).await
    }

    // -- Typed convenience (JSON) --

    /// Deserialize a JSON value, or `None` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if deserialization fails.
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let bytes = self.get(key).await?;
        bytes
            .map(|b| {
                serde_json::from_slice(&b).map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .transpose()
    }

    /// Serialize a value as JSON and store it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if serialization fails.
    pub async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.set(key, bytes).await
    }

    /// Deserialize every value in the namespace whose key is `>= start`,
    /// in key order. Entries that fail to decode are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying range read fails.
    pub async fn scan_json<T: serde::de::DeserializeOwned>(
        &self,
        start: &str,
    ) -> StorageResult<Vec<(String, T)>> {
        let entries = self.inner.range(&self.namespace, start, None).await?;
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_slice(&entry.value) {
                Ok(value) => out.push((entry.key, value)),
                Err(e) => {
                    tracing::warn!(
                        namespace = %self.namespace,
                        key = %entry.key,
                        error = %e,
                        "Skipping undecodable entry"
                    );
                },
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
