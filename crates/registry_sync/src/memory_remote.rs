//! In-memory remote store.
//!
//! `MemoryRemoteStore` keeps every collection in a `HashMap` guarded by an
//! async `RwLock`. It backs the engine and import tests, and offers hooks to
//! simulate an unreachable network or rejected writes.
//!
//! # Example
//!
//! ```
//! use registry_sync::{DocumentRef, Fields, MemoryRemoteStore, RemoteStore, SetMode};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let store = MemoryRemoteStore::new();
//! let doc = DocumentRef::new("PaidMembers", "ID1");
//! let mut fields = Fields::new();
//! fields.insert("name".into(), "Jane Doe".into());
//!
//! store.set(&doc, fields, SetMode::Merge).await.unwrap();
//! assert_eq!(store.get(&doc).await.unwrap().unwrap().data["name"], "Jane Doe");
//! # });
//! ```

use crate::remote::{
    apply_write, DocumentData, DocumentRef, DocumentSnapshot, Fields, RemoteError, RemoteResult,
    RemoteStore, SetMode, WriteBatch, WriteOp,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

type Collections = HashMap<String, BTreeMap<String, DocumentData>>;

/// In-memory implementation of [`RemoteStore`]
pub struct MemoryRemoteStore {
    collections: RwLock<Collections>,
    /// Collections whose writes are rejected
    failing: RwLock<HashSet<String>>,
    available: AtomicBool,
    operations: AtomicUsize,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            available: AtomicBool::new(true),
            operations: AtomicUsize::new(0),
        }
    }

    /// Simulate the network going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Reject every subsequent write that touches `collection`
    pub async fn fail_writes_to(&self, collection: &str) {
        self.failing.write().await.insert(collection.to_string());
    }

    pub async fn clear_failures(&self) {
        self.failing.write().await.clear();
    }

    /// Number of calls that reached the store, successful or not
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Seed a document without going through the write path
    pub async fn insert_raw(&self, collection: &str, key: &str, data: DocumentData) {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), data);
    }

    /// Copy of every document in a collection, ordered by key
    pub async fn collection(&self, collection: &str) -> BTreeMap<String, DocumentData> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Copy of one document
    pub async fn document(&self, collection: &str, key: &str) -> Option<DocumentData> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned()
    }

    fn begin(&self) -> RemoteResult<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Unavailable("network unreachable".to_string()))
        }
    }

    async fn check_writable(&self, doc: &DocumentRef) -> RemoteResult<()> {
        if self.failing.read().await.contains(&doc.collection) {
            return Err(RemoteError::PermissionDenied(format!(
                "writes to {} are rejected",
                doc.collection
            )));
        }
        Ok(())
    }

    async fn write(&self, op: WriteOp) -> RemoteResult<()> {
        let mut batch = WriteBatch::new();
        match op {
            WriteOp::Set { doc, fields, mode } => batch.set(doc, fields, mode),
            WriteOp::Update { doc, fields } => batch.update(doc, fields),
            WriteOp::Delete { doc } => batch.delete(doc),
        };
        self.apply_batch(batch).await
    }

    /// Apply writes to a staged copy and swap it in only if all succeed
    async fn apply_batch(&self, batch: WriteBatch) -> RemoteResult<()> {
        for op in batch.writes() {
            self.check_writable(op.doc()).await?;
        }

        let mut collections = self.collections.write().await;
        let mut staged = collections.clone();
        let now = Utc::now();

        for op in batch.writes() {
            let doc = op.doc();
            let docs = staged.entry(doc.collection.clone()).or_default();
            match apply_write(op, docs.get(&doc.key), now)? {
                Some(data) => {
                    docs.insert(doc.key.clone(), data);
                }
                None => {
                    docs.remove(&doc.key);
                }
            }
        }

        *collections = staged;
        Ok(())
    }
}

impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, doc: &DocumentRef) -> RemoteResult<Option<DocumentSnapshot>> {
        self.begin()?;
        Ok(self
            .document(&doc.collection, &doc.key)
            .await
            .map(|data| DocumentSnapshot::new(doc.key.clone(), data)))
    }

    async fn get_all(&self, collection: &str) -> RemoteResult<Vec<DocumentSnapshot>> {
        self.begin()?;
        Ok(self
            .collection(collection)
            .await
            .into_iter()
            .map(|(key, data)| DocumentSnapshot::new(key, data))
            .collect())
    }

    async fn set(&self, doc: &DocumentRef, fields: Fields, mode: SetMode) -> RemoteResult<()> {
        self.begin()?;
        self.write(WriteOp::Set {
            doc: doc.clone(),
            fields,
            mode,
        })
        .await
    }

    async fn update(&self, doc: &DocumentRef, fields: Fields) -> RemoteResult<()> {
        self.begin()?;
        self.write(WriteOp::Update {
            doc: doc.clone(),
            fields,
        })
        .await
    }

    async fn delete(&self, doc: &DocumentRef) -> RemoteResult<()> {
        self.begin()?;
        self.write(WriteOp::Delete { doc: doc.clone() }).await
    }

    async fn add(&self, collection: &str, fields: Fields) -> RemoteResult<DocumentRef> {
        self.begin()?;
        let doc = DocumentRef::new(collection, Uuid::new_v4().simple().to_string());
        self.write(WriteOp::Set {
            doc: doc.clone(),
            fields,
            mode: SetMode::Overwrite,
        })
        .await?;
        Ok(doc)
    }

    async fn commit(&self, batch: WriteBatch) -> RemoteResult<()> {
        self.begin()?;
        self.apply_batch(batch).await
    }
}
