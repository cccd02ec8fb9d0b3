//! Directory-backed remote store.
//!
//! `FileRemoteStore` stands in for the cloud document database when the
//! binary runs against a shared folder. Each document is one JSON file.
//!
//! # Directory Structure
//!
//! ```text
//! root/
//! └── {collection}/
//!     └── {url-encoded key}.json    # {"key": ..., "data": {...}}
//! ```
//!
//! Batches commit in two phases. Every new document is first written to a
//! `.tmp` file next to its target. Only when all of them are on disk are the
//! targets swapped in by rename, with the previous version kept as `.bak`
//! until the whole batch has landed. A failure in either phase removes the
//! staged files and restores the backups, so a batch is applied completely
//! or not at all. A single async mutex serializes writers.

use crate::remote::{
    apply_write, DocumentData, DocumentRef, DocumentSnapshot, Fields, RemoteError, RemoteResult,
    RemoteStore, SetMode, WriteBatch, WriteOp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

const DOCUMENT_EXT: &str = "json";
const TEMP_EXT: &str = "tmp";
const BACKUP_EXT: &str = "bak";

/// On-disk document envelope
#[derive(Serialize, Deserialize)]
struct StoredDocument {
    key: String,
    data: DocumentData,
}

/// File-based implementation of [`RemoteStore`]
pub struct FileRemoteStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRemoteStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl AsRef<Path>) -> RemoteResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(urlencoding::encode(collection).as_ref())
    }

    fn document_path(&self, doc: &DocumentRef) -> PathBuf {
        self.collection_dir(&doc.collection)
            .join(format!("{}.{}", urlencoding::encode(&doc.key), DOCUMENT_EXT))
    }

    async fn read_document(&self, doc: &DocumentRef) -> RemoteResult<Option<DocumentData>> {
        match fs::read(self.document_path(doc)).await {
            Ok(bytes) => {
                let stored: StoredDocument = serde_json::from_slice(&bytes)?;
                Ok(Some(stored.data))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn stage_document(
        &self,
        doc: &DocumentRef,
        data: DocumentData,
        path: &Path,
    ) -> RemoteResult<PathBuf> {
        fs::create_dir_all(self.collection_dir(&doc.collection)).await?;
        let stored = StoredDocument {
            key: doc.key.clone(),
            data,
        };
        let temp = path.with_extension(TEMP_EXT);
        fs::write(&temp, serde_json::to_vec_pretty(&stored)?).await?;
        Ok(temp)
    }

    /// Resolve every write against current contents, then persist.
    ///
    /// Validation failures (such as `update` on a missing document) abort
    /// before anything is written.
    async fn apply_batch(&self, batch: WriteBatch) -> RemoteResult<()> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        let mut pending: BTreeMap<DocumentRef, Option<DocumentData>> = BTreeMap::new();
        for op in batch.writes() {
            let doc = op.doc();
            let current = match pending.get(doc) {
                Some(staged) => staged.clone(),
                None => self.read_document(doc).await?,
            };
            let next = apply_write(op, current.as_ref(), now)?;
            pending.insert(doc.clone(), next);
        }

        // Phase 1: stage every new document
        let mut staged: Vec<(PathBuf, Option<PathBuf>)> = Vec::with_capacity(pending.len());
        for (doc, data) in pending {
            let path = self.document_path(&doc);
            let temp = match data {
                Some(data) => match self.stage_document(&doc, data, &path).await {
                    Ok(temp) => Some(temp),
                    Err(e) => {
                        discard_staged(&staged).await;
                        return Err(e);
                    }
                },
                None => None,
            };
            staged.push((path, temp));
        }

        // Phase 2: swap them in, keeping backups until every swap succeeded
        let mut swapped: Vec<Swapped> = Vec::with_capacity(staged.len());
        for (index, (path, temp)) in staged.iter().enumerate() {
            if let Err(e) = swap_in(path, temp.as_deref(), &mut swapped).await {
                tracing::warn!(error = %e, path = %path.display(), "batch commit failed, rolling back");
                roll_back(&swapped).await;
                discard_staged(&staged[index..]).await;
                return Err(e);
            }
        }

        for entry in &swapped {
            if let Some(backup) = &entry.backup {
                if let Err(e) = fs::remove_file(backup).await {
                    tracing::warn!(error = %e, path = %backup.display(), "could not remove backup");
                }
            }
        }
        Ok(())
    }

    async fn single(&self, op: WriteOp) -> RemoteResult<()> {
        let mut batch = WriteBatch::new();
        match op {
            WriteOp::Set { doc, fields, mode } => batch.set(doc, fields, mode),
            WriteOp::Update { doc, fields } => batch.update(doc, fields),
            WriteOp::Delete { doc } => batch.delete(doc),
        };
        self.apply_batch(batch).await
    }
}

impl RemoteStore for FileRemoteStore {
    async fn get(&self, doc: &DocumentRef) -> RemoteResult<Option<DocumentSnapshot>> {
        Ok(self
            .read_document(doc)
            .await?
            .map(|data| DocumentSnapshot::new(doc.key.clone(), data)))
    }

    async fn get_all(&self, collection: &str) -> RemoteResult<Vec<DocumentSnapshot>> {
        let dir = self.collection_dir(collection);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(DOCUMENT_EXT) {
                continue;
            }
            let bytes = fs::read(&path).await?;
            let stored: StoredDocument = serde_json::from_slice(&bytes)?;
            snapshots.push(DocumentSnapshot::new(stored.key, stored.data));
        }
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(snapshots)
    }

    async fn set(&self, doc: &DocumentRef, fields: Fields, mode: SetMode) -> RemoteResult<()> {
        self.single(WriteOp::Set {
            doc: doc.clone(),
            fields,
            mode,
        })
        .await
    }

    async fn update(&self, doc: &DocumentRef, fields: Fields) -> RemoteResult<()> {
        self.single(WriteOp::Update {
            doc: doc.clone(),
            fields,
        })
        .await
    }

    async fn delete(&self, doc: &DocumentRef) -> RemoteResult<()> {
        self.single(WriteOp::Delete { doc: doc.clone() }).await
    }

    async fn add(&self, collection: &str, fields: Fields) -> RemoteResult<DocumentRef> {
        if collection.is_empty() {
            return Err(RemoteError::InvalidArgument(
                "collection name is empty".to_string(),
            ));
        }
        let doc = DocumentRef::new(collection, Uuid::new_v4().simple().to_string());
        self.single(WriteOp::Set {
            doc: doc.clone(),
            fields,
            mode: SetMode::Overwrite,
        })
        .await?;
        Ok(doc)
    }

    async fn commit(&self, batch: WriteBatch) -> RemoteResult<()> {
        self.apply_batch(batch).await
    }
}

/// A target touched by phase two of a batch commit
struct Swapped {
    path: PathBuf,
    /// Previous version of the document, if there was one
    backup: Option<PathBuf>,
    /// Whether the staged file now sits at `path`
    written: bool,
}

/// Move the current document aside and the staged one (if any) into place
async fn swap_in(path: &Path, temp: Option<&Path>, swapped: &mut Vec<Swapped>) -> RemoteResult<()> {
    let backup_path = path.with_extension(BACKUP_EXT);
    let backup = match fs::rename(path, &backup_path).await {
        Ok(()) => Some(backup_path),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    swapped.push(Swapped {
        path: path.to_path_buf(),
        backup,
        written: false,
    });

    if let Some(temp) = temp {
        fs::rename(temp, path).await?;
        if let Some(last) = swapped.last_mut() {
            last.written = true;
        }
    }
    Ok(())
}

/// Undo phase two in reverse order
async fn roll_back(swapped: &[Swapped]) {
    for entry in swapped.iter().rev() {
        if entry.written {
            if let Err(e) = fs::remove_file(&entry.path).await {
                tracing::error!(error = %e, path = %entry.path.display(), "rollback could not remove document");
            }
        }
        if let Some(backup) = &entry.backup {
            if let Err(e) = fs::rename(backup, &entry.path).await {
                tracing::error!(error = %e, path = %entry.path.display(), "rollback could not restore document");
            }
        }
    }
}

async fn discard_staged(staged: &[(PathBuf, Option<PathBuf>)]) {
    for temp in staged.iter().filter_map(|(_, temp)| temp.as_ref()) {
        let _ = fs::remove_file(temp).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn name(value: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("name".into(), value.into());
        fields
    }

    #[tokio::test]
    async fn test_documents_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        let doc = DocumentRef::new("PaidMembers", "Area A_0_1700000000000");

        {
            let store = FileRemoteStore::open(dir.path()).await.unwrap();
            store.set(&doc, name("Jane"), SetMode::Merge).await.unwrap();
        }

        let store = FileRemoteStore::open(dir.path()).await.unwrap();
        let all = store.get_all("PaidMembers").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "Area A_0_1700000000000");
        assert_eq!(all[0].data["name"], "Jane");
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileRemoteStore::open(dir.path()).await.unwrap();
        assert!(store.get_all("Status").await.unwrap().is_empty());
        assert!(store
            .get(&DocumentRef::new("Status", "x"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failed_batch_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = FileRemoteStore::open(dir.path()).await.unwrap();

        let mut batch = WriteBatch::new();
        batch
            .set(DocumentRef::new("PaidMembers", "a"), name("A"), SetMode::Overwrite)
            .update(DocumentRef::new("PaidMembers", "missing"), name("B"));

        assert!(store.commit(batch).await.is_err());
        assert!(store.get_all("PaidMembers").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_staging_failure_leaves_earlier_documents_untouched() {
        let dir = TempDir::new().unwrap();
        let store = FileRemoteStore::open(dir.path()).await.unwrap();
        // A directory where the second document's staging file should go
        std::fs::create_dir_all(dir.path().join("C").join("Z.tmp")).unwrap();

        let mut batch = WriteBatch::new();
        batch
            .set(DocumentRef::new("C", "A"), name("A"), SetMode::Overwrite)
            .set(DocumentRef::new("C", "Z"), name("Z"), SetMode::Overwrite);

        assert!(store.commit(batch).await.is_err());
        assert!(store.get(&DocumentRef::new("C", "A")).await.unwrap().is_none());
        assert!(!dir.path().join("C").join("A.tmp").exists());
    }

    #[tokio::test]
    async fn test_swap_failure_restores_previous_versions() {
        let dir = TempDir::new().unwrap();
        let store = FileRemoteStore::open(dir.path()).await.unwrap();
        let a = DocumentRef::new("C", "A");
        let z = DocumentRef::new("C", "Z");
        store.set(&a, name("old A"), SetMode::Overwrite).await.unwrap();
        store.set(&z, name("old Z"), SetMode::Overwrite).await.unwrap();

        // Z's backup slot is a non-empty directory, so moving Z aside fails
        let blocker = dir.path().join("C").join("Z.bak");
        std::fs::create_dir_all(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), b"x").unwrap();

        let mut batch = WriteBatch::new();
        batch
            .set(a.clone(), name("new A"), SetMode::Overwrite)
            .set(z.clone(), name("new Z"), SetMode::Overwrite);

        assert!(store.commit(batch).await.is_err());
        assert_eq!(store.get(&a).await.unwrap().unwrap().data["name"], "old A");
        assert_eq!(store.get(&z).await.unwrap().unwrap().data["name"], "old Z");
        assert!(!dir.path().join("C").join("A.bak").exists());
        assert!(!dir.path().join("C").join("A.tmp").exists());
        assert!(!dir.path().join("C").join("Z.tmp").exists());
    }

    #[tokio::test]
    async fn test_successful_batch_leaves_no_side_files() {
        let dir = TempDir::new().unwrap();
        let store = FileRemoteStore::open(dir.path()).await.unwrap();
        let a = DocumentRef::new("C", "A");
        store.set(&a, name("old A"), SetMode::Overwrite).await.unwrap();

        let mut batch = WriteBatch::new();
        batch
            .set(a.clone(), name("new A"), SetMode::Overwrite)
            .set(DocumentRef::new("C", "B"), name("B"), SetMode::Overwrite);
        store.commit(batch).await.unwrap();

        let mut files: Vec<_> = std::fs::read_dir(dir.path().join("C"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        files.sort();
        assert_eq!(files, vec!["A.json", "B.json"]);
        assert_eq!(store.get(&a).await.unwrap().unwrap().data["name"], "new A");
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileRemoteStore::open(dir.path()).await.unwrap();
        let doc = store.add("EditCallNumber", name("A")).await.unwrap();

        store.delete(&doc).await.unwrap();
        store.delete(&doc).await.unwrap();
        assert!(store.get(&doc).await.unwrap().is_none());
    }
}
