//! The sync engine.
//!
//! `SyncEngine` owns the session's [`WorkingSet`] and reconciles it with a
//! [`RemoteStore`], using a [`LocalCache`] as the durability backstop.
//!
//! # Operations
//!
//! - [`SyncEngine::load_all`]: replace the working set with the remote collections
//! - [`SyncEngine::save_all`]: upsert every record in one atomic batch
//! - [`SyncEngine::record_phone_edit`] / [`SyncEngine::record_status_update`]:
//!   incremental writes with history appended through array unions
//! - [`SyncEngine::commit_import`]: commit an import batch and swap in the
//!   staged collections only once the commit succeeds
//!
//! Expected failures come back as outcome values. Every public entry point
//! takes the same async mutex, so a pull can never interleave with a push.

use crate::cache::{has_pending, load_snapshot, save_snapshot, set_pending, LocalCache};
use crate::connectivity::{Connectivity, ConnectivityEvent};
use crate::documents::{
    collection_name, document_key, document_ref, paid_push_fields, phone_edit_fields,
    project_paid, project_status, project_unpaid, status_push_fields, status_update_fields,
    unpaid_push_fields, EditAuditEntry, EDIT_AUDIT_COLLECTION, PAID_COLLECTION,
    STATUS_COLLECTION, UNPAID_COLLECTION,
};
use crate::error::SyncResult;
use crate::remote::{DocumentRef, DocumentSnapshot, RemoteResult, RemoteStore, SetMode, WriteBatch};
use crate::status::{SyncPhase, SyncStatusInfo};
use chrono::{DateTime, Utc};
use registry_model::{
    validate_phone, AreaBuckets, Collection, LifeStatus, Member, MemberRecord, ModelError,
    PaidRecord, PhoneEdit, RegistryStats, Role, StatusChange, StatusRecord, UnpaidRecord,
    WorkingSet,
};
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};

/// Result of a full pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// The working set was replaced
    Loaded(RegistryStats),
    /// The remote store could not be read; the working set is untouched
    Failed { reason: String },
}

impl PullOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, PullOutcome::Loaded(_))
    }
}

/// Why a push ended up in the local cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The device was offline; the remote store was never contacted
    Offline,
    /// The remote store rejected or failed the batch
    RemoteFailed(String),
}

/// Result of a full push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Every record was upserted remotely
    Pushed { written: usize },
    /// Nothing reached the remote store; `cached` reports whether the local
    /// mirror was written
    SavedLocally { reason: FallbackReason, cached: bool },
}

/// Result of a single remote write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Synced,
    Failed { reason: String },
}

impl WriteOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, WriteOutcome::Synced)
    }

    fn offline() -> Self {
        WriteOutcome::Failed {
            reason: "offline".to_string(),
        }
    }
}

/// Where [`SyncEngine::initialize`] found its data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSource {
    Remote,
    LocalCache,
    Empty,
}

/// A phone edit to persist remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneEditRequest {
    pub area: String,
    pub index: usize,
    pub old_number: String,
    pub new_number: String,
    pub member_name: String,
    pub member_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Local edit plus the fate of its remote write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneEditOutcome {
    pub edit: PhoneEdit,
    pub write: WriteOutcome,
}

/// A status change to persist remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdateRequest {
    pub area: String,
    pub index: usize,
    pub old_status: LifeStatus,
    pub new_status: LifeStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdateOutcome {
    pub change: StatusChange,
    pub write: WriteOutcome,
}

/// A record entered by hand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewMember {
    Paid(Member),
    Unpaid(Member),
    Status(Member, LifeStatus),
}

impl NewMember {
    fn member_mut(&mut self) -> &mut Member {
        match self {
            NewMember::Paid(m) | NewMember::Unpaid(m) | NewMember::Status(m, _) => m,
        }
    }
}

/// Collections built by an import, waiting for the remote commit
#[derive(Debug, Clone, PartialEq)]
pub enum StagedImport {
    /// Replaces both dues collections
    Dues {
        paid: AreaBuckets<PaidRecord>,
        unpaid: AreaBuckets<UnpaidRecord>,
    },
    /// Replaces the status collection
    Status { status: AreaBuckets<StatusRecord> },
}

#[derive(Debug, Default)]
struct SyncTrack {
    phase: SyncPhase,
    last_sync: Option<DateTime<Utc>>,
}

/// Reconciles the working set with a remote store and a local cache
pub struct SyncEngine<R, C> {
    remote: R,
    cache: C,
    connectivity: Connectivity,
    role: Role,
    working_set: RwLock<WorkingSet>,
    track: RwLock<SyncTrack>,
    /// Serializes every public entry point
    op_lock: Mutex<()>,
}

impl<R: RemoteStore, C: LocalCache> SyncEngine<R, C> {
    pub fn new(remote: R, cache: C, connectivity: Connectivity, role: Role) -> Self {
        Self {
            remote,
            cache,
            connectivity,
            role,
            working_set: RwLock::new(WorkingSet::new()),
            track: RwLock::new(SyncTrack::default()),
            op_lock: Mutex::new(()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Read access to the working set
    pub async fn working_set(&self) -> RwLockReadGuard<'_, WorkingSet> {
        self.working_set.read().await
    }

    /// Owned copy of the working set
    pub async fn snapshot(&self) -> WorkingSet {
        self.working_set.read().await.clone()
    }

    pub async fn stats(&self) -> RegistryStats {
        self.working_set.read().await.stats()
    }

    /// Every collection filtered to records whose name or id contains `term`
    pub async fn search(&self, term: &str) -> WorkingSet {
        let ws = self.working_set.read().await;
        WorkingSet {
            paid: ws.paid.filter(term),
            unpaid: ws.unpaid.filter(term),
            status: ws.status.filter(term),
        }
    }

    pub async fn status_info(&self) -> SyncStatusInfo {
        let track = self.track.read().await;
        SyncStatusInfo::new(
            self.connectivity.is_online(),
            track.phase,
            track.last_sync,
            Utc::now(),
        )
    }

    // ========== Pull ==========

    /// Replace the working set with the contents of the three remote
    /// collections.
    ///
    /// A remote failure leaves the working set untouched and is reported as
    /// [`PullOutcome::Failed`]. A document that cannot be projected into a
    /// record is an error.
    pub async fn load_all(&self) -> SyncResult<PullOutcome> {
        let _op = self.op_lock.lock().await;
        self.pull().await
    }

    async fn pull(&self) -> SyncResult<PullOutcome> {
        if !self.connectivity.is_online() {
            tracing::warn!("offline, skipping remote load");
            return Ok(PullOutcome::Failed {
                reason: "offline".to_string(),
            });
        }

        self.set_phase(SyncPhase::InFlight).await;
        let (paid_docs, unpaid_docs, status_docs) = match self.fetch_all().await {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load from remote store");
                self.set_phase(SyncPhase::FailedFallback).await;
                return Ok(PullOutcome::Failed {
                    reason: e.to_string(),
                });
            }
        };

        let mut loaded = match project_all(&paid_docs, &unpaid_docs, &status_docs) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!(error = %e, "remote data could not be loaded");
                self.set_phase(SyncPhase::FailedFallback).await;
                return Err(e);
            }
        };
        loaded.sort_all();

        let stats = loaded.stats();
        *self.working_set.write().await = loaded.clone();
        self.mark_synced().await;
        if self.mirror(&loaded) {
            self.note_pending(false);
        }

        tracing::info!(
            paid = stats.total_paid,
            unpaid = stats.total_unpaid,
            status = stats.total_status,
            "loaded working set from remote store"
        );
        Ok(PullOutcome::Loaded(stats))
    }

    async fn fetch_all(
        &self,
    ) -> RemoteResult<(Vec<DocumentSnapshot>, Vec<DocumentSnapshot>, Vec<DocumentSnapshot>)> {
        let paid = self.remote.get_all(PAID_COLLECTION).await?;
        let unpaid = self.remote.get_all(UNPAID_COLLECTION).await?;
        let status = self.remote.get_all(STATUS_COLLECTION).await?;
        Ok((paid, unpaid, status))
    }

    // ========== Push ==========

    /// Upsert every record of the working set in one atomic batch.
    ///
    /// Offline, the remote store is not contacted and the working set goes to
    /// the local cache instead. A failed commit falls back the same way. The
    /// working set itself is never rolled back.
    pub async fn save_all(&self) -> SyncResult<PushOutcome> {
        let _op = self.op_lock.lock().await;
        Ok(self.push().await)
    }

    async fn push(&self) -> PushOutcome {
        let ws = self.working_set.read().await.clone();

        if !self.connectivity.is_online() {
            tracing::warn!("offline, saving working set locally");
            self.set_phase(SyncPhase::FailedFallback).await;
            let cached = self.fall_back(&ws);
            return PushOutcome::SavedLocally {
                reason: FallbackReason::Offline,
                cached,
            };
        }

        self.set_phase(SyncPhase::InFlight).await;
        let batch = push_batch(&ws, self.role, Utc::now().timestamp_millis());
        let written = batch.len();

        match self.remote.commit(batch).await {
            Ok(()) => {
                self.mark_synced().await;
                if self.mirror(&ws) {
                    self.note_pending(false);
                }
                tracing::info!(written, "working set pushed to remote store");
                PushOutcome::Pushed { written }
            }
            Err(e) => {
                tracing::warn!(error = %e, "push failed, saving working set locally");
                self.set_phase(SyncPhase::FailedFallback).await;
                let cached = self.fall_back(&ws);
                PushOutcome::SavedLocally {
                    reason: FallbackReason::RemoteFailed(e.to_string()),
                    cached,
                }
            }
        }
    }

    /// Push if reachable, otherwise save locally
    pub async fn auto_sync(&self) -> SyncResult<PushOutcome> {
        self.save_all().await
    }

    /// React to a reachability change.
    ///
    /// Coming back online triggers a push; losing the connection writes the
    /// local cache.
    pub async fn on_connectivity(&self, event: ConnectivityEvent) -> SyncResult<Option<PushOutcome>> {
        match event {
            ConnectivityEvent::BecameOnline => {
                tracing::info!("back online, syncing");
                self.auto_sync().await.map(Some)
            }
            ConnectivityEvent::BecameLost => {
                let _op = self.op_lock.lock().await;
                let ws = self.working_set.read().await.clone();
                self.mirror(&ws);
                Ok(None)
            }
        }
    }

    // ========== Startup ==========

    /// Load from the remote store, falling back to the local cache.
    ///
    /// A cache holding changes that never reached the remote store wins over
    /// the remote copy; the next push sends them.
    pub async fn initialize(&self) -> SyncResult<InitSource> {
        let _op = self.op_lock.lock().await;
        if has_pending(&self.cache)? && self.restore().await? {
            tracing::info!("local cache has unsynced changes, skipping remote load");
            return Ok(InitSource::LocalCache);
        }
        if self.pull().await?.is_loaded() {
            return Ok(InitSource::Remote);
        }
        if self.restore().await? {
            tracing::info!("loaded data from local cache");
            Ok(InitSource::LocalCache)
        } else {
            Ok(InitSource::Empty)
        }
    }

    /// Replace the working set with the cached snapshot, if there is one
    pub async fn restore_from_cache(&self) -> SyncResult<bool> {
        let _op = self.op_lock.lock().await;
        self.restore().await
    }

    async fn restore(&self) -> SyncResult<bool> {
        match load_snapshot(&self.cache)? {
            Some(snapshot) => {
                *self.working_set.write().await = snapshot.working_set;
                self.track.write().await.last_sync = snapshot.last_sync;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ========== Phone edits ==========

    /// Persist a phone edit that has already been applied locally.
    ///
    /// Writes one standalone audit document, then updates the unpaid record's
    /// call number and appends to its `editHistory` with an array union. If
    /// either write fails the whole edit is reported as failed; saving the
    /// local cache is then up to the caller.
    pub async fn record_phone_edit(&self, request: PhoneEditRequest) -> SyncResult<WriteOutcome> {
        let _op = self.op_lock.lock().await;
        self.write_phone_edit(&request).await
    }

    async fn write_phone_edit(&self, request: &PhoneEditRequest) -> SyncResult<WriteOutcome> {
        let doc = {
            let ws = self.working_set.read().await;
            let record = ws.unpaid.get(&request.area, request.index).ok_or_else(|| {
                ModelError::RecordNotFound {
                    collection: Collection::Unpaid.as_str(),
                    area: request.area.clone(),
                    index: request.index,
                }
            })?;
            let mut member = record.member.clone();
            if !member.has_id() {
                member.id = request.member_id.clone();
            }
            let key = document_key(
                &member,
                &request.area,
                request.index,
                request.timestamp.timestamp_millis(),
            );
            DocumentRef::new(UNPAID_COLLECTION, key)
        };

        if !self.connectivity.is_online() {
            return Ok(WriteOutcome::offline());
        }

        let audit = EditAuditEntry::new(
            &request.member_id,
            &request.member_name,
            &request.area,
            &request.old_number,
            &request.new_number,
            self.role,
            request.timestamp,
        );
        if let Err(e) = self.remote.add(EDIT_AUDIT_COLLECTION, audit.to_fields()).await {
            tracing::warn!(error = %e, member = %request.member_name, "failed to write edit audit");
            return Ok(WriteOutcome::Failed {
                reason: e.to_string(),
            });
        }

        let edit = PhoneEdit {
            old_number: request.old_number.clone(),
            new_number: request.new_number.clone(),
            timestamp: request.timestamp,
            edited_by: self.role.as_str().to_string(),
        };
        if let Err(e) = self.remote.update(&doc, phone_edit_fields(&edit)).await {
            tracing::warn!(error = %e, doc = %doc, "failed to update call number");
            return Ok(WriteOutcome::Failed {
                reason: e.to_string(),
            });
        }

        tracing::info!(
            member = %request.member_name,
            old = %request.old_number,
            new = %request.new_number,
            "phone number edit saved"
        );
        Ok(WriteOutcome::Synced)
    }

    /// Validate and apply a new call number to an unpaid record, then
    /// persist it. A failed remote write saves the local cache.
    pub async fn update_member_phone(
        &self,
        area: &str,
        index: usize,
        raw_number: &str,
    ) -> SyncResult<PhoneEditOutcome> {
        let new_number = validate_phone(raw_number)?;
        let _op = self.op_lock.lock().await;

        let (edit, request) = {
            let mut ws = self.working_set.write().await;
            let record = ws.unpaid.require_mut(area, index)?;
            let edit = record.apply_phone_edit(new_number, self.role, Utc::now());
            let request = PhoneEditRequest {
                area: area.to_string(),
                index,
                old_number: edit.old_number.clone(),
                new_number: edit.new_number.clone(),
                member_name: record.member.name.clone(),
                member_id: record.member.id.clone(),
                timestamp: edit.timestamp,
            };
            (edit, request)
        };

        let write = self.write_phone_edit(&request).await?;
        if !write.is_synced() {
            tracing::warn!("phone edit will sync when online");
            self.fall_back_current().await;
        }
        Ok(PhoneEditOutcome { edit, write })
    }

    // ========== Status updates ==========

    /// Persist a status change that has already been applied locally.
    ///
    /// Merge-writes the status document with one `statusHistory` entry
    /// appended. There is no standalone log for status changes.
    pub async fn record_status_update(
        &self,
        request: StatusUpdateRequest,
    ) -> SyncResult<WriteOutcome> {
        let _op = self.op_lock.lock().await;
        self.write_status_update(&request).await
    }

    async fn write_status_update(&self, request: &StatusUpdateRequest) -> SyncResult<WriteOutcome> {
        let change = StatusChange {
            old_status: request.old_status,
            new_status: request.new_status,
            timestamp: request.timestamp,
            changed_by: self.role.as_str().to_string(),
        };
        let (doc, fields) = {
            let ws = self.working_set.read().await;
            let record = ws.status.get(&request.area, request.index).ok_or_else(|| {
                ModelError::RecordNotFound {
                    collection: Collection::Status.as_str(),
                    area: request.area.clone(),
                    index: request.index,
                }
            })?;
            let doc = document_ref(
                Collection::Status,
                &record.member,
                &request.area,
                request.index,
                request.timestamp.timestamp_millis(),
            );
            (doc, status_update_fields(record, &request.area, &change))
        };

        if !self.connectivity.is_online() {
            return Ok(WriteOutcome::offline());
        }

        match self.remote.set(&doc, fields, SetMode::Merge).await {
            Ok(()) => {
                tracing::info!(doc = %doc, status = %request.new_status, "status update saved");
                Ok(WriteOutcome::Synced)
            }
            Err(e) => {
                tracing::warn!(error = %e, doc = %doc, "failed to save status update");
                Ok(WriteOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Apply a new status to a status record, then persist it. A failed
    /// remote write saves the local cache.
    pub async fn update_member_status(
        &self,
        area: &str,
        index: usize,
        new_status: LifeStatus,
    ) -> SyncResult<StatusUpdateOutcome> {
        let _op = self.op_lock.lock().await;

        let change = {
            let mut ws = self.working_set.write().await;
            ws.status
                .require_mut(area, index)?
                .apply_status_change(new_status, self.role, Utc::now())
        };
        let request = StatusUpdateRequest {
            area: area.to_string(),
            index,
            old_status: change.old_status,
            new_status: change.new_status,
            timestamp: change.timestamp,
        };

        let write = self.write_status_update(&request).await?;
        if !write.is_synced() {
            tracing::warn!("status saved locally - will sync when online");
            self.fall_back_current().await;
        }
        Ok(StatusUpdateOutcome { change, write })
    }

    // ========== Manual add / delete ==========

    /// Add one record by hand.
    ///
    /// Name and area are required and the call number must be valid. The
    /// record is inserted into its area, which is re-sorted, then upserted
    /// remotely; a failed write saves the local cache.
    pub async fn add_member(&self, mut new_member: NewMember) -> SyncResult<WriteOutcome> {
        {
            let member = new_member.member_mut();
            member.name = member.name.trim().to_string();
            member.id = member.id.trim().to_string();
            member.cwac_area = member.cwac_area.trim().to_string();
            if member.name.is_empty() {
                return Err(ModelError::MissingField("name").into());
            }
            if member.cwac_area.is_empty() {
                return Err(ModelError::MissingField("cwacArea").into());
            }
            member.call_number = validate_phone(&member.call_number)?;
        }

        let _op = self.op_lock.lock().await;
        let now_ms = Utc::now().timestamp_millis();

        let (doc, fields) = {
            let mut ws = self.working_set.write().await;
            match new_member {
                NewMember::Paid(member) => {
                    let area = member.cwac_area.clone();
                    let record = PaidRecord::new(member);
                    let index = insert_sorted(&mut ws.paid, record.clone());
                    (
                        document_ref(Collection::Paid, &record.member, &area, index, now_ms),
                        paid_push_fields(&record, &area, index, self.role),
                    )
                }
                NewMember::Unpaid(member) => {
                    let area = member.cwac_area.clone();
                    let record = UnpaidRecord::new(member);
                    let index = insert_sorted(&mut ws.unpaid, record.clone());
                    (
                        document_ref(Collection::Unpaid, &record.member, &area, index, now_ms),
                        unpaid_push_fields(&record, &area, index, self.role),
                    )
                }
                NewMember::Status(member, status) => {
                    let area = member.cwac_area.clone();
                    let record = StatusRecord::new(member, status);
                    let index = insert_sorted(&mut ws.status, record.clone());
                    (
                        document_ref(Collection::Status, &record.member, &area, index, now_ms),
                        status_push_fields(&record, &area, self.role),
                    )
                }
            }
        };

        let write = if self.connectivity.is_online() {
            match self.remote.set(&doc, fields, SetMode::Merge).await {
                Ok(()) => WriteOutcome::Synced,
                Err(e) => WriteOutcome::Failed {
                    reason: e.to_string(),
                },
            }
        } else {
            WriteOutcome::offline()
        };

        match &write {
            WriteOutcome::Synced => tracing::info!(doc = %doc, "member added"),
            WriteOutcome::Failed { reason } => {
                tracing::warn!(doc = %doc, %reason, "member added locally only");
                self.fall_back_current().await;
            }
        }
        Ok(write)
    }

    /// Delete one record locally and remotely (admin only).
    ///
    /// The remote delete happens first; the record is only removed from the
    /// working set once it succeeds. Records without an id have no stable
    /// remote document and cannot be deleted.
    pub async fn delete_member(
        &self,
        collection: Collection,
        area: &str,
        index: usize,
    ) -> SyncResult<WriteOutcome> {
        self.role.require_admin("delete")?;
        let _op = self.op_lock.lock().await;

        let member = {
            let ws = self.working_set.read().await;
            let member = match collection {
                Collection::Paid => ws.paid.get(area, index).map(|r| r.member.clone()),
                Collection::Unpaid => ws.unpaid.get(area, index).map(|r| r.member.clone()),
                Collection::Status => ws.status.get(area, index).map(|r| r.member.clone()),
            };
            member.ok_or_else(|| ModelError::RecordNotFound {
                collection: collection.as_str(),
                area: area.to_string(),
                index,
            })?
        };

        if !member.has_id() {
            return Ok(WriteOutcome::Failed {
                reason: "record has no id".to_string(),
            });
        }
        if !self.connectivity.is_online() {
            return Ok(WriteOutcome::offline());
        }

        let doc = DocumentRef::new(collection_name(collection), member.id.clone());
        if let Err(e) = self.remote.delete(&doc).await {
            tracing::warn!(error = %e, doc = %doc, "failed to delete member");
            return Ok(WriteOutcome::Failed {
                reason: e.to_string(),
            });
        }

        {
            let mut ws = self.working_set.write().await;
            match collection {
                Collection::Paid => ws.paid.remove(area, index).map(|_| ()),
                Collection::Unpaid => ws.unpaid.remove(area, index).map(|_| ()),
                Collection::Status => ws.status.remove(area, index).map(|_| ()),
            };
        }
        self.mirror_current().await;
        tracing::info!(doc = %doc, "member deleted");
        Ok(WriteOutcome::Synced)
    }

    // ========== Import ==========

    /// Commit an import batch and, on success, swap in the staged collections.
    ///
    /// If the commit fails (or the device is offline) the working set and the
    /// remote store both keep their previous contents.
    pub async fn commit_import(
        &self,
        staged: StagedImport,
        batch: WriteBatch,
    ) -> SyncResult<WriteOutcome> {
        self.role.require_admin("import")?;
        let _op = self.op_lock.lock().await;

        if !self.connectivity.is_online() {
            tracing::warn!("offline, import not committed");
            return Ok(WriteOutcome::offline());
        }

        self.set_phase(SyncPhase::InFlight).await;
        let writes = batch.len();
        if let Err(e) = self.remote.commit(batch).await {
            tracing::warn!(error = %e, "import commit failed, working set unchanged");
            self.set_phase(SyncPhase::FailedFallback).await;
            return Ok(WriteOutcome::Failed {
                reason: e.to_string(),
            });
        }

        let ws = {
            let mut ws = self.working_set.write().await;
            match staged {
                StagedImport::Dues {
                    mut paid,
                    mut unpaid,
                } => {
                    paid.sort_by_name();
                    unpaid.sort_by_name();
                    ws.paid = paid;
                    ws.unpaid = unpaid;
                }
                StagedImport::Status { mut status } => {
                    status.sort_by_name();
                    ws.status = status;
                }
            }
            ws.clone()
        };
        self.mark_synced().await;
        self.mirror(&ws);
        tracing::info!(writes, "import committed");
        Ok(WriteOutcome::Synced)
    }

    // ========== Helpers ==========

    /// Save a working set to the local cache; failures are logged, not raised
    fn mirror(&self, ws: &WorkingSet) -> bool {
        match save_snapshot(&self.cache, ws, Utc::now()) {
            Ok(()) => {
                tracing::debug!("working set saved to local cache");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not save to local cache");
                false
            }
        }
    }

    async fn mirror_current(&self) -> bool {
        let ws = self.working_set.read().await.clone();
        self.mirror(&ws)
    }

    /// Mirror a working set the remote store has not seen and flag it unsynced
    fn fall_back(&self, ws: &WorkingSet) -> bool {
        let cached = self.mirror(ws);
        if cached {
            self.note_pending(true);
        }
        cached
    }

    async fn fall_back_current(&self) -> bool {
        let ws = self.working_set.read().await.clone();
        self.fall_back(&ws)
    }

    fn note_pending(&self, pending: bool) {
        if let Err(e) = set_pending(&self.cache, pending) {
            tracing::warn!(error = %e, pending, "could not record unsynced state");
        }
    }

    async fn set_phase(&self, phase: SyncPhase) {
        self.track.write().await.phase = phase;
    }

    async fn mark_synced(&self) {
        let mut track = self.track.write().await;
        track.phase = SyncPhase::Succeeded;
        track.last_sync = Some(Utc::now());
    }
}

fn project_all(
    paid: &[DocumentSnapshot],
    unpaid: &[DocumentSnapshot],
    status: &[DocumentSnapshot],
) -> SyncResult<WorkingSet> {
    Ok(WorkingSet {
        paid: paid.iter().map(project_paid).collect::<SyncResult<_>>()?,
        unpaid: unpaid.iter().map(project_unpaid).collect::<SyncResult<_>>()?,
        status: status.iter().map(project_status).collect::<SyncResult<_>>()?,
    })
}

/// Insert a record and re-sort its area; returns the record's new index
fn insert_sorted<R: MemberRecord + PartialEq>(buckets: &mut AreaBuckets<R>, record: R) -> usize {
    let area = record.area().to_string();
    buckets.insert(record.clone());
    buckets.sort_area(&area);
    buckets
        .area(&area)
        .iter()
        .position(|r| *r == record)
        .unwrap_or(0)
}

/// One merge-upsert per record of the working set
fn push_batch(ws: &WorkingSet, role: Role, now_ms: i64) -> WriteBatch {
    let mut batch = WriteBatch::new();
    for (area, index, record) in ws.paid.records() {
        batch.set(
            document_ref(Collection::Paid, &record.member, area, index, now_ms),
            paid_push_fields(record, area, index, role),
            SetMode::Merge,
        );
    }
    for (area, index, record) in ws.unpaid.records() {
        batch.set(
            document_ref(Collection::Unpaid, &record.member, area, index, now_ms),
            unpaid_push_fields(record, area, index, role),
            SetMode::Merge,
        );
    }
    for (area, index, record) in ws.status.records() {
        batch.set(
            document_ref(Collection::Status, &record.member, area, index, now_ms),
            status_push_fields(record, area, role),
            SetMode::Merge,
        );
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, LAST_SYNC_KEY};
    use crate::memory_remote::MemoryRemoteStore;
    use crate::SyncError;

    fn engine(online: bool, role: Role) -> SyncEngine<MemoryRemoteStore, MemoryCache> {
        SyncEngine::new(
            MemoryRemoteStore::new(),
            MemoryCache::new(),
            Connectivity::new(online),
            role,
        )
    }

    fn status_import(names: &[&str]) -> StagedImport {
        StagedImport::Status {
            status: names
                .iter()
                .map(|n| StatusRecord::new(Member::new(*n, *n, "977000000", "A"), LifeStatus::Alive))
                .collect(),
        }
    }

    #[test]
    fn test_push_batch_uses_ids_and_synthetic_keys() {
        let mut ws = WorkingSet::new();
        ws.paid
            .insert(PaidRecord::new(Member::new("Amy", "ID1", "977000001", "A")));
        ws.unpaid
            .insert(UnpaidRecord::new(Member::new("Bob", "", "977000002", "B")));

        let batch = push_batch(&ws, Role::Admin, 42);
        let keys: Vec<_> = batch.writes().iter().map(|w| w.doc().to_string()).collect();
        assert_eq!(keys, vec!["PaidMembers/ID1", "UnpaidMembers/B_0_42"]);
    }

    #[tokio::test]
    async fn test_pull_failure_leaves_working_set() {
        let engine = engine(true, Role::Admin);
        engine
            .add_member(NewMember::Paid(Member::new("Amy", "ID1", "977000001", "A")))
            .await
            .unwrap();

        engine.remote().set_available(false);
        let outcome = engine.load_all().await.unwrap();
        assert!(matches!(outcome, PullOutcome::Failed { .. }));
        assert_eq!(engine.stats().await.total_paid, 1);
        assert_eq!(engine.status_info().await.phase, SyncPhase::FailedFallback);
    }

    #[tokio::test]
    async fn test_import_requires_admin() {
        let engine = engine(true, Role::Viewer);
        let result = engine.commit_import(status_import(&["A"]), WriteBatch::new()).await;
        assert!(matches!(
            result,
            Err(SyncError::Model(ModelError::PermissionDenied { .. }))
        ));
    }

    #[tokio::test]
    async fn test_failed_import_commit_keeps_working_set() {
        let engine = engine(true, Role::Admin);
        engine
            .add_member(NewMember::Status(
                Member::new("Old", "ID9", "977000009", "A"),
                LifeStatus::Alive,
            ))
            .await
            .unwrap();

        engine.remote().fail_writes_to(STATUS_COLLECTION).await;
        let mut batch = WriteBatch::new();
        batch.set(
            DocumentRef::new(STATUS_COLLECTION, "New"),
            Default::default(),
            SetMode::Merge,
        );
        let outcome = engine
            .commit_import(status_import(&["New"]), batch)
            .await
            .unwrap();

        assert!(!outcome.is_synced());
        let ws = engine.snapshot().await;
        assert_eq!(ws.status.area("A")[0].member.name, "Old");
    }

    #[tokio::test]
    async fn test_successful_import_swaps_and_sorts() {
        let engine = engine(true, Role::Admin);
        let outcome = engine
            .commit_import(status_import(&["zed", "Amy", "bob"]), WriteBatch::new())
            .await
            .unwrap();

        assert!(outcome.is_synced());
        let names: Vec<_> = engine
            .snapshot()
            .await
            .status
            .area("A")
            .iter()
            .map(|r| r.member.name.clone())
            .collect();
        assert_eq!(names, vec!["Amy", "bob", "zed"]);
        assert_eq!(engine.cache().writes_to(LAST_SYNC_KEY), 1);
    }

    #[tokio::test]
    async fn test_add_member_validates() {
        let engine = engine(true, Role::Viewer);
        let err = engine
            .add_member(NewMember::Paid(Member::new("Amy", "ID1", "0977000001", "A")))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Model(ModelError::PhoneLength { .. })));

        let err = engine
            .add_member(NewMember::Paid(Member::new(" ", "ID1", "977000001", "A")))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Model(ModelError::MissingField("name"))));
        assert!(engine.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_member_offline_saves_locally() {
        let engine = engine(false, Role::Viewer);
        let outcome = engine
            .add_member(NewMember::Unpaid(Member::new("Amy", "ID1", "977-000-001", "A")))
            .await
            .unwrap();

        assert!(!outcome.is_synced());
        assert_eq!(engine.remote().operation_count(), 0);
        assert_eq!(engine.cache().writes_to(LAST_SYNC_KEY), 1);
        let ws = engine.snapshot().await;
        assert_eq!(ws.unpaid.area("A")[0].member.call_number, "977000001");
    }

    #[tokio::test]
    async fn test_delete_member() {
        let engine = engine(true, Role::Admin);
        engine
            .add_member(NewMember::Paid(Member::new("Amy", "ID1", "977000001", "A")))
            .await
            .unwrap();

        let outcome = engine.delete_member(Collection::Paid, "A", 0).await.unwrap();
        assert!(outcome.is_synced());
        assert!(engine.snapshot().await.paid.is_empty());
        assert!(engine.remote().collection(PAID_COLLECTION).await.is_empty());
    }

    #[tokio::test]
    async fn test_viewer_cannot_delete() {
        let engine = engine(true, Role::Viewer);
        assert!(engine.delete_member(Collection::Paid, "A", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_initialize_falls_back_to_cache() {
        let engine = engine(true, Role::Admin);
        engine
            .add_member(NewMember::Paid(Member::new("Amy", "ID1", "977000001", "A")))
            .await
            .unwrap();
        engine.save_all().await.unwrap();

        let cache = MemoryCache::new();
        save_snapshot(&cache, &engine.snapshot().await, Utc::now()).unwrap();
        let remote = MemoryRemoteStore::new();
        remote.set_available(false);
        let restarted = SyncEngine::new(remote, cache, Connectivity::new(true), Role::Admin);

        assert_eq!(restarted.initialize().await.unwrap(), InitSource::LocalCache);
        assert_eq!(restarted.stats().await.total_paid, 1);
        assert!(restarted.status_info().await.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_initialize_keeps_unsynced_local_edits() {
        let engine = engine(true, Role::Admin);
        engine
            .add_member(NewMember::Unpaid(Member::new("Amy", "ID1", "977123456", "A")))
            .await
            .unwrap();
        assert_eq!(engine.initialize().await.unwrap(), InitSource::Remote);

        engine.connectivity().set_online(false);
        let outcome = engine.update_member_phone("A", 0, "966000001").await.unwrap();
        assert!(!outcome.write.is_synced());
        assert!(has_pending(engine.cache()).unwrap());

        engine.connectivity().set_online(true);
        assert_eq!(engine.initialize().await.unwrap(), InitSource::LocalCache);
        assert_eq!(
            engine.snapshot().await.unpaid.area("A")[0].member.call_number,
            "966000001"
        );

        let pushed = engine.save_all().await.unwrap();
        assert!(matches!(pushed, PushOutcome::Pushed { .. }));
        assert!(!has_pending(engine.cache()).unwrap());
        let doc = engine.remote().document(UNPAID_COLLECTION, "ID1").await.unwrap();
        assert_eq!(doc["callNumber"], "966000001");

        assert_eq!(engine.initialize().await.unwrap(), InitSource::Remote);
        assert_eq!(
            engine.snapshot().await.unpaid.area("A")[0].member.call_number,
            "966000001"
        );
    }

    #[tokio::test]
    async fn test_initialize_with_nothing() {
        let engine = engine(false, Role::Admin);
        assert_eq!(engine.initialize().await.unwrap(), InitSource::Empty);
    }

    #[tokio::test]
    async fn test_became_online_pushes() {
        let engine = engine(false, Role::Admin);
        engine
            .add_member(NewMember::Paid(Member::new("Amy", "ID1", "977000001", "A")))
            .await
            .unwrap();

        let event = engine.connectivity().set_online(true).unwrap();
        let outcome = engine.on_connectivity(event).await.unwrap();
        assert_eq!(outcome, Some(PushOutcome::Pushed { written: 1 }));
        assert_eq!(engine.remote().collection(PAID_COLLECTION).await.len(), 1);
    }
}
