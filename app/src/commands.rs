//! Command handlers for the registry front end
//!
//! Each handler drives the engine or reconciler and returns a camelCase DTO.
//! Validation problems come back with their own message; unexpected faults
//! are logged and reported as a generic failure.

use crate::state::AppState;
use chrono::Utc;
use member_import::{ExportKind, FailedRecord, ImportError, ImportKind};
use registry_model::{
    Collection, LifeStatus, Listed, Member, MemberRecord, RegistryStats, WorkingSet,
};
use registry_sync::{
    FallbackReason, InitSource, NewMember, PullOutcome, PushOutcome, SyncError, SyncStatusInfo,
    WriteOutcome,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub type CommandResult<T> = Result<T, String>;

// =============================================================================
// DTOs
// =============================================================================

/// One record as shown in a list view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRowDto {
    pub collection: Collection,
    /// `<area>_<index>`
    pub unique_id: String,
    pub area: String,
    pub index: usize,
    pub name: String,
    pub id: String,
    pub call_number: String,
    pub status: String,
}

impl MemberRowDto {
    fn from_listed<R: MemberRecord>(listed: &Listed<'_, R>, status: &str) -> Self {
        let member = listed.record.member();
        Self {
            collection: R::COLLECTION,
            unique_id: listed.unique_id(),
            area: listed.area.to_string(),
            index: listed.index,
            name: member.name.clone(),
            id: member.id.clone(),
            call_number: member.call_number.clone(),
            status: status.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResultDto {
    pub loaded: bool,
    pub reason: Option<String>,
    pub stats: RegistryStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResultDto {
    /// `remote`, `localCache` or `empty`
    pub source: String,
    pub stats: RegistryStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResultDto {
    pub pushed: bool,
    pub written: usize,
    pub saved_locally: bool,
    pub reason: Option<String>,
}

impl From<PushOutcome> for SaveResultDto {
    fn from(outcome: PushOutcome) -> Self {
        match outcome {
            PushOutcome::Pushed { written } => Self {
                pushed: true,
                written,
                saved_locally: false,
                reason: None,
            },
            PushOutcome::SavedLocally { reason, cached } => Self {
                pushed: false,
                written: 0,
                saved_locally: cached,
                reason: Some(match reason {
                    FallbackReason::Offline => "offline".to_string(),
                    FallbackReason::RemoteFailed(e) => e,
                }),
            },
        }
    }
}

/// Result of a single-record write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResultDto {
    pub synced: bool,
    /// Set when the change only exists locally for now
    pub message: Option<String>,
}

impl From<WriteOutcome> for WriteResultDto {
    fn from(outcome: WriteOutcome) -> Self {
        match outcome {
            WriteOutcome::Synced => Self {
                synced: true,
                message: None,
            },
            WriteOutcome::Failed { reason } => Self {
                synced: false,
                message: Some(format!("Saved locally, will sync when online ({reason})")),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneEditDto {
    pub old_number: String,
    pub new_number: String,
    pub edited_by: String,
    pub write: WriteResultDto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateDto {
    pub old_status: LifeStatus,
    pub new_status: LifeStatus,
    pub changed_by: String,
    pub write: WriteResultDto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResultDto {
    pub imported_count: usize,
    pub skipped_count: usize,
    pub failed_records: Vec<FailedRecord>,
    pub committed: bool,
    pub commit_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResultDto {
    pub path: String,
    pub count: usize,
}

/// Fields for a manually added member
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberInput {
    pub name: String,
    pub id: String,
    pub call_number: String,
    pub cwac_area: String,
    /// Only used for the status collection; defaults to ALIVE
    pub status: Option<String>,
}

// =============================================================================
// Error mapping
// =============================================================================

fn sync_failure(action: &str, err: SyncError) -> String {
    match err {
        SyncError::Model(e) => e.to_string(),
        SyncError::Offline => err.to_string(),
        other => {
            tracing::error!(action, error = %other, "operation failed");
            format!("{action} failed")
        }
    }
}

fn import_failure(action: &str, err: ImportError) -> String {
    match err {
        ImportError::Sync(e) => sync_failure(action, e),
        ImportError::Io(_) | ImportError::Csv(_) => {
            tracing::error!(action, error = %err, "operation failed");
            format!("{action} failed")
        }
        other => other.to_string(),
    }
}

// =============================================================================
// Sync commands
// =============================================================================

/// Pull from the remote store, falling back to the local cache
pub async fn initialize(state: &AppState) -> CommandResult<InitResultDto> {
    let source = state
        .engine
        .initialize()
        .await
        .map_err(|e| sync_failure("initialize", e))?;
    let source = match source {
        InitSource::Remote => "remote",
        InitSource::LocalCache => "localCache",
        InitSource::Empty => "empty",
    };
    Ok(InitResultDto {
        source: source.to_string(),
        stats: state.engine.stats().await,
    })
}

/// Explicit pull; the working set is untouched on failure
pub async fn load_registry(state: &AppState) -> CommandResult<LoadResultDto> {
    let outcome = state
        .engine
        .load_all()
        .await
        .map_err(|e| sync_failure("load", e))?;
    let stats = state.engine.stats().await;
    Ok(match outcome {
        PullOutcome::Loaded(stats) => LoadResultDto {
            loaded: true,
            reason: None,
            stats,
        },
        PullOutcome::Failed { reason } => LoadResultDto {
            loaded: false,
            reason: Some(reason),
            stats,
        },
    })
}

pub async fn save_registry(state: &AppState) -> CommandResult<SaveResultDto> {
    state
        .engine
        .save_all()
        .await
        .map(SaveResultDto::from)
        .map_err(|e| sync_failure("save", e))
}

/// Push when reachable, otherwise keep a local copy
pub async fn sync_now(state: &AppState) -> CommandResult<SaveResultDto> {
    state
        .engine
        .auto_sync()
        .await
        .map(SaveResultDto::from)
        .map_err(|e| sync_failure("sync", e))
}

/// Flip the connectivity flag and let the engine react to the transition
pub async fn set_online(state: &AppState, online: bool) -> CommandResult<Option<SaveResultDto>> {
    let Some(event) = state.engine.connectivity().set_online(online) else {
        return Ok(None);
    };
    state
        .engine
        .on_connectivity(event)
        .await
        .map(|outcome| outcome.map(SaveResultDto::from))
        .map_err(|e| sync_failure("connectivity change", e))
}

pub async fn get_sync_status(state: &AppState) -> SyncStatusInfo {
    state.engine.status_info().await
}

// =============================================================================
// Listing and search
// =============================================================================

pub async fn get_stats(state: &AppState) -> RegistryStats {
    state.engine.stats().await
}

fn rows_of(
    ws: &WorkingSet,
    collection: Collection,
    area: Option<&str>,
    status: Option<LifeStatus>,
) -> Vec<MemberRowDto> {
    match collection {
        Collection::Paid => ws
            .paid
            .records()
            .filter(|(a, _, _)| area.map_or(true, |wanted| *a == wanted))
            .map(|(area, index, record)| {
                let listed = Listed {
                    area,
                    index,
                    record,
                };
                MemberRowDto::from_listed(&listed, record.status().as_str())
            })
            .collect(),
        Collection::Unpaid => ws
            .list_unpaid(area)
            .iter()
            .map(|listed| MemberRowDto::from_listed(listed, listed.record.status().as_str()))
            .collect(),
        Collection::Status => ws
            .list_status(area, status)
            .iter()
            .map(|listed| MemberRowDto::from_listed(listed, listed.record.status.as_str()))
            .collect(),
    }
}

/// List one collection, optionally narrowed to an area and (for status) a life status
pub async fn list_members(
    state: &AppState,
    collection: Collection,
    area: Option<&str>,
    status: Option<&str>,
) -> CommandResult<Vec<MemberRowDto>> {
    let status = status
        .map(LifeStatus::parse)
        .transpose()
        .map_err(|e| e.to_string())?;
    let ws = state.engine.working_set().await;
    Ok(rows_of(&ws, collection, area, status))
}

/// Case-insensitive match on name or id across every collection
pub async fn search_members(state: &AppState, term: &str) -> Vec<MemberRowDto> {
    let found = state.engine.search(term).await;
    Collection::ALL
        .into_iter()
        .flat_map(|collection| rows_of(&found, collection, None, None))
        .collect()
}

// =============================================================================
// Edits
// =============================================================================

pub async fn edit_phone(
    state: &AppState,
    area: &str,
    index: usize,
    number: &str,
) -> CommandResult<PhoneEditDto> {
    let outcome = state
        .engine
        .update_member_phone(area, index, number)
        .await
        .map_err(|e| sync_failure("phone edit", e))?;
    Ok(PhoneEditDto {
        old_number: outcome.edit.old_number,
        new_number: outcome.edit.new_number,
        edited_by: outcome.edit.edited_by,
        write: outcome.write.into(),
    })
}

pub async fn set_status(
    state: &AppState,
    area: &str,
    index: usize,
    status: &str,
) -> CommandResult<StatusUpdateDto> {
    let new_status = LifeStatus::parse(status).map_err(|e| e.to_string())?;
    let outcome = state
        .engine
        .update_member_status(area, index, new_status)
        .await
        .map_err(|e| sync_failure("status update", e))?;
    Ok(StatusUpdateDto {
        old_status: outcome.change.old_status,
        new_status: outcome.change.new_status,
        changed_by: outcome.change.changed_by,
        write: outcome.write.into(),
    })
}

pub async fn add_member(
    state: &AppState,
    collection: Collection,
    input: AddMemberInput,
) -> CommandResult<WriteResultDto> {
    let member = Member::new(input.name, input.id, input.call_number, input.cwac_area);
    let new_member = match collection {
        Collection::Paid => NewMember::Paid(member),
        Collection::Unpaid => NewMember::Unpaid(member),
        Collection::Status => {
            NewMember::Status(member, LifeStatus::parse_or_alive(input.status.as_deref()))
        }
    };
    state
        .engine
        .add_member(new_member)
        .await
        .map(WriteResultDto::from)
        .map_err(|e| sync_failure("add member", e))
}

pub async fn delete_member(
    state: &AppState,
    collection: Collection,
    area: &str,
    index: usize,
) -> CommandResult<WriteResultDto> {
    state
        .engine
        .delete_member(collection, area, index)
        .await
        .map(WriteResultDto::from)
        .map_err(|e| sync_failure("delete member", e))
}

// =============================================================================
// Import / export
// =============================================================================

pub async fn import_members(
    state: &AppState,
    kind: ImportKind,
    path: &Path,
) -> CommandResult<ImportResultDto> {
    let outcome = state
        .reconciler
        .import_file(&state.engine, kind, path)
        .await
        .map_err(|e| import_failure("import", e))?;
    let commit_error = match outcome.commit {
        WriteOutcome::Synced => None,
        WriteOutcome::Failed { reason } => Some(reason),
    };
    Ok(ImportResultDto {
        imported_count: outcome.report.imported_count,
        skipped_count: outcome.report.skipped_count,
        failed_records: outcome.report.failed_records,
        committed: commit_error.is_none(),
        commit_error,
    })
}

pub async fn export_members(
    state: &AppState,
    kind: ExportKind,
    dir: Option<&Path>,
) -> CommandResult<ExportResultDto> {
    let dir = dir.unwrap_or(&state.data_dir);
    let summary = member_import::export_to_dir(&state.engine, kind, dir, Utc::now().date_naive())
        .await
        .map_err(|e| import_failure("export", e))?;
    Ok(ExportResultDto {
        path: summary.path.display().to_string(),
        count: summary.count,
    })
}
