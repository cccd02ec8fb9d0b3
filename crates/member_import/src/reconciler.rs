//! Import reconciliation.
//!
//! The reconciler turns raw CSV lines into records staged for one or two
//! registry collections plus the remote batch that persists them. Each row
//! runs through the same checks in order, and the first failing check sends
//! it to the failed-records list:
//!
//! 1. column count (5 for dues imports, 4 for status imports)
//! 2. call number: 9 digits after stripping non-digits, not starting with `0`
//! 3. status token: `PAID`/`UNPAID` for dues imports; status imports default
//!    a missing or unknown token to `ALIVE`
//!
//! An import replaces the target collections wholesale. The replacement is
//! staged and only swapped into the working set once the remote batch has
//! been committed.

use crate::chunked::{read_lines, DEFAULT_CHUNK_SIZE};
use crate::rows::split_row;
use crate::{ImportError, ImportResult};
use chrono::{DateTime, Utc};
use registry_model::{
    digits_only, validate_phone, AreaBuckets, Collection, DuesStatus, LifeStatus, Member,
    PaidRecord, Role, StatusRecord, UnpaidRecord,
};
use registry_sync::documents::{
    document_ref, dues_import_fields, import_batch_id, status_import_fields,
};
use registry_sync::{
    LocalCache, RemoteStore, SetMode, StagedImport, SyncEngine, WriteBatch, WriteOutcome,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Which collections an import replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    /// Paid and unpaid members
    Dues,
    /// Alive/deceased status
    LifeStatus,
}

impl ImportKind {
    /// Fewest columns a data row may have
    pub fn min_columns(&self) -> usize {
        match self {
            ImportKind::Dues => 5,
            ImportKind::LifeStatus => 4,
        }
    }
}

/// Why a row was not imported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    #[serde(rename = "Insufficient columns")]
    InsufficientColumns,
    #[serde(rename = "Invalid phone number")]
    InvalidPhoneNumber,
    #[serde(rename = "Invalid status")]
    InvalidStatus,
    #[serde(rename = "Duplicate id")]
    DuplicateId,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InsufficientColumns => "Insufficient columns",
            FailureReason::InvalidPhoneNumber => "Invalid phone number",
            FailureReason::InvalidStatus => "Invalid status",
            FailureReason::DuplicateId => "Duplicate id",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row that was rejected, with enough detail for an operator to fix it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRecord {
    /// 1-based line number; the header is row 1
    pub row: usize,
    /// Raw line, kept when the row could not be split into fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwac_area: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub reason: FailureReason,
    /// Cleaned digits offered for a rejected call number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

impl FailedRecord {
    fn raw(row: usize, line: &str, reason: FailureReason) -> Self {
        Self {
            row,
            data: Some(line.to_string()),
            name: None,
            id: None,
            call_number: None,
            cwac_area: None,
            status: None,
            reason,
            suggested_fix: None,
        }
    }

    fn fields(row: usize, fields: &RowFields, call_number: &str, reason: FailureReason) -> Self {
        Self {
            row,
            data: None,
            name: Some(fields.name.clone()),
            id: Some(fields.id.clone()),
            call_number: Some(call_number.to_string()),
            cwac_area: Some(fields.area.clone()),
            status: fields.status.clone(),
            reason,
            suggested_fix: None,
        }
    }
}

/// Summary of one import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported_count: usize,
    pub skipped_count: usize,
    pub failed_records: Vec<FailedRecord>,
}

/// What to do when one import holds the same id twice in a collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateIdPolicy {
    /// Keep every row locally; the last one wins remotely
    #[default]
    Allow,
    /// Keep the first row, reject later ones
    Reject,
    /// Keep the last row, reject earlier ones
    KeepLast,
}

/// Staged result of reconciling rows, ready to commit
#[derive(Debug, Clone, PartialEq)]
pub struct ImportPlan {
    pub report: ImportReport,
    pub staged: StagedImport,
    pub batch: WriteBatch,
}

/// Report plus the fate of the remote commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub report: ImportReport,
    pub commit: WriteOutcome,
}

struct RowFields {
    name: String,
    id: String,
    raw_phone: String,
    area: String,
    status: Option<String>,
}

impl RowFields {
    fn from_columns(columns: &[String]) -> Self {
        Self {
            name: columns[0].clone(),
            id: columns[1].clone(),
            raw_phone: columns[2].clone(),
            area: columns[3].clone(),
            status: columns
                .get(4)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_ascii_uppercase()),
        }
    }

    fn member(&self, call_number: String) -> Member {
        Member::new(&self.name, &self.id, call_number, &self.area)
    }
}

enum Accepted {
    Paid(Member),
    Unpaid(Member),
    Status(Member, LifeStatus),
}

impl Accepted {
    fn collection(&self) -> Collection {
        match self {
            Accepted::Paid(_) => Collection::Paid,
            Accepted::Unpaid(_) => Collection::Unpaid,
            Accepted::Status(..) => Collection::Status,
        }
    }

    fn member(&self) -> &Member {
        match self {
            Accepted::Paid(m) | Accepted::Unpaid(m) | Accepted::Status(m, _) => m,
        }
    }

    fn status_token(&self) -> &'static str {
        match self {
            Accepted::Paid(_) => DuesStatus::Paid.as_str(),
            Accepted::Unpaid(_) => DuesStatus::Unpaid.as_str(),
            Accepted::Status(_, status) => status.as_str(),
        }
    }
}

/// Validates import rows and drives the bulk write
#[derive(Debug, Clone)]
pub struct ImportReconciler {
    duplicate_policy: DuplicateIdPolicy,
    chunk_size: usize,
}

impl Default for ImportReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportReconciler {
    pub fn new() -> Self {
        Self {
            duplicate_policy: DuplicateIdPolicy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicateIdPolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn duplicate_policy(&self) -> DuplicateIdPolicy {
        self.duplicate_policy
    }

    /// Classify `rows` (header first) and build the staged collections and
    /// remote batch. Pure: nothing is written anywhere.
    pub fn reconcile(
        &self,
        kind: ImportKind,
        rows: &[String],
        role: Role,
        now: DateTime<Utc>,
    ) -> ImportPlan {
        let mut accepted: Vec<(usize, Accepted)> = Vec::new();
        let mut failed: Vec<FailedRecord> = Vec::new();

        for (i, line) in rows.iter().enumerate().skip(1) {
            let row = i + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match classify(kind, row, line) {
                Ok(record) => accepted.push((row, record)),
                Err(failure) => {
                    tracing::debug!(row, reason = %failure.reason, "row rejected");
                    failed.push(failure);
                }
            }
        }

        let accepted = self.apply_duplicate_policy(accepted, &mut failed);
        failed.sort_by_key(|f| f.row);

        let (staged, batch) = stage(kind, accepted, role, now);
        let report = ImportReport {
            imported_count: batch.len(),
            skipped_count: failed.len(),
            failed_records: failed,
        };
        ImportPlan {
            report,
            staged,
            batch,
        }
    }

    fn apply_duplicate_policy(
        &self,
        accepted: Vec<(usize, Accepted)>,
        failed: &mut Vec<FailedRecord>,
    ) -> Vec<(usize, Accepted)> {
        if self.duplicate_policy == DuplicateIdPolicy::Allow {
            return accepted;
        }

        // Position of the row that keeps each (collection, id)
        let mut keeper: HashMap<(Collection, String), usize> = HashMap::new();
        for (pos, (_, record)) in accepted.iter().enumerate() {
            let member = record.member();
            if !member.has_id() {
                continue;
            }
            let key = (record.collection(), member.id.clone());
            match self.duplicate_policy {
                DuplicateIdPolicy::Reject => {
                    keeper.entry(key).or_insert(pos);
                }
                _ => {
                    keeper.insert(key, pos);
                }
            }
        }

        accepted
            .into_iter()
            .enumerate()
            .filter_map(|(pos, (row, record))| {
                let member = record.member();
                let kept = !member.has_id()
                    || keeper.get(&(record.collection(), member.id.clone())) == Some(&pos);
                if kept {
                    Some((row, record))
                } else {
                    failed.push(FailedRecord {
                        row,
                        data: None,
                        name: Some(member.name.clone()),
                        id: Some(member.id.clone()),
                        call_number: Some(member.call_number.clone()),
                        cwac_area: Some(member.cwac_area.clone()),
                        status: Some(record.status_token().to_string()),
                        reason: FailureReason::DuplicateId,
                        suggested_fix: None,
                    });
                    None
                }
            })
            .collect()
    }

    /// Reconcile `rows` and commit them through `engine` (admin only).
    ///
    /// When the commit fails the working set keeps its previous contents;
    /// the report still describes how the rows were classified.
    pub async fn import<R: RemoteStore, C: LocalCache>(
        &self,
        engine: &SyncEngine<R, C>,
        kind: ImportKind,
        rows: &[String],
    ) -> ImportResult<ImportOutcome> {
        engine.role().require_admin("import")?;

        let plan = self.reconcile(kind, rows, engine.role(), Utc::now());
        let commit = engine.commit_import(plan.staged, plan.batch).await?;

        match &commit {
            WriteOutcome::Synced => tracing::info!(
                imported = plan.report.imported_count,
                skipped = plan.report.skipped_count,
                "import complete"
            ),
            WriteOutcome::Failed { reason } => {
                tracing::warn!(%reason, "import not committed")
            }
        }
        Ok(ImportOutcome {
            report: plan.report,
            commit,
        })
    }

    /// Read a CSV file in chunks and import it
    pub async fn import_file<R: RemoteStore, C: LocalCache>(
        &self,
        engine: &SyncEngine<R, C>,
        kind: ImportKind,
        path: impl AsRef<Path>,
    ) -> ImportResult<ImportOutcome> {
        engine.role().require_admin("import")?;
        let path = path.as_ref();
        let rows = read_lines(path, self.chunk_size).await?;
        if rows.len() < 2 {
            return Err(ImportError::EmptyFile(path.display().to_string()));
        }
        self.import(engine, kind, &rows).await
    }
}

fn classify(kind: ImportKind, row: usize, line: &str) -> Result<Accepted, FailedRecord> {
    let columns = split_row(line);
    if columns.len() < kind.min_columns() {
        return Err(FailedRecord::raw(row, line, FailureReason::InsufficientColumns));
    }
    let fields = RowFields::from_columns(&columns);

    let call_number = match validate_phone(&fields.raw_phone) {
        Ok(digits) => digits,
        Err(_) => {
            let mut failure = FailedRecord::fields(
                row,
                &fields,
                &fields.raw_phone,
                FailureReason::InvalidPhoneNumber,
            );
            failure.suggested_fix = Some(digits_only(&fields.raw_phone));
            return Err(failure);
        }
    };

    match kind {
        ImportKind::Dues => {
            let token = fields.status.as_deref().unwrap_or_default();
            match DuesStatus::parse(token) {
                Some(DuesStatus::Paid) => Ok(Accepted::Paid(fields.member(call_number))),
                Some(DuesStatus::Unpaid) => Ok(Accepted::Unpaid(fields.member(call_number))),
                None => Err(FailedRecord::fields(
                    row,
                    &fields,
                    &call_number,
                    FailureReason::InvalidStatus,
                )),
            }
        }
        ImportKind::LifeStatus => {
            let status = LifeStatus::parse_or_alive(fields.status.as_deref());
            Ok(Accepted::Status(fields.member(call_number), status))
        }
    }
}

fn stage(
    kind: ImportKind,
    accepted: Vec<(usize, Accepted)>,
    role: Role,
    now: DateTime<Utc>,
) -> (StagedImport, WriteBatch) {
    let now_ms = now.timestamp_millis();
    let batch_id = import_batch_id(now);
    let mut batch = WriteBatch::new();
    let mut paid = AreaBuckets::<PaidRecord>::new();
    let mut unpaid = AreaBuckets::<UnpaidRecord>::new();
    let mut status = AreaBuckets::<StatusRecord>::new();

    for (_, record) in accepted {
        match record {
            Accepted::Paid(member) => {
                let index = paid.area(&member.cwac_area).len();
                batch.set(
                    document_ref(Collection::Paid, &member, &member.cwac_area, index, now_ms),
                    dues_import_fields(&member, DuesStatus::Paid, role, &batch_id),
                    SetMode::Overwrite,
                );
                paid.insert(PaidRecord::new(member));
            }
            Accepted::Unpaid(member) => {
                let index = unpaid.area(&member.cwac_area).len();
                batch.set(
                    document_ref(Collection::Unpaid, &member, &member.cwac_area, index, now_ms),
                    dues_import_fields(&member, DuesStatus::Unpaid, role, &batch_id),
                    SetMode::Overwrite,
                );
                unpaid.insert(UnpaidRecord::new(member));
            }
            Accepted::Status(member, life) => {
                let index = status.area(&member.cwac_area).len();
                let record = StatusRecord::new(member, life);
                batch.set(
                    document_ref(
                        Collection::Status,
                        &record.member,
                        &record.member.cwac_area,
                        index,
                        now_ms,
                    ),
                    status_import_fields(&record, role),
                    SetMode::Merge,
                );
                status.insert(record);
            }
        }
    }

    paid.sort_by_name();
    unpaid.sort_by_name();
    status.sort_by_name();

    let staged = match kind {
        ImportKind::Dues => StagedImport::Dues { paid, unpaid },
        ImportKind::LifeStatus => StagedImport::Status { status },
    };
    (staged, batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(lines: &[&str]) -> Vec<String> {
        std::iter::once("Name,ID,CallNumber,CwacArea,Status")
            .chain(lines.iter().copied())
            .map(str::to_string)
            .collect()
    }

    fn reconcile(kind: ImportKind, lines: &[&str]) -> ImportPlan {
        ImportReconciler::new().reconcile(kind, &rows(lines), Role::Admin, Utc::now())
    }

    #[test]
    fn test_row_numbers_and_reasons() {
        let plan = reconcile(
            ImportKind::Dues,
            &[
                "Short,Row",
                "Jane Doe,ID1,0977123456,AreaA,PAID",
                "John Roe,ID2,977123456,AreaA,PENDING",
            ],
        );

        let failed = &plan.report.failed_records;
        assert_eq!(failed.len(), 3);
        assert_eq!(failed[0].row, 2);
        assert_eq!(failed[0].reason, FailureReason::InsufficientColumns);
        assert_eq!(failed[0].data.as_deref(), Some("Short,Row"));

        assert_eq!(failed[1].row, 3);
        assert_eq!(failed[1].reason, FailureReason::InvalidPhoneNumber);
        assert_eq!(failed[1].call_number.as_deref(), Some("0977123456"));
        assert_eq!(failed[1].suggested_fix.as_deref(), Some("0977123456"));

        assert_eq!(failed[2].reason, FailureReason::InvalidStatus);
        assert_eq!(failed[2].status.as_deref(), Some("PENDING"));
        assert_eq!(failed[2].reason.to_string(), "Invalid status");
    }

    #[test]
    fn test_status_import_defaults_to_alive() {
        let plan = reconcile(
            ImportKind::LifeStatus,
            &[
                "Jane Doe,ID1,977123456,AreaA",
                "John Roe,ID2,977123457,AreaA,deceased",
                "Mary Poe,ID3,977123458,AreaB,MISSING",
            ],
        );

        assert_eq!(plan.report.imported_count, 3);
        let StagedImport::Status { status } = &plan.staged else {
            panic!("expected a status import");
        };
        assert_eq!(status.area("AreaA")[0].status, LifeStatus::Alive);
        assert_eq!(status.area("AreaA")[1].status, LifeStatus::Deceased);
        assert_eq!(status.area("AreaB")[0].status, LifeStatus::Alive);
        assert!(plan
            .batch
            .writes()
            .iter()
            .all(|w| matches!(w, registry_sync::WriteOp::Set { mode: SetMode::Merge, .. })));
    }

    #[test]
    fn test_dues_import_overwrites_remotely() {
        let plan = reconcile(ImportKind::Dues, &["Jane Doe,ID1,977123456,AreaA,unpaid"]);
        match &plan.batch.writes()[0] {
            registry_sync::WriteOp::Set { doc, fields, mode } => {
                assert_eq!(doc.key, "ID1");
                assert_eq!(doc.collection, "UnpaidMembers");
                assert_eq!(*mode, SetMode::Overwrite);
                assert_eq!(fields["needsReview"], true.into());
                assert_eq!(fields["importedBy"], "admin".into());
            }
            other => panic!("unexpected write {:?}", other),
        }
    }

    #[test]
    fn test_duplicates_allowed_by_default() {
        let plan = reconcile(
            ImportKind::Dues,
            &["Jane Doe,ID1,977123456,AreaA,PAID", "Jane D,ID1,977123457,AreaA,PAID"],
        );
        assert_eq!(plan.report.imported_count, 2);
        assert_eq!(plan.batch.len(), 2);
        let StagedImport::Dues { paid, .. } = &plan.staged else {
            panic!("expected a dues import");
        };
        assert_eq!(paid.total(), 2);
    }

    #[test]
    fn test_duplicate_policies() {
        let lines = rows(&[
            "Jane Doe,ID1,977123456,AreaA,PAID",
            "Jane D,ID1,977123457,AreaA,PAID",
            "Jane U,ID1,977123458,AreaA,UNPAID",
        ]);

        let reject = ImportReconciler::new()
            .with_duplicate_policy(DuplicateIdPolicy::Reject)
            .reconcile(ImportKind::Dues, &lines, Role::Admin, Utc::now());
        assert_eq!(reject.report.imported_count, 2);
        assert_eq!(reject.report.failed_records.len(), 1);
        assert_eq!(reject.report.failed_records[0].row, 3);
        assert_eq!(reject.report.failed_records[0].reason, FailureReason::DuplicateId);

        let keep_last = ImportReconciler::new()
            .with_duplicate_policy(DuplicateIdPolicy::KeepLast)
            .reconcile(ImportKind::Dues, &lines, Role::Admin, Utc::now());
        assert_eq!(keep_last.report.failed_records[0].row, 2);
        let StagedImport::Dues { paid, unpaid } = &keep_last.staged else {
            panic!("expected a dues import");
        };
        assert_eq!(paid.area("AreaA")[0].member.name, "Jane D");
        assert_eq!(unpaid.total(), 1);
    }

    #[test]
    fn test_staged_buckets_are_sorted() {
        let plan = reconcile(
            ImportKind::Dues,
            &[
                "zed,ID3,977123456,AreaA,PAID",
                "Amy,ID1,977123457,AreaA,PAID",
                "bob,ID2,977123458,AreaA,PAID",
            ],
        );
        let StagedImport::Dues { paid, .. } = &plan.staged else {
            panic!("expected a dues import");
        };
        assert!(paid.is_sorted_by_name());
    }

    #[test]
    fn test_header_only() {
        let plan = reconcile(ImportKind::Dues, &[]);
        assert_eq!(plan.report, ImportReport::default());
        assert!(plan.batch.is_empty());
    }

    #[test]
    fn test_report_json_shape() {
        let plan = reconcile(ImportKind::Dues, &["Jane Doe,ID1,977-123-45,AreaA,PAID"]);
        let json = serde_json::to_value(&plan.report).unwrap();
        assert_eq!(json["importedCount"], 0);
        assert_eq!(json["skippedCount"], 1);
        let failed = &json["failedRecords"][0];
        assert_eq!(failed["reason"], "Invalid phone number");
        assert_eq!(failed["callNumber"], "977-123-45");
        assert_eq!(failed["suggestedFix"], "97712345");
        assert!(failed.get("data").is_none());
    }
}
