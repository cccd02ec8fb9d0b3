//! CSV export of registry collections.
//!
//! Every export shares one header, `Name,ID,CallNumber,CwacArea,Status`, and
//! lists areas in ascending order with each area's records in working-set
//! order. Fields containing commas or quotes are quoted and escaped by the
//! CSV writer.

use crate::{ImportError, ImportResult};
use chrono::NaiveDate;
use registry_model::{DuesStatus, WorkingSet};
use registry_sync::{LocalCache, RemoteStore, SyncEngine};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const CSV_HEADER: [&str; 5] = ["Name", "ID", "CallNumber", "CwacArea", "Status"];

/// Which list to export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    Paid,
    Unpaid,
    /// Unpaid members after phone corrections
    UpdatedUnpaid,
    Status,
}

impl ExportKind {
    fn file_prefix(&self) -> &'static str {
        match self {
            ExportKind::Paid => "paid_members",
            ExportKind::Unpaid => "unpaid_members",
            ExportKind::UpdatedUnpaid => "updated_unpaid_members",
            ExportKind::Status => "member_status",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ExportKind::Paid => "paid",
            ExportKind::Unpaid | ExportKind::UpdatedUnpaid => "unpaid",
            ExportKind::Status => "status",
        }
    }

    /// `<prefix>_YYYY-MM-DD.csv`
    pub fn default_file_name(&self, date: NaiveDate) -> String {
        format!("{}_{}.csv", self.file_prefix(), date.format("%Y-%m-%d"))
    }

    fn row_count(&self, ws: &WorkingSet) -> usize {
        match self {
            ExportKind::Paid => ws.paid.total(),
            ExportKind::Unpaid | ExportKind::UpdatedUnpaid => ws.unpaid.total(),
            ExportKind::Status => ws.status.total(),
        }
    }
}

/// Write one collection as CSV and return the number of data rows
pub fn write_csv<W: Write>(ws: &WorkingSet, kind: ExportKind, writer: W) -> ImportResult<usize> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(CSV_HEADER)?;

    let mut count = 0;
    match kind {
        ExportKind::Paid => {
            for (area, _, record) in ws.paid.records() {
                let m = &record.member;
                csv.write_record([
                    m.name.as_str(),
                    m.id.as_str(),
                    m.call_number.as_str(),
                    area,
                    DuesStatus::Paid.as_str(),
                ])?;
                count += 1;
            }
        }
        ExportKind::Unpaid | ExportKind::UpdatedUnpaid => {
            for (area, _, record) in ws.unpaid.records() {
                let m = &record.member;
                csv.write_record([
                    m.name.as_str(),
                    m.id.as_str(),
                    m.call_number.as_str(),
                    area,
                    DuesStatus::Unpaid.as_str(),
                ])?;
                count += 1;
            }
        }
        ExportKind::Status => {
            for (area, _, record) in ws.status.records() {
                let m = &record.member;
                csv.write_record([
                    m.name.as_str(),
                    m.id.as_str(),
                    m.call_number.as_str(),
                    area,
                    record.status.as_str(),
                ])?;
                count += 1;
            }
        }
    }

    csv.flush()?;
    Ok(count)
}

/// Render one collection as a CSV string
pub fn export_to_string(ws: &WorkingSet, kind: ExportKind) -> ImportResult<String> {
    let mut buf = Vec::new();
    write_csv(ws, kind, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// A file written by [`export_to_dir`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub count: usize,
}

/// Export one collection into `dir` under its dated default name (admin only)
pub async fn export_to_dir<R: RemoteStore, C: LocalCache>(
    engine: &SyncEngine<R, C>,
    kind: ExportKind,
    dir: impl AsRef<Path>,
    date: NaiveDate,
) -> ImportResult<ExportSummary> {
    engine.role().require_admin("export")?;

    let ws = engine.snapshot().await;
    if kind.row_count(&ws) == 0 {
        return Err(ImportError::NothingToExport(kind.label()));
    }

    let mut buf = Vec::new();
    let count = write_csv(&ws, kind, &mut buf)?;

    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(kind.default_file_name(date));
    tokio::fs::write(&path, buf).await?;

    tracing::info!(path = %path.display(), count, "exported members");
    Ok(ExportSummary { path, count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry_model::{LifeStatus, Member, PaidRecord, StatusRecord};

    fn working_set() -> WorkingSet {
        let mut ws = WorkingSet::new();
        ws.paid.insert(PaidRecord::new(Member::new(
            "Doe, Jane",
            "ID1",
            "977123456",
            "Zeta",
        )));
        ws.paid
            .insert(PaidRecord::new(Member::new("Amy", "ID2", "977123457", "Alpha")));
        ws.status.insert(StatusRecord::new(
            Member::new("Cy", "ID3", "977123458", "Beta"),
            LifeStatus::Deceased,
        ));
        ws
    }

    #[test]
    fn test_paid_export_orders_areas_and_quotes() {
        let csv = export_to_string(&working_set(), ExportKind::Paid).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Name,ID,CallNumber,CwacArea,Status",
                "Amy,ID2,977123457,Alpha,PAID",
                "\"Doe, Jane\",ID1,977123456,Zeta,PAID",
            ]
        );
    }

    #[test]
    fn test_status_export_uses_record_status() {
        let csv = export_to_string(&working_set(), ExportKind::Status).unwrap();
        assert!(csv.ends_with("Cy,ID3,977123458,Beta,DECEASED\n"));
    }

    #[test]
    fn test_empty_export_has_header_only() {
        let mut buf = Vec::new();
        let count = write_csv(&working_set(), ExportKind::Unpaid, &mut buf).unwrap();
        assert_eq!(count, 0);
        assert_eq!(String::from_utf8(buf).unwrap(), "Name,ID,CallNumber,CwacArea,Status\n");
    }

    #[test]
    fn test_default_file_names() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(ExportKind::Paid.default_file_name(date), "paid_members_2024-03-09.csv");
        assert_eq!(
            ExportKind::UpdatedUnpaid.default_file_name(date),
            "updated_unpaid_members_2024-03-09.csv"
        );
        assert_eq!(ExportKind::Status.default_file_name(date), "member_status_2024-03-09.csv");
    }
}
