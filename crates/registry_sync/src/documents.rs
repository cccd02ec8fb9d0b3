//! Mapping between registry records and remote documents.
//!
//! Every write the engine or the importer sends is built here, so the
//! document shapes of the four remote collections are defined in one place.
//! Reads go the other way: [`project_paid`], [`project_unpaid`] and
//! [`project_status`] keep only display fields and drop write metadata and
//! embedded history arrays.

use crate::error::{SyncError, SyncResult};
use crate::remote::{DocumentRef, DocumentSnapshot, FieldValue, Fields};
use chrono::{DateTime, SecondsFormat, Utc};
use registry_model::{
    Collection, DuesStatus, LifeStatus, Member, PaidRecord, PhoneEdit, Role, StatusChange,
    StatusRecord, UnpaidRecord,
};
use serde_json::{json, Value};

pub const PAID_COLLECTION: &str = "PaidMembers";
pub const UNPAID_COLLECTION: &str = "UnpaidMembers";
pub const STATUS_COLLECTION: &str = "Status";
pub const EDIT_AUDIT_COLLECTION: &str = "EditCallNumber";

/// Remote collection backing a registry collection
pub fn collection_name(collection: Collection) -> &'static str {
    match collection {
        Collection::Paid => PAID_COLLECTION,
        Collection::Unpaid => UNPAID_COLLECTION,
        Collection::Status => STATUS_COLLECTION,
    }
}

/// Document key for a record: its id, or `<area>_<index>_<millis>` when the
/// id is empty. Synthetic keys are not stable across pushes.
pub fn document_key(member: &Member, area: &str, index: usize, now_ms: i64) -> String {
    if member.has_id() {
        member.id.clone()
    } else {
        format!("{}_{}_{}", area, index, now_ms)
    }
}

pub fn document_ref(
    collection: Collection,
    member: &Member,
    area: &str,
    index: usize,
    now_ms: i64,
) -> DocumentRef {
    DocumentRef::new(
        collection_name(collection),
        document_key(member, area, index, now_ms),
    )
}

/// Batch id stamped on dues imports
pub fn import_batch_id(at: DateTime<Utc>) -> String {
    format!("batch_{}", at.timestamp_millis())
}

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn member_fields(member: &Member, area: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("name".into(), member.name.as_str().into());
    fields.insert("id".into(), member.id.as_str().into());
    fields.insert("callNumber".into(), member.call_number.as_str().into());
    fields.insert("cwacArea".into(), area.into());
    fields
}

// ========== Push ==========

pub fn paid_push_fields(record: &PaidRecord, area: &str, index: usize, role: Role) -> Fields {
    let mut fields = member_fields(&record.member, area);
    fields.insert("status".into(), DuesStatus::Paid.as_str().into());
    fields.insert("lastUpdated".into(), FieldValue::ServerTimestamp);
    fields.insert("updatedBy".into(), role.as_str().into());
    fields.insert("index".into(), index.into());
    fields
}

pub fn unpaid_push_fields(record: &UnpaidRecord, area: &str, index: usize, role: Role) -> Fields {
    let mut fields = member_fields(&record.member, area);
    fields.insert("status".into(), DuesStatus::Unpaid.as_str().into());
    fields.insert("lastUpdated".into(), FieldValue::ServerTimestamp);
    fields.insert("updatedBy".into(), role.as_str().into());
    fields.insert("index".into(), index.into());
    fields.insert("needsReview".into(), true.into());
    fields
}

pub fn status_push_fields(record: &StatusRecord, area: &str, role: Role) -> Fields {
    let mut fields = member_fields(&record.member, area);
    fields.insert("status".into(), record.status.as_str().into());
    fields.insert("lastChecked".into(), FieldValue::ServerTimestamp);
    fields.insert("checkedBy".into(), role.as_str().into());
    fields
}

// ========== Import ==========

/// Fields of a dues import row; written with an overwriting set
pub fn dues_import_fields(
    member: &Member,
    status: DuesStatus,
    role: Role,
    batch_id: &str,
) -> Fields {
    let mut fields = member_fields(member, &member.cwac_area);
    fields.insert("status".into(), status.as_str().into());
    if status == DuesStatus::Unpaid {
        fields.insert("needsReview".into(), true.into());
    }
    fields.insert("importedAt".into(), FieldValue::ServerTimestamp);
    fields.insert("importedBy".into(), role.as_str().into());
    fields.insert("importBatch".into(), batch_id.into());
    fields
}

/// Fields of a status import row; written with a merge
pub fn status_import_fields(record: &StatusRecord, role: Role) -> Fields {
    let mut fields = member_fields(&record.member, &record.member.cwac_area);
    fields.insert("status".into(), record.status.as_str().into());
    fields.insert("importedAt".into(), FieldValue::ServerTimestamp);
    fields.insert("importedBy".into(), role.as_str().into());
    fields
}

// ========== Incremental writes ==========

/// One document of the standalone phone edit log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditAuditEntry {
    pub id_original: String,
    pub member_name: String,
    pub cwac_area: String,
    pub old_call_number: String,
    pub new_call_number: String,
    pub edited_by: Role,
}

impl EditAuditEntry {
    pub const STATUS: &'static str = "pending_review";
    pub const SYNCED_FROM: &'static str = "offline";

    pub fn new(
        member_id: &str,
        member_name: &str,
        area: &str,
        old_call_number: &str,
        new_call_number: &str,
        edited_by: Role,
        now: DateTime<Utc>,
    ) -> Self {
        let id_original = if member_id.trim().is_empty() {
            format!("unknown_{}", now.timestamp_millis())
        } else {
            member_id.to_string()
        };
        Self {
            id_original,
            member_name: member_name.to_string(),
            cwac_area: area.to_string(),
            old_call_number: old_call_number.to_string(),
            new_call_number: new_call_number.to_string(),
            edited_by,
        }
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("idOriginal".into(), self.id_original.as_str().into());
        fields.insert("memberName".into(), self.member_name.as_str().into());
        fields.insert("cwacArea".into(), self.cwac_area.as_str().into());
        fields.insert("oldCallNumber".into(), self.old_call_number.as_str().into());
        fields.insert("newCallNumber".into(), self.new_call_number.as_str().into());
        fields.insert("editedBy".into(), self.edited_by.as_str().into());
        fields.insert("editedAt".into(), FieldValue::ServerTimestamp);
        fields.insert("status".into(), Self::STATUS.into());
        fields.insert("syncedFrom".into(), Self::SYNCED_FROM.into());
        fields
    }
}

/// Update applied to an unpaid document after a phone edit.
///
/// The history entry goes through an array union so concurrent editors
/// never overwrite each other's entries.
pub fn phone_edit_fields(edit: &PhoneEdit) -> Fields {
    let mut fields = Fields::new();
    fields.insert("callNumber".into(), edit.new_number.as_str().into());
    fields.insert("lastUpdated".into(), FieldValue::ServerTimestamp);
    fields.insert("updatedBy".into(), edit.edited_by.as_str().into());
    fields.insert(
        "editHistory".into(),
        FieldValue::ArrayUnion(vec![json!({
            "oldNumber": edit.old_number,
            "newNumber": edit.new_number,
            "timestamp": iso(edit.timestamp),
            "editedBy": edit.edited_by,
        })]),
    );
    fields
}

/// Merge-write applied to a status document after a status change
pub fn status_update_fields(record: &StatusRecord, area: &str, change: &StatusChange) -> Fields {
    let mut fields = member_fields(&record.member, area);
    fields.insert("status".into(), change.new_status.as_str().into());
    fields.insert("lastChecked".into(), FieldValue::ServerTimestamp);
    fields.insert("checkedBy".into(), change.changed_by.as_str().into());
    fields.insert(
        "statusHistory".into(),
        FieldValue::ArrayUnion(vec![json!({
            "oldStatus": change.old_status.as_str(),
            "newStatus": change.new_status.as_str(),
            "timestamp": iso(change.timestamp),
            "changedBy": change.changed_by,
        })]),
    );
    fields
}

// ========== Pull ==========

fn required_text(snapshot: &DocumentSnapshot, collection: &str, field: &str) -> SyncResult<String> {
    match snapshot.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(SyncError::malformed(
            collection,
            &snapshot.key,
            format!("field {field} is not a string: {other}"),
        )),
        None => Err(SyncError::malformed(
            collection,
            &snapshot.key,
            format!("missing field {field}"),
        )),
    }
}

/// Strings and numbers both read as text; anything else is malformed
fn optional_text(snapshot: &DocumentSnapshot, collection: &str, field: &str) -> SyncResult<String> {
    match snapshot.get(field) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(SyncError::malformed(
            collection,
            &snapshot.key,
            format!("field {field} has unexpected type: {other}"),
        )),
    }
}

fn project_member(snapshot: &DocumentSnapshot, collection: &str) -> SyncResult<Member> {
    Ok(Member {
        id: optional_text(snapshot, collection, "id")?,
        name: required_text(snapshot, collection, "name")?,
        call_number: optional_text(snapshot, collection, "callNumber")?,
        cwac_area: required_text(snapshot, collection, "cwacArea")?,
    })
}

pub fn project_paid(snapshot: &DocumentSnapshot) -> SyncResult<PaidRecord> {
    Ok(PaidRecord::new(project_member(snapshot, PAID_COLLECTION)?))
}

pub fn project_unpaid(snapshot: &DocumentSnapshot) -> SyncResult<UnpaidRecord> {
    Ok(UnpaidRecord::new(project_member(snapshot, UNPAID_COLLECTION)?))
}

pub fn project_status(snapshot: &DocumentSnapshot) -> SyncResult<StatusRecord> {
    let member = project_member(snapshot, STATUS_COLLECTION)?;
    let status = LifeStatus::parse_or_alive(snapshot.get("status").and_then(Value::as_str));
    Ok(StatusRecord::new(member, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::DocumentData;

    fn snapshot(key: &str, value: Value) -> DocumentSnapshot {
        let data: DocumentData = match value {
            Value::Object(map) => map,
            _ => DocumentData::new(),
        };
        DocumentSnapshot::new(key, data)
    }

    #[test]
    fn test_document_key() {
        let with_id = Member::new("Jane", "ID1", "977000000", "A");
        let without = Member::new("Jane", "  ", "977000000", "A");
        assert_eq!(document_key(&with_id, "A", 3, 1700), "ID1");
        assert_eq!(document_key(&without, "A", 3, 1700), "A_3_1700");
    }

    #[test]
    fn test_unpaid_push_fields() {
        let record = UnpaidRecord::new(Member::new("Jane", "ID1", "977000000", "A"));
        let fields = unpaid_push_fields(&record, "A", 2, Role::Viewer);

        assert_eq!(fields["status"], "UNPAID".into());
        assert_eq!(fields["needsReview"], true.into());
        assert_eq!(fields["updatedBy"], "viewer".into());
        assert_eq!(fields["index"], 2usize.into());
        assert_eq!(fields["lastUpdated"], FieldValue::ServerTimestamp);
    }

    #[test]
    fn test_edit_audit_entry_without_id() {
        let now = Utc::now();
        let entry = EditAuditEntry::new("", "Jane", "A", "977000000", "977111111", Role::Admin, now);
        assert_eq!(entry.id_original, format!("unknown_{}", now.timestamp_millis()));

        let fields = entry.to_fields();
        assert_eq!(fields["status"], "pending_review".into());
        assert_eq!(fields["syncedFrom"], "offline".into());
        assert_eq!(fields["editedAt"], FieldValue::ServerTimestamp);
    }

    #[test]
    fn test_phone_edit_fields_use_array_union() {
        let mut record = UnpaidRecord::new(Member::new("Jane", "ID2", "977000000", "A"));
        let edit = record.apply_phone_edit("977111111", Role::Viewer, Utc::now());
        let fields = phone_edit_fields(&edit);

        match &fields["editHistory"] {
            FieldValue::ArrayUnion(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0]["oldNumber"], "977000000");
                assert_eq!(items[0]["newNumber"], "977111111");
                assert_eq!(items[0]["editedBy"], "viewer");
            }
            other => panic!("expected array union, got {:?}", other),
        }
        assert_eq!(fields["callNumber"], "977111111".into());
    }

    #[test]
    fn test_projection_drops_metadata() {
        let snap = snapshot(
            "ID1",
            json!({
                "name": "Jane", "id": "ID1", "callNumber": 977000000, "cwacArea": "A",
                "status": "UNPAID", "needsReview": true, "lastUpdated": "2024-01-01T00:00:00Z",
                "editHistory": [{"oldNumber": "1"}]
            }),
        );
        let record = project_unpaid(&snap).unwrap();
        assert_eq!(record.member.call_number, "977000000");
        assert!(record.edit_history.is_empty());
        assert!(record.needs_review);
    }

    #[test]
    fn test_projection_rejects_missing_area() {
        let snap = snapshot("ID1", json!({ "name": "Jane" }));
        assert!(matches!(
            project_paid(&snap),
            Err(SyncError::MalformedDocument { key, .. }) if key == "ID1"
        ));
    }

    #[test]
    fn test_status_projection_defaults_to_alive() {
        let snap = snapshot("ID3", json!({ "name": "Cy", "cwacArea": "C" }));
        assert_eq!(project_status(&snap).unwrap().status, LifeStatus::Alive);
    }
}
