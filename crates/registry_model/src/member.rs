//! Member records for the three registry collections

use crate::{ModelError, ModelResult, PhoneEdit, Role, StatusChange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three record collections kept by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Paid,
    Unpaid,
    Status,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Paid, Collection::Unpaid, Collection::Status];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Paid => "paid",
            Collection::Unpaid => "unpaid",
            Collection::Status => "status",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dues status token used by paid/unpaid imports and exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DuesStatus {
    Paid,
    Unpaid,
}

impl DuesStatus {
    /// Parse a token case-insensitively; surrounding whitespace is ignored
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "PAID" => Some(DuesStatus::Paid),
            "UNPAID" => Some(DuesStatus::Unpaid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DuesStatus::Paid => "PAID",
            DuesStatus::Unpaid => "UNPAID",
        }
    }

    /// Collection a record with this status belongs to
    pub fn collection(&self) -> Collection {
        match self {
            DuesStatus::Paid => Collection::Paid,
            DuesStatus::Unpaid => Collection::Unpaid,
        }
    }
}

impl fmt::Display for DuesStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Living status tracked in the status collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifeStatus {
    #[default]
    Alive,
    Deceased,
}

impl LifeStatus {
    /// Parse a token case-insensitively
    pub fn parse(token: &str) -> ModelResult<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "ALIVE" => Ok(LifeStatus::Alive),
            "DECEASED" => Ok(LifeStatus::Deceased),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }

    /// Parse a token, treating a missing or unrecognized value as `ALIVE`
    pub fn parse_or_alive(token: Option<&str>) -> Self {
        token
            .and_then(|t| Self::parse(t).ok())
            .unwrap_or(LifeStatus::Alive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifeStatus::Alive => "ALIVE",
            LifeStatus::Deceased => "DECEASED",
        }
    }
}

impl fmt::Display for LifeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every record in every collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// External identifier, unique within its collection
    #[serde(default)]
    pub id: String,
    /// Display name, also the secondary sort key
    pub name: String,
    /// Nine-digit call number
    #[serde(default)]
    pub call_number: String,
    /// Area grouping key
    pub cwac_area: String,
}

impl Member {
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        call_number: impl Into<String>,
        cwac_area: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            call_number: call_number.into(),
            cwac_area: cwac_area.into(),
        }
    }

    /// Whether this member has a stable external identifier
    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// Case-insensitive substring match on name or id
    pub fn matches(&self, term: &str) -> bool {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&needle) || self.id.to_lowercase().contains(&needle)
    }
}

/// Behaviour shared by the three record shapes.
///
/// Sorting, searching and bucketing are written once against this trait.
pub trait MemberRecord: Clone {
    /// Collection this record type lives in
    const COLLECTION: Collection;

    fn member(&self) -> &Member;

    fn member_mut(&mut self) -> &mut Member;

    fn name(&self) -> &str {
        &self.member().name
    }

    fn id(&self) -> &str {
        &self.member().id
    }

    fn area(&self) -> &str {
        &self.member().cwac_area
    }
}

/// A member whose dues are paid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidRecord {
    #[serde(flatten)]
    pub member: Member,
}

impl PaidRecord {
    pub fn new(member: Member) -> Self {
        Self { member }
    }

    pub fn status(&self) -> DuesStatus {
        DuesStatus::Paid
    }
}

impl MemberRecord for PaidRecord {
    const COLLECTION: Collection = Collection::Paid;

    fn member(&self) -> &Member {
        &self.member
    }

    fn member_mut(&mut self) -> &mut Member {
        &mut self.member
    }
}

fn default_true() -> bool {
    true
}

/// A member with outstanding dues, whose call number can be corrected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpaidRecord {
    #[serde(flatten)]
    pub member: Member,
    #[serde(default = "default_true")]
    pub needs_review: bool,
    /// Phone edits made to this record, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edit_history: Vec<PhoneEdit>,
}

impl UnpaidRecord {
    pub fn new(member: Member) -> Self {
        Self {
            member,
            needs_review: true,
            edit_history: Vec::new(),
        }
    }

    pub fn status(&self) -> DuesStatus {
        DuesStatus::Unpaid
    }

    /// Overwrite the call number and append exactly one history entry
    pub fn apply_phone_edit(
        &mut self,
        new_number: impl Into<String>,
        edited_by: Role,
        at: DateTime<Utc>,
    ) -> PhoneEdit {
        let new_number = new_number.into();
        let entry = PhoneEdit {
            old_number: std::mem::replace(&mut self.member.call_number, new_number.clone()),
            new_number,
            timestamp: at,
            edited_by: edited_by.as_str().to_string(),
        };
        self.edit_history.push(entry.clone());
        entry
    }
}

impl MemberRecord for UnpaidRecord {
    const COLLECTION: Collection = Collection::Unpaid;

    fn member(&self) -> &Member {
        &self.member
    }

    fn member_mut(&mut self) -> &mut Member {
        &mut self.member
    }
}

/// A member's alive/deceased status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    #[serde(flatten)]
    pub member: Member,
    #[serde(default)]
    pub status: LifeStatus,
    /// Status changes made to this record, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status_history: Vec<StatusChange>,
}

impl StatusRecord {
    pub fn new(member: Member, status: LifeStatus) -> Self {
        Self {
            member,
            status,
            status_history: Vec::new(),
        }
    }

    /// Overwrite the status and append exactly one history entry
    pub fn apply_status_change(
        &mut self,
        new_status: LifeStatus,
        changed_by: Role,
        at: DateTime<Utc>,
    ) -> StatusChange {
        let entry = StatusChange {
            old_status: std::mem::replace(&mut self.status, new_status),
            new_status,
            timestamp: at,
            changed_by: changed_by.as_str().to_string(),
        };
        self.status_history.push(entry.clone());
        entry
    }
}

impl MemberRecord for StatusRecord {
    const COLLECTION: Collection = Collection::Status;

    fn member(&self) -> &Member {
        &self.member
    }

    fn member_mut(&mut self) -> &mut Member {
        &mut self.member
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, id: &str) -> Member {
        Member::new(name, id, "977000000", "AreaA")
    }

    #[test]
    fn test_status_tokens() {
        assert_eq!(DuesStatus::parse(" paid "), Some(DuesStatus::Paid));
        assert_eq!(DuesStatus::parse("Unpaid"), Some(DuesStatus::Unpaid));
        assert_eq!(DuesStatus::parse("PENDING"), None);
        assert_eq!(LifeStatus::parse("deceased").unwrap(), LifeStatus::Deceased);
        assert_eq!(LifeStatus::parse_or_alive(Some("gone")), LifeStatus::Alive);
        assert_eq!(LifeStatus::parse_or_alive(None), LifeStatus::Alive);
        assert_eq!(LifeStatus::default(), LifeStatus::Alive);
    }

    #[test]
    fn test_member_matches() {
        let m = member("Jane Doe", "ID-77");
        assert!(m.matches("jane"));
        assert!(m.matches("id-7"));
        assert!(m.matches("  "));
        assert!(!m.matches("john"));
    }

    #[test]
    fn test_phone_edit_history_is_append_only() {
        let mut record = UnpaidRecord::new(member("Jane Doe", "ID2"));
        let now = Utc::now();

        record.apply_phone_edit("977111111", Role::Viewer, now);
        record.apply_phone_edit("977222222", Role::Admin, now);
        record.apply_phone_edit("977333333", Role::Viewer, now);

        assert_eq!(record.edit_history.len(), 3);
        assert_eq!(record.edit_history[0].old_number, "977000000");
        assert_eq!(record.edit_history[1].old_number, "977111111");
        assert_eq!(record.edit_history[2].new_number, "977333333");
        assert_eq!(record.member.call_number, "977333333");
        assert_eq!(record.edit_history[1].edited_by, "admin");
    }

    #[test]
    fn test_status_change_history() {
        let mut record = StatusRecord::new(member("John Roe", "ID3"), LifeStatus::Alive);
        let entry = record.apply_status_change(LifeStatus::Deceased, Role::Viewer, Utc::now());

        assert_eq!(entry.old_status, LifeStatus::Alive);
        assert_eq!(entry.new_status, LifeStatus::Deceased);
        assert_eq!(record.status, LifeStatus::Deceased);
        assert_eq!(record.status_history.len(), 1);
    }

    #[test]
    fn test_record_json_shape() {
        let record = UnpaidRecord::new(member("Jane Doe", "ID1"));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["name"], "Jane Doe");
        assert_eq!(json["callNumber"], "977000000");
        assert_eq!(json["cwacArea"], "AreaA");
        assert_eq!(json["needsReview"], true);
        assert!(json.get("editHistory").is_none());

        let parsed: UnpaidRecord =
            serde_json::from_str(r#"{"name":"A","id":"1","callNumber":"977000000","cwacArea":"X"}"#)
                .unwrap();
        assert!(parsed.needs_review);
    }
}
