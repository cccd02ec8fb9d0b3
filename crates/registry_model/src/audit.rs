//! Audit entries embedded in unpaid and status records.
//!
//! Entries are immutable once created; records only ever append them.

use crate::LifeStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One call-number correction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneEdit {
    pub old_number: String,
    pub new_number: String,
    pub timestamp: DateTime<Utc>,
    pub edited_by: String,
}

/// One alive/deceased transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub old_status: LifeStatus,
    pub new_status: LifeStatus,
    pub timestamp: DateTime<Utc>,
    pub changed_by: String,
}
