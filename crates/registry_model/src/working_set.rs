//! The in-memory working set: three collections of records grouped by area.

use crate::{
    Collection, LifeStatus, MemberRecord, ModelError, ModelResult, PaidRecord, StatusRecord,
    UnpaidRecord,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Order two names case-insensitively, falling back to the raw text so the
/// order is total.
pub fn name_order(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Records of one collection, bucketed by area.
///
/// Areas iterate in ascending order. Within an area, records are sorted by
/// name after every bulk load; edits to single records keep their position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AreaBuckets<R> {
    areas: BTreeMap<String, Vec<R>>,
}

impl<R> Default for AreaBuckets<R> {
    fn default() -> Self {
        Self {
            areas: BTreeMap::new(),
        }
    }
}

impl<R: MemberRecord> AreaBuckets<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record to the bucket named by its area
    pub fn insert(&mut self, record: R) {
        self.areas
            .entry(record.area().to_string())
            .or_default()
            .push(record);
    }

    pub fn get(&self, area: &str, index: usize) -> Option<&R> {
        self.areas.get(area).and_then(|records| records.get(index))
    }

    pub fn get_mut(&mut self, area: &str, index: usize) -> Option<&mut R> {
        self.areas
            .get_mut(area)
            .and_then(|records| records.get_mut(index))
    }

    /// Like [`AreaBuckets::get_mut`] but reports a missing record as an error
    pub fn require_mut(&mut self, area: &str, index: usize) -> ModelResult<&mut R> {
        self.get_mut(area, index)
            .ok_or_else(|| ModelError::RecordNotFound {
                collection: R::COLLECTION.as_str(),
                area: area.to_string(),
                index,
            })
    }

    /// Remove one record; an emptied area disappears
    pub fn remove(&mut self, area: &str, index: usize) -> Option<R> {
        let records = self.areas.get_mut(area)?;
        if index >= records.len() {
            return None;
        }
        let removed = records.remove(index);
        if records.is_empty() {
            self.areas.remove(area);
        }
        Some(removed)
    }

    /// Records of one area (empty if the area is unknown)
    pub fn area(&self, area: &str) -> &[R] {
        self.areas.get(area).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn areas(&self) -> impl Iterator<Item = &str> {
        self.areas.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[R])> {
        self.areas
            .iter()
            .map(|(area, records)| (area.as_str(), records.as_slice()))
    }

    /// Every record with its area and index inside that area
    pub fn records(&self) -> impl Iterator<Item = (&str, usize, &R)> {
        self.areas.iter().flat_map(|(area, records)| {
            records
                .iter()
                .enumerate()
                .map(move |(index, record)| (area.as_str(), index, record))
        })
    }

    pub fn total(&self) -> usize {
        self.areas.values().map(Vec::len).sum()
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn clear(&mut self) {
        self.areas.clear();
    }

    /// Sort every area by name
    pub fn sort_by_name(&mut self) {
        for records in self.areas.values_mut() {
            records.sort_by(|a, b| name_order(a.name(), b.name()));
        }
    }

    /// Sort a single area by name
    pub fn sort_area(&mut self, area: &str) {
        if let Some(records) = self.areas.get_mut(area) {
            records.sort_by(|a, b| name_order(a.name(), b.name()));
        }
    }

    /// Check that every area is non-decreasing by name
    pub fn is_sorted_by_name(&self) -> bool {
        self.areas.values().all(|records| {
            records
                .windows(2)
                .all(|pair| name_order(pair[0].name(), pair[1].name()) != Ordering::Greater)
        })
    }

    /// Records whose name or id contains `term`, case-insensitively.
    ///
    /// Areas without a match are omitted; relative order is preserved.
    pub fn filter(&self, term: &str) -> Self {
        let areas = self
            .areas
            .iter()
            .filter_map(|(area, records)| {
                let matched: Vec<R> = records
                    .iter()
                    .filter(|record| record.member().matches(term))
                    .cloned()
                    .collect();
                (!matched.is_empty()).then(|| (area.clone(), matched))
            })
            .collect();
        Self { areas }
    }
}

impl<R: MemberRecord> FromIterator<R> for AreaBuckets<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        let mut buckets = Self::new();
        for record in iter {
            buckets.insert(record);
        }
        buckets
    }
}

/// A record together with its position in the working set
#[derive(Debug, Clone, Copy)]
pub struct Listed<'a, R> {
    pub area: &'a str,
    pub index: usize,
    pub record: &'a R,
}

impl<R> Listed<'_, R> {
    /// Stable handle used by list views (`<area>_<index>`)
    pub fn unique_id(&self) -> String {
        format!("{}_{}", self.area, self.index)
    }
}

/// Per-collection totals for display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_paid: usize,
    pub total_unpaid: usize,
    pub total_status: usize,
    pub paid_areas: usize,
    pub unpaid_areas: usize,
    pub status_areas: usize,
}

/// The session's authoritative copy of all three collections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingSet {
    pub paid: AreaBuckets<PaidRecord>,
    pub unpaid: AreaBuckets<UnpaidRecord>,
    pub status: AreaBuckets<StatusRecord>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_paid: self.paid.total(),
            total_unpaid: self.unpaid.total(),
            total_status: self.status.total(),
            paid_areas: self.paid.area_count(),
            unpaid_areas: self.unpaid.area_count(),
            status_areas: self.status.area_count(),
        }
    }

    pub fn total(&self, collection: Collection) -> usize {
        match collection {
            Collection::Paid => self.paid.total(),
            Collection::Unpaid => self.unpaid.total(),
            Collection::Status => self.status.total(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paid.is_empty() && self.unpaid.is_empty() && self.status.is_empty()
    }

    pub fn sort_all(&mut self) {
        self.paid.sort_by_name();
        self.unpaid.sort_by_name();
        self.status.sort_by_name();
    }

    pub fn is_sorted(&self) -> bool {
        self.paid.is_sorted_by_name()
            && self.unpaid.is_sorted_by_name()
            && self.status.is_sorted_by_name()
    }

    /// Unpaid records of one area, or of every area when `area` is `None`
    pub fn list_unpaid(&self, area: Option<&str>) -> Vec<Listed<'_, UnpaidRecord>> {
        self.unpaid
            .records()
            .filter(|(a, _, _)| area.map_or(true, |wanted| *a == wanted))
            .map(|(area, index, record)| Listed {
                area,
                index,
                record,
            })
            .collect()
    }

    /// Status records filtered by area and by status
    pub fn list_status(
        &self,
        area: Option<&str>,
        status: Option<LifeStatus>,
    ) -> Vec<Listed<'_, StatusRecord>> {
        self.status
            .records()
            .filter(|(a, _, _)| area.map_or(true, |wanted| *a == wanted))
            .filter(|(_, _, record)| status.map_or(true, |wanted| record.status == wanted))
            .map(|(area, index, record)| Listed {
                area,
                index,
                record,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Member;
    use proptest::prelude::*;

    fn paid(name: &str, id: &str, area: &str) -> PaidRecord {
        PaidRecord::new(Member::new(name, id, "977000000", area))
    }

    fn status(name: &str, area: &str, s: LifeStatus) -> StatusRecord {
        StatusRecord::new(Member::new(name, name, "977000000", area), s)
    }

    #[test]
    fn test_insert_groups_by_area() {
        let buckets: AreaBuckets<PaidRecord> = vec![
            paid("Zed", "1", "B"),
            paid("Amy", "2", "A"),
            paid("bob", "3", "A"),
        ]
        .into_iter()
        .collect();

        assert_eq!(buckets.area_count(), 2);
        assert_eq!(buckets.total(), 3);
        assert_eq!(buckets.areas().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn test_sort_is_case_insensitive() {
        let mut buckets: AreaBuckets<PaidRecord> = vec![
            paid("charlie", "1", "A"),
            paid("Bob", "2", "A"),
            paid("alice", "3", "A"),
        ]
        .into_iter()
        .collect();

        buckets.sort_by_name();
        let names: Vec<&str> = buckets.area("A").iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["alice", "Bob", "charlie"]);
        assert!(buckets.is_sorted_by_name());
    }

    #[test]
    fn test_remove_drops_empty_area() {
        let mut buckets: AreaBuckets<PaidRecord> =
            vec![paid("Amy", "1", "A")].into_iter().collect();

        assert!(buckets.remove("A", 3).is_none());
        let removed = buckets.remove("A", 0).unwrap();
        assert_eq!(removed.id(), "1");
        assert!(buckets.is_empty());
    }

    #[test]
    fn test_require_mut_reports_missing_record() {
        let mut buckets: AreaBuckets<UnpaidRecord> = AreaBuckets::new();
        let err = buckets.require_mut("Nowhere", 0).unwrap_err();
        assert_eq!(
            err,
            ModelError::RecordNotFound {
                collection: "unpaid",
                area: "Nowhere".to_string(),
                index: 0
            }
        );
    }

    #[test]
    fn test_filter_matches_name_or_id() {
        let mut buckets: AreaBuckets<PaidRecord> = vec![
            paid("Jane Doe", "ZX1", "A"),
            paid("John Roe", "ZX2", "A"),
            paid("Mary Poe", "QQ9", "B"),
        ]
        .into_iter()
        .collect();
        buckets.sort_by_name();

        let by_name = buckets.filter("jane");
        assert_eq!(by_name.total(), 1);

        let by_id = buckets.filter("zx");
        assert_eq!(by_id.total(), 2);
        assert_eq!(by_id.area_count(), 1);
        assert!(by_id.is_sorted_by_name());

        assert_eq!(buckets.filter("nobody").total(), 0);
    }

    #[test]
    fn test_stats() {
        let mut ws = WorkingSet::new();
        ws.paid.insert(paid("Amy", "1", "A"));
        ws.paid.insert(paid("Ben", "2", "B"));
        ws.unpaid
            .insert(UnpaidRecord::new(Member::new("Cal", "3", "977000000", "A")));

        let stats = ws.stats();
        assert_eq!(stats.total_paid, 2);
        assert_eq!(stats.paid_areas, 2);
        assert_eq!(stats.total_unpaid, 1);
        assert_eq!(stats.total_status, 0);
    }

    #[test]
    fn test_list_status_filters() {
        let mut ws = WorkingSet::new();
        ws.status.insert(status("Amy", "A", LifeStatus::Alive));
        ws.status.insert(status("Ben", "A", LifeStatus::Deceased));
        ws.status.insert(status("Cal", "B", LifeStatus::Deceased));

        assert_eq!(ws.list_status(None, None).len(), 3);
        assert_eq!(ws.list_status(Some("A"), None).len(), 2);

        let deceased = ws.list_status(None, Some(LifeStatus::Deceased));
        assert_eq!(deceased.len(), 2);
        assert_eq!(deceased[0].unique_id(), "A_1");
        assert_eq!(deceased[1].unique_id(), "B_0");
    }

    #[test]
    fn test_working_set_json_shape() {
        let mut ws = WorkingSet::new();
        ws.paid.insert(paid("Amy", "1", "A"));

        let json = serde_json::to_value(&ws.paid).unwrap();
        assert_eq!(json["A"][0]["name"], "Amy");

        let back: AreaBuckets<PaidRecord> = serde_json::from_value(json).unwrap();
        assert_eq!(back, ws.paid);
    }

    proptest! {
        #[test]
        fn prop_sort_then_filter_keeps_order(
            names in proptest::collection::vec("[A-Za-z]{1,8}", 0..30),
            term in "[a-z]{0,2}",
        ) {
            let mut buckets: AreaBuckets<PaidRecord> = names
                .iter()
                .enumerate()
                .map(|(i, n)| paid(n, &i.to_string(), if i % 2 == 0 { "A" } else { "B" }))
                .collect();
            buckets.sort_by_name();
            prop_assert!(buckets.is_sorted_by_name());
            prop_assert!(buckets.filter(&term).is_sorted_by_name());
            prop_assert_eq!(buckets.total(), names.len());
        }
    }
}
