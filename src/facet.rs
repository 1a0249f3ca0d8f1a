use std::collections::HashMap;
use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{AttendanceError, Result};
use crate::filter::{SortDirection, SortPair};
use crate::models::{AttendanceColumn, AttendanceRecord};

pub const PERCENTAGE_SUFFIX: &str = "_percentage";
pub const PRESENT_PERCENTAGE: &str = "present_percentage";
pub const ABSENT_PERCENTAGE: &str = "absent_percentage";

/// Bucket key used for records that leave the facet column unset.
pub const MISSING_VALUE: &str = "null";

/// A percentage held as hundredths so rounding is exact and comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Percentage(u64);

impl Percentage {
    pub const ZERO: Percentage = Percentage(0);

    /// `100 * count / total` rounded half-up to two decimals; `0` when total is `0`.
    pub fn of(count: u64, total: u64) -> Self {
        if total == 0 {
            return Self::ZERO;
        }
        Self((20_000 * count + total) / (2 * total))
    }

    pub fn hundredths(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Percentage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Status counts for the records sharing one facet value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacetBucket {
    counts: Vec<(String, u64)>,
    percentages: Vec<(String, Percentage)>,
}

impl FacetBucket {
    fn increment(&mut self, status: &str) {
        match self.counts.iter_mut().find(|(key, _)| key == status) {
            Some((_, count)) => *count += 1,
            None => self.counts.push((status.to_string(), 1)),
        }
    }

    pub fn count(&self, status: &str) -> Option<u64> {
        self.counts
            .iter()
            .find(|(key, _)| key == status)
            .map(|(_, count)| *count)
    }

    pub fn percentage(&self, status: &str) -> Option<Percentage> {
        self.percentages
            .iter()
            .find(|(key, _)| key == status)
            .map(|(_, percentage)| *percentage)
    }

    pub fn statuses(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(key, count)| (key.as_str(), *count))
    }

    pub fn percentages(&self) -> impl Iterator<Item = (&str, Percentage)> {
        self.percentages
            .iter()
            .map(|(key, percentage)| (key.as_str(), *percentage))
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|(_, count)| count).sum()
    }

    fn compute_percentages(&mut self) {
        let total = self.total();
        self.percentages = self
            .counts
            .iter()
            .map(|(status, count)| (status.clone(), Percentage::of(*count, total)))
            .collect();
    }

    /// Gives every observed status a percentage so sort keys always compare.
    fn zero_fill(&mut self, observed: &[String]) {
        for status in observed {
            if self.percentage(status).is_none() {
                self.percentages.push((status.clone(), Percentage::ZERO));
            }
        }
    }

    fn strip_zero_percentages(&mut self) {
        self.percentages.retain(|(_, percentage)| !percentage.is_zero());
    }
}

impl Serialize for FacetBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.counts.len() + self.percentages.len()))?;
        for (status, count) in &self.counts {
            map.serialize_entry(status, count)?;
        }
        for (status, percentage) in &self.percentages {
            map.serialize_entry(&format!("{status}{PERCENTAGE_SUFFIX}"), percentage)?;
        }
        map.end()
    }
}

/// Buckets of one facet field, in first-seen order unless sorted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacetValues {
    buckets: Vec<(String, FacetBucket)>,
}

impl FacetValues {
    pub fn get(&self, value: &str) -> Option<&FacetBucket> {
        self.buckets
            .iter()
            .find(|(key, _)| key == value)
            .map(|(_, bucket)| bucket)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FacetBucket)> {
        self.buckets.iter().map(|(key, bucket)| (key.as_str(), bucket))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn sort_by_percentage(&mut self, status: &str, direction: SortDirection) {
        // sort_by is stable, so equal percentages keep first-seen order.
        self.buckets.sort_by(|(_, a), (_, b)| {
            let a = a.percentage(status).unwrap_or_default();
            let b = b.percentage(status).unwrap_or_default();
            direction.apply(a.cmp(&b))
        });
    }
}

impl Serialize for FacetValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.buckets.len()))?;
        for (value, bucket) in &self.buckets {
            map.serialize_entry(value, bucket)?;
        }
        map.end()
    }
}

/// Facet field -> facet value -> status counts and `<status>_percentage`
/// entries, each level in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacetTree {
    facets: Vec<(AttendanceColumn, FacetValues)>,
}

impl FacetTree {
    pub fn facet(&self, column: AttendanceColumn) -> Option<&FacetValues> {
        self.facets
            .iter()
            .find(|(key, _)| *key == column)
            .map(|(_, values)| values)
    }

    pub fn len(&self) -> usize {
        self.facets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facets.is_empty()
    }
}

impl Serialize for FacetTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.facets.len()))?;
        for (column, values) in &self.facets {
            map.serialize_entry(column.name(), values)?;
        }
        map.end()
    }
}

/// Resolves requested facet names, failing on the first unknown one.
pub fn resolve_facets(names: &[String]) -> Result<Vec<AttendanceColumn>> {
    names
        .iter()
        .map(|name| {
            AttendanceColumn::parse(name.trim())
                .ok_or_else(|| AttendanceError::validation(name.clone(), "invalid facet"))
        })
        .collect()
}

/// Distinct attendance statuses in first-seen order.
pub fn observed_statuses(records: &[AttendanceRecord]) -> Vec<String> {
    let mut statuses: Vec<String> = Vec::new();
    for status in records.iter().filter_map(|record| record.attendance.as_deref()) {
        if !status.is_empty() && !statuses.iter().any(|seen| seen == status) {
            statuses.push(status.to_string());
        }
    }
    statuses
}

/// Validates a facet sort key and returns the status it sorts on.
fn sort_status(key: &str, observed: &[String]) -> Result<String> {
    let status = key.strip_suffix(PERCENTAGE_SUFFIX);
    let known = key == PRESENT_PERCENTAGE
        || key == ABSENT_PERCENTAGE
        || status.is_some_and(|status| observed.iter().any(|seen| seen == status));

    match status {
        Some(status) if known => Ok(status.to_string()),
        _ => Err(AttendanceError::validation(
            "sort[0]",
            format!("invalid facet sort key {key}"),
        )),
    }
}

/// Builds the frequency tree for `facets` over an already-filtered record set.
///
/// Records without an attendance status are not counted.
pub fn build_facet_tree(
    records: &[AttendanceRecord],
    facets: &[AttendanceColumn],
    sort: Option<&SortPair>,
) -> Result<FacetTree> {
    let observed = observed_statuses(records);
    let sort = sort
        .map(|pair| sort_status(&pair.key, &observed).map(|status| (status, pair.direction)))
        .transpose()?;

    let mut tree = FacetTree::default();
    for &column in facets {
        if tree.facet(column).is_some() {
            continue;
        }
        let mut values = count_facet(records, column);

        for (_, bucket) in values.buckets.iter_mut() {
            bucket.compute_percentages();
            bucket.zero_fill(&observed);
        }
        if let Some((status, direction)) = &sort {
            values.sort_by_percentage(status, *direction);
        }
        for (_, bucket) in values.buckets.iter_mut() {
            bucket.strip_zero_percentages();
        }

        tree.facets.push((column, values));
    }

    tracing::debug!(
        records = records.len(),
        facets = tree.len(),
        statuses = observed.len(),
        "built facet tree"
    );
    Ok(tree)
}

fn count_facet(records: &[AttendanceRecord], column: AttendanceColumn) -> FacetValues {
    let mut values = FacetValues::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let Some(status) = record.attendance.as_deref().filter(|s| !s.is_empty()) else {
            continue;
        };
        let key = record
            .field(column)
            .map(|value| value.to_string())
            .unwrap_or_else(|| MISSING_VALUE.to_string());

        let slot = *index.entry(key.clone()).or_insert_with(|| {
            values.buckets.push((key, FacetBucket::default()));
            values.buckets.len() - 1
        });
        values.buckets[slot].1.increment(status);
    }
    values
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::models::fixtures::{date, record};

    fn with_session(status: &str, session: &str) -> AttendanceRecord {
        let mut record = record(Uuid::new_v4(), Some(date(2024, 1, 10)), status);
        record.session = Some(session.to_string());
        record
    }

    fn session_fixture() -> Vec<AttendanceRecord> {
        vec![
            with_session("present", "morning"),
            with_session("present", "morning"),
            with_session("absent", "morning"),
            with_session("present", "afternoon"),
            with_session("late", "evening"),
            with_session("present", "evening"),
            with_session("absent", "evening"),
            with_session("absent", "evening"),
        ]
    }

    fn sort(key: &str, direction: &str) -> SortPair {
        SortPair::parse(&[key.to_string(), direction.to_string()]).unwrap()
    }

    #[test]
    fn percentage_rounds_half_up_to_two_decimals() {
        assert_eq!(Percentage::of(1, 3).to_string(), "33.33");
        assert_eq!(Percentage::of(2, 3).to_string(), "66.67");
        assert_eq!(Percentage::of(1, 800).to_string(), "0.13");
        assert_eq!(Percentage::of(7, 7).to_string(), "100.00");
        assert_eq!(Percentage::of(3, 0), Percentage::ZERO);
    }

    #[test]
    fn faceting_on_status_gives_each_bucket_one_hundred_percent() {
        let user = Uuid::new_v4();
        let mut records: Vec<_> = (0..7)
            .map(|day| record(user, Some(date(2024, 1, day + 1)), "present"))
            .collect();
        records.extend((0..3).map(|day| record(user, Some(date(2024, 1, day + 20)), "absent")));

        let tree = build_facet_tree(&records, &[AttendanceColumn::Attendance], None).unwrap();
        assert_eq!(
            serde_json::to_value(&tree).unwrap(),
            json!({
                "attendance": {
                    "present": {"present": 7, "present_percentage": "100.00"},
                    "absent": {"absent": 3, "absent_percentage": "100.00"}
                }
            })
        );
    }

    #[test]
    fn mixed_buckets_get_per_bucket_distributions() {
        let tree =
            build_facet_tree(&session_fixture(), &[AttendanceColumn::Session], None).unwrap();
        let sessions = tree.facet(AttendanceColumn::Session).unwrap();

        assert_eq!(sessions.keys().collect::<Vec<_>>(), vec!["morning", "afternoon", "evening"]);
        let morning = sessions.get("morning").unwrap();
        assert_eq!(morning.count("present"), Some(2));
        assert_eq!(morning.percentage("present").unwrap().to_string(), "66.67");
        assert_eq!(morning.percentage("absent").unwrap().to_string(), "33.33");
        assert_eq!(sessions.get("evening").unwrap().total(), 4);
    }

    #[test]
    fn bucket_percentages_sum_to_one_hundred() {
        let tree =
            build_facet_tree(&session_fixture(), &[AttendanceColumn::Session], None).unwrap();
        for (_, bucket) in tree.facet(AttendanceColumn::Session).unwrap().iter() {
            let sum: u64 = bucket.percentages().map(|(_, p)| p.hundredths()).sum();
            let statuses = bucket.statuses().count() as u64;
            assert!(sum.abs_diff(10_000) <= statuses, "sum was {sum}");
        }
    }

    #[test]
    fn zero_filled_percentages_are_never_emitted() {
        let tree =
            build_facet_tree(&session_fixture(), &[AttendanceColumn::Session], Some(&sort("late_percentage", "desc")))
                .unwrap();
        let output = serde_json::to_value(&tree).unwrap();

        assert_eq!(
            output["session"]["afternoon"],
            json!({"present": 1, "present_percentage": "100.00"})
        );
        for (_, bucket) in tree.facet(AttendanceColumn::Session).unwrap().iter() {
            assert!(bucket.percentages().all(|(_, p)| !p.is_zero()));
        }
    }

    #[test]
    fn descending_sort_is_non_increasing_and_stable() {
        let mut records = session_fixture();
        // "night" ties with "morning" on present_percentage and arrives later.
        records.push(with_session("present", "night"));
        records.push(with_session("present", "night"));
        records.push(with_session("absent", "night"));

        let tree = build_facet_tree(
            &records,
            &[AttendanceColumn::Session],
            Some(&sort("present_percentage", "DESC")),
        )
        .unwrap();
        let sessions = tree.facet(AttendanceColumn::Session).unwrap();

        assert_eq!(
            sessions.keys().collect::<Vec<_>>(),
            vec!["afternoon", "morning", "night", "evening"]
        );
        let values: Vec<u64> = sessions
            .iter()
            .map(|(_, bucket)| bucket.percentage("present").unwrap_or_default().hundredths())
            .collect();
        assert!(values.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[test]
    fn ascending_sort_treats_missing_status_as_zero() {
        let tree = build_facet_tree(
            &session_fixture(),
            &[AttendanceColumn::Session],
            Some(&sort("absent_percentage", "asc")),
        )
        .unwrap();
        let keys: Vec<_> = tree.facet(AttendanceColumn::Session).unwrap().keys().collect();
        assert_eq!(keys, vec!["afternoon", "morning", "evening"]);
    }

    #[test]
    fn unknown_sort_key_is_rejected() {
        let err = build_facet_tree(
            &session_fixture(),
            &[AttendanceColumn::Session],
            Some(&sort("excused_percentage", "asc")),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "sort[0]: invalid facet sort key excused_percentage");

        assert!(build_facet_tree(
            &session_fixture(),
            &[AttendanceColumn::Session],
            Some(&sort("present", "asc")),
        )
        .is_err());
    }

    #[test]
    fn present_percentage_is_always_a_valid_sort_key() {
        let records = vec![with_session("absent", "morning")];
        let tree = build_facet_tree(
            &records,
            &[AttendanceColumn::Session],
            Some(&sort("present_percentage", "desc")),
        )
        .unwrap();
        assert_eq!(tree.facet(AttendanceColumn::Session).unwrap().len(), 1);
    }

    #[test]
    fn invalid_facet_name_aborts_the_request() {
        let names = vec!["session".to_string(), "shift".to_string()];
        let err = resolve_facets(&names).unwrap_err();
        assert_eq!(err.to_string(), "shift: invalid facet");
    }

    #[test]
    fn multiple_facets_are_counted_independently() {
        let tree = build_facet_tree(
            &session_fixture(),
            &[AttendanceColumn::Session, AttendanceColumn::Attendance],
            None,
        )
        .unwrap();
        assert_eq!(tree.len(), 2);
        let statuses = tree.facet(AttendanceColumn::Attendance).unwrap();
        assert_eq!(statuses.get("absent").unwrap().count("absent"), Some(3));
        assert_eq!(statuses.get("late").unwrap().total(), 1);
    }

    #[test]
    fn unset_facet_values_share_a_null_bucket() {
        let records = vec![
            record(Uuid::new_v4(), None, "present"),
            record(Uuid::new_v4(), None, "absent"),
        ];
        let tree =
            build_facet_tree(&records, &[AttendanceColumn::Remark], None).unwrap();
        let remarks = tree.facet(AttendanceColumn::Remark).unwrap();
        assert_eq!(remarks.get(MISSING_VALUE).unwrap().total(), 2);
    }

    #[test]
    fn records_without_status_are_skipped() {
        let mut unmarked = record(Uuid::new_v4(), None, "");
        unmarked.attendance = None;
        let records = vec![unmarked, with_session("present", "morning")];

        let tree = build_facet_tree(&records, &[AttendanceColumn::Session], None).unwrap();
        let sessions = tree.facet(AttendanceColumn::Session).unwrap();
        assert_eq!(sessions.keys().collect::<Vec<_>>(), vec!["morning"]);
    }
}
