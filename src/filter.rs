use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{AttendanceError, Result};
use crate::models::{parse_date, AttendanceColumn, AttendanceRecord, FieldValue};

pub const DEFAULT_LIMIT: usize = 20;
pub const DEFAULT_OFFSET: usize = 0;

pub const FROM_DATE: &str = "fromDate";
pub const TO_DATE: &str = "toDate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(Self::Asc),
            "desc" | "descending" => Some(Self::Desc),
            _ => None,
        }
    }

    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Asc => ordering,
            Self::Desc => ordering.reverse(),
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        })
    }
}

/// A raw `[key, direction]` pair before it is resolved against a column or
/// a facet percentage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortPair {
    pub key: String,
    pub direction: SortDirection,
}

impl SortPair {
    pub fn parse(pair: &[String]) -> Result<Self> {
        let [key, direction] = pair else {
            return Err(AttendanceError::validation(
                "sort",
                "expected a [column, direction] pair",
            ));
        };
        let direction = SortDirection::parse(direction).ok_or_else(|| {
            AttendanceError::validation("sort[1]", format!("{direction} is not asc or desc"))
        })?;
        Ok(Self {
            key: key.trim().to_string(),
            direction,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOrder {
    pub column: AttendanceColumn,
    pub direction: SortDirection,
}

impl RecordOrder {
    pub fn resolve(pair: &SortPair) -> Result<Self> {
        let column = AttendanceColumn::parse(&pair.key).ok_or_else(|| {
            AttendanceError::validation(pair.key.clone(), "invalid sort key")
        })?;
        Ok(Self {
            column,
            direction: pair.direction,
        })
    }

    /// Postgres semantics: NULLs sort as larger than every value.
    pub fn compare(&self, a: &AttendanceRecord, b: &AttendanceRecord) -> Ordering {
        let ordering = match (a.field(self.column), b.field(self.column)) {
            (Some(a), Some(b)) => a.compare(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        self.direction.apply(ordering)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(AttendanceColumn, FieldValue),
    /// Exact date match that also accepts records with no date at all.
    DateOrNull(NaiveDate),
    DateIsNull,
    DateRange { from: NaiveDate, to: NaiveDate },
}

impl Condition {
    pub fn matches(&self, record: &AttendanceRecord) -> bool {
        match self {
            Self::Equals(column, expected) => record.field(*column).as_ref() == Some(expected),
            Self::DateOrNull(date) => match record.attendance_date {
                Some(actual) => actual == *date,
                None => true,
            },
            Self::DateIsNull => record.attendance_date.is_none(),
            Self::DateRange { from, to } => record
                .attendance_date
                .is_some_and(|actual| *from <= actual && actual <= *to),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    tenant_id: Option<Uuid>,
    conditions: Vec<Condition>,
}

impl Predicate {
    pub fn for_tenant(tenant_id: Option<Uuid>) -> Self {
        Self {
            tenant_id,
            conditions: Vec::new(),
        }
    }

    /// Adds an exact-match condition; `attendanceDate` also matches unset dates.
    pub fn with_exact(mut self, column: AttendanceColumn, value: FieldValue) -> Self {
        let condition = match (column, value) {
            (AttendanceColumn::AttendanceDate, FieldValue::Date(date)) => {
                Condition::DateOrNull(date)
            }
            (column, value) => Condition::Equals(column, value),
        };
        self.conditions.push(condition);
        self
    }

    pub fn with_null_date(mut self) -> Self {
        self.conditions.push(Condition::DateIsNull);
        self
    }

    /// Replaces any other condition on `attendanceDate` with an inclusive range.
    pub fn with_date_range(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.conditions.retain(|condition| {
            !matches!(
                condition,
                Condition::DateOrNull(_)
                    | Condition::DateIsNull
                    | Condition::DateRange { .. }
                    | Condition::Equals(AttendanceColumn::AttendanceDate, _)
            )
        });
        self.conditions.push(Condition::DateRange { from, to });
        self
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        self.tenant_id
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn matches(&self, record: &AttendanceRecord) -> bool {
        self.tenant_id.map_or(true, |tenant| record.tenant_id == tenant)
            && self.conditions.iter().all(|condition| condition.matches(record))
    }
}

/// Builds a predicate from a loosely-typed filter map.
///
/// Keys must name a known attendance column. The only exception is the
/// `fromDate`/`toDate` pair, which must be supplied together and turns into
/// an inclusive range on `attendanceDate` that overrides an exact date filter.
/// A null `attendanceDate` selects only undated records.
pub fn build_predicate(tenant_id: Option<Uuid>, filters: &Map<String, Value>) -> Result<Predicate> {
    let range = date_range(filters)?;
    let mut predicate = Predicate::for_tenant(tenant_id);

    for (key, raw) in filters {
        match AttendanceColumn::parse(key) {
            Some(AttendanceColumn::AttendanceDate) if raw.is_null() => {
                predicate = predicate.with_null_date();
            }
            Some(column) => {
                let value = column.parse_value(raw)?;
                predicate = predicate.with_exact(column, value);
            }
            None if range.is_some() && (key == FROM_DATE || key == TO_DATE) => {}
            None => {
                tracing::debug!(key = %key, "rejected unknown filter key");
                return Err(AttendanceError::validation(key.clone(), "invalid filter key"));
            }
        }
    }

    if let Some((from, to)) = range {
        predicate = predicate.with_date_range(from, to);
    }
    Ok(predicate)
}

fn date_range(filters: &Map<String, Value>) -> Result<Option<(NaiveDate, NaiveDate)>> {
    let (Some(from), Some(to)) = (filters.get(FROM_DATE), filters.get(TO_DATE)) else {
        return Ok(None);
    };
    Ok(Some((parse_bound(FROM_DATE, from)?, parse_bound(TO_DATE, to)?)))
}

fn parse_bound(field: &str, raw: &Value) -> Result<NaiveDate> {
    raw.as_str()
        .and_then(parse_date)
        .ok_or_else(|| AttendanceError::validation(field, format!("expected a YYYY-MM-DD date, got {raw}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    /// A zero or missing limit falls back to the default page size.
    pub fn new(limit: Option<usize>, offset: Option<usize>) -> Self {
        Self {
            limit: limit.filter(|limit| *limit > 0).unwrap_or(DEFAULT_LIMIT),
            offset: offset.unwrap_or(DEFAULT_OFFSET),
        }
    }

    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::fixtures::{date, record, tenant};

    fn filters(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("filters must be an object"),
        }
    }

    #[test]
    fn unknown_filter_key_is_named_in_the_error() {
        let err = build_predicate(None, &filters(json!({"shift": "night"}))).unwrap_err();
        assert_eq!(err.to_string(), "shift: invalid filter key");
    }

    #[test]
    fn lone_from_date_is_an_unknown_key() {
        let err = build_predicate(None, &filters(json!({"fromDate": "2024-01-01"}))).unwrap_err();
        assert!(err.to_string().starts_with("fromDate:"));
    }

    #[test]
    fn unknown_key_is_rejected_even_next_to_a_date_range() {
        let err = build_predicate(
            None,
            &filters(json!({"fromDate": "2024-01-01", "toDate": "2024-01-31", "shift": "x"})),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("shift:"));
    }

    #[test]
    fn date_filter_also_matches_undated_records() {
        let predicate = build_predicate(
            Some(tenant()),
            &filters(json!({"attendanceDate": "2024-02-01"})),
        )
        .unwrap();
        let user = Uuid::new_v4();

        assert!(predicate.matches(&record(user, Some(date(2024, 2, 1)), "present")));
        assert!(predicate.matches(&record(user, None, "present")));
        assert!(!predicate.matches(&record(user, Some(date(2024, 2, 2)), "present")));
    }

    #[test]
    fn null_date_filter_selects_undated_records() {
        let predicate =
            build_predicate(Some(tenant()), &filters(json!({"attendanceDate": null}))).unwrap();
        assert_eq!(predicate.conditions(), &[Condition::DateIsNull]);

        let user = Uuid::new_v4();
        assert!(predicate.matches(&record(user, None, "present")));
        assert!(!predicate.matches(&record(user, Some(date(2024, 2, 1)), "present")));
    }

    #[test]
    fn range_wins_over_exact_date() {
        let predicate = build_predicate(
            None,
            &filters(json!({
                "attendanceDate": "2023-12-25",
                "fromDate": "2024-01-01",
                "toDate": "2024-01-31"
            })),
        )
        .unwrap();

        assert_eq!(
            predicate.conditions(),
            &[Condition::DateRange {
                from: date(2024, 1, 1),
                to: date(2024, 1, 31)
            }]
        );
        let user = Uuid::new_v4();
        assert!(predicate.matches(&record(user, Some(date(2024, 1, 31)), "present")));
        assert!(!predicate.matches(&record(user, None, "present")));
        assert!(!predicate.matches(&record(user, Some(date(2023, 12, 25)), "present")));
    }

    #[test]
    fn tenant_scopes_every_predicate() {
        let predicate = Predicate::for_tenant(Some(Uuid::new_v4()));
        assert!(!predicate.matches(&record(Uuid::new_v4(), None, "present")));
    }

    #[test]
    fn exact_match_compares_typed_values() {
        let user = Uuid::new_v4();
        let predicate = build_predicate(
            None,
            &filters(json!({"userId": user.to_string(), "attendance": "absent"})),
        )
        .unwrap();

        assert!(predicate.matches(&record(user, None, "absent")));
        assert!(!predicate.matches(&record(user, None, "present")));
        assert!(!predicate.matches(&record(Uuid::new_v4(), None, "absent")));
    }

    #[test]
    fn sort_direction_is_case_insensitive() {
        let pair = SortPair::parse(&["attendanceDate".into(), "DeSc".into()]).unwrap();
        assert_eq!(pair.direction, SortDirection::Desc);
        let order = RecordOrder::resolve(&pair).unwrap();
        assert_eq!(order.column, AttendanceColumn::AttendanceDate);
    }

    #[test]
    fn unknown_sort_column_is_named() {
        let pair = SortPair::parse(&["shift".into(), "asc".into()]).unwrap();
        let err = RecordOrder::resolve(&pair).unwrap_err();
        assert_eq!(err.to_string(), "shift: invalid sort key");
    }

    #[test]
    fn sort_pair_requires_two_elements() {
        assert!(SortPair::parse(&["attendanceDate".into()]).is_err());
        assert!(SortPair::parse(&["attendanceDate".into(), "sideways".into()]).is_err());
    }

    #[test]
    fn descending_order_puts_undated_records_first() {
        let user = Uuid::new_v4();
        let order = RecordOrder {
            column: AttendanceColumn::AttendanceDate,
            direction: SortDirection::Desc,
        };
        let mut records = vec![
            record(user, Some(date(2024, 1, 2)), "present"),
            record(user, None, "present"),
            record(user, Some(date(2024, 1, 5)), "present"),
        ];
        records.sort_by(|a, b| order.compare(a, b));

        let dates: Vec<_> = records.iter().map(|r| r.attendance_date).collect();
        assert_eq!(dates, vec![None, Some(date(2024, 1, 5)), Some(date(2024, 1, 2))]);
    }

    #[test]
    fn page_defaults_and_slices_after_sorting() {
        let page = Page::new(None, None);
        assert_eq!(page, Page { limit: 20, offset: 0 });
        assert_eq!(Page::new(Some(0), Some(3)).limit, DEFAULT_LIMIT);

        let page = Page::new(Some(2), Some(1));
        assert_eq!(page.slice(vec![1, 2, 3, 4]), vec![2, 3]);
        assert!(page.slice(Vec::<i32>::new()).is_empty());
    }
}
