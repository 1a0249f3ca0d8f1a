use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{AttendanceError, Result};
use crate::facet::{self, FacetTree};
use crate::filter::{self, Page, RecordOrder, SortPair};
use crate::models::AttendanceRecord;
use crate::repository::AttendanceRepository;

/// Loosely-typed search request as callers submit it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSearch {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    #[serde(default)]
    pub filters: Map<String, Value>,
    pub facets: Option<Vec<String>>,
    pub sort: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SearchOutcome {
    #[serde(rename_all = "camelCase")]
    Listing {
        attendance_list: Vec<Map<String, Value>>,
        limit: usize,
        offset: usize,
    },
    Facets { result: FacetTree },
}

/// Listing when no facets are requested, otherwise a facet tree.
pub async fn search_attendance(
    repo: &dyn AttendanceRepository,
    tenant_id: Option<Uuid>,
    request: &AttendanceSearch,
) -> Result<SearchOutcome> {
    let predicate = filter::build_predicate(tenant_id, &request.filters)?;
    let sort = request.sort.as_deref().map(SortPair::parse).transpose()?;

    match request.facets.as_deref() {
        Some(names) if !names.is_empty() => {
            let columns = facet::resolve_facets(names)?;
            let records = repo.find_attendance(&predicate, None).await?;
            let result = facet::build_facet_tree(&records, &columns, sort.as_ref())?;
            Ok(SearchOutcome::Facets { result })
        }
        _ => {
            let order = sort.as_ref().map(RecordOrder::resolve).transpose()?;
            let page = Page::new(request.limit, request.offset);
            let records = repo.find_attendance(&predicate, order).await?;
            let attendance_list = page
                .slice(records)
                .iter()
                .map(AttendanceRecord::to_view)
                .collect();
            Ok(SearchOutcome::Listing {
                attendance_list,
                limit: page.limit,
                offset: page.offset,
            })
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWindowSearch {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    #[serde(default)]
    pub filters: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWindowPage {
    pub total_count: u64,
    pub data: Vec<Map<String, Value>>,
}

/// Records dated inside the window, paged by the store. Without a limit the
/// whole window is returned.
pub async fn attendance_by_date(
    repo: &dyn AttendanceRepository,
    tenant_id: Option<Uuid>,
    request: &DateWindowSearch,
) -> Result<DateWindowPage> {
    for key in [filter::FROM_DATE, filter::TO_DATE, "attendanceDate"] {
        if request.filters.contains_key(key) {
            return Err(AttendanceError::validation(
                key,
                "the date window already constrains attendanceDate",
            ));
        }
    }

    let predicate = filter::build_predicate(tenant_id, &request.filters)?
        .with_date_range(request.from_date, request.to_date);
    let limit = request.limit.filter(|limit| *limit > 0);
    let offset = request.offset.unwrap_or(filter::DEFAULT_OFFSET);

    let (records, total_count) = repo.find_attendance_page(&predicate, limit, offset).await?;
    Ok(DateWindowPage {
        total_count,
        data: records.iter().map(AttendanceRecord::to_view).collect(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::fixtures::{date, record, tenant};
    use crate::repository::memory::MemoryRepository;

    fn repo_with(records: Vec<AttendanceRecord>) -> MemoryRepository {
        MemoryRepository {
            records: std::sync::Mutex::new(records),
            ..Default::default()
        }
    }

    fn request(value: Value) -> AttendanceSearch {
        serde_json::from_value(value).unwrap()
    }

    fn january(user: Uuid) -> Vec<AttendanceRecord> {
        (1..=25)
            .map(|day| {
                let status = if day % 4 == 0 { "absent" } else { "present" };
                let mut record = record(user, Some(date(2024, 1, day)), status);
                record.session = Some(if day % 2 == 0 { "morning" } else { "afternoon" }.to_string());
                record
            })
            .collect()
    }

    #[tokio::test]
    async fn listing_sorts_then_slices_with_default_page() {
        let repo = repo_with(january(Uuid::new_v4()));
        let outcome = search_attendance(
            &repo,
            Some(tenant()),
            &request(json!({"sort": ["attendanceDate", "DESC"]})),
        )
        .await
        .unwrap();

        let SearchOutcome::Listing { attendance_list, limit, offset } = outcome else {
            panic!("expected a listing");
        };
        assert_eq!((limit, offset), (20, 0));
        assert_eq!(attendance_list.len(), 20);
        assert_eq!(attendance_list[0]["attendanceDate"], json!("2024-01-25"));
        assert_eq!(attendance_list[19]["attendanceDate"], json!("2024-01-06"));
    }

    #[tokio::test]
    async fn listing_honours_offset_after_filtering() {
        let repo = repo_with(january(Uuid::new_v4()));
        let outcome = search_attendance(
            &repo,
            Some(tenant()),
            &request(json!({
                "filters": {"attendance": "absent"},
                "sort": ["attendanceDate", "asc"],
                "limit": 2,
                "offset": 1
            })),
        )
        .await
        .unwrap();

        let SearchOutcome::Listing { attendance_list, .. } = outcome else {
            panic!("expected a listing");
        };
        let dates: Vec<_> = attendance_list.iter().map(|r| r["attendanceDate"].clone()).collect();
        assert_eq!(dates, vec![json!("2024-01-08"), json!("2024-01-12")]);
    }

    #[tokio::test]
    async fn listing_rejects_unknown_sort_column() {
        let repo = repo_with(Vec::new());
        let err = search_attendance(&repo, None, &request(json!({"sort": ["shift", "asc"]})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "shift: invalid sort key");
    }

    #[tokio::test]
    async fn facets_use_the_date_range() {
        let repo = repo_with(january(Uuid::new_v4()));
        let outcome = search_attendance(
            &repo,
            Some(tenant()),
            &request(json!({
                "filters": {"fromDate": "2024-01-01", "toDate": "2024-01-08"},
                "facets": ["session"],
                "sort": ["absent_percentage", "desc"]
            })),
        )
        .await
        .unwrap();

        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "result": {
                    "session": {
                        "morning": {
                            "present": 2,
                            "absent": 2,
                            "present_percentage": "50.00",
                            "absent_percentage": "50.00"
                        },
                        "afternoon": {"present": 4, "present_percentage": "100.00"}
                    }
                }
            })
        );
    }

    #[tokio::test]
    async fn invalid_facet_aborts_the_search() {
        let repo = repo_with(january(Uuid::new_v4()));
        let err = search_attendance(
            &repo,
            None,
            &request(json!({"facets": ["session", "weather"]})),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "weather: invalid facet");
    }

    #[tokio::test]
    async fn date_window_reports_total_and_pages() {
        let repo = repo_with(january(Uuid::new_v4()));
        let window: DateWindowSearch = serde_json::from_value(json!({
            "fromDate": "2024-01-10",
            "toDate": "2024-01-19",
            "limit": 3,
            "offset": 0,
            "filters": {"session": "morning"}
        }))
        .unwrap();

        let page = attendance_by_date(&repo, Some(tenant()), &window).await.unwrap();
        assert_eq!(page.total_count, 5);
        assert_eq!(page.data.len(), 3);
    }

    #[tokio::test]
    async fn date_window_rejects_a_second_date_constraint() {
        let repo = repo_with(Vec::new());
        let window: DateWindowSearch = serde_json::from_value(json!({
            "fromDate": "2024-01-10",
            "toDate": "2024-01-19",
            "filters": {"attendanceDate": "2024-01-11"}
        }))
        .unwrap();

        let err = attendance_by_date(&repo, None, &window).await.unwrap_err();
        assert!(err.to_string().starts_with("attendanceDate:"));
    }
}
