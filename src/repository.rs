use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::Result;
use crate::filter::{Predicate, RecordOrder};
use crate::models::{AttendanceRecord, MemberStats};

#[async_trait]
pub trait AttendanceRepository: Send + Sync {
    async fn find_attendance(
        &self,
        predicate: &Predicate,
        order: Option<RecordOrder>,
    ) -> Result<Vec<AttendanceRecord>>;

    /// Returns one page plus the count of every matching record.
    async fn find_attendance_page(
        &self,
        predicate: &Predicate,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<(Vec<AttendanceRecord>, u64)>;

    async fn get_attendance(&self, attendance_id: Uuid) -> Result<Option<AttendanceRecord>>;
    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<AttendanceRecord>;
    async fn save_attendance(&self, record: &AttendanceRecord) -> Result<AttendanceRecord>;
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn is_member(&self, user_id: Uuid, cohort_id: Uuid) -> Result<bool>;
}

/// Filters for the per-member aggregation behind cohort reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsQuery {
    pub cohort_id: Uuid,
    pub search: Option<String>,
    pub user_id: Option<Uuid>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

#[async_trait]
pub trait ReportRepository: Send + Sync {
    /// Student members of the cohort with their attendance totals, ordered by user id.
    async fn cohort_member_stats(&self, query: &StatsQuery) -> Result<Vec<MemberStats>>;
}
