use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AttendanceError, Result};
use crate::filter::Predicate;
use crate::models::{AttendanceColumn, AttendanceInput, AttendanceRecord, BulkAttendance, FieldValue};
use crate::repository::{AttendanceRepository, MembershipRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Updated,
    Created,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Updated(AttendanceRecord),
    Created(AttendanceRecord),
}

impl UpsertOutcome {
    pub fn state(&self) -> EntryState {
        match self {
            Self::Updated(_) => EntryState::Updated,
            Self::Created(_) => EntryState::Created,
        }
    }

    pub fn record(&self) -> &AttendanceRecord {
        match self {
            Self::Updated(record) | Self::Created(record) => record,
        }
    }

    pub fn into_record(self) -> AttendanceRecord {
        match self {
            Self::Updated(record) | Self::Created(record) => record,
        }
    }
}

/// Records the attendance for `(userId, attendanceDate)`: updates the existing
/// record when one is found, otherwise creates one.
///
/// The user must be a member of the cohort named by `contextId`. The lookup
/// goes through the regular date filter, so an undated record for the same
/// user is treated as a match when no record carries the date itself.
pub async fn upsert_attendance<R>(
    repo: &R,
    actor: Option<Uuid>,
    input: &AttendanceInput,
) -> Result<UpsertOutcome>
where
    R: AttendanceRepository + MembershipRepository + ?Sized,
{
    let context_id = input
        .context_id
        .ok_or_else(|| AttendanceError::validation("contextId", "required"))?;
    let date = input
        .attendance_date
        .ok_or_else(|| AttendanceError::validation("attendanceDate", "required"))?;

    if !repo.is_member(input.user_id, context_id).await? {
        return Err(AttendanceError::InvalidMembership {
            user_id: input.user_id,
            context_id,
        });
    }

    let predicate = Predicate::for_tenant(Some(input.tenant_id))
        .with_exact(AttendanceColumn::AttendanceDate, FieldValue::Date(date))
        .with_exact(AttendanceColumn::UserId, FieldValue::Uuid(input.user_id));
    let mut candidates = repo.find_attendance(&predicate, None).await?;
    candidates.sort_by_key(|record| record.attendance_date.is_none());
    let existing = candidates.into_iter().next();

    let now = Utc::now();
    match existing {
        Some(mut record) => {
            record.merge(input, actor, now);
            let saved = repo.save_attendance(&record).await?;
            Ok(UpsertOutcome::Updated(saved))
        }
        None => {
            let record = AttendanceRecord::create(input, actor, now);
            let saved = repo.insert_attendance(&record).await?;
            Ok(UpsertOutcome::Created(saved))
        }
    }
}

/// Merges `input` into the record with the given id.
pub async fn update_attendance<R>(
    repo: &R,
    attendance_id: Uuid,
    actor: Option<Uuid>,
    input: &AttendanceInput,
) -> Result<AttendanceRecord>
where
    R: AttendanceRepository + ?Sized,
{
    let mut record = repo
        .get_attendance(attendance_id)
        .await?
        .ok_or_else(|| AttendanceError::NotFound(format!("attendance record {attendance_id}")))?;
    record.merge(input, actor, Utc::now());
    repo.save_attendance(&record).await
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSuccess {
    pub index: usize,
    pub user_id: Uuid,
    pub state: EntryState,
    pub record: AttendanceRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailure {
    pub index: usize,
    pub user_id: Uuid,
    pub state: EntryState,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub total_count: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub responses: Vec<BulkSuccess>,
    pub errors: Vec<BulkFailure>,
}

/// Applies every entry of the batch independently. A failing entry is
/// reported in `errors` and never stops the rest of the batch; both lists
/// keep input order.
pub async fn reconcile_batch<R>(
    repo: &R,
    actor: Option<Uuid>,
    tenant_id: Uuid,
    batch: &BulkAttendance,
) -> BulkResult
where
    R: AttendanceRepository + MembershipRepository + ?Sized,
{
    let mut responses = Vec::new();
    let mut errors = Vec::new();

    for (index, entry) in batch.user_attendance.iter().enumerate() {
        let input = batch.entry_input(tenant_id, entry);
        match upsert_attendance(repo, actor, &input).await {
            Ok(outcome) => responses.push(BulkSuccess {
                index,
                user_id: entry.user_id,
                state: outcome.state(),
                record: outcome.into_record(),
            }),
            Err(err) => {
                let state = match err {
                    AttendanceError::InvalidMembership { .. } => EntryState::Rejected,
                    _ => EntryState::Failed,
                };
                warn!(
                    index,
                    user_id = %entry.user_id,
                    kind = ?err.kind(),
                    error = %err,
                    "attendance entry not recorded"
                );
                errors.push(BulkFailure {
                    index,
                    user_id: entry.user_id,
                    state,
                    reason: err.to_string(),
                });
            }
        }
    }

    let result = BulkResult {
        total_count: batch.user_attendance.len(),
        success_count: responses.len(),
        error_count: errors.len(),
        responses,
        errors,
    };
    info!(
        date = %batch.attendance_date,
        context_id = %batch.context_id,
        total = result.total_count,
        succeeded = result.success_count,
        failed = result.error_count,
        "reconciled attendance batch"
    );
    result
}
