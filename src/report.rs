use std::cmp::Ordering;
use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AttendanceError, Result};
use crate::filter::{Page, SortDirection, DEFAULT_OFFSET};
use crate::models::{MemberStats, ReportAverage, ReportRow};
use crate::repository::{ReportRepository, StatsQuery};

/// Placeholder for members with no attendance rows to compute from.
pub const NO_DATA: &str = "-";

#[derive(Debug, Clone, Default)]
pub struct ReportRequest {
    pub cohort_id: Uuid,
    pub search: Option<String>,
    pub user_id: Option<Uuid>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub name_order: Option<SortDirection>,
    pub percentage_order: Option<SortDirection>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ReportRequest {
    fn stats_query(&self) -> Result<StatsQuery> {
        let date_range = match (self.from_date, self.to_date) {
            (Some(from), Some(to)) => Some((from, to)),
            (None, None) => None,
            (Some(_), None) => {
                return Err(AttendanceError::validation("toDate", "required with fromDate"))
            }
            (None, Some(_)) => {
                return Err(AttendanceError::validation("fromDate", "required with toDate"))
            }
        };
        let search = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(StatsQuery {
            cohort_id: self.cohort_id,
            search,
            user_id: self.user_id,
            date_range,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceReport {
    pub report: Vec<ReportRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average: Option<ReportAverage>,
}

/// Whole-number attendance percentage, rounded half-up; `None` with no rows.
pub fn member_percentage(stats: &MemberStats) -> Option<u64> {
    let total = u64::try_from(stats.total_attendance).ok().filter(|t| *t > 0)?;
    let present = u64::try_from(stats.present_count).unwrap_or(0);
    Some((200 * present + total) / (2 * total))
}

/// Mean of the defined member percentages, two decimals, `None` if there are none.
pub fn average_percentage(stats: &[MemberStats]) -> Option<String> {
    let percentages: Vec<u64> = stats.iter().filter_map(member_percentage).collect();
    if percentages.is_empty() {
        return None;
    }
    let n = percentages.len() as u64;
    let sum: u64 = percentages.iter().sum();
    let hundredths = (200 * sum + n) / (2 * n);
    Some(format!("{}.{:02}", hundredths / 100, hundredths % 100))
}

fn report_row(stats: &MemberStats) -> ReportRow {
    ReportRow {
        user_id: stats.user_id.to_string(),
        name: stats.name.clone().unwrap_or_default(),
        attendance_percentage: member_percentage(stats)
            .map(|p| p.to_string())
            .unwrap_or_else(|| NO_DATA.to_string()),
    }
}

fn order_stats(stats: &mut [MemberStats], request: &ReportRequest) {
    if let Some(direction) = request.name_order {
        stats.sort_by(|a, b| {
            let a = a.name.as_deref().unwrap_or_default();
            let b = b.name.as_deref().unwrap_or_default();
            direction.apply(a.cmp(b))
        });
    } else if let Some(direction) = request.percentage_order {
        // Members without data rank below every real percentage.
        stats.sort_by(|a, b| {
            let ordering = match (member_percentage(a), member_percentage(b)) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            direction.apply(ordering)
        });
    }
}

/// Per-member attendance percentages for a cohort's students, plus the cohort
/// average when no single user is targeted. The average always covers every
/// matching member, not just the returned page.
pub async fn attendance_report(
    repo: &dyn ReportRepository,
    request: &ReportRequest,
) -> Result<AttendanceReport> {
    let query = request.stats_query()?;
    let mut stats = repo.cohort_member_stats(&query).await?;

    let average = match request.user_id {
        Some(_) => None,
        None => Some(ReportAverage {
            average_attendance_percentage: average_percentage(&stats),
        }),
    };

    order_stats(&mut stats, request);
    let members = stats.len();
    // Without a limit every member is returned.
    let page = Page {
        limit: request.limit.filter(|limit| *limit > 0).unwrap_or(usize::MAX),
        offset: request.offset.unwrap_or(DEFAULT_OFFSET),
    };
    let report: Vec<ReportRow> = page.slice(stats).iter().map(report_row).collect();

    tracing::info!(
        cohort_id = %request.cohort_id,
        members,
        rows = report.len(),
        "generated attendance report"
    );
    Ok(AttendanceReport { report, average })
}

pub fn build_markdown(cohort_label: &str, request: &ReportRequest, report: &AttendanceReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Cohort Attendance Report");
    match (request.from_date, request.to_date) {
        (Some(from), Some(to)) => {
            let _ = writeln!(output, "Generated for {cohort_label} ({from} to {to})");
        }
        _ => {
            let _ = writeln!(output, "Generated for {cohort_label} (all recorded days)");
        }
    }
    let _ = writeln!(output);

    if let Some(average) = &report.average {
        let _ = writeln!(output, "## Cohort Average");
        match &average.average_attendance_percentage {
            Some(value) => {
                let _ = writeln!(output, "Average attendance: {value}%");
            }
            None => {
                let _ = writeln!(output, "No attendance recorded for this cohort.");
            }
        }
        let _ = writeln!(output);
    }

    let _ = writeln!(output, "## Students");
    if report.report.is_empty() {
        let _ = writeln!(output, "No students matched this report.");
    } else {
        let _ = writeln!(output, "| Name | User | Attendance |");
        let _ = writeln!(output, "| --- | --- | --- |");
        for row in &report.report {
            let percentage = if row.attendance_percentage == NO_DATA {
                NO_DATA.to_string()
            } else {
                format!("{}%", row.attendance_percentage)
            };
            let _ = writeln!(output, "| {} | {} | {} |", row.name, row.user_id, percentage);
        }
    }

    output
}
