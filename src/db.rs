use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::{AttendanceError, Result};
use crate::filter::{Condition, Predicate, RecordOrder};
use crate::models::{AttendanceRecord, FieldValue, MemberStats, UserAttendance, PRESENT};
use crate::repository::{AttendanceRepository, MembershipRepository, ReportRepository, StatsQuery};

const ATTENDANCE_COLUMNS: &str = "attendance_id, tenant_id, user_id, context_id, context_type, \
     attendance_date, attendance, scope, remark, latitude, longitude, image, meta_data, \
     session, sync_time, created_by, updated_by, created_at, updated_at";

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &FieldValue) {
    match value {
        FieldValue::Uuid(id) => qb.push_bind(*id),
        FieldValue::Date(date) => qb.push_bind(*date),
        FieldValue::Text(text) => qb.push_bind(text.clone()),
        FieldValue::Number(n) => qb.push_bind(*n),
        FieldValue::Timestamp(ts) => qb.push_bind(*ts),
        FieldValue::Json(json) => qb.push_bind(sqlx::types::Json(json.clone())),
    };
}

fn push_predicate(qb: &mut QueryBuilder<'_, Postgres>, predicate: &Predicate) {
    qb.push(" WHERE TRUE");
    if let Some(tenant_id) = predicate.tenant_id() {
        qb.push(" AND tenant_id = ").push_bind(tenant_id);
    }
    for condition in predicate.conditions() {
        match condition {
            Condition::Equals(column, value) => {
                qb.push(" AND ").push(column.sql_name()).push(" = ");
                push_value(qb, value);
            }
            Condition::DateOrNull(date) => {
                qb.push(" AND (attendance_date = ")
                    .push_bind(*date)
                    .push(" OR attendance_date IS NULL)");
            }
            Condition::DateIsNull => {
                qb.push(" AND attendance_date IS NULL");
            }
            Condition::DateRange { from, to } => {
                qb.push(" AND attendance_date BETWEEN ")
                    .push_bind(*from)
                    .push(" AND ")
                    .push_bind(*to);
            }
        }
    }
}

fn select_attendance(predicate: &Predicate) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM cohort_attendance.attendance"
    ));
    push_predicate(&mut qb, predicate);
    qb
}

#[async_trait]
impl AttendanceRepository for PgRepository {
    async fn find_attendance(
        &self,
        predicate: &Predicate,
        order: Option<RecordOrder>,
    ) -> Result<Vec<AttendanceRecord>> {
        let mut qb = select_attendance(predicate);
        match order {
            Some(order) => {
                qb.push(format!(
                    " ORDER BY {} {}, attendance_id",
                    order.column.sql_name(),
                    order.direction.as_sql()
                ));
            }
            None => {
                qb.push(" ORDER BY created_at, attendance_id");
            }
        }
        let records = qb
            .build_query_as::<AttendanceRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AttendanceError::from_write(e, "filters"))?;
        Ok(records)
    }

    async fn find_attendance_page(
        &self,
        predicate: &Predicate,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<(Vec<AttendanceRecord>, u64)> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM cohort_attendance.attendance");
        push_predicate(&mut count, predicate);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AttendanceError::from_write(e, "filters"))?;

        let mut qb = select_attendance(predicate);
        qb.push(" ORDER BY attendance_date, created_at, attendance_id");
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        qb.push(" OFFSET ").push_bind(offset as i64);

        let records = qb
            .build_query_as::<AttendanceRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AttendanceError::from_write(e, "filters"))?;
        Ok((records, total.max(0) as u64))
    }

    async fn get_attendance(&self, attendance_id: Uuid) -> Result<Option<AttendanceRecord>> {
        let record = sqlx::query_as::<_, AttendanceRecord>(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM cohort_attendance.attendance WHERE attendance_id = $1"
        ))
        .bind(attendance_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<AttendanceRecord> {
        sqlx::query_as::<_, AttendanceRecord>(&format!(
            r#"
            INSERT INTO cohort_attendance.attendance ({ATTENDANCE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING {ATTENDANCE_COLUMNS}
            "#
        ))
        .bind(record.attendance_id)
        .bind(record.tenant_id)
        .bind(record.user_id)
        .bind(record.context_id)
        .bind(&record.context_type)
        .bind(record.attendance_date)
        .bind(&record.attendance)
        .bind(&record.scope)
        .bind(&record.remark)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(&record.image)
        .bind(record.meta_data.clone().map(sqlx::types::Json))
        .bind(&record.session)
        .bind(&record.sync_time)
        .bind(record.created_by)
        .bind(record.updated_by)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AttendanceError::from_write(e, "userId and contextId"))
    }

    async fn save_attendance(&self, record: &AttendanceRecord) -> Result<AttendanceRecord> {
        sqlx::query_as::<_, AttendanceRecord>(&format!(
            r#"
            UPDATE cohort_attendance.attendance
            SET tenant_id = $2, user_id = $3, context_id = $4, context_type = $5,
                attendance_date = $6, attendance = $7, scope = $8, remark = $9,
                latitude = $10, longitude = $11, image = $12, meta_data = $13,
                session = $14, sync_time = $15, updated_by = $16, updated_at = $17
            WHERE attendance_id = $1
            RETURNING {ATTENDANCE_COLUMNS}
            "#
        ))
        .bind(record.attendance_id)
        .bind(record.tenant_id)
        .bind(record.user_id)
        .bind(record.context_id)
        .bind(&record.context_type)
        .bind(record.attendance_date)
        .bind(&record.attendance)
        .bind(&record.scope)
        .bind(&record.remark)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(&record.image)
        .bind(record.meta_data.clone().map(sqlx::types::Json))
        .bind(&record.session)
        .bind(&record.sync_time)
        .bind(record.updated_by)
        .bind(record.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AttendanceError::from_write(e, "contextId"))?
        .ok_or_else(|| AttendanceError::NotFound(format!("attendance record {}", record.attendance_id)))
    }
}

#[async_trait]
impl MembershipRepository for PgRepository {
    async fn is_member(&self, user_id: Uuid, cohort_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM cohort_attendance.cohort_members
                WHERE user_id = $1 AND cohort_id = $2
            )
            "#,
        )
        .bind(user_id)
        .bind(cohort_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl ReportRepository for PgRepository {
    async fn cohort_member_stats(&self, query: &StatsQuery) -> Result<Vec<MemberStats>> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT u.user_id, u.name, \
             COALESCE(aa_stats.total_attendance, 0) AS total_attendance, \
             COALESCE(aa_stats.present_count, 0) AS present_count \
             FROM cohort_attendance.users u \
             JOIN cohort_attendance.cohort_members cm ON cm.user_id = u.user_id \
             LEFT JOIN ( \
                 SELECT aa.user_id, COUNT(*) AS total_attendance, \
                 COUNT(*) FILTER (WHERE aa.attendance = ",
        );
        qb.push_bind(PRESENT)
            .push(") AS present_count FROM cohort_attendance.attendance aa");
        if let Some((from, to)) = query.date_range {
            qb.push(" WHERE aa.attendance_date >= ")
                .push_bind(from)
                .push(" AND aa.attendance_date <= ")
                .push_bind(to);
        }
        qb.push(" GROUP BY aa.user_id) aa_stats ON aa_stats.user_id = cm.user_id WHERE cm.cohort_id = ")
            .push_bind(query.cohort_id)
            .push(" AND cm.role = 'student'");
        if let Some(search) = &query.search {
            qb.push(" AND u.name ILIKE ").push_bind(format!("%{search}%"));
        }
        if let Some(user_id) = query.user_id {
            qb.push(" AND u.user_id = ").push_bind(user_id);
        }
        qb.push(" ORDER BY u.user_id");

        let stats = qb
            .build_query_as::<MemberStats>()
            .fetch_all(&self.pool)
            .await?;
        Ok(stats)
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let tenant_id = Uuid::parse_str("6a1f0f5e-3a0c-4b8e-9f49-2d9bb1b0c001")?;
    let cohort_id = Uuid::parse_str("b7c9a4d2-51e3-4f0a-9c2b-7d1e5f3a8c10")?;

    sqlx::query(
        r#"
        INSERT INTO cohort_attendance.cohorts (cohort_id, tenant_id, name)
        VALUES ($1, $2, $3)
        ON CONFLICT (cohort_id) DO UPDATE SET name = EXCLUDED.name
        "#,
    )
    .bind(cohort_id)
    .bind(tenant_id)
    .bind("Cohort 2026")
    .execute(pool)
    .await?;

    let members = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Avery Lee",
            "avery.lee",
            "student",
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Jules Moreno",
            "jules.moreno",
            "student",
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Kiara Patel",
            "kiara.patel",
            "student",
        ),
        (
            Uuid::parse_str("8e4b2c6a-7f1d-4a3e-b5c9-0d2f6a8e1b34")?,
            "Morgan Reyes",
            "morgan.reyes",
            "teacher",
        ),
    ];

    for (user_id, name, username, role) in &members {
        sqlx::query(
            r#"
            INSERT INTO cohort_attendance.users (user_id, name, username)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(username)
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO cohort_attendance.cohort_members (cohort_id, user_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (cohort_id, user_id) DO UPDATE SET role = EXCLUDED.role
            "#,
        )
        .bind(cohort_id)
        .bind(user_id)
        .bind(role)
        .execute(pool)
        .await?;
    }

    let days = [
        (members[0].0, "2026-02-02", "present", "morning"),
        (members[0].0, "2026-02-03", "present", "morning"),
        (members[0].0, "2026-02-04", "absent", "afternoon"),
        (members[1].0, "2026-02-02", "present", "morning"),
        (members[1].0, "2026-02-03", "absent", "afternoon"),
        (members[1].0, "2026-02-04", "late", "afternoon"),
    ];

    for (user_id, day, status, session) in days {
        let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")?;
        let existing: Option<Uuid> = sqlx::query(
            "SELECT attendance_id FROM cohort_attendance.attendance \
             WHERE user_id = $1 AND attendance_date = $2",
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(pool)
        .await?
        .map(|row| row.get("attendance_id"));
        if existing.is_some() {
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO cohort_attendance.attendance
            (attendance_id, tenant_id, user_id, context_id, context_type,
             attendance_date, attendance, scope, session)
            VALUES ($1, $2, $3, $4, 'cohort', $5, $6, 'student', $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(user_id)
        .bind(cohort_id)
        .bind(date)
        .bind(status)
        .bind(session)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Reads bulk entries from a CSV file with a header row naming the fields.
pub fn read_batch_csv(csv_path: &std::path::Path) -> Result<Vec<UserAttendance>> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CsvRow {
        user_id: Uuid,
        attendance: Option<String>,
        remark: Option<String>,
        latitude: Option<f64>,
        longitude: Option<f64>,
        image: Option<String>,
        sync_time: Option<String>,
        session: Option<String>,
        context_type: Option<String>,
    }

    fn present(value: Option<String>) -> Option<String> {
        value.filter(|v| !v.trim().is_empty())
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut entries = Vec::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        entries.push(UserAttendance {
            user_id: row.user_id,
            attendance: present(row.attendance),
            remark: present(row.remark),
            latitude: row.latitude,
            longitude: row.longitude,
            image: present(row.image),
            meta_data: None,
            sync_time: present(row.sync_time),
            session: present(row.session),
            context_type: present(row.context_type),
        });
    }

    Ok(entries)
}
