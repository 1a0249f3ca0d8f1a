use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{AttendanceError, Result};

pub const DEFAULT_SCOPE: &str = "student";
pub const PRESENT: &str = "present";
pub const ABSENT: &str = "absent";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub attendance_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub context_id: Option<Uuid>,
    pub context_type: Option<String>,
    pub attendance_date: Option<NaiveDate>,
    pub attendance: Option<String>,
    pub scope: Option<String>,
    pub remark: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub image: Option<String>,
    pub meta_data: Option<Value>,
    pub session: Option<String>,
    pub sync_time: Option<String>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Incoming attendance fields. `None` means "leave unchanged" on update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceInput {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub context_id: Option<Uuid>,
    pub context_type: Option<String>,
    pub attendance_date: Option<NaiveDate>,
    pub attendance: Option<String>,
    pub scope: Option<String>,
    pub remark: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub image: Option<String>,
    pub meta_data: Option<Value>,
    pub session: Option<String>,
    pub sync_time: Option<String>,
}

impl AttendanceRecord {
    /// Builds a fresh record, defaulting the scope to `student`.
    pub fn create(input: &AttendanceInput, actor: Option<Uuid>, now: DateTime<Utc>) -> Self {
        Self {
            attendance_id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            user_id: input.user_id,
            context_id: input.context_id,
            context_type: input.context_type.clone(),
            attendance_date: input.attendance_date,
            attendance: input.attendance.clone(),
            scope: Some(
                input
                    .scope
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
            ),
            remark: input.remark.clone(),
            latitude: input.latitude,
            longitude: input.longitude,
            image: input.image.clone(),
            meta_data: input.meta_data.clone(),
            session: input.session.clone(),
            sync_time: input.sync_time.clone(),
            created_by: actor,
            updated_by: actor,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites every field the input carries and stamps the audit columns.
    pub fn merge(&mut self, input: &AttendanceInput, actor: Option<Uuid>, now: DateTime<Utc>) {
        fn take<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
            if let Some(value) = incoming {
                *slot = Some(value.clone());
            }
        }

        self.tenant_id = input.tenant_id;
        self.user_id = input.user_id;
        take(&mut self.context_id, &input.context_id);
        take(&mut self.context_type, &input.context_type);
        take(&mut self.attendance_date, &input.attendance_date);
        take(&mut self.attendance, &input.attendance);
        take(&mut self.scope, &input.scope);
        take(&mut self.remark, &input.remark);
        take(&mut self.latitude, &input.latitude);
        take(&mut self.longitude, &input.longitude);
        take(&mut self.image, &input.image);
        take(&mut self.meta_data, &input.meta_data);
        take(&mut self.session, &input.session);
        take(&mut self.sync_time, &input.sync_time);
        if actor.is_some() {
            self.updated_by = actor;
        }
        self.updated_at = now;
    }

    pub fn field(&self, column: AttendanceColumn) -> Option<FieldValue> {
        use AttendanceColumn as C;
        match column {
            C::AttendanceId => Some(FieldValue::Uuid(self.attendance_id)),
            C::TenantId => Some(FieldValue::Uuid(self.tenant_id)),
            C::UserId => Some(FieldValue::Uuid(self.user_id)),
            C::ContextId => self.context_id.map(FieldValue::Uuid),
            C::ContextType => self.context_type.clone().map(FieldValue::Text),
            C::AttendanceDate => self.attendance_date.map(FieldValue::Date),
            C::Attendance => self.attendance.clone().map(FieldValue::Text),
            C::Scope => self.scope.clone().map(FieldValue::Text),
            C::Remark => self.remark.clone().map(FieldValue::Text),
            C::Latitude => self.latitude.map(FieldValue::Number),
            C::Longitude => self.longitude.map(FieldValue::Number),
            C::Image => self.image.clone().map(FieldValue::Text),
            C::MetaData => self.meta_data.clone().map(FieldValue::Json),
            C::Session => self.session.clone().map(FieldValue::Text),
            C::SyncTime => self.sync_time.clone().map(FieldValue::Text),
            C::CreatedBy => self.created_by.map(FieldValue::Uuid),
            C::UpdatedBy => self.updated_by.map(FieldValue::Uuid),
            C::CreatedAt => Some(FieldValue::Timestamp(self.created_at)),
            C::UpdatedAt => Some(FieldValue::Timestamp(self.updated_at)),
        }
    }

    /// Listing shape: every column present, unset ones replaced by their default.
    pub fn to_view(&self) -> Map<String, Value> {
        AttendanceColumn::ALL
            .iter()
            .map(|column| {
                let value = self
                    .field(*column)
                    .map(|value| value.to_json())
                    .unwrap_or_else(|| column.view_default());
                (column.name().to_string(), value)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Uuid,
    Date,
    Text,
    Number,
    Timestamp,
    Json,
}

/// The closed set of attendance columns callers may filter, sort or facet on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttendanceColumn {
    AttendanceId,
    TenantId,
    UserId,
    ContextId,
    ContextType,
    AttendanceDate,
    Attendance,
    Scope,
    Remark,
    Latitude,
    Longitude,
    Image,
    MetaData,
    Session,
    SyncTime,
    CreatedBy,
    UpdatedBy,
    CreatedAt,
    UpdatedAt,
}

impl AttendanceColumn {
    pub const ALL: [AttendanceColumn; 19] = [
        Self::TenantId,
        Self::AttendanceId,
        Self::UserId,
        Self::AttendanceDate,
        Self::Attendance,
        Self::Remark,
        Self::Latitude,
        Self::Longitude,
        Self::Image,
        Self::MetaData,
        Self::SyncTime,
        Self::Session,
        Self::ContextId,
        Self::ContextType,
        Self::Scope,
        Self::CreatedAt,
        Self::UpdatedAt,
        Self::CreatedBy,
        Self::UpdatedBy,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|column| column.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::AttendanceId => "attendanceId",
            Self::TenantId => "tenantId",
            Self::UserId => "userId",
            Self::ContextId => "contextId",
            Self::ContextType => "contextType",
            Self::AttendanceDate => "attendanceDate",
            Self::Attendance => "attendance",
            Self::Scope => "scope",
            Self::Remark => "remark",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::Image => "image",
            Self::MetaData => "metaData",
            Self::Session => "session",
            Self::SyncTime => "syncTime",
            Self::CreatedBy => "createdBy",
            Self::UpdatedBy => "updatedBy",
            Self::CreatedAt => "createdAt",
            Self::UpdatedAt => "updatedAt",
        }
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            Self::AttendanceId => "attendance_id",
            Self::TenantId => "tenant_id",
            Self::UserId => "user_id",
            Self::ContextId => "context_id",
            Self::ContextType => "context_type",
            Self::AttendanceDate => "attendance_date",
            Self::Attendance => "attendance",
            Self::Scope => "scope",
            Self::Remark => "remark",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::Image => "image",
            Self::MetaData => "meta_data",
            Self::Session => "session",
            Self::SyncTime => "sync_time",
            Self::CreatedBy => "created_by",
            Self::UpdatedBy => "updated_by",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }

    pub fn kind(self) -> ColumnKind {
        match self {
            Self::AttendanceId
            | Self::TenantId
            | Self::UserId
            | Self::ContextId
            | Self::CreatedBy
            | Self::UpdatedBy => ColumnKind::Uuid,
            Self::AttendanceDate => ColumnKind::Date,
            Self::Latitude | Self::Longitude => ColumnKind::Number,
            Self::MetaData => ColumnKind::Json,
            Self::CreatedAt | Self::UpdatedAt => ColumnKind::Timestamp,
            Self::ContextType
            | Self::Attendance
            | Self::Scope
            | Self::Remark
            | Self::Image
            | Self::Session
            | Self::SyncTime => ColumnKind::Text,
        }
    }

    /// Value a listing view shows when the record leaves the column unset.
    pub fn view_default(self) -> Value {
        match self {
            Self::AttendanceDate => Value::Null,
            Self::Latitude | Self::Longitude => json!(0),
            Self::MetaData => json!([]),
            _ => json!(""),
        }
    }

    /// Converts a loosely-typed request value into this column's type.
    pub fn parse_value(self, raw: &Value) -> Result<FieldValue> {
        let invalid = |expected: &str| {
            AttendanceError::validation(self.name(), format!("expected {expected}, got {raw}"))
        };
        let text = raw.as_str().map(str::trim);

        match self.kind() {
            ColumnKind::Uuid => text
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(FieldValue::Uuid)
                .ok_or_else(|| invalid("a UUID")),
            ColumnKind::Date => text
                .and_then(parse_date)
                .map(FieldValue::Date)
                .ok_or_else(|| invalid("a YYYY-MM-DD date")),
            ColumnKind::Timestamp => text
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|ts| FieldValue::Timestamp(ts.with_timezone(&Utc)))
                .ok_or_else(|| invalid("an RFC 3339 timestamp")),
            ColumnKind::Number => raw
                .as_f64()
                .or_else(|| text.and_then(|s| s.parse().ok()))
                .map(FieldValue::Number)
                .ok_or_else(|| invalid("a number")),
            ColumnKind::Text => match raw {
                Value::String(s) => Ok(FieldValue::Text(s.clone())),
                Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
                Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
                _ => Err(invalid("a string")),
            },
            ColumnKind::Json => Ok(FieldValue::Json(raw.clone())),
        }
    }
}

impl fmt::Display for AttendanceColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// A typed cell of an attendance record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Uuid(Uuid),
    Date(NaiveDate),
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Json(Value),
}

impl FieldValue {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Uuid(id) => Value::String(id.to_string()),
            Self::Date(date) => Value::String(date.format("%Y-%m-%d").to_string()),
            Self::Text(text) => Value::String(text.clone()),
            Self::Number(n) => json!(n),
            Self::Timestamp(ts) => Value::String(ts.to_rfc3339()),
            Self::Json(value) => value.clone(),
        }
    }

    /// Ordering between two cells of the same column.
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Uuid(a), Self::Uuid(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            _ => self.to_string().cmp(&other.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(id) => write!(f, "{id}"),
            Self::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Self::Text(text) => f.write_str(text),
            Self::Number(n) => write!(f, "{n}"),
            Self::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
            Self::Json(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CohortMember {
    pub user_id: Uuid,
    pub cohort_id: Uuid,
    pub role: String,
}

/// Per-member counts produced by the inner aggregation stage.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MemberStats {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub total_attendance: i64,
    pub present_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub user_id: String,
    pub name: String,
    #[serde(rename = "attendance_percentage")]
    pub attendance_percentage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportAverage {
    pub average_attendance_percentage: Option<String>,
}

/// One user's line in a bulk submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAttendance {
    pub user_id: Uuid,
    pub attendance: Option<String>,
    pub remark: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub image: Option<String>,
    pub meta_data: Option<Value>,
    pub sync_time: Option<String>,
    pub session: Option<String>,
    pub context_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkAttendance {
    pub attendance_date: NaiveDate,
    pub context_id: Uuid,
    pub scope: Option<String>,
    pub user_attendance: Vec<UserAttendance>,
}

impl BulkAttendance {
    pub fn entry_input(&self, tenant_id: Uuid, entry: &UserAttendance) -> AttendanceInput {
        AttendanceInput {
            tenant_id,
            user_id: entry.user_id,
            context_id: Some(self.context_id),
            context_type: entry.context_type.clone(),
            attendance_date: Some(self.attendance_date),
            attendance: entry.attendance.clone(),
            scope: self.scope.clone(),
            remark: entry.remark.clone(),
            latitude: entry.latitude,
            longitude: entry.longitude,
            image: entry.image.clone(),
            meta_data: entry.meta_data.clone(),
            session: entry.session.clone(),
            sync_time: entry.sync_time.clone(),
        }
    }
}
