use thiserror::Error;
use uuid::Uuid;

/// Coarse classification a caller uses to decide how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Referential,
    NotFound,
    Storage,
}

#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("contextId: invalid combination of contextId {context_id} and userId {user_id}")]
    InvalidMembership { user_id: Uuid, context_id: Uuid },

    #[error("referential error: {0}")]
    Referential(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AttendanceError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. }
            | Self::InvalidMembership { .. }
            | Self::Csv(_)
            | Self::Serialization(_) => ErrorKind::Validation,
            Self::Referential(_) => ErrorKind::Referential,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Storage(_) | Self::Migration(_) | Self::Io(_) => ErrorKind::Storage,
        }
    }

    /// Translates Postgres constraint codes into the caller-facing taxonomy.
    pub fn from_write(err: sqlx::Error, context: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                Some("23503") => return Self::Referential(format!("please provide valid {context}")),
                Some("22P02") => {
                    return Self::validation(context, format!("invalid value: {}", db_err.message()))
                }
                _ => {}
            }
        }
        Self::Storage(err)
    }
}

pub type Result<T> = std::result::Result<T, AttendanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_the_field() {
        let err = AttendanceError::validation("shift", "invalid filter key");
        assert_eq!(err.to_string(), "shift: invalid filter key");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn referential_error_display() {
        let err = AttendanceError::Referential("please provide valid contextId".into());
        assert_eq!(err.to_string(), "referential error: please provide valid contextId");
        assert_eq!(err.kind(), ErrorKind::Referential);
    }

    #[test]
    fn non_database_write_errors_stay_storage() {
        let err = AttendanceError::from_write(sqlx::Error::RowNotFound, "contextId");
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "batch.csv");
        let err = AttendanceError::from(io_err);
        assert!(matches!(err, AttendanceError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
