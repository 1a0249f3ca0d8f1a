use anyhow::Context;
use clap::Args;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

/// Connection and identity settings shared by every command.
#[derive(Debug, Clone, Args)]
pub struct AppConfig {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    /// Maximum pooled connections
    #[arg(long, env = "ATTENDANCE_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Tenant that scopes every read and write
    #[arg(long, env = "ATTENDANCE_TENANT_ID")]
    pub tenant_id: Uuid,

    /// User recorded as createdBy/updatedBy on writes
    #[arg(long, env = "ATTENDANCE_ACTOR_ID")]
    pub actor_id: Option<Uuid>,
}

impl AppConfig {
    pub async fn connect(&self) -> anyhow::Result<PgPool> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
            .context("failed to connect to Postgres")
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        config: AppConfig,
    }

    const TENANT: &str = "6a1f0f5e-3a0c-4b8e-9f49-2d9bb1b0c001";

    #[test]
    fn flags_populate_config() {
        let harness = Harness::try_parse_from([
            "cohort-attendance",
            "--database-url",
            "postgres://localhost/attendance",
            "--tenant-id",
            TENANT,
            "--max-connections",
            "2",
        ])
        .unwrap();

        assert_eq!(harness.config.max_connections, 2);
        assert_eq!(harness.config.tenant_id, Uuid::parse_str(TENANT).unwrap());
        assert_eq!(harness.config.actor_id, None);
    }

    #[test]
    fn malformed_tenant_is_rejected() {
        let result = Harness::try_parse_from([
            "cohort-attendance",
            "--database-url",
            "postgres://localhost/attendance",
            "--tenant-id",
            "tenant-one",
        ]);
        assert!(result.is_err());
    }
}
