use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod bulk;
mod config;
mod db;
mod error;
mod facet;
mod filter;
mod models;
mod report;
mod repository;
mod search;

use config::AppConfig;
use db::PgRepository;
use filter::SortDirection;
use models::{AttendanceInput, BulkAttendance};

#[derive(Parser)]
#[command(name = "cohort-attendance")]
#[command(about = "Cohort attendance records, facets and reports", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: AppConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small demo cohort
    Seed,
    /// List attendance records, or count them by facet
    Search {
        /// Exact-match filter as column=value; fromDate/toDate give a range
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
        /// Field to facet on; repeatable
        #[arg(long = "facet")]
        facets: Vec<String>,
        /// Sort as key,direction (column for listings, <status>_percentage for facets)
        #[arg(long, value_delimiter = ',')]
        sort: Option<Vec<String>>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
    },
    /// List attendance dated inside a window
    ByDate {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
    },
    /// Attendance percentage per student of a cohort
    Report {
        #[arg(long)]
        cohort: Uuid,
        /// Case-insensitive name search
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        user: Option<Uuid>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, value_parser = parse_direction)]
        name_order: Option<SortDirection>,
        #[arg(long, value_parser = parse_direction)]
        percentage_order: Option<SortDirection>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
        /// Write a markdown report here instead of printing JSON
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Record one user's attendance for a day
    Mark {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        context: Uuid,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        status: String,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        remark: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Change fields of an existing record
    Update {
        #[arg(long)]
        attendance_id: Uuid,
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        remark: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Record a batch of attendance for one day from a CSV file
    Bulk {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        context: Uuid,
        #[arg(long)]
        scope: Option<String>,
    },
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .ok_or_else(|| format!("expected column=value, got {raw}"))
}

fn parse_direction(raw: &str) -> Result<SortDirection, String> {
    SortDirection::parse(raw).ok_or_else(|| format!("{raw} is not asc or desc"))
}

fn filter_map(filters: Vec<(String, String)>) -> Map<String, Value> {
    filters
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let pool = cli.config.connect().await?;
    let repo = PgRepository::new(pool.clone());
    let tenant_id = cli.config.tenant_id;
    let actor = cli.config.actor_id;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Search {
            filters,
            facets,
            sort,
            limit,
            offset,
        } => {
            let request = search::AttendanceSearch {
                limit,
                offset,
                filters: filter_map(filters),
                facets: (!facets.is_empty()).then_some(facets),
                sort,
            };
            let outcome = search::search_attendance(&repo, Some(tenant_id), &request).await?;
            print_json(&outcome)?;
        }
        Commands::ByDate {
            from,
            to,
            filters,
            limit,
            offset,
        } => {
            let request = search::DateWindowSearch {
                from_date: from,
                to_date: to,
                limit,
                offset,
                filters: filter_map(filters),
            };
            let page = search::attendance_by_date(&repo, Some(tenant_id), &request).await?;
            print_json(&page)?;
        }
        Commands::Report {
            cohort,
            search,
            user,
            from,
            to,
            name_order,
            percentage_order,
            limit,
            offset,
            out,
        } => {
            let request = report::ReportRequest {
                cohort_id: cohort,
                search,
                user_id: user,
                from_date: from,
                to_date: to,
                name_order,
                percentage_order,
                limit,
                offset,
            };
            let result = report::attendance_report(&repo, &request).await?;
            match out {
                Some(out) => {
                    let markdown =
                        report::build_markdown(&cohort.to_string(), &request, &result);
                    std::fs::write(&out, markdown)
                        .with_context(|| format!("failed to write {}", out.display()))?;
                    println!("Report written to {}.", out.display());
                }
                None => print_json(&result)?,
            }
        }
        Commands::Mark {
            user,
            context,
            date,
            status,
            scope,
            remark,
            session,
        } => {
            let input = AttendanceInput {
                tenant_id,
                user_id: user,
                context_id: Some(context),
                attendance_date: Some(date),
                attendance: Some(status),
                scope,
                remark,
                session,
                ..Default::default()
            };
            let outcome = bulk::upsert_attendance(&repo, actor, &input).await?;
            println!("Attendance {:?}.", outcome.state());
            print_json(outcome.record())?;
        }
        Commands::Update {
            attendance_id,
            user,
            status,
            remark,
            session,
        } => {
            let input = AttendanceInput {
                tenant_id,
                user_id: user,
                attendance: status,
                remark,
                session,
                ..Default::default()
            };
            let record = bulk::update_attendance(&repo, attendance_id, actor, &input).await?;
            print_json(&record)?;
        }
        Commands::Bulk {
            csv,
            date,
            context,
            scope,
        } => {
            let user_attendance = db::read_batch_csv(&csv)
                .with_context(|| format!("failed to read {}", csv.display()))?;
            let batch = BulkAttendance {
                attendance_date: date,
                context_id: context,
                scope,
                user_attendance,
            };
            let result = bulk::reconcile_batch(&repo, actor, tenant_id, &batch).await;
            print_json(&result)?;
        }
    }

    Ok(())
}
