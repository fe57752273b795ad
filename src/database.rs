use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::create_timestamp;
use crate::report::BuildReport;
use crate::status::{BuildStatus, Language};

const DATABASE_NAME: &str = "judge.sqlite3";

pub fn get_db_path() -> anyhow::Result<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs =
        ProjectDirs::from("", "", "judge").ok_or_else(|| anyhow!("Unable to find user directory"))?;
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir)?;

    Ok(data_dir.join(DATABASE_NAME))
}

pub async fn init_db(db_path: impl AsRef<Path>, max_connections: u32) -> sqlx::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path.as_ref())
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5)) // lock contention between claimers
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .min_connections(0)
        .connect_with(options)
        .await?;

    let mut tx = db_pool.begin().await?;

    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS assignments (
            id            INTEGER PRIMARY KEY,
            uuid          TEXT    NOT NULL UNIQUE
        );",
        r"
        CREATE TABLE IF NOT EXISTS builds (
            id            INTEGER  PRIMARY KEY,
            uuid          TEXT     NOT NULL UNIQUE,
            assignment_id INTEGER  NOT NULL,
            status        TEXT     NOT NULL,
            language      TEXT     NOT NULL,
            source        TEXT     NOT NULL,
            web_hook_url  TEXT,
            created_time  TEXT     NOT NULL,
            updated_time  TEXT     NOT NULL,
            FOREIGN KEY (assignment_id)  REFERENCES assignments (id)
        );",
        "CREATE INDEX IF NOT EXISTS idx_builds_status ON builds(status);",
        r"
        CREATE TABLE IF NOT EXISTS testcases (
            id            INTEGER  PRIMARY KEY,
            uuid          TEXT     NOT NULL UNIQUE,
            assignment_id INTEGER  NOT NULL,
            input         TEXT     NOT NULL,
            expected      TEXT     NOT NULL,
            FOREIGN KEY (assignment_id)  REFERENCES assignments (id)
        );",
        "CREATE INDEX IF NOT EXISTS idx_testcases_assignment ON testcases(assignment_id);",
        r"
        CREATE TABLE IF NOT EXISTS reports (
            build_id      INTEGER  PRIMARY KEY,
            tests_passed  INTEGER  NOT NULL,
            tests_total   INTEGER  NOT NULL,
            exception     TEXT     NOT NULL DEFAULT '',
            build_log     TEXT     NOT NULL DEFAULT '',
            tests_log     TEXT     NOT NULL DEFAULT '',
            created_time  TEXT     NOT NULL,
            FOREIGN KEY (build_id)  REFERENCES builds (id)
        );",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // Remove WAL and SHM files (ignore errors as they might not exist)
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

/// Returns true if the error is a UNIQUE constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|e| e.is_unique_violation())
}

fn decode_error(e: anyhow::Error) -> sqlx::Error {
    sqlx::Error::Decode(e.into())
}

/// Maps an external assignment UUID to its internal id, registering it on first sight.
pub async fn resolve_or_create_assignment_id(pool: &SqlitePool, uuid: &str) -> sqlx::Result<i64> {
    sqlx::query("INSERT INTO assignments (uuid) VALUES (?) ON CONFLICT(uuid) DO NOTHING")
        .bind(uuid)
        .execute(pool)
        .await?;

    sqlx::query_scalar("SELECT id FROM assignments WHERE uuid = ?")
        .bind(uuid)
        .fetch_one(pool)
        .await
}

pub async fn find_assignment_id(pool: &SqlitePool, uuid: &str) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar("SELECT id FROM assignments WHERE uuid = ?")
        .bind(uuid)
        .fetch_optional(pool)
        .await
}

#[derive(Debug)]
pub struct NewBuild<'a> {
    pub assignment_id: i64,
    pub uuid: &'a str,
    pub language: Language,
    pub source: &'a str,
    pub web_hook_url: Option<&'a str>,
}

/// Inserts a new job in `pending` status.
///
/// # Errors
///
/// Fails on a duplicate key (see [`is_unique_violation`]) or when the database is unreachable.
pub async fn register_build(pool: &SqlitePool, build: &NewBuild<'_>) -> sqlx::Result<()> {
    let now = create_timestamp();

    sqlx::query(
        r"
        INSERT INTO builds (uuid, assignment_id, status, language, source, web_hook_url, created_time, updated_time)
        VALUES (?, ?, 'pending', ?, ?, ?, ?, ?)
        ",
    )
    .bind(build.uuid)
    .bind(build.assignment_id)
    .bind(build.language.as_str())
    .bind(build.source)
    .bind(build.web_hook_url)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Debug)]
pub struct NewTestCase<'a> {
    pub assignment_id: i64,
    pub uuid: &'a str,
    pub input: &'a str,
    pub expected: &'a str,
}

pub async fn register_test_case(pool: &SqlitePool, case: &NewTestCase<'_>) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO testcases (uuid, assignment_id, input, expected)
        VALUES (?, ?, ?, ?)
        ",
    )
    .bind(case.uuid)
    .bind(case.assignment_id)
    .bind(case.input)
    .bind(case.expected)
    .execute(pool)
    .await?;

    Ok(())
}

/// A job that was just flipped from `pending` to `building`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBuild {
    pub uuid: String,
    pub assignment_id: i64,
    pub language: Language,
    pub source: String,
    pub web_hook_url: Option<String>,
}

/// Atomically claims at most one pending job.
///
/// Selection and the status flip happen in a single UPDATE, so two callers
/// (in this process or another one sharing the database file) can never
/// claim the same row. Returns `None` when nothing is pending.
pub async fn pull_pending_build(pool: &SqlitePool) -> sqlx::Result<Option<PendingBuild>> {
    #[derive(sqlx::FromRow)]
    struct ClaimedRow {
        uuid: String,
        assignment_id: i64,
        language: String,
        source: String,
        web_hook_url: Option<String>,
    }

    let now = create_timestamp();
    let row = sqlx::query_as::<_, ClaimedRow>(
        r"
        UPDATE builds
        SET status = 'building', updated_time = ?
        WHERE id = (SELECT id FROM builds WHERE status = 'pending' ORDER BY id LIMIT 1)
          AND status = 'pending'
        RETURNING uuid, assignment_id, language, source, web_hook_url
        ",
    )
    .bind(now)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(PendingBuild {
        language: row.language.parse().map_err(decode_error)?,
        uuid: row.uuid,
        assignment_id: row.assignment_id,
        source: row.source,
        web_hook_url: row.web_hook_url,
    }))
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub input: String,
    pub expected: String,
}

pub async fn get_test_cases(pool: &SqlitePool, assignment_id: i64) -> sqlx::Result<Vec<TestCase>> {
    sqlx::query_as::<_, TestCase>(
        "SELECT input, expected FROM testcases WHERE assignment_id = ? ORDER BY id",
    )
    .bind(assignment_id)
    .fetch_all(pool)
    .await
}

/// Records the report of a finished build and moves the job to its terminal status.
///
/// Both writes share one transaction: either the job is terminal with exactly
/// one report, or nothing changed.
pub async fn add_build_report(pool: &SqlitePool, report: &BuildReport) -> anyhow::Result<()> {
    if !BuildStatus::Building.can_transition_to(report.status) {
        bail!(
            "Refusing report for build {} with non-terminal status {}",
            report.key,
            report.status
        );
    }

    let now = create_timestamp();
    let mut tx = pool.begin().await?;

    let build_id: Option<i64> = sqlx::query_scalar(
        r"
        UPDATE builds
        SET status = ?, updated_time = ?
        WHERE uuid = ? AND status = 'building'
        RETURNING id
        ",
    )
    .bind(report.status.as_str())
    .bind(&now)
    .bind(&report.key)
    .fetch_optional(tx.as_mut())
    .await?;

    let Some(build_id) = build_id else {
        bail!("Build {} is unknown or not in building state", report.key);
    };

    sqlx::query(
        r"
        INSERT INTO reports (build_id, tests_passed, tests_total, exception, build_log, tests_log, created_time)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(build_id)
    .bind(report.tests_passed)
    .bind(report.tests_total)
    .bind(&report.exception)
    .bind(&report.build_log)
    .bind(&report.tests_log)
    .bind(&now)
    .execute(tx.as_mut())
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn get_build_status(pool: &SqlitePool, uuid: &str) -> sqlx::Result<Option<BuildStatus>> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM builds WHERE uuid = ?")
        .bind(uuid)
        .fetch_optional(pool)
        .await?;

    status
        .map(|s| s.parse().map_err(decode_error))
        .transpose()
}

/// Status of a job plus its report columns; the latter are empty until the job is terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReport {
    pub status: BuildStatus,
    pub exception: String,
    pub build_log: String,
    pub tests_log: String,
    pub tests_passed: u32,
    pub tests_total: u32,
}

pub async fn get_build_report(pool: &SqlitePool, uuid: &str) -> sqlx::Result<Option<StoredReport>> {
    #[derive(sqlx::FromRow)]
    struct ReportRow {
        status: String,
        exception: Option<String>,
        build_log: Option<String>,
        tests_log: Option<String>,
        tests_passed: Option<i64>,
        tests_total: Option<i64>,
    }

    let row = sqlx::query_as::<_, ReportRow>(
        r"
        SELECT b.status, r.exception, r.build_log, r.tests_log, r.tests_passed, r.tests_total
        FROM builds b LEFT JOIN reports r ON r.build_id = b.id
        WHERE b.uuid = ?
        ",
    )
    .bind(uuid)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(StoredReport {
        status: row.status.parse().map_err(decode_error)?,
        exception: row.exception.unwrap_or_default(),
        build_log: row.build_log.unwrap_or_default(),
        tests_log: row.tests_log.unwrap_or_default(),
        tests_passed: row.tests_passed.unwrap_or(0) as u32,
        tests_total: row.tests_total.unwrap_or(0) as u32,
    }))
}
