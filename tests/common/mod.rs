#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use sqlx::sqlite::SqlitePool;

use judge::config::{ProcessLimits, ToolchainConfig};
use judge::database::{self as db, NewBuild, NewTestCase};
use judge::status::{BuildStatus, Language};

// Global counter to ensure unique test database names
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Reads an integer from stdin and prints its square
pub const SQUARE_SOURCE: &str = "#!/bin/sh\nread n\necho $((n * n))\n";

pub fn unique_test_path(prefix: &str) -> PathBuf {
    let test_id = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("{prefix}_{}_{test_id}", std::process::id()))
}

// Helper function to create isolated test database
pub async fn create_test_db(prefix: &str) -> (SqlitePool, TestDbGuard) {
    let db_path = unique_test_path(prefix).with_extension("db");
    let guard = TestDbGuard::new(db_path.clone());
    let db_pool = db::init_db(&db_path, 4).await.unwrap();
    (db_pool, guard)
}

fn cleanup_test_db(db_path: &Path) {
    let _ = fs::remove_file(db_path);
    let _ = fs::remove_file(format!("{}-wal", db_path.display()));
    let _ = fs::remove_file(format!("{}-shm", db_path.display()));
}

// Test guard that ensures cleanup on drop
pub struct TestDbGuard {
    pub db_path: PathBuf,
}

impl TestDbGuard {
    fn new(db_path: PathBuf) -> Self {
        cleanup_test_db(&db_path);
        Self { db_path }
    }
}

impl Drop for TestDbGuard {
    fn drop(&mut self) {
        cleanup_test_db(&self.db_path);
    }
}

/// Shell "compiler": syntax-checks the script and installs it as the executable
pub fn shell_toolchain() -> ToolchainConfig {
    ToolchainConfig {
        language: Language::Cpp,
        file_name: "solution.sh".to_string(),
        command: vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"sh -n "$0" && cp "$0" "$1" && chmod +x "$1""#.to_string(),
            "%INPUT%".to_string(),
            "%OUTPUT%".to_string(),
        ],
    }
}

/// Default limits with room for a shell interpreter, which keeps its script on a high fd
pub fn shell_limits() -> ProcessLimits {
    ProcessLimits {
        open_files: 64,
        processes: 64,
        ..ProcessLimits::default()
    }
}

pub async fn add_test_case(
    pool: &SqlitePool,
    assignment_uuid: &str,
    uuid: &str,
    input: &str,
    expected: &str,
) {
    let assignment_id = db::resolve_or_create_assignment_id(pool, assignment_uuid)
        .await
        .unwrap();
    db::register_test_case(
        pool,
        &NewTestCase {
            assignment_id,
            uuid,
            input,
            expected,
        },
    )
    .await
    .unwrap();
}

pub async fn add_build(pool: &SqlitePool, assignment_uuid: &str, uuid: &str, source: &str) {
    let assignment_id = db::resolve_or_create_assignment_id(pool, assignment_uuid)
        .await
        .unwrap();
    db::register_build(
        pool,
        &NewBuild {
            assignment_id,
            uuid,
            language: Language::Cpp,
            source,
            web_hook_url: None,
        },
    )
    .await
    .unwrap();
}

/// Polls the store until the build reaches `status` or the deadline passes
pub async fn wait_for_status(pool: &SqlitePool, uuid: &str, status: BuildStatus, limit: Duration) {
    let deadline = Instant::now() + limit;
    loop {
        let current = db::get_build_status(pool, uuid).await.unwrap();
        if current == Some(status) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "build {uuid} stuck in {current:?}, expected {status}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
