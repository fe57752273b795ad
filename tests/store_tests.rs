mod common;

use pretty_assertions::assert_eq;

use judge::database::{self as db, NewBuild, PendingBuild, StoredReport, TestCase};
use judge::report::BuildReport;
use judge::status::{BuildStatus, Language};

use common::{add_build, add_test_case, create_test_db};

fn report(key: &str, status: BuildStatus, passed: u32, total: u32) -> BuildReport {
    BuildReport {
        key: key.to_string(),
        status,
        exception: String::new(),
        build_log: "warning: unused variable".to_string(),
        tests_log: String::new(),
        tests_passed: passed,
        tests_total: total,
        web_hook_url: None,
    }
}

#[tokio::test]
async fn test_claim_flips_pending_to_building() {
    let (pool, _guard) = create_test_db("store").await;
    let assignment_id = db::resolve_or_create_assignment_id(&pool, "a-1").await.unwrap();
    db::register_build(
        &pool,
        &NewBuild {
            assignment_id,
            uuid: "b-1",
            language: Language::Pascal,
            source: "begin end.",
            web_hook_url: Some("http://backend/hook"),
        },
    )
    .await
    .unwrap();
    assert_eq!(
        db::get_build_status(&pool, "b-1").await.unwrap(),
        Some(BuildStatus::Pending)
    );

    let claimed = db::pull_pending_build(&pool).await.unwrap();
    assert_eq!(
        claimed,
        Some(PendingBuild {
            uuid: "b-1".to_string(),
            assignment_id,
            language: Language::Pascal,
            source: "begin end.".to_string(),
            web_hook_url: Some("http://backend/hook".to_string()),
        })
    );
    assert_eq!(
        db::get_build_status(&pool, "b-1").await.unwrap(),
        Some(BuildStatus::Building)
    );

    // Nothing left to claim
    assert_eq!(db::pull_pending_build(&pool).await.unwrap(), None);
}

#[tokio::test]
async fn test_empty_store_has_no_work() {
    let (pool, _guard) = create_test_db("store").await;
    assert_eq!(db::pull_pending_build(&pool).await.unwrap(), None);
}

#[tokio::test]
async fn test_duplicate_build_key_is_rejected() {
    let (pool, _guard) = create_test_db("store").await;
    add_build(&pool, "a-1", "b-1", "x").await;

    let assignment_id = db::resolve_or_create_assignment_id(&pool, "a-1").await.unwrap();
    let err = db::register_build(
        &pool,
        &NewBuild {
            assignment_id,
            uuid: "b-1",
            language: Language::Cpp,
            source: "y",
            web_hook_url: None,
        },
    )
    .await
    .unwrap_err();
    assert!(db::is_unique_violation(&err));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_are_exclusive() {
    let (pool, guard) = create_test_db("store").await;
    add_build(&pool, "a-1", "only", "x").await;

    // Separate pools behave like separate judge instances sharing the file
    let mut claimers = Vec::new();
    for _ in 0..8 {
        let path = guard.db_path.clone();
        claimers.push(tokio::spawn(async move {
            let pool = db::init_db(&path, 1).await.unwrap();
            let claimed = db::pull_pending_build(&pool).await.unwrap();
            pool.close().await;
            claimed
        }));
    }

    let mut winners = 0;
    for claimer in claimers {
        if claimer.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(
        db::get_build_status(&pool, "only").await.unwrap(),
        Some(BuildStatus::Building)
    );
}

#[tokio::test]
async fn test_every_pending_build_is_claimed_once() {
    let (pool, _guard) = create_test_db("store").await;
    for i in 0..5 {
        add_build(&pool, "a-1", &format!("b-{i}"), "x").await;
    }

    let mut keys = Vec::new();
    while let Some(build) = db::pull_pending_build(&pool).await.unwrap() {
        keys.push(build.uuid);
    }
    keys.sort();
    assert_eq!(keys, vec!["b-0", "b-1", "b-2", "b-3", "b-4"]);
}

#[tokio::test]
async fn test_test_cases_are_scoped_to_assignment() {
    let (pool, _guard) = create_test_db("store").await;
    add_test_case(&pool, "a-1", "t-1", "1\n", "1\n").await;
    add_test_case(&pool, "a-1", "t-2", "2\n", "4\n").await;
    add_test_case(&pool, "a-2", "t-3", "3\n", "9\n").await;

    let a1 = db::find_assignment_id(&pool, "a-1").await.unwrap().unwrap();
    let cases = db::get_test_cases(&pool, a1).await.unwrap();
    assert_eq!(
        cases,
        vec![
            TestCase {
                input: "1\n".to_string(),
                expected: "1\n".to_string(),
            },
            TestCase {
                input: "2\n".to_string(),
                expected: "4\n".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn test_assignment_resolution_is_idempotent() {
    let (pool, _guard) = create_test_db("store").await;
    assert_eq!(db::find_assignment_id(&pool, "a-1").await.unwrap(), None);

    let first = db::resolve_or_create_assignment_id(&pool, "a-1").await.unwrap();
    let second = db::resolve_or_create_assignment_id(&pool, "a-1").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(db::find_assignment_id(&pool, "a-1").await.unwrap(), Some(first));
}

#[tokio::test]
async fn test_report_finishes_building_job() {
    let (pool, _guard) = create_test_db("store").await;
    add_build(&pool, "a-1", "b-1", "x").await;
    db::pull_pending_build(&pool).await.unwrap().unwrap();

    let mut finished = report("b-1", BuildStatus::Succeed, 2, 3);
    finished.tests_log = "--- FAILURE IN TEST 3 ---\nrun failed: exit code 1\n".to_string();
    db::add_build_report(&pool, &finished).await.unwrap();

    assert_eq!(
        db::get_build_report(&pool, "b-1").await.unwrap(),
        Some(StoredReport {
            status: BuildStatus::Succeed,
            exception: String::new(),
            build_log: "warning: unused variable".to_string(),
            tests_log: "--- FAILURE IN TEST 3 ---\nrun failed: exit code 1\n".to_string(),
            tests_passed: 2,
            tests_total: 3,
        })
    );
}

#[tokio::test]
async fn test_report_for_pending_job_changes_nothing() {
    let (pool, _guard) = create_test_db("store").await;
    add_build(&pool, "a-1", "b-1", "x").await;

    let result = db::add_build_report(&pool, &report("b-1", BuildStatus::Succeed, 1, 1)).await;
    assert!(result.is_err());

    let stored = db::get_build_report(&pool, "b-1").await.unwrap().unwrap();
    assert_eq!(stored.status, BuildStatus::Pending);
    assert_eq!(stored.tests_total, 0);
    assert_eq!(stored.build_log, "");
}

#[tokio::test]
async fn test_terminal_job_accepts_no_second_report() {
    let (pool, _guard) = create_test_db("store").await;
    add_build(&pool, "a-1", "b-1", "x").await;
    db::pull_pending_build(&pool).await.unwrap().unwrap();

    db::add_build_report(&pool, &report("b-1", BuildStatus::Failed, 0, 0))
        .await
        .unwrap();
    let second = db::add_build_report(&pool, &report("b-1", BuildStatus::Succeed, 1, 1)).await;
    assert!(second.is_err());

    let stored = db::get_build_report(&pool, "b-1").await.unwrap().unwrap();
    assert_eq!(stored.status, BuildStatus::Failed);
    assert_eq!(stored.tests_passed, 0);
}

#[tokio::test]
async fn test_non_terminal_report_is_refused() {
    let (pool, _guard) = create_test_db("store").await;
    add_build(&pool, "a-1", "b-1", "x").await;
    db::pull_pending_build(&pool).await.unwrap().unwrap();

    let result = db::add_build_report(&pool, &report("b-1", BuildStatus::Pending, 0, 0)).await;
    assert!(result.is_err());
    assert_eq!(
        db::get_build_status(&pool, "b-1").await.unwrap(),
        Some(BuildStatus::Building)
    );
}

#[tokio::test]
async fn test_unknown_build_has_no_status() {
    let (pool, _guard) = create_test_db("store").await;
    assert_eq!(db::get_build_status(&pool, "missing").await.unwrap(), None);
    assert_eq!(db::get_build_report(&pool, "missing").await.unwrap(), None);
    assert!(
        db::add_build_report(&pool, &report("missing", BuildStatus::Succeed, 0, 0))
            .await
            .is_err()
    );
}
