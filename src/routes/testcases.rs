use actix_web::{HttpResponse, Responder, post, web};
use serde::Deserialize;
use sqlx::sqlite::SqlitePool;

use super::builds::KeyResponse;
use super::{external_error, invalid_argument, invalid_state};
use crate::database::{self as db, NewTestCase};

#[derive(Deserialize, Debug)]
pub struct TestCaseSubmission {
    pub uuid: String,
    pub assignment_uuid: String,
    pub input: String,
    pub expected: String,
}

/// Registers a test case, creating its assignment on first use
#[post("/testcase/new")]
pub async fn post_test_case_handler(
    pool: web::Data<SqlitePool>,
    body: web::Json<TestCaseSubmission>,
) -> impl Responder {
    let body = body.into_inner();

    if body.uuid.is_empty() || body.assignment_uuid.is_empty() {
        return invalid_argument("uuid and assignment_uuid must not be empty".to_string());
    }

    let assignment_id = match db::resolve_or_create_assignment_id(&pool, &body.assignment_uuid).await {
        Ok(id) => id,
        Err(e) => {
            log::error!("Failed to resolve assignment {}: {e}", body.assignment_uuid);
            return external_error();
        }
    };

    let case = NewTestCase {
        assignment_id,
        uuid: &body.uuid,
        input: &body.input,
        expected: &body.expected,
    };

    match db::register_test_case(&pool, &case).await {
        Ok(()) => {
            log::info!("Registered test case {} for assignment {}", body.uuid, body.assignment_uuid);
            HttpResponse::Ok().json(KeyResponse { uuid: body.uuid })
        }
        Err(e) if db::is_unique_violation(&e) => {
            invalid_state(format!("Test case {} already exists.", body.uuid))
        }
        Err(e) => {
            log::error!("Failed to insert test case {} into database: {e}", body.uuid);
            external_error()
        }
    }
}
