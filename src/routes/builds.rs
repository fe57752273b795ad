use actix_web::{HttpResponse, Responder, get, post, web};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use super::{ApiOptions, external_error, invalid_argument, invalid_state, not_found};
use crate::database::{self as db, NewBuild};
use crate::report::score;
use crate::status::{BuildStatus, Language};

#[derive(Deserialize, Debug)]
pub struct BuildSubmission {
    pub uuid: String,
    pub assignment_uuid: String,
    pub language: String,
    pub source: String,
    #[serde(default)]
    pub web_hook_url: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct KeyResponse {
    pub uuid: String,
}

#[derive(Serialize, Debug)]
pub struct StatusResponse {
    pub uuid: String,
    pub status: BuildStatus,
}

#[derive(Serialize, Debug)]
pub struct ReportResponse {
    pub uuid: String,
    pub status: BuildStatus,
    pub exception: String,
    pub build_log: String,
    pub tests_log: String,
    pub tests_passed: u32,
    pub tests_total: u32,
    pub score: u32,
}

#[post("/build/new")]
pub async fn post_build_handler(
    pool: web::Data<SqlitePool>,
    options: web::Data<ApiOptions>,
    body: web::Json<BuildSubmission>,
) -> impl Responder {
    let body = body.into_inner();

    if body.uuid.is_empty() || body.assignment_uuid.is_empty() {
        return invalid_argument("uuid and assignment_uuid must not be empty".to_string());
    }
    let language = match body.language.parse::<Language>() {
        Ok(language) => language,
        Err(e) => return invalid_argument(e.to_string()),
    };

    let assignment_id = if options.strict_assignments {
        db::find_assignment_id(&pool, &body.assignment_uuid).await
    } else {
        db::resolve_or_create_assignment_id(&pool, &body.assignment_uuid)
            .await
            .map(Some)
    };
    let assignment_id = match assignment_id {
        Ok(Some(id)) => id,
        Ok(None) => {
            log::info!("Rejected build {} for unknown assignment {}", body.uuid, body.assignment_uuid);
            return not_found(format!("Assignment {} not found.", body.assignment_uuid));
        }
        Err(e) => {
            log::error!("Failed to resolve assignment {}: {e}", body.assignment_uuid);
            return external_error();
        }
    };

    let build = NewBuild {
        assignment_id,
        uuid: &body.uuid,
        language,
        source: &body.source,
        web_hook_url: body.web_hook_url.as_deref(),
    };

    match db::register_build(&pool, &build).await {
        Ok(()) => {
            log::info!("Registered build {} ({language})", body.uuid);
            HttpResponse::Ok().json(KeyResponse { uuid: body.uuid })
        }
        Err(e) if db::is_unique_violation(&e) => {
            invalid_state(format!("Build {} already exists.", body.uuid))
        }
        Err(e) => {
            log::error!("Failed to insert build {} into database: {e}", body.uuid);
            external_error()
        }
    }
}

#[get("/build/status/{uuid}")]
pub async fn get_build_status_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<String>,
) -> impl Responder {
    let uuid = path.into_inner();

    match db::get_build_status(&pool, &uuid).await {
        Ok(Some(status)) => HttpResponse::Ok().json(StatusResponse { uuid, status }),
        Ok(None) => not_found(format!("Build {uuid} not found.")),
        Err(e) => {
            log::error!("Failed to retrieve status of build {uuid}: {e}");
            external_error()
        }
    }
}

#[get("/build/report/{uuid}")]
pub async fn get_build_report_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<String>,
) -> impl Responder {
    let uuid = path.into_inner();

    match db::get_build_report(&pool, &uuid).await {
        Ok(Some(report)) => HttpResponse::Ok().json(ReportResponse {
            score: score(report.tests_passed, report.tests_total),
            uuid,
            status: report.status,
            exception: report.exception,
            build_log: report.build_log,
            tests_log: report.tests_log,
            tests_passed: report.tests_passed,
            tests_total: report.tests_total,
        }),
        Ok(None) => not_found(format!("Build {uuid} not found.")),
        Err(e) => {
            log::error!("Failed to retrieve report of build {uuid}: {e}");
            external_error()
        }
    }
}
