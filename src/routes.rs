mod builds;
mod testcases;

pub use builds::{get_build_report_handler, get_build_status_handler, post_build_handler};
pub use testcases::post_test_case_handler;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{HttpRequest, HttpResponse, web};
use serde::Serialize;

/// Behaviour switches of the REST layer
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiOptions {
    /// Reject builds naming an assignment UUID the store has never seen
    pub strict_assignments: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    reason: &'static str,
    code: u32,
}

#[derive(Serialize)]
struct ErrorResponseWithMessage {
    reason: &'static str,
    code: u32,
    message: String,
}

fn invalid_argument(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponseWithMessage {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
        message,
    })
}

fn invalid_state(message: String) -> HttpResponse {
    HttpResponse::Conflict().json(ErrorResponseWithMessage {
        reason: "ERR_INVALID_STATE",
        code: 2,
        message,
    })
}

fn not_found(message: String) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponseWithMessage {
        reason: "ERR_NOT_FOUND",
        code: 3,
        message,
    })
}

fn external_error() -> HttpResponse {
    HttpResponse::InternalServerError().json(ErrorResponse {
        reason: "ERR_EXTERNAL",
        code: 5,
    })
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponse {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
    });
    InternalError::from_response(err, response).into()
}

/// Mounts the build API under `/api/v1`.
///
/// Handlers expect `web::Data<SqlitePool>` and `web::Data<ApiOptions>` in the app.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(post_build_handler)
            .service(get_build_status_handler)
            .service(get_build_report_handler)
            .service(post_test_case_handler),
    );
}
