// src/code_handlers.rs
//! Разбор отсканированных кодов
//!
//! Endpoints:
//!   GET  /api/v1/codes/{code}    QR груза или адрес ячейки
//!   POST /api/v1/codes/resolve   то же, код в теле (удобно для кодов со слэшем)

use actix_web::{web, HttpResponse, HttpRequest};
use std::sync::Arc;
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use crate::auth::get_current_user;
use crate::error::ApiResult;
use crate::handlers::ApiResponse;
use crate::qr::resolve_code;

#[derive(Debug, Deserialize, Validate)]
pub struct ResolveCodeRequest {
    #[validate(length(min = 1, max = 64, message = "Code is required"))]
    pub code: String,
}

pub async fn get_code(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let resolved = resolve_code(&app_state.db_pool, path.into_inner().trim()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(resolved)))
}

pub async fn resolve(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<ResolveCodeRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    request.validate()?;
    let resolved = resolve_code(&app_state.db_pool, request.code.trim()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(resolved)))
}
