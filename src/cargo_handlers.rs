// src/cargo_handlers.rs
//! Заявки на груз: приём, карточка, прогресс, статусы
//!
//! Endpoints:
//!   POST /api/v1/cargo                    принять заявку и выпустить единицы
//!   GET  /api/v1/cargo/{number}           заявка с типами и единицами
//!   GET  /api/v1/cargo/{number}/progress  прогресс размещения
//!   GET  /api/v1/cargo/{number}/labels    QR-коды для печати этикеток
//!   POST /api/v1/cargo/{number}/status    смена статуса
//!   GET  /api/v1/cargo/{number}/history   журнал статусов

use actix_web::{web, HttpResponse, HttpRequest};
use std::sync::Arc;
use serde::Serialize;
use validator::Validate;

use crate::AppState;
use crate::audit::{audit, audit_change, AuditAction};
use crate::auth::{require_permission, UserRole};
use crate::cargo_units::{create_cargo_request, get_request_details};
use crate::error::ApiResult;
use crate::handlers::ApiResponse;
use crate::lifecycle::{self, ChangeStatusRequest};
use crate::models::CreateCargoRequest;
use crate::placement::PlacementEngine;
use crate::qr::label_codes;

pub async fn create_cargo(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateCargoRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_create_cargo)?;
    request.validate()?;

    let details = create_cargo_request(&app_state.db_pool, &request, &claims.sub).await?;

    audit(
        &app_state.db_pool, &claims.sub, AuditAction::CreateCargo, "cargo_request", &details.request.id,
        &format!(
            "Cargo {} accepted: {} types, {} units",
            details.request.cargo_number, details.items.len(), details.total_units
        ),
        &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        details,
        "Cargo request created successfully".to_string(),
    )))
}

pub async fn get_cargo(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_cargo)?;
    let details = get_request_details(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(details)))
}

pub async fn get_progress(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_cargo)?;

    let engine = PlacementEngine::new(&app_state.db_pool, &app_state.config, app_state.events.as_ref());
    let progress = engine.compute_progress(&path.into_inner()).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(progress)))
}

pub async fn get_labels(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_cargo)?;

    #[derive(Serialize)]
    struct LabelsResponse {
        cargo_number: String,
        codes: Vec<String>,
    }

    let details = get_request_details(&app_state.db_pool, &path.into_inner()).await?;
    let quantities: Vec<i64> = details.items.iter().map(|i| i.item.quantity).collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(LabelsResponse {
        codes: label_codes(&details.request.cargo_number, &quantities),
        cargo_number: details.request.cargo_number,
    })))
}

pub async fn change_status(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<ChangeStatusRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_change_status)?;
    let cargo_number = path.into_inner();

    let change = lifecycle::transition(
        &app_state.db_pool,
        app_state.events.as_ref(),
        &cargo_number,
        request.status,
        request.expected_status,
        &claims.sub,
    ).await?;

    app_state.metrics.record_transition();

    audit_change(
        &app_state.db_pool, &claims.sub, AuditAction::ChangeStatus, "cargo_request", &cargo_number,
        serde_json::json!({ "from": change.from, "to": change.to }),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        change,
        "Status updated".to_string(),
    )))
}

pub async fn get_history(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_cargo)?;
    let entries = lifecycle::history(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(entries)))
}
