// src/placement_handlers.rs
//! Обработчики размещения единиц груза по ячейкам
//!
//! Endpoints:
//!   POST   /api/v1/placements                        разместить (или переместить) единицу
//!   POST   /api/v1/placements/batch                  пакетное размещение
//!   DELETE /api/v1/placements/{individual_number}    снять единицу с ячейки
//!   GET    /api/v1/placements/available              заявки с неразмещёнными единицами
//!   GET    /api/v1/placements/fully-placed           полностью размещённые заявки

use actix_web::{web, HttpResponse, HttpRequest};
use std::sync::Arc;
use serde::Deserialize;
use log::info;

use crate::AppState;
use crate::audit::{audit_change, AuditAction};
use crate::auth::{require_permission, UserRole};
use crate::error::ApiResult;
use crate::handlers::{current_operator, ApiResponse};
use crate::pagination::PaginationQuery;
use crate::placement::{PlaceBatchRequest, PlaceUnitRequest, PlacementEngine};

#[derive(Debug, Deserialize)]
pub struct RemoveUnitQuery {
    pub expected_version: Option<i64>,
}

pub async fn place_unit(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<PlaceUnitRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let (claims, operator) = current_operator(&http_request)?;

    let engine = PlacementEngine::new(&app_state.db_pool, &app_state.config, app_state.events.as_ref());
    let response = engine.place_unit(&operator, &request).await?;

    app_state.metrics.record_placements(1);
    if response.status_change.is_some() {
        app_state.metrics.record_transition();
    }

    audit_change(
        &app_state.db_pool, &claims.sub, AuditAction::PlaceUnit, "individual_unit", &response.individual_number,
        serde_json::json!({
            "from": response.previous_location,
            "to": response.placement_details.location_code,
            "warehouse_id": response.placement_details.warehouse_id,
        }),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

pub async fn place_batch(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<PlaceBatchRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let (claims, operator) = current_operator(&http_request)?;

    let engine = PlacementEngine::new(&app_state.db_pool, &app_state.config, app_state.events.as_ref());
    let response = engine.place_batch(&operator, &request.placements).await?;

    let conflicts = response
        .results
        .iter()
        .filter(|r| r.error.as_ref().is_some_and(|e| e.kind == "conflict"))
        .count();
    let transitions = response
        .results
        .iter()
        .filter(|r| r.result.as_ref().is_some_and(|p| p.status_change.is_some()))
        .count();

    app_state.metrics.record_placements(response.succeeded as u64);
    app_state.metrics.record_conflicts(conflicts as u64);
    for _ in 0..transitions {
        app_state.metrics.record_transition();
    }

    for placed in response.results.iter().filter_map(|r| r.result.as_ref()) {
        audit_change(
            &app_state.db_pool, &claims.sub, AuditAction::PlaceUnit, "individual_unit", &placed.individual_number,
            serde_json::json!({
                "from": placed.previous_location,
                "to": placed.placement_details.location_code,
                "batch": true,
            }),
            &http_request,
        ).await;
    }

    info!(
        "📦 Batch by {}: {} placed, {} failed",
        claims.username, response.succeeded, response.failed
    );

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

pub async fn remove_unit(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    query: web::Query<RemoveUnitQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let (claims, operator) = current_operator(&http_request)?;

    let engine = PlacementEngine::new(&app_state.db_pool, &app_state.config, app_state.events.as_ref());
    let response = engine
        .remove_unit(&operator, &path.into_inner(), query.expected_version)
        .await?;

    app_state.metrics.record_removal();

    audit_change(
        &app_state.db_pool, &claims.sub, AuditAction::RemoveUnit, "individual_unit", &response.individual_number,
        serde_json::json!({ "from": response.previous_location, "to": null }),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        response,
        "Unit removed from cell".to_string(),
    )))
}

pub async fn list_available(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_cargo)?;

    let engine = PlacementEngine::new(&app_state.db_pool, &app_state.config, app_state.events.as_ref());
    let list = engine.list_available(&query).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(list)))
}

pub async fn list_fully_placed(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_cargo)?;

    let engine = PlacementEngine::new(&app_state.db_pool, &app_state.config, app_state.events.as_ref());
    let list = engine.list_fully_placed(&query).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(list)))
}
