// src/warehouse_handlers.rs
//! Обработчики складов и их сетки
//!
//! Endpoints:
//!   POST   /api/v1/warehouses                                   новый склад
//!   GET    /api/v1/warehouses                                   список со статистикой
//!   GET    /api/v1/warehouses/{id}                              склад по UUID или номеру
//!   POST   /api/v1/warehouses/{id}/structure                    материализовать сетку
//!   GET    /api/v1/warehouses/{id}/cells/{block}/{shelf}/{cell} содержимое ячейки

use actix_web::{web, HttpResponse, HttpRequest};
use std::sync::Arc;
use validator::Validate;
use log::info;

use crate::AppState;
use crate::audit::{audit, AuditAction};
use crate::auth::{get_current_user, require_permission, UserRole};
use crate::error::ApiResult;
use crate::handlers::ApiResponse;
use crate::models::{CreateStructureRequest, CreateWarehouseRequest};
use crate::topology::WarehouseRegistry;

pub async fn create_warehouse(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateWarehouseRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_manage_warehouses)?;
    request.validate()?;

    let registry = WarehouseRegistry::new(&app_state.db_pool, &app_state.config.warehouse);
    let warehouse = registry.create_warehouse(&request, &claims.sub).await?;

    audit(
        &app_state.db_pool, &claims.sub, AuditAction::CreateWarehouse, "warehouse", &warehouse.id,
        &format!("Created warehouse {} '{}'", warehouse.id_number, warehouse.name), &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        warehouse,
        "Warehouse created successfully".to_string(),
    )))
}

pub async fn list_warehouses(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;

    let registry = WarehouseRegistry::new(&app_state.db_pool, &app_state.config.warehouse);
    let mut warehouses = registry.list_warehouses().await?;

    // Не-администратор с назначениями видит только свои склады
    if !claims.role.sees_all_warehouses() && !claims.warehouse_ids.is_empty() {
        warehouses.retain(|w| claims.warehouse_ids.contains(&w.warehouse.id));
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success(warehouses)))
}

pub async fn get_warehouse(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let registry = WarehouseRegistry::new(&app_state.db_pool, &app_state.config.warehouse);
    let overview = registry.get_overview(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(overview)))
}

pub async fn create_structure(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<CreateStructureRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_manage_warehouses)?;
    request.validate()?;
    let warehouse_id = path.into_inner();

    let registry = WarehouseRegistry::new(&app_state.db_pool, &app_state.config.warehouse);
    let summary = registry
        .create_structure(&warehouse_id, request.block_count, request.shelves_per_block, request.cells_per_shelf)
        .await?;

    audit(
        &app_state.db_pool, &claims.sub, AuditAction::CreateStructure, "warehouse", &summary.warehouse_id,
        &format!(
            "Structure {}×{}×{} ({} cells)",
            request.block_count, request.shelves_per_block, request.cells_per_shelf, summary.cells
        ),
        &http_request,
    ).await;

    info!("🧱 Structure requested by {} for warehouse {}", claims.username, warehouse_id);

    Ok(HttpResponse::Ok().json(ApiResponse::success(summary)))
}

pub async fn get_cell_contents(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<(String, i64, i64, i64)>,
) -> ApiResult<HttpResponse> {
    let (warehouse_id, block, shelf, cell) = path.into_inner();

    let registry = WarehouseRegistry::new(&app_state.db_pool, &app_state.config.warehouse);
    let contents = registry.get_cell_contents(&warehouse_id, block, shelf, cell).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(contents)))
}
