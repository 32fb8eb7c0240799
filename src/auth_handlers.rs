// src/auth_handlers.rs - Authentication route handlers

use actix_web::{web, HttpRequest, HttpResponse};
use validator::Validate;
use std::sync::Arc;
use chrono::Duration;
use serde::{Serialize, Deserialize};

use crate::audit::{audit, AuditAction};
use crate::handlers::ApiResponse;
use crate::auth::{
    AssignWarehousesRequest, AuthService, User, LoginRequest, LoginResponse, UserInfo, UserRole,
    get_current_user, require_permission,
};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

// ======== PERMISSION DEFINITIONS ========

/// Available system permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ManageUsers,
    ManageWarehouses,
    ViewWarehouses,
    CreateCargo,
    ViewCargo,
    ChangeStatus,
    PlaceUnits,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ManageUsers => "manage_users",
            Permission::ManageWarehouses => "manage_warehouses",
            Permission::ViewWarehouses => "view_warehouses",
            Permission::CreateCargo => "create_cargo",
            Permission::ViewCargo => "view_cargo",
            Permission::ChangeStatus => "change_status",
            Permission::PlaceUnits => "place_units",
        }
    }
}

pub fn get_role_permissions(role: &UserRole) -> Vec<Permission> {
    let checks: [(Permission, fn(&UserRole) -> bool); 7] = [
        (Permission::ManageUsers, UserRole::can_manage_users),
        (Permission::ManageWarehouses, UserRole::can_manage_warehouses),
        (Permission::ViewWarehouses, UserRole::can_view_warehouses),
        (Permission::CreateCargo, UserRole::can_create_cargo),
        (Permission::ViewCargo, UserRole::can_view_cargo),
        (Permission::ChangeStatus, UserRole::can_change_status),
        (Permission::PlaceUnits, UserRole::can_place_units),
    ];
    checks
        .into_iter()
        .filter(|(_, allowed)| allowed(role))
        .map(|(permission, _)| permission)
        .collect()
}

// ======== AUTH HANDLERS ========

pub async fn login(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<LoginRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    let auth_config = &app_state.config.auth;

    let mut user = User::find_by_username(&app_state.db_pool, &request.username).await
        .map_err(|_| ApiError::AuthError("Invalid username or password".to_string()))?;

    if !user.is_active {
        return Err(ApiError::AuthError("Account is disabled".to_string()));
    }

    if user.is_locked() {
        return Err(ApiError::AuthError("Account is temporarily locked. Try again later.".to_string()));
    }

    if !auth_service.verify_password(&request.password, &user.password_hash)
        .map_err(|_| ApiError::InternalServerError("Password verification failed".to_string()))? {

        user.increment_failed_attempts(&app_state.db_pool).await?;

        if user.failed_login_attempts >= auth_config.max_login_attempts {
            user.lock_for_duration(
                &app_state.db_pool,
                Duration::minutes(auth_config.lockout_duration_minutes),
            ).await?;
            log::warn!("🔒 User {} locked after {} failed attempts", user.username, user.failed_login_attempts);
            return Err(ApiError::AuthError(format!(
                "Account locked due to too many failed attempts. Try again in {} minutes.",
                auth_config.lockout_duration_minutes
            )));
        }

        return Err(ApiError::AuthError("Invalid username or password".to_string()));
    }

    user.reset_failed_attempts(&app_state.db_pool).await?;
    user.update_last_login(&app_state.db_pool).await?;

    let warehouse_ids = user.warehouse_ids(&app_state.db_pool).await?;
    let token = auth_service.generate_token(&user, warehouse_ids.clone())?;

    audit(
        &app_state.db_pool, &user.id, AuditAction::Login, "user", &user.id,
        "Successful login", &http_request,
    ).await;

    log::info!("User {} logged in successfully", user.username);

    let response = LoginResponse {
        token,
        expires_in: auth_service.token_lifetime_seconds(),
        user: UserInfo::new(user, warehouse_ids),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        response,
        "Login successful".to_string(),
    )))
}

pub async fn get_profile(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;

    #[derive(Serialize)]
    struct ProfileResponse {
        #[serde(flatten)]
        user: UserInfo,
        permissions: Vec<&'static str>,
    }

    let user = User::find_by_id(&app_state.db_pool, &claims.sub).await?;
    let warehouse_ids = user.warehouse_ids(&app_state.db_pool).await?;
    let permissions = get_role_permissions(&claims.role)
        .iter()
        .map(|p| p.as_str())
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(ProfileResponse {
        user: UserInfo::new(user, warehouse_ids),
        permissions,
    })))
}

/// Назначение складов пользователю. Новые склады попадут в токен при следующем входе.
pub async fn assign_user_warehouses(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<AssignWarehousesRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_manage_users)?;
    request.validate()?;

    let user = User::find_by_id(&app_state.db_pool, &path.into_inner()).await?;
    let assigned = user.assign_warehouses(&app_state.db_pool, &request.warehouse_ids).await?;

    audit(
        &app_state.db_pool, &claims.sub, AuditAction::AssignWarehouses, "user", &user.id,
        &format!("Assigned {} warehouses", assigned.len()), &http_request,
    ).await;

    log::info!("🏬 User {} assigned to warehouses {:?}", user.username, assigned);

    Ok(HttpResponse::Ok().json(ApiResponse::success(UserInfo::new(user, assigned))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_permissions() {
        let admin = get_role_permissions(&UserRole::Admin);
        assert!(admin.contains(&Permission::ManageWarehouses));

        let operator = get_role_permissions(&UserRole::Operator);
        assert!(operator.contains(&Permission::PlaceUnits));
        assert!(!operator.contains(&Permission::ManageUsers));

        let viewer = get_role_permissions(&UserRole::Viewer);
        assert_eq!(viewer, vec![Permission::ViewWarehouses, Permission::ViewCargo]);
    }
}
