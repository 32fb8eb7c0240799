// src/audit.rs: журнал действий операторов (audit_logs)
//
// Ошибка записи в журнал только логируется: она не должна ломать
// уже выполненное размещение или смену статуса.

use sqlx::SqlitePool;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use actix_web::HttpRequest;
use serde::Serialize;

/// Что сделал пользователь
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    CreateWarehouse,
    CreateStructure,
    CreateCargo,
    PlaceUnit,
    RemoveUnit,
    ChangeStatus,
    AssignWarehouses,
    Login,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreateWarehouse => "create_warehouse",
            AuditAction::CreateStructure => "create_structure",
            AuditAction::CreateCargo => "create_cargo",
            AuditAction::PlaceUnit => "place_unit",
            AuditAction::RemoveUnit => "remove_unit",
            AuditAction::ChangeStatus => "change_status",
            AuditAction::AssignWarehouses => "assign_warehouses",
            AuditAction::Login => "login",
        }
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub description: Option<String>,
    pub changes: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Записать событие в audit_logs
pub async fn log_activity(
    pool: &SqlitePool,
    user_id: Option<&str>,
    action: AuditAction,
    entity_type: &str,
    entity_id: Option<&str>,
    description: Option<&str>,
    changes: Option<&serde_json::Value>,
    request: Option<&HttpRequest>,
) -> Result<(), sqlx::Error> {
    let ip_address = request.and_then(|req| {
        req.connection_info()
            .realip_remote_addr()
            .map(|s| s.to_string())
    });

    let user_agent = request.and_then(|req| {
        req.headers()
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    });

    sqlx::query(
        r#"INSERT INTO audit_logs
           (id, user_id, action, entity_type, entity_id, description, changes, ip_address, user_agent, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(action.as_str())
    .bind(entity_type)
    .bind(entity_id)
    .bind(description)
    .bind(changes.map(|c| c.to_string()))
    .bind(&ip_address)
    .bind(&user_agent)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Короткая версия для обработчиков
pub async fn audit(
    pool: &SqlitePool,
    user_id: &str,
    action: AuditAction,
    entity_type: &str,
    entity_id: &str,
    description: &str,
    request: &HttpRequest,
) {
    if let Err(e) = log_activity(
        pool,
        Some(user_id),
        action,
        entity_type,
        Some(entity_id),
        Some(description),
        None,
        Some(request),
    ).await {
        log::error!("Failed to write audit log: {}", e);
    }
}

/// То же, но с JSON-описанием изменений (from/to статуса, старая/новая ячейка)
pub async fn audit_change(
    pool: &SqlitePool,
    user_id: &str,
    action: AuditAction,
    entity_type: &str,
    entity_id: &str,
    changes: serde_json::Value,
    request: &HttpRequest,
) {
    if let Err(e) = log_activity(
        pool,
        Some(user_id),
        action,
        entity_type,
        Some(entity_id),
        None,
        Some(&changes),
        Some(request),
    ).await {
        log::error!("Failed to write audit log: {}", e);
    }
}

pub async fn entries_for(pool: &SqlitePool, entity_type: &str, entity_id: &str) -> Result<Vec<AuditEntry>, sqlx::Error> {
    sqlx::query_as::<_, AuditEntry>(
        "SELECT * FROM audit_logs WHERE entity_type = ? AND entity_id = ? ORDER BY created_at, rowid"
    )
    .bind(entity_type)
    .bind(entity_id)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[actix_rt::test]
    async fn test_log_activity_without_request() {
        let pool = test_pool().await;
        let changes = serde_json::json!({ "from": "Б1-П1-Я1", "to": "Б2-П1-Я4" });

        log_activity(
            &pool,
            Some("op"),
            AuditAction::PlaceUnit,
            "unit",
            Some("250101/01/01"),
            None,
            Some(&changes),
            None,
        )
        .await
        .unwrap();

        let entries = entries_for(&pool, "unit", "250101/01/01").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "place_unit");
        assert!(entries[0].changes.as_deref().unwrap().contains("Б2-П1-Я4"));
        assert!(entries[0].ip_address.is_none());
    }
}
