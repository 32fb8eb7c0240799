// src/lifecycle.rs
//! Жизненный цикл заявки.
//!
//! Основная цепочка идёт от `created` до `completed`; боковая ветка
//! `removed_from_placement` возвращает заявку к размещению. Переход в
//! `placed_in_warehouse` разрешён только при 100% размещённых единиц.
//! Всё, чего нет в таблице, отклоняется: статус никогда не подгоняется.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;
use log::{info, warn};

use crate::cargo_units::find_request;
use crate::error::{ApiError, ApiResult};
use crate::models::{CargoRequest, CargoStatus};
use crate::placement::progress_of_request;

use crate::models::CargoStatus::*;

/// Разрешённые переходы из каждого статуса
pub fn allowed_targets(from: CargoStatus) -> &'static [CargoStatus] {
    match from {
        Created => &[Accepted],
        Accepted => &[AwaitingPayment],
        AwaitingPayment => &[Paid],
        Paid => &[AwaitingPlacement],
        AwaitingPlacement => &[PlacedInWarehouse],
        PlacedInWarehouse => &[PickupRequested, RemovedFromPlacement],
        RemovedFromPlacement => &[AwaitingPlacement, PlacedInWarehouse],
        PickupRequested => &[AssignedToCourier],
        AssignedToCourier => &[PickedUpByCourier],
        PickedUpByCourier => &[CourierDeliveredToWarehouse],
        CourierDeliveredToWarehouse => &[InTransit],
        InTransit => &[ArrivedDestination],
        ArrivedDestination => &[Completed],
        Completed => &[],
    }
}

pub fn can_transition(from: CargoStatus, to: CargoStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// Для входа в статус требуется полное размещение
pub fn requires_full_placement(to: CargoStatus) -> bool {
    to == PlacedInWarehouse
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusChange {
    pub cargo_number: String,
    pub from: CargoStatus,
    pub to: CargoStatus,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct StatusHistoryEntry {
    pub id: String,
    pub request_id: String,
    pub from_status: String,
    pub to_status: String,
    pub changed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: CargoStatus,
    /// Ожидаемый текущий статус; при расхождении: Conflict
    pub expected_status: Option<CargoStatus>,
}

// ==================== EVENTS ====================

/// Получатель событий смены статуса (уведомления, курьерская логистика)
#[async_trait]
pub trait LifecycleEvents: Send + Sync {
    async fn status_changed(&self, change: &StatusChange);
}

/// По умолчанию события только пишутся в лог
pub struct LoggingEvents;

#[async_trait]
impl LifecycleEvents for LoggingEvents {
    async fn status_changed(&self, change: &StatusChange) {
        info!(
            "🔔 Cargo {}: {} → {} (by {})",
            change.cargo_number, change.from, change.to, change.changed_by
        );
    }
}

// ==================== TRANSITIONS ====================

/// Переход внутри открытой транзакции: проверка таблицы, guard,
/// условная запись по текущему статусу и строка истории.
pub async fn apply_transition(
    conn: &mut SqliteConnection,
    request: &CargoRequest,
    to: CargoStatus,
    changed_by: &str,
) -> ApiResult<StatusChange> {
    let from = request.get_status()?;

    if !can_transition(from, to) {
        return Err(ApiError::InvalidTransition { from: from.to_string(), to: to.to_string() });
    }

    if requires_full_placement(to) {
        let progress = progress_of_request(conn, &request.id).await?;
        if !progress.is_complete() {
            warn!(
                "Cargo {}: {} blocked, {}/{} units placed",
                request.cargo_number, to, progress.placed_units, progress.total_units
            );
            return Err(ApiError::InvalidTransition { from: from.to_string(), to: to.to_string() });
        }
    }

    let now = Utc::now();
    let updated = sqlx::query(
        "UPDATE cargo_requests SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(to.as_ref())
    .bind(now)
    .bind(&request.id)
    .bind(from.as_ref())
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(ApiError::Conflict(format!(
            "Status of cargo {} changed concurrently, reload and retry", request.cargo_number
        )));
    }

    sqlx::query(
        r#"INSERT INTO cargo_status_history (id, request_id, from_status, to_status, changed_by, created_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&request.id)
    .bind(from.as_ref())
    .bind(to.as_ref())
    .bind(changed_by)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(StatusChange {
        cargo_number: request.cargo_number.clone(),
        from,
        to,
        changed_by: changed_by.to_string(),
        changed_at: now,
    })
}

#[tracing::instrument(skip(pool, events))]
pub async fn transition(
    pool: &SqlitePool,
    events: &dyn LifecycleEvents,
    cargo_number: &str,
    to: CargoStatus,
    expected: Option<CargoStatus>,
    changed_by: &str,
) -> ApiResult<StatusChange> {
    let mut tx = pool.begin().await?;
    let request = find_request(&mut tx, cargo_number).await?;

    if let Some(expected) = expected {
        let current = request.get_status()?;
        if current != expected {
            return Err(ApiError::Conflict(format!(
                "Cargo {} is '{}', expected '{}'", cargo_number, current, expected
            )));
        }
    }

    let change = apply_transition(&mut tx, &request, to, changed_by).await?;
    tx.commit().await?;

    events.status_changed(&change).await;
    Ok(change)
}

pub async fn history(pool: &SqlitePool, cargo_number: &str) -> ApiResult<Vec<StatusHistoryEntry>> {
    let mut conn = pool.acquire().await?;
    let request = find_request(&mut conn, cargo_number).await?;

    let entries = sqlx::query_as::<_, StatusHistoryEntry>(
        "SELECT * FROM cargo_status_history WHERE request_id = ? ORDER BY created_at, rowid",
    )
    .bind(&request.id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(entries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cargo_units::create_cargo_request;
    use crate::cargo_units::tests::cargo;
    use crate::db::test_pool;
    use std::sync::Mutex;
    use strum::IntoEnumIterator;

    /// Запоминает события для проверок
    #[derive(Default)]
    pub(crate) struct RecordingEvents {
        pub(crate) changes: Mutex<Vec<StatusChange>>,
    }

    #[async_trait]
    impl LifecycleEvents for RecordingEvents {
        async fn status_changed(&self, change: &StatusChange) {
            self.changes.lock().unwrap().push(change.clone());
        }
    }

    pub(crate) async fn walk_to(pool: &SqlitePool, cargo_number: &str, target: CargoStatus) {
        let path = [Accepted, AwaitingPayment, Paid, AwaitingPlacement];
        for status in path {
            transition(pool, &LoggingEvents, cargo_number, status, None, "tester").await.unwrap();
            if status == target {
                break;
            }
        }
    }

    #[test]
    fn test_main_chain_is_linear() {
        let chain = [
            Created, Accepted, AwaitingPayment, Paid, AwaitingPlacement, PlacedInWarehouse,
            PickupRequested, AssignedToCourier, PickedUpByCourier, CourierDeliveredToWarehouse,
            InTransit, ArrivedDestination, Completed,
        ];
        for pair in chain.windows(2) {
            assert!(can_transition(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
            assert!(!can_transition(pair[1], pair[0]), "{} -> {}", pair[1], pair[0]);
        }
    }

    #[test]
    fn test_side_branch() {
        assert!(can_transition(PlacedInWarehouse, RemovedFromPlacement));
        assert!(can_transition(RemovedFromPlacement, AwaitingPlacement));
        assert!(can_transition(RemovedFromPlacement, PlacedInWarehouse));
        assert!(!can_transition(AwaitingPlacement, RemovedFromPlacement));
    }

    #[test]
    fn test_completed_is_terminal_and_no_self_loops() {
        for status in CargoStatus::iter() {
            assert!(!can_transition(Completed, status));
            assert!(!can_transition(status, status));
        }
    }

    #[actix_rt::test]
    async fn test_transition_records_history_and_events() {
        let pool = test_pool().await;
        create_cargo_request(&pool, &cargo(Some("250101"), &[("A", 1)]), "op").await.unwrap();
        let events = RecordingEvents::default();

        let change = transition(&pool, &events, "250101", Accepted, None, "manager").await.unwrap();
        assert_eq!(change.from, Created);
        assert_eq!(change.to, Accepted);

        let recorded = events.changes.lock().unwrap().clone();
        assert_eq!(recorded, vec![change]);

        let entries = history(&pool, "250101").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].from_status, "created");
        assert_eq!(entries[0].to_status, "accepted");
        assert_eq!(entries[0].changed_by.as_deref(), Some("manager"));
    }

    #[actix_rt::test]
    async fn test_skipping_states_is_rejected() {
        let pool = test_pool().await;
        create_cargo_request(&pool, &cargo(Some("250101"), &[("A", 1)]), "op").await.unwrap();

        let err = transition(&pool, &LoggingEvents, "250101", Paid, None, "manager").await.unwrap_err();
        match err {
            ApiError::InvalidTransition { from, to } => {
                assert_eq!(from, "created");
                assert_eq!(to, "paid");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(history(&pool, "250101").await.unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn test_placed_requires_full_progress() {
        let pool = test_pool().await;
        create_cargo_request(&pool, &cargo(Some("250101"), &[("A", 2)]), "op").await.unwrap();
        walk_to(&pool, "250101", AwaitingPlacement).await;

        let err = transition(&pool, &LoggingEvents, "250101", PlacedInWarehouse, None, "op")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));
    }

    #[actix_rt::test]
    async fn test_expected_status_mismatch_is_conflict() {
        let pool = test_pool().await;
        create_cargo_request(&pool, &cargo(Some("250101"), &[("A", 1)]), "op").await.unwrap();

        let err = transition(&pool, &LoggingEvents, "250101", Accepted, Some(Paid), "op")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[actix_rt::test]
    async fn test_unknown_request() {
        let pool = test_pool().await;
        let err = transition(&pool, &LoggingEvents, "404", Accepted, None, "op").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
