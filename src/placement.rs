// src/placement.rs
//! Размещение единиц груза по ячейкам.
//!
//! Единственное место, где меняется привязка единица → ячейка.
//! Каждая операция: одна транзакция SQLite: условная запись по `version`
//! единицы и её прежней ячейке, пересчёт `is_occupied` затронутых ячеек,
//! пересчёт прогресса заявки и, при 100%, авто-переход статуса.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use validator::Validate;
use log::{info, warn};

use crate::cargo_units::{find_request, find_unit};
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::lifecycle::{apply_transition, LifecycleEvents, StatusChange};
use crate::models::{CargoRequest, CargoStatus, PlacementSummary, UnitStatus, Warehouse};
use crate::pagination::{PaginatedList, PaginationInfo, PaginationQuery};
use crate::qr::normalize_individual_number;
use crate::topology::{find_warehouse, resolve_cell_in};

// ==================== CALLER ====================

/// Кто размещает: берётся из JWT, движок этим данным доверяет
#[derive(Debug, Clone)]
pub struct Operator {
    pub user_id: String,
    pub warehouse_ids: Vec<String>,
    /// Администратор работает с любым складом
    pub unrestricted: bool,
}

impl Operator {
    fn may_use(&self, warehouse_id: &str) -> bool {
        self.unrestricted
            || self.warehouse_ids.is_empty()
            || self.warehouse_ids.iter().any(|id| id == warehouse_id)
    }
}

// ==================== REQUESTS / RESPONSES ====================

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct PlaceUnitRequest {
    #[validate(length(min = 1, max = 40, message = "Individual number is required"))]
    pub individual_number: String,

    pub warehouse_id: Option<String>,

    #[validate(range(min = 1, max = 99, message = "Block must be between 1 and 99"))]
    pub block: i64,

    #[validate(range(min = 1, max = 99, message = "Shelf must be between 1 and 99"))]
    pub shelf: i64,

    #[validate(range(min = 1, max = 99, message = "Cell must be between 1 and 99"))]
    pub cell: i64,

    /// Версия единицы, которую видел оператор при сканировании.
    /// Обязательна для перемещения уже размещённой единицы в другую ячейку.
    pub expected_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PlaceBatchRequest {
    pub placements: Vec<PlaceUnitRequest>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CargoProgress {
    pub cargo_number: String,
    pub total_units: i64,
    pub placed_units: i64,
    pub pending_units: i64,
    pub percentage: f64,
}

impl CargoProgress {
    pub fn new(cargo_number: &str, total_units: i64, placed_units: i64) -> Self {
        Self {
            cargo_number: cargo_number.to_string(),
            total_units,
            placed_units,
            pending_units: total_units - placed_units,
            percentage: percentage(placed_units, total_units),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total_units > 0 && self.placed_units == self.total_units
    }
}

/// Доля размещённых единиц с точностью до сотых, 0 для пустой заявки.
/// Округление вниз: 100 только когда размещено всё.
pub fn percentage(placed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let basis_points = i128::from(placed.clamp(0, total)) * 10_000 / i128::from(total);
    basis_points as f64 / 100.0
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ApplicationProgress {
    pub placed: i64,
    pub total: i64,
    pub percentage: f64,
}

impl From<&CargoProgress> for ApplicationProgress {
    fn from(progress: &CargoProgress) -> Self {
        Self {
            placed: progress.placed_units,
            total: progress.total_units,
            percentage: progress.percentage,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct PlacementDetails {
    pub warehouse_id: String,
    pub warehouse_number: String,
    pub block: i64,
    pub shelf: i64,
    pub cell: i64,
    pub location_code: String,
    pub id_based_code: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct PlaceUnitResponse {
    pub success: bool,
    pub cargo_name: String,
    pub cargo_number: String,
    pub individual_number: String,
    /// Новая версия единицы: её передают в следующую операцию
    pub unit_version: i64,
    pub application_progress: ApplicationProgress,
    pub placement_details: PlacementDetails,
    pub previous_location: Option<String>,
    pub status_change: Option<StatusChange>,
}

#[derive(Debug, Serialize, Clone)]
pub struct RemoveUnitResponse {
    pub success: bool,
    pub cargo_number: String,
    pub individual_number: String,
    pub unit_version: i64,
    pub previous_location: Option<String>,
    pub application_progress: ApplicationProgress,
}

#[derive(Debug, Serialize)]
pub struct BatchItemError {
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BatchItemResult {
    pub individual_number: String,
    pub success: bool,
    pub result: Option<PlaceUnitResponse>,
    pub error: Option<BatchItemError>,
}

#[derive(Debug, Serialize)]
pub struct BatchPlacementResponse {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchItemResult>,
}

/// Строка выборки для списков размещения
#[derive(Debug, sqlx::FromRow)]
struct RequestPlacementRow {
    request_id: String,
    cargo_number: String,
    client_name: Option<String>,
    status: String,
    target_warehouse_id: Option<String>,
    created_at: chrono::DateTime<Utc>,
    total_units: i64,
    placed_units: i64,
}

#[derive(Debug, Serialize, Clone)]
pub struct RequestPlacementState {
    pub request_id: String,
    pub cargo_number: String,
    pub client_name: Option<String>,
    pub status: String,
    pub target_warehouse_id: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub total_units: i64,
    pub placed_units: i64,
    pub pending_units: i64,
    pub percentage: f64,
}

impl From<RequestPlacementRow> for RequestPlacementState {
    fn from(row: RequestPlacementRow) -> Self {
        Self {
            pending_units: row.total_units - row.placed_units,
            percentage: percentage(row.placed_units, row.total_units),
            request_id: row.request_id,
            cargo_number: row.cargo_number,
            client_name: row.client_name,
            status: row.status,
            target_warehouse_id: row.target_warehouse_id,
            created_at: row.created_at,
            total_units: row.total_units,
            placed_units: row.placed_units,
        }
    }
}

pub type PlacementList = PaginatedList<RequestPlacementState, PlacementSummary>;

const REQUEST_STATS_CTE: &str = r#"WITH stats AS (
    SELECT r.id AS request_id, r.cargo_number, r.client_name, r.status,
           r.target_warehouse_id, r.created_at,
           COUNT(u.id) AS total_units,
           COALESCE(SUM(u.is_placed), 0) AS placed_units
    FROM cargo_requests r
    LEFT JOIN individual_units u ON u.request_id = r.id
    GROUP BY r.id
)"#;

#[derive(Debug, Clone, Copy, PartialEq)]
enum ListKind {
    Available,
    FullyPlaced,
}

impl ListKind {
    fn condition(self) -> &'static str {
        match self {
            ListKind::Available => "placed_units < total_units",
            ListKind::FullyPlaced => "total_units > 0 AND placed_units = total_units",
        }
    }
}

// ==================== PROGRESS ====================

/// Агрегаты считаются по строкам единиц, отдельно не хранятся
pub async fn progress_of_request(conn: &mut SqliteConnection, request_id: &str) -> ApiResult<CargoProgress> {
    let row: Option<(String, i64, i64)> = sqlx::query_as(
        r#"SELECT r.cargo_number, COUNT(u.id), COALESCE(SUM(u.is_placed), 0)
           FROM cargo_requests r
           LEFT JOIN individual_units u ON u.request_id = r.id
           WHERE r.id = ?
           GROUP BY r.id"#,
    )
    .bind(request_id)
    .fetch_optional(&mut *conn)
    .await?;

    let (cargo_number, total, placed) = row.ok_or_else(|| ApiError::request_not_found(request_id))?;
    Ok(CargoProgress::new(&cargo_number, total, placed))
}

async fn find_request_by_id(conn: &mut SqliteConnection, request_id: &str) -> ApiResult<CargoRequest> {
    sqlx::query_as::<_, CargoRequest>("SELECT * FROM cargo_requests WHERE id = ?")
        .bind(request_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::request_not_found(request_id))
}

/// `is_occupied` = в ячейке есть хотя бы одна единица
async fn refresh_occupancy(conn: &mut SqliteConnection, cell_id: &str) -> ApiResult<()> {
    sqlx::query(
        r#"UPDATE cells
           SET is_occupied = EXISTS(SELECT 1 FROM individual_units u WHERE u.cell_id = cells.id),
               updated_at = ?
           WHERE id = ?"#,
    )
    .bind(Utc::now())
    .bind(cell_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ==================== ENGINE ====================

pub struct PlacementEngine<'a> {
    pool: &'a SqlitePool,
    config: &'a Config,
    events: &'a dyn LifecycleEvents,
}

impl<'a> PlacementEngine<'a> {
    pub fn new(pool: &'a SqlitePool, config: &'a Config, events: &'a dyn LifecycleEvents) -> Self {
        Self { pool, config, events }
    }

    /// Явный склад; иначе единственный склад оператора; иначе целевой склад заявки.
    /// Второй элемент: был ли склад выведен, а не указан.
    async fn choose_warehouse(
        &self,
        conn: &mut SqliteConnection,
        operator: &Operator,
        explicit: Option<&str>,
        request: &CargoRequest,
    ) -> ApiResult<(Warehouse, bool)> {
        if let Some(id) = explicit {
            return Ok((find_warehouse(conn, id).await?, false));
        }
        if let [only] = operator.warehouse_ids.as_slice() {
            return Ok((find_warehouse(conn, only).await?, true));
        }
        if let Some(target) = request.target_warehouse_id.as_deref() {
            return Ok((find_warehouse(conn, target).await?, true));
        }
        Err(ApiError::AmbiguousWarehouse(format!(
            "Cannot infer warehouse for cargo {}: operator has {} assigned warehouses and the request has no target",
            request.cargo_number,
            operator.warehouse_ids.len()
        )))
    }

    #[tracing::instrument(skip(self, operator, request), fields(unit = %request.individual_number, user = %operator.user_id))]
    pub async fn place_unit(&self, operator: &Operator, request: &PlaceUnitRequest) -> ApiResult<PlaceUnitResponse> {
        request.validate()?;
        let individual_number = normalize_individual_number(&request.individual_number)?;

        let mut tx = self.pool.begin().await?;
        let unit = find_unit(&mut tx, &individual_number).await?;

        if let Some(expected) = request.expected_version {
            if expected != unit.version {
                return Err(ApiError::placement_conflict(&individual_number));
            }
        }

        let cargo = find_request_by_id(&mut tx, &unit.request_id).await?;
        let (warehouse, inferred) = self
            .choose_warehouse(&mut tx, operator, request.warehouse_id.as_deref(), &cargo)
            .await?;

        if !operator.may_use(&warehouse.id) {
            return Err(ApiError::Forbidden(format!(
                "Warehouse {} is not assigned to this operator", warehouse.id_number
            )));
        }

        if !warehouse.contains(request.block, request.shelf, request.cell) {
            return Err(if inferred {
                ApiError::WarehouseMismatch(format!(
                    "Warehouse {} ({}×{}×{}) has no cell Б{}-П{}-Я{}",
                    warehouse.id_number,
                    warehouse.block_count,
                    warehouse.shelves_per_block,
                    warehouse.cells_per_shelf,
                    request.block,
                    request.shelf,
                    request.cell
                ))
            } else {
                ApiError::cell_not_found(request.block, request.shelf, request.cell)
            });
        }

        let cell = resolve_cell_in(&mut tx, &warehouse, request.block, request.shelf, request.cell).await?;

        if request.expected_version.is_none() {
            if let Some(prior) = unit.cell_id.as_deref() {
                if prior != cell.id {
                    return Err(ApiError::Conflict(format!(
                        "Unit {} is already placed at {}; re-scan and pass expected_version to move it",
                        individual_number,
                        unit.placement_location.as_deref().unwrap_or("another cell")
                    )));
                }
            }
        }

        if self.config.warehouse.single_occupancy {
            let others: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM individual_units WHERE cell_id = ? AND id <> ?",
            )
            .bind(&cell.id)
            .bind(&unit.id)
            .fetch_one(&mut *tx)
            .await?;
            if others > 0 {
                return Err(ApiError::Conflict(format!(
                    "Cell {} already holds another unit", cell.location_code
                )));
            }
        }

        let now = Utc::now();
        let updated = sqlx::query(
            r#"UPDATE individual_units
               SET cell_id = ?, warehouse_id = ?, is_placed = 1, status = ?,
                   placed_by = ?, placed_at = ?, version = version + 1, updated_at = ?
               WHERE id = ? AND version = ? AND cell_id IS ?"#,
        )
        .bind(&cell.id)
        .bind(&warehouse.id)
        .bind(UnitStatus::Placed.as_ref())
        .bind(&operator.user_id)
        .bind(now)
        .bind(now)
        .bind(&unit.id)
        .bind(unit.version)
        .bind(&unit.cell_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(ApiError::placement_conflict(&individual_number));
        }

        if let Some(prior) = unit.cell_id.as_deref() {
            if prior != cell.id {
                refresh_occupancy(&mut tx, prior).await?;
            }
        }
        refresh_occupancy(&mut tx, &cell.id).await?;

        let progress = progress_of_request(&mut tx, &cargo.id).await?;

        let mut status_change = None;
        if self.config.placement.auto_advance_status && progress.is_complete() {
            let current = cargo.get_status()?;
            if matches!(current, CargoStatus::AwaitingPlacement | CargoStatus::RemovedFromPlacement) {
                status_change =
                    Some(apply_transition(&mut tx, &cargo, CargoStatus::PlacedInWarehouse, &operator.user_id).await?);
            }
        }

        let cargo_name: String = sqlx::query_scalar("SELECT name FROM cargo_items WHERE id = ?")
            .bind(&unit.item_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        if let Some(change) = &status_change {
            self.events.status_changed(change).await;
        }

        info!(
            "📍 Unit {} placed to {} / {} by {} ({}/{})",
            individual_number,
            warehouse.id_number,
            cell.location_code,
            operator.user_id,
            progress.placed_units,
            progress.total_units
        );

        Ok(PlaceUnitResponse {
            success: true,
            cargo_name,
            cargo_number: cargo.cargo_number,
            individual_number,
            unit_version: unit.version + 1,
            application_progress: ApplicationProgress::from(&progress),
            placement_details: PlacementDetails {
                warehouse_id: warehouse.id.clone(),
                warehouse_number: warehouse.id_number.clone(),
                block: cell.block_number,
                shelf: cell.shelf_number,
                cell: cell.cell_number,
                location_code: cell.location_code,
                id_based_code: cell.id_based_code,
            },
            previous_location: unit.placement_location,
            status_change,
        })
    }

    /// Снять единицу с ячейки. Статус заявки не понижается.
    #[tracing::instrument(skip(self, operator), fields(user = %operator.user_id))]
    pub async fn remove_unit(
        &self,
        operator: &Operator,
        individual_number: &str,
        expected_version: Option<i64>,
    ) -> ApiResult<RemoveUnitResponse> {
        let individual_number = normalize_individual_number(individual_number)?;

        let mut tx = self.pool.begin().await?;
        let unit = find_unit(&mut tx, &individual_number).await?;

        let prior_cell = match unit.cell_id.as_deref() {
            Some(cell_id) if unit.is_placed => cell_id.to_string(),
            _ => {
                return Err(ApiError::BadRequest(format!(
                    "Unit '{}' is not placed", individual_number
                )))
            }
        };

        if let Some(warehouse_id) = unit.warehouse_id.as_deref() {
            if !operator.may_use(warehouse_id) {
                return Err(ApiError::Forbidden(
                    "Unit is stored in a warehouse not assigned to this operator".to_string(),
                ));
            }
        }

        if let Some(expected) = expected_version {
            if expected != unit.version {
                return Err(ApiError::placement_conflict(&individual_number));
            }
        }

        let updated = sqlx::query(
            r#"UPDATE individual_units
               SET cell_id = NULL, warehouse_id = NULL, is_placed = 0, status = ?,
                   placed_by = NULL, placed_at = NULL, version = version + 1, updated_at = ?
               WHERE id = ? AND version = ? AND cell_id = ?"#,
        )
        .bind(UnitStatus::RemovedFromPlacement.as_ref())
        .bind(Utc::now())
        .bind(&unit.id)
        .bind(unit.version)
        .bind(&prior_cell)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(ApiError::placement_conflict(&individual_number));
        }

        refresh_occupancy(&mut tx, &prior_cell).await?;
        let progress = progress_of_request(&mut tx, &unit.request_id).await?;
        tx.commit().await?;

        info!(
            "📤 Unit {} removed from {} by {}",
            individual_number,
            unit.placement_location.as_deref().unwrap_or("?"),
            operator.user_id
        );

        Ok(RemoveUnitResponse {
            success: true,
            cargo_number: unit.cargo_number,
            individual_number,
            unit_version: unit.version + 1,
            previous_location: unit.placement_location,
            application_progress: ApplicationProgress::from(&progress),
        })
    }

    /// Каждая единица: своя транзакция; ошибка одной не прерывает остальные
    #[tracing::instrument(skip(self, operator, requests), fields(count = requests.len()))]
    pub async fn place_batch(
        &self,
        operator: &Operator,
        requests: &[PlaceUnitRequest],
    ) -> ApiResult<BatchPlacementResponse> {
        if requests.is_empty() {
            return Err(ApiError::ValidationError("Batch contains no placements".to_string()));
        }
        if requests.len() > self.config.placement.max_batch_size {
            return Err(ApiError::ValidationError(format!(
                "Batch of {} exceeds the limit of {}",
                requests.len(),
                self.config.placement.max_batch_size
            )));
        }

        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let outcome = self.place_unit(operator, request).await;
            results.push(match outcome {
                Ok(response) => BatchItemResult {
                    individual_number: response.individual_number.clone(),
                    success: true,
                    result: Some(response),
                    error: None,
                },
                Err(err) => {
                    warn!("Batch placement of {} failed: {}", request.individual_number, err);
                    BatchItemResult {
                        individual_number: request.individual_number.clone(),
                        success: false,
                        result: None,
                        error: Some(BatchItemError { kind: err.kind(), message: err.to_string() }),
                    }
                }
            });
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        Ok(BatchPlacementResponse {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        })
    }

    pub async fn compute_progress(&self, cargo_number: &str) -> ApiResult<CargoProgress> {
        let mut conn = self.pool.acquire().await?;
        let request = find_request(&mut conn, cargo_number).await?;
        progress_of_request(&mut conn, &request.id).await
    }

    /// Заявки, у которых размещены не все единицы
    pub async fn list_available(&self, query: &PaginationQuery) -> ApiResult<PlacementList> {
        self.list_requests(query, ListKind::Available).await
    }

    /// Заявки, у которых размещены все единицы
    pub async fn list_fully_placed(&self, query: &PaginationQuery) -> ApiResult<PlacementList> {
        self.list_requests(query, ListKind::FullyPlaced).await
    }

    async fn list_requests(&self, query: &PaginationQuery, kind: ListKind) -> ApiResult<PlacementList> {
        let (page, per_page, offset) = query.normalize();

        let mut conditions = vec![kind.condition().to_string()];
        let mut params: Vec<String> = Vec::new();

        if let Some(pattern) = query.search_pattern() {
            conditions.push(
                r"(cargo_number LIKE ? ESCAPE '\' OR client_name LIKE ? ESCAPE '\')".to_string(),
            );
            params.push(pattern.clone());
            params.push(pattern);
        }
        if let Some(warehouse_id) = query.warehouse_id.as_deref() {
            conditions.push("target_warehouse_id = ?".to_string());
            params.push(warehouse_id.to_string());
        }
        let where_clause = conditions.join(" AND ");

        let count_sql = format!("{} SELECT COUNT(*) FROM stats WHERE {}", REQUEST_STATS_CTE, where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for param in &params {
            count_query = count_query.bind(param);
        }
        let total_count = count_query.fetch_one(self.pool).await?;

        let select_sql = format!(
            "{} SELECT * FROM stats WHERE {} ORDER BY created_at, cargo_number LIMIT ? OFFSET ?",
            REQUEST_STATS_CTE, where_clause
        );
        let mut select_query = sqlx::query_as::<_, RequestPlacementRow>(&select_sql);
        for param in &params {
            select_query = select_query.bind(param);
        }
        let rows = select_query.bind(per_page).bind(offset).fetch_all(self.pool).await?;

        let summary = self.summary().await?;

        Ok(PaginatedList {
            items: rows.into_iter().map(RequestPlacementState::from).collect(),
            pagination: PaginationInfo::from_page(total_count, page, per_page),
            summary,
        })
    }

    async fn summary(&self) -> ApiResult<PlacementSummary> {
        let sql = format!(
            r#"{} SELECT
                  (SELECT COUNT(*) FROM stats WHERE total_units > 0 AND placed_units = total_units),
                  (SELECT COALESCE(SUM(placed_units), 0) FROM stats)"#,
            REQUEST_STATS_CTE
        );
        let (fully_placed_requests, total_units_placed): (i64, i64) =
            sqlx::query_as(&sql).fetch_one(self.pool).await?;
        Ok(PlacementSummary { fully_placed_requests, total_units_placed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cargo_units::create_cargo_request;
    use crate::cargo_units::tests::cargo;
    use crate::db::{test_file_pool, test_pool};
    use crate::lifecycle::tests::{walk_to, RecordingEvents};
    use crate::lifecycle::{history, LoggingEvents};
    use crate::models::CreateWarehouseRequest;
    use crate::topology::WarehouseRegistry;

    fn admin() -> Operator {
        Operator { user_id: "admin".to_string(), warehouse_ids: vec![], unrestricted: true }
    }

    fn place(number: &str, block: i64, shelf: i64, cell: i64) -> PlaceUnitRequest {
        PlaceUnitRequest {
            individual_number: number.to_string(),
            warehouse_id: None,
            block,
            shelf,
            cell,
            expected_version: None,
        }
    }

    /// Склад 001 (2×3×10) и заявка с ним в качестве целевого
    async fn setup(pool: &SqlitePool, config: &Config, cargo_number: &str, items: &[(&str, i64)]) -> Warehouse {
        let registry = WarehouseRegistry::new(pool, &config.warehouse);
        let warehouse = match registry.get_warehouse("001").await {
            Ok(existing) => existing,
            Err(_) => registry
                .create_warehouse(
                    &CreateWarehouseRequest {
                        name: "Москва".to_string(),
                        block_count: 2,
                        shelves_per_block: 3,
                        cells_per_shelf: 10,
                        create_structure: None,
                    },
                    "admin",
                )
                .await
                .unwrap(),
        };

        let mut request = cargo(Some(cargo_number), items);
        request.target_warehouse_id = Some(warehouse.id.clone());
        create_cargo_request(pool, &request, "op").await.unwrap();
        warehouse
    }

    #[actix_rt::test]
    async fn test_full_placement_scenario() {
        let pool = test_pool().await;
        let config = Config::default();
        let events = RecordingEvents::default();
        let engine = PlacementEngine::new(&pool, &config, &events);
        setup(&pool, &config, "250101", &[("A", 2), ("B", 3)]).await;
        walk_to(&pool, "250101", CargoStatus::AwaitingPlacement).await;

        let available = engine.list_available(&PaginationQuery::default()).await.unwrap();
        assert_eq!(available.items.len(), 1);
        assert_eq!(available.items[0].cargo_number, "250101");
        assert_eq!(available.items[0].pending_units, 5);

        let units = ["250101/01/01", "250101/01/02", "250101/02/01", "250101/02/02", "250101/02/03"];
        let mut last = None;
        for (i, number) in units.iter().enumerate() {
            let response = engine.place_unit(&admin(), &place(number, 1, 3, i as i64 + 1)).await.unwrap();
            assert!(response.success);
            assert_eq!(response.application_progress.placed, i as i64 + 1);
            assert_eq!(response.application_progress.total, 5);
            last = Some(response);
        }

        let last = last.unwrap();
        assert_eq!(last.cargo_name, "B");
        assert_eq!(last.placement_details.location_code, "Б1-П3-Я5");
        assert_eq!(last.placement_details.id_based_code, "001-01-03-05");
        assert_eq!(last.application_progress.percentage, 100.0);

        let progress = engine.compute_progress("250101").await.unwrap();
        assert_eq!(progress, CargoProgress {
            cargo_number: "250101".to_string(),
            total_units: 5,
            placed_units: 5,
            pending_units: 0,
            percentage: 100.0,
        });

        assert!(engine.list_available(&PaginationQuery::default()).await.unwrap().items.is_empty());
        let fully = engine.list_fully_placed(&PaginationQuery::default()).await.unwrap();
        assert_eq!(fully.items.len(), 1);
        assert_eq!(fully.items[0].cargo_number, "250101");
        assert_eq!(fully.summary, PlacementSummary { fully_placed_requests: 1, total_units_placed: 5 });
        assert_eq!(fully.pagination, PaginationInfo::from_page(1, 1, 20));

        // Последнее размещение перевело заявку в placed_in_warehouse
        let change = last.status_change.unwrap();
        assert_eq!(change.to, CargoStatus::PlacedInWarehouse);
        assert_eq!(events.changes.lock().unwrap().len(), 1);
        let entries = history(&pool, "250101").await.unwrap();
        assert_eq!(entries.last().unwrap().to_status, "placed_in_warehouse");
    }

    #[actix_rt::test]
    async fn test_auto_advance_can_be_disabled() {
        let pool = test_pool().await;
        let mut config = Config::default();
        config.placement.auto_advance_status = false;
        let engine = PlacementEngine::new(&pool, &config, &LoggingEvents);
        setup(&pool, &config, "1", &[("A", 1)]).await;
        walk_to(&pool, "1", CargoStatus::AwaitingPlacement).await;

        let response = engine.place_unit(&admin(), &place("1/01/01", 1, 1, 1)).await.unwrap();
        assert!(response.status_change.is_none());
        assert_eq!(response.application_progress.percentage, 100.0);
    }

    #[actix_rt::test]
    async fn test_concurrent_placement_exactly_one_wins() {
        let (_dir, pool) = test_file_pool(5).await;
        let config = Config::default();
        let engine = PlacementEngine::new(&pool, &config, &LoggingEvents);
        setup(&pool, &config, "250101", &[("A", 8)]).await;
        let op = admin();

        for i in 1..=8 {
            let first = place(&format!("250101/01/{:02}", i), 1, 1, i);
            let second = place(&format!("250101.01.{:02}", i), 2, 2, i);

            let (a, b) = tokio::join!(engine.place_unit(&op, &first), engine.place_unit(&op, &second));

            let (winner, loser) = match (a, b) {
                (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
                other => panic!("expected exactly one winner for unit {}: {:?}", i, other),
            };
            assert!(matches!(loser, ApiError::Conflict(_)), "unexpected: {:?}", loser);

            // Сохранённая ячейка совпадает с ответом победителя
            let stored: String = sqlx::query_scalar(
                "SELECT c.id_based_code FROM individual_units u JOIN cells c ON c.id = u.cell_id
                 WHERE u.individual_number = ?",
            )
            .bind(&winner.individual_number)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(stored, winner.placement_details.id_based_code);
            assert_eq!(winner.unit_version, 1);
        }

        // Каждая единица привязана ровно к одной ячейке
        let occupied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cells WHERE is_occupied = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(occupied, 8);
        assert_eq!(engine.compute_progress("250101").await.unwrap().placed_units, 8);
    }

    #[actix_rt::test]
    async fn test_concurrent_versioned_moves_exactly_one_wins() {
        let (_dir, pool) = test_file_pool(5).await;
        let config = Config::default();
        let engine = PlacementEngine::new(&pool, &config, &LoggingEvents);
        setup(&pool, &config, "250101", &[("A", 1)]).await;
        let op = admin();

        let placed = engine.place_unit(&op, &place("250101/01/01", 1, 1, 1)).await.unwrap();

        let mut first = place("250101/01/01", 1, 2, 1);
        first.expected_version = Some(placed.unit_version);
        let mut second = place("250101.01.01", 2, 3, 9);
        second.expected_version = Some(placed.unit_version);

        let (a, b) = tokio::join!(engine.place_unit(&op, &first), engine.place_unit(&op, &second));

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes.iter().any(|r| matches!(r, Err(ApiError::Conflict(_)))));

        let occupied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cells WHERE is_occupied = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(occupied, 1);
        let version: i64 = sqlx::query_scalar("SELECT version FROM individual_units")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, placed.unit_version + 1);
    }

    #[actix_rt::test]
    async fn test_move_without_version_is_conflict() {
        let pool = test_pool().await;
        let config = Config::default();
        let engine = PlacementEngine::new(&pool, &config, &LoggingEvents);
        let warehouse = setup(&pool, &config, "250101", &[("A", 1)]).await;
        let registry = WarehouseRegistry::new(&pool, &config.warehouse);

        let placed = engine.place_unit(&admin(), &place("250101/01/01", 1, 1, 1)).await.unwrap();

        let err = engine.place_unit(&admin(), &place("250101/01/01", 1, 1, 2)).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)), "unexpected: {:?}", err);
        let contents = registry.get_cell_contents(&warehouse.id, 1, 1, 1).await.unwrap();
        assert_eq!(contents.occupants.len(), 1);

        // Повторное сканирование в ту же ячейку без версии допустимо
        let again = engine.place_unit(&admin(), &place("250101/01/01", 1, 1, 1)).await.unwrap();
        assert_eq!(again.placement_details.location_code, "Б1-П1-Я1");

        let mut moving = place("250101/01/01", 1, 1, 2);
        moving.expected_version = Some(again.unit_version);
        let moved = engine.place_unit(&admin(), &moving).await.unwrap();
        assert_eq!(moved.previous_location.as_deref(), Some("Б1-П1-Я1"));
        assert!(moved.unit_version > placed.unit_version);
    }

    #[actix_rt::test]
    async fn test_stale_version_is_conflict() {
        let pool = test_pool().await;
        let config = Config::default();
        let engine = PlacementEngine::new(&pool, &config, &LoggingEvents);
        setup(&pool, &config, "250101", &[("A", 1)]).await;

        let placed = engine.place_unit(&admin(), &place("250101/01/01", 1, 1, 1)).await.unwrap();
        assert_eq!(placed.unit_version, 1);

        let mut stale = place("250101/01/01", 1, 1, 2);
        stale.expected_version = Some(0);
        assert!(matches!(engine.place_unit(&admin(), &stale).await, Err(ApiError::Conflict(_))));

        stale.expected_version = Some(1);
        let moved = engine.place_unit(&admin(), &stale).await.unwrap();
        assert_eq!(moved.previous_location.as_deref(), Some("Б1-П1-Я1"));
    }

    #[actix_rt::test]
    async fn test_move_releases_previous_cell() {
        let pool = test_pool().await;
        let config = Config::default();
        let engine = PlacementEngine::new(&pool, &config, &LoggingEvents);
        let warehouse = setup(&pool, &config, "250101", &[("A", 1)]).await;
        let registry = WarehouseRegistry::new(&pool, &config.warehouse);

        let placed = engine.place_unit(&admin(), &place("250101/01/01", 1, 1, 1)).await.unwrap();
        let mut moving = place("250101/01/01", 2, 3, 10);
        moving.expected_version = Some(placed.unit_version);
        engine.place_unit(&admin(), &moving).await.unwrap();

        let old = registry.get_cell_contents(&warehouse.id, 1, 1, 1).await.unwrap();
        assert!(!old.cell.is_occupied);
        assert!(old.occupants.is_empty());

        let new = registry.get_cell_contents(&warehouse.id, 2, 3, 10).await.unwrap();
        assert!(new.cell.is_occupied);
        assert_eq!(new.occupants.len(), 1);
    }

    #[actix_rt::test]
    async fn test_multi_occupancy_allows_shared_cells() {
        let pool = test_pool().await;
        let config = Config::default();
        assert!(!config.warehouse.single_occupancy);
        let engine = PlacementEngine::new(&pool, &config, &LoggingEvents);
        let warehouse = setup(&pool, &config, "250101", &[("A", 2)]).await;

        engine.place_unit(&admin(), &place("250101/01/01", 1, 1, 1)).await.unwrap();
        engine.place_unit(&admin(), &place("250101/01/02", 1, 1, 1)).await.unwrap();

        let registry = WarehouseRegistry::new(&pool, &config.warehouse);
        let contents = registry.get_cell_contents(&warehouse.id, 1, 1, 1).await.unwrap();
        assert!(contents.cell.is_occupied);
        assert_eq!(contents.occupants.len(), 2);
    }

    #[actix_rt::test]
    async fn test_single_occupancy_rejects_second_unit() {
        let pool = test_pool().await;
        let mut config = Config::default();
        config.warehouse.single_occupancy = true;
        let engine = PlacementEngine::new(&pool, &config, &LoggingEvents);
        setup(&pool, &config, "250101", &[("A", 2)]).await;

        engine.place_unit(&admin(), &place("250101/01/01", 1, 1, 1)).await.unwrap();
        let err = engine.place_unit(&admin(), &place("250101/01/02", 1, 1, 1)).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        // Та же единица в ту же ячейку: не конфликт
        engine.place_unit(&admin(), &place("250101/01/01", 1, 1, 1)).await.unwrap();
    }

    #[actix_rt::test]
    async fn test_remove_keeps_request_status() {
        let pool = test_pool().await;
        let config = Config::default();
        let engine = PlacementEngine::new(&pool, &config, &LoggingEvents);
        let warehouse = setup(&pool, &config, "250101", &[("A", 1)]).await;
        walk_to(&pool, "250101", CargoStatus::AwaitingPlacement).await;

        engine.place_unit(&admin(), &place("250101/01/01", 1, 2, 3)).await.unwrap();
        let removed = engine.remove_unit(&admin(), "250101.01.01", None).await.unwrap();
        assert_eq!(removed.previous_location.as_deref(), Some("Б1-П2-Я3"));
        assert_eq!(removed.application_progress.placed, 0);
        assert_eq!(removed.application_progress.percentage, 0.0);

        let mut conn = pool.acquire().await.unwrap();
        let unit = find_unit(&mut conn, "250101/01/01").await.unwrap();
        assert!(!unit.is_placed);
        assert_eq!(unit.get_status(), UnitStatus::RemovedFromPlacement);
        assert!(unit.cell_id.is_none());

        let request = find_request(&mut conn, "250101").await.unwrap();
        assert_eq!(request.status, "placed_in_warehouse");
        drop(conn);

        let registry = WarehouseRegistry::new(&pool, &config.warehouse);
        assert!(!registry.get_cell_contents(&warehouse.id, 1, 2, 3).await.unwrap().cell.is_occupied);

        let available = engine.list_available(&PaginationQuery::default()).await.unwrap();
        assert_eq!(available.items.len(), 1);

        let err = engine.remove_unit(&admin(), "250101/01/01", None).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[actix_rt::test]
    async fn test_warehouse_inference() {
        let pool = test_pool().await;
        let config = Config::default();
        let engine = PlacementEngine::new(&pool, &config, &LoggingEvents);
        let warehouse = setup(&pool, &config, "250101", &[("A", 2)]).await;
        create_cargo_request(&pool, &cargo(Some("250102"), &[("A", 1)]), "op").await.unwrap();

        // Ни склада в запросе, ни назначения, ни целевого склада
        let err = engine.place_unit(&admin(), &place("250102/01/01", 1, 1, 1)).await.unwrap_err();
        assert!(matches!(err, ApiError::AmbiguousWarehouse(_)));

        // Единственный склад оператора
        let operator = Operator {
            user_id: "op".to_string(),
            warehouse_ids: vec![warehouse.id.clone()],
            unrestricted: false,
        };
        let response = engine.place_unit(&operator, &place("250102/01/01", 1, 1, 1)).await.unwrap();
        assert_eq!(response.placement_details.warehouse_number, "001");

        // Выведенный склад не содержит ячейку
        let err = engine.place_unit(&admin(), &place("250101/01/01", 3, 1, 1)).await.unwrap_err();
        assert!(matches!(err, ApiError::WarehouseMismatch(_)));

        // Явно указанный склад без такой ячейки
        let mut explicit = place("250101/01/01", 1, 1, 11);
        explicit.warehouse_id = Some(warehouse.id.clone());
        match engine.place_unit(&admin(), &explicit).await {
            Err(ApiError::NotFound { entity, .. }) => assert_eq!(entity, "cell"),
            other => panic!("unexpected: {:?}", other.map(|r| r.individual_number)),
        }
    }

    #[actix_rt::test]
    async fn test_operator_scope_is_enforced() {
        let pool = test_pool().await;
        let config = Config::default();
        let engine = PlacementEngine::new(&pool, &config, &LoggingEvents);
        let warehouse = setup(&pool, &config, "250101", &[("A", 1)]).await;

        let outsider = Operator {
            user_id: "op".to_string(),
            warehouse_ids: vec!["other-1".to_string(), "other-2".to_string()],
            unrestricted: false,
        };
        let mut request = place("250101/01/01", 1, 1, 1);
        request.warehouse_id = Some(warehouse.id.clone());
        assert!(matches!(engine.place_unit(&outsider, &request).await, Err(ApiError::Forbidden(_))));
    }

    #[actix_rt::test]
    async fn test_unknown_unit() {
        let pool = test_pool().await;
        let config = Config::default();
        let engine = PlacementEngine::new(&pool, &config, &LoggingEvents);
        setup(&pool, &config, "250101", &[("A", 1)]).await;

        match engine.place_unit(&admin(), &place("250101/01/09", 1, 1, 1)).await {
            Err(ApiError::NotFound { entity, .. }) => assert_eq!(entity, "unit"),
            other => panic!("unexpected: {:?}", other.map(|r| r.individual_number)),
        }
        assert!(matches!(
            engine.place_unit(&admin(), &place("250101", 1, 1, 1)).await,
            Err(ApiError::FormatError(_))
        ));
    }

    #[actix_rt::test]
    async fn test_batch_reports_each_unit() {
        let pool = test_pool().await;
        let config = Config::default();
        let engine = PlacementEngine::new(&pool, &config, &LoggingEvents);
        setup(&pool, &config, "250101", &[("A", 2)]).await;

        let batch = vec![
            place("250101/01/01", 1, 1, 1),
            place("250101/01/99", 1, 1, 2),
            place("250101/01/02", 9, 1, 1),
            place("250101/01/02", 1, 1, 3),
        ];
        let response = engine.place_batch(&admin(), &batch).await.unwrap();

        assert_eq!(response.total, 4);
        assert_eq!(response.succeeded, 2);
        assert_eq!(response.failed, 2);
        assert_eq!(response.results[1].error.as_ref().unwrap().kind, "not_found");
        assert_eq!(response.results[2].error.as_ref().unwrap().kind, "warehouse_mismatch");
        assert!(response.results[3].success);

        assert!(engine.place_batch(&admin(), &[]).await.is_err());
    }

    #[actix_rt::test]
    async fn test_list_search_and_paging() {
        let pool = test_pool().await;
        let config = Config::default();
        let engine = PlacementEngine::new(&pool, &config, &LoggingEvents);
        for number in ["250101", "250102", "250201"] {
            setup(&pool, &config, number, &[("A", 1)]).await;
        }

        let query = PaginationQuery { search: Some("2501".to_string()), ..Default::default() };
        let found = engine.list_available(&query).await.unwrap();
        assert_eq!(found.pagination.total_count, 2);

        let query = PaginationQuery { page: Some(2), per_page: Some(2), ..Default::default() };
        let page = engine.list_available(&query).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.pagination.total_pages, 2);
        assert_eq!(page.summary, PlacementSummary::default());
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(5, 5), 100.0);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.66);
        assert!(percentage(19999, 20000) < 100.0);
        assert!(percentage(98900, 98901) < 100.0);
        assert_eq!(percentage(7, 5), 100.0);

        let almost = CargoProgress::new("x", 20000, 19999);
        assert!(!almost.is_complete());
        assert!(almost.percentage < 100.0);
        assert!(!CargoProgress::new("x", 0, 0).is_complete());
        assert_eq!(CargoProgress::new("x", 0, 0).percentage, 0.0);
    }
}
