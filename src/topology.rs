// src/topology.rs
//! Реестр складов и их сетки.
//!
//! Номера складов выдаёт счётчик `id_sequences` (атомарный upsert),
//! блоки/полки/ячейки создаются лениво через `INSERT ... ON CONFLICT DO NOTHING`
//! по кортежу координат, поэтому два параллельных обращения к новой ячейке
//! получают одну и ту же запись.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;
use log::info;

use crate::config::WarehouseConfig;
use crate::db::{next_sequence_value, SCHEMA_VERSION};
use crate::error::{ApiError, ApiResult};
use crate::location_code::{self, warehouse_id_number};
use crate::models::{
    Cell, CellOccupant, CellWithOccupants, CreateWarehouseRequest, StructureSummary, Warehouse,
    WarehouseOverview,
};

const WAREHOUSE_SEQUENCE: &str = "warehouse";

pub struct WarehouseRegistry<'a> {
    pool: &'a SqlitePool,
    limits: &'a WarehouseConfig,
}

impl<'a> WarehouseRegistry<'a> {
    pub fn new(pool: &'a SqlitePool, limits: &'a WarehouseConfig) -> Self {
        Self { pool, limits }
    }

    /// Размеры сетки должны быть в пределах [1, max] по каждому уровню
    pub fn check_dimensions(&self, blocks: i64, shelves: i64, cells: i64) -> ApiResult<()> {
        let checks = [
            ("blocks", blocks, self.limits.max_blocks),
            ("shelves_per_block", shelves, self.limits.max_shelves_per_block),
            ("cells_per_shelf", cells, self.limits.max_cells_per_shelf),
        ];
        for (name, value, max) in checks {
            if value < 1 || value > max {
                return Err(ApiError::ConfigError(format!(
                    "{} = {} is outside the allowed range 1..={}", name, value, max
                )));
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_warehouse(
        &self,
        request: &CreateWarehouseRequest,
        created_by: &str,
    ) -> ApiResult<Warehouse> {
        self.check_dimensions(request.block_count, request.shelves_per_block, request.cells_per_shelf)?;

        let mut tx = self.pool.begin().await?;

        let sequence = next_sequence_value(&mut *tx, WAREHOUSE_SEQUENCE).await?;
        if sequence > location_code::MAX_WAREHOUSE_NUMBER {
            return Err(ApiError::ConfigError(format!(
                "Warehouse numbering exhausted (max {})", location_code::MAX_WAREHOUSE_NUMBER
            )));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let capacity = request.block_count * request.shelves_per_block * request.cells_per_shelf;

        sqlx::query(
            r#"INSERT INTO warehouses
               (id, id_number, name, block_count, shelves_per_block, cells_per_shelf,
                capacity, created_by, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(warehouse_id_number(sequence))
        .bind(request.name.trim())
        .bind(request.block_count)
        .bind(request.shelves_per_block)
        .bind(request.cells_per_shelf)
        .bind(capacity)
        .bind(created_by)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_to_conflict(e, &format!("Warehouse '{}' already exists", request.name.trim())))?;

        let warehouse = find_warehouse(&mut tx, &id).await?;

        if request.create_structure.unwrap_or(false) {
            materialize(&mut tx, &warehouse).await?;
        }

        tx.commit().await?;

        info!("🏬 Warehouse {} '{}' created ({} cells)", warehouse.id_number, warehouse.name, capacity);
        Ok(warehouse)
    }

    /// Материализует всю сетку склада. Повторный вызов ничего не дублирует;
    /// размеры можно увеличить, но не уменьшить ниже уже созданных ячеек.
    #[tracing::instrument(skip(self))]
    pub async fn create_structure(
        &self,
        warehouse_id: &str,
        blocks: i64,
        shelves_per_block: i64,
        cells_per_shelf: i64,
    ) -> ApiResult<StructureSummary> {
        self.check_dimensions(blocks, shelves_per_block, cells_per_shelf)?;

        let mut tx = self.pool.begin().await?;
        let warehouse = find_warehouse(&mut tx, warehouse_id).await?;

        let stranded: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM cells
               WHERE warehouse_id = ?
                 AND (block_number > ? OR shelf_number > ? OR cell_number > ?)"#,
        )
        .bind(&warehouse.id)
        .bind(blocks)
        .bind(shelves_per_block)
        .bind(cells_per_shelf)
        .fetch_one(&mut *tx)
        .await?;

        if stranded > 0 {
            return Err(ApiError::ConfigError(format!(
                "Cannot shrink warehouse {}: {} existing cells lie outside {}×{}×{}",
                warehouse.id_number, stranded, blocks, shelves_per_block, cells_per_shelf
            )));
        }

        sqlx::query(
            r#"UPDATE warehouses
               SET block_count = ?, shelves_per_block = ?, cells_per_shelf = ?,
                   capacity = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(blocks)
        .bind(shelves_per_block)
        .bind(cells_per_shelf)
        .bind(blocks * shelves_per_block * cells_per_shelf)
        .bind(Utc::now())
        .bind(&warehouse.id)
        .execute(&mut *tx)
        .await?;

        let warehouse = find_warehouse(&mut tx, &warehouse.id).await?;
        let summary = materialize(&mut tx, &warehouse).await?;
        tx.commit().await?;

        info!(
            "🧱 Structure of warehouse {}: {} blocks, {} shelves, {} cells",
            warehouse.id_number, summary.blocks, summary.shelves, summary.cells
        );
        Ok(summary)
    }

    /// Найти или создать ячейку. Вне объявленных размеров: NotFound("cell").
    pub async fn resolve_cell(
        &self,
        warehouse_id: &str,
        block: i64,
        shelf: i64,
        cell: i64,
    ) -> ApiResult<Cell> {
        // Вне транзакции: upsert'ы идемпотентны, параллельный вызов получает ту же ячейку
        let mut conn = self.pool.acquire().await?;
        let warehouse = find_warehouse(&mut conn, warehouse_id).await?;
        resolve_cell_in(&mut conn, &warehouse, block, shelf, cell).await
    }

    /// Принимает как UUID, так и номер склада ("001")
    pub async fn get_warehouse(&self, id: &str) -> ApiResult<Warehouse> {
        let mut conn = self.pool.acquire().await?;
        find_warehouse(&mut conn, id).await
    }

    pub async fn get_overview(&self, id: &str) -> ApiResult<WarehouseOverview> {
        let mut conn = self.pool.acquire().await?;
        let warehouse = find_warehouse(&mut conn, id).await?;
        overview(&mut conn, warehouse).await
    }

    pub async fn list_warehouses(&self) -> ApiResult<Vec<WarehouseOverview>> {
        let mut conn = self.pool.acquire().await?;
        let warehouses: Vec<Warehouse> =
            sqlx::query_as("SELECT * FROM warehouses ORDER BY id_number")
                .fetch_all(&mut *conn)
                .await?;

        let mut result = Vec::with_capacity(warehouses.len());
        for warehouse in warehouses {
            result.push(overview(&mut conn, warehouse).await?);
        }
        Ok(result)
    }

    /// Ячейка и все лежащие в ней единицы. Ячейку не создаёт.
    pub async fn get_cell_contents(
        &self,
        warehouse_id: &str,
        block: i64,
        shelf: i64,
        cell: i64,
    ) -> ApiResult<CellWithOccupants> {
        let mut conn = self.pool.acquire().await?;
        let warehouse = find_warehouse(&mut conn, warehouse_id).await?;
        if !warehouse.contains(block, shelf, cell) {
            return Err(ApiError::cell_not_found(block, shelf, cell));
        }

        let found = find_cell(&mut conn, &warehouse.id, block, shelf, cell)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                entity: "cell".to_string(),
                message: format!(
                    "Cell {} has not been used yet",
                    location_code::human_code(block, shelf, cell)
                ),
            })?;

        let occupants = cell_occupants(&mut conn, &found.id).await?;
        Ok(CellWithOccupants { cell: found, occupants })
    }
}

// ==================== CONNECTION-LEVEL HELPERS ====================

pub async fn find_warehouse(conn: &mut SqliteConnection, id: &str) -> ApiResult<Warehouse> {
    sqlx::query_as::<_, Warehouse>("SELECT * FROM warehouses WHERE id = ? OR id_number = ?")
        .bind(id)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::warehouse_not_found(id))
}

pub async fn find_cell(
    conn: &mut SqliteConnection,
    warehouse_id: &str,
    block: i64,
    shelf: i64,
    cell: i64,
) -> ApiResult<Option<Cell>> {
    let found = sqlx::query_as::<_, Cell>(
        r#"SELECT * FROM cells
           WHERE warehouse_id = ? AND block_number = ? AND shelf_number = ? AND cell_number = ?"#,
    )
    .bind(warehouse_id)
    .bind(block)
    .bind(shelf)
    .bind(cell)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(found)
}

pub async fn find_cell_by_code(conn: &mut SqliteConnection, id_based_code: &str) -> ApiResult<Option<Cell>> {
    let found = sqlx::query_as::<_, Cell>("SELECT * FROM cells WHERE id_based_code = ?")
        .bind(id_based_code)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found)
}

pub async fn cell_occupants(conn: &mut SqliteConnection, cell_id: &str) -> ApiResult<Vec<CellOccupant>> {
    let occupants = sqlx::query_as::<_, CellOccupant>(
        r#"SELECT individual_number, cargo_number, placed_by, placed_at
           FROM individual_units
           WHERE cell_id = ?
           ORDER BY individual_number"#,
    )
    .bind(cell_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(occupants)
}

/// Find-or-create ячейки внутри уже открытой транзакции
pub async fn resolve_cell_in(
    conn: &mut SqliteConnection,
    warehouse: &Warehouse,
    block: i64,
    shelf: i64,
    cell: i64,
) -> ApiResult<Cell> {
    if !warehouse.contains(block, shelf, cell) {
        return Err(ApiError::cell_not_found(block, shelf, cell));
    }

    if let Some(existing) = find_cell(conn, &warehouse.id, block, shelf, cell).await? {
        return Ok(existing);
    }

    let block_id = upsert_block(conn, &warehouse.id, block).await?;
    let shelf_id = upsert_shelf(conn, &warehouse.id, &block_id, shelf).await?;
    upsert_cell(conn, warehouse, &shelf_id, block, shelf, cell).await?;

    find_cell(conn, &warehouse.id, block, shelf, cell)
        .await?
        .ok_or_else(|| ApiError::InternalServerError("Cell vanished after upsert".to_string()))
}

async fn upsert_block(conn: &mut SqliteConnection, warehouse_id: &str, block: i64) -> ApiResult<String> {
    sqlx::query(
        r#"INSERT INTO blocks (id, warehouse_id, block_number, created_at)
           VALUES (?, ?, ?, ?)
           ON CONFLICT(warehouse_id, block_number) DO NOTHING"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(warehouse_id)
    .bind(block)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    let id: String = sqlx::query_scalar("SELECT id FROM blocks WHERE warehouse_id = ? AND block_number = ?")
        .bind(warehouse_id)
        .bind(block)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

async fn upsert_shelf(
    conn: &mut SqliteConnection,
    warehouse_id: &str,
    block_id: &str,
    shelf: i64,
) -> ApiResult<String> {
    sqlx::query(
        r#"INSERT INTO shelves (id, block_id, warehouse_id, shelf_number, created_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(block_id, shelf_number) DO NOTHING"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(block_id)
    .bind(warehouse_id)
    .bind(shelf)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    let id: String = sqlx::query_scalar("SELECT id FROM shelves WHERE block_id = ? AND shelf_number = ?")
        .bind(block_id)
        .bind(shelf)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

/// true, если ячейка действительно была создана этим вызовом
async fn upsert_cell(
    conn: &mut SqliteConnection,
    warehouse: &Warehouse,
    shelf_id: &str,
    block: i64,
    shelf: i64,
    cell: i64,
) -> ApiResult<bool> {
    let encoded = location_code::encode(&warehouse.coords(block, shelf, cell)?);
    let now = Utc::now();

    let result = sqlx::query(
        r#"INSERT INTO cells
           (id, shelf_id, warehouse_id, block_number, shelf_number, cell_number,
            location_code, id_based_code, is_occupied, schema_version, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
           ON CONFLICT(warehouse_id, block_number, shelf_number, cell_number) DO NOTHING"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(shelf_id)
    .bind(&warehouse.id)
    .bind(block)
    .bind(shelf)
    .bind(cell)
    .bind(&encoded.location_code)
    .bind(&encoded.id_based_code)
    .bind(SCHEMA_VERSION)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn materialize(conn: &mut SqliteConnection, warehouse: &Warehouse) -> ApiResult<StructureSummary> {
    let mut created = 0i64;
    for block in 1..=warehouse.block_count {
        let block_id = upsert_block(conn, &warehouse.id, block).await?;
        for shelf in 1..=warehouse.shelves_per_block {
            let shelf_id = upsert_shelf(conn, &warehouse.id, &block_id, shelf).await?;
            for cell in 1..=warehouse.cells_per_shelf {
                if upsert_cell(conn, warehouse, &shelf_id, block, shelf, cell).await? {
                    created += 1;
                }
            }
        }
    }
    log::debug!("Materialized {} new cells in warehouse {}", created, warehouse.id_number);

    let (blocks, shelves, cells): (i64, i64, i64) = sqlx::query_as(
        r#"SELECT
              (SELECT COUNT(*) FROM blocks WHERE warehouse_id = ?1),
              (SELECT COUNT(*) FROM shelves WHERE warehouse_id = ?1),
              (SELECT COUNT(*) FROM cells WHERE warehouse_id = ?1)"#,
    )
    .bind(&warehouse.id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(StructureSummary {
        warehouse_id: warehouse.id.clone(),
        blocks,
        shelves,
        cells,
        capacity: warehouse.capacity,
    })
}

async fn overview(conn: &mut SqliteConnection, warehouse: Warehouse) -> ApiResult<WarehouseOverview> {
    let (materialized_cells, occupied_cells, units_stored): (i64, i64, i64) = sqlx::query_as(
        r#"SELECT
              (SELECT COUNT(*) FROM cells WHERE warehouse_id = ?1),
              (SELECT COUNT(*) FROM cells WHERE warehouse_id = ?1 AND is_occupied = 1),
              (SELECT COUNT(*) FROM individual_units WHERE warehouse_id = ?1 AND is_placed = 1)"#,
    )
    .bind(&warehouse.id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(WarehouseOverview { warehouse, materialized_cells, occupied_cells, units_stored })
}

fn unique_to_conflict(err: sqlx::Error, message: &str) -> ApiError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            ApiError::Conflict(message.to_string())
        }
        _ => ApiError::DatabaseError(err),
    }
}
