// src/models/warehouse.rs
//! Склад и его сетка: блок → полка → ячейка.
//! Связи родитель/потомок: внешние ключи, разрешаются в коде приложения.

use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use crate::error::{ApiError, ApiResult};
use crate::location_code::CellCoords;

// ==================== WAREHOUSE ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Warehouse {
    pub id: String,
    /// Последовательный номер склада, "001"
    pub id_number: String,
    pub name: String,
    pub block_count: i64,
    pub shelves_per_block: i64,
    pub cells_per_shelf: i64,
    pub capacity: i64,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Warehouse {
    pub fn number(&self) -> ApiResult<i64> {
        self.id_number.parse::<i64>().map_err(|_| {
            ApiError::InternalServerError(format!(
                "Warehouse {} has malformed id_number '{}'", self.id, self.id_number
            ))
        })
    }

    /// Лежит ли адрес внутри объявленных размеров склада
    pub fn contains(&self, block: i64, shelf: i64, cell: i64) -> bool {
        (1..=self.block_count).contains(&block)
            && (1..=self.shelves_per_block).contains(&shelf)
            && (1..=self.cells_per_shelf).contains(&cell)
    }

    pub fn coords(&self, block: i64, shelf: i64, cell: i64) -> ApiResult<CellCoords> {
        CellCoords::new(self.number()?, block, shelf, cell)
    }
}

// ==================== GRID ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Block {
    pub id: String,
    pub warehouse_id: String,
    pub block_number: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Shelf {
    pub id: String,
    pub block_id: String,
    pub warehouse_id: String,
    pub shelf_number: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Cell {
    pub id: String,
    pub shelf_id: String,
    pub warehouse_id: String,
    pub block_number: i64,
    pub shelf_number: i64,
    pub cell_number: i64,
    /// "Б1-П3-Я3"
    pub location_code: String,
    /// "001-01-03-03"
    pub id_based_code: String,
    pub is_occupied: bool,
    pub schema_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Единица, лежащая в ячейке
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct CellOccupant {
    pub individual_number: String,
    pub cargo_number: String,
    pub placed_by: Option<String>,
    pub placed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CellWithOccupants {
    #[serde(flatten)]
    pub cell: Cell,
    pub occupants: Vec<CellOccupant>,
}

#[derive(Debug, Serialize)]
pub struct StructureSummary {
    pub warehouse_id: String,
    pub blocks: i64,
    pub shelves: i64,
    pub cells: i64,
    pub capacity: i64,
}

#[derive(Debug, Serialize)]
pub struct WarehouseOverview {
    #[serde(flatten)]
    pub warehouse: Warehouse,
    pub materialized_cells: i64,
    pub occupied_cells: i64,
    pub units_stored: i64,
}

// ==================== REQUESTS ====================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateWarehouseRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: String,

    #[validate(range(min = 1, message = "Block count must be positive"))]
    pub block_count: i64,

    #[validate(range(min = 1, message = "Shelves per block must be positive"))]
    pub shelves_per_block: i64,

    #[validate(range(min = 1, message = "Cells per shelf must be positive"))]
    pub cells_per_shelf: i64,

    /// Сразу материализовать все блоки/полки/ячейки
    pub create_structure: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStructureRequest {
    #[validate(range(min = 1, message = "Block count must be positive"))]
    pub block_count: i64,

    #[validate(range(min = 1, message = "Shelves per block must be positive"))]
    pub shelves_per_block: i64,

    #[validate(range(min = 1, message = "Cells per shelf must be positive"))]
    pub cells_per_shelf: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warehouse(blocks: i64, shelves: i64, cells: i64) -> Warehouse {
        Warehouse {
            id: "w1".to_string(),
            id_number: "007".to_string(),
            name: "Душанбе".to_string(),
            block_count: blocks,
            shelves_per_block: shelves,
            cells_per_shelf: cells,
            capacity: blocks * shelves * cells,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_contains_respects_declared_dimensions() {
        let w = warehouse(2, 3, 10);
        assert!(w.contains(1, 1, 1));
        assert!(w.contains(2, 3, 10));
        assert!(!w.contains(3, 1, 1));
        assert!(!w.contains(1, 4, 1));
        assert!(!w.contains(1, 1, 11));
        assert!(!w.contains(0, 1, 1));
    }

    #[test]
    fn test_number_parses_id_number() {
        let w = warehouse(1, 1, 1);
        assert_eq!(w.number().unwrap(), 7);
        assert_eq!(w.coords(1, 1, 1).unwrap().warehouse, 7);
    }

    #[test]
    fn test_create_warehouse_request_validation() {
        let request = CreateWarehouseRequest {
            name: "".to_string(),
            block_count: 0,
            shelves_per_block: 1,
            cells_per_shelf: 1,
            create_structure: None,
        };
        assert!(request.validate().is_err());
    }
}
