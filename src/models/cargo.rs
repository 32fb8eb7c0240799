// src/models/cargo.rs
//! Заявка на перевозку, её типы груза и отдельные единицы.
//!
//! Номер единицы: `{cargo_number}/{type_number:02}/{unit_index:02}`,
//! например `250101/02/03`: третья единица второго типа заявки 250101.

use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use crate::error::{ApiError, ApiResult};
use super::status::{CargoStatus, UnitStatus};

// ==================== CARGO REQUEST ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct CargoRequest {
    pub id: String,
    pub cargo_number: String,
    pub client_name: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub target_warehouse_id: Option<String>,
    pub status: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CargoRequest {
    pub fn get_status(&self) -> ApiResult<CargoStatus> {
        CargoStatus::from_str(&self.status).map_err(|_| {
            ApiError::InternalServerError(format!(
                "Cargo request {} has unknown status '{}'", self.cargo_number, self.status
            ))
        })
    }
}

// ==================== CARGO ITEM ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct CargoItem {
    pub id: String,
    pub request_id: String,
    /// Порядковый номер типа внутри заявки, "01"
    pub type_number: String,
    pub name: String,
    pub quantity: i64,
    pub weight: f64,
    pub price: f64,
    pub schema_version: i64,
    pub created_at: DateTime<Utc>,
}

// ==================== INDIVIDUAL UNIT ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct IndividualUnit {
    pub id: String,
    pub individual_number: String,
    pub request_id: String,
    pub item_id: String,
    pub cargo_number: String,
    pub type_number: String,
    pub unit_index: String,
    pub status: String,
    pub is_placed: bool,
    pub cell_id: Option<String>,
    pub warehouse_id: Option<String>,
    pub placed_by: Option<String>,
    pub placed_at: Option<DateTime<Utc>>,
    /// Растёт при каждой смене привязки; на нём держится условная запись
    pub version: i64,
    pub schema_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// "Б1-П3-Я3" текущей ячейки (из LEFT JOIN cells)
    #[sqlx(default)]
    pub placement_location: Option<String>,
    #[sqlx(default)]
    pub placement_code: Option<String>,
}

impl IndividualUnit {
    pub fn get_status(&self) -> UnitStatus {
        UnitStatus::from_str(&self.status).unwrap_or(UnitStatus::AwaitingPlacement)
    }
}

/// Колонки единицы вместе с адресом текущей ячейки
pub const UNIT_SELECT: &str = r#"SELECT u.*, c.location_code AS placement_location,
           c.id_based_code AS placement_code
    FROM individual_units u
    LEFT JOIN cells c ON c.id = u.cell_id"#;

pub fn format_type_number(type_number: usize) -> String {
    format!("{:02}", type_number)
}

pub fn format_unit_index(unit_index: usize) -> String {
    format!("{:02}", unit_index)
}

/// Номер единицы однозначно выводится из (номер груза, тип, индекс)
pub fn individual_number(cargo_number: &str, type_number: usize, unit_index: usize) -> String {
    format!(
        "{}/{}/{}",
        cargo_number,
        format_type_number(type_number),
        format_unit_index(unit_index)
    )
}

// ==================== RESPONSES ====================

#[derive(Debug, Serialize)]
pub struct CargoItemWithUnits {
    #[serde(flatten)]
    pub item: CargoItem,
    pub units: Vec<IndividualUnit>,
}

#[derive(Debug, Serialize)]
pub struct CargoRequestDetails {
    #[serde(flatten)]
    pub request: CargoRequest,
    pub items: Vec<CargoItemWithUnits>,
    pub total_units: i64,
}

// ==================== REQUESTS ====================

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct CreateCargoItemRequest {
    #[validate(length(min = 1, max = 255, message = "Item name must be between 1 and 255 characters"))]
    pub name: String,

    #[validate(range(min = 1, max = 999, message = "Quantity must be between 1 and 999"))]
    pub quantity: i64,

    #[validate(range(min = 0.0, message = "Weight must be non-negative"))]
    pub weight: Option<f64>,

    #[validate(range(min = 0.0, message = "Price must be non-negative"))]
    pub price: Option<f64>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateCargoRequest {
    /// Если не задан, выдаётся из счётчика: YYMM + порядковый номер за месяц
    #[validate(length(min = 1, max = 10, message = "Cargo number must be 1-10 digits"))]
    pub cargo_number: Option<String>,

    #[validate(length(max = 255, message = "Client name cannot exceed 255 characters"))]
    pub client_name: Option<String>,

    #[validate(length(max = 255, message = "Origin cannot exceed 255 characters"))]
    pub origin: Option<String>,

    #[validate(length(max = 255, message = "Destination cannot exceed 255 characters"))]
    pub destination: Option<String>,

    pub target_warehouse_id: Option<String>,

    #[validate(length(min = 1, max = 99, message = "A request must contain 1-99 cargo types"), nested)]
    pub items: Vec<CreateCargoItemRequest>,
}
