// src/models/mod.rs

pub mod cargo;
pub mod status;
pub mod warehouse;

// Ре-экспорт, чтобы структуры были доступны как crate::models::StructName
pub use cargo::*;
pub use status::*;
pub use warehouse::*;

use serde::Serialize;

// ==================== COMMON / SHARED ====================

/// Агрегаты по заявкам для списков размещения
#[derive(Debug, Serialize, Default, PartialEq)]
pub struct PlacementSummary {
    pub fully_placed_requests: i64,
    pub total_units_placed: i64,
}
