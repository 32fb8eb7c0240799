// src/pagination.rs
//! Постраничная выдача списков размещения

use serde::{Deserialize, Serialize};

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub q: Option<String>,              // Frontend naming (alias for search)
    pub warehouse_id: Option<String>,
}

impl PaginationQuery {
    /// (page, per_page, offset)
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
        let offset = (page - 1).saturating_mul(per_page);
        (page, per_page, offset)
    }

    /// Поиск по номеру груза или клиенту (поддержка обоих параметров: search и q)
    pub fn get_search(&self) -> Option<&str> {
        self.search.as_deref()
            .or(self.q.as_deref())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn search_pattern(&self) -> Option<String> {
        self.get_search().map(|s| {
            let escaped = s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
            format!("%{}%", escaped)
        })
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PaginationInfo {
    pub total_count: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl PaginationInfo {
    pub fn from_page(total_count: i64, page: i64, per_page: i64) -> Self {
        let total_pages = if per_page > 0 { (total_count + per_page - 1) / per_page } else { 0 };
        Self { total_count, page, per_page, total_pages }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedList<T, S> {
    pub items: Vec<T>,
    pub pagination: PaginationInfo,
    pub summary: S,
}
