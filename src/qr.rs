// src/qr.rs
//! Разбор и разрешение отсканированных кодов.
//!
//! QR-коды груза трёх уровней (разделитель `.` или `/`):
//!   `250101`        заявка
//!   `250101.01`     тип груза в заявке
//!   `250101.01.02`  конкретная единица
//! Кроме них, точка проверки принимает адрес ячейки в любой из двух форм.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};

use crate::cargo_units::{find_item, find_request, find_unit_of_item};
use crate::error::{ApiError, ApiResult};
use crate::location_code::{self, CodeFormat, DecodedLocation};
use crate::models::{format_type_number, format_unit_index, individual_number, CargoItem, CargoRequest, CellWithOccupants, IndividualUnit};
use crate::topology::{cell_occupants, find_cell_by_code, find_warehouse};

lazy_static! {
    static ref QR_CODE: Regex =
        Regex::new(r"^([0-9]{1,10})(?:[./]([0-9]{1,3})(?:[./]([0-9]{1,3}))?)?$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QrCode {
    Simple { cargo_number: String },
    Item { cargo_number: String, type_number: String },
    Unit { cargo_number: String, type_number: String, unit_index: String },
}

impl QrCode {
    pub fn parse(code: &str) -> ApiResult<Self> {
        let code = code.trim();
        let caps = QR_CODE.captures(code).ok_or_else(|| {
            ApiError::FormatError(format!(
                "'{}' is not a cargo code (expected <cargo>[.<type>[.<unit>]])", code
            ))
        })?;

        let cargo_number = caps[1].to_string();
        let type_number = caps.get(2).map(|m| repad(m.as_str(), code)).transpose()?;
        let unit_index = caps.get(3).map(|m| repad(m.as_str(), code)).transpose()?;

        Ok(match (type_number, unit_index) {
            (None, _) => QrCode::Simple { cargo_number },
            (Some(type_number), None) => QrCode::Item { cargo_number, type_number },
            (Some(type_number), Some(unit_index)) => QrCode::Unit { cargo_number, type_number, unit_index },
        })
    }

    pub fn cargo_number(&self) -> &str {
        match self {
            QrCode::Simple { cargo_number }
            | QrCode::Item { cargo_number, .. }
            | QrCode::Unit { cargo_number, .. } => cargo_number,
        }
    }

    /// Номер единицы в каноническом виде `250101/01/02`, только для кода единицы
    pub fn individual_number(&self) -> Option<String> {
        match self {
            QrCode::Unit { cargo_number, type_number, unit_index } => {
                Some(format!("{}/{}/{}", cargo_number, type_number, unit_index))
            }
            _ => None,
        }
    }
}

/// Вложенные сегменты всегда хранятся в два разряда: "1" и "001" → "01"
fn repad(segment: &str, code: &str) -> ApiResult<String> {
    let value: usize = segment
        .parse()
        .map_err(|_| ApiError::FormatError(format!("Segment '{}' of '{}' is not numeric", segment, code)))?;
    if value == 0 {
        return Err(ApiError::FormatError(format!("Segment '{}' of '{}' must be at least 1", segment, code)));
    }
    Ok(format_unit_index(value))
}

/// Номер единицы из пути URL: допускает и `250101.01.02`, и `250101/01/02`
pub fn normalize_individual_number(raw: &str) -> ApiResult<String> {
    QrCode::parse(raw)?.individual_number().ok_or_else(|| {
        ApiError::FormatError(format!("'{}' does not identify a single unit", raw))
    })
}

#[derive(Debug, Serialize)]
pub struct ItemRef {
    pub cargo_number: String,
    #[serde(flatten)]
    pub item: CargoItem,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ResolvedRef {
    Request(CargoRequest),
    Item(ItemRef),
    Unit(IndividualUnit),
    /// Канонический адрес существующей ячейки
    Cell(CellWithOccupants),
    /// Человекочитаемый адрес: склада в нём нет, отдаём только координаты
    Location(DecodedLocation),
}

impl ResolvedRef {
    pub fn kind(&self) -> &'static str {
        match self {
            ResolvedRef::Request(_) => "request",
            ResolvedRef::Item(_) => "item",
            ResolvedRef::Unit(_) => "unit",
            ResolvedRef::Cell(_) => "cell",
            ResolvedRef::Location(_) => "location",
        }
    }
}

/// Разрешение слева направо: заявка → тип → единица.
/// Ошибка NotFound называет первый не найденный сегмент.
pub async fn resolve_qr(conn: &mut SqliteConnection, qr: &QrCode) -> ApiResult<ResolvedRef> {
    let request = find_request(conn, qr.cargo_number()).await?;

    match qr {
        QrCode::Simple { .. } => Ok(ResolvedRef::Request(request)),
        QrCode::Item { type_number, .. } => {
            let item = find_item(conn, &request, type_number).await?;
            Ok(ResolvedRef::Item(ItemRef { cargo_number: request.cargo_number, item }))
        }
        QrCode::Unit { type_number, unit_index, .. } => {
            let item = find_item(conn, &request, type_number).await?;
            let unit = find_unit_of_item(conn, &item, &request.cargo_number, unit_index).await?;
            Ok(ResolvedRef::Unit(unit))
        }
    }
}

async fn resolve_location(conn: &mut SqliteConnection, decoded: DecodedLocation) -> ApiResult<ResolvedRef> {
    let coords = match (decoded.format, decoded.into_coords()) {
        (CodeFormat::Canonical, Some(coords)) => coords,
        _ => return Ok(ResolvedRef::Location(decoded)),
    };

    let warehouse = find_warehouse(conn, &location_code::warehouse_id_number(coords.warehouse)).await?;
    if !warehouse.contains(coords.block, coords.shelf, coords.cell) {
        return Err(ApiError::cell_not_found(coords.block, coords.shelf, coords.cell));
    }

    // Трёхразрядная ячейка старых этикеток приводится к текущей форме
    let canonical = location_code::canonical_code(&coords);
    let cell = find_cell_by_code(conn, &canonical).await?.ok_or_else(|| ApiError::NotFound {
        entity: "cell".to_string(),
        message: format!("Cell {} has not been used yet", canonical),
    })?;
    let occupants = cell_occupants(conn, &cell.id).await?;
    Ok(ResolvedRef::Cell(CellWithOccupants { cell, occupants }))
}

/// Точка проверки любого кода: QR груза или адрес ячейки
#[tracing::instrument(skip(pool))]
pub async fn resolve_code(pool: &SqlitePool, code: &str) -> ApiResult<ResolvedRef> {
    let mut conn = pool.acquire().await?;
    if location_code::looks_like_location(code) {
        let decoded = location_code::decode(code)?;
        return resolve_location(&mut conn, decoded).await;
    }
    let qr = QrCode::parse(code)?;
    resolve_qr(&mut conn, &qr).await
}

/// QR-коды для печати этикеток заявки: заявка, каждый тип и каждая единица
pub fn label_codes(cargo_number: &str, quantities: &[i64]) -> Vec<String> {
    let mut codes = vec![cargo_number.to_string()];
    for (type_idx, quantity) in quantities.iter().enumerate() {
        let type_number = format_type_number(type_idx + 1);
        codes.push(format!("{}.{}", cargo_number, type_number));
        for unit_idx in 1..=*quantity as usize {
            codes.push(individual_number(cargo_number, type_idx + 1, unit_idx).replace('/', "."));
        }
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cargo_units::create_cargo_request;
    use crate::cargo_units::tests::cargo;
    use crate::config::WarehouseConfig;
    use crate::db::test_pool;
    use crate::topology::tests::request as warehouse_request;
    use crate::topology::WarehouseRegistry;

    #[test]
    fn test_parse_granularities() {
        assert_eq!(
            QrCode::parse("123456").unwrap(),
            QrCode::Simple { cargo_number: "123456".to_string() }
        );
        assert_eq!(
            QrCode::parse("123456.01").unwrap(),
            QrCode::Item { cargo_number: "123456".to_string(), type_number: "01".to_string() }
        );
        assert_eq!(
            QrCode::parse("123456.01.02").unwrap(),
            QrCode::Unit {
                cargo_number: "123456".to_string(),
                type_number: "01".to_string(),
                unit_index: "02".to_string()
            }
        );
    }

    #[test]
    fn test_slash_and_dot_are_equivalent() {
        assert_eq!(QrCode::parse("123456/01/02").unwrap(), QrCode::parse("123456.01.02").unwrap());
        assert_eq!(QrCode::parse("123456.1.2").unwrap(), QrCode::parse("123456.01.02").unwrap());
        assert_eq!(
            QrCode::parse("123456.1.2").unwrap().individual_number().unwrap(),
            "123456/01/02"
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for code in [
            "", "abc", "12345678901", "1..2", "1.2.3.4", "1.0", "1.01.00", "1.01.1234", "1-01",
            "٢٥٠١٠١", "250101.٠١", "250101/01/٠٢",
        ] {
            assert!(matches!(QrCode::parse(code), Err(ApiError::FormatError(_))), "{}", code);
        }
    }

    #[test]
    fn test_normalize_individual_number() {
        assert_eq!(normalize_individual_number("250101.2.3").unwrap(), "250101/02/03");
        assert!(normalize_individual_number("250101.02").is_err());
    }

    #[test]
    fn test_label_codes() {
        let codes = label_codes("250101", &[2, 1]);
        assert_eq!(
            codes,
            vec!["250101", "250101.01", "250101.01.01", "250101.01.02", "250101.02", "250101.02.01"]
        );
        for code in &codes {
            assert!(QrCode::parse(code).is_ok());
        }
    }

    #[actix_rt::test]
    async fn test_resolve_each_level() {
        let pool = test_pool().await;
        create_cargo_request(&pool, &cargo(Some("123456"), &[("A", 2), ("B", 2)]), "op")
            .await
            .unwrap();

        match resolve_code(&pool, "123456").await.unwrap() {
            ResolvedRef::Request(request) => assert_eq!(request.cargo_number, "123456"),
            other => panic!("expected request, got {:?}", other.kind()),
        }
        match resolve_code(&pool, "123456.01").await.unwrap() {
            ResolvedRef::Item(item) => assert_eq!(item.item.name, "A"),
            other => panic!("expected item, got {:?}", other.kind()),
        }
        match resolve_code(&pool, "123456.01.02").await.unwrap() {
            ResolvedRef::Unit(unit) => assert_eq!(unit.individual_number, "123456/01/02"),
            other => panic!("expected unit, got {:?}", other.kind()),
        }
        match resolve_code(&pool, "123456/02/01").await.unwrap() {
            ResolvedRef::Unit(unit) => assert_eq!(unit.individual_number, "123456/02/01"),
            other => panic!("expected unit, got {:?}", other.kind()),
        }
    }

    #[actix_rt::test]
    async fn test_not_found_names_failing_segment() {
        let pool = test_pool().await;
        create_cargo_request(&pool, &cargo(Some("123456"), &[("A", 2)]), "op").await.unwrap();

        let entity = |err: ApiError| match err {
            ApiError::NotFound { entity, .. } => entity,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(entity(resolve_code(&pool, "999999.01.01").await.unwrap_err()), "request");
        assert_eq!(entity(resolve_code(&pool, "123456.05").await.unwrap_err()), "item");
        assert_eq!(entity(resolve_code(&pool, "123456.01.03").await.unwrap_err()), "unit");
    }

    #[actix_rt::test]
    async fn test_resolve_location_codes() {
        let pool = test_pool().await;
        let limits = WarehouseConfig::default();
        let registry = WarehouseRegistry::new(&pool, &limits);
        let warehouse = registry.create_warehouse(&warehouse_request("Москва", 2, 3, 10), "admin").await.unwrap();
        registry.resolve_cell(&warehouse.id, 1, 3, 3).await.unwrap();

        let serialized = serde_json::to_value(resolve_code(&pool, "001-01-03-03").await.unwrap()).unwrap();
        assert_eq!(serialized["kind"], "cell");
        assert_eq!(serialized["payload"]["location_code"], "Б1-П3-Я3");

        // Старая трёхразрядная ячейка
        match resolve_code(&pool, "001-01-03-003").await.unwrap() {
            ResolvedRef::Cell(cell) => assert_eq!(cell.cell.id_based_code, "001-01-03-03"),
            other => panic!("expected cell, got {:?}", other.kind()),
        }

        match resolve_code(&pool, "Б1-П3-Я3").await.unwrap() {
            ResolvedRef::Location(decoded) => {
                assert_eq!(decoded.warehouse, None);
                assert_eq!((decoded.block, decoded.shelf, decoded.cell), (1, 3, 3));
            }
            other => panic!("expected location, got {:?}", other.kind()),
        }

        assert!(matches!(resolve_code(&pool, "001-01-03").await, Err(ApiError::FormatError(_))));
        assert!(resolve_code(&pool, "001-02-01-01").await.unwrap_err().is_not_found());
        assert!(resolve_code(&pool, "002-01-01-01").await.unwrap_err().is_not_found());
    }
}
