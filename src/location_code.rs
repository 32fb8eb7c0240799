// src/location_code.rs
//! Адрес ячейки склада в двух текстовых формах:
//!   человекочитаемая `Б1-П3-Я3` (без номера склада, без ведущих нулей)
//!   каноническая     `001-01-03-03` (склад-блок-полка-ячейка)
//!
//! Внутри системы адрес живёт только как `CellCoords`; строки появляются
//! на границе (ответы API, печать этикеток, сканирование).

use serde::{Deserialize, Serialize};
use regex::Regex;
use lazy_static::lazy_static;
use crate::error::{ApiError, ApiResult};

lazy_static! {
    static ref HUMAN_CODE: Regex = Regex::new(r"^(?i)Б([0-9]+)-П([0-9]+)-Я([0-9]+)$").unwrap();
}

pub const MAX_WAREHOUSE_NUMBER: i64 = 999;
pub const MAX_GRID_NUMBER: i64 = 99;

/// Ширина сегментов канонического кода: склад, блок, полка, ячейка
const CANONICAL_WIDTHS: [usize; 4] = [3, 2, 2, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellCoords {
    pub warehouse: i64,
    pub block: i64,
    pub shelf: i64,
    pub cell: i64,
}

impl CellCoords {
    pub fn new(warehouse: i64, block: i64, shelf: i64, cell: i64) -> ApiResult<Self> {
        if !(1..=MAX_WAREHOUSE_NUMBER).contains(&warehouse) {
            return Err(ApiError::FormatError(format!(
                "Warehouse number {} is outside 1..={}", warehouse, MAX_WAREHOUSE_NUMBER
            )));
        }
        for (name, value) in [("block", block), ("shelf", shelf), ("cell", cell)] {
            if !(1..=MAX_GRID_NUMBER).contains(&value) {
                return Err(ApiError::FormatError(format!(
                    "{} number {} is outside 1..={}", name, value, MAX_GRID_NUMBER
                )));
            }
        }
        Ok(Self { warehouse, block, shelf, cell })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedLocation {
    pub location_code: String,
    pub id_based_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeFormat {
    Human,
    Canonical,
}

/// Результат разбора адреса. У человекочитаемой формы склада нет.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DecodedLocation {
    pub format: CodeFormat,
    pub warehouse: Option<i64>,
    pub block: i64,
    pub shelf: i64,
    pub cell: i64,
}

impl DecodedLocation {
    pub fn into_coords(self) -> Option<CellCoords> {
        self.warehouse.map(|warehouse| CellCoords {
            warehouse,
            block: self.block,
            shelf: self.shelf,
            cell: self.cell,
        })
    }
}

pub fn warehouse_id_number(n: i64) -> String {
    format!("{:03}", n)
}

pub fn human_code(block: i64, shelf: i64, cell: i64) -> String {
    format!("Б{}-П{}-Я{}", block, shelf, cell)
}

pub fn canonical_code(coords: &CellCoords) -> String {
    format!(
        "{:03}-{:02}-{:02}-{:02}",
        coords.warehouse, coords.block, coords.shelf, coords.cell
    )
}

pub fn encode(coords: &CellCoords) -> EncodedLocation {
    EncodedLocation {
        location_code: human_code(coords.block, coords.shelf, coords.cell),
        id_based_code: canonical_code(coords),
    }
}

/// Похоже ли значение на адрес ячейки (а не на QR-код груза)
pub fn looks_like_location(code: &str) -> bool {
    let code = code.trim();
    code.contains('-')
        && (code.chars().all(|c| c.is_ascii_digit() || c == '-') || HUMAN_CODE.is_match(code)
            || code.chars().next().map(|c| matches!(c, 'Б' | 'б')).unwrap_or(false))
}

pub fn decode(code: &str) -> ApiResult<DecodedLocation> {
    let code = code.trim();
    if code.is_empty() {
        return Err(ApiError::FormatError("Location code is empty".to_string()));
    }

    let segments: Vec<&str> = code.split('-').collect();
    match segments.len() {
        3 => decode_human(code),
        4 => decode_canonical(&segments),
        n => Err(ApiError::FormatError(format!(
            "Location code '{}' has {} segments, expected 3 (Б-П-Я) or 4 (000-00-00-00)",
            code, n
        ))),
    }
}

fn decode_human(code: &str) -> ApiResult<DecodedLocation> {
    let caps = HUMAN_CODE.captures(code).ok_or_else(|| {
        ApiError::FormatError(format!(
            "Location code '{}' does not match Б<block>-П<shelf>-Я<cell>", code
        ))
    })?;

    let mut numbers = [0i64; 3];
    for (i, slot) in numbers.iter_mut().enumerate() {
        *slot = parse_positive(&caps[i + 1], code)?;
        if *slot > MAX_GRID_NUMBER {
            return Err(ApiError::FormatError(format!(
                "Segment {} of '{}' exceeds {}", i + 1, code, MAX_GRID_NUMBER
            )));
        }
    }

    Ok(DecodedLocation {
        format: CodeFormat::Human,
        warehouse: None,
        block: numbers[0],
        shelf: numbers[1],
        cell: numbers[2],
    })
}

fn decode_canonical(segments: &[&str]) -> ApiResult<DecodedLocation> {
    let code = segments.join("-");
    let mut numbers = [0i64; 4];

    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() || !segment.chars().all(|c| c.is_ascii_digit()) {
            return Err(ApiError::FormatError(format!(
                "Segment '{}' of '{}' is not numeric", segment, code
            )));
        }
        // Ячейка исторически печаталась и в три разряда ("001-01-03-003")
        let width_ok = segment.len() == CANONICAL_WIDTHS[i] || (i == 3 && segment.len() == 3);
        if !width_ok {
            return Err(ApiError::FormatError(format!(
                "Segment '{}' of '{}' must be {} digits wide", segment, code, CANONICAL_WIDTHS[i]
            )));
        }
        numbers[i] = parse_positive(segment, &code)?;
    }

    if numbers[3] > MAX_GRID_NUMBER {
        return Err(ApiError::FormatError(format!(
            "Cell number in '{}' exceeds {}", code, MAX_GRID_NUMBER
        )));
    }

    Ok(DecodedLocation {
        format: CodeFormat::Canonical,
        warehouse: Some(numbers[0]),
        block: numbers[1],
        shelf: numbers[2],
        cell: numbers[3],
    })
}

fn parse_positive(segment: &str, code: &str) -> ApiResult<i64> {
    let value: i64 = segment.parse().map_err(|_| {
        ApiError::FormatError(format!("Segment '{}' of '{}' is not numeric", segment, code))
    })?;
    if value < 1 {
        return Err(ApiError::FormatError(format!(
            "Segment '{}' of '{}' must be at least 1", segment, code
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_both_forms() {
        let coords = CellCoords::new(1, 1, 3, 3).unwrap();
        let encoded = encode(&coords);
        assert_eq!(encoded.location_code, "Б1-П3-Я3");
        assert_eq!(encoded.id_based_code, "001-01-03-03");
    }

    #[test]
    fn test_round_trip_over_grid() {
        for warehouse in [1, 42, 999] {
            for block in 1..=9 {
                for shelf in 1..=3 {
                    for cell in [1, 9, 10, 50, 99] {
                        let coords = CellCoords::new(warehouse, block, shelf, cell).unwrap();
                        let encoded = encode(&coords);

                        let canonical = decode(&encoded.id_based_code).unwrap();
                        assert_eq!(canonical.into_coords(), Some(coords));

                        let human = decode(&encoded.location_code).unwrap();
                        assert_eq!(human.warehouse, None);
                        assert_eq!((human.block, human.shelf, human.cell), (block, shelf, cell));
                    }
                }
            }
        }
    }

    #[test]
    fn test_decode_accepts_three_digit_cell() {
        let decoded = decode("001-01-03-003").unwrap();
        assert_eq!(decoded.format, CodeFormat::Canonical);
        assert_eq!(decoded.into_coords(), Some(CellCoords { warehouse: 1, block: 1, shelf: 3, cell: 3 }));
    }

    #[test]
    fn test_decode_lowercase_human() {
        let decoded = decode("б2-п1-я17").unwrap();
        assert_eq!((decoded.block, decoded.shelf, decoded.cell), (2, 1, 17));
    }

    #[test]
    fn test_decode_rejects_wrong_segment_count() {
        assert!(matches!(decode("001-01-03"), Err(ApiError::FormatError(_))));
        assert!(matches!(decode("001-01-03-03-01"), Err(ApiError::FormatError(_))));
        assert!(matches!(decode("Б1-П3"), Err(ApiError::FormatError(_))));
        assert!(matches!(decode(""), Err(ApiError::FormatError(_))));
    }

    #[test]
    fn test_decode_rejects_non_numeric() {
        assert!(matches!(decode("001-0A-03-03"), Err(ApiError::FormatError(_))));
        assert!(matches!(decode("Б1-Пx-Я3"), Err(ApiError::FormatError(_))));
        assert!(matches!(decode("X1-П3-Я3"), Err(ApiError::FormatError(_))));
        // Цифры других письменностей не считаются цифрами адреса
        assert!(matches!(decode("Б١-П٣-Я٣"), Err(ApiError::FormatError(_))));
        assert!(matches!(decode("٠٠١-٠١-٠٣-٠٣"), Err(ApiError::FormatError(_))));
    }

    #[test]
    fn test_decode_rejects_inconsistent_widths() {
        assert!(matches!(decode("1-01-03-03"), Err(ApiError::FormatError(_))));
        assert!(matches!(decode("001-1-03-03"), Err(ApiError::FormatError(_))));
        assert!(matches!(decode("001-01-003-03"), Err(ApiError::FormatError(_))));
        assert!(matches!(decode("001-01-03-0003"), Err(ApiError::FormatError(_))));
    }

    #[test]
    fn test_decode_rejects_zero() {
        assert!(matches!(decode("000-01-03-03"), Err(ApiError::FormatError(_))));
        assert!(matches!(decode("Б0-П1-Я1"), Err(ApiError::FormatError(_))));
    }

    #[test]
    fn test_coords_bounds() {
        assert!(CellCoords::new(0, 1, 1, 1).is_err());
        assert!(CellCoords::new(1000, 1, 1, 1).is_err());
        assert!(CellCoords::new(1, 100, 1, 1).is_err());
        assert!(CellCoords::new(1, 1, 1, 99).is_ok());
    }

    #[test]
    fn test_looks_like_location() {
        assert!(looks_like_location("001-01-03-03"));
        assert!(looks_like_location("Б1-П3-Я3"));
        assert!(!looks_like_location("250101"));
        assert!(!looks_like_location("250101/01/02"));
    }
}
