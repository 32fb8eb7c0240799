// src/cargo_units.rs
//! Разложение заявки на отдельные единицы.
//!
//! Заявка, её типы груза и все единицы создаются одной транзакцией:
//! для каждого типа с количеством N появляется ровно N единиц.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;
use log::info;

use crate::db::{next_sequence_value, SCHEMA_VERSION};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    format_type_number, format_unit_index, individual_number, CargoItem, CargoItemWithUnits,
    CargoRequest, CargoRequestDetails, CargoStatus, CreateCargoRequest, IndividualUnit, UNIT_SELECT,
};
use crate::topology::find_warehouse;

pub const MAX_CARGO_NUMBER_LEN: usize = 10;

/// Префикс автоматического номера груза: год и месяц, "2501"
pub fn cargo_number_prefix(now: DateTime<Utc>) -> String {
    now.format("%y%m").to_string()
}

pub fn validate_cargo_number(cargo_number: &str) -> ApiResult<()> {
    if cargo_number.is_empty()
        || cargo_number.len() > MAX_CARGO_NUMBER_LEN
        || !cargo_number.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ApiError::ValidationError(format!(
            "Cargo number '{}' must be 1-{} digits", cargo_number, MAX_CARGO_NUMBER_LEN
        )));
    }
    Ok(())
}

async fn allocate_cargo_number(conn: &mut SqliteConnection, now: DateTime<Utc>) -> ApiResult<String> {
    let prefix = cargo_number_prefix(now);
    let sequence = next_sequence_value(&mut *conn, &format!("cargo:{}", prefix)).await?;
    let number = format!("{}{:02}", prefix, sequence);
    validate_cargo_number(&number)?;
    Ok(number)
}

#[tracing::instrument(skip(pool, request), fields(items = request.items.len()))]
pub async fn create_cargo_request(
    pool: &SqlitePool,
    request: &CreateCargoRequest,
    created_by: &str,
) -> ApiResult<CargoRequestDetails> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    let cargo_number = match request.cargo_number.as_deref().map(str::trim) {
        Some(number) => {
            validate_cargo_number(number)?;
            number.to_string()
        }
        None => allocate_cargo_number(&mut tx, now).await?,
    };

    let target_warehouse_id = match request.target_warehouse_id.as_deref() {
        Some(id) => Some(find_warehouse(&mut tx, id).await?.id),
        None => None,
    };

    let request_id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO cargo_requests
           (id, cargo_number, client_name, origin, destination, target_warehouse_id,
            status, created_by, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&request_id)
    .bind(&cargo_number)
    .bind(&request.client_name)
    .bind(&request.origin)
    .bind(&request.destination)
    .bind(&target_warehouse_id)
    .bind(CargoStatus::Created.as_ref())
    .bind(created_by)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            ApiError::Conflict(format!("Cargo number '{}' is already taken", cargo_number))
        }
        _ => ApiError::DatabaseError(e),
    })?;

    let mut expected_units = 0i64;
    for (type_idx, item) in request.items.iter().enumerate() {
        let type_number = format_type_number(type_idx + 1);
        let item_id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"INSERT INTO cargo_items
               (id, request_id, type_number, name, quantity, weight, price, schema_version, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&item_id)
        .bind(&request_id)
        .bind(&type_number)
        .bind(item.name.trim())
        .bind(item.quantity)
        .bind(item.weight.unwrap_or(0.0))
        .bind(item.price.unwrap_or(0.0))
        .bind(SCHEMA_VERSION)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for unit_idx in 1..=item.quantity as usize {
            sqlx::query(
                r#"INSERT INTO individual_units
                   (id, individual_number, request_id, item_id, cargo_number, type_number,
                    unit_index, status, is_placed, version, schema_version, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, 'awaiting_placement', 0, 0, ?, ?, ?)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(individual_number(&cargo_number, type_idx + 1, unit_idx))
            .bind(&request_id)
            .bind(&item_id)
            .bind(&cargo_number)
            .bind(&type_number)
            .bind(format_unit_index(unit_idx))
            .bind(SCHEMA_VERSION)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        expected_units += item.quantity;
    }

    let created_units: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM individual_units WHERE request_id = ?")
        .bind(&request_id)
        .fetch_one(&mut *tx)
        .await?;
    if created_units != expected_units {
        return Err(ApiError::InternalServerError(format!(
            "Request {} produced {} units, expected {}", cargo_number, created_units, expected_units
        )));
    }

    let details = load_details(&mut tx, &cargo_number).await?;
    tx.commit().await?;

    info!(
        "📦 Cargo request {} created: {} types, {} units",
        cargo_number, details.items.len(), details.total_units
    );
    Ok(details)
}

// ==================== LOOKUPS ====================

pub async fn find_request(conn: &mut SqliteConnection, cargo_number: &str) -> ApiResult<CargoRequest> {
    sqlx::query_as::<_, CargoRequest>("SELECT * FROM cargo_requests WHERE cargo_number = ?")
        .bind(cargo_number)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::request_not_found(cargo_number))
}

pub async fn find_item(
    conn: &mut SqliteConnection,
    request: &CargoRequest,
    type_number: &str,
) -> ApiResult<CargoItem> {
    sqlx::query_as::<_, CargoItem>("SELECT * FROM cargo_items WHERE request_id = ? AND type_number = ?")
        .bind(&request.id)
        .bind(type_number)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::item_not_found(&request.cargo_number, type_number))
}

pub async fn find_unit(conn: &mut SqliteConnection, individual_number: &str) -> ApiResult<IndividualUnit> {
    sqlx::query_as::<_, IndividualUnit>(&format!("{} WHERE u.individual_number = ?", UNIT_SELECT))
        .bind(individual_number)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::unit_not_found(individual_number))
}

pub async fn find_unit_of_item(
    conn: &mut SqliteConnection,
    item: &CargoItem,
    cargo_number: &str,
    unit_index: &str,
) -> ApiResult<IndividualUnit> {
    sqlx::query_as::<_, IndividualUnit>(&format!(
        "{} WHERE u.item_id = ? AND u.unit_index = ?", UNIT_SELECT
    ))
    .bind(&item.id)
    .bind(unit_index)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ApiError::NotFound {
        entity: "unit".to_string(),
        message: format!(
            "Unit {} of item {} not found in request '{}'",
            unit_index, item.type_number, cargo_number
        ),
    })
}

pub async fn load_details(conn: &mut SqliteConnection, cargo_number: &str) -> ApiResult<CargoRequestDetails> {
    let request = find_request(conn, cargo_number).await?;

    let items: Vec<CargoItem> =
        sqlx::query_as("SELECT * FROM cargo_items WHERE request_id = ? ORDER BY type_number")
            .bind(&request.id)
            .fetch_all(&mut *conn)
            .await?;

    let units: Vec<IndividualUnit> = sqlx::query_as(&format!(
        "{} WHERE u.request_id = ? ORDER BY u.individual_number", UNIT_SELECT
    ))
    .bind(&request.id)
    .fetch_all(&mut *conn)
    .await?;

    let total_units = units.len() as i64;
    let mut grouped: Vec<CargoItemWithUnits> = items
        .into_iter()
        .map(|item| CargoItemWithUnits { item, units: Vec::new() })
        .collect();
    for unit in units {
        if let Some(group) = grouped.iter_mut().find(|g| g.item.id == unit.item_id) {
            group.units.push(unit);
        }
    }

    Ok(CargoRequestDetails { request, items: grouped, total_units })
}

pub async fn get_request_details(pool: &SqlitePool, cargo_number: &str) -> ApiResult<CargoRequestDetails> {
    let mut conn = pool.acquire().await?;
    load_details(&mut conn, cargo_number).await
}
