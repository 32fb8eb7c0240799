// src/db.rs - Database migrations and setup

use sqlx::SqlitePool;
use anyhow::Result;

/// Текущая версия схемы документов cells / cargo_items / individual_units.
/// Любое изменение полей: явная миграция с повышением версии.
pub const SCHEMA_VERSION: i64 = 1;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys and WAL mode
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE CHECK(length(username) >= 3 AND length(username) <= 50),
            email TEXT NOT NULL UNIQUE CHECK(length(email) >= 5 AND length(email) <= 255),
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'viewer' CHECK(
                role IN ('admin', 'operator', 'viewer')
            ),
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            last_login DATETIME,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            failed_login_attempts INTEGER NOT NULL DEFAULT 0,
            locked_until DATETIME
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Атомарные счётчики для человекочитаемых номеров (склады, заявки)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS id_sequences (
            scope TEXT PRIMARY KEY,
            value INTEGER NOT NULL CHECK(value >= 0)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS warehouses (
            id TEXT PRIMARY KEY,
            id_number TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL UNIQUE CHECK(length(name) > 0 AND length(name) <= 255),
            block_count INTEGER NOT NULL CHECK(block_count >= 1),
            shelves_per_block INTEGER NOT NULL CHECK(shelves_per_block >= 1),
            cells_per_shelf INTEGER NOT NULL CHECK(cells_per_shelf >= 1),
            capacity INTEGER NOT NULL CHECK(capacity >= 1),
            created_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_warehouses (
            user_id TEXT NOT NULL,
            warehouse_id TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            PRIMARY KEY (user_id, warehouse_id),
            FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE,
            FOREIGN KEY (warehouse_id) REFERENCES warehouses (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS blocks (
            id TEXT PRIMARY KEY,
            warehouse_id TEXT NOT NULL,
            block_number INTEGER NOT NULL CHECK(block_number >= 1),
            created_at DATETIME NOT NULL,
            FOREIGN KEY (warehouse_id) REFERENCES warehouses (id) ON DELETE CASCADE,
            UNIQUE(warehouse_id, block_number)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shelves (
            id TEXT PRIMARY KEY,
            block_id TEXT NOT NULL,
            warehouse_id TEXT NOT NULL,
            shelf_number INTEGER NOT NULL CHECK(shelf_number >= 1),
            created_at DATETIME NOT NULL,
            FOREIGN KEY (block_id) REFERENCES blocks (id) ON DELETE CASCADE,
            UNIQUE(block_id, shelf_number)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cells (
            id TEXT PRIMARY KEY,
            shelf_id TEXT NOT NULL,
            warehouse_id TEXT NOT NULL,
            block_number INTEGER NOT NULL,
            shelf_number INTEGER NOT NULL,
            cell_number INTEGER NOT NULL CHECK(cell_number >= 1),
            location_code TEXT NOT NULL,
            id_based_code TEXT NOT NULL UNIQUE,
            is_occupied INTEGER NOT NULL DEFAULT 0 CHECK(is_occupied IN (0, 1)),
            schema_version INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (shelf_id) REFERENCES shelves (id) ON DELETE CASCADE,
            FOREIGN KEY (warehouse_id) REFERENCES warehouses (id) ON DELETE CASCADE,
            UNIQUE(warehouse_id, block_number, shelf_number, cell_number)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cargo_requests (
            id TEXT PRIMARY KEY,
            cargo_number TEXT NOT NULL UNIQUE CHECK(length(cargo_number) BETWEEN 1 AND 10),
            client_name TEXT CHECK(client_name IS NULL OR length(client_name) <= 255),
            origin TEXT CHECK(origin IS NULL OR length(origin) <= 255),
            destination TEXT CHECK(destination IS NULL OR length(destination) <= 255),
            target_warehouse_id TEXT,
            status TEXT NOT NULL DEFAULT 'created',
            created_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (target_warehouse_id) REFERENCES warehouses (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Номер груза после присвоения не меняется
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS trg_cargo_number_immutable
        BEFORE UPDATE OF cargo_number ON cargo_requests
        WHEN NEW.cargo_number <> OLD.cargo_number
        BEGIN
            SELECT RAISE(ABORT, 'cargo_number is immutable');
        END
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cargo_items (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            type_number TEXT NOT NULL,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            quantity INTEGER NOT NULL CHECK(quantity >= 1),
            weight REAL NOT NULL DEFAULT 0 CHECK(weight >= 0),
            price REAL NOT NULL DEFAULT 0 CHECK(price >= 0),
            schema_version INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (request_id) REFERENCES cargo_requests (id) ON DELETE CASCADE,
            UNIQUE(request_id, type_number)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS individual_units (
            id TEXT PRIMARY KEY,
            individual_number TEXT NOT NULL UNIQUE,
            request_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            cargo_number TEXT NOT NULL,
            type_number TEXT NOT NULL,
            unit_index TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'awaiting_placement' CHECK(
                status IN ('awaiting_placement', 'placed', 'removed_from_placement')
            ),
            is_placed INTEGER NOT NULL DEFAULT 0 CHECK(is_placed IN (0, 1)),
            cell_id TEXT,
            warehouse_id TEXT,
            placed_by TEXT,
            placed_at DATETIME,
            version INTEGER NOT NULL DEFAULT 0,
            schema_version INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (request_id) REFERENCES cargo_requests (id) ON DELETE CASCADE,
            FOREIGN KEY (item_id) REFERENCES cargo_items (id) ON DELETE CASCADE,
            FOREIGN KEY (cell_id) REFERENCES cells (id),
            CHECK((is_placed = 1) = (cell_id IS NOT NULL))
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cargo_status_history (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            from_status TEXT NOT NULL,
            to_status TEXT NOT NULL,
            changed_by TEXT,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (request_id) REFERENCES cargo_requests (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT,
            description TEXT,
            changes TEXT,
            ip_address TEXT,
            user_agent TEXT,
            created_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // ==================== CREATE INDEXES ====================

    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_cells_shelf ON cells(shelf_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_cells_occupied ON cells(warehouse_id, is_occupied)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_request ON cargo_items(request_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_units_request ON individual_units(request_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_units_item ON individual_units(item_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_units_cell ON individual_units(cell_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_requests_status ON cargo_requests(status)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_status_history_request ON cargo_status_history(request_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_logs(entity_type, entity_id)")
        .execute(pool).await;

    log::info!("Database migrations completed");
    Ok(())
}

/// Атомарно увеличивает счётчик `scope` и возвращает новое значение.
/// Upsert выполняется одной командой, поэтому параллельные вызовы
/// никогда не получают одинаковый номер.
pub async fn next_sequence_value<'e, E>(executor: E, scope: &str) -> Result<i64, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query_scalar(
        r#"INSERT INTO id_sequences (scope, value) VALUES (?, 1)
           ON CONFLICT(scope) DO UPDATE SET value = value + 1
           RETURNING value"#
    )
    .bind(scope)
    .fetch_one(executor)
    .await
}

pub async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let count: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?"
    )
    .bind(table)
    .fetch_one(pool)
    .await?;
    Ok(count.0 > 0)
}

/// In-memory пул с одним соединением: база живёт, пока живо соединение
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    run_migrations(&pool).await.expect("migrations");
    pool
}

/// Файловая база в WAL с несколькими соединениями: транзакции действительно
/// идут параллельно. Каталог удаляется вместе с `TempDir`.
#[cfg(test)]
pub async fn test_file_pool(max_connections: u32) -> (tempfile::TempDir, SqlitePool) {
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use std::time::Duration;

    let dir = tempfile::tempdir().expect("temp dir");
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("freight.db"))
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .expect("file sqlite");
    run_migrations(&pool).await.expect("migrations");
    (dir, pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_parallel_sequence_values_are_distinct() {
        let (_dir, pool) = test_file_pool(4).await;

        let (a, b, c, d) = tokio::join!(
            next_sequence_value(&pool, "cargo:2501"),
            next_sequence_value(&pool, "cargo:2501"),
            next_sequence_value(&pool, "cargo:2501"),
            next_sequence_value(&pool, "cargo:2501"),
        );
        let mut values = vec![a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap()];
        values.sort_unstable();
        assert_eq!(values, vec![1, 2, 3, 4]);
    }

    #[actix_rt::test]
    async fn test_migrations_are_idempotent() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();

        for table in ["warehouses", "cells", "cargo_requests", "individual_units", "id_sequences"] {
            assert!(table_exists(&pool, table).await.unwrap(), "missing table {}", table);
        }
    }

    #[actix_rt::test]
    async fn test_sequence_increments_per_scope() {
        let pool = test_pool().await;

        assert_eq!(next_sequence_value(&pool, "warehouse").await.unwrap(), 1);
        assert_eq!(next_sequence_value(&pool, "warehouse").await.unwrap(), 2);
        assert_eq!(next_sequence_value(&pool, "cargo:2501").await.unwrap(), 1);
        assert_eq!(next_sequence_value(&pool, "warehouse").await.unwrap(), 3);
    }

    #[actix_rt::test]
    async fn test_cargo_number_is_immutable() {
        let pool = test_pool().await;
        sqlx::query(
            "INSERT INTO cargo_requests (id, cargo_number, status, created_at, updated_at)
             VALUES ('r1', '250101', 'created', datetime('now'), datetime('now'))"
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = sqlx::query("UPDATE cargo_requests SET cargo_number = '999999' WHERE id = 'r1'")
            .execute(&pool)
            .await;
        assert!(result.is_err());
    }
}
