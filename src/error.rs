// src/error.rs
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    /// Код (QR / адрес ячейки) не разобран
    FormatError(String),
    /// Сущность не найдена; `entity`: какой сегмент не разрешился
    NotFound { entity: String, message: String },
    AmbiguousWarehouse(String),
    /// Проигранная гонка или занятая ячейка
    Conflict(String),
    /// Размеры склада вне допустимых пределов
    ConfigError(String),
    InvalidTransition { from: String, to: String },
    WarehouseMismatch(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    ValidationError(String),
    AuthError(String),
    DatabaseError(sqlx::Error),
    InternalServerError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorBody,
}

impl ApiError {
    /// Машиночитаемый вид ошибки для клиента
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::FormatError(_) => "format_error",
            ApiError::NotFound { .. } => "not_found",
            ApiError::AmbiguousWarehouse(_) => "ambiguous_warehouse",
            ApiError::Conflict(_) => "conflict",
            ApiError::ConfigError(_) => "config_error",
            ApiError::InvalidTransition { .. } => "invalid_transition",
            ApiError::WarehouseMismatch(_) => "warehouse_mismatch",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::ValidationError(_) => "validation_error",
            ApiError::AuthError(_) => "auth_error",
            ApiError::DatabaseError(_) => "database_error",
            ApiError::InternalServerError(_) => "internal_error",
        }
    }

    pub fn not_found(entity: &str) -> Self {
        ApiError::NotFound {
            entity: entity.to_string(),
            message: format!("{} not found", entity),
        }
    }

    pub fn bad_request(msg: &str) -> Self {
        ApiError::BadRequest(msg.to_string())
    }

    pub fn request_not_found(cargo_number: &str) -> Self {
        ApiError::NotFound {
            entity: "request".to_string(),
            message: format!("Cargo request '{}' not found", cargo_number),
        }
    }

    pub fn item_not_found(cargo_number: &str, type_number: &str) -> Self {
        ApiError::NotFound {
            entity: "item".to_string(),
            message: format!("Cargo item {} not found in request '{}'", type_number, cargo_number),
        }
    }

    pub fn unit_not_found(individual_number: &str) -> Self {
        ApiError::NotFound {
            entity: "unit".to_string(),
            message: format!("Unit '{}' not found", individual_number),
        }
    }

    pub fn warehouse_not_found(id: &str) -> Self {
        ApiError::NotFound {
            entity: "warehouse".to_string(),
            message: format!("Warehouse '{}' not found", id),
        }
    }

    pub fn cell_not_found(block: i64, shelf: i64, cell: i64) -> Self {
        ApiError::NotFound {
            entity: "cell".to_string(),
            message: format!("Cell Б{}-П{}-Я{} is outside the warehouse grid", block, shelf, cell),
        }
    }

    pub fn placement_conflict(individual_number: &str) -> Self {
        ApiError::Conflict(format!(
            "Unit '{}' was modified by another operator, re-scan and retry",
            individual_number
        ))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::FormatError(msg) => write!(f, "Format Error: {}", msg),
            ApiError::NotFound { message, .. } => write!(f, "Not Found: {}", message),
            ApiError::AmbiguousWarehouse(msg) => write!(f, "Ambiguous Warehouse: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::ConfigError(msg) => write!(f, "Config Error: {}", msg),
            ApiError::InvalidTransition { from, to } => {
                write!(f, "Invalid Transition: {} -> {} is not allowed", from, to)
            }
            ApiError::WarehouseMismatch(msg) => write!(f, "Warehouse Mismatch: {}", msg),
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::AuthError(msg) => write!(f, "Auth Error: {}", msg),
            ApiError::DatabaseError(err) => write!(f, "Database Error: {}", err),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let body = ErrorResponse {
            success: false,
            error: ErrorBody {
                kind: self.kind(),
                message: self.to_string(),
            },
        };

        match self {
            ApiError::FormatError(_) | ApiError::BadRequest(_) | ApiError::AmbiguousWarehouse(_) => {
                HttpResponse::BadRequest().json(body)
            }
            ApiError::NotFound { .. } => HttpResponse::NotFound().json(body),
            ApiError::Conflict(_) | ApiError::InvalidTransition { .. } => HttpResponse::Conflict().json(body),
            ApiError::ConfigError(_) | ApiError::WarehouseMismatch(_) | ApiError::ValidationError(_) => {
                HttpResponse::UnprocessableEntity().json(body)
            }
            ApiError::Unauthorized(_) | ApiError::AuthError(_) => HttpResponse::Unauthorized().json(body),
            ApiError::Forbidden(_) => HttpResponse::Forbidden().json(body),
            ApiError::DatabaseError(_) | ApiError::InternalServerError(_) => {
                HttpResponse::InternalServerError().json(body)
            }
        }
    }
}

/// SQLITE_BUSY и его расширенные коды (RECOVERY, SNAPSHOT, TIMEOUT):
/// параллельная транзакция успела записать раньше
const SQLITE_BUSY_CODES: [&str; 4] = ["5", "261", "517", "773"];

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().is_some_and(|c| SQLITE_BUSY_CODES.iter().any(|busy| c == *busy)) {
                return ApiError::Conflict(
                    "Concurrent update in progress, re-scan and retry".to_string(),
                );
            }
        }
        ApiError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}
