// src/handlers.rs
use actix_web::HttpRequest;
use serde::Serialize;

use crate::auth::{require_permission, Claims, UserRole};
use crate::error::ApiResult;
use crate::placement::Operator;

// ==================== COMMON STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
        }
    }
}

/// Пользователь с правом размещать груз и его допуск по складам
pub fn current_operator(req: &HttpRequest) -> ApiResult<(Claims, Operator)> {
    let claims = require_permission(req, UserRole::can_place_units)?;
    let operator = Operator::from(&claims);
    Ok((claims, operator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use actix_web::HttpMessage;
    use crate::error::ApiError;

    fn claims(role: UserRole) -> Claims {
        Claims {
            sub: "u1".to_string(),
            username: "kladovshik".to_string(),
            role,
            warehouse_ids: vec!["w1".to_string()],
            exp: 0,
            iat: 0,
        }
    }

    #[test]
    fn test_api_response_shape() {
        let json = serde_json::to_value(ApiResponse::success_with_message(1, "ok".to_string())).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 1);
        assert_eq!(json["message"], "ok");
    }

    #[test]
    fn test_current_operator_requires_placement_right() {
        let req = TestRequest::default().to_http_request();
        assert!(matches!(current_operator(&req), Err(ApiError::Unauthorized(_))));

        let req = TestRequest::default().to_http_request();
        req.extensions_mut().insert(claims(UserRole::Viewer));
        assert!(matches!(current_operator(&req), Err(ApiError::Forbidden(_))));

        let req = TestRequest::default().to_http_request();
        req.extensions_mut().insert(claims(UserRole::Operator));
        let (_, operator) = current_operator(&req).unwrap();
        assert_eq!(operator.warehouse_ids, vec!["w1".to_string()]);
        assert!(!operator.unrestricted);
    }
}
