use bcrypt::{hash, verify};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;
use actix_web::web;
use actix_web::HttpMessage;
use validator::Validate;
use actix_web::{HttpRequest, dev::ServiceRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use crate::error::{ApiError, ApiResult};
use crate::placement::Operator;

// ======== USER MODEL ========

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

// ======== USER ROLE ========

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Operator,
    Viewer,
}

impl UserRole {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "operator" => Some(UserRole::Operator),
            "viewer" => Some(UserRole::Viewer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Operator => "operator",
            UserRole::Viewer => "viewer",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            UserRole::Admin => "Администратор",
            UserRole::Operator => "Кладовщик",
            UserRole::Viewer => "Наблюдатель",
        }
    }

    // ======== USER MANAGEMENT ========
    pub fn can_manage_users(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    // ======== WAREHOUSE PERMISSIONS ========
    pub fn can_manage_warehouses(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    pub fn can_view_warehouses(&self) -> bool {
        true // All roles can view
    }

    // ======== CARGO PERMISSIONS ========
    pub fn can_create_cargo(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Operator)
    }

    pub fn can_change_status(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Operator)
    }

    pub fn can_view_cargo(&self) -> bool {
        true
    }

    // ======== PLACEMENT PERMISSIONS ========
    pub fn can_place_units(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Operator)
    }

    /// Ограничение по назначенным складам не действует
    pub fn sees_all_warehouses(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ======== REQUEST/RESPONSE STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignWarehousesRequest {
    #[validate(length(max = 100, message = "Too many warehouses"))]
    pub warehouse_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
    pub user: UserInfo,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub warehouse_ids: Vec<String>,
}

impl UserInfo {
    pub fn new(user: User, warehouse_ids: Vec<String>) -> Self {
        Self {
            role: user.get_role(),
            id: user.id,
            username: user.username,
            email: user.email,
            is_active: user.is_active,
            last_login: user.last_login,
            warehouse_ids,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub username: String,
    pub role: UserRole,
    /// Склады, к которым допущен пользователь
    #[serde(default)]
    pub warehouse_ids: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

impl From<&Claims> for Operator {
    fn from(claims: &Claims) -> Self {
        Operator {
            user_id: claims.sub.clone(),
            warehouse_ids: claims.warehouse_ids.clone(),
            unrestricted: claims.role.sees_all_warehouses(),
        }
    }
}

// ======== AUTH SERVICE ========

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_expiration_hours: i64,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(jwt_secret: &str, token_expiration_hours: i64, bcrypt_cost: u32) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            token_expiration_hours,
            bcrypt_cost,
        }
    }

    pub fn token_lifetime_seconds(&self) -> i64 {
        self.token_expiration_hours * 3600
    }

    pub fn hash_password(&self, password: &str) -> ApiResult<String> {
        validate_password_strength(password)?;
        hash(password, self.bcrypt_cost)
            .map_err(|_| ApiError::InternalServerError("Failed to hash password".to_string()))
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
        verify(password, hash)
    }

    pub fn generate_token(&self, user: &User, warehouse_ids: Vec<String>) -> ApiResult<String> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.token_expiration_hours);

        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            role: user.get_role(),
            warehouse_ids,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| ApiError::AuthError("Failed to generate token".to_string()))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        let validation = Validation::default();
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature =>
                        ApiError::AuthError("Token expired".to_string()),
                    jsonwebtoken::errors::ErrorKind::InvalidToken =>
                        ApiError::AuthError("Invalid token".to_string()),
                    _ =>
                        ApiError::AuthError("Token verification failed".to_string()),
                }
            })
    }
}

// ======== PASSWORD VALIDATION ========

fn validate_password_strength(password: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::ValidationError("Password must be at least 8 characters".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ApiError::ValidationError("Password must contain at least one uppercase letter".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(ApiError::ValidationError("Password must contain at least one lowercase letter".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(ApiError::ValidationError("Password must contain at least one digit".to_string()));
    }
    Ok(())
}

// ======== USER METHODS ========

impl User {
    pub async fn find_by_username(pool: &SqlitePool, username: &str) -> ApiResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::not_found("user"))
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> ApiResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::not_found("user"))
    }

    pub async fn create(
        pool: &SqlitePool,
        username: &str,
        email: &str,
        password: &str,
        role: UserRole,
        auth_service: &AuthService,
    ) -> ApiResult<User> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: auth_service.hash_password(password)?,
            role: role.as_str().to_string(),
            is_active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
            failed_login_attempts: 0,
            locked_until: None,
        };

        sqlx::query(
            r#"INSERT INTO users (
                id, username, email, password_hash, role, is_active,
                created_at, updated_at, failed_login_attempts, locked_until
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
        )
            .bind(&user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.role)
            .bind(user.is_active as i32)
            .bind(&user.created_at)
            .bind(&user.updated_at)
            .bind(user.failed_login_attempts)
            .bind(&user.locked_until)
            .execute(pool)
            .await?;

        Ok(user)
    }

    pub async fn update_last_login(&self, pool: &SqlitePool) -> ApiResult<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Склады, назначенные пользователю
    pub async fn warehouse_ids(&self, pool: &SqlitePool) -> ApiResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT warehouse_id FROM user_warehouses WHERE user_id = ? ORDER BY warehouse_id"
        )
            .bind(&self.id)
            .fetch_all(pool)
            .await?;
        Ok(ids)
    }

    /// Полностью заменяет набор назначенных складов
    pub async fn assign_warehouses(&self, pool: &SqlitePool, warehouse_ids: &[String]) -> ApiResult<Vec<String>> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM user_warehouses WHERE user_id = ?")
            .bind(&self.id)
            .execute(&mut *tx)
            .await?;

        let now = Utc::now();
        for id in warehouse_ids {
            let warehouse = crate::topology::find_warehouse(&mut tx, id).await?;
            sqlx::query(
                "INSERT OR IGNORE INTO user_warehouses (user_id, warehouse_id, created_at) VALUES (?, ?, ?)"
            )
                .bind(&self.id)
                .bind(&warehouse.id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        self.warehouse_ids(pool).await
    }

    // Methods for lock management
    pub fn is_locked(&self) -> bool {
        if let Some(locked_until) = self.locked_until {
            Utc::now() < locked_until
        } else {
            false
        }
    }

    pub async fn increment_failed_attempts(&mut self, pool: &SqlitePool) -> ApiResult<()> {
        self.failed_login_attempts += 1;
        sqlx::query("UPDATE users SET failed_login_attempts = ? WHERE id = ?")
            .bind(self.failed_login_attempts)
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn lock_for_duration(&mut self, pool: &SqlitePool, duration: Duration) -> ApiResult<()> {
        self.locked_until = Some(Utc::now() + duration);
        sqlx::query("UPDATE users SET locked_until = ? WHERE id = ?")
            .bind(self.locked_until)
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn reset_failed_attempts(&mut self, pool: &SqlitePool) -> ApiResult<()> {
        self.failed_login_attempts = 0;
        self.locked_until = None;
        sqlx::query(
            "UPDATE users SET failed_login_attempts = 0, locked_until = NULL WHERE id = ?"
        )
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Get the UserRole enum from the role string
    pub fn get_role(&self) -> UserRole {
        UserRole::from_str(&self.role).unwrap_or(UserRole::Viewer)
    }
}

// ======== HELPER FUNCTIONS ========

pub fn get_current_user(req: &HttpRequest) -> ApiResult<Claims> {
    req.extensions()
        .get::<Claims>().cloned()
        .ok_or_else(|| ApiError::Unauthorized("No user information found".to_string()))
}

pub fn check_permission<F>(claims: &Claims, check: F) -> ApiResult<()>
where
    F: Fn(&UserRole) -> bool,
{
    if check(&claims.role) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Insufficient permissions".to_string()))
    }
}

/// Check if the current user has a specific permission
pub fn require_permission(req: &HttpRequest, permission_check: fn(&UserRole) -> bool) -> ApiResult<Claims> {
    let claims = get_current_user(req)?;
    check_permission(&claims, permission_check)?;
    Ok(claims)
}

// ======== JWT MIDDLEWARE ========

pub async fn jwt_middleware(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (actix_web::Error, ServiceRequest)> {
    let token = credentials.token();

    let auth_service = match req.app_data::<web::Data<std::sync::Arc<AuthService>>>() {
        Some(svc) => svc,
        None => {
            log::error!("AuthService not found in app data");
            return Err((
                ApiError::InternalServerError("Auth service not available".to_string()).into(),
                req,
            ));
        }
    };

    match auth_service.verify_token(token) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(req)
        }
        Err(err) => {
            log::warn!("JWT verification failed: {}", err);
            Err((err.into(), req))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn service() -> AuthService {
        // Минимальная стоимость bcrypt, чтобы тесты не тормозили
        AuthService::new("test-secret-test-secret-test-secret!", 1, 4)
    }

    #[test]
    fn test_role_permissions() {
        assert!(UserRole::Admin.can_manage_warehouses());
        assert!(!UserRole::Operator.can_manage_warehouses());
        assert!(UserRole::Operator.can_place_units());
        assert!(!UserRole::Viewer.can_place_units());
        assert!(UserRole::Viewer.can_view_cargo());
        assert_eq!(UserRole::from_str("OPERATOR"), Some(UserRole::Operator));
        assert_eq!(UserRole::from_str("researcher"), None);
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password_strength("short").is_err());
        assert!(validate_password_strength("alllowercase1").is_err());
        assert!(validate_password_strength("Warehouse2025").is_ok());
    }

    #[actix_rt::test]
    async fn test_token_round_trip_carries_warehouses() {
        let pool = test_pool().await;
        let auth = service();
        let user = User::create(&pool, "kladovshik", "k@example.com", "Warehouse2025", UserRole::Operator, &auth)
            .await
            .unwrap();

        let token = auth.generate_token(&user, vec!["w-1".to_string()]).unwrap();
        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, UserRole::Operator);
        assert_eq!(claims.warehouse_ids, vec!["w-1".to_string()]);

        let operator = Operator::from(&claims);
        assert!(!operator.unrestricted);

        assert!(auth.verify_password("Warehouse2025", &user.password_hash).unwrap());
        assert!(service().verify_token("garbage").is_err());
    }

    #[actix_rt::test]
    async fn test_assign_warehouses_replaces_set() {
        let pool = test_pool().await;
        let auth = service();
        let config = crate::config::WarehouseConfig::default();
        let registry = crate::topology::WarehouseRegistry::new(&pool, &config);
        let a = registry.create_warehouse(&crate::topology::tests::request("A", 1, 1, 1), "admin").await.unwrap();
        let b = registry.create_warehouse(&crate::topology::tests::request("B", 1, 1, 1), "admin").await.unwrap();

        let user = User::create(&pool, "kladovshik", "k@example.com", "Warehouse2025", UserRole::Operator, &auth)
            .await
            .unwrap();

        let assigned = user.assign_warehouses(&pool, &[a.id.clone(), "002".to_string()]).await.unwrap();
        assert_eq!(assigned.len(), 2);
        assert!(assigned.contains(&b.id));

        let assigned = user.assign_warehouses(&pool, &[a.id.clone()]).await.unwrap();
        assert_eq!(assigned, vec![a.id.clone()]);

        assert!(user.assign_warehouses(&pool, &["missing".to_string()]).await.unwrap_err().is_not_found());
    }
}
