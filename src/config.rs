// src/config.rs - Configuration management
use serde::Deserialize;
use std::env;
use anyhow::{Context, Result};
use rand::{thread_rng, Rng, distributions::Alphanumeric};
use std::path::Path;
use std::fs;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub warehouse: WarehouseConfig,
    pub placement: PlacementConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub keep_alive: u64,
    pub client_timeout: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub busy_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiration_hours: i64,
    pub bcrypt_cost: u32,
    pub max_login_attempts: u32,
    pub lockout_duration_minutes: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub max_request_size: usize,
    pub require_https: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

/// Пределы сетки склада (блок / полка / ячейка) и политика занятости
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WarehouseConfig {
    pub max_blocks: i64,
    pub max_shelves_per_block: i64,
    pub max_cells_per_shelf: i64,
    /// true: в ячейке может лежать только одна единица
    pub single_occupancy: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PlacementConfig {
    /// Переводить заявку в placed_in_warehouse, когда размещено 100%
    pub auto_advance_status: bool,
    pub max_batch_size: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dummy_32_chars_for_tests_only!!!".to_string(),
            token_expiration_hours: 24,
            bcrypt_cost: 10,
            max_login_attempts: 5,
            lockout_duration_minutes: 15,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: None,
            keep_alive: 30,
            client_timeout: 30,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "freight.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: 30,
            busy_timeout_seconds: 5,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            max_request_size: 1024 * 1024,
            require_https: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            max_blocks: 9,
            max_shelves_per_block: 3,
            max_cells_per_shelf: 50,
            single_occupancy: false,
        }
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            auto_advance_status: true,
            max_batch_size: 500,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
            warehouse: WarehouseConfig::default(),
            placement: PlacementConfig::default(),
        }
    }
}

// Генерация безопасного JWT секрета
pub fn generate_jwt_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

pub fn load_config() -> Result<Config> {
    load_env_file()?;

    let mut config = if let Ok(config_file) = env::var("CONFIG_FILE") {
        Config::from_file(Path::new(&config_file))?
    } else {
        Config::default()
    };

    override_with_env(&mut config);

    if env::var("JWT_SECRET").is_err() && config.is_production() {
        log::warn!("JWT_SECRET is not set, generating an ephemeral secret");
        config.auth.jwt_secret = generate_jwt_secret();
    }

    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn override_with_env(config: &mut Config) {
    if let Ok(host) = env::var("BIND_ADDRESS") {
        config.server.host = host;
    }
    if let Some(port) = parse_env::<u16>("FREIGHT_PORT") {
        config.server.port = port;
    }
    if let Some(workers) = parse_env::<usize>("FREIGHT_WORKERS") {
        config.server.workers = Some(workers);
    }
    if let Ok(jwt_secret) = env::var("JWT_SECRET") {
        config.auth.jwt_secret = jwt_secret;
    }
    if let Some(hours) = parse_env::<i64>("AUTH_TOKEN_EXPIRATION_HOURS") {
        config.auth.token_expiration_hours = hours;
    }
    if let Some(cost) = parse_env::<u32>("AUTH_BCRYPT_COST") {
        config.auth.bcrypt_cost = cost;
    }
    if let Ok(url) = env::var("DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(max_conn) = parse_env::<u32>("DATABASE_MAX_CONNECTIONS") {
        config.database.max_connections = max_conn;
    }
    if let Some(min_conn) = parse_env::<u32>("DATABASE_MIN_CONNECTIONS") {
        config.database.min_connections = min_conn;
    }
    if let Ok(origins_str) = env::var("ALLOWED_ORIGINS") {
        config.security.allowed_origins = origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(level) = env::var("RUST_LOG") {
        config.logging.level = level;
    }
    if let Some(v) = parse_env::<i64>("WAREHOUSE_MAX_BLOCKS") {
        config.warehouse.max_blocks = v;
    }
    if let Some(v) = parse_env::<i64>("WAREHOUSE_MAX_SHELVES") {
        config.warehouse.max_shelves_per_block = v;
    }
    if let Some(v) = parse_env::<i64>("WAREHOUSE_MAX_CELLS") {
        config.warehouse.max_cells_per_shelf = v;
    }
    if let Some(v) = parse_env::<bool>("WAREHOUSE_SINGLE_OCCUPANCY") {
        config.warehouse.single_occupancy = v;
    }
    if let Some(v) = parse_env::<bool>("PLACEMENT_AUTO_ADVANCE") {
        config.placement.auto_advance_status = v;
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long (current: {})",
                self.auth.jwt_secret.len()
            ));
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "max_connections ({}) must be >= min_connections ({})",
                self.database.max_connections,
                self.database.min_connections
            ));
        }

        // Канонический код отводит два разряда под блок, полку и ячейку
        let w = &self.warehouse;
        for (name, value) in [
            ("max_blocks", w.max_blocks),
            ("max_shelves_per_block", w.max_shelves_per_block),
            ("max_cells_per_shelf", w.max_cells_per_shelf),
        ] {
            if !(1..=99).contains(&value) {
                return Err(anyhow::anyhow!("warehouse.{} must be within 1..=99 (current: {})", name, value));
            }
        }

        if self.placement.max_batch_size == 0 {
            return Err(anyhow::anyhow!("placement.max_batch_size must be positive"));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        env::var("FREIGHT_ENV").map(|v| v == "production").unwrap_or(false)
    }

    pub fn print_startup_info(&self) {
        log::info!("📦 Freight warehouse service starting up...");
        log::info!("🌐 Server: {}:{}", self.server.host, self.server.port);
        log::info!("💾 Database: {}", self.database.url);
        log::info!("🔒 Auth: JWT ({}h expiration)", self.auth.token_expiration_hours);
        log::info!(
            "🏬 Grid limits: {} blocks × {} shelves × {} cells, {} occupancy",
            self.warehouse.max_blocks,
            self.warehouse.max_shelves_per_block,
            self.warehouse.max_cells_per_shelf,
            if self.warehouse.single_occupancy { "single" } else { "multi" }
        );

        if !self.is_production() {
            log::warn!("🚧 Running in development mode");
        }
    }
}

pub fn load_env_file() -> Result<()> {
    if let Ok(env_file) = env::var("ENV_FILE") {
        dotenvy::from_filename(&env_file)
            .with_context(|| format!("Failed to load environment file: {}", env_file))?;
    } else if Path::new(".env").exists() {
        dotenvy::dotenv().context("Failed to load .env file")?;
    }
    Ok(())
}
