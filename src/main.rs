// src/main.rs - точка входа сервиса складского учёта груза
use actix_web::{
    middleware::{Compress, DefaultHeaders, Logger},
    http::header,
    web, App, HttpServer,
};
use actix_cors::Cors;
use actix_web_httpauth::middleware::HttpAuthentication;
use anyhow::Context;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod audit;
mod auth;
mod auth_handlers;
mod cargo_handlers;
mod cargo_units;
mod code_handlers;
mod config;
mod db;
mod error;
mod handlers;
mod lifecycle;
mod location_code;
mod models;
mod monitoring;
mod pagination;
mod placement;
mod placement_handlers;
mod qr;
mod topology;
mod warehouse_handlers;

use auth::{jwt_middleware, AuthService, User, UserRole};
use config::{load_config, Config};
use lifecycle::{LifecycleEvents, LoggingEvents};
use monitoring::{Metrics, RequestLogger};

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
    pub events: Arc<dyn LifecycleEvents>,
    pub metrics: Arc<Metrics>,
}

// ==================== MAIN ====================

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    setup_logging(&config)?;
    config.print_startup_info();

    if config.is_production() {
        validate_production_config(&config)?;
    }

    let pool = create_database_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let auth_service = Arc::new(AuthService::new(
        &config.auth.jwt_secret,
        config.auth.token_expiration_hours,
        config.auth.bcrypt_cost,
    ));

    create_default_admin_if_needed(&pool, &auth_service).await?;

    let metrics = Arc::new(Metrics::new());
    let app_state = Arc::new(AppState {
        db_pool: pool.clone(),
        config: config.clone(),
        events: Arc::new(LoggingEvents),
        metrics: metrics.clone(),
    });

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    let server_config = config.server.clone();
    let mut server = HttpServer::new(move || {
        let cors = setup_cors(&config);
        let auth_middleware = HttpAuthentication::bearer(jwt_middleware);
        let security_headers = setup_security_headers(&config.security);

        App::new()
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Logger::default())
            .wrap(Compress::default())
            .wrap(RequestLogger::new(metrics.clone()))
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::JsonConfig::default().limit(config.security.max_request_size))

            // Без авторизации
            .service(
                web::scope("/health")
                    .route("", web::get().to(monitoring::health_check))
                    .route("/ready", web::get().to(monitoring::readiness_check))
                    .route("/metrics", web::get().to(monitoring::metrics_endpoint))
            )
            // Ресурс зарегистрирован раньше защищённого scope и перехватывает путь первым
            .route("/api/v1/auth/login", web::post().to(auth_handlers::login))

            .service(
                web::scope("/api/v1")
                    .wrap(auth_middleware)
                    .service(
                        web::scope("/auth")
                            .route("/profile", web::get().to(auth_handlers::get_profile))
                            .route("/users/{id}/warehouses", web::put().to(auth_handlers::assign_user_warehouses))
                    )
                    .service(
                        web::scope("/warehouses")
                            .route("", web::post().to(warehouse_handlers::create_warehouse))
                            .route("", web::get().to(warehouse_handlers::list_warehouses))
                            .route("/{id}", web::get().to(warehouse_handlers::get_warehouse))
                            .route("/{id}/structure", web::post().to(warehouse_handlers::create_structure))
                            .route(
                                "/{id}/cells/{block}/{shelf}/{cell}",
                                web::get().to(warehouse_handlers::get_cell_contents),
                            )
                    )
                    .service(
                        web::scope("/cargo")
                            .route("", web::post().to(cargo_handlers::create_cargo))
                            .route("/{number}", web::get().to(cargo_handlers::get_cargo))
                            .route("/{number}/progress", web::get().to(cargo_handlers::get_progress))
                            .route("/{number}/labels", web::get().to(cargo_handlers::get_labels))
                            .route("/{number}/status", web::post().to(cargo_handlers::change_status))
                            .route("/{number}/history", web::get().to(cargo_handlers::get_history))
                    )
                    .service(
                        web::scope("/placements")
                            .route("", web::post().to(placement_handlers::place_unit))
                            .route("/batch", web::post().to(placement_handlers::place_batch))
                            .route("/available", web::get().to(placement_handlers::list_available))
                            .route("/fully-placed", web::get().to(placement_handlers::list_fully_placed))
                            .route("/{individual_number}", web::delete().to(placement_handlers::remove_unit))
                    )
                    .service(
                        web::scope("/codes")
                            .route("/resolve", web::post().to(code_handlers::resolve))
                            .route("/{code}", web::get().to(code_handlers::get_code))
                    )
            )
    })
        .keep_alive(Duration::from_secs(server_config.keep_alive))
        .client_request_timeout(Duration::from_secs(server_config.client_timeout));

    if let Some(workers) = server_config.workers {
        server = server.workers(workers);
    }

    server
        .bind(&bind_address)?
        .run()
        .await
        .context("Server failed to run")?;

    Ok(())
}

// ==================== HELPER FUNCTIONS ====================

fn setup_cors(config: &Config) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .expose_headers(vec![header::CONTENT_LENGTH])
        .max_age(3600);

    let origins = &config.security.allowed_origins;
    if origins.iter().any(|o| o == "*") && !config.is_production() {
        log::warn!("⚠️  Using wildcard CORS (*) in development mode");
        cors = cors.allow_any_origin();
    } else {
        for origin in origins.iter().filter(|o| !o.is_empty() && o.as_str() != "*") {
            cors = cors.allowed_origin(origin);
        }
    }

    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }

    Ok(())
}

fn validate_production_config(config: &Config) -> anyhow::Result<()> {
    if config.security.allowed_origins.iter().any(|o| o == "*") {
        anyhow::bail!("Wildcard CORS origins not allowed in production!");
    }
    if !config.security.require_https {
        log::warn!("HTTPS is not enforced in production");
    }
    Ok(())
}

async fn create_database_pool(db_config: &config::DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&db_config.url)
        .with_context(|| format!("Invalid database url: {}", db_config.url))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(db_config.busy_timeout_seconds));

    let pool = SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(Duration::from_secs(db_config.connect_timeout))
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", db_config.url))?;

    Ok(pool)
}

fn setup_security_headers(config: &config::SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains",
        ));
    }

    headers
}

async fn create_default_admin_if_needed(
    pool: &SqlitePool,
    auth_service: &AuthService,
) -> anyhow::Result<()> {
    let user_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    if user_count.0 > 0 {
        return Ok(());
    }

    let (password, generated) = match env::var("DEFAULT_ADMIN_PASSWORD") {
        Ok(password) => (password, false),
        Err(_) => {
            let suffix: String = thread_rng()
                .sample_iter(&Alphanumeric)
                .take(14)
                .map(char::from)
                .collect();
            // Заглавная, строчная и цифра нужны проверке сложности
            (format!("Ak7{}", suffix), true)
        }
    };

    User::create(pool, "admin", "admin@warehouse.local", &password, UserRole::Admin, auth_service)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create default admin user: {}", e))?;

    log::warn!("Default admin user created:");
    log::warn!("  Username: admin");
    if generated {
        log::warn!("  Password: {} (generated - CHANGE IMMEDIATELY!)", password);
    }

    Ok(())
}
