//! Molaris API server entry point.

use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

use molaris::auth::JwtKeys;
use molaris::config::load_config;
use molaris::db::Database;
use molaris::integrations::s3::ExamStorage;
use molaris::integrations::stripe::StripeClient;
use molaris::integrations::whatsapp::WhatsAppClient;
use molaris::state::AppState;
use molaris::{api, error::ApiError};

async fn health(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    state
        .db
        .health()
        .await
        .map_err(|e| ApiError::internal(format!("database unreachable: {e}")))?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = load_config()?;

    let database = Database::connect(&config.database.url, config.database.max_connections).await?;
    database.run_migrations().await?;
    tracing::info!("database connected, public migrations applied");

    let state = AppState {
        jwt: JwtKeys::new(
            &config.auth.jwt_secret,
            config.auth.access_ttl_minutes,
            config.auth.refresh_ttl_days,
        ),
        stripe: StripeClient::new(&config.stripe),
        whatsapp: WhatsAppClient::new(&config.whatsapp),
        storage: ExamStorage::new(&config.storage).await,
        db: database,
        config: config.clone(),
    };
    let state = web::Data::new(state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting server");

    let cors_origins = config.server.cors_origins.clone();
    HttpServer::new(move || {
        let mut cors = Cors::default()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);
        if cors_origins.is_empty() {
            // Credentialed requests cannot use a wildcard origin.
            cors = cors.allow_any_origin();
        } else {
            for origin in &cors_origins {
                cors = cors.allowed_origin(origin);
            }
            cors = cors.supports_credentials();
        }

        App::new()
            .app_data(state.clone())
            .wrap(TracingLogger::default())
            .wrap(cors)
            .route("/health", web::get().to(health))
            .configure(api::configure)
    })
    .bind(&bind_addr)?
    .run()
    .await?;
    Ok(())
}
