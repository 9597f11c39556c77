use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use merch_store::{
    auth::{Argon2Verifier, TokenIssuer},
    config::{Config, StoreBackend},
    handlers,
    metrics::Metrics,
    services::{MerchService, ServiceSettings},
    store::{MemoryStore, MerchStore, PgStore},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.logging.json);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    info!(
        "Starting Merch Store on {}:{} ({:?} backend)",
        config.server.host, config.server.port, config.store.backend
    );

    let store = open_store(&config).await?;
    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
    let issuer = Arc::new(TokenIssuer::new(
        &config.auth.jwt_secret,
        config.auth.token_ttl_hours,
    ));

    let service = Arc::new(MerchService::new(
        store,
        Arc::new(Argon2Verifier::new()),
        metrics,
        ServiceSettings {
            starting_balance: config.store.starting_balance,
            unit_of_work_timeout: config.unit_of_work_timeout(),
        },
    ));

    HttpServer::new(move || {
        let cors = Cors::permissive();
        let issuer = issuer.clone();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(web::Data::new(service.clone()))
            .configure(|cfg| handlers::configure_routes(cfg, issuer))
    })
    .workers(config.server.workers)
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn MerchStore>> {
    match config.store.backend {
        StoreBackend::Postgres => {
            let store = PgStore::connect(
                &config.database.url,
                config.database.max_connections,
                config.database.min_connections,
                config.acquire_timeout(),
            )
            .await
            .context("Failed to connect to database")?;

            if config.database.run_migrations {
                store.migrate().await.context("Failed to run migrations")?;
            }
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; all data is lost on shutdown");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
