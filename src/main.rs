use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use tracing_subscriber::EnvFilter;

use clinic_records::config::{self, Config};
use clinic_records::RecordStore;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    // create db connection pool and bring the schema up to date
    let store = RecordStore::open(&config.database_path, config.pool_size)
        .with_context(|| format!("failed to open database at {}", config.database_path))?;

    std::fs::create_dir_all(&config.upload.dir).with_context(|| {
        format!("failed to create upload directory {}", config.upload.dir.display())
    })?;

    let store = web::Data::new(store);
    let upload = web::Data::new(config.upload.clone());

    tracing::info!(
        host = %config.host,
        port = config.port,
        database = %config.database_path,
        "Listening"
    );

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(store.clone())
            .app_data(upload.clone())
            .configure(clinic_records::configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
