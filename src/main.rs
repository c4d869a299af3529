use actix_web::{web, App, HttpServer};
use anyhow::Context;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use review_locator::api;
use review_locator::cache::{CacheStore, IndexCache, MemoryStore, MongoStore};
use review_locator::config::AppConfig;
use review_locator::orchestrator::ReviewEngine;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let store: Arc<dyn CacheStore> = match config.cache.mongodb_uri {
        Some(ref uri) => Arc::new(
            MongoStore::connect(uri.expose_secret(), &config.cache.mongodb_db)
                .await
                .context("failed to connect to MongoDB")?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    let cache = Arc::new(IndexCache::new(store, &config.cache));
    cache.init().await.context("failed to initialize index cache")?;

    let engine = web::Data::new(ReviewEngine::new(cache.clone(), &config));

    let (host, port) = (config.server.host.clone(), config.server.port);
    tracing::info!("Starting server at http://{}:{}", host, port);

    let result = HttpServer::new(move || {
        App::new()
            .app_data(engine.clone())
            .configure(api::configure)
    })
    .bind((host.as_str(), port))?
    .run()
    .await;

    cache.shutdown().await;
    result.context("server error")
}
