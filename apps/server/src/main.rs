use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};

use hookline::auth::GcpTokenSource;
use hookline::config;
use hookline::datastore::{Datastore, PgDatastore};
use hookline::ingest::{IngestSettings, WebhookService};
use hookline::publisher::PubSubPublisher;
use hookline::routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Load configuration
    let config = config::WebhookConfig::from_env().map_err(|e| {
        log::error!("Configuration error: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    log::info!("Starting webhook ingress on {}:{}", config.host, config.port);

    let datastore = PgDatastore::connect(&config.database).await.map_err(|e| {
        log::error!("Datastore error: {}", e);
        std::io::Error::other(e.to_string())
    })?;
    let datastore: Arc<dyn Datastore> = Arc::new(datastore);

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let tokens = Arc::new(GcpTokenSource::new(http.clone(), &config.gcp));

    let events = Arc::new(PubSubPublisher::new(
        http.clone(),
        tokens.clone(),
        &config.pubsub.endpoint,
        &config.pubsub.project_id,
        &config.pubsub.events_topic,
    ));
    let dead_letter = Arc::new(PubSubPublisher::new(
        http,
        tokens,
        &config.pubsub.endpoint,
        &config.pubsub.project_id,
        &config.pubsub.dead_letter_topic,
    ));
    log::info!(
        "Publishing to {} (dead-letter {})",
        events.topic(),
        dead_letter.topic()
    );

    let service = web::Data::new(WebhookService::new(
        datastore.clone(),
        events,
        dead_letter,
        IngestSettings {
            webhook_secret: config.webhook_secret.clone(),
            retry_limit: config.retry_limit,
            events_table: config.events_table.clone(),
            failure_events_table: config.failure_events_table.clone(),
        },
    ));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind((config.host.as_str(), config.port))?
    .shutdown_timeout(30)
    .run();

    // Spawn graceful shutdown handler
    let server_handle = server.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        log::info!("Shutdown signal received, stopping server...");
        server_handle.stop(true).await;
    });

    let result = server.await;

    if let Err(e) = datastore.close().await {
        log::error!("Failed to close datastore: {}", e);
    }

    result
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                log::error!("Failed to install Ctrl+C handler: {}", e);
                // Wait forever if signal handler fails
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
