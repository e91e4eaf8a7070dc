use std::process::ExitCode;
use std::sync::Arc;

use hookline::auth::GcpTokenSource;
use hookline::config::RetryConfig;
use hookline::datastore::PgDatastore;
use hookline::github::GithubClient;
use hookline::lock::GcsLock;
use hookline::retry::{RetryJob, RetryJobSettings};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            log::error!("{}", message);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), String> {
    let config = RetryConfig::from_env().map_err(|e| format!("Configuration error: {}", e))?;

    log::info!(
        "Starting retry job for {} (lock gs://{}/{}, ttl {:?})",
        config.github.domain,
        config.lock.bucket,
        config.lock.name,
        config.lock.ttl
    );

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| format!("HTTP client error: {}", e))?;

    let tokens = Arc::new(GcpTokenSource::new(http.clone(), &config.gcp));
    let lock = GcsLock::new(
        http.clone(),
        tokens,
        &config.lock.storage_endpoint,
        &config.lock.bucket,
        &config.lock.name,
    )
    .map_err(|e| format!("Invalid STORAGE_ENDPOINT: {}", e))?;

    let source =
        GithubClient::new(http, &config.github).map_err(|e| format!("GitHub client error: {}", e))?;

    let datastore = PgDatastore::connect(&config.database)
        .await
        .map_err(|e| format!("Datastore error: {}", e))?;

    let job = RetryJob::new(
        RetryJobSettings {
            domain: config.github.domain.clone(),
            checkpoint_table: config.checkpoint_table.clone(),
            events_table: config.events_table.clone(),
            lock_ttl: config.lock.ttl,
            lock_ttl_clock_skew: config.lock.clock_skew,
        },
        Arc::new(datastore),
        Arc::new(lock),
        Arc::new(source),
    );

    let summary = job.execute().await.map_err(|e| format!("Retry job failed: {}", e))?;

    if summary.skipped {
        log::info!("Retry job skipped, another execution is running");
    } else {
        log::info!(
            "Retry job finished: total_event_count={} failed_event_count={} redelivered_count={}",
            summary.total_event_count,
            summary.failed_event_count,
            summary.redelivered_count
        );
    }

    Ok(())
}
