use std::env;
use std::time::Duration;

use crate::datastore::TableName;
use crate::lock::MAX_LOCK_TTL;

/// Webhook ingress configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    /// Shared secret used to verify `X-Hub-Signature-256`
    pub webhook_secret: String,
    /// Failed publishes tolerated per delivery before routing to the dead-letter topic
    pub retry_limit: u32,
    pub events_table: TableName,
    pub failure_events_table: TableName,
    pub pubsub: PubSubConfig,
    pub gcp: GcpConfig,
}

/// Retry job configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub database: DatabaseConfig,
    pub github: GithubConfig,
    pub lock: LockConfig,
    pub checkpoint_table: TableName,
    pub events_table: TableName,
    pub gcp: GcpConfig,
}

/// Database connection pool configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    /// Apply bundled migrations on startup (tables are usually provisioned externally)
    pub run_migrations: bool,
}

/// Pub/Sub topics the ingress publishes to
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub endpoint: String,
    pub project_id: String,
    pub events_topic: String,
    pub dead_letter_topic: String,
}

/// Source of Google Cloud access tokens
#[derive(Debug, Clone)]
pub struct GcpConfig {
    /// Static token, mostly useful against emulators
    pub access_token: Option<String>,
    pub metadata_url: String,
}

/// GitHub App used to read and redeliver webhook deliveries
#[derive(Clone)]
pub struct GithubConfig {
    /// Checkpoint scoping key, e.g. `github.com` or a GitHub Enterprise host
    pub domain: String,
    pub app_id: String,
    pub private_key: String,
    pub api_url: Option<String>,
    pub page_size: u32,
}

/// Distributed lock settings for the retry job
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub bucket: String,
    pub name: String,
    pub ttl: Duration,
    pub clock_skew: Duration,
    pub storage_endpoint: String,
}

const DEFAULT_METADATA_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

impl std::fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubConfig")
            .field("domain", &self.domain)
            .field("app_id", &self.app_id)
            .field("private_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl WebhookConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let retry_limit: u32 = required("RETRY_LIMIT")?
            .parse()
            .map_err(|_| ConfigError::InvalidRetryLimit)?;
        if retry_limit == 0 {
            return Err(ConfigError::InvalidRetryLimit);
        }

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            database: DatabaseConfig::from_env()?,
            webhook_secret: required("GITHUB_WEBHOOK_SECRET")?,
            retry_limit,
            events_table: table_from_env("EVENTS_TABLE", "events")?,
            failure_events_table: table_from_env("FAILURE_EVENTS_TABLE", "failure_events")?,
            pubsub: PubSubConfig::from_env()?,
            gcp: GcpConfig::from_env(),
        })
    }
}

impl RetryConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            github: GithubConfig::from_env()?,
            lock: LockConfig::from_env()?,
            checkpoint_table: table_from_env("CHECKPOINT_TABLE", "checkpoint")?,
            events_table: table_from_env("EVENTS_TABLE", "events")?,
            gcp: GcpConfig::from_env(),
        })
    }
}

impl DatabaseConfig {
    /// Load database configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        Ok(Self {
            url,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .unwrap_or(1),
            acquire_timeout: Duration::from_secs(
                env::var("DATABASE_ACQUIRE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            ),
            idle_timeout: Duration::from_secs(
                env::var("DATABASE_IDLE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "600".to_string())
                    .parse()
                    .unwrap_or(600),
            ),
            max_lifetime: Duration::from_secs(
                env::var("DATABASE_MAX_LIFETIME_SECS")
                    .unwrap_or_else(|_| "1800".to_string())
                    .parse()
                    .unwrap_or(1800),
            ),
            run_migrations: env::var("DATABASE_RUN_MIGRATIONS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }
}

impl PubSubConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: env::var("PUBSUB_ENDPOINT")
                .unwrap_or_else(|_| "https://pubsub.googleapis.com".to_string()),
            project_id: required("PROJECT_ID")?,
            events_topic: required("EVENTS_TOPIC_ID")?,
            dead_letter_topic: required("DLQ_EVENTS_TOPIC_ID")?,
        })
    }
}

impl GcpConfig {
    pub fn from_env() -> Self {
        Self {
            access_token: env::var("GCP_ACCESS_TOKEN").ok().filter(|t| !t.is_empty()),
            metadata_url: env::var("GCP_METADATA_URL")
                .unwrap_or_else(|_| DEFAULT_METADATA_URL.to_string()),
        }
    }
}

impl GithubConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            domain: env::var("GITHUB_DOMAIN").unwrap_or_else(|_| "github.com".to_string()),
            app_id: required("GITHUB_APP_ID")?,
            private_key: required("GITHUB_PRIVATE_KEY")?,
            api_url: env::var("GITHUB_API_URL").ok().filter(|u| !u.is_empty()),
            // GitHub caps per_page at 100
            page_size: env::var("DELIVERIES_PAGE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse::<u32>()
                .unwrap_or(100)
                .clamp(1, 100),
        })
    }
}

impl LockConfig {
    /// Load lock configuration from environment variables.
    ///
    /// The TTL must exceed the worst-case job duration plus the clock skew margin:
    /// the lease is not renewed while the job runs.
    pub fn from_env() -> Result<Self, ConfigError> {
        let ttl = Duration::from_secs(
            env::var("LOCK_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("LOCK_TTL_SECS"))?,
        );
        let clock_skew = Duration::from_secs(
            env::var("LOCK_TTL_CLOCK_SKEW_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("LOCK_TTL_CLOCK_SKEW_SECS"))?,
        );
        if ttl > MAX_LOCK_TTL {
            return Err(ConfigError::LockTtlTooLong);
        }
        if clock_skew >= ttl {
            return Err(ConfigError::ClockSkewExceedsTtl);
        }

        Ok(Self {
            bucket: required("LOCK_BUCKET")?,
            name: env::var("LOCK_NAME").unwrap_or_else(|_| "retry-lock".to_string()),
            ttl,
            clock_skew,
            storage_endpoint: env::var("STORAGE_ENDPOINT")
                .unwrap_or_else(|_| "https://storage.googleapis.com".to_string()),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn table_from_env(name: &'static str, default: &str) -> Result<TableName, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    TableName::parse(&raw).map_err(|_| ConfigError::InvalidTableName(name, raw))
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    MissingDatabaseUrl,
    Missing(&'static str),
    InvalidRetryLimit,
    InvalidNumber(&'static str),
    InvalidTableName(&'static str, String),
    ClockSkewExceedsTtl,
    LockTtlTooLong,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "PORT must be a valid number"),
            ConfigError::MissingDatabaseUrl => {
                write!(f, "DATABASE_URL environment variable is required")
            }
            ConfigError::Missing(name) => write!(f, "{} environment variable is required", name),
            ConfigError::InvalidRetryLimit => {
                write!(f, "RETRY_LIMIT must be a positive integer")
            }
            ConfigError::InvalidNumber(name) => write!(f, "{} must be a valid number", name),
            ConfigError::InvalidTableName(name, value) => {
                write!(f, "{} is not a valid table name: {:?}", name, value)
            }
            ConfigError::ClockSkewExceedsTtl => write!(
                f,
                "LOCK_TTL_CLOCK_SKEW_SECS must be smaller than LOCK_TTL_SECS"
            ),
            ConfigError::LockTtlTooLong => write!(
                f,
                "LOCK_TTL_SECS must be at most {}",
                MAX_LOCK_TTL.as_secs()
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
