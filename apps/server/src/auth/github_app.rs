//! GitHub App authentication.
//!
//! The delivery history endpoints authenticate as the App itself with a
//! short-lived RS256 JWT. GitHub rejects tokens living longer than ten
//! minutes, so a token is re-minted once it is older than
//! [`JWT_REFRESH_INTERVAL`].

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

/// Age after which a cached JWT is replaced before the next request
pub const JWT_REFRESH_INTERVAL: Duration = Duration::from_secs(4 * 60);

/// Lifetime written into the token's `exp` claim
const JWT_LIFETIME_SECS: i64 = 10 * 60;

/// Backdating applied to `iat` to tolerate clock drift against GitHub
const JWT_BACKDATE_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum AppAuthError {
    #[error("invalid GitHub App private key: {0}")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),

    #[error("failed to sign GitHub App JWT: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// JWT claims GitHub expects from an App
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

struct CachedJwt {
    token: String,
    minted_at: Instant,
}

/// Mints and caches GitHub App JWTs
pub struct AppTokenSource {
    app_id: String,
    key: EncodingKey,
    cached: Mutex<Option<CachedJwt>>,
}

impl AppTokenSource {
    /// Creates a token source from a PEM encoded RSA private key
    pub fn new(app_id: impl Into<String>, private_key_pem: &str) -> Result<Self, AppAuthError> {
        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(AppAuthError::InvalidKey)?;

        Ok(Self {
            app_id: app_id.into(),
            key,
            cached: Mutex::new(None),
        })
    }

    /// Returns a valid JWT, minting a new one when the cached token is stale
    pub fn token(&self) -> Result<String, AppAuthError> {
        let now = Instant::now();
        let mut cached = self
            .cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(jwt) = cached.as_ref() {
            if !needs_refresh(jwt.minted_at, now) {
                return Ok(jwt.token.clone());
            }
        }

        let token = self.mint()?;
        log::debug!("Minted new GitHub App JWT for app {}", self.app_id);
        *cached = Some(CachedJwt {
            token: token.clone(),
            minted_at: now,
        });

        Ok(token)
    }

    fn mint(&self) -> Result<String, AppAuthError> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - JWT_BACKDATE_SECS,
            exp: now + JWT_LIFETIME_SECS,
            iss: self.app_id.clone(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.key).map_err(AppAuthError::Signing)
    }
}

/// Whether a token minted at `minted_at` must be replaced at `now`
pub fn needs_refresh(minted_at: Instant, now: Instant) -> bool {
    now.saturating_duration_since(minted_at) > JWT_REFRESH_INTERVAL
}
