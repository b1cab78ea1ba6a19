use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const DEFAULT_API_KEY_HEADER: &str = "X-Agent-API-Key";
const DEFAULT_TOKEN_ALGORITHM: &str = "HS256";
const DEFAULT_TOKEN_EXPIRATION_HOURS: i64 = 24;
const DEFAULT_RATE_LIMIT_PER_MINUTE: usize = 100;
const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

/// Security configuration shared by the credential store, token service
/// and local API. Loaded once at process start and threaded through
/// request handling via `AppState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub api_key_header: String,
    pub jwt_algorithm: String,
    pub jwt_expiration_hours: i64,
    pub require_tls: bool,
    pub rate_limit_per_minute: usize,
    pub max_request_size: usize,
    pub allowed_origins: Option<Vec<String>>,
}

impl SecurityConfig {
    /// Build a config from `SENTINEL_*` environment variables, with the
    /// defaults documented on each field.
    ///
    /// If `SENTINEL_JWT_SECRET` is unset a fresh secret is generated, which
    /// invalidates every token minted by previous runs.
    pub fn from_env() -> Self {
        Self {
            jwt_secret: std::env::var("SENTINEL_JWT_SECRET")
                .unwrap_or_else(|_| Self::generate_secret()),
            api_key_header: std::env::var("SENTINEL_API_KEY_HEADER")
                .unwrap_or_else(|_| DEFAULT_API_KEY_HEADER.to_string()),
            jwt_algorithm: std::env::var("SENTINEL_JWT_ALGORITHM")
                .unwrap_or_else(|_| DEFAULT_TOKEN_ALGORITHM.to_string()),
            jwt_expiration_hours: std::env::var("SENTINEL_JWT_EXPIRATION_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TOKEN_EXPIRATION_HOURS),
            require_tls: std::env::var("SENTINEL_REQUIRE_TLS")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(true),
            rate_limit_per_minute: std::env::var("SENTINEL_RATE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE),
            max_request_size: std::env::var("SENTINEL_MAX_REQUEST_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_REQUEST_SIZE),
            allowed_origins: std::env::var("SENTINEL_ALLOWED_ORIGINS").ok().map(|v| {
                v.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            }),
        }
    }

    /// Generate a secure random signing secret.
    fn generate_secret() -> String {
        let digest = Sha256::digest(Uuid::new_v4().to_string().as_bytes());
        format!("{digest:x}")
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: Self::generate_secret(),
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            jwt_algorithm: DEFAULT_TOKEN_ALGORITHM.to_string(),
            jwt_expiration_hours: DEFAULT_TOKEN_EXPIRATION_HOURS,
            require_tls: true,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            allowed_origins: None,
        }
    }
}
