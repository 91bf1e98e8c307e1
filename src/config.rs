use std::time::Duration;

use crate::db::sqlite::DEFAULT_STORE_TIMEOUT;
use crate::errors::AppError;
use crate::jwt::JwtConfig;

pub const DEFAULT_PUBLIC_PATHS: &[&str] = &["/auth/login", "/auth/signup", "/health", "/metrics"];
pub const DEFAULT_PORT: u16 = 8080;

/// Process-wide settings, read once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt: JwtConfig,
    /// Path prefixes the forward-auth adapter lets through without a token.
    pub public_paths: Vec<String>,
    pub store_timeout: Duration,
    pub port: u16,
}

impl AppConfig {
    pub fn new(jwt: JwtConfig) -> Self {
        Self {
            jwt,
            public_paths: DEFAULT_PUBLIC_PATHS.iter().map(|p| p.to_string()).collect(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            port: DEFAULT_PORT,
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let mut config = Self::new(JwtConfig::from_env()?);

        if let Ok(raw) = std::env::var("PUBLIC_PATHS") {
            config.public_paths = parse_public_paths(&raw);
        }

        if let Ok(raw) = std::env::var("STORE_TIMEOUT_MS") {
            let millis = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| AppError::configuration("STORE_TIMEOUT_MS must be a positive integer"))?;
            config.store_timeout = Duration::from_millis(millis);
        }

        if let Ok(raw) = std::env::var("APP_PORT") {
            config.port = raw
                .trim()
                .parse()
                .map_err(|_| AppError::configuration("APP_PORT must be a valid port number"))?;
        }

        Ok(config)
    }
}

/// Loads `.env` from the working directory, falling back to the crate directory.
pub fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

pub fn database_url() -> anyhow::Result<String> {
    std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL not set"))
}

pub fn parse_public_paths(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|path| path.starts_with('/') && path.len() > 1)
        .map(str::to_string)
        .collect()
}
