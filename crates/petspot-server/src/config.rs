use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub image_dir: PathBuf,
    pub jwt_secret: String,
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("PETSPOT_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PETSPOT_JWT_SECRET is unset or still a placeholder");
        }

        let port = match get("PETSPOT_PORT") {
            Some(v) => v.parse().with_context(|| format!("Invalid PETSPOT_PORT: {}", v))?,
            None => 3000,
        };

        let sweep_interval_secs = get("PETSPOT_SWEEP_INTERVAL_SECS")
            .and_then(|v| v.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(3600);

        Ok(Self {
            host: get("PETSPOT_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("PETSPOT_DB_PATH").unwrap_or_else(|| "petspot.db".into()).into(),
            image_dir: get("PETSPOT_IMAGE_DIR")
                .unwrap_or_else(|| "./public/images".into())
                .into(),
            jwt_secret,
            sweep_interval_secs,
        })
    }
}
