use std::path::PathBuf;

use thiserror::Error;

pub const APP_NAME: &str = "Clinic Records";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_DATABASE_PATH: &str = "patient.db";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 32 * 1024 * 1024;
pub const DEFAULT_POOL_SIZE: u32 = 8;

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,clinic_records=debug"
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a positive number, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}

/// Where bulk-import uploads are kept and how large they may be.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub dir: PathBuf,
    /// Limit on the uploaded (compressed) file.
    pub max_bytes: usize,
    /// Limit on the decompressed document body read out of the upload.
    pub max_document_bytes: usize,
}

/// Service configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub host: String,
    pub port: u16,
    pub pool_size: u32,
    pub upload: UploadSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or blank keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_path = get("DATABASE_URL")
            .map(|url| sqlite_path(&url))
            .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string());

        Ok(Self {
            database_path,
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_number("PORT", get("PORT"), DEFAULT_PORT)?,
            pool_size: parse_number("DB_POOL_SIZE", get("DB_POOL_SIZE"), DEFAULT_POOL_SIZE)?,
            upload: UploadSettings {
                dir: PathBuf::from(
                    get("UPLOAD_DIR").unwrap_or_else(|| DEFAULT_UPLOAD_DIR.to_string()),
                ),
                max_bytes: parse_number(
                    "MAX_UPLOAD_BYTES",
                    get("MAX_UPLOAD_BYTES"),
                    DEFAULT_MAX_UPLOAD_BYTES,
                )?,
                max_document_bytes: parse_number(
                    "MAX_DOCUMENT_BYTES",
                    get("MAX_DOCUMENT_BYTES"),
                    DEFAULT_MAX_DOCUMENT_BYTES,
                )?,
            },
        })
    }
}

/// Accept either a bare path or a `sqlite://` style URL.
fn sqlite_path(url: &str) -> String {
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url)
        .to_string()
}

fn parse_number<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
{
    match raw {
        None => Ok(default),
        Some(value) => match value.parse::<T>() {
            Ok(n) if n != T::default() => Ok(n),
            _ => Err(ConfigError::InvalidNumber { key, value }),
        },
    }
}
