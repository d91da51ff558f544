use crate::services::{
    cipher::StorageKey, file_service::UploadLimits, share_service::ShareDefaults,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt::Display, str::FromStr};

const MIB: u64 = 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// `None` means a key is generated at startup.
    pub storage_key: Option<StorageKey>,
    pub max_file_size: u64,
    pub max_anonymous_file_size: u64,
    pub default_expire_hours: i64,
    pub default_download_limit: i64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Encrypted file drop with share codes")]
pub struct Args {
    /// Host to bind to (overrides FILEBOX_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILEBOX_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where encrypted objects are stored (overrides FILEBOX_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILEBOX_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Hex-encoded 32-byte object encryption key (overrides FILEBOX_STORAGE_KEY)
    #[arg(long)]
    pub storage_key: Option<String>,

    /// Upload ceiling in bytes for authenticated users (overrides FILEBOX_MAX_FILE_SIZE)
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Upload ceiling in bytes for anonymous uploads (overrides FILEBOX_MAX_ANONYMOUS_FILE_SIZE)
    #[arg(long)]
    pub max_anonymous_file_size: Option<u64>,

    /// Share lifetime used when a request gives none (overrides FILEBOX_DEFAULT_EXPIRE_HOURS)
    #[arg(long)]
    pub default_expire_hours: Option<i64>,

    /// Download limit used when a request gives none (overrides FILEBOX_DEFAULT_DOWNLOAD_LIMIT)
    #[arg(long)]
    pub default_download_limit: Option<i64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge already-parsed CLI args over the environment.
    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("FILEBOX_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_storage = env::var("FILEBOX_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("FILEBOX_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/filebox.db".into());

        let storage_key = match args.storage_key.or_else(|| env::var("FILEBOX_STORAGE_KEY").ok()) {
            Some(hex) if !hex.trim().is_empty() => {
                Some(StorageKey::from_hex(&hex).context("parsing FILEBOX_STORAGE_KEY")?)
            }
            _ => None,
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: or_env(args.port, "FILEBOX_PORT", 3000)?,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            storage_key,
            max_file_size: or_env(args.max_file_size, "FILEBOX_MAX_FILE_SIZE", 100 * MIB)?,
            max_anonymous_file_size: or_env(
                args.max_anonymous_file_size,
                "FILEBOX_MAX_ANONYMOUS_FILE_SIZE",
                50 * MIB,
            )?,
            default_expire_hours: or_env(args.default_expire_hours, "FILEBOX_DEFAULT_EXPIRE_HOURS", 1)?,
            default_download_limit: or_env(
                args.default_download_limit,
                "FILEBOX_DEFAULT_DOWNLOAD_LIMIT",
                5,
            )?,
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            anonymous_max_bytes: self.max_anonymous_file_size,
            authenticated_max_bytes: self.max_file_size,
        }
    }

    pub fn share_defaults(&self) -> ShareDefaults {
        ShareDefaults {
            expire_hours: self.default_expire_hours,
            download_limit: self.default_download_limit,
        }
    }
}

/// CLI value if given, else the parsed environment variable, else `default`.
fn or_env<T>(cli: Option<T>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("parsing {} value `{}`: {}", name, value, err)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
