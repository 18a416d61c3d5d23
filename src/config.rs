use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub upload_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub download_chunk_size: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Chunked file upload and retrieval service")]
pub struct Args {
    /// Host to bind to (overrides CHUNK_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CHUNK_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where reassembled files are stored (overrides CHUNK_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides CHUNK_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Seconds an idle upload buffer survives before eviction (overrides CHUNK_STORE_UPLOAD_TTL_SECS)
    #[arg(long)]
    pub upload_ttl_secs: Option<u64>,

    /// Seconds between expiry sweeps (overrides CHUNK_STORE_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Default chunk size in bytes for downloads (overrides CHUNK_STORE_DOWNLOAD_CHUNK_SIZE)
    #[arg(long)]
    pub download_chunk_size: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

pub const DEFAULT_DOWNLOAD_CHUNK_SIZE: usize = 512 * 1024;

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    fn merge(args: Args) -> Result<Self> {
        let env_host = env::var("CHUNK_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_storage =
            env::var("CHUNK_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/files".into());
        let env_db = env::var("CHUNK_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/chunk_store.db".into());

        let port = match args.port {
            Some(port) => port,
            None => env_or("CHUNK_STORE_PORT", 3000)?,
        };
        let upload_ttl_secs = match args.upload_ttl_secs {
            Some(ttl) => ttl,
            None => env_or("CHUNK_STORE_UPLOAD_TTL_SECS", 3600)?,
        };
        let sweep_interval_secs = match args.sweep_interval_secs {
            Some(interval) => interval,
            None => env_or("CHUNK_STORE_SWEEP_INTERVAL_SECS", 60)?,
        };
        let download_chunk_size = match args.download_chunk_size {
            Some(size) => size,
            None => env_or("CHUNK_STORE_DOWNLOAD_CHUNK_SIZE", DEFAULT_DOWNLOAD_CHUNK_SIZE)?,
        };
        if download_chunk_size == 0 {
            anyhow::bail!("download chunk size must be greater than zero");
        }

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            upload_ttl_secs,
            sweep_interval_secs: sweep_interval_secs.max(1),
            download_chunk_size,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upload_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Read and parse `name`, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
