//! Configuration module
//!
//! Environment-based configuration for the upload service: HTTP server,
//! image engine resource ceilings, normalization policy, and storage backend
//! selection. Loaded once at startup; `validate()` fails fast on settings the
//! engine or storage factory cannot work with.

use std::env;

use crate::storage_types::StorageBackend;

// Engine defaults. The engine serializes its own heavy work, so the
// concurrency level stays at 1 unless explicitly raised.
const DEFAULT_ENGINE_CONCURRENCY: usize = 1;
const DEFAULT_ENGINE_CACHE_MEMORY_MB: u64 = 50;
const DEFAULT_ENGINE_CACHE_ENTRIES: usize = 10;
const DEFAULT_ENGINE_DRAIN_TIMEOUT_SECS: u64 = 5;

const DEFAULT_JPEG_QUALITY: u8 = 100;
const DEFAULT_MAX_UPLOAD_SIZE_MB: u64 = 128;

// Formats that downstream consumers cannot (or cannot reliably) display;
// these are normalized to JPEG before storage.
const DEFAULT_NORMALIZE_EXTENSIONS: &str = "dng,heic,heif,svg,jp2k,tiff,webp";

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub environment: String,
    // Image engine resource ceilings
    pub engine_concurrency: usize,
    pub engine_max_cache_memory_bytes: u64,
    pub engine_max_cache_entries: usize,
    pub engine_drain_timeout_secs: u64,
    // Normalization policy
    pub jpeg_quality: u8,
    pub max_upload_size_bytes: u64,
    pub normalize_extensions: Vec<String>,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// Entries keep their case; CORS origins are case-sensitive, and the
// extension policy normalizes case itself.
fn env_list(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let storage_backend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .parse::<StorageBackend>()
            .map_err(|e| anyhow::anyhow!(e))?;

        Ok(Config {
            server_port: env_parse("PORT", 3000),
            cors_origins: env_list("CORS_ORIGINS", "*"),
            environment: env::var("ENVIRONMENT")
                .or_else(|_| env::var("APP_ENV"))
                .unwrap_or_else(|_| "development".to_string()),
            engine_concurrency: env_parse("ENGINE_CONCURRENCY", DEFAULT_ENGINE_CONCURRENCY),
            engine_max_cache_memory_bytes: env_parse(
                "ENGINE_MAX_CACHE_MEMORY_MB",
                DEFAULT_ENGINE_CACHE_MEMORY_MB,
            ) * 1024
                * 1024,
            engine_max_cache_entries: env_parse(
                "ENGINE_MAX_CACHE_ENTRIES",
                DEFAULT_ENGINE_CACHE_ENTRIES,
            ),
            engine_drain_timeout_secs: env_parse(
                "ENGINE_SHUTDOWN_DRAIN_TIMEOUT_SECS",
                DEFAULT_ENGINE_DRAIN_TIMEOUT_SECS,
            ),
            jpeg_quality: env_parse("JPEG_QUALITY", DEFAULT_JPEG_QUALITY),
            max_upload_size_bytes: env_parse("MAX_UPLOAD_SIZE_MB", DEFAULT_MAX_UPLOAD_SIZE_MB)
                * 1024
                * 1024,
            normalize_extensions: env_list("NORMALIZE_EXTENSIONS", DEFAULT_NORMALIZE_EXTENSIONS),
            storage_backend,
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL").ok(),
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").ok().or_else(|| env::var("AWS_REGION").ok()),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
        })
    }

    /// Check configuration consistency before any service starts.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.engine_concurrency == 0 {
            anyhow::bail!("ENGINE_CONCURRENCY must be at least 1");
        }
        if self.jpeg_quality > 100 {
            anyhow::bail!("JPEG_QUALITY must be in 0..=100");
        }
        if self.max_upload_size_bytes == 0 {
            anyhow::bail!("MAX_UPLOAD_SIZE_MB must be at least 1");
        }
        match self.storage_backend {
            StorageBackend::Local => {
                if self.local_storage_path.is_none() || self.local_storage_base_url.is_none() {
                    anyhow::bail!(
                        "local storage backend requires LOCAL_STORAGE_PATH and LOCAL_STORAGE_BASE_URL"
                    );
                }
            }
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() || self.s3_region.is_none() {
                    anyhow::bail!("s3 storage backend requires S3_BUCKET and S3_REGION (or AWS_REGION)");
                }
            }
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }
}
