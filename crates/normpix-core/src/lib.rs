//! Shared configuration and types for the normpix media pipeline.

pub mod config;
pub mod storage_types;

pub use config::Config;
pub use storage_types::StorageBackend;
