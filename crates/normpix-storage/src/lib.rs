//! Storage backends for normalized uploads.
//!
//! The pipeline is agnostic to where bytes land: everything downstream of the
//! intake talks to the [`Storage`] trait, which accepts a byte buffer and a
//! filename and reports back a storage key and a public URL. Backends are
//! selected at startup by [`factory::create_storage`].

mod factory;
#[cfg(feature = "storage-local")]
mod local;
#[cfg(feature = "storage-s3")]
mod s3;
mod traits;

pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageResult};

pub use normpix_core::StorageBackend;
