//! Upload intake.
//!
//! Gatekeeper in front of the converter and the storage backend. Order of
//! operations is fixed: size gate first, then classification, then (only for
//! formats on the normalization list) engine admission and conversion, then
//! storage. A file that fails the size gate never touches the engine.
//!
//! A listed format whose container no decoder recognizes (HEIC, SVG and the
//! like) is stored verbatim under its original name instead of being
//! rejected; only containers the decoder identifies but cannot decode are a
//! client error.

use std::sync::Arc;

use normpix_storage::Storage;

use crate::classify::{FormatDecision, FormatPolicy};
use crate::convert::JpegConverter;
use crate::engine::ImageEngine;
use crate::error::IntakeError;

/// An upload as received from the transport layer.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub data: Vec<u8>,
    pub filename: String,
    /// Size the transport observed. Checked against the ceiling before any
    /// processing; for buffered bodies this equals `data.len()`.
    pub declared_size: u64,
}

impl UploadedFile {
    pub fn new(data: Vec<u8>, filename: impl Into<String>) -> Self {
        let declared_size = data.len() as u64;
        Self {
            data,
            filename: filename.into(),
            declared_size,
        }
    }
}

/// Where an accepted upload ended up.
#[derive(Clone, Debug)]
pub struct StoredLocation {
    pub storage_key: String,
    pub url: String,
}

pub struct UploadIntake {
    engine: Arc<ImageEngine>,
    policy: FormatPolicy,
    converter: JpegConverter,
    storage: Arc<dyn Storage>,
    max_upload_bytes: u64,
}

impl UploadIntake {
    pub fn new(
        engine: Arc<ImageEngine>,
        policy: FormatPolicy,
        converter: JpegConverter,
        storage: Arc<dyn Storage>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            engine,
            policy,
            converter,
            storage,
            max_upload_bytes,
        }
    }

    /// Accept one upload and return its stored location.
    pub async fn receive(&self, file: UploadedFile) -> Result<StoredLocation, IntakeError> {
        if file.declared_size > self.max_upload_bytes {
            return Err(IntakeError::TooLarge {
                size: file.declared_size,
                max: self.max_upload_bytes,
            });
        }

        let (data, filename) = match self.policy.classify(&file.filename) {
            FormatDecision::PassThrough => (file.data, file.filename),
            FormatDecision::NeedsNormalization if image::guess_format(&file.data).is_err() => {
                // No decoder recognizes this container. Storing the original
                // bytes beats rejecting every upload of the format.
                tracing::warn!(
                    filename = %file.filename,
                    size_bytes = file.data.len(),
                    "No decoder for this container; storing original bytes"
                );
                (file.data, file.filename)
            }
            FormatDecision::NeedsNormalization => {
                let ticket = self
                    .engine
                    .clone()
                    .begin_conversion()
                    .await
                    .map_err(|_| IntakeError::EngineNotReady)?;
                let request = self.converter.request(file.data, &file.filename);
                let result = self.converter.convert_to_jpeg(ticket, request).await?;
                tracing::info!(
                    original = %file.filename,
                    converted = %result.filename,
                    size_bytes = result.data.len(),
                    "Normalized upload to JPEG"
                );
                (result.data, result.filename)
            }
        };

        let safe_name = sanitize_filename(&filename);
        let content_type = content_type_for(&safe_name);
        let (storage_key, url) = self.storage.upload(&safe_name, content_type, data).await?;

        Ok(StoredLocation { storage_key, url })
    }
}

/// Strip path components and characters that are unsafe in storage keys.
/// Keeps alphanumerics, dots, dashes and underscores; everything else
/// becomes an underscore.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);

    let mut sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    while sanitized.contains("..") {
        sanitized = sanitized.replace("..", "_");
    }

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.' || c == '_') {
        sanitized = "upload".to_string();
    }

    sanitized
}

fn content_type_for(filename: &str) -> &'static str {
    let extension = filename
        .rsplit('.')
        .next()
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("tiff" | "tif") => "image/tiff",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        _ => "application/octet-stream",
    }
}
