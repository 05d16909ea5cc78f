//! Extension-based format classification.
//!
//! The decision is made from the client-supplied filename, before any bytes
//! are decoded. Unknown or missing extensions pass through untouched; only
//! extensions on the normalization list are re-encoded.

use std::path::Path;

/// What intake should do with an uploaded file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatDecision {
    /// Store the bytes exactly as received.
    PassThrough,
    /// Re-encode to JPEG before storing.
    NeedsNormalization,
}

/// Formats normalized by default. Matches what typical browsers fail to
/// render inline plus containers that routinely carry camera output.
pub const DEFAULT_NORMALIZE_EXTENSIONS: [&str; 7] =
    ["dng", "heic", "heif", "svg", "jp2k", "tiff", "webp"];

/// Case-insensitive allow-list of extensions that trigger normalization.
#[derive(Clone, Debug)]
pub struct FormatPolicy {
    normalize_extensions: Vec<String>,
}

impl Default for FormatPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_NORMALIZE_EXTENSIONS.iter().map(|e| e.to_string()))
    }
}

impl FormatPolicy {
    pub fn new(extensions: impl IntoIterator<Item = String>) -> Self {
        Self {
            normalize_extensions: extensions
                .into_iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, filename: &str) -> FormatDecision {
        match Path::new(filename).extension().and_then(|e| e.to_str()) {
            Some(ext)
                if self
                    .normalize_extensions
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(ext)) =>
            {
                FormatDecision::NeedsNormalization
            }
            _ => FormatDecision::PassThrough,
        }
    }
}
