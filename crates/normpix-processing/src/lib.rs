//! Media ingestion and normalization pipeline.
//!
//! Uploaded images in formats that downstream consumers cannot reliably
//! display (camera RAW, HEIC/HEIF, SVG, JP2K, TIFF, WEBP) are normalized to a
//! canonical JPEG before their bytes reach storage. The pipeline is built
//! around a process-wide [`ImageEngine`] with a strict lifecycle
//! (`Uninitialized → Ready → ShuttingDown → Terminated`): initialization and
//! shutdown each happen exactly once no matter how many callers race them,
//! and every conversion holds a ticket that shutdown drains before releasing
//! engine resources.
//!
//! Flow: [`UploadIntake`] receives a file → [`FormatPolicy`] decides
//! pass-through vs. normalization → [`JpegConverter`] decodes, auto-rotates,
//! flattens alpha onto white, and re-encodes → bytes and the derived `.jpg`
//! filename go to the storage collaborator.

pub mod classify;
pub mod convert;
pub mod engine;
pub mod error;
pub mod intake;

pub use classify::{FormatDecision, FormatPolicy};
pub use convert::{ConversionRequest, ConversionResult, JpegConverter};
pub use engine::{ConversionTicket, EngineSettings, EngineState, ImageEngine};
pub use error::{ConversionError, EngineError, IntakeError};
pub use intake::{StoredLocation, UploadIntake, UploadedFile};
