use std::sync::Arc;

use normpix_core::Config;
use normpix_processing::{ImageEngine, UploadIntake};
use normpix_storage::Storage;

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: Config,
    pub engine: Arc<ImageEngine>,
    pub intake: Arc<UploadIntake>,
    pub storage: Arc<dyn Storage>,
}
