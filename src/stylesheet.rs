//! Loading the transformation once per run.

use crate::error::PipelineError;
use cei2tei_xslt::Stylesheet;
use log::info;
use std::path::Path;
use std::sync::Arc;

/// Reads and compiles the stylesheet at `path`.
///
/// Every failure (missing or unreadable file, malformed XML, an unsupported
/// instruction, a bad XPath) is a configuration error naming the path, because
/// without a stylesheet no document can be processed.
pub fn load(path: &Path) -> Result<Arc<Stylesheet>, PipelineError> {
    let stylesheet = Stylesheet::load(path)
        .map_err(|e| PipelineError::config(format!("stylesheet '{}': {}", path.display(), e)))?;
    info!("Loaded stylesheet '{}'.", path.display());
    Ok(Arc::new(stylesheet))
}
