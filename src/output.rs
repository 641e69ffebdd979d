//! Output sink: hand captured bytes back to the caller or persist them.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// What a render call produced. Exactly one of buffer or path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutput {
    /// Captured image bytes, owned by the caller
    Buffer(Vec<u8>),
    /// Path the image was written to
    File(PathBuf),
}

impl RenderOutput {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RenderOutput::Buffer(b) => Some(b),
            RenderOutput::File(_) => None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            RenderOutput::Buffer(_) => None,
            RenderOutput::File(p) => Some(p),
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            RenderOutput::Buffer(b) => Some(b),
            RenderOutput::File(_) => None,
        }
    }
}

/// Return `bytes` as is, or write them to `destination` after creating
/// any missing parent directories.
pub async fn deliver(bytes: Vec<u8>, destination: Option<&Path>) -> Result<RenderOutput> {
    let Some(path) = destination else {
        return Ok(RenderOutput::Buffer(bytes));
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| Error::OutputError {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    tokio::fs::write(path, &bytes).await.map_err(|e| Error::OutputError {
        path: path.to_path_buf(),
        source: e,
    })?;
    log::debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(RenderOutput::File(path.to_path_buf()))
}
