//! Document persistence

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::types::ConfigurationDocument;
use crate::error::Result;

/// Well-known file the runtime reads its configuration from.
///
/// Every session rewrites it before creating its application; the last writer
/// wins.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    path: PathBuf,
}

impl DocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the document, replacing any previous one in a single rename
    pub fn write(&self, document: &ConfigurationDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut text = document.to_json_pretty()?;
        text.push('\n');

        let staging = self.staging_path();
        fs::write(&staging, text)?;
        fs::rename(&staging, &self.path)?;

        debug!(
            "Wrote configuration document to {} (routing: {:?})",
            self.path.display(),
            document.routing
        );
        Ok(())
    }

    pub fn read(&self) -> Result<ConfigurationDocument> {
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
