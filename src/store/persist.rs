use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, trace};

use crate::store::WatchedResource;

/// Durable home for the watch list.  The store always hands over the complete list, so
/// implementations simply overwrite whatever they held before.
#[async_trait]
pub trait StateBackend: Send + Sync + 'static {
    async fn load(&self) -> Result<Vec<WatchedResource>, StoreError>;

    async fn save(&self, resources: &[WatchedResource]) -> Result<(), StoreError>;
}

/// Failure to read or write the durable copy of the watch list.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("state I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed state: {0}")]
    Serialization(#[from] serde_json::Error),

    /// For [`StateBackend`] implementations outside this crate whose storage is neither a
    /// local file nor JSON, e.g. a remote key-value service that cannot be reached.
    #[error("state backend unavailable: {0}")]
    Unavailable(String),
}

/// Stores the list as a JSON array of `{url, lastValue, watchers}` records.  A missing file
/// is treated as an empty list.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateBackend for JsonFileBackend {
    async fn load(&self) -> Result<Vec<WatchedResource>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No state at {:?}, starting empty", self.path);
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, resources: &[WatchedResource]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(resources)?;
        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, &bytes).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        trace!("Wrote {} resource(s) to {:?}", resources.len(), self.path);
        Ok(())
    }
}
