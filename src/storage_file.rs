use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::error::PersistenceError;
use crate::storage::Store;
use crate::types::TopicMap;

/// Stores topics as a JSON object in a single file.
///
/// Layout: `{ "topic": ["https://a.example/", ...], ... }`.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
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
impl Store for FileStore {
    async fn load(&self) -> Result<TopicMap, PersistenceError> {
        let contents = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                fs::write(&self.path, b"").await?;
                tracing::debug!(path = %self.path.display(), "Created empty topic file");
                return Ok(TopicMap::new());
            }
            Err(err) => return Err(err.into()),
        };

        if contents.iter().all(u8::is_ascii_whitespace) {
            return Ok(TopicMap::new());
        }

        Ok(serde_json::from_slice(&contents)?)
    }

    async fn persist(&self, topics: &TopicMap) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(topics)?;
        let temp = self.temp_path();

        fs::write(&temp, &json).await?;
        fs::rename(&temp, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            topics = topics.len(),
            "Persisted topics to file"
        );
        Ok(())
    }
}
