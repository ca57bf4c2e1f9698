use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use parley_shared::types::FileHandle;

use crate::error::ServerError;
use crate::ports::FileStore;

/// Resolve `name` under `base`, rejecting anything that would escape it.
fn resolve_within(base: &Path, name: &str) -> Result<PathBuf, ServerError> {
    let mut resolved = base.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            _ => {
                return Err(ServerError::BadRequest(
                    "Path traversal detected".to_string(),
                ));
            }
        }
    }
    if resolved == base {
        return Err(ServerError::BadRequest("Empty file name".to_string()));
    }
    Ok(resolved)
}

/// Attachment store keeping one file per handle under a base directory.
///
/// The original file name is kept with the message record, not on disk.
#[derive(Debug, Clone)]
pub struct DiskFileStore {
    base_path: PathBuf,
    max_size: usize,
}

impl DiskFileStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::FileStorage(format!(
                "Failed to create file directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "File store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, handle: FileHandle) -> Result<PathBuf, ServerError> {
        resolve_within(&self.base_path, &handle.to_string())
    }
}

#[async_trait]
impl FileStore for DiskFileStore {
    async fn store(&self, data: &[u8], original_name: &str) -> Result<FileHandle, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty file".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::FileTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let handle = FileHandle::new();
        let path = self.path_for(handle)?;

        fs::write(&path, data).await.map_err(|e| {
            ServerError::FileStorage(format!("Failed to write file {}: {}", handle, e))
        })?;

        debug!(handle = %handle, name = original_name, size = data.len(), "Stored file");
        Ok(handle)
    }

    async fn load(&self, handle: FileHandle) -> Result<Vec<u8>, ServerError> {
        let path = self.path_for(handle)?;

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ServerError::FileNotFound(handle));
            }
            Err(e) => {
                return Err(ServerError::FileStorage(format!(
                    "Failed to read file {}: {}",
                    handle, e
                )));
            }
        };

        debug!(handle = %handle, size = data.len(), "Loaded file");
        Ok(data)
    }
}
