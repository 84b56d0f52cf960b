// Request records - JSON copies of each request, keyed by container id

use crate::provision::ProvisionRequest;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("no saved request for container {id} (looked in {path}); pass --config")]
    NotFound { id: u32, path: PathBuf },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request: ProvisionRequest,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

pub fn config_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("GameServerLxc")
        .join("config")
}

pub fn record_path(dir: &Path, container_id: u32) -> PathBuf {
    dir.join(format!("{}.json", container_id))
}

pub fn save_record(dir: &Path, request: &ProvisionRequest) -> Result<PathBuf, RecordError> {
    std::fs::create_dir_all(dir).map_err(|e| RecordError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let path = record_path(dir, request.container_id);
    let record = RequestRecord {
        request: request.clone(),
        saved_at: chrono::Utc::now(),
    };
    let content = serde_json::to_string_pretty(&record).map_err(|e| RecordError::Parse {
        path: path.clone(),
        source: e,
    })?;
    std::fs::write(&path, content).map_err(|e| RecordError::Io {
        path: path.clone(),
        source: e,
    })?;
    Ok(path)
}

pub fn load_record(dir: &Path, container_id: u32) -> Result<RequestRecord, RecordError> {
    let path = record_path(dir, container_id);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RecordError::NotFound {
                id: container_id,
                path,
            })
        }
        Err(e) => return Err(RecordError::Io { path, source: e }),
    };
    serde_json::from_str(&content).map_err(|e| RecordError::Parse { path, source: e })
}

/// Read a bare `ProvisionRequest` from a JSON file.
pub fn load_request_file(path: &Path) -> Result<ProvisionRequest, RecordError> {
    let content = std::fs::read_to_string(path).map_err(|e| RecordError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| RecordError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}
