use thiserror::Error;

#[derive(Debug, Error)]
pub enum LabError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for LabError {
    fn from(err: std::io::Error) -> Self {
        LabError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for LabError {
    fn from(err: serde_json::Error) -> Self {
        LabError::Storage(err.to_string())
    }
}

impl From<rusqlite::Error> for LabError {
    fn from(err: rusqlite::Error) -> Self {
        LabError::Storage(err.to_string())
    }
}

/// Find the `LabError` behind an `anyhow::Error`, if there is one.
pub fn lab_error(err: &anyhow::Error) -> Option<&LabError> {
    err.chain().find_map(|cause| cause.downcast_ref::<LabError>())
}
