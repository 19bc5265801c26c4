use biome_protocol::{EssentialKind, ErrorCode};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

pub type BiomeResult<T> = Result<T, BiomeError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiomeError {
    pub code: ErrorCode,
    pub message: String,
}

impl BiomeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn admission(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Admission, message)
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Consistency, message)
    }

    pub fn missing_prerequisite(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MissingPrerequisite, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unsupported, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Io, message)
    }

    /// Ids that are not present on the axis an operation targets.
    pub fn unknown_ids(kind: EssentialKind, axis: &str, ids: &[String]) -> Self {
        let shown: Vec<&str> = ids.iter().take(5).map(String::as_str).collect();
        let suffix = if ids.len() > shown.len() { ", ..." } else { "" };
        Self::invalid_input(format!(
            "{kind}: invalid {axis} ids are provided: {}{suffix}",
            shown.join(", ")
        ))
    }
}

impl fmt::Display for BiomeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl Error for BiomeError {}

impl From<std::io::Error> for BiomeError {
    fn from(err: std::io::Error) -> Self {
        BiomeError::io(err.to_string())
    }
}

impl From<csv::Error> for BiomeError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            BiomeError::io(err.to_string())
        } else {
            BiomeError::invalid_input(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BiomeError {
    fn from(err: serde_json::Error) -> Self {
        BiomeError::invalid_input(err.to_string())
    }
}

impl From<anyhow::Error> for BiomeError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<std::io::Error>() {
            Some(_) => BiomeError::io(format!("{err:#}")),
            None => BiomeError::invalid_input(format!("{err:#}")),
        }
    }
}
