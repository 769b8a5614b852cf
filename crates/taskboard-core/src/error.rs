use thiserror::Error;

/// Failures surfaced by the task store and its collaborators.
///
/// Validation, not-found and invalid-state errors are raised before any
/// mutation. A persistence error is raised after the in-memory collection
/// already changed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("task not found: {0}")]
    NotFound(u64),

    #[error("task {id} cannot be changed: {reason}")]
    InvalidState { id: u64, reason: String },

    #[error("storage key '{key}' failed: {reason}")]
    Persistence { key: String, reason: String },

    #[error("{}", import_message(*index, reason))]
    Import {
        index: Option<usize>,
        reason: String,
    },
}

impl StoreError {
    pub fn persistence(key: &str, reason: impl ToString) -> Self {
        Self::Persistence {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn import(index: Option<usize>, reason: impl ToString) -> Self {
        Self::Import {
            index,
            reason: reason.to_string(),
        }
    }

    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}

fn import_message(index: Option<usize>, reason: &str) -> String {
    match index {
        Some(idx) => format!("import failed at record {}: {reason}", idx + 1),
        None => format!("import failed: {reason}"),
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
