use shared::error::{GenerationError, StorageError};
use thiserror::Error;

/// Errors reported by the workflow entry points.
///
/// The first four are precondition failures returned before any state change.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    #[error("another generation workflow is already in flight")]
    Busy,
    #[error("no image is selected")]
    NoSelection,
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("quantity must be at least 1")]
    InvalidQuantity,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}
