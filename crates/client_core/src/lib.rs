use async_trait::async_trait;
use shared::{
    domain::{Image, ImageId, NewImage},
    error::{GenerationError, StorageError},
    protocol::{GenerateRequest, Picture},
};
use storage::Storage;

pub mod error;
pub mod gallery;
mod generation;
mod workflow;

pub use error::WorkflowError;
pub use gallery::{Direction, GalleryState};
pub use generation::GenerationClient;
pub use workflow::{EditSession, GalleryEvent, SubmitMode, SubmitOutcome, UnitFailure, Workflow};

/// Remote picture synthesis, one request per call.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<Picture, GenerationError>;
}

/// Durable image records keyed by store-assigned ids.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn list_all(&self) -> Result<Vec<Image>, StorageError>;
    async fn insert(&self, image: &NewImage) -> Result<ImageId, StorageError>;
    /// Overwrites by id; a missing id is inserted at that id.
    async fn update(&self, image: &Image) -> Result<(), StorageError>;
    /// Deleting a missing id succeeds.
    async fn delete_by_id(&self, id: ImageId) -> Result<(), StorageError>;
}

#[async_trait]
impl ImageStore for Storage {
    async fn list_all(&self) -> Result<Vec<Image>, StorageError> {
        Storage::list_all(self).await
    }

    async fn insert(&self, image: &NewImage) -> Result<ImageId, StorageError> {
        Storage::insert(self, image).await
    }

    async fn update(&self, image: &Image) -> Result<(), StorageError> {
        Storage::update(self, image).await
    }

    async fn delete_by_id(&self, id: ImageId) -> Result<(), StorageError> {
        Storage::delete_by_id(self, id).await
    }
}

#[cfg(test)]
#[path = "tests/generation_tests.rs"]
mod generation_tests;

#[cfg(test)]
#[path = "tests/workflow_tests.rs"]
mod workflow_tests;
