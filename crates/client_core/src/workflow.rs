//! Generation workflow: turns user intents into generator calls and store writes
//! while keeping the gallery cache consistent with the store.

use std::sync::Arc;

use rand::Rng;
use shared::{
    domain::{
        AspectRatio, Dimensions, Image, ImageId, NewImage, DEFAULT_BASE_WIDTH, NUM_INFERENCE_STEPS,
    },
    protocol::GenerateRequest,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use crate::{
    gallery::{Direction, GalleryState},
    ImageGenerator, ImageStore, WorkflowError,
};

const EVENT_CAPACITY: usize = 64;

/// Notifications for observers of the gallery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GalleryEvent {
    Hydrated { count: usize },
    LoadingChanged(bool),
    EditModeChanged { seed: Option<u32> },
    SelectionChanged { index: usize },
    ImageAdded { index: usize, image_id: ImageId },
    ImageReplaced { index: usize, image_id: ImageId },
    ImageRemoved { index: usize, image_id: ImageId },
    UnitFailed { unit: u32, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    Batch,
    Edit,
}

#[derive(Debug, Clone)]
pub struct UnitFailure {
    /// 1-based position of the unit within its submission.
    pub unit: u32,
    pub error: WorkflowError,
}

/// Per-unit result of a `submit`. Failed units leave the gallery untouched.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub mode: SubmitMode,
    pub completed: Vec<ImageId>,
    pub failures: Vec<UnitFailure>,
}

impl SubmitOutcome {
    fn new(mode: SubmitMode) -> Self {
        Self {
            mode,
            completed: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    pub image_id: ImageId,
    pub prompt: String,
    pub seed: u32,
}

pub struct Workflow {
    store: Arc<dyn ImageStore>,
    generator: Arc<dyn ImageGenerator>,
    state: Mutex<GalleryState>,
    in_flight: Mutex<()>,
    events: broadcast::Sender<GalleryEvent>,
    base_width: u32,
}

impl Workflow {
    pub fn new(store: Arc<dyn ImageStore>, generator: Arc<dyn ImageGenerator>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            generator,
            state: Mutex::new(GalleryState::new()),
            in_flight: Mutex::new(()),
            events,
            base_width: DEFAULT_BASE_WIDTH,
        }
    }

    pub fn with_base_width(mut self, base_width: u32) -> Self {
        self.base_width = base_width;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GalleryEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> GalleryState {
        self.state.lock().await.clone()
    }

    /// Loads every stored image into the gallery, oldest first, selecting the newest.
    pub async fn hydrate(&self) -> Result<usize, WorkflowError> {
        let images = self.store.list_all().await.map_err(|err| {
            error!(error = %err, "gallery: failed to load stored images");
            err
        })?;
        let count = images.len();
        self.state.lock().await.hydrate(images);
        info!(count, "gallery: hydrated from store");
        self.emit(GalleryEvent::Hydrated { count });
        Ok(count)
    }

    pub async fn select(&self, index: usize) -> bool {
        let changed = self.state.lock().await.select(index);
        if changed {
            self.emit(GalleryEvent::SelectionChanged { index });
        }
        changed
    }

    pub async fn select_relative(&self, direction: Direction) -> bool {
        let mut state = self.state.lock().await;
        let changed = state.select_relative(direction);
        if changed {
            self.emit(GalleryEvent::SelectionChanged {
                index: state.selected_index(),
            });
        }
        changed
    }

    pub async fn set_prompt(&self, prompt: impl Into<String>) {
        self.state.lock().await.set_prompt(prompt);
    }

    /// Enters edit mode for the selected image: its prompt becomes the draft and
    /// its seed is reused by the next `submit`.
    pub async fn begin_edit(&self) -> Result<EditSession, WorkflowError> {
        let mut state = self.state.lock().await;
        let session = state
            .begin_edit()
            .map(|image| EditSession {
                image_id: image.id,
                prompt: image.prompt.clone(),
                seed: image.seed,
            })
            .ok_or(WorkflowError::NoSelection)?;
        info!(
            image_id = session.image_id.0,
            seed = session.seed,
            "workflow: entering edit mode"
        );
        self.emit(GalleryEvent::EditModeChanged {
            seed: Some(session.seed),
        });
        Ok(session)
    }

    pub async fn cancel_edit(&self) {
        let mut state = self.state.lock().await;
        if state.is_editing() {
            state.end_edit();
            state.clear_prompt();
            self.emit(GalleryEvent::EditModeChanged { seed: None });
        }
    }

    /// Generates `quantity` new images, or in edit mode regenerates the selected
    /// image in place with the pinned seed.
    pub async fn submit(
        &self,
        prompt: &str,
        quantity: u32,
        aspect: AspectRatio,
    ) -> Result<SubmitOutcome, WorkflowError> {
        let _guard = self.in_flight.try_lock().map_err(|_| WorkflowError::Busy)?;
        if prompt.trim().is_empty() {
            return Err(WorkflowError::EmptyPrompt);
        }
        let dims = Dimensions::from_aspect(aspect, self.base_width);

        let (editing_seed, selected) = {
            let state = self.state.lock().await;
            (state.editing_seed(), state.selected().map(|image| image.id))
        };

        match editing_seed {
            Some(seed) => {
                let Some(target) = selected else {
                    self.finish(true).await;
                    return Err(WorkflowError::NoSelection);
                };
                self.set_loading(true).await;
                let outcome = self.submit_edit(target, prompt, seed, dims).await;
                self.finish(true).await;
                Ok(outcome)
            }
            None => {
                if quantity == 0 {
                    return Err(WorkflowError::InvalidQuantity);
                }
                self.set_loading(true).await;
                let outcome = self.submit_batch(prompt, quantity, aspect, dims).await;
                self.finish(false).await;
                Ok(outcome)
            }
        }
    }

    async fn submit_batch(
        &self,
        prompt: &str,
        quantity: u32,
        aspect: AspectRatio,
        dims: Dimensions,
    ) -> SubmitOutcome {
        info!(
            quantity,
            %aspect,
            width = dims.width,
            height = dims.height,
            "workflow: starting batch"
        );
        let mut outcome = SubmitOutcome::new(SubmitMode::Batch);
        for unit in 1..=quantity {
            let seed = draw_seed();
            match self.generate_new(prompt, seed, dims).await {
                Ok(image_id) => {
                    info!(unit, image_id = image_id.0, seed, "workflow: image saved");
                    outcome.completed.push(image_id);
                }
                Err(err) => {
                    warn!(unit, quantity, seed, error = %err, "workflow: batch unit failed");
                    self.record_failure(&mut outcome, unit, err);
                }
            }
        }
        outcome
    }

    async fn submit_edit(
        &self,
        target: ImageId,
        prompt: &str,
        seed: u32,
        dims: Dimensions,
    ) -> SubmitOutcome {
        info!(image_id = target.0, seed, "workflow: editing image with stored seed");
        let mut outcome = SubmitOutcome::new(SubmitMode::Edit);
        match self.regenerate_in_place(target, prompt, seed, dims).await {
            Ok(image) => outcome.completed.push(image.id),
            Err(err) => {
                warn!(image_id = target.0, error = %err, "workflow: edit failed");
                self.record_failure(&mut outcome, 1, err);
            }
        }
        outcome
    }

    /// Regenerates the selected image's prompt with a fresh seed and replaces it in place.
    ///
    /// The drawn seed is persisted with the new picture so the stored seed always
    /// reproduces what the gallery shows.
    pub async fn retry(&self, aspect: AspectRatio) -> Result<Image, WorkflowError> {
        let _guard = self.in_flight.try_lock().map_err(|_| WorkflowError::Busy)?;
        let (target, prompt) = {
            let state = self.state.lock().await;
            state
                .selected()
                .map(|image| (image.id, image.prompt.clone()))
                .ok_or(WorkflowError::NoSelection)?
        };
        if prompt.trim().is_empty() {
            return Err(WorkflowError::EmptyPrompt);
        }

        let dims = Dimensions::from_aspect(aspect, self.base_width);
        let seed = draw_seed();
        info!(image_id = target.0, seed, %aspect, "workflow: retrying image");

        self.set_loading(true).await;
        let result = self.regenerate_in_place(target, &prompt, seed, dims).await;
        self.set_loading(false).await;

        if let Err(err) = &result {
            warn!(image_id = target.0, error = %err, "workflow: retry failed");
        }
        result
    }

    /// Deletes the selected image from the store, then from the gallery.
    pub async fn delete_current(&self) -> Result<ImageId, WorkflowError> {
        let _guard = self.in_flight.try_lock().map_err(|_| WorkflowError::Busy)?;
        let target = self
            .state
            .lock()
            .await
            .selected()
            .map(|image| image.id)
            .ok_or(WorkflowError::NoSelection)?;

        if let Err(err) = self.store.delete_by_id(target).await {
            warn!(image_id = target.0, error = %err, "workflow: delete failed");
            return Err(err.into());
        }

        let mut state = self.state.lock().await;
        if let Some(index) = state.position_of(target) {
            state.remove_at(index);
            self.emit(GalleryEvent::ImageRemoved {
                index,
                image_id: target,
            });
        }
        info!(
            image_id = target.0,
            remaining = state.len(),
            "workflow: image deleted"
        );
        Ok(target)
    }

    async fn generate_new(
        &self,
        prompt: &str,
        seed: u32,
        dims: Dimensions,
    ) -> Result<ImageId, WorkflowError> {
        let picture = self
            .generator
            .generate(&generate_request(prompt, seed, dims))
            .await?;
        let image = NewImage {
            src: picture.src,
            prompt: prompt.to_string(),
            seed,
        };
        let image_id = self.store.insert(&image).await?;

        let index = self.state.lock().await.append(image.with_id(image_id));
        self.emit(GalleryEvent::ImageAdded { index, image_id });
        Ok(image_id)
    }

    async fn regenerate_in_place(
        &self,
        target: ImageId,
        prompt: &str,
        seed: u32,
        dims: Dimensions,
    ) -> Result<Image, WorkflowError> {
        let picture = self
            .generator
            .generate(&generate_request(prompt, seed, dims))
            .await?;
        let image = Image {
            id: target,
            src: picture.src,
            prompt: prompt.to_string(),
            seed,
        };
        self.store.update(&image).await?;

        let mut state = self.state.lock().await;
        if let Some(index) = state.position_of(target) {
            state.replace_at(index, image.clone());
            self.emit(GalleryEvent::ImageReplaced {
                index,
                image_id: target,
            });
        }
        Ok(image)
    }

    fn record_failure(&self, outcome: &mut SubmitOutcome, unit: u32, error: WorkflowError) {
        self.emit(GalleryEvent::UnitFailed {
            unit,
            message: error.to_string(),
        });
        outcome.failures.push(UnitFailure { unit, error });
    }

    async fn set_loading(&self, loading: bool) {
        self.state.lock().await.set_loading(loading);
        self.emit(GalleryEvent::LoadingChanged(loading));
    }

    /// Returns to idle: clears the draft prompt and loading flag, and leaves edit mode if asked.
    async fn finish(&self, leave_edit: bool) {
        let mut state = self.state.lock().await;
        state.clear_prompt();
        if leave_edit && state.is_editing() {
            state.end_edit();
            self.emit(GalleryEvent::EditModeChanged { seed: None });
        }
        if state.is_loading() {
            state.set_loading(false);
            self.emit(GalleryEvent::LoadingChanged(false));
        }
    }

    fn emit(&self, event: GalleryEvent) {
        let _ = self.events.send(event);
    }
}

fn draw_seed() -> u32 {
    rand::thread_rng().gen()
}

fn generate_request(prompt: &str, seed: u32, dims: Dimensions) -> GenerateRequest {
    GenerateRequest {
        prompt: prompt.to_string(),
        width: dims.width,
        height: dims.height,
        num_inference_steps: NUM_INFERENCE_STEPS,
        seed,
    }
}
