use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use serde_json::json;
use shared::{
    domain::{AspectRatio, Image, ImageId, NewImage},
    error::{GenerationError, StorageError},
    protocol::{GenerateRequest, Picture},
};
use storage::Storage;
use tokio::sync::{Mutex, Notify};

use crate::{
    Direction, GalleryEvent, ImageGenerator, ImageStore, SubmitMode, Workflow, WorkflowError,
};

/// Replays scripted results, then succeeds with a picture derived from the seed.
#[derive(Default)]
struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<Picture, GenerationError>>>,
    requests: Mutex<Vec<GenerateRequest>>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl ScriptedGenerator {
    fn succeeding() -> Self {
        Self::default()
    }

    fn scripted(results: Vec<Result<Picture, GenerationError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    /// Signals `entered` once a request arrives and waits for `release` before answering.
    fn gated(entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        Self {
            gate: Some((entered, release)),
            ..Self::default()
        }
    }

    async fn seeds(&self) -> Vec<u32> {
        self.requests.lock().await.iter().map(|r| r.seed).collect()
    }
}

fn picture_for(seed: u32) -> Picture {
    Picture::from_bytes("image/png", format!("png-for-seed-{seed}").as_bytes())
}

#[async_trait]
impl ImageGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerateRequest) -> Result<Picture, GenerationError> {
        self.requests.lock().await.push(request.clone());
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        match self.script.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(picture_for(request.seed)),
        }
    }
}

/// Store whose writes can be switched to fail.
struct FlakyStore {
    inner: Storage,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    fn new(inner: Storage) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
        }
    }

    fn check_writes(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Write("disk full".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageStore for FlakyStore {
    async fn list_all(&self) -> Result<Vec<Image>, StorageError> {
        self.inner.list_all().await
    }

    async fn insert(&self, image: &NewImage) -> Result<ImageId, StorageError> {
        self.check_writes()?;
        self.inner.insert(image).await
    }

    async fn update(&self, image: &Image) -> Result<(), StorageError> {
        self.check_writes()?;
        self.inner.update(image).await
    }

    async fn delete_by_id(&self, id: ImageId) -> Result<(), StorageError> {
        self.check_writes()?;
        self.inner.delete_by_id(id).await
    }
}

fn stored(id: i64, prompt: &str, seed: u32) -> Image {
    Image {
        id: ImageId(id),
        src: format!("data:image/png;base64,b3JpZ2luYWwt{id}"),
        prompt: prompt.to_string(),
        seed,
    }
}

async fn setup(generator: Arc<ScriptedGenerator>, existing: &[Image]) -> (Workflow, Storage) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    for image in existing {
        storage.update(image).await.expect("seed store");
    }
    let workflow = Workflow::new(Arc::new(storage.clone()), generator);
    workflow.hydrate().await.expect("hydrate");
    (workflow, storage)
}

#[tokio::test]
async fn batch_of_two_appends_both_and_selects_the_last() {
    let generator = Arc::new(ScriptedGenerator::succeeding());
    let (workflow, storage) = setup(generator.clone(), &[]).await;
    workflow.set_prompt("a fox in the snow").await;

    let outcome = workflow
        .submit("a fox in the snow", 2, AspectRatio::Square)
        .await
        .expect("submit");

    assert_eq!(outcome.mode, SubmitMode::Batch);
    assert!(outcome.is_success());
    assert_eq!(outcome.completed.len(), 2);

    let state = workflow.snapshot().await;
    assert_eq!(state.len(), 2);
    assert_eq!(state.selected_index(), 1);
    assert!(!state.is_loading());
    assert_eq!(state.prompt(), "");
    let gallery_ids: Vec<ImageId> = state.images().iter().map(|i| i.id).collect();
    assert_eq!(gallery_ids, outcome.completed);

    let mut stored_images = storage.list_all().await.expect("list");
    stored_images.sort_by_key(|i| i.id);
    assert_eq!(stored_images, state.images());

    let requests = generator.requests.lock().await;
    assert_eq!(requests.len(), 2);
    for (request, image) in requests.iter().zip(state.images()) {
        assert_eq!(request.width, 1024);
        assert_eq!(request.height, 1024);
        assert_eq!(request.num_inference_steps, 4);
        assert_eq!(request.prompt, "a fox in the snow");
        assert_eq!(request.seed, image.seed);
    }
}

#[tokio::test]
async fn failed_unit_does_not_abort_the_batch() {
    let generator = Arc::new(ScriptedGenerator::scripted(vec![
        Err(GenerationError::Network("connection reset".into())),
        Ok(picture_for(1)),
        Err(GenerationError::UnexpectedContentType(Some("text/html".into()))),
    ]));
    let (workflow, storage) = setup(generator.clone(), &[]).await;

    let outcome = workflow
        .submit("tide pools", 3, AspectRatio::Landscape)
        .await
        .expect("submit");

    assert_eq!(outcome.completed.len(), 1);
    let failed_units: Vec<u32> = outcome.failures.iter().map(|f| f.unit).collect();
    assert_eq!(failed_units, vec![1, 3]);
    assert!(matches!(
        outcome.failures[0].error,
        WorkflowError::Generation(GenerationError::Network(_))
    ));

    let state = workflow.snapshot().await;
    assert_eq!(state.len(), 1);
    assert_eq!(state.selected_index(), 0);
    assert!(!state.is_loading());
    assert_eq!(storage.count().await.expect("count"), 1);
    assert_eq!(generator.requests.lock().await.len(), 3);
    assert_eq!(generator.requests.lock().await[0].height, 768);
}

#[tokio::test]
async fn structured_payload_leaves_gallery_unchanged() {
    let generator = Arc::new(ScriptedGenerator::scripted(vec![Err(
        GenerationError::UnexpectedPayload(json!({ "error": "NSFW content detected" })),
    )]));
    let (workflow, storage) = setup(generator, &[stored(1, "a quiet street", 10)]).await;
    let before = workflow.snapshot().await;

    let outcome = workflow
        .submit("a noisy street", 1, AspectRatio::Square)
        .await
        .expect("submit");

    assert!(outcome.completed.is_empty());
    assert!(matches!(
        outcome.failures[0].error,
        WorkflowError::Generation(GenerationError::UnexpectedPayload(_))
    ));
    let after = workflow.snapshot().await;
    assert_eq!(after.images(), before.images());
    assert_eq!(after.selected_index(), before.selected_index());
    assert!(!after.is_loading());
    assert_eq!(storage.count().await.expect("count"), 1);
}

#[tokio::test]
async fn edit_regenerates_selected_image_in_place_with_its_seed() {
    let generator = Arc::new(ScriptedGenerator::succeeding());
    let (workflow, storage) = setup(
        generator.clone(),
        &[
            stored(3, "dog", 7),
            stored(5, "cat", 42),
            stored(8, "bird", 1),
        ],
    )
    .await;
    assert!(workflow.select(1).await);

    let session = workflow.begin_edit().await.expect("begin edit");
    assert_eq!(session.image_id, ImageId(5));
    assert_eq!(session.seed, 42);
    let editing = workflow.snapshot().await;
    assert_eq!(editing.editing_seed(), Some(42));
    assert_eq!(editing.prompt(), "cat");

    let outcome = workflow
        .submit("cat wearing a hat", 1, AspectRatio::Wide)
        .await
        .expect("submit");

    assert_eq!(outcome.mode, SubmitMode::Edit);
    assert_eq!(outcome.completed, vec![ImageId(5)]);

    let requests = generator.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].seed, 42);
    assert_eq!(requests[0].height, 576);

    let state = workflow.snapshot().await;
    assert_eq!(state.len(), 3);
    assert_eq!(state.selected_index(), 1);
    assert_eq!(state.editing_seed(), None);
    assert_eq!(state.prompt(), "");
    let edited = &state.images()[1];
    assert_eq!(edited.id, ImageId(5));
    assert_eq!(edited.prompt, "cat wearing a hat");
    assert_eq!(edited.seed, 42);
    assert_eq!(edited.src, picture_for(42).src);

    let persisted = storage.get(ImageId(5)).await.expect("get").expect("present");
    assert_eq!(&persisted, edited);
    assert_eq!(storage.count().await.expect("count"), 3);
}

#[tokio::test]
async fn failed_edit_still_leaves_edit_mode() {
    let generator = Arc::new(ScriptedGenerator::scripted(vec![Err(
        GenerationError::Network("timed out".into()),
    )]));
    let original = stored(5, "cat", 42);
    let (workflow, storage) = setup(generator, &[original.clone()]).await;

    workflow.begin_edit().await.expect("begin edit");
    let outcome = workflow
        .submit("cat in space", 1, AspectRatio::Square)
        .await
        .expect("submit");

    assert_eq!(outcome.failures.len(), 1);
    let state = workflow.snapshot().await;
    assert_eq!(state.editing_seed(), None);
    assert_eq!(state.prompt(), "");
    assert!(!state.is_loading());
    assert_eq!(state.images(), &[original.clone()]);
    assert_eq!(
        storage.get(ImageId(5)).await.expect("get"),
        Some(original)
    );
}

#[tokio::test]
async fn cancel_edit_returns_to_batch_mode() {
    let generator = Arc::new(ScriptedGenerator::succeeding());
    let (workflow, _storage) = setup(generator.clone(), &[stored(5, "cat", 42)]).await;

    workflow.begin_edit().await.expect("begin edit");
    workflow.cancel_edit().await;
    let outcome = workflow
        .submit("a new cat", 1, AspectRatio::Square)
        .await
        .expect("submit");

    assert_eq!(outcome.mode, SubmitMode::Batch);
    assert_eq!(workflow.snapshot().await.len(), 2);
}

#[tokio::test]
async fn retry_persists_the_freshly_drawn_seed() {
    let generator = Arc::new(ScriptedGenerator::succeeding());
    let (workflow, storage) = setup(
        generator.clone(),
        &[stored(5, "cat", 42), stored(6, "owl", 9)],
    )
    .await;
    workflow.select(0).await;

    let image = workflow.retry(AspectRatio::Portrait).await.expect("retry");

    let seeds = generator.seeds().await;
    assert_eq!(seeds.len(), 1);
    assert_eq!(image.id, ImageId(5));
    assert_eq!(image.prompt, "cat");
    assert_eq!(image.seed, seeds[0]);
    assert_eq!(image.src, picture_for(seeds[0]).src);
    assert_eq!(generator.requests.lock().await[0].height, 1365);

    let state = workflow.snapshot().await;
    assert_eq!(state.images()[0], image);
    assert_eq!(state.selected_index(), 0);
    assert!(!state.is_loading());
    assert_eq!(
        storage.get(ImageId(5)).await.expect("get"),
        Some(image)
    );
}

#[tokio::test]
async fn failed_retry_reports_error_and_keeps_image() {
    let generator = Arc::new(ScriptedGenerator::scripted(vec![Err(
        GenerationError::UnexpectedPayload(json!({ "detail": "queue full" })),
    )]));
    let original = stored(5, "cat", 42);
    let (workflow, storage) = setup(generator, &[original.clone()]).await;

    let err = workflow
        .retry(AspectRatio::Square)
        .await
        .expect_err("retry fails");

    assert!(matches!(
        err,
        WorkflowError::Generation(GenerationError::UnexpectedPayload(_))
    ));
    let state = workflow.snapshot().await;
    assert!(!state.is_loading());
    assert_eq!(state.images(), &[original.clone()]);
    assert_eq!(storage.get(ImageId(5)).await.expect("get"), Some(original));
}

#[tokio::test]
async fn deleting_the_last_image_empties_the_gallery() {
    let generator = Arc::new(ScriptedGenerator::succeeding());
    let (workflow, storage) = setup(generator, &[stored(5, "cat", 42)]).await;

    let deleted = workflow.delete_current().await.expect("delete");

    assert_eq!(deleted, ImageId(5));
    let state = workflow.snapshot().await;
    assert!(state.is_empty());
    assert_eq!(state.selected_index(), 0);
    assert_eq!(storage.count().await.expect("count"), 0);
}

#[tokio::test]
async fn deleting_moves_selection_to_previous_image() {
    let generator = Arc::new(ScriptedGenerator::succeeding());
    let (workflow, storage) = setup(
        generator,
        &[stored(1, "a", 1), stored(2, "b", 2), stored(3, "c", 3)],
    )
    .await;
    workflow.select(1).await;

    workflow.delete_current().await.expect("delete");

    let state = workflow.snapshot().await;
    assert_eq!(state.selected_index(), 0);
    let ids: Vec<i64> = state.images().iter().map(|i| i.id.0).collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(storage.get(ImageId(2)).await.expect("get"), None);
}

#[tokio::test]
async fn store_write_failures_leave_gallery_untouched() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.update(&stored(5, "cat", 42)).await.expect("seed");
    let store = Arc::new(FlakyStore::new(storage.clone()));
    let workflow = Workflow::new(store.clone(), Arc::new(ScriptedGenerator::succeeding()));
    workflow.hydrate().await.expect("hydrate");
    store.fail_writes.store(true, Ordering::SeqCst);

    let outcome = workflow
        .submit("another cat", 2, AspectRatio::Square)
        .await
        .expect("submit");
    assert!(outcome.completed.is_empty());
    assert_eq!(outcome.failures.len(), 2);
    assert!(matches!(
        outcome.failures[1].error,
        WorkflowError::Storage(StorageError::Write(_))
    ));

    let retry_err = workflow.retry(AspectRatio::Square).await.expect_err("retry");
    assert!(matches!(retry_err, WorkflowError::Storage(_)));

    let delete_err = workflow.delete_current().await.expect_err("delete");
    assert!(matches!(delete_err, WorkflowError::Storage(_)));

    let state = workflow.snapshot().await;
    assert_eq!(state.images(), &[stored(5, "cat", 42)]);
    assert!(!state.is_loading());
    assert_eq!(storage.list_all().await.expect("list"), vec![stored(5, "cat", 42)]);
}

#[tokio::test]
async fn operations_on_empty_gallery_require_a_selection() {
    let (workflow, _storage) = setup(Arc::new(ScriptedGenerator::succeeding()), &[]).await;

    assert!(matches!(
        workflow.begin_edit().await,
        Err(WorkflowError::NoSelection)
    ));
    assert!(matches!(
        workflow.retry(AspectRatio::Square).await,
        Err(WorkflowError::NoSelection)
    ));
    assert!(matches!(
        workflow.delete_current().await,
        Err(WorkflowError::NoSelection)
    ));
    assert!(!workflow.select_relative(Direction::Next).await);
}

#[tokio::test]
async fn rejects_empty_prompt_and_zero_quantity() {
    let generator = Arc::new(ScriptedGenerator::succeeding());
    let (workflow, _storage) = setup(generator.clone(), &[]).await;

    assert!(matches!(
        workflow.submit("   ", 1, AspectRatio::Square).await,
        Err(WorkflowError::EmptyPrompt)
    ));
    assert!(matches!(
        workflow.submit("a cat", 0, AspectRatio::Square).await,
        Err(WorkflowError::InvalidQuantity)
    ));
    assert!(generator.requests.lock().await.is_empty());
    assert!(!workflow.snapshot().await.is_loading());
}

#[tokio::test]
async fn second_operation_is_rejected_while_one_is_in_flight() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let generator = Arc::new(ScriptedGenerator::gated(entered.clone(), release.clone()));
    let (workflow, _storage) = setup(generator, &[stored(5, "cat", 42)]).await;
    let workflow = Arc::new(workflow);

    let running = {
        let workflow = Arc::clone(&workflow);
        tokio::spawn(async move { workflow.submit("slow cat", 1, AspectRatio::Square).await })
    };
    entered.notified().await;

    assert!(workflow.snapshot().await.is_loading());
    assert!(matches!(
        workflow.submit("impatient", 1, AspectRatio::Square).await,
        Err(WorkflowError::Busy)
    ));
    assert!(matches!(
        workflow.retry(AspectRatio::Square).await,
        Err(WorkflowError::Busy)
    ));
    assert!(matches!(
        workflow.delete_current().await,
        Err(WorkflowError::Busy)
    ));
    assert!(workflow.select(0).await, "navigation stays available");

    release.notify_one();
    let outcome = running.await.expect("join").expect("submit");
    assert_eq!(outcome.completed.len(), 1);
    let state = workflow.snapshot().await;
    assert_eq!(state.len(), 2);
    assert!(!state.is_loading());
}

#[tokio::test]
async fn observers_receive_workflow_events_in_order() {
    let (workflow, _storage) = setup(Arc::new(ScriptedGenerator::succeeding()), &[]).await;
    let mut events = workflow.subscribe();

    let outcome = workflow
        .submit("a lantern", 1, AspectRatio::Tall)
        .await
        .expect("submit");

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert_eq!(
        received,
        vec![
            GalleryEvent::LoadingChanged(true),
            GalleryEvent::ImageAdded {
                index: 0,
                image_id: outcome.completed[0],
            },
            GalleryEvent::LoadingChanged(false),
        ]
    );
}

#[tokio::test]
async fn hydrate_restores_insertion_order_and_selects_newest() {
    let (workflow, _storage) = setup(
        Arc::new(ScriptedGenerator::succeeding()),
        &[stored(9, "c", 3), stored(2, "a", 1), stored(4, "b", 2)],
    )
    .await;

    let state = workflow.snapshot().await;
    let prompts: Vec<&str> = state.images().iter().map(|i| i.prompt.as_str()).collect();
    assert_eq!(prompts, vec!["a", "b", "c"]);
    assert_eq!(state.selected_index(), 2);

    workflow.select_relative(Direction::Next).await;
    assert_eq!(workflow.snapshot().await.selected_index(), 0);
    workflow.select_relative(Direction::Previous).await;
    assert_eq!(workflow.snapshot().await.selected_index(), 2);
}
