use std::{fmt::Write as _, path::PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use client_core::{GalleryState, SubmitMode, SubmitOutcome, Workflow};
use shared::{domain::AspectRatio, protocol::decode_data_url};

const PROMPT_PREVIEW_CHARS: usize = 60;

/// Turns a 1-based gallery position into an index, rejecting anything out of range.
pub fn to_index(position: usize, len: usize) -> Result<usize> {
    if len == 0 {
        bail!("the gallery is empty");
    }
    if position == 0 || position > len {
        bail!("no image #{position}; choose 1..={len}");
    }
    Ok(position - 1)
}

pub async fn select_position(workflow: &Workflow, position: usize) -> Result<()> {
    let len = workflow.snapshot().await.len();
    let index = to_index(position, len)?;
    workflow.select(index).await;
    Ok(())
}

pub fn render_list(state: &GalleryState) -> String {
    if state.is_empty() {
        return "gallery is empty\n".to_string();
    }
    let mut out = String::new();
    for (index, image) in state.images().iter().enumerate() {
        let marker = if index == state.selected_index() { '*' } else { ' ' };
        let _ = writeln!(
            out,
            "{marker} #{:<3} id={:<5} seed={:<10} {}",
            index + 1,
            image.id,
            image.seed,
            preview(&image.prompt)
        );
    }
    out
}

pub fn describe_selected(state: &GalleryState) -> String {
    match state.selected() {
        Some(image) => format!(
            "#{} id={} seed={}\n{}",
            state.selected_index() + 1,
            image.id,
            image.seed,
            image.prompt
        ),
        None => "no image is selected".to_string(),
    }
}

pub fn describe_outcome(outcome: &SubmitOutcome) -> String {
    let verb = match outcome.mode {
        SubmitMode::Batch => "generated",
        SubmitMode::Edit => "edited",
    };
    let attempted = outcome.completed.len() + outcome.failures.len();
    let mut out = format!("{verb} {}/{attempted}", outcome.completed.len());
    if !outcome.completed.is_empty() {
        let ids: Vec<String> = outcome.completed.iter().map(ToString::to_string).collect();
        let _ = write!(out, " (ids {})", ids.join(", "));
    }
    for failure in &outcome.failures {
        let _ = write!(out, "\n  unit {} failed: {}", failure.unit, failure.error);
    }
    out
}

/// Fails only when no unit of the submission succeeded.
pub fn ensure_progress(outcome: &SubmitOutcome) -> Result<()> {
    if outcome.completed.is_empty() {
        if let Some(failure) = outcome.failures.first() {
            return Err(anyhow!(failure.error.clone())).context("nothing was generated");
        }
    }
    Ok(())
}

/// Selects `position`, enters edit mode and regenerates it with the stored seed.
pub async fn edit_at(
    workflow: &Workflow,
    position: usize,
    prompt: Option<&str>,
    aspect: AspectRatio,
) -> Result<SubmitOutcome> {
    select_position(workflow, position).await?;
    let session = workflow.begin_edit().await?;
    let prompt = prompt.unwrap_or(&session.prompt);
    match workflow.submit(prompt, 1, aspect).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            workflow.cancel_edit().await;
            Err(err.into())
        }
    }
}

/// Writes the selected picture to `out`, or `image-<position>.<ext>` in the working directory.
pub async fn export_selected(
    workflow: &Workflow,
    position: usize,
    out: Option<PathBuf>,
) -> Result<PathBuf> {
    let state = workflow.snapshot().await;
    let image = state
        .selected()
        .ok_or_else(|| anyhow!("no image is selected"))?;
    let (mime, bytes) = decode_data_url(&image.src)
        .with_context(|| format!("image id {} has an unreadable picture", image.id))?;
    let path = out
        .unwrap_or_else(|| PathBuf::from(format!("image-{position}.{}", extension_for(&mime))));
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("failed to write '{}'", path.display()))?;
    Ok(path)
}

pub fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

fn preview(prompt: &str) -> String {
    let mut chars = prompt.chars();
    let head: String = chars.by_ref().take(PROMPT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
