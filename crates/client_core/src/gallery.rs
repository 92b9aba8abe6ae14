//! In-memory gallery model: ordered images, a selection cursor and transient workflow flags.

use shared::domain::{Image, ImageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Cache of the persisted gallery. Only the workflow mutates the live copy;
/// everyone else reads clones handed out by `Workflow::snapshot`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GalleryState {
    images: Vec<Image>,
    selected_index: usize,
    loading: bool,
    editing_seed: Option<u32>,
    prompt: String,
}

impl GalleryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents with stored records in insertion (id) order and selects the newest.
    pub fn hydrate(&mut self, mut images: Vec<Image>) {
        images.sort_by_key(|image| image.id);
        self.selected_index = images.len().saturating_sub(1);
        self.images = images;
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn selected_index(&self) -> usize {
        self.selected_index
    }

    pub fn selected(&self) -> Option<&Image> {
        self.images.get(self.selected_index)
    }

    pub fn position_of(&self, id: ImageId) -> Option<usize> {
        self.images.iter().position(|image| image.id == id)
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn editing_seed(&self) -> Option<u32> {
        self.editing_seed
    }

    pub fn is_editing(&self) -> bool {
        self.editing_seed.is_some()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn select(&mut self, index: usize) -> bool {
        if index < self.images.len() {
            self.selected_index = index;
            true
        } else {
            false
        }
    }

    /// Circular navigation; no-op on an empty gallery.
    pub fn select_relative(&mut self, direction: Direction) -> bool {
        let len = self.images.len();
        if len == 0 {
            return false;
        }
        self.selected_index = match direction {
            Direction::Next => (self.selected_index + 1) % len,
            Direction::Previous => (self.selected_index + len - 1) % len,
        };
        true
    }

    pub fn append(&mut self, image: Image) -> usize {
        self.images.push(image);
        self.selected_index = self.images.len() - 1;
        self.selected_index
    }

    pub fn replace_at(&mut self, index: usize, image: Image) -> bool {
        match self.images.get_mut(index) {
            Some(slot) => {
                *slot = image;
                true
            }
            None => false,
        }
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Image> {
        if index >= self.images.len() {
            return None;
        }
        let removed = self.images.remove(index);
        if self.images.is_empty() {
            self.selected_index = 0;
        } else {
            if index <= self.selected_index {
                self.selected_index = self.selected_index.saturating_sub(1);
            }
            self.selected_index = self.selected_index.min(self.images.len() - 1);
        }
        Some(removed)
    }

    pub(crate) fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    pub(crate) fn begin_edit(&mut self) -> Option<&Image> {
        let image = self.images.get(self.selected_index)?;
        self.prompt = image.prompt.clone();
        self.editing_seed = Some(image.seed);
        Some(image)
    }

    pub(crate) fn end_edit(&mut self) {
        self.editing_seed = None;
    }

    pub(crate) fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub(crate) fn clear_prompt(&mut self) {
        self.prompt.clear();
    }
}
