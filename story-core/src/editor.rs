use tracing::debug;

use crate::content::to_editable_rich_form;
use crate::error::{StoryError, StoryResult};

/// "Image inserted at position P", as reported by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInsertion {
    pub position: usize,
}

/// Caller-side view of the rich editor: its content, the image insertion
/// events it reported and whether a save is in flight.
#[derive(Debug, Default)]
pub struct EditorSession {
    content: Option<String>,
    insertions: Vec<ImageInsertion>,
    saving: bool,
}

impl EditorSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads stored content into the editor. Only an empty or uninitialized
    /// editor is written to; otherwise the cursor would jump. Returns whether
    /// the content was loaded.
    pub fn load(&mut self, stored: &str) -> bool {
        let occupied = self
            .content
            .as_deref()
            .is_some_and(|current| !current.trim().is_empty());
        if occupied {
            debug!("editor already holds content; skipping normalization");
            return false;
        }
        self.content = Some(to_editable_rich_form(stored));
        true
    }

    pub fn content(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = Some(content.into());
    }

    pub fn on_image_inserted(&mut self, position: usize) -> ImageInsertion {
        let insertion = ImageInsertion { position };
        self.insertions.push(insertion);
        insertion
    }

    /// Insertion events not yet handed to the illustration tracker.
    pub fn take_insertions(&mut self) -> Vec<ImageInsertion> {
        std::mem::take(&mut self.insertions)
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    /// Marks a save as in flight until the returned guard is dropped. Saves
    /// and restores both require the guard, so they cannot interleave.
    pub fn begin_save(&mut self) -> StoryResult<SaveGuard<'_>> {
        if self.saving {
            return Err(StoryError::validation("A save is already in progress"));
        }
        self.saving = true;
        Ok(SaveGuard {
            saving: &mut self.saving,
        })
    }
}

#[derive(Debug)]
pub struct SaveGuard<'a> {
    saving: &'a mut bool,
}

impl Drop for SaveGuard<'_> {
    fn drop(&mut self) {
        *self.saving = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_normalizes_into_empty_editor() {
        let mut session = EditorSession::new();
        assert!(session.load("One\n\nTwo"));
        assert_eq!(session.content(), "<p>One</p><p>Two</p>");
    }

    #[test]
    fn load_leaves_non_empty_editor_alone() {
        let mut session = EditorSession::new();
        session.set_content("<p>typing here</p>");
        assert!(!session.load("Legacy body"));
        assert_eq!(session.content(), "<p>typing here</p>");
    }

    #[test]
    fn whitespace_only_editor_counts_as_empty() {
        let mut session = EditorSession::new();
        session.set_content("  ");
        assert!(session.load("Body"));
        assert_eq!(session.content(), "<p>Body</p>");
    }

    #[test]
    fn save_guard_resets_flag_on_drop() {
        let mut session = EditorSession::new();
        {
            let _guard = session.begin_save().unwrap();
        }
        assert!(!session.is_saving());
        assert!(session.begin_save().is_ok());
    }

    #[test]
    fn insertions_are_drained_once() {
        let mut session = EditorSession::new();
        session.on_image_inserted(4);
        session.on_image_inserted(12);
        let taken = session.take_insertions();
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[1].position, 12);
        assert!(session.take_insertions().is_empty());
    }
}
