//! Illustrations attached to a story and the inline prompts they replace.
//!
//! The tracker owns the illustration set of one story. After every mutation
//! the set is refetched from the backend instead of being patched locally,
//! so its order is always the server's.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::backend::{IllustrationUpload, SharedBackend};
use crate::content::{markup_text, segments, SegmentKind};
use crate::error::{StoryError, StoryResult};
use crate::model::{normalize_image_path, Illustration, IllustrationId, StoryId};

/// Uploads above this size are refused before reaching the backend.
pub const MAX_ILLUSTRATION_BYTES: usize = 5 * 1024 * 1024;

/// Marker words recognised in emphasized prompts, one per supported locale.
const PROMPT_MARKERS: &[&str] = &["Illustration", "Ilustración"];

const BRACKET_MARKER: &str = "[Illustration:";

const EMPHASIS_TAGS: &[&str] = &["<em>", "<strong>", "<i>", "<b>"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlinePrompt {
    pub is_prompt: bool,
    /// The prompt description with its marker stripped, or the paragraph as
    /// written for story text.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderBlock {
    /// A legacy line, plain text that must not be parsed as markup.
    Paragraph { text: String },
    Spacer,
    Markup { html: String },
    /// A prompt shown in place of a missing image.
    PromptCallout { text: String },
    Image { illustration: Illustration },
}

/// Scans the content paragraph by paragraph and tags illustration prompts.
/// Blank legacy lines are skipped.
pub fn detect_inline_prompts(content: &str) -> Vec<InlinePrompt> {
    segments(content)
        .into_iter()
        .filter(|seg| !seg.raw.trim().is_empty())
        .map(|seg| match prompt_description(seg.raw, seg.kind) {
            Some(text) => InlinePrompt {
                is_prompt: true,
                text,
            },
            None => InlinePrompt {
                is_prompt: false,
                text: seg.raw.to_string(),
            },
        })
        .collect()
}

/// Renders content together with its illustrations. With at least one
/// illustration the prompts are dropped, since the images stand in for
/// them; without any, prompts become callouts. Images are placed after the
/// paragraph covering their insertion offset, counted in text characters.
pub fn render(content: &str, illustrations: &[Illustration]) -> Vec<RenderBlock> {
    let mut ordered: Vec<&Illustration> = illustrations.iter().collect();
    ordered.sort_by_key(|ill| (ill.position, ill.id));
    let mut pending = ordered.into_iter().peekable();

    let mut blocks = Vec::new();
    for seg in segments(content) {
        let blank = seg.raw.trim().is_empty();
        match prompt_description(seg.raw, seg.kind) {
            Some(_) if !illustrations.is_empty() => {}
            Some(text) => blocks.push(RenderBlock::PromptCallout { text }),
            None if blank => blocks.push(RenderBlock::Spacer),
            None => blocks.push(match seg.kind {
                SegmentKind::Line => RenderBlock::Paragraph {
                    text: seg.raw.to_string(),
                },
                SegmentKind::Paragraph => RenderBlock::Markup {
                    html: format!("<p>{}</p>", seg.raw),
                },
                SegmentKind::Fragment => RenderBlock::Markup {
                    html: seg.raw.to_string(),
                },
            }),
        }
        while let Some(ill) = pending.next_if(|ill| ill.position <= seg.text_end) {
            blocks.push(RenderBlock::Image {
                illustration: ill.clone(),
            });
        }
    }
    blocks.extend(pending.map(|ill| RenderBlock::Image {
        illustration: ill.clone(),
    }));
    blocks
}

fn prompt_description(raw: &str, kind: SegmentKind) -> Option<String> {
    let trimmed = raw.trim();
    let text = match kind {
        SegmentKind::Line => trimmed.to_string(),
        SegmentKind::Paragraph | SegmentKind::Fragment => markup_text(trimmed),
    };
    let text = text.trim();

    if let Some(rest) = strip_prefix_ignore_case(text, BRACKET_MARKER) {
        let rest = rest.trim_end();
        let rest = rest.strip_suffix(']').unwrap_or(rest);
        return Some(rest.trim().to_string());
    }

    let unwrapped = text.trim_start_matches(['*', '_']);
    let emphasized = unwrapped.len() < text.len()
        || EMPHASIS_TAGS
            .iter()
            .any(|tag| strip_prefix_ignore_case(trimmed, tag).is_some());
    if !emphasized {
        return None;
    }
    PROMPT_MARKERS.iter().find_map(|marker| {
        let rest = strip_prefix_ignore_case(unwrapped, marker)?;
        if rest.chars().next().is_some_and(char::is_alphanumeric) {
            return None;
        }
        let description = rest
            .trim_start_matches([':', '*', '_', ' '])
            .trim_end()
            .trim_end_matches(['*', '_'])
            .trim();
        Some(description.to_string())
    })
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        text.get(prefix.len()..)
    } else {
        None
    }
}

/// Illustration set of one story plus the operations that change it.
#[derive(Clone)]
pub struct IllustrationTracker {
    backend: SharedBackend,
    story_id: StoryId,
    illustrations: Arc<RwLock<Vec<Illustration>>>,
    max_bytes: usize,
}

impl IllustrationTracker {
    pub fn new(backend: SharedBackend, story_id: StoryId) -> Self {
        Self {
            backend,
            story_id,
            illustrations: Arc::new(RwLock::new(Vec::new())),
            max_bytes: MAX_ILLUSTRATION_BYTES,
        }
    }

    /// Lowers the upload limit; it can never exceed [`MAX_ILLUSTRATION_BYTES`].
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes.min(MAX_ILLUSTRATION_BYTES);
        self
    }

    pub fn story_id(&self) -> StoryId {
        self.story_id
    }

    pub async fn illustrations(&self) -> Vec<Illustration> {
        self.illustrations.read().await.clone()
    }

    /// Illustrations that can go through [`IllustrationTracker::delete`].
    pub async fn deletable(&self) -> Vec<Illustration> {
        self.illustrations
            .read()
            .await
            .iter()
            .filter(|ill| ill.is_persisted())
            .cloned()
            .collect()
    }

    /// Replaces the local set with the backend's.
    pub async fn refresh(&self) -> StoryResult<()> {
        let list = self.backend.list_illustrations(self.story_id).await?;
        debug!(story_id = self.story_id, count = list.len(), "refreshed illustrations");
        *self.illustrations.write().await = list;
        Ok(())
    }

    pub async fn attach(
        &self,
        upload: IllustrationUpload,
        position: usize,
    ) -> StoryResult<Illustration> {
        let attached = self.upload(&upload, position).await?;
        self.refresh_after_mutation().await;
        Ok(attached)
    }

    /// Uploads several files concurrently, then refetches the set once.
    /// Results come back in input order.
    pub async fn attach_many(
        &self,
        uploads: Vec<(IllustrationUpload, usize)>,
    ) -> Vec<StoryResult<Illustration>> {
        let results = join_all(
            uploads
                .iter()
                .map(|(upload, position)| self.upload(upload, *position)),
        )
        .await;
        if results.iter().any(Result::is_ok) {
            self.refresh_after_mutation().await;
        }
        results
    }

    async fn upload(
        &self,
        upload: &IllustrationUpload,
        position: usize,
    ) -> StoryResult<Illustration> {
        if upload.len() > self.max_bytes {
            let limit_mib = self.max_bytes as f64 / (1024.0 * 1024.0);
            warn!(
                story_id = self.story_id,
                size = upload.len(),
                "illustration exceeds upload limit"
            );
            return Err(StoryError::validation(format!(
                "Image is too large; the limit is {limit_mib:.0} MB"
            )));
        }

        let mut illustration = Illustration::pending(self.story_id, position);
        illustration.filename = upload.filename.clone();
        illustration.mime_type = upload.mime_type.clone();

        match self
            .backend
            .upload_illustration(self.story_id, upload, position)
            .await
        {
            Ok(uploaded) => {
                info!(
                    story_id = self.story_id,
                    illustration_id = uploaded.id,
                    position,
                    "illustration uploaded"
                );
                illustration.id = Some(uploaded.id);
                illustration.image_path = Some(normalize_image_path(&uploaded.image_path));
                Ok(illustration)
            }
            Err(err) => {
                warn!(story_id = self.story_id, error = %err, "illustration upload failed");
                Err(err)
            }
        }
    }

    /// Deletes a persisted illustration. Unknown identifiers surface as
    /// `NotFound` and are not retried.
    pub async fn delete(&self, illustration_id: IllustrationId) -> StoryResult<()> {
        match self
            .backend
            .delete_illustration(self.story_id, illustration_id)
            .await
        {
            Ok(()) => {
                info!(story_id = self.story_id, illustration_id, "illustration deleted");
                self.refresh_after_mutation().await;
                Ok(())
            }
            Err(err @ StoryError::NotFound(_)) => {
                warn!(story_id = self.story_id, illustration_id, "illustration already gone");
                self.refresh_after_mutation().await;
                Err(err)
            }
            Err(err) => {
                warn!(story_id = self.story_id, illustration_id, error = %err, "illustration delete failed");
                Err(err)
            }
        }
    }

    /// Deletes by record. Entries without a server identifier are refused
    /// until their upload has completed.
    pub async fn delete_entry(&self, illustration: &Illustration) -> StoryResult<()> {
        match illustration.id {
            Some(id) => self.delete(id).await,
            None => {
                warn!(
                    story_id = self.story_id,
                    position = illustration.position,
                    "refusing to delete an illustration that has not finished uploading"
                );
                Err(StoryError::validation(
                    "This image is still uploading and cannot be deleted yet",
                ))
            }
        }
    }

    pub async fn render(&self, content: &str) -> Vec<RenderBlock> {
        let illustrations = self.illustrations.read().await;
        render(content, &illustrations)
    }

    async fn refresh_after_mutation(&self) {
        if let Err(err) = self.refresh().await {
            warn!(story_id = self.story_id, error = %err, "failed to refetch illustrations");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: i64, position: usize) -> Illustration {
        Illustration {
            id: Some(id),
            image_path: Some(format!("illustrations/1/{id}.png")),
            ..Illustration::pending(1, position)
        }
    }

    #[test]
    fn recognises_all_marker_styles() {
        let content = "Once upon a time.\n\
                       [Illustration: a cat]\n\
                       *Illustration: a dog in the rain*\n\
                       **Ilustración:** un gato\n\
                       Illustrations are nice.";
        let prompts = detect_inline_prompts(content);
        let flags: Vec<bool> = prompts.iter().map(|p| p.is_prompt).collect();
        assert_eq!(flags, vec![false, true, true, true, false]);
        assert_eq!(prompts[1].text, "a cat");
        assert_eq!(prompts[2].text, "a dog in the rain");
        assert_eq!(prompts[3].text, "un gato");
    }

    #[test]
    fn recognises_prompts_in_markup() {
        let content = "<p>Hello</p><p><em>Illustration:</em> a fox</p>";
        let prompts = detect_inline_prompts(content);
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].is_prompt);
        assert_eq!(prompts[1].text, "a fox");
    }

    #[test]
    fn prompt_text_has_entities_decoded() {
        let content = "<p><em>Illustration :</em> un r&ecirc;ve d&#233;t&eacute;</p>";
        let prompts = detect_inline_prompts(content);
        assert!(prompts[0].is_prompt);
        assert_eq!(prompts[0].text, "un rêve dété");
        assert_eq!(
            render(content, &[]),
            vec![RenderBlock::PromptCallout {
                text: "un rêve dété".into()
            }]
        );
    }

    #[test]
    fn legacy_lines_stay_plain_and_markup_stays_markup() {
        let legacy = render("If a<b and c>d, Tom & Jerry win.", &[]);
        assert_eq!(
            legacy,
            vec![RenderBlock::Paragraph {
                text: "If a<b and c>d, Tom & Jerry win.".into()
            }]
        );
        let rich = render("<p>Tom &amp; Jerry</p>", &[]);
        assert_eq!(
            rich,
            vec![RenderBlock::Markup {
                html: "<p>Tom &amp; Jerry</p>".into()
            }]
        );
    }

    #[test]
    fn placement_uses_text_offsets_in_rich_content() {
        let content = "<p>Éléphant <em>énorme</em></p><p>Deuxième</p>";
        let blocks = render(content, &[stored(1, 16)]);
        assert_eq!(blocks.len(), 3);
        assert!(matches!(blocks[1], RenderBlock::Markup { .. }));
        assert!(matches!(blocks[2], RenderBlock::Image { .. }));

        let blocks = render(content, &[stored(1, 15)]);
        assert!(matches!(blocks[1], RenderBlock::Image { .. }));
    }

    #[test]
    fn plain_mention_is_not_a_prompt() {
        let prompts = detect_inline_prompts("Illustration: not emphasized");
        assert!(!prompts[0].is_prompt);
    }

    #[test]
    fn prompts_suppressed_when_images_exist() {
        let content = "The cat sat.\n[Illustration: a cat]\nThe end.";
        let blocks = render(content, &[stored(1, 5)]);
        assert!(!blocks
            .iter()
            .any(|b| matches!(b, RenderBlock::PromptCallout { .. })));
        assert!(!blocks.iter().any(|b| matches!(
            b,
            RenderBlock::Paragraph { text } if text.contains("Illustration")
        )));
        assert!(matches!(blocks[1], RenderBlock::Image { .. }));
    }

    #[test]
    fn prompts_become_callouts_without_images() {
        let blocks = render("The cat sat.\n[Illustration: a cat]", &[]);
        assert_eq!(
            blocks[1],
            RenderBlock::PromptCallout {
                text: "a cat".into()
            }
        );
    }

    #[test]
    fn images_past_the_end_are_appended() {
        let blocks = render("Short.", &[stored(2, 500), stored(1, 200)]);
        assert_eq!(blocks.len(), 3);
        match (&blocks[1], &blocks[2]) {
            (RenderBlock::Image { illustration: a }, RenderBlock::Image { illustration: b }) => {
                assert_eq!(a.id, Some(1));
                assert_eq!(b.id, Some(2));
            }
            other => panic!("unexpected blocks: {other:?}"),
        }
    }
}
