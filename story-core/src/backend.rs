use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{StoryError, StoryResult};
use crate::model::{
    Illustration, IllustrationId, PageRequest, Story, StoryId, StoryPage,
    StorySnapshot, Version, VersionId,
};

/// File handed over by the editor when an image is inserted.
#[derive(Debug, Clone)]
pub struct IllustrationUpload {
    pub bytes: Bytes,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
}

impl IllustrationUpload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            filename: None,
            mime_type: None,
        }
    }

    pub fn named(mut self, filename: impl Into<String>, mime_type: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadedIllustration {
    pub id: IllustrationId,
    #[serde(alias = "imagePath", alias = "path")]
    pub image_path: String,
}

/// Remote operations the story components depend on. Transport-agnostic:
/// implementations map their own failures onto [`StoryError`].
#[async_trait]
pub trait StoryBackend: Send + Sync {
    async fn fetch_stories_page(&self, request: &PageRequest) -> StoryResult<StoryPage>;

    async fn get_story(&self, story_id: StoryId) -> StoryResult<Story>;

    /// Persists the snapshot as the story's next version.
    async fn save_story(&self, story_id: StoryId, snapshot: &StorySnapshot) -> StoryResult<Story>;

    async fn list_versions(&self, story_id: StoryId) -> StoryResult<Vec<Version>>;

    async fn restore_version(&self, story_id: StoryId, version_id: VersionId)
        -> StoryResult<Story>;

    async fn list_illustrations(&self, story_id: StoryId) -> StoryResult<Vec<Illustration>>;

    async fn upload_illustration(
        &self,
        story_id: StoryId,
        upload: &IllustrationUpload,
        position: usize,
    ) -> StoryResult<UploadedIllustration>;

    async fn delete_illustration(
        &self,
        story_id: StoryId,
        illustration_id: IllustrationId,
    ) -> StoryResult<()>;
}

pub type SharedBackend = Arc<dyn StoryBackend>;

#[derive(Debug, Default)]
struct MemoryData {
    stories: Vec<Story>,
    versions: HashMap<StoryId, Vec<Version>>,
    illustrations: HashMap<StoryId, Vec<Illustration>>,
    next_version_id: VersionId,
    next_illustration_id: IllustrationId,
}

/// Backend kept entirely in memory. Assigns identifiers and version numbers
/// the way the story server does.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<RwLock<MemoryData>>,
    offline: Arc<AtomicBool>,
    uploads: Arc<AtomicUsize>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a story; its current state becomes the first recorded version.
    pub async fn insert_story(&self, story: Story) {
        let mut inner = self.inner.write().await;
        inner.next_version_id += 1;
        let version = Version {
            id: inner.next_version_id,
            story_id: story.id,
            version_number: story.version,
            snapshot: story.snapshot(),
            created_at: story.created_at,
        };
        inner.versions.entry(story.id).or_default().push(version);
        inner.stories.retain(|existing| existing.id != story.id);
        inner.stories.push(story);
    }

    /// Seeds a full history. The story takes the snapshot and number of the
    /// last version given.
    pub async fn insert_history(&self, mut story: Story, snapshots: Vec<StorySnapshot>) {
        let mut inner = self.inner.write().await;
        let mut versions = Vec::with_capacity(snapshots.len());
        for (index, snapshot) in snapshots.into_iter().enumerate() {
            inner.next_version_id += 1;
            versions.push(Version {
                id: inner.next_version_id,
                story_id: story.id,
                version_number: index as u32 + 1,
                snapshot,
                created_at: story.created_at,
            });
        }
        if let Some(last) = versions.last() {
            story.apply_snapshot(&last.snapshot);
            story.version = last.version_number;
        }
        inner.versions.insert(story.id, versions);
        inner.stories.retain(|existing| existing.id != story.id);
        inner.stories.push(story);
    }

    /// While offline every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of upload calls that reached this backend.
    pub fn upload_calls(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> StoryResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoryError::Transport("story server unreachable".into()))
        } else {
            Ok(())
        }
    }

    fn append_version(
        inner: &mut MemoryData,
        story_id: StoryId,
        snapshot: StorySnapshot,
    ) -> StoryResult<Story> {
        let next_number = inner
            .versions
            .get(&story_id)
            .and_then(|versions| versions.iter().map(|v| v.version_number).max())
            .unwrap_or(0)
            + 1;
        inner.next_version_id += 1;
        let version_id = inner.next_version_id;
        let story = inner
            .stories
            .iter_mut()
            .find(|s| s.id == story_id)
            .ok_or_else(|| StoryError::not_found(format!("story {story_id}")))?;
        story.apply_snapshot(&snapshot);
        story.version = next_number.max(story.version + 1);
        let updated = story.clone();
        inner.versions.entry(story_id).or_default().push(Version {
            id: version_id,
            story_id,
            version_number: updated.version,
            snapshot: updated.snapshot(),
            created_at: Utc::now(),
        });
        Ok(updated)
    }
}

#[async_trait]
impl StoryBackend for InMemoryBackend {
    async fn fetch_stories_page(&self, request: &PageRequest) -> StoryResult<StoryPage> {
        self.check_online()?;
        let inner = self.inner.read().await;
        let matching: Vec<&Story> = inner.stories.iter().filter(|s| request.matches(s)).collect();
        let stories: Vec<Story> = matching
            .iter()
            .skip(request.offset)
            .take(request.page_size)
            .map(|s| (*s).clone())
            .collect();
        let has_more = request.offset + stories.len() < matching.len();
        debug!(offset = request.offset, count = stories.len(), has_more, "served story page");
        Ok(StoryPage { stories, has_more })
    }

    async fn get_story(&self, story_id: StoryId) -> StoryResult<Story> {
        self.check_online()?;
        let inner = self.inner.read().await;
        inner
            .stories
            .iter()
            .find(|s| s.id == story_id)
            .cloned()
            .ok_or_else(|| StoryError::not_found(format!("story {story_id}")))
    }

    async fn save_story(&self, story_id: StoryId, snapshot: &StorySnapshot) -> StoryResult<Story> {
        self.check_online()?;
        let mut inner = self.inner.write().await;
        Self::append_version(&mut inner, story_id, snapshot.clone())
    }

    async fn list_versions(&self, story_id: StoryId) -> StoryResult<Vec<Version>> {
        self.check_online()?;
        let inner = self.inner.read().await;
        if !inner.stories.iter().any(|s| s.id == story_id) {
            return Err(StoryError::not_found(format!("story {story_id}")));
        }
        Ok(inner.versions.get(&story_id).cloned().unwrap_or_default())
    }

    async fn restore_version(
        &self,
        story_id: StoryId,
        version_id: VersionId,
    ) -> StoryResult<Story> {
        self.check_online()?;
        let mut inner = self.inner.write().await;
        let snapshot = inner
            .versions
            .get(&story_id)
            .and_then(|versions| versions.iter().find(|v| v.id == version_id))
            .map(|v| v.snapshot.clone())
            .ok_or_else(|| StoryError::not_found(format!("version {version_id}")))?;
        Self::append_version(&mut inner, story_id, snapshot)
    }

    async fn list_illustrations(&self, story_id: StoryId) -> StoryResult<Vec<Illustration>> {
        self.check_online()?;
        let inner = self.inner.read().await;
        let mut list = inner.illustrations.get(&story_id).cloned().unwrap_or_default();
        list.sort_by_key(|ill| (ill.position, ill.id));
        Ok(list)
    }

    async fn upload_illustration(
        &self,
        story_id: StoryId,
        upload: &IllustrationUpload,
        position: usize,
    ) -> StoryResult<UploadedIllustration> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let mut inner = self.inner.write().await;
        if !inner.stories.iter().any(|s| s.id == story_id) {
            return Err(StoryError::not_found(format!("story {story_id}")));
        }
        inner.next_illustration_id += 1;
        let id = inner.next_illustration_id;
        let name = upload.filename.clone().unwrap_or_else(|| format!("{id}.png"));
        let image_path = format!("illustrations/{story_id}/{id}-{name}");
        inner.illustrations.entry(story_id).or_default().push(Illustration {
            id: Some(id),
            story_id,
            image_path: Some(image_path.clone()),
            inline: None,
            position,
            filename: upload.filename.clone(),
            mime_type: upload.mime_type.clone(),
        });
        Ok(UploadedIllustration { id, image_path })
    }

    async fn delete_illustration(
        &self,
        story_id: StoryId,
        illustration_id: IllustrationId,
    ) -> StoryResult<()> {
        self.check_online()?;
        let mut inner = self.inner.write().await;
        let list = inner.illustrations.entry(story_id).or_default();
        let before = list.len();
        list.retain(|ill| ill.id != Some(illustration_id));
        if list.len() == before {
            return Err(StoryError::not_found(format!(
                "illustration {illustration_id}"
            )));
        }
        Ok(())
    }
}
