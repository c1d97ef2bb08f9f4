use tracing::{info, warn};

use crate::backend::SharedBackend;
use crate::cache::StoryCache;
use crate::editor::SaveGuard;
use crate::error::{StoryError, StoryResult};
use crate::model::{Story, StoryId, StorySnapshot, Version, VersionId};

/// Captures, lists and restores story versions. Versions are immutable: a
/// restore appends a new version carrying the old snapshot.
#[derive(Clone)]
pub struct VersionHistory {
    backend: SharedBackend,
    cache: StoryCache,
}

impl VersionHistory {
    pub fn new(backend: SharedBackend, cache: StoryCache) -> Self {
        Self { backend, cache }
    }

    pub fn cache(&self) -> &StoryCache {
        &self.cache
    }

    pub async fn story(&self, story_id: StoryId) -> StoryResult<Story> {
        if let Some(story) = self.cache.story(story_id).await {
            return Ok(story);
        }
        self.refresh_story(story_id).await
    }

    /// Fetches the story from the backend and refreshes the cached copy.
    pub async fn refresh_story(&self, story_id: StoryId) -> StoryResult<Story> {
        let story = self.backend.get_story(story_id).await?;
        self.cache.put_story(story.clone()).await;
        Ok(story)
    }

    /// Prefers the backend; the cached copy is only served when the backend
    /// is unreachable.
    pub async fn latest_story(&self, story_id: StoryId) -> StoryResult<Story> {
        match self.refresh_story(story_id).await {
            Ok(story) => Ok(story),
            Err(err) if err.is_retryable() => match self.cache.story(story_id).await {
                Some(story) => {
                    warn!(story_id, error = %err, "backend unreachable; showing cached story");
                    Ok(story)
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    /// Versions in ascending version-number order.
    pub async fn list_versions(&self, story_id: StoryId) -> StoryResult<Vec<Version>> {
        if let Some(versions) = self.cache.versions(story_id).await {
            return Ok(versions);
        }
        self.refresh_versions(story_id).await
    }

    /// Like [`VersionHistory::list_versions`] but always asks the backend.
    pub async fn refresh_versions(&self, story_id: StoryId) -> StoryResult<Vec<Version>> {
        let mut versions = self.backend.list_versions(story_id).await?;
        versions.sort_by_key(|v| v.version_number);
        self.cache.put_versions(story_id, versions.clone()).await;
        Ok(versions)
    }

    /// Persists the snapshot as the story's next version. A reply whose
    /// version number did not go up is rejected.
    pub async fn save(
        &self,
        story: &Story,
        snapshot: &StorySnapshot,
        _saving: &SaveGuard<'_>,
    ) -> StoryResult<Story> {
        let saved = match self.backend.save_story(story.id, snapshot).await {
            Ok(saved) => saved,
            Err(err) => {
                warn!(story_id = story.id, error = %err, "story save failed");
                return Err(err);
            }
        };
        self.cache.invalidate(story.id).await;
        if saved.version <= story.version {
            warn!(
                story_id = story.id,
                previous = story.version,
                returned = saved.version,
                "backend returned a non-increasing version number"
            );
            return Err(StoryError::Transport(format!(
                "save of story {} returned version {} (was {})",
                story.id, saved.version, story.version
            )));
        }
        info!(story_id = story.id, version = saved.version, "story saved");
        Ok(saved)
    }

    /// Restores the selected version as the story's new working state.
    /// Nothing is changed locally unless the backend accepts the restore.
    pub async fn restore(
        &self,
        story: &Story,
        selected: Option<VersionId>,
        _saving: &SaveGuard<'_>,
    ) -> StoryResult<Story> {
        let Some(version_id) = selected else {
            return Err(StoryError::validation("Please select a version to restore"));
        };

        let versions = self.refresh_versions(story.id).await?;
        let Some(target) = versions.iter().find(|v| v.id == version_id) else {
            warn!(story_id = story.id, version_id, "restore target not in version list");
            return Err(StoryError::not_found(format!("version {version_id}")));
        };
        let current_max = versions
            .iter()
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0)
            .max(story.version);

        let restored = match self.backend.restore_version(story.id, version_id).await {
            Ok(restored) => restored,
            Err(err) => {
                warn!(story_id = story.id, version_id, error = %err, "version restore failed");
                return Err(err);
            }
        };
        if restored.version != current_max + 1 {
            warn!(
                story_id = story.id,
                expected = current_max + 1,
                returned = restored.version,
                "unexpected version number after restore"
            );
        }
        self.cache.invalidate(story.id).await;
        info!(
            story_id = story.id,
            from_version = target.version_number,
            version = restored.version,
            "version restored"
        );
        Ok(restored)
    }
}

/// Names of the snapshot fields that differ between two versions.
pub fn diff_summary(a: &StorySnapshot, b: &StorySnapshot) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if a.title != b.title {
        changed.push("title");
    }
    if a.content != b.content {
        changed.push("content");
    }
    if a.themes != b.themes {
        changed.push("themes");
    }
    if a.age_group != b.age_group {
        changed.push("age_group");
    }
    if a.locale != b.locale {
        changed.push("locale");
    }
    if a.week != b.week || a.day != b.day {
        changed.push("schedule");
    }
    if a.series != b.series {
        changed.push("series");
    }
    changed
}
