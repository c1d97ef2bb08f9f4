use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::StoryResult;
use crate::model::{Story, StoryId, Version};

/// Read cache for story details and version lists. Entries are dropped
/// wholesale on invalidation, never patched.
#[derive(Debug, Clone)]
pub struct StoryCache {
    stories: Arc<RwLock<HashMap<StoryId, Story>>>,
    versions: Arc<RwLock<HashMap<StoryId, Vec<Version>>>>,
    stories_file: Option<CacheFile>,
    versions_file: Option<CacheFile>,
}

impl Default for StoryCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl StoryCache {
    pub fn in_memory() -> Self {
        Self {
            stories: Arc::new(RwLock::new(HashMap::new())),
            versions: Arc::new(RwLock::new(HashMap::new())),
            stories_file: None,
            versions_file: None,
        }
    }

    /// Loads a previously persisted cache from `dir`, falling back to the
    /// `.json.tmp` sibling when the main file is corrupted.
    pub async fn load_from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(error = %e, dir = %dir.display(), "failed to create cache dir");
        }

        let stories_file = CacheFile::new("stories", dir);
        let versions_file = CacheFile::new("versions", dir);
        let stories: HashMap<StoryId, Story> = stories_file.load().await;
        let versions: HashMap<StoryId, Vec<Version>> = versions_file.load().await;
        debug!(
            stories = stories.len(),
            version_lists = versions.len(),
            "loaded story cache"
        );

        Self {
            stories: Arc::new(RwLock::new(stories)),
            versions: Arc::new(RwLock::new(versions)),
            stories_file: Some(stories_file),
            versions_file: Some(versions_file),
        }
    }

    pub async fn story(&self, story_id: StoryId) -> Option<Story> {
        let hit = self.stories.read().await.get(&story_id).cloned();
        if hit.is_some() {
            debug!(story_id, "story cache hit");
        }
        hit
    }

    pub async fn put_story(&self, story: Story) {
        self.stories.write().await.insert(story.id, story);
        self.persist_stories().await;
    }

    pub async fn versions(&self, story_id: StoryId) -> Option<Vec<Version>> {
        let hit = self.versions.read().await.get(&story_id).cloned();
        if hit.is_some() {
            debug!(story_id, "version list cache hit");
        }
        hit
    }

    pub async fn put_versions(&self, story_id: StoryId, versions: Vec<Version>) {
        self.versions.write().await.insert(story_id, versions);
        self.persist_versions().await;
    }

    /// Drops the story detail and version list so the next read goes to the
    /// backend.
    pub async fn invalidate(&self, story_id: StoryId) {
        let dropped_story = self.stories.write().await.remove(&story_id).is_some();
        let dropped_versions = self.versions.write().await.remove(&story_id).is_some();
        debug!(story_id, dropped_story, dropped_versions, "invalidated story cache");
        if dropped_story {
            self.persist_stories().await;
        }
        if dropped_versions {
            self.persist_versions().await;
        }
    }

    async fn persist_stories(&self) {
        if let Some(file) = &self.stories_file {
            let snapshot = self.stories.read().await.clone();
            file.store(&snapshot).await;
        }
    }

    async fn persist_versions(&self) {
        if let Some(file) = &self.versions_file {
            let snapshot = self.versions.read().await.clone();
            file.store(&snapshot).await;
        }
    }
}

/// One persisted cache map: `<dir>/<label>_cache.json` plus its `.json.tmp`
/// staging sibling.
#[derive(Debug, Clone)]
struct CacheFile {
    label: &'static str,
    path: PathBuf,
}

impl CacheFile {
    fn new(label: &'static str, dir: &Path) -> Self {
        Self {
            label,
            path: dir.join(format!("{label}_cache.json")),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    /// Missing files load as empty. A corrupted main file is replaced by the
    /// staging copy left behind by an interrupted write, if that one parses.
    async fn load<T: DeserializeOwned + Default>(&self) -> T {
        let main_err = match read_json::<T>(&self.path).await {
            Ok(Some(value)) => return value,
            Ok(None) => return T::default(),
            Err(e) => e,
        };
        warn!(cache = self.label, error = %main_err, "cache file unreadable, trying staging copy");
        match read_json::<T>(&self.tmp_path()).await {
            Ok(Some(value)) => {
                debug!(cache = self.label, "recovered cache from staging copy");
                value
            }
            Ok(None) => T::default(),
            Err(e) => {
                warn!(cache = self.label, error = %e, "staging copy unreadable too; starting empty");
                T::default()
            }
        }
    }

    /// Writes to the staging file first and renames it over the main file,
    /// so a crash never leaves a half-written cache behind.
    async fn store<T: Serialize>(&self, value: &T) {
        if let Err(e) = self.try_store(value).await {
            warn!(cache = self.label, error = %e, path = %self.path.display(), "failed to persist cache");
        }
    }

    async fn try_store<T: Serialize>(&self, value: &T) -> StoryResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> StoryResult<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
