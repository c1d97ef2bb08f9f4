use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::content::is_rich_format;
use crate::error::StoryResult;

pub type StoryId = i64;
pub type IllustrationId = i64;
pub type VersionId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgeGroup {
    Toddler,
    Preschool,
    EarlyReader,
    Independent,
}

impl AgeGroup {
    pub fn label(self) -> &'static str {
        match self {
            AgeGroup::Toddler => "2-4",
            AgeGroup::Preschool => "4-6",
            AgeGroup::EarlyReader => "6-8",
            AgeGroup::Independent => "8-12",
        }
    }

    pub fn as_param(self) -> &'static str {
        match self {
            AgeGroup::Toddler => "toddler",
            AgeGroup::Preschool => "preschool",
            AgeGroup::EarlyReader => "early_reader",
            AgeGroup::Independent => "independent",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Story {
    pub id: StoryId,
    pub title: String,
    /// Either legacy plain text or rich markup; see [`crate::content`].
    pub content: String,
    #[serde(default, deserialize_with = "dedup_themes")]
    pub themes: Vec<String>,
    pub age_group: AgeGroup,
    pub locale: String,
    pub week: u32,
    pub day: u8,
    #[serde(default)]
    pub series: Option<String>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

impl Story {
    pub fn is_rich(&self) -> bool {
        is_rich_format(&self.content)
    }

    pub fn display_title(&self) -> &str {
        let title = self.title.trim();
        if title.is_empty() {
            "Untitled"
        } else {
            title
        }
    }

    pub fn snapshot(&self) -> StorySnapshot {
        StorySnapshot {
            title: self.title.clone(),
            content: self.content.clone(),
            themes: self.themes.clone(),
            age_group: self.age_group,
            locale: self.locale.clone(),
            week: self.week,
            day: self.day,
            series: self.series.clone(),
        }
    }

    /// Copies the snapshot's fields over the working state. The version
    /// number is left alone; only the backend assigns those.
    pub fn apply_snapshot(&mut self, snapshot: &StorySnapshot) {
        self.title = snapshot.title.clone();
        self.content = snapshot.content.clone();
        self.themes = unique_themes(snapshot.themes.iter().cloned());
        self.age_group = snapshot.age_group;
        self.locale = snapshot.locale.clone();
        self.week = snapshot.week;
        self.day = snapshot.day;
        self.series = snapshot.series.clone();
    }
}

/// Restorable field set of a story.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorySnapshot {
    pub title: String,
    pub content: String,
    #[serde(default, deserialize_with = "dedup_themes")]
    pub themes: Vec<String>,
    pub age_group: AgeGroup,
    pub locale: String,
    pub week: u32,
    pub day: u8,
    #[serde(default)]
    pub series: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Version {
    pub id: VersionId,
    pub story_id: StoryId,
    pub version_number: u32,
    #[serde(flatten)]
    pub snapshot: StorySnapshot,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Where the pixels of an illustration live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource<'a> {
    Stored(&'a str),
    Inline(&'a InlineImage),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Illustration {
    /// `None` until the backend has accepted the upload.
    #[serde(default)]
    pub id: Option<IllustrationId>,
    pub story_id: StoryId,
    #[serde(
        default,
        alias = "imagePath",
        alias = "path",
        deserialize_with = "normalized_path"
    )]
    pub image_path: Option<String>,
    #[serde(skip)]
    pub inline: Option<InlineImage>,
    /// Content offset at insertion time. Used for ordering only.
    #[serde(default)]
    pub position: usize,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl Illustration {
    pub fn pending(story_id: StoryId, position: usize) -> Self {
        Self {
            id: None,
            story_id,
            image_path: None,
            inline: None,
            position,
            filename: None,
            mime_type: None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn source(&self) -> Option<ImageSource<'_>> {
        if let Some(path) = self.image_path.as_deref() {
            return Some(ImageSource::Stored(path));
        }
        self.inline.as_ref().map(ImageSource::Inline)
    }

    /// Resolves the stored path against the media base url. Absolute urls are
    /// returned as they are.
    pub fn resolve_url(&self, base: &Url) -> StoryResult<Option<Url>> {
        let Some(path) = self.image_path.as_deref() else {
            return Ok(None);
        };
        let path = normalize_image_path(path);
        if let Ok(absolute) = Url::parse(&path) {
            return Ok(Some(absolute));
        }
        Ok(Some(base.join(path.trim_start_matches('/'))?))
    }
}

/// Page of stories as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StoryPage {
    pub stories: Vec<Story>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub page_size: usize,
    pub locale: Option<String>,
    pub age_group: Option<AgeGroup>,
}

impl PageRequest {
    pub fn first(page_size: usize) -> Self {
        Self {
            offset: 0,
            page_size,
            locale: None,
            age_group: None,
        }
    }

    pub fn matches(&self, story: &Story) -> bool {
        self.locale.as_deref().map_or(true, |l| story.locale == l)
            && self.age_group.map_or(true, |g| story.age_group == g)
    }
}

/// Backslash separators show up in paths written by Windows hosts.
pub fn normalize_image_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Keeps the first occurrence of every theme tag, in order.
pub fn unique_themes(themes: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for theme in themes {
        let theme = theme.trim().to_string();
        if !theme.is_empty() && !out.contains(&theme) {
            out.push(theme);
        }
    }
    out
}

fn normalized_path<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .filter(|p| !p.trim().is_empty())
        .map(|p| normalize_image_path(&p)))
}

fn dedup_themes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<String> = Vec::deserialize(deserializer)?;
    Ok(unique_themes(raw))
}
