//! Incrementally loaded story feed, grouped by locale.
//!
//! State machine: `Idle -> Loading -> (Success | Error)`, `Success ->
//! Loading` for the next page, and `Success -> Exhausted` once the backend
//! has nothing more to give.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::SharedBackend;
use crate::model::{AgeGroup, PageRequest, Story, StoryPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Idle,
    Loading,
    Success,
    Error,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocaleGroup {
    pub locale: String,
    pub stories: Vec<Story>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedState {
    stories: Vec<Story>,
    groups: Vec<LocaleGroup>,
    status: FeedStatus,
    error: Option<String>,
    has_more: bool,
    offset: usize,
    page_size: usize,
}

impl FeedState {
    pub fn new(page_size: usize) -> Self {
        Self {
            stories: Vec::new(),
            groups: Vec::new(),
            status: FeedStatus::Idle,
            error: None,
            has_more: true,
            offset: 0,
            page_size: page_size.max(1),
        }
    }

    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    /// Locale groups in order of each locale's first appearance.
    pub fn groups(&self) -> &[LocaleGroup] {
        &self.groups
    }

    pub fn group(&self, locale: &str) -> Option<&LocaleGroup> {
        self.groups.iter().find(|g| g.locale == locale)
    }

    pub fn status(&self) -> FeedStatus {
        self.status
    }

    pub fn is_loading(&self) -> bool {
        self.status == FeedStatus::Loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

/// Merges a fetched page into the state. Stories are appended in arrival
/// order without de-duplication, then the locale groups are rebuilt from the
/// flat list.
pub fn append_page(existing: &FeedState, page: StoryPage) -> FeedState {
    let received = page.stories.len();
    let mut stories = existing.stories.clone();
    stories.extend(page.stories);

    let has_more = page.has_more && received >= existing.page_size;
    let status = if has_more {
        FeedStatus::Success
    } else {
        FeedStatus::Exhausted
    };

    FeedState {
        groups: group_by_locale(&stories),
        stories,
        status,
        error: None,
        has_more,
        offset: existing.offset + received,
        page_size: existing.page_size,
    }
}

pub fn group_by_locale(stories: &[Story]) -> Vec<LocaleGroup> {
    let mut groups: Vec<LocaleGroup> = Vec::new();
    for story in stories {
        match groups.iter_mut().find(|g| g.locale == story.locale) {
            Some(group) => group.stories.push(story.clone()),
            None => groups.push(LocaleGroup {
                locale: story.locale.clone(),
                stories: vec![story.clone()],
            }),
        }
    }
    groups
}

/// Whether the consumer should fetch the next page now that its visibility
/// sensor reported `intersecting`.
pub fn should_load_more(state: &FeedState, intersecting: bool) -> bool {
    !state.is_loading() && state.has_more && intersecting
}

/// Issued by [`FeedAggregator::begin_load`]; a response is only applied if
/// its ticket is still the latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
    offset: usize,
}

impl LoadTicket {
    pub fn offset(&self) -> usize {
        self.offset
    }
}

#[derive(Debug, Clone)]
pub struct FeedAggregator {
    state: FeedState,
    generation: u64,
}

impl FeedAggregator {
    pub fn new(page_size: usize) -> Self {
        Self {
            state: FeedState::new(page_size),
            generation: 0,
        }
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn should_load_more(&self, intersecting: bool) -> bool {
        should_load_more(&self.state, intersecting)
    }

    /// Moves to `Loading`. Returns `None` while a page is already in flight
    /// or nothing is left to load.
    pub fn begin_load(&mut self) -> Option<LoadTicket> {
        if self.state.is_loading() || !self.state.has_more {
            return None;
        }
        self.generation += 1;
        self.state.status = FeedStatus::Loading;
        Some(LoadTicket {
            generation: self.generation,
            offset: self.state.offset,
        })
    }

    /// Returns whether the page was applied.
    pub fn apply_page(&mut self, ticket: LoadTicket, page: StoryPage) -> bool {
        if ticket.generation != self.generation {
            debug!(
                ticket = ticket.generation,
                latest = self.generation,
                "ignoring stale feed page"
            );
            return false;
        }
        self.state = append_page(&self.state, page);
        true
    }

    /// Records a failed fetch. Accumulated stories stay visible.
    pub fn apply_error(&mut self, ticket: LoadTicket, message: impl Into<String>) -> bool {
        if ticket.generation != self.generation {
            debug!(ticket = ticket.generation, "ignoring stale feed error");
            return false;
        }
        self.state.status = FeedStatus::Error;
        self.state.error = Some(message.into());
        true
    }

    /// Leaves `Error` for another attempt at the same offset.
    pub fn retry(&mut self) -> Option<LoadTicket> {
        if self.state.status != FeedStatus::Error {
            return None;
        }
        self.state.error = None;
        self.state.status = FeedStatus::Idle;
        self.begin_load()
    }

    /// Drops everything, e.g. after a filter change. Responses to earlier
    /// tickets are ignored from here on.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.state = FeedState::new(self.state.page_size);
    }
}

/// Drives a [`FeedAggregator`] against a backend.
#[derive(Clone)]
pub struct FeedLoader {
    backend: SharedBackend,
    aggregator: FeedAggregator,
    locale: Option<String>,
    age_group: Option<AgeGroup>,
}

impl FeedLoader {
    pub fn new(backend: SharedBackend, page_size: usize) -> Self {
        Self {
            backend,
            aggregator: FeedAggregator::new(page_size),
            locale: None,
            age_group: None,
        }
    }

    pub fn state(&self) -> &FeedState {
        self.aggregator.state()
    }

    /// Changes the filters and starts over.
    pub fn set_filters(&mut self, locale: Option<String>, age_group: Option<AgeGroup>) {
        self.locale = locale;
        self.age_group = age_group;
        self.aggregator.reset();
    }

    /// Loads the next page if the feed end is visible and a load is allowed.
    /// Returns whether a page was merged; failures end up in the state.
    pub async fn load_next(&mut self, intersecting: bool) -> bool {
        if !self.aggregator.should_load_more(intersecting) {
            return false;
        }
        let Some(ticket) = self.aggregator.begin_load() else {
            return false;
        };
        self.fetch(ticket).await
    }

    pub async fn retry(&mut self) -> bool {
        let Some(ticket) = self.aggregator.retry() else {
            return false;
        };
        self.fetch(ticket).await
    }

    async fn fetch(&mut self, ticket: LoadTicket) -> bool {
        let request = PageRequest {
            offset: ticket.offset(),
            page_size: self.aggregator.state().page_size(),
            locale: self.locale.clone(),
            age_group: self.age_group,
        };
        match self.backend.fetch_stories_page(&request).await {
            Ok(page) => {
                let received = page.stories.len();
                let applied = self.aggregator.apply_page(ticket, page);
                if applied {
                    info!(
                        offset = request.offset,
                        received,
                        has_more = self.state().has_more(),
                        "feed page loaded"
                    );
                }
                applied
            }
            Err(err) => {
                warn!(offset = request.offset, error = %err, "feed page failed");
                self.aggregator.apply_error(ticket, err.user_message());
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocaleLabel {
    pub code: String,
    pub name: String,
    pub flag: &'static str,
}

const LOCALE_LABELS: &[(&str, &str, &str)] = &[
    ("en", "English", "🇬🇧"),
    ("es", "Español", "🇪🇸"),
    ("fr", "Français", "🇫🇷"),
    ("de", "Deutsch", "🇩🇪"),
    ("it", "Italiano", "🇮🇹"),
    ("pt", "Português", "🇵🇹"),
    ("nl", "Nederlands", "🇳🇱"),
];

/// Display name and flag for a two-letter locale code. Unknown codes are
/// shown upper-cased with a neutral flag.
pub fn locale_label(code: &str) -> LocaleLabel {
    let code = code.trim().to_ascii_lowercase();
    match LOCALE_LABELS.iter().find(|(c, _, _)| *c == code) {
        Some((_, name, flag)) => LocaleLabel {
            name: name.to_string(),
            flag: *flag,
            code,
        },
        None => LocaleLabel {
            name: code.to_ascii_uppercase(),
            flag: "🏳",
            code,
        },
    }
}
