pub mod backend;
pub mod cache;
pub mod config;
pub mod content;
pub mod editor;
pub mod error;
pub mod feed;
pub mod history;
pub mod http;
pub mod illustration;
pub mod model;

pub use backend::{
    IllustrationUpload, InMemoryBackend, SharedBackend, StoryBackend, UploadedIllustration,
};
pub use cache::StoryCache;
pub use config::{AppConfig, ClientConfig, Settings};
pub use content::{is_rich_format, markup_text, to_display_paragraphs, to_editable_rich_form};
pub use content::DisplayBlock;
pub use editor::{EditorSession, ImageInsertion, SaveGuard};
pub use error::{StoryError, StoryResult};
pub use feed::{append_page, locale_label, should_load_more};
pub use feed::{FeedAggregator, FeedLoader, FeedState, FeedStatus, LoadTicket, LocaleGroup};
pub use history::{diff_summary, VersionHistory};
pub use http::{HttpBackend, HttpConfig};
pub use illustration::{detect_inline_prompts, render, InlinePrompt, RenderBlock};
pub use illustration::{IllustrationTracker, MAX_ILLUSTRATION_BYTES};
pub use model::{AgeGroup, Illustration, ImageSource, InlineImage, PageRequest};
pub use model::{IllustrationId, Story, StoryId, StoryPage, StorySnapshot, Version, VersionId};
