mod render;

use std::process::ExitCode;
use std::sync::Arc;

use reqwest::{redirect, ClientBuilder};
use story_core::{
    diff_summary, locale_label, AppConfig, EditorSession, FeedLoader, HttpBackend, HttpConfig,
    IllustrationTracker, Settings, SharedBackend, StoryCache, StoryError, StoryId, StoryResult,
    VersionHistory, VersionId,
};
use tracing::error;
use tracing_subscriber::EnvFilter;
use url::Url;

const USAGE: &str = "usage:
  storyfeed feed [--locale <code>] [--pages <n>]
  storyfeed show <story-id>
  storyfeed versions <story-id>
  storyfeed restore <story-id> <version-id>";

enum Command {
    Feed { locale: Option<String>, pages: usize },
    Show(StoryId),
    Versions(StoryId),
    Restore(StoryId, VersionId),
}

#[tokio::main]
async fn main() -> ExitCode {
    let command = match parse_args(std::env::args().skip(1).collect()) {
        Some(command) => command,
        None => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    let config = AppConfig::load();
    init_tracing(&config.settings);
    let client = match ClientBuilder::new()
        .redirect(redirect::Policy::limited(5))
        .user_agent("storyfeed/0.1")
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "failed to build HTTP client");
            return ExitCode::FAILURE;
        }
    };
    let backend: SharedBackend = match HttpBackend::new(
        client,
        &config.client.base_url,
        HttpConfig::from(&config.client),
    ) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            eprintln!("invalid base_url in config: {e}");
            return ExitCode::FAILURE;
        }
    };
    let cache = match AppConfig::cache_dir() {
        Some(dir) => StoryCache::load_from_dir(dir).await,
        None => StoryCache::in_memory(),
    };

    let outcome = match command {
        Command::Feed { locale, pages } => run_feed(backend, &config, locale, pages).await,
        Command::Show(id) => run_show(backend, cache, &config, id).await,
        Command::Versions(id) => run_versions(backend, cache, id).await,
        Command::Restore(id, version) => run_restore(backend, cache, id, version).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(settings: &Settings) {
    let default_level = if settings.dev_mode { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_args(args: Vec<String>) -> Option<Command> {
    let (name, rest) = args.split_first()?;
    match name.as_str() {
        "feed" => {
            let mut locale = None;
            let mut pages = 1;
            let mut iter = rest.iter();
            while let Some(flag) = iter.next() {
                match flag.as_str() {
                    "--locale" => locale = Some(iter.next()?.clone()),
                    "--pages" => pages = iter.next()?.parse().ok()?,
                    _ => return None,
                }
            }
            Some(Command::Feed { locale, pages })
        }
        "show" => Some(Command::Show(rest.first()?.parse().ok()?)),
        "versions" => Some(Command::Versions(rest.first()?.parse().ok()?)),
        "restore" => Some(Command::Restore(
            rest.first()?.parse().ok()?,
            rest.get(1)?.parse().ok()?,
        )),
        _ => None,
    }
}

async fn run_feed(
    backend: SharedBackend,
    config: &AppConfig,
    locale: Option<String>,
    pages: usize,
) -> StoryResult<()> {
    let mut loader = FeedLoader::new(backend, config.client.page_size);
    if locale.is_some() {
        loader.set_filters(locale, None);
    }
    // The terminal is always "scrolled to the end".
    for _ in 0..pages.max(1) {
        if !loader.load_next(true).await {
            break;
        }
    }

    let state = loader.state();
    for group in state.groups() {
        let label = locale_label(&group.locale);
        println!("{} {} ({})", label.flag, label.name, group.stories.len());
        for story in &group.stories {
            println!(
                "  #{:<5} {}  [{} | week {} day {} | v{}]",
                story.id,
                story.display_title(),
                story.age_group.label(),
                story.week,
                story.day,
                story.version
            );
        }
    }
    if let Some(message) = state.error() {
        return Err(StoryError::Transport(message.to_string()));
    }
    if state.has_more() {
        println!("... more stories available (--pages {})", pages + 1);
    }
    Ok(())
}

async fn run_show(
    backend: SharedBackend,
    cache: StoryCache,
    config: &AppConfig,
    story_id: StoryId,
) -> StoryResult<()> {
    let history = VersionHistory::new(backend.clone(), cache);
    let story = history.latest_story(story_id).await?;
    let tracker = IllustrationTracker::new(backend, story_id)
        .with_max_bytes(config.client.max_upload_bytes);
    tracker.refresh().await?;

    let media_base = config
        .client
        .media_base_url
        .as_deref()
        .unwrap_or(&config.client.base_url);
    let media_base = Url::parse(media_base)?;

    println!("{} (v{}, {})", story.display_title(), story.version, story.locale);
    if let Some(series) = &story.series {
        println!("series: {series}");
    }
    if !story.themes.is_empty() {
        println!("themes: {}", story.themes.join(", "));
    }
    println!();
    for line in render::blocks_to_text(&tracker.render(&story.content).await, &media_base) {
        println!("{line}");
    }
    Ok(())
}

async fn run_versions(
    backend: SharedBackend,
    cache: StoryCache,
    story_id: StoryId,
) -> StoryResult<()> {
    let history = VersionHistory::new(backend, cache);
    let versions = history.refresh_versions(story_id).await?;
    let mut previous = None;
    for version in &versions {
        let changed = match previous {
            Some(prev) => diff_summary(prev, &version.snapshot).join(", "),
            None => "initial".to_string(),
        };
        println!(
            "v{:<3} id={:<6} {}  {}  ({})",
            version.version_number,
            version.id,
            version.created_at.format("%Y-%m-%d %H:%M"),
            version.snapshot.title,
            changed
        );
        previous = Some(&version.snapshot);
    }
    Ok(())
}

async fn run_restore(
    backend: SharedBackend,
    cache: StoryCache,
    story_id: StoryId,
    version_id: VersionId,
) -> StoryResult<()> {
    let history = VersionHistory::new(backend, cache);
    let story = history.refresh_story(story_id).await?;
    let mut session = EditorSession::new();
    let guard = session.begin_save()?;
    let restored = history.restore(&story, Some(version_id), &guard).await?;
    drop(guard);

    println!(
        "restored version {version_id} of \"{}\" as v{}",
        restored.display_title(),
        restored.version
    );
    Ok(())
}
