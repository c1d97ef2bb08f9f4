use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use story_core::{
    EditorSession, HttpBackend, HttpConfig, IllustrationUpload, PageRequest, Story, StoryBackend,
    StoryCache, StoryError, VersionHistory,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn story_json(id: i64, locale: &str, version: u32) -> serde_json::Value {
    json!({
        "id": id,
        "title": format!("Story {id}"),
        "content": "Once upon a time.\n\nThe end.",
        "themes": ["sea", "sea", "friends"],
        "age_group": "early_reader",
        "locale": locale,
        "week": 2,
        "day": 4,
        "version": version,
        "created_at": "2024-10-21T07:28:00Z"
    })
}

fn fast_config() -> HttpConfig {
    HttpConfig {
        request_timeout: Duration::from_secs(2),
        max_retries: 1,
        retry_backoff_ms: 10,
    }
}

async fn backend_for(server: &MockServer) -> HttpBackend {
    HttpBackend::new(Client::new(), &format!("{}/api", server.uri()), fast_config()).unwrap()
}

#[tokio::test]
async fn fetches_a_page_with_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stories"))
        .and(query_param("offset", "20"))
        .and(query_param("limit", "20"))
        .and(query_param("locale", "es"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stories": [story_json(21, "es", 3), story_json(22, "es", 1)],
            "has_more": false
        })))
        .mount(&server)
        .await;

    let backend = backend_for(&server).await;
    let request = PageRequest {
        offset: 20,
        locale: Some("es".into()),
        ..PageRequest::first(20)
    };
    let page = backend.fetch_stories_page(&request).await.unwrap();
    assert_eq!(page.stories.len(), 2);
    assert!(!page.has_more);
    assert_eq!(page.stories[0].themes, vec!["sea", "friends"]);
    assert_eq!(page.stories[0].version, 3);
}

#[tokio::test]
async fn delete_of_unknown_illustration_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/stories/7/illustrations/99"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server).await;
    let err = backend.delete_illustration(7, 99).await.unwrap_err();
    assert!(matches!(err, StoryError::NotFound(_)));
}

#[tokio::test]
async fn server_errors_on_reads_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stories/7/versions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let backend = backend_for(&server).await;
    let err = backend.list_versions(7).await.unwrap_err();
    assert!(matches!(err, StoryError::Transport(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn restore_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/stories/7/versions/3/restore"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server).await;
    let err = backend.restore_version(7, 3).await.unwrap_err();
    assert!(matches!(err, StoryError::Transport(_)));
}

#[tokio::test]
async fn restore_returns_the_updated_story() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/stories/7/versions/3/restore"))
        .respond_with(ResponseTemplate::new(200).set_body_json(story_json(7, "en", 6)))
        .mount(&server)
        .await;

    let backend = backend_for(&server).await;
    let story = backend.restore_version(7, 3).await.unwrap();
    assert_eq!(story.version, 6);
    assert!(!story.is_rich());
}

#[tokio::test]
async fn upload_normalizes_returned_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/stories/7/illustrations"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 12,
            "imagePath": "uploads\\7\\fox.png"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/stories/7/illustrations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 12, "story_id": 7, "path": "uploads\\7\\fox.png", "position": 14 }
        ])))
        .mount(&server)
        .await;

    let backend = std::sync::Arc::new(backend_for(&server).await);
    let tracker = story_core::IllustrationTracker::new(backend, 7);
    let upload = IllustrationUpload::new(vec![1u8, 2, 3]).named("fox.png", "image/png");
    let ill = tracker.attach(upload, 14).await.unwrap();
    assert_eq!(ill.id, Some(12));
    assert_eq!(ill.image_path.as_deref(), Some("uploads/7/fox.png"));

    let set = tracker.illustrations().await;
    assert_eq!(set.len(), 1);
    assert_eq!(set[0].image_path.as_deref(), Some("uploads/7/fox.png"));
}

#[tokio::test]
async fn save_rejects_a_version_that_did_not_increase() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/stories/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(story_json(7, "en", 4)))
        .expect(1)
        .mount(&server)
        .await;

    let backend = std::sync::Arc::new(backend_for(&server).await);
    let cache = StoryCache::in_memory();
    let current: Story = serde_json::from_value(story_json(7, "en", 4)).unwrap();
    cache.put_story(current.clone()).await;
    let history = VersionHistory::new(backend, cache);

    let mut session = EditorSession::new();
    let guard = session.begin_save().unwrap();
    let err = history
        .save(&current, &current.snapshot(), &guard)
        .await
        .unwrap_err();
    drop(guard);

    assert!(matches!(err, StoryError::Transport(_)));
    assert!(history.cache().story(7).await.is_none());
}
