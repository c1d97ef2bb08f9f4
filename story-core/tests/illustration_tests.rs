use std::sync::Arc;

use chrono::Utc;
use story_core::{
    AgeGroup, EditorSession, Illustration, IllustrationTracker, IllustrationUpload,
    InMemoryBackend, RenderBlock, Story, StoryError, MAX_ILLUSTRATION_BYTES,
};

const CONTENT: &str = "The cat climbed the tree.\n[Illustration: a cat]\nThen it slept.";

async fn setup() -> (InMemoryBackend, IllustrationTracker) {
    let backend = InMemoryBackend::new();
    backend
        .insert_story(Story {
            id: 42,
            title: "Up the Tree".into(),
            content: CONTENT.into(),
            themes: vec![],
            age_group: AgeGroup::Toddler,
            locale: "en".into(),
            week: 1,
            day: 1,
            series: None,
            version: 1,
            created_at: Utc::now(),
        })
        .await;
    let tracker = IllustrationTracker::new(Arc::new(backend.clone()), 42);
    (backend, tracker)
}

fn png(size: usize) -> IllustrationUpload {
    IllustrationUpload::new(vec![0u8; size]).named("cat.png", "image/png")
}

#[tokio::test]
async fn oversized_upload_is_rejected_before_any_call() {
    let (backend, tracker) = setup().await;
    let err = tracker
        .attach(png(6 * 1024 * 1024), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, StoryError::Validation(_)));
    assert_eq!(backend.upload_calls(), 0);
    assert!(tracker.illustrations().await.is_empty());
}

#[tokio::test]
async fn upload_at_the_limit_is_accepted() {
    let (_backend, tracker) = setup().await;
    let ill = tracker.attach(png(MAX_ILLUSTRATION_BYTES), 0).await.unwrap();
    assert!(ill.id.is_some());
}

#[tokio::test]
async fn attach_uses_editor_insertion_position() {
    let (_backend, tracker) = setup().await;
    let mut session = EditorSession::new();
    session.load(CONTENT);
    let insertion = session.on_image_inserted(26);

    let ill = tracker.attach(png(1024), insertion.position).await.unwrap();
    assert_eq!(ill.position, 26);
    assert_eq!(ill.filename.as_deref(), Some("cat.png"));
    let path = ill.image_path.clone().unwrap();
    assert!(path.starts_with("illustrations/42/"));

    let set = tracker.illustrations().await;
    assert_eq!(set.len(), 1);
    assert_eq!(set[0].id, ill.id);
}

#[tokio::test]
async fn prompt_is_replaced_once_an_image_exists() {
    let (_backend, tracker) = setup().await;
    let before = tracker.render(CONTENT).await;
    assert!(before.contains(&RenderBlock::PromptCallout {
        text: "a cat".into()
    }));

    tracker.attach(png(2048), 26).await.unwrap();
    let after = tracker.render(CONTENT).await;
    assert!(!after
        .iter()
        .any(|b| matches!(b, RenderBlock::PromptCallout { .. })));
    assert!(!after.iter().any(|b| matches!(
        b,
        RenderBlock::Paragraph { text } if text.contains("[Illustration")
    )));
    assert!(after
        .iter()
        .any(|b| matches!(b, RenderBlock::Image { .. })));
}

#[tokio::test]
async fn concurrent_uploads_reconcile_in_server_order() {
    let (_backend, tracker) = setup().await;
    let results = tracker
        .attach_many(vec![
            (png(100), 40),
            (png(7 * 1024 * 1024), 5),
            (png(100), 3),
        ])
        .await;
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(StoryError::Validation(_))));
    assert!(results[2].is_ok());

    let positions: Vec<usize> = tracker
        .illustrations()
        .await
        .iter()
        .map(|i| i.position)
        .collect();
    assert_eq!(positions, vec![3, 40]);
}

#[tokio::test]
async fn delete_removes_from_backend_and_set() {
    let (_backend, tracker) = setup().await;
    let ill = tracker.attach(png(100), 0).await.unwrap();
    tracker.delete(ill.id.unwrap()).await.unwrap();
    assert!(tracker.illustrations().await.is_empty());
}

#[tokio::test]
async fn delete_of_unknown_id_is_not_found() {
    let (_backend, tracker) = setup().await;
    let err = tracker.delete(777).await.unwrap_err();
    assert!(matches!(err, StoryError::NotFound(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn pending_illustrations_are_not_deletable() {
    let (_backend, tracker) = setup().await;
    tracker.attach(png(100), 0).await.unwrap();
    assert_eq!(tracker.deletable().await.len(), 1);

    let pending = Illustration::pending(42, 12);
    let err = tracker.delete_entry(&pending).await.unwrap_err();
    assert!(matches!(err, StoryError::Validation(_)));
    assert_eq!(tracker.illustrations().await.len(), 1);
}

#[tokio::test]
async fn failed_upload_leaves_set_unchanged() {
    let (backend, tracker) = setup().await;
    tracker.attach(png(100), 0).await.unwrap();
    backend.set_offline(true);
    let err = tracker.attach(png(100), 5).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(tracker.illustrations().await.len(), 1);
}
