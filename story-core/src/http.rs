use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::backend::{IllustrationUpload, StoryBackend, UploadedIllustration};
use crate::config::ClientConfig;
use crate::error::{StoryError, StoryResult};
use crate::model::{
    Illustration, IllustrationId, PageRequest, Story, StoryId, StoryPage, StorySnapshot, Version,
    VersionId,
};

#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    pub request_timeout: Duration,
    /// Extra attempts for idempotent reads. Writes are never retried.
    pub max_retries: u8,
    pub retry_backoff_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_backoff_ms: 250,
        }
    }
}

impl From<&ClientConfig> for HttpConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
            max_retries: config.retry_attempts,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }
}

/// [`StoryBackend`] over the story server's REST api.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
    config: HttpConfig,
}

impl HttpBackend {
    pub fn new(client: Client, base_url: &str, config: HttpConfig) -> StoryResult<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client,
            base,
            config,
        })
    }

    fn endpoint(&self, path: &str) -> StoryResult<Url> {
        Ok(self.base.join(path)?)
    }

    /// GET with bounded retries and linear backoff on transport failures.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> StoryResult<T> {
        let mut attempt: u8 = 0;
        loop {
            let request = self
                .client
                .get(url.clone())
                .query(query)
                .timeout(self.config.request_timeout);
            match send_checked(request).await {
                Ok(response) => return Ok(response.json::<T>().await?),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let backoff = self.config.retry_backoff_ms * u64::from(attempt);
                    debug!(url = %url, attempt, backoff_ms = backoff, error = %err, "retrying request");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

async fn send_checked(request: RequestBuilder) -> StoryResult<Response> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    if status == StatusCode::NOT_FOUND {
        return Err(StoryError::not_found(url.path().to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    warn!(url = %url, %status, "story server returned an error");
    Err(StoryError::Transport(format!(
        "{status} from {}: {}",
        url.path(),
        body.trim()
    )))
}

#[async_trait]
impl StoryBackend for HttpBackend {
    async fn fetch_stories_page(&self, request: &PageRequest) -> StoryResult<StoryPage> {
        let mut query = vec![
            ("offset", request.offset.to_string()),
            ("limit", request.page_size.to_string()),
        ];
        if let Some(locale) = &request.locale {
            query.push(("locale", locale.clone()));
        }
        if let Some(group) = request.age_group {
            query.push(("age_group", group.as_param().to_string()));
        }
        self.get_json(self.endpoint("stories")?, &query).await
    }

    async fn get_story(&self, story_id: StoryId) -> StoryResult<Story> {
        self.get_json(self.endpoint(&format!("stories/{story_id}"))?, &[])
            .await
    }

    async fn save_story(&self, story_id: StoryId, snapshot: &StorySnapshot) -> StoryResult<Story> {
        let request = self
            .client
            .put(self.endpoint(&format!("stories/{story_id}"))?)
            .json(snapshot)
            .timeout(self.config.request_timeout);
        Ok(send_checked(request).await?.json().await?)
    }

    async fn list_versions(&self, story_id: StoryId) -> StoryResult<Vec<Version>> {
        self.get_json(self.endpoint(&format!("stories/{story_id}/versions"))?, &[])
            .await
    }

    async fn restore_version(
        &self,
        story_id: StoryId,
        version_id: VersionId,
    ) -> StoryResult<Story> {
        let url = self.endpoint(&format!(
            "stories/{story_id}/versions/{version_id}/restore"
        ))?;
        let request = self
            .client
            .post(url)
            .timeout(self.config.request_timeout);
        Ok(send_checked(request).await?.json().await?)
    }

    async fn list_illustrations(&self, story_id: StoryId) -> StoryResult<Vec<Illustration>> {
        self.get_json(
            self.endpoint(&format!("stories/{story_id}/illustrations"))?,
            &[],
        )
        .await
    }

    async fn upload_illustration(
        &self,
        story_id: StoryId,
        upload: &IllustrationUpload,
        position: usize,
    ) -> StoryResult<UploadedIllustration> {
        let mut part = Part::bytes(upload.bytes.to_vec());
        if let Some(name) = &upload.filename {
            part = part.file_name(name.clone());
        }
        if let Some(mime) = &upload.mime_type {
            part = part.mime_str(mime)?;
        }
        let form = Form::new()
            .text("position", position.to_string())
            .part("file", part);
        let request = self
            .client
            .post(self.endpoint(&format!("stories/{story_id}/illustrations"))?)
            .multipart(form)
            .timeout(self.config.request_timeout);
        Ok(send_checked(request).await?.json().await?)
    }

    async fn delete_illustration(
        &self,
        story_id: StoryId,
        illustration_id: IllustrationId,
    ) -> StoryResult<()> {
        let request = self
            .client
            .delete(self.endpoint(&format!(
                "stories/{story_id}/illustrations/{illustration_id}"
            ))?)
            .timeout(self.config.request_timeout);
        send_checked(request).await?;
        Ok(())
    }
}
