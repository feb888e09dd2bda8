//! AI media providers.
//!
//! [`MediaProvider`] is the seam between generation jobs and a vendor API.
//! Images come back synchronously; videos are remote tasks that are
//! submitted once and then polled with [`poll_until_done`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::error::JobError;
use crate::runner::ProgressReporter;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    Malformed(String),
}

impl From<ProviderError> for JobError {
    fn from(err: ProviderError) -> Self {
        JobError::Failed(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ImageRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// e.g. `"1024x1024"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Overrides the provider's default image model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VideoRequest {
    pub prompt: String,
    /// First-frame reference image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Clip length in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// State of a remote video task.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoPoll {
    Running { progress: Option<u8> },
    Succeeded { url: String },
    Failed { reason: String },
}

#[async_trait]
pub trait MediaProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Generates one image and returns its URL.
    async fn generate_image(&self, request: &ImageRequest) -> Result<String, ProviderError>;

    /// Submits a video task and returns the provider's task id.
    async fn submit_video(&self, request: &VideoRequest) -> Result<String, ProviderError>;

    async fn poll_video(&self, remote_id: &str) -> Result<VideoPoll, ProviderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 180,
        }
    }
}

/// Polls `remote_id` until the provider reports a final state, forwarding
/// progress to `reporter`. Transport errors are retried within the attempt
/// budget; API errors end the job.
pub async fn poll_until_done(
    provider: &dyn MediaProvider,
    remote_id: &str,
    policy: &PollPolicy,
    reporter: &ProgressReporter,
) -> Result<String, JobError> {
    for attempt in 1..=policy.max_attempts {
        match provider.poll_video(remote_id).await {
            Ok(VideoPoll::Succeeded { url }) => return Ok(url),
            Ok(VideoPoll::Failed { reason }) => return Err(JobError::Failed(reason)),
            Ok(VideoPoll::Running { progress }) => {
                let progress = progress.map_or(20, scale_remote_progress);
                reporter.report(
                    progress,
                    format!("waiting for {} ({attempt}/{})", provider.name(), policy.max_attempts),
                );
            }
            Err(ProviderError::Http(e)) => {
                warn!(task_id = reporter.task_id(), remote_id, attempt, error = %e, "video poll failed; retrying");
            }
            Err(e) => return Err(e.into()),
        }
        tokio::time::sleep(policy.interval).await;
    }
    Err(JobError::failed(format!(
        "provider did not finish after {} polls",
        policy.max_attempts
    )))
}

/// Maps remote 0-100 into 20-95 so submission and finalization keep their
/// share of the bar.
fn scale_remote_progress(remote: u8) -> u8 {
    let scaled = 20 + u32::from(remote.min(100)) * 75 / 100;
    u8::try_from(scaled).unwrap_or(95)
}

/// Work for an `image_generation` task. Returns `{"url"}`.
pub async fn run_image_generation(
    provider: &dyn MediaProvider,
    request: &ImageRequest,
    reporter: &ProgressReporter,
) -> Result<Value, JobError> {
    reporter.report(10, format!("requesting image from {}", provider.name()));
    let url = provider.generate_image(request).await?;
    Ok(json!({ "url": url }))
}

/// Work for a `video_generation` task. Returns `{"url", "remote_task_id"}`.
pub async fn run_video_generation(
    provider: &dyn MediaProvider,
    request: &VideoRequest,
    policy: &PollPolicy,
    reporter: &ProgressReporter,
) -> Result<Value, JobError> {
    reporter.report(5, format!("submitting video to {}", provider.name()));
    let remote_id = provider.submit_video(request).await?;
    debug!(task_id = reporter.task_id(), remote_id = %remote_id, "video task submitted");
    reporter.report(20, "video queued at provider");
    let url = poll_until_done(provider, &remote_id, policy, reporter).await?;
    Ok(json!({ "url": url, "remote_task_id": remote_id }))
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub image_model: String,
    pub video_model: String,
    pub request_timeout: Duration,
}

/// HTTP provider speaking an OpenAI-compatible images endpoint and a
/// submit/poll content-generation task API for video.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    config: ProviderConfig,
    client: Client,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(concat!("drama-tasks/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProviderError> {
        let resp = self.authorized(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body: String = body.chars().take(512).collect();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoTaskCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct VideoTaskStatus {
    status: String,
    #[serde(default)]
    progress: Option<u8>,
    #[serde(default)]
    content: Option<VideoContent>,
    #[serde(default)]
    error: Option<RemoteError>,
}

#[derive(Debug, Deserialize)]
struct VideoContent {
    video_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    #[serde(default)]
    message: Option<String>,
}

fn interpret_status(status: VideoTaskStatus) -> Result<VideoPoll, ProviderError> {
    match status.status.as_str() {
        "queued" | "pending" | "running" | "processing" => Ok(VideoPoll::Running {
            progress: status.progress,
        }),
        "succeeded" | "completed" => status
            .content
            .and_then(|c| c.video_url)
            .map(|url| VideoPoll::Succeeded { url })
            .ok_or_else(|| ProviderError::Malformed("succeeded without video_url".into())),
        "failed" | "cancelled" | "expired" => Ok(VideoPoll::Failed {
            reason: status
                .error
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("video task {}", status.status)),
        }),
        other => Err(ProviderError::Malformed(format!("unknown task status '{other}'"))),
    }
}

#[async_trait]
impl MediaProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<String, ProviderError> {
        let body = json!({
            "model": request.model.as_deref().unwrap_or(&self.config.image_model),
            "prompt": request.prompt,
            "negative_prompt": request.negative_prompt,
            "size": request.size.as_deref().unwrap_or("1024x1024"),
            "n": 1,
        });
        let resp: ImagesResponse = self
            .send_json(self.client.post(self.endpoint("images/generations")).json(&body))
            .await?;
        resp.data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| ProviderError::Malformed("no image url in response".into()))
    }

    async fn submit_video(&self, request: &VideoRequest) -> Result<String, ProviderError> {
        let mut content = vec![json!({ "type": "text", "text": request.prompt })];
        if let Some(image_url) = &request.image_url {
            content.push(json!({ "type": "image_url", "image_url": { "url": image_url } }));
        }
        let body = json!({
            "model": request.model.as_deref().unwrap_or(&self.config.video_model),
            "content": content,
            "duration": request.duration,
            "ratio": request.aspect_ratio,
        });
        let created: VideoTaskCreated = self
            .send_json(
                self.client
                    .post(self.endpoint("contents/generations/tasks"))
                    .json(&body),
            )
            .await?;
        Ok(created.id)
    }

    async fn poll_video(&self, remote_id: &str) -> Result<VideoPoll, ProviderError> {
        let status: VideoTaskStatus = self
            .send_json(
                self.client
                    .get(self.endpoint(&format!("contents/generations/tasks/{remote_id}"))),
            )
            .await?;
        interpret_status(status)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    struct ScriptedProvider {
        polls: Mutex<VecDeque<VideoPoll>>,
    }

    impl ScriptedProvider {
        fn new(polls: Vec<VideoPoll>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
            }
        }
    }

    #[async_trait]
    impl MediaProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate_image(&self, request: &ImageRequest) -> Result<String, ProviderError> {
            Ok(format!("https://cdn.test/{}.png", request.prompt.len()))
        }

        async fn submit_video(&self, _request: &VideoRequest) -> Result<String, ProviderError> {
            Ok("remote-1".into())
        }

        async fn poll_video(&self, _remote_id: &str) -> Result<VideoPoll, ProviderError> {
            Ok(self
                .polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(VideoPoll::Running { progress: None }))
        }
    }

    fn fast() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 5,
        }
    }

    fn video() -> VideoRequest {
        VideoRequest {
            prompt: "waves".into(),
            image_url: None,
            duration: Some(5),
            aspect_ratio: None,
            model: None,
        }
    }

    #[tokio::test]
    async fn video_generation_polls_until_success() {
        let provider = ScriptedProvider::new(vec![
            VideoPoll::Running { progress: Some(50) },
            VideoPoll::Succeeded {
                url: "https://cdn.test/clip.mp4".into(),
            },
        ]);
        let (reporter, mut rx) = ProgressReporter::channel("t1");

        let result = run_video_generation(&provider, &video(), &fast(), &reporter)
            .await
            .unwrap();
        assert_eq!(result["url"], "https://cdn.test/clip.mp4");
        assert_eq!(result["remote_task_id"], "remote-1");

        let mut last = 0;
        while let Ok(update) = rx.try_recv() {
            last = update.progress;
        }
        assert_eq!(last, 57);
    }

    #[tokio::test]
    async fn remote_failure_becomes_job_failure() {
        let provider = ScriptedProvider::new(vec![VideoPoll::Failed {
            reason: "content policy".into(),
        }]);
        let (reporter, _rx) = ProgressReporter::channel("t2");
        let err = run_video_generation(&provider, &video(), &fast(), &reporter)
            .await
            .unwrap_err();
        assert_eq!(err, JobError::failed("content policy"));
    }

    #[tokio::test]
    async fn polling_gives_up_after_budget() {
        let provider = ScriptedProvider::new(vec![]);
        let (reporter, _rx) = ProgressReporter::channel("t3");
        let err = poll_until_done(&provider, "remote-1", &fast(), &reporter)
            .await
            .unwrap_err();
        assert_eq!(err, JobError::failed("provider did not finish after 5 polls"));
    }

    #[tokio::test]
    async fn image_generation_returns_url_payload() {
        let provider = ScriptedProvider::new(vec![]);
        let (reporter, _rx) = ProgressReporter::channel("t4");
        let request = ImageRequest {
            prompt: "abc".into(),
            negative_prompt: None,
            size: None,
            model: None,
        };
        let result = run_image_generation(&provider, &request, &reporter).await.unwrap();
        assert_eq!(result, json!({"url": "https://cdn.test/3.png"}));
    }

    #[test]
    fn status_interpretation() {
        let parse = |v: Value| interpret_status(serde_json::from_value(v).unwrap());
        assert_eq!(
            parse(json!({"status": "running", "progress": 10})).unwrap(),
            VideoPoll::Running { progress: Some(10) }
        );
        assert_eq!(
            parse(json!({"status": "succeeded", "content": {"video_url": "u.mp4"}})).unwrap(),
            VideoPoll::Succeeded { url: "u.mp4".into() }
        );
        assert_eq!(
            parse(json!({"status": "failed", "error": {"message": "quota"}})).unwrap(),
            VideoPoll::Failed { reason: "quota".into() }
        );
        assert!(matches!(
            parse(json!({"status": "succeeded"})),
            Err(ProviderError::Malformed(_))
        ));
        assert!(parse(json!({"status": "weird"})).is_err());
    }

    #[test]
    fn remote_progress_scaling() {
        assert_eq!(scale_remote_progress(0), 20);
        assert_eq!(scale_remote_progress(100), 95);
        assert_eq!(scale_remote_progress(250), 95);
    }
}
