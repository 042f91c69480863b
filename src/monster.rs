use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client, RequestBuilder};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{AppConfig, Secret};
use crate::models::{GenerationRequest, JobEvent, JobState, StatusSnapshot, SubmissionResult};

/// Progress reported while the service says the job is queued or running.
/// The service exposes no percentage, so this is a fixed midpoint.
pub const POLLING_PROGRESS: u8 = 50;

#[derive(Debug, Error)]
pub enum MonsterError {
    #[error("Failed to initiate image generation: {body}")]
    Submission { body: String },
    #[error("Unexpected status received: {payload}")]
    Poll { payload: String },
    #[error("HTTP error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("job still pending after {attempts} status checks")]
    Timeout { attempts: u32 },
    #[error("job polling was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls until the service reports a terminal state.
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

/// Flipping the sender to `true` stops a running poll loop at its next wait.
pub type CancelSignal = watch::Receiver<bool>;

pub fn cancel_channel() -> (watch::Sender<bool>, CancelSignal) {
    watch::channel(false)
}

pub type EventSink<'a> = &'a mut (dyn FnMut(JobEvent) + Send);

#[async_trait]
pub trait ImageService: Send + Sync {
    async fn submit(&self, request: &GenerationRequest) -> Result<SubmissionResult, MonsterError>;

    async fn poll_until_terminal(
        &self,
        status_url: &str,
        cancel: &mut CancelSignal,
        on_event: EventSink<'_>,
    ) -> Result<Vec<String>, MonsterError>;

    /// Submit, then follow the job to its terminal state.
    async fn run_job(
        &self,
        request: &GenerationRequest,
        cancel: &mut CancelSignal,
        on_event: EventSink<'_>,
    ) -> Result<Vec<String>, MonsterError> {
        let submission = self.submit(request).await?;
        on_event(JobEvent::Submitted {
            process_id: submission.process_id.clone(),
        });
        self.poll_until_terminal(&submission.status_url, cancel, on_event)
            .await
    }
}

pub struct MonsterClient {
    client: Client,
    api_key: Secret,
    generate_url: String,
    policy: PollPolicy,
}

impl MonsterClient {
    pub fn new(config: &AppConfig) -> Result<Self, MonsterError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            generate_url: config.generate_url.clone(),
            policy: config.poll.clone(),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(ACCEPT, "application/json")
            .bearer_auth(self.api_key.expose())
    }

    /// One GET of the status endpoint. Non-2xx answers and bodies without a
    /// string `status` are fatal for the job.
    pub async fn fetch_status(&self, status_url: &str) -> Result<StatusSnapshot, MonsterError> {
        let response = self.authorized(self.client.get(status_url)).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("❌ Status endpoint answered {}: {}", status, body);
            return Err(MonsterError::Poll { payload: body });
        }

        StatusSnapshot::decode(&body).map_err(|e| {
            error!("❌ Undecodable status payload ({}): {}", e, body);
            MonsterError::Poll { payload: body }
        })
    }
}

#[async_trait]
impl ImageService for MonsterClient {
    async fn submit(&self, request: &GenerationRequest) -> Result<SubmissionResult, MonsterError> {
        info!(
            "📤 Submitting generation: style={:?} aspect_ratio={:?} samples={} steps={}",
            request.style, request.aspect_ratio, request.samples, request.steps
        );

        let response = self
            .authorized(self.client.post(&self.generate_url))
            .json(request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        info!("📥 Submission response status: {}", status);

        if !status.is_success() {
            error!("❌ Generation endpoint refused the job: {}", body);
            return Err(MonsterError::Submission { body });
        }

        match serde_json::from_str::<SubmissionResult>(&body) {
            Ok(result) => {
                info!("✅ Image generation started, process_id={}", result.process_id);
                Ok(result)
            }
            Err(e) => {
                error!("❌ Submission response lacks process_id/status_url ({}): {}", e, body);
                Err(MonsterError::Submission { body })
            }
        }
    }

    async fn poll_until_terminal(
        &self,
        status_url: &str,
        cancel: &mut CancelSignal,
        on_event: EventSink<'_>,
    ) -> Result<Vec<String>, MonsterError> {
        on_event(JobEvent::Progress(0));
        let mut attempts: u32 = 0;

        loop {
            if *cancel.borrow() {
                return Err(MonsterError::Cancelled);
            }

            attempts += 1;
            let snapshot = self.fetch_status(status_url).await?;

            match snapshot.state {
                JobState::Completed => {
                    info!("✅ Job completed with {} image(s)", snapshot.output.len());
                    for url in &snapshot.output {
                        info!("🖼️ Output URL: {}", url);
                        on_event(JobEvent::Image(url.clone()));
                    }
                    on_event(JobEvent::Progress(100));
                    return Ok(snapshot.output);
                }
                JobState::InQueue | JobState::InProgress => {
                    on_event(JobEvent::Progress(POLLING_PROGRESS));
                    if let Some(max) = self.policy.max_attempts {
                        if attempts >= max {
                            warn!("⏱️ Giving up after {} status checks", attempts);
                            return Err(MonsterError::Timeout { attempts });
                        }
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.policy.interval) => {}
                        _ = cancelled(cancel) => {
                            info!("🛑 Polling cancelled after {} status checks", attempts);
                            return Err(MonsterError::Cancelled);
                        }
                    }
                }
                JobState::Other(ref state) => {
                    error!("❌ Unexpected status {}: {}", state, snapshot.raw);
                    on_event(JobEvent::Progress(100));
                    return Err(MonsterError::Poll {
                        payload: snapshot.raw.to_string(),
                    });
                }
            }
        }
    }
}

// Resolves once cancellation is requested; never resolves if the sender is gone.
async fn cancelled(cancel: &mut CancelSignal) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}
