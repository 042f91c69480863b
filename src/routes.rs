use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::Stream;
use include_dir::{include_dir, Dir};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    auth::{AuthorizationError, PasscodeGate},
    models::{
        AspectRatio, GenerationRequest, JobEvent, JobReport, Style, ValidationError,
        MIN_GUIDANCE_SCALE, SAMPLES_RANGE, STEPS_RANGE,
    },
    monster::{cancel_channel, ImageService, MonsterError},
};

static STATIC_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/static");

#[derive(Clone)]
pub struct AppState {
    pub gate: PasscodeGate,
    pub service: Arc<dyn ImageService>,
    pub in_flight: Arc<Mutex<bool>>,
}

impl AppState {
    pub fn new(gate: PasscodeGate, service: Arc<dyn ImageService>) -> Self {
        Self { gate, service, in_flight: Arc::default() }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/options", get(options))
        .route("/api/unlock", post(unlock))
        .route("/api/generate", post(generate))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    status: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(AuthorizationError),
    Invalid(ValidationError),
    Busy,
    Job(MonsterError),
}

impl ApiError {
    fn into_parts(self) -> (StatusCode, ErrorBody) {
        let (code, message, detail) = match self {
            ApiError::Unauthorized(e) => (StatusCode::UNAUTHORIZED, e.to_string(), None),
            ApiError::Invalid(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string(), None),
            ApiError::Busy => (
                StatusCode::CONFLICT,
                "An image generation job is already running.".to_string(),
                None,
            ),
            ApiError::Job(e) => {
                let detail = match &e {
                    MonsterError::Submission { body } => Some(body.clone()),
                    MonsterError::Poll { payload } => Some(payload.clone()),
                    _ => None,
                };
                let code = match e {
                    MonsterError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (code, e.to_string(), detail)
            }
        };
        (code, ErrorBody { status: code.as_u16(), message, detail })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, body) = self.into_parts();
        (code, Json(body)).into_response()
    }
}

// Clears the single-job flag however the job ends.
struct InFlightGuard(Arc<Mutex<bool>>);

impl InFlightGuard {
    fn acquire(flag: &Arc<Mutex<bool>>) -> Option<Self> {
        let mut busy = flag.lock();
        if *busy {
            return None;
        }
        *busy = true;
        Some(Self(flag.clone()))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        *self.0.lock() = false;
    }
}

pub async fn index() -> Response {
    match STATIC_DIR.get_file("index.html").and_then(|f| f.contents_utf8()) {
        Some(page) => Html(page).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct Bounds<T> {
    pub min: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<T>,
}

#[derive(Debug, Serialize)]
pub struct FormOptions {
    pub aspect_ratios: Vec<AspectRatio>,
    pub styles: Vec<Style>,
    pub samples: Bounds<u8>,
    pub steps: Bounds<u16>,
    pub guidance_scale: Bounds<f64>,
    pub defaults: GenerationRequest,
}

pub async fn options() -> Json<FormOptions> {
    Json(FormOptions {
        aspect_ratios: AspectRatio::ALL.to_vec(),
        styles: Style::ALL.to_vec(),
        samples: Bounds { min: *SAMPLES_RANGE.start(), max: Some(*SAMPLES_RANGE.end()) },
        steps: Bounds { min: *STEPS_RANGE.start(), max: Some(*STEPS_RANGE.end()) },
        guidance_scale: Bounds { min: MIN_GUIDANCE_SCALE, max: None },
        defaults: GenerationRequest::default(),
    })
}

#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    #[serde(default)]
    pub passcode: String,
}

#[derive(Debug, Serialize)]
pub struct UnlockResponse {
    pub unlocked: bool,
}

pub async fn unlock(
    State(state): State<AppState>,
    Json(body): Json<UnlockRequest>,
) -> Result<Json<UnlockResponse>, ApiError> {
    state.gate.check(&body.passcode).map_err(|e| {
        tracing::warn!("🔒 Rejected unlock attempt");
        ApiError::Unauthorized(e)
    })?;
    Ok(Json(UnlockResponse { unlocked: true }))
}

/// Generation fields plus the passcode, all in one JSON body.
#[derive(Debug, Deserialize)]
pub struct GenerateForm {
    #[serde(default)]
    pub passcode: String,
    #[serde(flatten)]
    pub request: GenerationRequest,
}

/// One server-sent event of a running job: `job`, then `done` or `failed`.
#[derive(Debug)]
enum StreamFrame {
    Job(JobEvent),
    Done(JobReport),
    Failed(ErrorBody),
}

impl StreamFrame {
    fn into_event(self) -> Result<Event, axum::Error> {
        match self {
            StreamFrame::Job(event) => Event::default().event("job").json_data(event),
            StreamFrame::Done(report) => Event::default().event("done").json_data(report),
            StreamFrame::Failed(body) => Event::default().event("failed").json_data(body),
        }
    }
}

pub async fn generate(
    State(state): State<AppState>,
    Json(form): Json<GenerateForm>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    state.gate.check(&form.passcode).map_err(|e| {
        tracing::warn!("🔒 Generation refused: bad passcode");
        ApiError::Unauthorized(e)
    })?;
    let request = form.request;
    request.validate().map_err(ApiError::Invalid)?;

    let guard = InFlightGuard::acquire(&state.in_flight).ok_or(ApiError::Busy)?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_generation(state.service.clone(), request, guard, tx));

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        Some((frame.into_event(), rx))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn run_generation(
    service: Arc<dyn ImageService>,
    request: GenerationRequest,
    guard: InFlightGuard,
    tx: mpsc::UnboundedSender<StreamFrame>,
) {
    let job_id = Uuid::new_v4();
    let started_at = Utc::now();
    tracing::info!(%job_id, "🚀 Generating image for prompt: {}", request.prompt);

    let (cancel_tx, mut cancel) = cancel_channel();
    let mut events = Vec::new();
    let result = service
        .run_job(&request, &mut cancel, &mut |event| {
            // A closed stream means the browser went away.
            if tx.send(StreamFrame::Job(event.clone())).is_err() {
                let _ = cancel_tx.send(true);
            }
            events.push(event)
        })
        .await;

    // Release before the final frame so the client can start the next job on receipt.
    drop(guard);

    let frame = match result {
        Ok(images) => {
            tracing::info!(%job_id, "✅ Image generation completed with {} image(s)", images.len());
            let process_id = events.iter().find_map(|e| match e {
                JobEvent::Submitted { process_id } => Some(process_id.clone()),
                _ => None,
            });
            StreamFrame::Done(JobReport {
                job_id,
                process_id,
                images,
                events,
                started_at,
                finished_at: Utc::now(),
            })
        }
        Err(e) => {
            tracing::error!(%job_id, "❌ Image generation failed: {}", e);
            StreamFrame::Failed(ApiError::Job(e).into_parts().1)
        }
    };
    let _ = tx.send(frame);
}
