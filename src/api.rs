//! HTTP surface over the job engine.
//!
//! | Method | Path | |
//! | --- | --- | --- |
//! | `POST` | `/jobs` | JSON `{input_url, output_format}` or multipart upload |
//! | `GET` | `/jobs` | every job, keyed by id |
//! | `GET` | `/jobs/:id` | one job |
//! | `GET` | `/jobs/:id/artifact` | transcript file of a completed job |
//! | `POST` | `/jobs/:id/cancel` | cancel a queued or processing job |
//!
//! Errors are answered with a status code and a `{"message": ...}` body.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::acquisition::StagedUpload;
use crate::decoder::StreamingDecoder;
use crate::engine::{JobEngine, JobRequest};
use crate::error::{LookupError, SubmitError};
use crate::job::{Job, JobId};
use crate::transcript::OutputFormat;

const UPLOAD_FIELDS: [&str; 2] = ["file", "video_file"];

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Submit(SubmitError::QueueFull(_) | SubmitError::ShuttingDown) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Submit(SubmitError::Staging(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Submit(_) => StatusCode::BAD_REQUEST,
            Self::Lookup(
                LookupError::NotFound(_)
                | LookupError::NotReady { .. }
                | LookupError::ArtifactMissing(_),
            ) => StatusCode::NOT_FOUND,
            Self::Lookup(LookupError::AlreadyFinished { .. }) => StatusCode::CONFLICT,
            Self::Lookup(LookupError::Io(_)) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed: {self}");
        } else {
            log::debug!("Request rejected: {self}");
        }
        (
            status,
            Json(ErrorBody {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitUrlBody {
    pub input_url: Option<String>,
    pub output_format: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub message: String,
}

type AppState<D> = Arc<JobEngine<D>>;

pub fn router<D: StreamingDecoder>(engine: Arc<JobEngine<D>>, body_limit: usize) -> Router {
    Router::new()
        .route("/jobs", post(submit_job::<D>).get(list_jobs::<D>))
        .route("/jobs/:id", get(get_job::<D>))
        .route("/jobs/:id/artifact", get(fetch_artifact::<D>))
        .route("/jobs/:id/cancel", post(cancel_job::<D>))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(engine)
}

async fn submit_job<D: StreamingDecoder>(
    State(engine): State<AppState<D>>,
    headers: HeaderMap,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let is_multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    let job_request = if is_multipart {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        upload_request(multipart).await?
    } else {
        let Json(body) = Json::<SubmitUrlBody>::from_request(request, &())
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        let format = parse_format(body.output_format.as_deref())?;
        let url = body
            .input_url
            .ok_or(SubmitError::MissingField("input_url"))?;
        JobRequest::url(&url, format)?
    };

    let job_id = engine.submit(job_request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            message: "Transcription started".to_string(),
        }),
    ))
}

async fn upload_request(mut multipart: Multipart) -> Result<JobRequest, ApiError> {
    let mut format = None;
    let mut upload = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| SubmitError::MalformedUpload(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if UPLOAD_FIELDS.contains(&name.as_str()) {
            let file_name = field
                .file_name()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or("upload")
                .to_string();

            let staged = tokio::task::spawn_blocking(move || StagedUpload::reserve(&file_name))
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?
                .map_err(SubmitError::Staging)?;

            // Written chunk by chunk; an early return drops `staged` and
            // removes the partial file.
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(staged.path())
                .await
                .map_err(SubmitError::Staging)?;
            let mut written = 0usize;
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| SubmitError::MalformedUpload(e.body_text()))?
            {
                file.write_all(&chunk).await.map_err(SubmitError::Staging)?;
                written += chunk.len();
            }
            file.flush().await.map_err(SubmitError::Staging)?;

            if written == 0 {
                return Err(SubmitError::MalformedUpload("uploaded file is empty".to_string()).into());
            }
            log::debug!("Staged upload {} ({written} bytes)", staged.path().display());
            upload = Some(staged);
        } else if name == "output_format" {
            let value = field
                .text()
                .await
                .map_err(|e| SubmitError::MalformedUpload(e.body_text()))?;
            format = Some(value);
        }
    }

    let format = parse_format(format.as_deref())?;
    let staged = upload.ok_or(SubmitError::MissingField("file"))?;
    Ok(JobRequest::upload(staged, format))
}

fn parse_format(raw: Option<&str>) -> Result<OutputFormat, SubmitError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => Ok(value.parse()?),
        None => Ok(OutputFormat::default()),
    }
}

fn parse_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| LookupError::NotFound(raw.to_string()).into())
}

async fn list_jobs<D: StreamingDecoder>(
    State(engine): State<AppState<D>>,
) -> Json<BTreeMap<JobId, Job>> {
    Json(engine.list())
}

async fn get_job<D: StreamingDecoder>(
    State(engine): State<AppState<D>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job_id = parse_id(&id)?;
    engine
        .get(&job_id)
        .map(Json)
        .ok_or_else(|| LookupError::NotFound(id).into())
}

async fn fetch_artifact<D: StreamingDecoder>(
    State(engine): State<AppState<D>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_id(&id)?;
    let artifact = engine.fetch_artifact(&job_id).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        artifact.file_name.replace(['"', '\\'], "_")
    );
    Ok((
        [
            (header::CONTENT_TYPE, artifact.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    ))
}

async fn cancel_job<D: StreamingDecoder>(
    State(engine): State<AppState<D>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_id(&id)?;
    let job = engine.cancel(&job_id)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}
