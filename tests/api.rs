mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::{conversation, engine_with, wait_for_terminal, FakeAcquirer, Gate};
use serde_json::{json, Value};
use tower::ServiceExt;
use video_transcriber::api::{self, ErrorBody, SubmitResponse};
use video_transcriber::job::{Job, JobId, JobStatus};

const BODY_LIMIT: usize = 1024 * 1024;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn error_message(bytes: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(bytes).unwrap().message
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn url_submission_is_accepted_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(dir.path(), conversation(), FakeAcquirer::new(1200));
    let app = api::router(engine.clone(), BODY_LIMIT);

    let (status, body) = send(
        &app,
        post_json(
            "/jobs",
            json!({"input_url": "https://video.example/support-call.mp4", "output_format": "text"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let submitted: SubmitResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(submitted.message, "Transcription started");

    wait_for_terminal(&engine, &submitted.job_id).await;

    let (status, body) = send(&app, get(&format!("/jobs/{}", submitted.job_id))).await;
    assert_eq!(status, StatusCode::OK);
    let job: Job = serde_json::from_slice(&body).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);

    let response = app
        .clone()
        .oneshot(get(&format!("/jobs/{}/artifact", submitted.job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"support-call_transcription_"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.starts_with("Transcript: "));
    assert!(text.contains("[customer] I need to change my order"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn submission_errors_are_reported_as_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(dir.path(), conversation(), FakeAcquirer::new(1200));
    let app = api::router(engine.clone(), BODY_LIMIT);

    let (status, body) = send(&app, post_json("/jobs", json!({"output_format": "json"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("input_url"));

    let (status, body) = send(
        &app,
        post_json(
            "/jobs",
            json!({"input_url": "https://video.example/a.mp4", "output_format": "srt"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("srt"));

    let (status, _) = send(&app, post_json("/jobs", json!({"input_url": "file:///etc/passwd"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(engine.list().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_and_unfinished_jobs_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Gate::new();
    let engine = engine_with(dir.path(), conversation(), FakeAcquirer::new(1200).gated(gate.clone()));
    let app = api::router(engine.clone(), BODY_LIMIT);

    let (status, body) = send(&app, get(&format!("/jobs/{}", JobId::new()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(error_message(&body).contains("not found"));

    let (status, _) = send(&app, get("/jobs/not-a-job-id")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(
        &app,
        post_json("/jobs", json!({"input_url": "https://video.example/slow.mp4"})),
    )
    .await;
    let submitted: SubmitResponse = serde_json::from_slice(&body).unwrap();

    let (status, body) = send(&app, get(&format!("/jobs/{}/artifact", submitted.job_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(error_message(&body).contains("not ready"));

    gate.open();
    wait_for_terminal(&engine, &submitted.job_id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multipart_upload_creates_a_structured_job() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(dir.path(), conversation(), FakeAcquirer::new(1200));
    let app = api::router(engine.clone(), BODY_LIMIT);

    let boundary = "transcriber-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"output_format\"\r\n\r\n\
         json\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"video_file\"; filename=\"meeting.mp4\"\r\n\
         Content-Type: video/mp4\r\n\r\n\
         fake video bytes\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/jobs")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let submitted: SubmitResponse = serde_json::from_slice(&body).unwrap();

    let job = wait_for_terminal(&engine, &submitted.job_id).await;
    assert_eq!(job.input, "meeting.mp4");
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    let artifact = job.result.unwrap().artifact_path;
    assert_eq!(artifact.extension().unwrap(), "json");
    assert!(!job.upload_path.unwrap().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multipart_without_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(dir.path(), conversation(), FakeAcquirer::new(1200));
    let app = api::router(engine.clone(), BODY_LIMIT);

    let boundary = "transcriber-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"output_format\"\r\n\r\n\
         text\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/jobs")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("file"));
    assert!(engine.list().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_and_cancel_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(dir.path(), conversation(), FakeAcquirer::new(1200));
    let app = api::router(engine.clone(), BODY_LIMIT);

    let (_, body) = send(
        &app,
        post_json("/jobs", json!({"input_url": "https://video.example/a.mp4"})),
    )
    .await;
    let submitted: SubmitResponse = serde_json::from_slice(&body).unwrap();
    wait_for_terminal(&engine, &submitted.job_id).await;

    let (status, body) = send(&app, get("/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Value = serde_json::from_slice(&body).unwrap();
    let entry = &listed[submitted.job_id.to_string()];
    assert_eq!(entry["status"], "completed");

    let cancel = Request::builder()
        .method(Method::POST)
        .uri(format!("/jobs/{}/cancel", submitted.job_id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, cancel).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(error_message(&body).contains("already finished"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_upload_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(dir.path(), conversation(), FakeAcquirer::new(1200));
    let app = api::router(engine.clone(), BODY_LIMIT);

    let boundary = "transcriber-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"empty.mp4\"\r\n\
         Content-Type: video/mp4\r\n\r\n\
         \r\n\
         --{boundary}--\r\n"
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/jobs")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("empty"));
    assert!(engine.list().is_empty());
}
