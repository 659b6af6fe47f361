//! Transcription job engine.
//!
//! [`JobEngine::submit`] records a `queued` job and returns its id without
//! waiting on any media or model work. Each job then runs as its own tokio
//! task: it waits for a slot in the bounded worker pool, moves to
//! `processing`, and hands the blocking pipeline (acquire, decode, tag,
//! materialize) to the blocking thread pool so registry reads stay responsive.
//! Whatever the pipeline returns, including a worker panic, is turned into a
//! terminal state on that job only.
//!
//! Only the task that owns a job writes to its record. Cancellation is a
//! request: the owning task observes the token while external tools run, at
//! every chunk boundary and before saving, then records the failure itself.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::acquisition::{is_remote, AcquiredAudio, AudioAcquirer, StagedUpload};
use crate::audio::read_wav_samples;
use crate::decoder::{decode_stream, DecodeProgress, StreamingDecoder};
use crate::error::{JobError, LookupError, SubmitError};
use crate::job::{Job, JobId, JobResult, JobStatus, PROGRESS_ACQUIRED};
use crate::registry::JobRegistry;
use crate::roles::RoleClassifier;
use crate::transcript::{OutputFormat, TranscriptWriter};
use crate::{Phrase, Utterance};

/// Share of the progress bar spent decoding, after acquisition.
const DECODE_PROGRESS_SPAN: usize = 85;
const PROGRESS_SAVING: u8 = 97;
const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub output_dir: PathBuf,
    /// Jobs allowed to run the pipeline at the same time.
    pub max_concurrent_jobs: usize,
    /// Queued plus processing jobs accepted before submissions are refused.
    pub max_pending_jobs: usize,
    /// How long finished jobs stay visible. `None` keeps them forever.
    pub job_ttl: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("transcriptions"),
            max_concurrent_jobs: 2,
            max_pending_jobs: 32,
            job_ttl: None,
        }
    }
}

/// A validated submission, ready to become a job.
#[derive(Debug)]
pub struct JobRequest {
    input: String,
    descriptor: String,
    format: OutputFormat,
    upload: Option<StagedUpload>,
}

impl JobRequest {
    /// Transcribe a hosted video.
    pub fn url(url: &str, format: OutputFormat) -> Result<Self, SubmitError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SubmitError::MissingField("input_url"));
        }
        if !is_remote(url) {
            return Err(SubmitError::InvalidUrl(url.to_string()));
        }
        Ok(Self {
            input: url.to_string(),
            descriptor: url.to_string(),
            format,
            upload: None,
        })
    }

    /// Transcribe an uploaded video. The staged file is deleted once the job
    /// finishes, successfully or not.
    pub fn upload(upload: StagedUpload, format: OutputFormat) -> Self {
        Self {
            input: upload.file_name().to_string(),
            descriptor: upload.path().to_string_lossy().into_owned(),
            format,
            upload: Some(upload),
        }
    }

    /// Transcribe a video already present on the server. The file is left in
    /// place.
    pub fn local_file(path: &Path, format: OutputFormat) -> Self {
        let descriptor = path.to_string_lossy().into_owned();
        Self {
            input: descriptor.clone(),
            descriptor,
            format,
            upload: None,
        }
    }

    fn upload_path(&self) -> Option<PathBuf> {
        self.upload.as_ref().map(|upload| upload.path().to_path_buf())
    }

    /// Uploads are titled by the client's file name, not the staged copy.
    fn title_override(&self) -> Option<String> {
        self.upload.as_ref().map(StagedUpload::title)
    }
}

/// Bytes of a finished transcript, ready to serve.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub format: OutputFormat,
    pub bytes: Vec<u8>,
}

pub struct JobEngine<D: StreamingDecoder> {
    registry: Arc<JobRegistry>,
    pipeline: Pipeline<D>,
    workers: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    cancellations: Arc<DashMap<JobId, CancellationToken>>,
    shutdown: CancellationToken,
    job_ttl: Option<Duration>,
}

impl<D: StreamingDecoder> JobEngine<D> {
    pub fn new(
        config: EngineConfig,
        decoder: D,
        classifier: Arc<dyn RoleClassifier>,
        acquirer: Arc<dyn AudioAcquirer>,
    ) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new()),
            pipeline: Pipeline {
                decoder: Arc::new(decoder),
                classifier,
                acquirer,
                writer: Arc::new(TranscriptWriter::new(config.output_dir)),
            },
            workers: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending: config.max_pending_jobs.max(1),
            cancellations: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
            job_ttl: config.job_ttl,
        }
    }

    /// Jobs admitted and not yet terminal.
    pub fn pending_jobs(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Create a job and schedule it. Must be called within a tokio runtime.
    pub fn submit(&self, request: JobRequest) -> Result<JobId, SubmitError> {
        if self.shutdown.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }
        self.admit()?;

        let id = JobId::new();
        let job = Job::new(id, request.input.clone(), request.format, request.upload_path());
        self.registry.insert(job);

        let cancel = self.shutdown.child_token();
        self.cancellations.insert(id, cancel.clone());

        log::info!(
            "Job {id} queued: {} ({:?})",
            request.input,
            request.format
        );

        let worker = Worker {
            registry: Arc::clone(&self.registry),
            pipeline: self.pipeline.clone(),
            workers: Arc::clone(&self.workers),
            pending: Arc::clone(&self.pending),
            cancellations: Arc::clone(&self.cancellations),
        };
        tokio::spawn(worker.run(id, request, cancel));

        Ok(id)
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.registry.get(id)
    }

    pub fn list(&self) -> BTreeMap<JobId, Job> {
        self.registry.list()
    }

    /// Read the transcript of a completed job.
    pub async fn fetch_artifact(&self, id: &JobId) -> Result<Artifact, LookupError> {
        let job = self
            .registry
            .get(id)
            .ok_or_else(|| LookupError::NotFound(id.to_string()))?;

        let result = match (job.status, job.result) {
            (JobStatus::Completed, Some(result)) => result,
            (status, _) => return Err(LookupError::NotReady { id: *id, status }),
        };

        let path = result.artifact_path;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::warn!("Job {id}: artifact {} is gone", path.display());
                return Err(LookupError::ArtifactMissing(*id));
            }
            Err(e) => return Err(e.into()),
        };

        let file_name = path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or("transcript")
            .to_string();

        Ok(Artifact {
            file_name,
            format: job.output_format,
            bytes,
        })
    }

    /// Ask a queued or processing job to stop. It becomes `failed` once its
    /// worker notices.
    pub fn cancel(&self, id: &JobId) -> Result<Job, LookupError> {
        let job = self
            .registry
            .get(id)
            .ok_or_else(|| LookupError::NotFound(id.to_string()))?;

        if job.status.is_terminal() {
            return Err(LookupError::AlreadyFinished {
                id: *id,
                status: job.status,
            });
        }

        if let Some(token) = self.cancellations.get(id) {
            token.cancel();
            log::info!("Job {id}: cancellation requested");
        }
        Ok(job)
    }

    /// Remove finished jobs older than the configured TTL.
    pub fn evict_expired(&self) -> usize {
        match self.job_ttl {
            Some(ttl) => evict_older_than(&self.registry, ttl),
            None => 0,
        }
    }

    /// Periodically apply the retention TTL until shutdown. Returns `None`
    /// when no TTL is configured.
    pub fn spawn_retention_sweeper(&self) -> Option<JoinHandle<()>> {
        let ttl = self.job_ttl?;
        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown.clone();
        let period = (ttl / 2).clamp(MIN_SWEEP_PERIOD, MAX_SWEEP_PERIOD);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        evict_older_than(&registry, ttl);
                    }
                }
            }
        }))
    }

    /// Refuse new submissions and cancel every job still running.
    pub fn shutdown(&self) {
        log::info!(
            "Shutting down job engine with {} pending jobs",
            self.pending_jobs()
        );
        self.shutdown.cancel();
    }

    fn admit(&self) -> Result<(), SubmitError> {
        let max = self.max_pending;
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .map(|_| ())
            .map_err(|n| {
                log::warn!("Rejecting submission: {n} jobs already pending");
                SubmitError::QueueFull(n)
            })
    }
}

fn evict_older_than(registry: &JobRegistry, ttl: Duration) -> usize {
    let Ok(ttl) = chrono::Duration::from_std(ttl) else {
        return 0;
    };
    let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
        return 0;
    };
    let evicted = registry.evict_finished_before(cutoff);
    if evicted > 0 {
        log::info!("Evicted {evicted} finished jobs, {} remain", registry.len());
    }
    evicted
}

/// Everything a job needs besides its own record.
struct Worker<D: StreamingDecoder> {
    registry: Arc<JobRegistry>,
    pipeline: Pipeline<D>,
    workers: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    cancellations: Arc<DashMap<JobId, CancellationToken>>,
}

impl<D: StreamingDecoder> Worker<D> {
    async fn run(self, id: JobId, request: JobRequest, cancel: CancellationToken) {
        let outcome = self.execute(id, request, &cancel).await;
        self.finish(id, outcome);
    }

    async fn execute(
        &self,
        id: JobId,
        request: JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobResult, JobError> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            permit = Arc::clone(&self.workers).acquire_owned() => {
                permit.map_err(|_| JobError::Worker("worker pool closed".to_string()))?
            }
        };

        match self.registry.update(&id, |job| job.start()) {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(JobError::Worker(e.to_string())),
            None => return Err(JobError::Worker(format!("job {id} disappeared"))),
        }
        log::info!("Job {id}: processing {}", request.input);

        let pipeline = self.pipeline.clone();
        let progress = ProgressReporter {
            registry: Arc::clone(&self.registry),
            id,
        };
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            let outcome = pipeline.run(id, &request, &progress, &cancel);
            drop(request);
            outcome
        })
        .await
        .unwrap_or_else(|e| Err(JobError::Worker(e.to_string())))
    }

    fn finish(&self, id: JobId, outcome: Result<JobResult, JobError>) {
        let transition = match outcome {
            Ok(result) => {
                log::info!(
                    "Job {id} completed: {} utterances, saved to {}",
                    result.utterances.len(),
                    result.artifact_path.display()
                );
                self.registry.update(&id, |job| job.complete(result))
            }
            Err(err) => {
                let message = err.to_string();
                log::error!("Job {id} failed: {message}");
                self.registry.update(&id, |job| job.fail(message))
            }
        };

        if let Some(Err(e)) = transition {
            log::warn!("Job {id}: {e}");
        }

        // Released only once the terminal state is visible, so the pending
        // count never undercounts non-terminal jobs.
        self.cancellations.remove(&id);
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ProgressReporter {
    registry: Arc<JobRegistry>,
    id: JobId,
}

impl ProgressReporter {
    fn report(&self, progress: u8, message: impl Into<String>) {
        let message = message.into();
        if let Some(Err(e)) = self
            .registry
            .update(&self.id, |job| job.advance(progress, message))
        {
            log::warn!("Job {}: dropped progress update: {e}", self.id);
        }
    }
}

struct Pipeline<D> {
    decoder: Arc<D>,
    classifier: Arc<dyn RoleClassifier>,
    acquirer: Arc<dyn AudioAcquirer>,
    writer: Arc<TranscriptWriter>,
}

impl<D> Clone for Pipeline<D> {
    fn clone(&self) -> Self {
        Self {
            decoder: Arc::clone(&self.decoder),
            classifier: Arc::clone(&self.classifier),
            acquirer: Arc::clone(&self.acquirer),
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<D: StreamingDecoder> Pipeline<D> {
    fn run(
        &self,
        id: JobId,
        request: &JobRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<JobResult, JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let workspace = tempfile::Builder::new()
            .prefix("video_transcriber_")
            .tempdir()
            .map_err(JobError::Workspace)?;

        let mut audio = self
            .acquirer
            .acquire(&request.descriptor, workspace.path(), cancel)?;
        if let Some(title) = request.title_override() {
            audio.title = title;
        }
        progress.report(PROGRESS_ACQUIRED, "Audio acquired, decoding");

        let decoded = self.decode(id, &audio, progress, cancel);
        release_workspace(id, workspace);
        let phrases = decoded?;
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let utterances: Vec<Utterance> = phrases
            .into_iter()
            .map(|phrase| {
                let role = self.classifier.classify(&phrase.text);
                log::debug!("Job {id}: [{role}] {}", phrase.text);
                Utterance::from_phrase(phrase, role)
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        progress.report(PROGRESS_SAVING, "Saving transcript");
        let artifact_path =
            self.writer
                .write(&utterances, &audio.title, request.format, &id.short())?;

        Ok(JobResult {
            utterances,
            artifact_path,
        })
    }

    fn decode(
        &self,
        id: JobId,
        audio: &AcquiredAudio,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Phrase>, JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let sample_rate = self.decoder.sample_rate();
        let samples = read_wav_samples(&audio.path, sample_rate)?;
        log::info!(
            "Job {id}: decoding {} samples ({:.2}s at {sample_rate} Hz)",
            samples.len(),
            samples.len() as f64 / sample_rate.max(1) as f64
        );

        let phrases = decode_stream(&*self.decoder, &samples, cancel, |step: DecodeProgress| {
            let span = DECODE_PROGRESS_SPAN * step.chunks_done / step.chunks_total.max(1);
            let value = (PROGRESS_ACQUIRED as usize + span).min(u8::MAX as usize) as u8;
            progress.report(
                value,
                format!(
                    "Decoding audio ({}/{} chunks)",
                    step.chunks_done, step.chunks_total
                ),
            );
        })?;

        log::info!("Job {id}: decoded {} phrases", phrases.len());
        Ok(phrases)
    }
}

fn release_workspace(id: JobId, workspace: TempDir) {
    let path = workspace.path().to_path_buf();
    match workspace.close() {
        Ok(()) => log::debug!("Job {id}: removed workspace {}", path.display()),
        Err(e) => log::warn!("Job {id}: failed to remove workspace {}: {e}", path.display()),
    }
}
