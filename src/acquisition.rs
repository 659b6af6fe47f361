//! Media acquisition: turning a job's input into mono PCM WAV audio.
//!
//! Two strategies share the [`AudioAcquirer`] contract. [`RemoteAcquirer`]
//! fetches the best audio stream of a hosted video with `yt-dlp` and transcodes
//! it with `ffmpeg`; [`LocalAcquirer`] demuxes the audio track of a file on
//! disk with `ffmpeg`. [`MediaAcquirer`] picks between them with
//! [`is_remote`]. All intermediate files are written inside the caller-owned
//! work directory, so removing that directory releases everything.
//!
//! External tools are polled rather than awaited: a cancelled job kills the
//! running `yt-dlp` or `ffmpeg` process instead of waiting for it to exit.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::error::AcquisitionError;
use crate::transcript::sanitize_component;

const EXTRACTED_AUDIO_FILE: &str = "audio.wav";
const DOWNLOAD_STEM: &str = "source";
const REMOTE_TITLE_FALLBACK: &str = "remote_video";
const TOOL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Local mono PCM audio produced for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredAudio {
    pub path: PathBuf,
    /// Human-readable name used to title the transcript.
    pub title: String,
}

pub trait AudioAcquirer: Send + Sync {
    /// Produce a WAV file for `descriptor` inside `workdir`.
    ///
    /// Implementations stop early with [`AcquisitionError::Cancelled`] once
    /// `cancel` fires.
    fn acquire(
        &self,
        descriptor: &str,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> Result<AcquiredAudio, AcquisitionError>;
}

/// Whether `descriptor` is an absolute `http`/`https` URL.
///
/// Only the scheme decides; anything else is treated as a local path.
pub fn is_remote(descriptor: &str) -> bool {
    let Some((scheme, rest)) = descriptor.trim().split_once("://") else {
        return false;
    };
    (scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https"))
        && !rest.is_empty()
}

/// Runs `ffmpeg` to produce mono 16-bit PCM at a fixed rate.
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    binary: PathBuf,
    sample_rate: u32,
}

impl FfmpegExtractor {
    pub fn new(binary: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            binary: binary.into(),
            sample_rate,
        }
    }

    pub fn extract(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), AcquisitionError> {
        let mut command = Command::new(&self.binary);
        command
            .arg("-nostdin")
            .arg("-hide_banner")
            .args(["-loglevel", "error"])
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-vn")
            .args(["-ac", "1"])
            .arg("-ar")
            .arg(self.sample_rate.to_string())
            .args(["-c:a", "pcm_s16le"])
            .arg(output);

        run_tool(&mut command, &self.binary, cancel)?;

        if !output.is_file() {
            return Err(AcquisitionError::NoAudio(input.display().to_string()));
        }
        Ok(())
    }
}

/// Downloads audio from a video host.
#[derive(Debug, Clone)]
pub struct RemoteAcquirer {
    ytdlp: PathBuf,
    ffmpeg: FfmpegExtractor,
}

impl RemoteAcquirer {
    pub fn new(ytdlp: impl Into<PathBuf>, ffmpeg: FfmpegExtractor) -> Self {
        Self {
            ytdlp: ytdlp.into(),
            ffmpeg,
        }
    }
}

impl AudioAcquirer for RemoteAcquirer {
    fn acquire(
        &self,
        url: &str,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> Result<AcquiredAudio, AcquisitionError> {
        log::info!("Downloading audio from {url}");

        let template = workdir.join(format!("{DOWNLOAD_STEM}.%(ext)s"));
        let mut command = Command::new(&self.ytdlp);
        command
            .arg("--no-playlist")
            .arg("--no-progress")
            .args(["-f", "bestaudio/best"])
            .arg("-o")
            .arg(&template)
            .args(["--print", "after_move:title"])
            .arg("--no-simulate")
            .arg(url);

        let stdout = run_tool(&mut command, &self.ytdlp, cancel)?;
        let title = String::from_utf8_lossy(&stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string)
            .unwrap_or_else(|| REMOTE_TITLE_FALLBACK.to_string());

        let downloaded = find_download(workdir)?
            .ok_or_else(|| AcquisitionError::NoAudio(url.to_string()))?;

        let audio_path = workdir.join(EXTRACTED_AUDIO_FILE);
        self.ffmpeg.extract(&downloaded, &audio_path, cancel)?;
        if let Err(e) = fs::remove_file(&downloaded) {
            log::warn!("Failed to remove download {}: {e}", downloaded.display());
        }

        log::info!("Audio downloaded: {} ({title})", audio_path.display());
        Ok(AcquiredAudio {
            path: audio_path,
            title,
        })
    }
}

/// Extracts the audio track of a local video file.
#[derive(Debug, Clone)]
pub struct LocalAcquirer {
    ffmpeg: FfmpegExtractor,
}

impl LocalAcquirer {
    pub fn new(ffmpeg: FfmpegExtractor) -> Self {
        Self { ffmpeg }
    }
}

impl AudioAcquirer for LocalAcquirer {
    fn acquire(
        &self,
        descriptor: &str,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> Result<AcquiredAudio, AcquisitionError> {
        let video = PathBuf::from(descriptor);
        if !video.is_file() {
            return Err(AcquisitionError::MissingInput(video));
        }
        log::info!("Extracting audio from {}", video.display());

        let audio_path = workdir.join(EXTRACTED_AUDIO_FILE);
        self.ffmpeg.extract(&video, &audio_path, cancel)?;

        let title = video
            .file_stem()
            .and_then(OsStr::to_str)
            .map(str::to_string)
            .unwrap_or_else(|| descriptor.to_string());

        log::info!("Audio extracted: {}", audio_path.display());
        Ok(AcquiredAudio {
            path: audio_path,
            title,
        })
    }
}

/// Routes URLs to the remote strategy and everything else to the local one.
pub struct MediaAcquirer {
    remote: Box<dyn AudioAcquirer>,
    local: Box<dyn AudioAcquirer>,
}

impl MediaAcquirer {
    pub fn new(remote: Box<dyn AudioAcquirer>, local: Box<dyn AudioAcquirer>) -> Self {
        Self { remote, local }
    }

    /// The `yt-dlp` + `ffmpeg` pair, both resolved from `PATH` unless absolute.
    pub fn with_tools(ytdlp: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>, sample_rate: u32) -> Self {
        let extractor = FfmpegExtractor::new(ffmpeg, sample_rate);
        Self::new(
            Box::new(RemoteAcquirer::new(ytdlp, extractor.clone())),
            Box::new(LocalAcquirer::new(extractor)),
        )
    }
}

impl AudioAcquirer for MediaAcquirer {
    fn acquire(
        &self,
        descriptor: &str,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> Result<AcquiredAudio, AcquisitionError> {
        if is_remote(descriptor) {
            self.remote.acquire(descriptor.trim(), workdir, cancel)
        } else {
            self.local.acquire(descriptor, workdir, cancel)
        }
    }
}

/// An uploaded video held in a private temporary directory.
///
/// Dropping the guard deletes the file and its directory, whatever happened to
/// the job in between.
#[derive(Debug)]
pub struct StagedUpload {
    dir: Option<TempDir>,
    path: PathBuf,
    file_name: String,
}

impl StagedUpload {
    /// Create an empty staged file for `file_name`, to be filled by the caller.
    pub fn reserve(file_name: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("uploaded_video_").tempdir()?;
        let original = Path::new(file_name)
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or(file_name);
        let path = dir.path().join(sanitize_component(original));
        File::create(&path)?;

        Ok(Self {
            dir: Some(dir),
            path,
            file_name: original.to_string(),
        })
    }

    pub fn create(file_name: &str, contents: &[u8]) -> io::Result<Self> {
        let upload = Self::reserve(file_name)?;
        fs::write(&upload.path, contents)?;
        log::debug!("Staged upload {} ({} bytes)", upload.path.display(), contents.len());
        Ok(upload)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name the client gave the file.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Transcript title for this upload: the client's file name without its
    /// extension, unsanitized.
    pub fn title(&self) -> String {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(OsStr::to_str)
            .filter(|stem| !stem.trim().is_empty())
            .unwrap_or(&self.file_name)
            .to_string()
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => log::info!("Removed staged upload {}", self.path.display()),
                Err(e) => log::warn!("Failed to remove staged upload {}: {e}", self.path.display()),
            }
        }
    }
}

fn find_download(workdir: &Path) -> Result<Option<PathBuf>, AcquisitionError> {
    for entry in fs::read_dir(workdir)? {
        let path = entry?.path();
        let is_download = path.file_stem().and_then(OsStr::to_str) == Some(DOWNLOAD_STEM);
        let is_partial = path.extension().and_then(OsStr::to_str) == Some("part");
        if path.is_file() && is_download && !is_partial {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Run an external tool to completion and return its stdout.
///
/// A non-zero exit becomes [`AcquisitionError::ToolFailed`] carrying stderr.
/// The process is killed as soon as `cancel` fires. Output goes to anonymous
/// temp files rather than pipes.
fn run_tool(
    command: &mut Command,
    binary: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, AcquisitionError> {
    let tool = binary
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or("external tool")
        .to_string();

    let mut stdout = tempfile::tempfile()?;
    let mut stderr = tempfile::tempfile()?;

    let mut child = command
        .stdin(Stdio::null())
        .stdout(stdout.try_clone()?)
        .stderr(stderr.try_clone()?)
        .spawn()
        .map_err(|source| AcquisitionError::Spawn {
            tool: tool.clone(),
            source,
        })?;

    let status = loop {
        if cancel.is_cancelled() {
            log::info!("Stopping {tool}: job cancelled");
            if let Err(e) = child.kill() {
                log::warn!("Failed to kill {tool}: {e}");
            }
            if let Err(e) = child.wait() {
                log::warn!("Failed to reap {tool}: {e}");
            }
            return Err(AcquisitionError::Cancelled(tool));
        }
        match child.try_wait()? {
            Some(status) => break status,
            None => thread::sleep(TOOL_POLL_INTERVAL),
        }
    };

    if !status.success() {
        let stderr = String::from_utf8_lossy(&read_captured(&mut stderr)?)
            .trim()
            .to_string();
        log::error!("{tool} failed ({status}): {stderr}");
        return Err(AcquisitionError::ToolFailed {
            tool,
            status: status.to_string(),
            stderr,
        });
    }

    Ok(read_captured(&mut stdout)?)
}

fn read_captured(file: &mut File) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(0))?;
    let mut captured = Vec::new();
    file.read_to_end(&mut captured)?;
    Ok(captured)
}
