use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::engine::EngineConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "video-transcriber")]
#[command(about = "Transcribes videos by URL or upload into speaker-tagged transcripts", long_about = None)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "TRANSCRIBER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "TRANSCRIBER_PORT", default_value_t = 8086)]
    pub port: u16,

    /// Directory transcripts are written to (created if missing)
    #[arg(long, env = "TRANSCRIBER_OUTPUT_DIR", default_value = "transcriptions")]
    pub output_dir: PathBuf,

    /// Path to the Whisper GGML model file
    #[arg(long, env = "WHISPER_MODEL_PATH")]
    pub model_path: PathBuf,

    /// Forced language code passed to Whisper (e.g. "en"); auto-detect when unset
    #[arg(long, env = "TRANSCRIBER_LANGUAGE")]
    pub language: Option<String>,

    /// Threads used by each Whisper inference
    #[arg(long, env = "WHISPER_THREADS", default_value_t = 2)]
    pub whisper_threads: i32,

    /// Sample rate audio is extracted at
    #[arg(long, env = "TRANSCRIBER_SAMPLE_RATE", default_value_t = 16_000)]
    pub sample_rate: u32,

    /// Length of one decoder chunk in milliseconds
    #[arg(long, env = "TRANSCRIBER_CHUNK_MS", default_value_t = 300)]
    pub chunk_ms: u32,

    /// Audio buffered before each model pass, in seconds
    #[arg(long, env = "TRANSCRIBER_WINDOW_SECS", default_value_t = 30)]
    pub window_secs: u32,

    /// Jobs decoded at the same time
    #[arg(long, env = "TRANSCRIBER_MAX_CONCURRENT_JOBS", default_value_t = 2)]
    pub max_concurrent_jobs: usize,

    /// Queued plus running jobs accepted before new submissions are refused
    #[arg(long, env = "TRANSCRIBER_MAX_PENDING_JOBS", default_value_t = 32)]
    pub max_pending_jobs: usize,

    /// Largest accepted request body, in megabytes
    #[arg(long, env = "TRANSCRIBER_MAX_UPLOAD_MB", default_value_t = 1024)]
    pub max_upload_mb: usize,

    /// Seconds a finished job stays visible; finished jobs are kept forever when unset
    #[arg(long, env = "TRANSCRIBER_JOB_TTL_SECS")]
    pub job_ttl_secs: Option<u64>,

    /// ffmpeg executable
    #[arg(long, env = "FFMPEG_BIN", default_value = "ffmpeg")]
    pub ffmpeg_bin: PathBuf,

    /// yt-dlp executable
    #[arg(long, env = "YTDLP_BIN", default_value = "yt-dlp")]
    pub ytdlp_bin: PathBuf,
}

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample_rate must be greater than 0".to_string());
        }

        if self.chunk_samples() == 0 {
            return Err("chunk_ms is too small for the configured sample rate".to_string());
        }

        if self.window_secs == 0 {
            return Err("window_secs must be greater than 0".to_string());
        }

        if self.whisper_threads < 1 {
            return Err("whisper_threads must be at least 1".to_string());
        }

        if self.max_concurrent_jobs == 0 {
            return Err("max_concurrent_jobs must be at least 1".to_string());
        }

        if self.max_pending_jobs < self.max_concurrent_jobs {
            return Err("max_pending_jobs must be at least max_concurrent_jobs".to_string());
        }

        if self.max_upload_mb == 0 {
            return Err("max_upload_mb must be greater than 0".to_string());
        }

        if self.job_ttl_secs == Some(0) {
            return Err("job_ttl_secs must be greater than 0 when set".to_string());
        }

        Ok(())
    }

    pub fn chunk_samples(&self) -> usize {
        (self.sample_rate as u64 * self.chunk_ms as u64 / 1000) as usize
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            output_dir: self.output_dir.clone(),
            max_concurrent_jobs: self.max_concurrent_jobs,
            max_pending_jobs: self.max_pending_jobs,
            job_ttl: self.job_ttl_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["video-transcriber", "--model-path", "models/ggml-base.bin"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let config = parse(&[]);
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 8086);
        assert_eq!(config.chunk_samples(), 4_800);
        assert_eq!(config.engine_config().job_ttl, None);
    }

    #[test]
    fn rejects_pending_limit_below_concurrency() {
        let config = parse(&["--max-concurrent-jobs", "4", "--max-pending-jobs", "2"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn ttl_maps_to_engine_config() {
        let config = parse(&["--job-ttl-secs", "3600"]);
        assert_eq!(
            config.engine_config().job_ttl,
            Some(Duration::from_secs(3600))
        );
    }
}
