#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use video_transcriber::acquisition::{AcquiredAudio, AudioAcquirer};
use video_transcriber::decoder::StreamingDecoder;
use video_transcriber::engine::{EngineConfig, JobEngine};
use video_transcriber::error::{AcquisitionError, DecodeError};
use video_transcriber::job::{Job, JobId};
use video_transcriber::roles::KeywordRoleClassifier;
use video_transcriber::Phrase;

pub const SAMPLE_RATE: u32 = 1_000;
pub const CHUNK_SIZE: usize = 250;

/// Decoder that emits canned phrases at given chunk indices and records the
/// length of every chunk it sees.
pub struct ScriptedDecoder {
    phrases: HashMap<usize, Vec<Phrase>>,
    fail_at: Option<usize>,
    gate: Option<Gate>,
    pub chunk_lengths: Mutex<Vec<usize>>,
    pub last_flags: Mutex<Vec<bool>>,
}

impl ScriptedDecoder {
    pub fn new() -> Self {
        Self {
            phrases: HashMap::new(),
            fail_at: None,
            gate: None,
            chunk_lengths: Mutex::new(Vec::new()),
            last_flags: Mutex::new(Vec::new()),
        }
    }

    pub fn emit(mut self, chunk: usize, text: &str, start: f32, end: f32) -> Self {
        self.phrases.entry(chunk).or_default().push(Phrase {
            text: text.to_string(),
            start,
            end,
        });
        self
    }

    pub fn fail_at(mut self, chunk: usize) -> Self {
        self.fail_at = Some(chunk);
        self
    }

    /// Block every chunk until `gate` is opened.
    pub fn gated(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }
}

impl StreamingDecoder for ScriptedDecoder {
    /// Number of chunks seen so far in this stream.
    type State = usize;

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn chunk_size(&self) -> usize {
        CHUNK_SIZE
    }

    fn initial_state(&self) -> Result<Self::State, DecodeError> {
        Ok(0)
    }

    fn decode(
        &self,
        state: Self::State,
        chunk: &[f32],
        is_last: bool,
    ) -> Result<(Vec<Phrase>, Self::State), DecodeError> {
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        self.chunk_lengths.lock().unwrap().push(chunk.len());
        self.last_flags.lock().unwrap().push(is_last);

        if self.fail_at == Some(state) {
            return Err(DecodeError::Model(format!("corrupt audio at chunk {state}")));
        }

        let phrases = self.phrases.get(&state).cloned().unwrap_or_default();
        Ok((phrases, state + 1))
    }
}

/// A latch that blocks threads until opened.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
    }
}

/// Acquirer that writes a WAV of `samples` samples for every input except
/// descriptors containing `"no-audio"`, which fail like a host without an
/// audio stream.
pub struct FakeAcquirer {
    samples: usize,
    gate: Option<Gate>,
}

impl FakeAcquirer {
    pub fn new(samples: usize) -> Self {
        Self {
            samples,
            gate: None,
        }
    }

    pub fn gated(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }
}

impl AudioAcquirer for FakeAcquirer {
    fn acquire(
        &self,
        descriptor: &str,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> Result<AcquiredAudio, AcquisitionError> {
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        if cancel.is_cancelled() {
            return Err(AcquisitionError::Cancelled("fake-ytdlp".to_string()));
        }
        if descriptor.contains("no-audio") {
            return Err(AcquisitionError::NoAudio(descriptor.to_string()));
        }

        let path = workdir.join("audio.wav");
        write_wav(&path, SAMPLE_RATE, self.samples);
        let title = Path::new(descriptor)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("video")
            .to_string();
        Ok(AcquiredAudio { path, title })
    }
}

pub fn write_wav(path: &Path, sample_rate: u32, samples: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..samples {
        writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
    }
    writer.finalize().unwrap();
}

pub fn engine_config(output_dir: &Path) -> EngineConfig {
    EngineConfig {
        output_dir: output_dir.to_path_buf(),
        max_concurrent_jobs: 2,
        max_pending_jobs: 16,
        job_ttl: None,
    }
}

pub fn engine_with(
    output_dir: &Path,
    decoder: ScriptedDecoder,
    acquirer: FakeAcquirer,
) -> Arc<JobEngine<ScriptedDecoder>> {
    Arc::new(JobEngine::new(
        engine_config(output_dir),
        decoder,
        Arc::new(KeywordRoleClassifier::default()),
        Arc::new(acquirer),
    ))
}

/// Two phrases over 1.2 seconds of audio: an operator greeting, then a
/// customer request.
pub fn conversation() -> ScriptedDecoder {
    ScriptedDecoder::new()
        .emit(0, "Hello, how can I help?", 0.0, 0.23)
        .emit(3, "I need to change my order", 0.5, 1.1)
}

pub async fn wait_for_terminal(engine: &JobEngine<ScriptedDecoder>, id: &JobId) -> Job {
    for _ in 0..500 {
        if let Some(job) = engine.get(id) {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not finish in time: {:?}", engine.get(id));
}

/// Wait until every admitted job has released its slot.
pub async fn wait_for_idle(engine: &JobEngine<ScriptedDecoder>) {
    for _ in 0..500 {
        if engine.pending_jobs() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} jobs still pending", engine.pending_jobs());
}
