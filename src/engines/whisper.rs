use std::path::Path;

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::decoder::StreamingDecoder;
use crate::error::DecodeError;
use crate::Phrase;

/// Sample rate whisper.cpp is trained on.
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone)]
pub struct WhisperDecoderParams {
    pub language: Option<String>,
    pub threads: i32,
    /// Samples per decoder chunk.
    pub chunk_size: usize,
    /// Audio buffered before a window is sent to the model.
    pub window_secs: u32,
    pub suppress_blank: bool,
    pub suppress_non_speech_tokens: bool,
    pub no_speech_thold: f32,
}

impl Default for WhisperDecoderParams {
    fn default() -> Self {
        Self {
            language: None,
            threads: 2,
            chunk_size: 4_800,
            window_secs: 30,
            suppress_blank: true,
            suppress_non_speech_tokens: true,
            no_speech_thold: 0.2,
        }
    }
}

pub struct WhisperDecoder {
    context: WhisperContext,
    params: WhisperDecoderParams,
    window_samples: usize,
}

/// Per-stream whisper memory: its own inference state plus the samples
/// buffered since the last decoded window.
pub struct WhisperStreamState {
    session: whisper_rs::WhisperState,
    pending: Vec<f32>,
    consumed_samples: usize,
}

impl WhisperDecoder {
    pub fn load(model_path: &Path, params: WhisperDecoderParams) -> Result<Self, DecodeError> {
        let model_path = model_path
            .to_str()
            .ok_or_else(|| DecodeError::Model(format!("model path is not UTF-8: {model_path:?}")))?;

        log::info!("Loading whisper model from {model_path}...");
        let context =
            WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
                .map_err(|e| DecodeError::Model(e.to_string()))?;

        let window_samples = WHISPER_SAMPLE_RATE as usize * params.window_secs.max(1) as usize;
        log::info!(
            "Whisper decoder ready: chunk={} samples, window={} samples",
            params.chunk_size,
            window_samples
        );

        Ok(Self {
            context,
            params,
            window_samples,
        })
    }

    fn transcribe_window(
        &self,
        state: &mut WhisperStreamState,
    ) -> Result<Vec<Phrase>, DecodeError> {
        let offset = state.consumed_samples as f32 / WHISPER_SAMPLE_RATE as f32;

        let mut full_params = FullParams::new(SamplingStrategy::BeamSearch {
            beam_size: 3,
            patience: -1.0,
        });
        full_params.set_language(self.params.language.as_deref());
        full_params.set_n_threads(self.params.threads);
        full_params.set_print_special(false);
        full_params.set_print_progress(false);
        full_params.set_print_realtime(false);
        full_params.set_print_timestamps(false);
        full_params.set_suppress_blank(self.params.suppress_blank);
        full_params.set_suppress_non_speech_tokens(self.params.suppress_non_speech_tokens);
        full_params.set_no_speech_thold(self.params.no_speech_thold);

        state
            .session
            .full(full_params, &state.pending)
            .map_err(|e| DecodeError::Model(e.to_string()))?;

        let num_segments = state
            .session
            .full_n_segments()
            .map_err(|e| DecodeError::Model(e.to_string()))?;

        let mut phrases = Vec::new();
        for i in 0..num_segments {
            let text = state
                .session
                .full_get_segment_text(i)
                .map_err(|e| DecodeError::Model(e.to_string()))?;
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let t0 = state
                .session
                .full_get_segment_t0(i)
                .map_err(|e| DecodeError::Model(e.to_string()))?;
            let t1 = state
                .session
                .full_get_segment_t1(i)
                .map_err(|e| DecodeError::Model(e.to_string()))?;

            // whisper reports centiseconds relative to the window
            phrases.push(Phrase {
                text: text.to_string(),
                start: offset + t0 as f32 / 100.0,
                end: offset + t1 as f32 / 100.0,
            });
        }

        state.consumed_samples += state.pending.len();
        state.pending.clear();
        Ok(phrases)
    }
}

impl StreamingDecoder for WhisperDecoder {
    type State = WhisperStreamState;

    fn sample_rate(&self) -> u32 {
        WHISPER_SAMPLE_RATE
    }

    fn chunk_size(&self) -> usize {
        self.params.chunk_size
    }

    fn initial_state(&self) -> Result<Self::State, DecodeError> {
        let session = self
            .context
            .create_state()
            .map_err(|e| DecodeError::Model(e.to_string()))?;
        Ok(WhisperStreamState {
            session,
            pending: Vec::with_capacity(self.window_samples),
            consumed_samples: 0,
        })
    }

    fn decode(
        &self,
        mut state: Self::State,
        chunk: &[f32],
        is_last: bool,
    ) -> Result<(Vec<Phrase>, Self::State), DecodeError> {
        state.pending.extend_from_slice(chunk);

        if state.pending.len() < self.window_samples && !is_last {
            return Ok((Vec::new(), state));
        }

        let phrases = self.transcribe_window(&mut state)?;
        Ok((phrases, state))
    }
}
