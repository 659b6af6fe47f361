//! Streaming decoder contract and the chunked decode loop.
//!
//! A [`StreamingDecoder`] consumes audio in chunks of exactly
//! [`StreamingDecoder::chunk_size`] samples. Memory carried between chunks lives
//! in an owned [`StreamingDecoder::State`] value that the caller threads from one
//! call to the next; one state instance belongs to one stream and is never
//! shared between jobs.

use std::borrow::Cow;

use tokio_util::sync::CancellationToken;

use crate::audio::duration_secs;
use crate::error::DecodeError;
use crate::Phrase;

/// Speech model driven one fixed-size chunk at a time.
pub trait StreamingDecoder: Send + Sync + 'static {
    /// Decoder memory carried across chunks of a single stream.
    type State;

    /// Sample rate of the mono PCM audio this decoder expects.
    fn sample_rate(&self) -> u32;

    /// Number of samples in every chunk passed to [`StreamingDecoder::decode`].
    fn chunk_size(&self) -> usize;

    /// Fresh state for a new stream.
    fn initial_state(&self) -> Result<Self::State, DecodeError>;

    /// Decode one chunk.
    ///
    /// `is_last` asks the decoder to flush anything it has buffered. Returned
    /// phrase times are relative to the start of the stream.
    fn decode(
        &self,
        state: Self::State,
        chunk: &[f32],
        is_last: bool,
    ) -> Result<(Vec<Phrase>, Self::State), DecodeError>;
}

/// One slice of a stream, zero-padded to the full chunk size when short.
#[derive(Debug)]
pub struct Chunk<'a> {
    pub index: usize,
    pub total: usize,
    pub samples: Cow<'a, [f32]>,
    pub is_last: bool,
}

/// Iterator splitting a sample buffer into uniform chunks.
pub struct Chunks<'a> {
    samples: &'a [f32],
    chunk_size: usize,
    index: usize,
    total: usize,
}

/// Split `samples` into chunks of exactly `chunk_size` samples.
///
/// The final chunk is padded with zeros. An empty buffer yields no chunks.
///
/// # Panics
///
/// Panics if `chunk_size` is zero.
pub fn chunks(samples: &[f32], chunk_size: usize) -> Chunks<'_> {
    assert!(chunk_size > 0, "chunk size must be greater than zero");
    Chunks {
        samples,
        chunk_size,
        index: 0,
        total: samples.len().div_ceil(chunk_size),
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.total {
            return None;
        }

        let start = self.index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.samples.len());
        let slice = &self.samples[start..end];

        let samples = if slice.len() < self.chunk_size {
            let mut padded = Vec::with_capacity(self.chunk_size);
            padded.extend_from_slice(slice);
            padded.resize(self.chunk_size, 0.0);
            Cow::Owned(padded)
        } else {
            Cow::Borrowed(slice)
        };

        let chunk = Chunk {
            index: self.index,
            total: self.total,
            samples,
            is_last: self.index + 1 == self.total,
        };
        self.index += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

/// Position of the decode loop, reported after every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeProgress {
    pub chunks_done: usize,
    pub chunks_total: usize,
}

/// Feed a whole stream through `decoder`, chunk by chunk.
///
/// Cancellation is observed before every chunk. Phrase times are clamped to the
/// real (unpadded) duration of `samples`; emission order is kept as-is.
pub fn decode_stream<D, F>(
    decoder: &D,
    samples: &[f32],
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<Vec<Phrase>, DecodeError>
where
    D: StreamingDecoder + ?Sized,
    F: FnMut(DecodeProgress),
{
    let chunk_size = decoder.chunk_size();
    if chunk_size == 0 {
        return Err(DecodeError::ZeroChunkSize);
    }

    let duration = duration_secs(samples.len(), decoder.sample_rate());
    let mut state = Some(decoder.initial_state()?);
    let mut phrases = Vec::new();

    for chunk in chunks(samples, chunk_size) {
        if cancel.is_cancelled() {
            return Err(DecodeError::Cancelled);
        }
        if chunk.samples.len() != chunk_size {
            return Err(DecodeError::ChunkSize {
                expected: chunk_size,
                actual: chunk.samples.len(),
            });
        }

        let current = state
            .take()
            .ok_or_else(|| DecodeError::Model("decoder state was lost".to_string()))?;
        let (emitted, next) = decoder.decode(current, &chunk.samples, chunk.is_last)?;
        state = Some(next);

        phrases.extend(emitted.into_iter().map(|phrase| clamp(phrase, duration)));

        on_progress(DecodeProgress {
            chunks_done: chunk.index + 1,
            chunks_total: chunk.total,
        });
    }

    Ok(phrases)
}

fn clamp(mut phrase: Phrase, duration: f32) -> Phrase {
    phrase.start = phrase.start.clamp(0.0, duration);
    phrase.end = phrase.end.clamp(phrase.start, duration);
    phrase
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiple_is_not_padded() {
        let samples = vec![1.0; 8];
        let collected: Vec<_> = chunks(&samples, 4).collect();
        assert_eq!(collected.len(), 2);
        assert!(matches!(collected[0].samples, Cow::Borrowed(_)));
        assert!(!collected[0].is_last);
        assert!(collected[1].is_last);
    }

    #[test]
    fn short_tail_is_zero_padded() {
        let samples = vec![1.0; 5];
        let collected: Vec<_> = chunks(&samples, 4).collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[1].samples.as_ref(), &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(collected[1].total, 2);
    }

    #[test]
    fn empty_buffer_has_no_chunks() {
        assert_eq!(chunks(&[], 4).len(), 0);
    }

    #[test]
    fn clamp_keeps_phrase_inside_stream() {
        let phrase = Phrase {
            text: "tail".to_string(),
            start: 1.8,
            end: 2.6,
        };
        let clamped = clamp(phrase, 2.0);
        assert_eq!(clamped.start, 1.8);
        assert_eq!(clamped.end, 2.0);
    }
}
