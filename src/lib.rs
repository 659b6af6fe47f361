//! Asynchronous video transcription.
//!
//! A submitted video (remote URL or uploaded file) becomes a [`job::Job`]. The
//! [`engine::JobEngine`] acquires its audio, streams it chunk by chunk through a
//! [`decoder::StreamingDecoder`], tags every recognized phrase with a speaker
//! [`roles::Role`] and materializes the transcript to disk. Progress and results
//! are read back through the [`registry::JobRegistry`], usually via the HTTP
//! surface in [`api`].

pub mod acquisition;
pub mod api;
pub mod audio;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod engines;
pub mod error;
pub mod job;
pub mod registry;
pub mod roles;
pub mod transcript;

use serde::{Deserialize, Serialize};

use crate::roles::Role;

/// A span of recognized speech as emitted by a decoder, before role tagging.
///
/// Times are seconds on the decoder clock, relative to the start of the whole
/// stream rather than the chunk that produced the phrase.
#[derive(Debug, Clone, PartialEq)]
pub struct Phrase {
    pub text: String,
    pub start: f32,
    pub end: f32,
}

/// One tagged unit of a finished transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub role: Role,
    pub text: String,
    pub start: f32,
    pub end: f32,
}

impl Utterance {
    pub fn from_phrase(phrase: Phrase, role: Role) -> Self {
        Self {
            role,
            text: phrase.text,
            start: phrase.start,
            end: phrase.end,
        }
    }
}
