//! Speech recognition engines usable as a [`StreamingDecoder`](crate::decoder::StreamingDecoder).
//!
//! # Available Engines
//!
//! ## Whisper Engine
//!
//! OpenAI's Whisper model through whisper.cpp:
//! - **Model Format**: Single GGML format file (`.bin`)
//! - **Audio**: 16 kHz mono
//! - **Streaming**: chunks are buffered into windows; each full window (and the
//!   final partial one) is decoded and its segments shifted onto the stream clock
//!
//! ```rust,no_run
//! # #[cfg(feature = "whisper")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::path::Path;
//! use video_transcriber::engines::whisper::{WhisperDecoder, WhisperDecoderParams};
//!
//! let decoder = WhisperDecoder::load(
//!     Path::new("models/whisper-medium-q4_1.bin"),
//!     WhisperDecoderParams::default(),
//! )?;
//! # let _ = decoder;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "whisper"))]
//! # fn main() {}
//! ```

#[cfg(feature = "whisper")]
pub mod whisper;
