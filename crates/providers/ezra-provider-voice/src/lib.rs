//! Speech services for Ezra's voice pipeline
//!
//! - [`SttClient`]: multipart WAV upload to the speech-to-text service
//! - [`TtsClient`]: reference-conditioned synthesis, whole or streamed
//! - [`warmup`]: startup warmup of both services with linear backoff
//! - [`ReferenceStore`]: per-user reference WAVs normalized with ffmpeg
//! - [`wav`]: RIFF framing for 16-bit PCM
//!
//! # Example
//!
//! ```no_run
//! use ezra_provider_voice::*;
//! use std::path::Path;
//!
//! # async fn example() -> ezra_core::Result<()> {
//! let tts = TtsClient::new("http://localhost:9002");
//! let wav = tts.synthesize("It is 10:00.", Path::new("/refs/default.wav")).await?;
//! println!("{} bytes", wav.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod http;

pub mod reference;
pub mod stt;
pub mod tts;
pub mod types;
pub mod warmup;
pub mod wav;

pub use reference::{
    extension_for_content_type, supported_extension, FfmpegTranscoder, ReferenceStore, Transcoder,
    DEFAULT_REFERENCE, SUPPORTED_EXTENSIONS,
};
pub use stt::SttClient;
pub use tts::TtsClient;
pub use types::*;
pub use warmup::{spawn_warmup, warmup_service, warmup_services, WarmupOutcome, WarmupPolicy, WarmupReport};
pub use wav::{encode_mono_wav, wrap_pcm_in_wav, WavHeader, WAV_HEADER_LEN};
