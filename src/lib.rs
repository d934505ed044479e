//! Read text aloud through the Gemini TTS API.
//!
//! [`tts::GeminiClient`] fetches raw PCM, [`audio`] wraps it in a WAV
//! container, and [`session::SessionController`] keeps exactly one
//! request/playback alive at a time, handing artifacts to a
//! [`player::PlaybackAdapter`].

pub mod artifact;
pub mod audio;
pub mod config;
pub mod error;
pub mod player;
pub mod session;
pub mod tts;
pub mod utils;

pub use config::{ApiKeySource, Config, EnvApiKey, StaticApiKey};
pub use error::{Result, TtsError};
pub use session::{SessionController, SessionEvent, SessionState};
pub use tts::{GeminiClient, SpeechRequest, SpeechResponse, SpeechSynthesizer, Voice};
