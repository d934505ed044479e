use clap::Parser;
use std::path::PathBuf;

use readaloud::config::DEFAULT_ENDPOINT;

#[derive(Parser, Debug)]
#[clap(about = "Read text aloud with Gemini text-to-speech")]
pub struct Args {
    /// Text to speak; read from stdin when omitted
    pub text: Vec<String>,

    #[clap(long, default_value = "Charon")]
    pub voice: String,

    /// Package the audio as a voice message (WAV plus duration and waveform)
    #[clap(long)]
    pub voice_message: bool,

    /// Preferred audio player binary (aplay, paplay, ffplay, ...)
    #[clap(long)]
    pub player: Option<String>,

    /// Write the WAV file here instead of playing it
    #[clap(long)]
    pub save: Option<PathBuf>,

    #[clap(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[clap(long, env = "TTS_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    #[clap(long)]
    pub temp_dir: Option<PathBuf>,

    #[clap(long, default_value_t = 15)]
    pub connect_timeout_secs: u64,

    #[clap(long, default_value_t = 45)]
    pub read_timeout_secs: u64,

    #[clap(long, default_value_t = 1000)]
    pub cleanup_grace_ms: u64,
}
