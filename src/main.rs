mod args;

use anyhow::Context;
use clap::Parser;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use args::Args;
use readaloud::audio::{self, ArtifactFormat, AudioArtifact};
use readaloud::player::{CommandPlayer, PlaybackAdapter, VoiceNotePlayer};
use readaloud::utils::preview;
use readaloud::{
    ApiKeySource, Config, GeminiClient, SessionController, SessionEvent, SpeechRequest,
    SpeechSynthesizer, StaticApiKey, Voice,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let voice: Voice = args.voice.parse()?;

    let text = if args.text.is_empty() {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading text from stdin")?;
        buf
    } else {
        args.text.join(" ")
    };
    let request = SpeechRequest::new(&text, voice)?;
    info!("Text to speak: {}", preview(request.text(), 100));

    let config = Config {
        endpoint: args.endpoint.clone(),
        voice,
        format: if args.voice_message {
            ArtifactFormat::VoiceContainer
        } else {
            ArtifactFormat::Wav
        },
        connect_timeout: Duration::from_secs(args.connect_timeout_secs),
        read_timeout: Duration::from_secs(args.read_timeout_secs),
        temp_dir: args.temp_dir.clone().unwrap_or_else(std::env::temp_dir),
        cleanup_grace: Duration::from_millis(args.cleanup_grace_ms),
    };

    let keys: Arc<dyn ApiKeySource> = Arc::new(StaticApiKey(args.api_key.clone()));
    if keys.api_key().is_none() {
        anyhow::bail!("No API key configured; set GEMINI_API_KEY or pass --api-key");
    }
    let client = Arc::new(GeminiClient::new(&config, keys.clone())?);

    if let Some(out) = &args.save {
        return save(&client, &config, &request, out).await;
    }

    let Some(player) = CommandPlayer::detect(args.player.as_deref()) else {
        anyhow::bail!("No audio player found (tried aplay, paplay, ffplay)");
    };
    if args.voice_message {
        let player = VoiceNotePlayer::new(player, "Read aloud");
        speak(config, keys, client, player, request.text()).await
    } else {
        speak(config, keys, client, player, request.text()).await
    }
}

async fn speak<P: PlaybackAdapter>(
    config: Config,
    keys: Arc<dyn ApiKeySource>,
    client: Arc<GeminiClient>,
    player: P,
    text: &str,
) -> anyhow::Result<()> {
    let (session, task) = SessionController::spawn(config, keys, client, player);
    let mut events = session.subscribe();
    session.speak(text);

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Playing { path, .. }) => info!("Speaking from {}", path.display()),
                Ok(SessionEvent::Finished { .. }) => break Ok(()),
                Ok(SessionEvent::Failed { error, .. }) => break Err(error),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("Missed {} session events", n),
                Err(RecvError::Closed) => break Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping playback");
                session.cancel();
                break Ok(());
            }
        }
    };

    session.teardown().await;
    drop(session);
    let _ = task.await;
    outcome.map_err(Into::into)
}

async fn save(
    client: &GeminiClient,
    config: &Config,
    request: &SpeechRequest,
    out: &Path,
) -> anyhow::Result<()> {
    let response = client.synthesize(request).await?;
    let artifact = AudioArtifact::encode(&response, config.format)?;
    std::fs::write(out, &artifact.bytes).with_context(|| format!("writing {}", out.display()))?;

    let duration = audio::wav_duration_seconds(out)?;
    info!("Saved {:.2}s of audio to {}", duration, out.display());
    if let Some(waveform) = &artifact.waveform {
        info!("Waveform summary: {} bytes", waveform.len());
    }
    Ok(())
}
