//! Speech client for the Gemini `generateContent` TTS endpoint.
//!
//! One POST per call, no retries. The endpoint answers with base64 encoded
//! raw PCM (24 kHz, mono, signed 16-bit little-endian) inside the first
//! candidate's first content part.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ApiKeySource, Config};
use crate::error::{Result, TtsError};
use crate::utils::preview;

pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
pub const OUTPUT_CHANNELS: u16 = 1;
pub const OUTPUT_BITS_PER_SAMPLE: u16 = 16;

/// Prebuilt voices offered by the Gemini TTS models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Voice {
    Zephyr,
    Puck,
    #[default]
    Charon,
    Kore,
    Fenrir,
    Leda,
    Orus,
    Aoede,
    Callirrhoe,
    Autonoe,
    Enceladus,
    Iapetus,
    Umbriel,
    Algieba,
    Despina,
    Erinome,
    Algenib,
    Rasalgethi,
    Laomedeia,
    Achernar,
    Alnilam,
    Schedar,
    Gacrux,
    Pulcherrima,
    Achird,
    Zubenelgenubi,
    Vindemiatrix,
    Sadachbia,
    Sadaltager,
    Sulafat,
}

impl Voice {
    pub const ALL: [Voice; 30] = [
        Voice::Zephyr,
        Voice::Puck,
        Voice::Charon,
        Voice::Kore,
        Voice::Fenrir,
        Voice::Leda,
        Voice::Orus,
        Voice::Aoede,
        Voice::Callirrhoe,
        Voice::Autonoe,
        Voice::Enceladus,
        Voice::Iapetus,
        Voice::Umbriel,
        Voice::Algieba,
        Voice::Despina,
        Voice::Erinome,
        Voice::Algenib,
        Voice::Rasalgethi,
        Voice::Laomedeia,
        Voice::Achernar,
        Voice::Alnilam,
        Voice::Schedar,
        Voice::Gacrux,
        Voice::Pulcherrima,
        Voice::Achird,
        Voice::Zubenelgenubi,
        Voice::Vindemiatrix,
        Voice::Sadachbia,
        Voice::Sadaltager,
        Voice::Sulafat,
    ];

    /// Name as the API expects it in `prebuiltVoiceConfig.voiceName`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Zephyr => "Zephyr",
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
            Voice::Leda => "Leda",
            Voice::Orus => "Orus",
            Voice::Aoede => "Aoede",
            Voice::Callirrhoe => "Callirrhoe",
            Voice::Autonoe => "Autonoe",
            Voice::Enceladus => "Enceladus",
            Voice::Iapetus => "Iapetus",
            Voice::Umbriel => "Umbriel",
            Voice::Algieba => "Algieba",
            Voice::Despina => "Despina",
            Voice::Erinome => "Erinome",
            Voice::Algenib => "Algenib",
            Voice::Rasalgethi => "Rasalgethi",
            Voice::Laomedeia => "Laomedeia",
            Voice::Achernar => "Achernar",
            Voice::Alnilam => "Alnilam",
            Voice::Schedar => "Schedar",
            Voice::Gacrux => "Gacrux",
            Voice::Pulcherrima => "Pulcherrima",
            Voice::Achird => "Achird",
            Voice::Zubenelgenubi => "Zubenelgenubi",
            Voice::Vindemiatrix => "Vindemiatrix",
            Voice::Sadachbia => "Sadachbia",
            Voice::Sadaltager => "Sadaltager",
            Voice::Sulafat => "Sulafat",
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl FromStr for Voice {
    type Err = TtsError;

    fn from_str(s: &str) -> Result<Self> {
        Voice::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TtsError::InvalidInput(format!("unknown voice '{s}'")))
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single, immutable synthesis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    text: String,
    voice: Voice,
}

impl SpeechRequest {
    /// Keeps `text` exactly as given; only blank text is rejected.
    pub fn new(text: &str, voice: Voice) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(TtsError::InvalidInput("text is empty".into()));
        }
        Ok(Self {
            text: text.to_string(),
            voice,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn voice(&self) -> Voice {
        self.voice
    }

    /// JSON body for `generateContent`.
    pub fn to_body(&self) -> GenerateContentRequest<'_> {
        GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![TextPart { text: &self.text }],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.as_str(),
                        },
                    },
                },
            },
        }
    }
}

/// Decoded audio returned by a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechResponse {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub pcm: Vec<u8>,
}

impl SpeechResponse {
    /// Wraps PCM in the fixed output format of the remote API.
    pub fn new(pcm: Vec<u8>) -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: OUTPUT_CHANNELS,
            bits_per_sample: OUTPUT_BITS_PER_SAMPLE,
            pcm,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: Vec<Modality>,
    speech_config: SpeechConfig<'a>,
}

#[derive(Debug, Serialize)]
enum Modality {
    #[serde(rename = "AUDIO")]
    Audio,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: Option<String>,
}

/// Pulls the PCM payload out of a `generateContent` success body.
pub fn parse_response(body: &str) -> Result<SpeechResponse> {
    let parsed: GenerateContentResponse = serde_json::from_str(body)?;
    let part = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or(TtsError::EmptyPayload("no candidates in response"))?
        .content
        .ok_or(TtsError::EmptyPayload("first candidate has no content"))?
        .parts
        .into_iter()
        .next()
        .ok_or(TtsError::EmptyPayload("no parts in candidate content"))?;
    let inline = part
        .inline_data
        .ok_or(TtsError::EmptyPayload("no inline audio data in first part"))?;
    if let Some(mime) = &inline.mime_type {
        debug!("Inline audio mime type: {}", mime);
    }
    let encoded = inline
        .data
        .ok_or(TtsError::EmptyPayload("inline data has no 'data' field"))?;

    // MIME style base64 may be wrapped across lines.
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let pcm = STANDARD.decode(compact)?;
    if pcm.is_empty() {
        return Err(TtsError::EmptyPayload("inline audio data is empty"));
    }

    let mut response = SpeechResponse::new(pcm);
    let remainder = response.pcm.len() % response.frame_len();
    if remainder != 0 {
        warn!("Dropping {} trailing bytes of a partial PCM frame", remainder);
        let aligned = response.pcm.len() - remainder;
        response.pcm.truncate(aligned);
    }
    Ok(response)
}

/// Something that turns a [`SpeechRequest`] into decoded audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechResponse>;
}

pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    keys: Arc<dyn ApiKeySource>,
}

impl GeminiClient {
    pub fn new(config: &Config, keys: Arc<dyn ApiKeySource>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            keys,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiClient {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechResponse> {
        let key = self
            .keys
            .api_key()
            .ok_or_else(|| TtsError::InvalidInput("no API key configured".into()))?;

        info!(
            "Requesting speech ({} chars, voice {}): {}",
            request.text().chars().count(),
            request.voice(),
            preview(request.text(), 100)
        );
        let res = self
            .http
            .post(&self.endpoint)
            .query(&[("key", key.as_str())])
            .header(CONTENT_TYPE, "application/json")
            .json(&request.to_body())
            .send()
            .await?;

        let status = res.status();
        debug!("TTS endpoint answered {}", status);
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            debug!("TTS endpoint error body: {}", body);
            return Err(TtsError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = res.text().await?;
        debug!("TTS response body: {} bytes", body.len());
        let response = parse_response(&body)?;
        info!("Decoded {} bytes of PCM", response.pcm.len());
        Ok(response)
    }
}
