//! PCM to container encoding.
//!
//! `encode_wav` is the only real container encoder here. The voice-message
//! format is the same WAV payload carrying extra metadata (duration and a
//! coarse waveform), not an Opus/OGG stream.

use hound::WavReader;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Result, TtsError};
use crate::tts::SpeechResponse;

/// Size of the canonical RIFF/WAVE header written by [`encode_wav`].
pub const WAV_HEADER_LEN: usize = 44;

/// Number of amplitude buckets in a waveform summary.
pub const WAVEFORM_BUCKETS: usize = 100;

const WAVEFORM_BITS: usize = 5;
const WAVEFORM_MAX: u64 = (1 << WAVEFORM_BITS) - 1;
const WAVEFORM_MIN_CEILING: u64 = 2500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArtifactFormat {
    #[default]
    Wav,
    /// WAV data packaged with voice-message metadata.
    VoiceContainer,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        // Both variants hold WAV bytes; the file name says so.
        "wav"
    }

    pub fn mime_type(&self) -> &'static str {
        "audio/wav"
    }
}

/// An encoded, self-contained audio file plus the metadata derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioArtifact {
    pub bytes: Vec<u8>,
    pub format: ArtifactFormat,
    pub duration_seconds: f64,
    /// Present only for [`ArtifactFormat::VoiceContainer`], and only if the
    /// summary could be computed.
    pub waveform: Option<Vec<u8>>,
}

impl AudioArtifact {
    pub fn encode(response: &SpeechResponse, format: ArtifactFormat) -> Result<Self> {
        let bytes = encode_wav(
            &response.pcm,
            response.sample_rate,
            response.channels,
            response.bits_per_sample,
        )?;
        let duration_seconds = estimate_duration_seconds(
            response.pcm.len(),
            response.sample_rate,
            response.channels,
            response.bits_per_sample,
        );
        let waveform = match format {
            ArtifactFormat::Wav => None,
            ArtifactFormat::VoiceContainer => {
                let summary = summarize_waveform(&response.pcm, response.sample_rate);
                if summary.is_none() {
                    warn!("Could not summarize waveform; continuing without one");
                }
                summary
            }
        };
        debug!(
            "Encoded {:?} artifact: {} bytes, {:.2}s",
            format,
            bytes.len(),
            duration_seconds
        );
        Ok(Self {
            bytes,
            format,
            duration_seconds,
            waveform,
        })
    }
}

/// Wraps raw little-endian PCM in a 44-byte canonical WAV header.
pub fn encode_wav(
    pcm: &[u8],
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
) -> Result<Vec<u8>> {
    let data_len = u32::try_from(pcm.len())
        .ok()
        .filter(|len| *len <= u32::MAX - 36)
        .ok_or_else(|| {
            TtsError::Encode(format!("{} PCM bytes do not fit in a WAV file", pcm.len()))
        })?;
    let frame_bits = u64::from(channels) * u64::from(bits_per_sample);
    let block_align = u16::try_from(frame_bits / 8).map_err(|_| {
        TtsError::Encode(format!(
            "block align for {channels} channels of {bits_per_sample}-bit audio overflows"
        ))
    })?;
    let byte_rate = u32::try_from(u64::from(sample_rate) * frame_bits / 8).map_err(|_| {
        TtsError::Encode(format!(
            "byte rate for {sample_rate} Hz x {channels} x {bits_per_sample}-bit overflows"
        ))
    })?;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // integer PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);
    Ok(out)
}

/// Playback length implied by a PCM byte count. Metadata only.
pub fn estimate_duration_seconds(
    byte_len: usize,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
) -> f64 {
    let frame_bytes = channels as f64 * (bits_per_sample as f64 / 8.0);
    if frame_bytes == 0.0 || sample_rate == 0 {
        return 0.0;
    }
    byte_len as f64 / frame_bytes / sample_rate as f64
}

/// Coarse amplitude envelope of 16-bit PCM for a waveform widget.
///
/// Produces [`WAVEFORM_BUCKETS`] peak values scaled to 0..=31 and packed
/// LSB-first as 5-bit fields. Returns `None` when the buffer cannot be read
/// as 16-bit samples.
pub fn summarize_waveform(pcm: &[u8], sample_rate: u32) -> Option<Vec<u8>> {
    if sample_rate == 0 || pcm.is_empty() || pcm.len() % 2 != 0 {
        return None;
    }
    let samples: Vec<u16> = pcm
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]).unsigned_abs())
        .collect();

    let stride = (samples.len() / WAVEFORM_BUCKETS).max(1);
    let mut peaks = [0u16; WAVEFORM_BUCKETS];
    let mut filled = 0;
    let mut peak = 0u16;
    for (i, &sample) in samples.iter().enumerate() {
        peak = peak.max(sample);
        if i % stride == 0 {
            if filled < WAVEFORM_BUCKETS {
                peaks[filled] = peak;
                filled += 1;
            }
            peak = 0;
        }
    }

    let sum: u64 = peaks.iter().map(|&p| p as u64).sum();
    let ceiling = ((sum as f64 * 1.8 / WAVEFORM_BUCKETS as f64) as u64).max(WAVEFORM_MIN_CEILING);

    let mut packed = vec![0u8; WAVEFORM_BUCKETS * WAVEFORM_BITS / 8 + 1];
    for (i, &p) in peaks.iter().enumerate() {
        let value = (p as u64).min(ceiling) * WAVEFORM_MAX / ceiling;
        set_bits(&mut packed, i * WAVEFORM_BITS, value as u16);
    }
    Some(packed)
}

fn set_bits(bytes: &mut [u8], bit_offset: usize, value: u16) {
    let index = bit_offset / 8;
    let wide = (value & WAVEFORM_MAX as u16) << (bit_offset % 8);
    bytes[index] |= (wide & 0xff) as u8;
    if wide > 0xff {
        bytes[index + 1] |= (wide >> 8) as u8;
    }
}

/// Duration of a WAV file on disk, read back through its header.
pub fn wav_duration_seconds(path: &Path) -> Result<f64> {
    let reader = WavReader::open(path).map_err(|e| TtsError::Parse(e.to_string()))?;
    let spec = reader.spec();
    let samples = reader.len();
    let frames = samples as f64 / spec.channels as f64;
    Ok(frames / spec.sample_rate as f64)
}
