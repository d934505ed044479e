use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::audio::{ArtifactFormat, AudioArtifact};
use crate::error::Result;

/// An encoded artifact written to a temporary file.
///
/// The file stays on disk until [`StoredArtifact::remove`] or
/// [`StoredArtifact::remove_after`] consumes the value, so it is deleted at
/// most once.
#[derive(Debug)]
pub struct StoredArtifact {
    path: PathBuf,
    format: ArtifactFormat,
    duration_seconds: f64,
    waveform: Option<Vec<u8>>,
    byte_len: usize,
}

impl StoredArtifact {
    pub fn write(dir: &Path, artifact: AudioArtifact) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("tts_audio")
            .suffix(&format!(".{}", artifact.format.extension()))
            .tempfile_in(dir)?;
        file.write_all(&artifact.bytes)?;
        file.flush()?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        debug!("Wrote {} bytes to {}", artifact.bytes.len(), path.display());
        Ok(Self {
            path,
            format: artifact.format,
            duration_seconds: artifact.duration_seconds,
            waveform: artifact.waveform,
            byte_len: artifact.bytes.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ArtifactFormat {
        self.format
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    pub fn waveform(&self) -> Option<&[u8]> {
        self.waveform.as_deref()
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn remove(self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Deleted {}", self.path.display()),
            Err(e) => warn!("Failed to delete {}: {}", self.path.display(), e),
        }
    }

    /// Deletes the file once `grace` has elapsed.
    pub async fn remove_after(self, grace: Duration) {
        tokio::time::sleep(grace).await;
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::SpeechResponse;

    fn artifact() -> AudioArtifact {
        AudioArtifact::encode(&SpeechResponse::new(vec![0u8; 96]), ArtifactFormat::Wav).unwrap()
    }

    #[test]
    fn writes_named_wav_into_dir() {
        let dir = tempfile::tempdir().unwrap();
        let stored = StoredArtifact::write(dir.path(), artifact()).unwrap();
        let name = stored.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("tts_audio") && name.ends_with(".wav"), "{name}");
        assert_eq!(std::fs::read(stored.path()).unwrap().len(), 140);
        assert_eq!(stored.byte_len(), 140);

        let path = stored.path().to_path_buf();
        stored.remove();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn deferred_removal_waits_for_grace() {
        let dir = tempfile::tempdir().unwrap();
        let stored = StoredArtifact::write(dir.path(), artifact()).unwrap();
        let path = stored.path().to_path_buf();

        let task = tokio::spawn(stored.remove_after(Duration::from_millis(100)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(path.exists());
        task.await.unwrap();
        assert!(!path.exists());
    }
}
