use std::path::PathBuf;
use std::time::Duration;

use crate::audio::ArtifactFormat;
use crate::tts::Voice;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-preview-tts:generateContent";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(45);
pub const DEFAULT_CLEANUP_GRACE: Duration = Duration::from_millis(1000);

#[derive(Clone, Debug)]
pub struct Config {
    pub endpoint: String,
    pub voice: Voice,
    pub format: ArtifactFormat,
    pub connect_timeout: Duration,
    /// Upper bound on the whole exchange once connected.
    pub read_timeout: Duration,
    pub temp_dir: PathBuf,
    /// Delay between a cancel-initiated stop and deleting the artifact.
    pub cleanup_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            voice: Voice::default(),
            format: ArtifactFormat::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            temp_dir: std::env::temp_dir(),
            cleanup_grace: DEFAULT_CLEANUP_GRACE,
        }
    }
}

/// Where the API credential comes from. `None` means speech is disabled.
pub trait ApiKeySource: Send + Sync {
    fn api_key(&self) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StaticApiKey(pub Option<String>);

impl StaticApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Some(key.into()))
    }
}

impl ApiKeySource for StaticApiKey {
    fn api_key(&self) -> Option<String> {
        non_blank(self.0.clone())
    }
}

/// Reads the key from an environment variable on every lookup.
#[derive(Clone, Debug)]
pub struct EnvApiKey {
    var: String,
}

impl EnvApiKey {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvApiKey {
    fn default() -> Self {
        Self::new("GEMINI_API_KEY")
    }
}

impl ApiKeySource for EnvApiKey {
    fn api_key(&self) -> Option<String> {
        non_blank(std::env::var(&self.var).ok())
    }
}

fn non_blank(key: Option<String>) -> Option<String> {
    key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_transport_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.connect_timeout, Duration::from_secs(15));
        assert_eq!(cfg.read_timeout, Duration::from_secs(45));
        assert_eq!(cfg.voice, Voice::Charon);
        assert_eq!(cfg.format, ArtifactFormat::Wav);
        assert!(cfg.endpoint.ends_with(":generateContent"));
    }

    #[test]
    fn blank_keys_count_as_absent() {
        assert_eq!(StaticApiKey(None).api_key(), None);
        assert_eq!(StaticApiKey::new("   ").api_key(), None);
        assert_eq!(StaticApiKey::new(" k ").api_key().as_deref(), Some("k"));
        assert_eq!(
            EnvApiKey::new("READALOUD_TEST_KEY_THAT_IS_NEVER_SET").api_key(),
            None
        );
    }
}
