//! Configuration management and environment variable loading
//!
//! Every tunable of the voice pipeline and the mimic poster is read once into
//! an [`EzraConfig`] and injected from there. Nothing below reads the
//! environment after startup.

use crate::{EzraError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Load environment variables from a `.env` file
///
/// A missing file is not an error; the process environment is used as-is.
pub fn load_env() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::info!("✓ Loaded environment from: {}", path.display());
            Ok(())
        }
        Err(dotenvy::Error::LineParse(line, pos)) => Err(EzraError::config(format!(
            "Failed to parse .env file at line {}, position {}",
            line, pos
        ))),
        Err(dotenvy::Error::Io(_)) => {
            tracing::debug!("No .env file found - using system environment variables only");
            Ok(())
        }
        Err(e) => Err(EzraError::config(format!("Failed to load .env file: {}", e))),
    }
}

/// Get optional environment variable with default
pub fn get_env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Get environment variable parsed into `T`, falling back on absence or parse failure
pub fn get_env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean
pub fn get_env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Typed settings
// ============================================================================

/// Voice pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceSettings {
    /// STT service base URL
    pub stt_url: String,
    /// TTS service base URL
    pub tts_url: String,
    /// Normalized RMS energy above which a frame counts as speech
    pub vad_threshold: f64,
    /// Trailing silence that ends a segment, in milliseconds
    pub silence_duration_ms: u64,
    /// Directory holding reference WAVs
    pub reference_dir: PathBuf,
    /// Bridge control channel URL
    pub bridge_url: String,
    /// Local UDP port the bridge sends PCM to
    pub audio_port: u16,
    /// Use the streamed TTS path with early playback
    pub tts_streaming: bool,
    /// ffmpeg binary used to normalize reference uploads
    pub ffmpeg_path: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stt_url: "http://localhost:9001".to_string(),
            tts_url: "http://localhost:9002".to_string(),
            vad_threshold: 0.01,
            silence_duration_ms: 1000,
            reference_dir: PathBuf::from("./voice_references"),
            bridge_url: "ws://localhost:5000".to_string(),
            audio_port: 4000,
            tts_streaming: true,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl VoiceSettings {
    /// Silence grace as a duration
    pub fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.silence_duration_ms)
    }
}

/// Mimic poster settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MimicSettings {
    /// Channel the background poster writes to and listens on
    pub channel_id: Option<String>,
    /// Operator allowed to start mimic mode on others
    pub admin_user_id: Option<String>,
}

/// Complete injected configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EzraConfig {
    /// Voice pipeline settings
    pub voice: VoiceSettings,
    /// Mimic poster settings
    pub mimic: MimicSettings,
}

impl EzraConfig {
    /// Load `.env`, read the process environment and validate
    pub fn from_env() -> Result<Self> {
        load_env()?;
        let config = Self::from_lookup(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Build from an arbitrary key lookup; unset or unparsable keys keep defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = VoiceSettings::default();

        let voice = VoiceSettings {
            stt_url: get("STT_SERVICE_URL").unwrap_or(defaults.stt_url),
            tts_url: get("TTS_SERVICE_URL").unwrap_or(defaults.tts_url),
            vad_threshold: get("VAD_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.vad_threshold),
            silence_duration_ms: get("SILENCE_DURATION")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.silence_duration_ms),
            reference_dir: get("VOICE_REFERENCE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.reference_dir),
            bridge_url: get("VOICE_BRIDGE_URL").unwrap_or(defaults.bridge_url),
            audio_port: get("VOICE_AUDIO_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.audio_port),
            tts_streaming: get("VOICE_TTS_STREAMING")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.tts_streaming),
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
        };

        let mimic = MimicSettings {
            channel_id: get("MIMIC_CHANNEL_ID"),
            admin_user_id: get("ADMIN_USER_ID"),
        };

        Self { voice, mimic }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.voice.stt_url.is_empty() {
            return Err(EzraError::config("STT_SERVICE_URL is required"));
        }
        if self.voice.tts_url.is_empty() {
            return Err(EzraError::config("TTS_SERVICE_URL is required"));
        }
        if !(self.voice.vad_threshold > 0.0 && self.voice.vad_threshold <= 1.0) {
            return Err(EzraError::config(format!(
                "VAD_THRESHOLD must be in (0, 1], got {}",
                self.voice.vad_threshold
            )));
        }
        if self.voice.silence_duration_ms == 0 {
            return Err(EzraError::config("SILENCE_DURATION must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Startup settings table
// ============================================================================

struct SettingRow {
    env_var: &'static str,
    value: String,
    is_default: bool,
}

fn pad(s: &str, w: usize) -> String {
    let mut out: String = s.chars().take(w).collect();
    let len = out.chars().count();
    if w > len {
        out.push_str(&" ".repeat(w - len));
    }
    out
}

/// Log the effective configuration as a table, marking overridden values
pub fn log_settings(config: &EzraConfig) {
    let defaults = EzraConfig::default();
    let v = &config.voice;
    let d = &defaults.voice;
    let unset = || "<unset>".to_string();

    let rows = vec![
        SettingRow { env_var: "STT_SERVICE_URL", value: v.stt_url.clone(), is_default: v.stt_url == d.stt_url },
        SettingRow { env_var: "TTS_SERVICE_URL", value: v.tts_url.clone(), is_default: v.tts_url == d.tts_url },
        SettingRow { env_var: "VAD_THRESHOLD", value: v.vad_threshold.to_string(), is_default: v.vad_threshold == d.vad_threshold },
        SettingRow { env_var: "SILENCE_DURATION", value: format!("{}ms", v.silence_duration_ms), is_default: v.silence_duration_ms == d.silence_duration_ms },
        SettingRow { env_var: "VOICE_REFERENCE_DIR", value: v.reference_dir.display().to_string(), is_default: v.reference_dir == d.reference_dir },
        SettingRow { env_var: "VOICE_BRIDGE_URL", value: v.bridge_url.clone(), is_default: v.bridge_url == d.bridge_url },
        SettingRow { env_var: "VOICE_AUDIO_PORT", value: v.audio_port.to_string(), is_default: v.audio_port == d.audio_port },
        SettingRow { env_var: "VOICE_TTS_STREAMING", value: v.tts_streaming.to_string(), is_default: v.tts_streaming == d.tts_streaming },
        SettingRow { env_var: "MIMIC_CHANNEL_ID", value: config.mimic.channel_id.clone().unwrap_or_else(unset), is_default: config.mimic.channel_id.is_none() },
        SettingRow { env_var: "ADMIN_USER_ID", value: config.mimic.admin_user_id.clone().unwrap_or_else(unset), is_default: config.mimic.admin_user_id.is_none() },
    ];

    tracing::info!("+{}+", "=".repeat(62));
    tracing::info!("|{}|", pad("  EZRA  voice + mimic settings", 62));
    tracing::info!("+{}+", "-".repeat(62));
    for row in rows {
        let status = if row.is_default { "default" } else { "custom" };
        tracing::info!(
            "|{}|{}|{}|",
            pad(&format!(" {}", row.env_var), 24),
            pad(&format!(" {}", row.value), 28),
            pad(&format!(" {}", status), 8)
        );
    }
    tracing::info!("+{}+", "=".repeat(62));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = EzraConfig::from_lookup(|_| None);
        assert_eq!(config, EzraConfig::default());
        assert_eq!(config.voice.bridge_url, "ws://localhost:5000");
        assert_eq!(config.voice.audio_port, 4000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = EzraConfig::from_lookup(lookup(&[
            ("STT_SERVICE_URL", "http://stt:9001"),
            ("TTS_SERVICE_URL", "http://tts:9002"),
            ("VAD_THRESHOLD", "0.02"),
            ("SILENCE_DURATION", "750"),
            ("MIMIC_CHANNEL_ID", "12345"),
            ("VOICE_TTS_STREAMING", "off"),
        ]));

        assert_eq!(config.voice.stt_url, "http://stt:9001");
        assert_eq!(config.voice.tts_url, "http://tts:9002");
        assert_eq!(config.voice.vad_threshold, 0.02);
        assert_eq!(config.voice.silence_duration(), Duration::from_millis(750));
        assert!(!config.voice.tts_streaming);
        assert_eq!(config.mimic.channel_id.as_deref(), Some("12345"));
        assert!(config.mimic.admin_user_id.is_none());
    }

    #[test]
    fn test_unparsable_values_keep_defaults() {
        let config = EzraConfig::from_lookup(lookup(&[
            ("VAD_THRESHOLD", "loud"),
            ("VOICE_AUDIO_PORT", "99999"),
            ("MIMIC_CHANNEL_ID", "   "),
        ]));
        assert_eq!(config.voice.vad_threshold, 0.01);
        assert_eq!(config.voice.audio_port, 4000);
        assert!(config.mimic.channel_id.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let config = EzraConfig::from_lookup(lookup(&[("VAD_THRESHOLD", "1.5")]));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("VAD_THRESHOLD"));

        let config = EzraConfig::from_lookup(lookup(&[("SILENCE_DURATION", "0")]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_dotenv_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# voice").unwrap();
        writeln!(file, "VOICE_BRIDGE_URL=ws://bridge:5000").unwrap();
        writeln!(file, "ADMIN_USER_ID=\"42\"").unwrap();

        let pairs: HashMap<String, String> = dotenvy::from_path_iter(file.path())
            .unwrap()
            .map(|item| item.unwrap())
            .collect();
        let config = EzraConfig::from_lookup(|key| pairs.get(key).cloned());
        assert_eq!(config.voice.bridge_url, "ws://bridge:5000");
        assert_eq!(config.mimic.admin_user_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_get_env_helpers() {
        env::set_var("EZRA_TEST_BOOL", "yes");
        env::set_var("EZRA_TEST_INT", "42");
        assert!(get_env_bool("EZRA_TEST_BOOL", false));
        assert_eq!(get_env_parse("EZRA_TEST_INT", 0u32), 42);
        assert_eq!(get_env_parse("EZRA_TEST_NONEXISTENT", 7u32), 7);
        assert_eq!(get_env_or("EZRA_TEST_NONEXISTENT", "fallback"), "fallback");
        env::remove_var("EZRA_TEST_BOOL");
        env::remove_var("EZRA_TEST_INT");
    }
}
