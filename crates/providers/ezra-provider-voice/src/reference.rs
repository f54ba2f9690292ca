//! Reference audio store
//!
//! Each user may own a normalized reference WAV (`<user>.wav`, 24 kHz mono
//! 16-bit) under the store directory. `default.wav` is adopted when present
//! and serves every user without a file of their own. Uploads in any
//! supported container are normalized through a [`Transcoder`].

use async_trait::async_trait;
use ezra_core::{EzraError, Result};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;

use crate::types::REFERENCE_SAMPLE_RATE;

/// User id under which the fallback reference is stored
pub const DEFAULT_REFERENCE: &str = "default";

/// Input extensions accepted for reference uploads
pub const SUPPORTED_EXTENSIONS: &[&str] = &[".wav", ".mp3", ".ogg", ".m4a", ".flac", ".aac"];

/// Converts arbitrary audio into a reference WAV
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Write a 24 kHz mono 16-bit WAV version of `input` to `output`
    async fn to_reference_wav(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Transcoder backed by an `ffmpeg` executable
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: String,
}

impl FfmpegTranscoder {
    /// Use the executable at `program` (a bare name is looked up on `PATH`)
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments passed to ffmpeg for one conversion
    pub fn args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-ar".to_string(),
            REFERENCE_SAMPLE_RATE.to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            "-y".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn to_reference_wav(&self, input: &Path, output: &Path) -> Result<()> {
        let result = Command::new(&self.program)
            .args(Self::args(input, output))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EzraError::transcode(format!("failed to run {}: {}", self.program, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(3)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join(" | ");
            return Err(EzraError::transcode(format!(
                "{} exited with {}: {}",
                self.program, result.status, tail
            )));
        }

        Ok(())
    }
}

/// Map an HTTP `Content-Type` to a file extension, defaulting to `.wav`
pub fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    let essence = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();

    match essence.as_str() {
        "audio/mpeg" | "audio/mp3" => ".mp3",
        "audio/ogg" | "application/ogg" => ".ogg",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => ".m4a",
        "audio/flac" | "audio/x-flac" => ".flac",
        "audio/aac" | "audio/x-aac" => ".aac",
        _ => ".wav",
    }
}

/// Lowercased extension of `path` including the dot, if supported
pub fn supported_extension(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default();

    if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else if ext.is_empty() {
        Err(EzraError::UnsupportedFormat("(none)".to_string()))
    } else {
        Err(EzraError::UnsupportedFormat(ext))
    }
}

fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty()
        || user_id.contains('/')
        || user_id.contains('\\')
        || user_id.contains("..")
    {
        return Err(EzraError::validation(format!("invalid reference owner: {:?}", user_id)));
    }
    Ok(())
}

/// Per-user reference WAV files with a shared default
pub struct ReferenceStore {
    dir: PathBuf,
    default: RwLock<Option<PathBuf>>,
    transcoder: Arc<dyn Transcoder>,
}

impl ReferenceStore {
    /// Open the store, creating `dir` if needed and adopting `default.wav`
    pub async fn open(dir: impl Into<PathBuf>, transcoder: Arc<dyn Transcoder>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let default_path = dir.join(format!("{}.wav", DEFAULT_REFERENCE));
        let default = if tokio::fs::try_exists(&default_path).await.unwrap_or(false) {
            tracing::info!(path = %default_path.display(), "Adopted default voice reference");
            Some(default_path)
        } else {
            None
        };

        Ok(Self {
            dir,
            default: RwLock::new(default),
            transcoder,
        })
    }

    /// Directory holding the reference files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the reference of `user_id` lives, whether or not it exists
    pub fn path_for(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}.wav", user_id))
    }

    /// Whether a default reference is available
    pub fn has_default(&self) -> bool {
        self.default.read().is_some()
    }

    /// Reference for `user_id`, falling back to the default
    pub fn get_reference(&self, user_id: &str) -> Result<PathBuf> {
        if validate_user_id(user_id).is_ok() {
            let specific = self.path_for(user_id);
            if specific.is_file() {
                return Ok(specific);
            }
        }

        match self.default.read().as_ref() {
            Some(default) if default.is_file() => Ok(default.clone()),
            _ => Err(EzraError::NoReference(user_id.to_string())),
        }
    }

    /// Normalize a local audio file into the reference of `user_id`
    pub async fn set_reference_from_file(&self, user_id: &str, source: &Path) -> Result<PathBuf> {
        validate_user_id(user_id)?;
        supported_extension(source)?;
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(EzraError::validation(format!(
                "audio file not found: {}",
                source.display()
            )));
        }

        let output = self.path_for(user_id);
        self.transcoder.to_reference_wav(source, &output).await?;
        self.adopt(user_id, &output);
        Ok(output)
    }

    /// Normalize uploaded bytes into the reference of `user_id`
    ///
    /// The container is inferred from `content_type`. The intermediate
    /// upload is removed whether or not transcoding succeeds.
    pub async fn set_reference_from_bytes(
        &self,
        user_id: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<PathBuf> {
        validate_user_id(user_id)?;
        let ext = extension_for_content_type(content_type);
        let temp = self.dir.join(format!("temp_{}{}", user_id, ext));
        tokio::fs::write(&temp, data).await?;

        let output = self.path_for(user_id);
        let result = self.transcoder.to_reference_wav(&temp, &output).await;
        if let Err(e) = tokio::fs::remove_file(&temp).await {
            tracing::debug!(path = %temp.display(), error = %e, "Failed to remove upload temp file");
        }
        result?;

        self.adopt(user_id, &output);
        Ok(output)
    }

    fn adopt(&self, user_id: &str, output: &Path) {
        if user_id == DEFAULT_REFERENCE {
            *self.default.write() = Some(output.to_path_buf());
        }
        tracing::info!(user_id, path = %output.display(), "Voice reference updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(extension_for_content_type(Some("audio/mpeg")), ".mp3");
        assert_eq!(extension_for_content_type(Some("audio/ogg; codecs=opus")), ".ogg");
        assert_eq!(extension_for_content_type(Some("audio/x-m4a")), ".m4a");
        assert_eq!(extension_for_content_type(Some("application/octet-stream")), ".wav");
        assert_eq!(extension_for_content_type(None), ".wav");
    }

    #[test]
    fn test_supported_extension() {
        assert_eq!(supported_extension(Path::new("clip.MP3")).unwrap(), ".mp3");
        let err = supported_extension(Path::new("clip.txt")).unwrap_err();
        assert_eq!(err.kind(), "unsupported_format");
        assert!(supported_extension(Path::new("clip")).is_err());
    }

    #[test]
    fn test_ffmpeg_args() {
        let args = FfmpegTranscoder::args(Path::new("/tmp/in.mp3"), Path::new("/refs/u1.wav"));
        assert_eq!(
            args,
            vec!["-i", "/tmp/in.mp3", "-ar", "24000", "-ac", "1", "-c:a", "pcm_s16le", "-y", "/refs/u1.wav"]
        );
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReferenceStore::open(dir.path(), Arc::new(MockTranscoder::new()))
            .await
            .unwrap();

        let err = store.get_reference("u1").unwrap_err();
        assert_eq!(err.kind(), "no_reference");

        std::fs::write(dir.path().join("default.wav"), b"RIFF").unwrap();
        let store = ReferenceStore::open(dir.path(), Arc::new(MockTranscoder::new()))
            .await
            .unwrap();
        assert!(store.has_default());
        assert_eq!(store.get_reference("u1").unwrap(), dir.path().join("default.wav"));

        std::fs::write(dir.path().join("u1.wav"), b"RIFF").unwrap();
        assert_eq!(store.get_reference("u1").unwrap(), dir.path().join("u1.wav"));
    }

    #[tokio::test]
    async fn test_upload_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let expected_input = dir.path().join("temp_u2.mp3");
        let expected_output = dir.path().join("u2.wav");

        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_to_reference_wav()
            .withf({
                let input = expected_input.clone();
                let output = expected_output.clone();
                move |i, o| i == input.as_path() && o == output.as_path()
            })
            .times(1)
            .returning(|_, output| {
                std::fs::write(output, b"RIFF").unwrap();
                Ok(())
            });

        let store = ReferenceStore::open(dir.path(), Arc::new(transcoder)).await.unwrap();
        let path = store
            .set_reference_from_bytes("u2", b"ID3...", Some("audio/mpeg"))
            .await
            .unwrap();

        assert_eq!(path, expected_output);
        assert!(!expected_input.exists());
        assert_eq!(store.get_reference("u2").unwrap(), expected_output);
    }

    #[tokio::test]
    async fn test_failed_transcode_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_to_reference_wav()
            .returning(|_, _| Err(EzraError::transcode("bad input")));

        let store = ReferenceStore::open(dir.path(), Arc::new(transcoder)).await.unwrap();
        let err = store
            .set_reference_from_bytes("u3", b"junk", None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "transcode_failed");
        assert!(!dir.path().join("temp_u3.wav").exists());
    }

    #[tokio::test]
    async fn test_set_default_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("upload.flac");
        std::fs::write(&source, b"fLaC").unwrap();

        let mut transcoder = MockTranscoder::new();
        transcoder.expect_to_reference_wav().returning(|_, output| {
            std::fs::write(output, b"RIFF").unwrap();
            Ok(())
        });

        let store = ReferenceStore::open(dir.path(), Arc::new(transcoder)).await.unwrap();
        assert!(!store.has_default());
        store.set_reference_from_file("default", &source).await.unwrap();
        assert!(store.has_default());
        assert_eq!(store.get_reference("anyone").unwrap(), dir.path().join("default.wav"));
    }

    #[tokio::test]
    async fn test_rejects_bad_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReferenceStore::open(dir.path(), Arc::new(MockTranscoder::new()))
            .await
            .unwrap();

        let err = store
            .set_reference_from_file("u1", Path::new("notes.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported_format");

        let err = store
            .set_reference_from_file("u1", &dir.path().join("missing.wav"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = store
            .set_reference_from_bytes("../etc", b"x", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
