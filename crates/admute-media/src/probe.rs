//! FFprobe segment information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Stream layout and duration of a media segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Container duration in seconds, when reported
    pub duration: Option<f64>,
    /// Whether the segment carries a video stream
    pub has_video: bool,
    /// Whether the segment carries an audio stream
    pub has_audio: bool,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
}

/// Probe a segment file.
pub async fn probe_media(path: impl AsRef<Path>, timeout_secs: u64) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), output)
        .await
        .map_err(|_| MediaError::Timeout(timeout_secs))??;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "FFprobe failed".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe_output(&output.stdout)
}

/// Parse FFprobe's JSON report.
fn parse_probe_output(stdout: &[u8]) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    Ok(MediaInfo {
        duration,
        has_video: probe.streams.iter().any(|s| s.codec_type == "video"),
        has_audio: probe.streams.iter().any(|s| s.codec_type == "audio"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "streams": [{"codec_type": "video"}, {"codec_type": "audio"}],
            "format": {"duration": "3.003000"}
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert!(info.has_video);
        assert!(info.has_audio);
        assert!((info.duration.unwrap() - 3.003).abs() < 1e-9);
    }

    #[test]
    fn test_parse_probe_output_audio_only_without_duration() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        let info = parse_probe_output(json).unwrap();
        assert!(!info.has_video);
        assert_eq!(info.duration, None);
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let err = probe_media("/definitely/not/here.ts", 5).await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
