//! Video metadata via ffprobe. The JSON output is decoded into typed
//! structs and frame rates are parsed as explicit `num/den` rationals;
//! probe output is never evaluated as an expression.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

/// What a probe could determine. Absent fields fall back to caller
/// defaults (square canvas, 3000 ms, 30 fps).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProbeInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: Option<u64>,
    pub fps: Option<f32>,
}

pub fn probe_args(input: &Path) -> Vec<String> {
    vec![
        "-v".to_owned(),
        "error".to_owned(),
        "-print_format".to_owned(),
        "json".to_owned(),
        "-show_streams".to_owned(),
        "-show_format".to_owned(),
        input.to_string_lossy().into_owned(),
    ]
}

pub fn ffprobe_binary() -> PathBuf {
    #[cfg(feature = "sidecar_ffmpeg")]
    {
        let path = ffmpeg_sidecar::ffprobe::ffprobe_path();
        if path.exists() {
            return path;
        }
    }
    PathBuf::from("ffprobe")
}

pub fn probe_file(input: &Path) -> Result<ProbeInfo> {
    let binary = ffprobe_binary();
    let args = probe_args(input);
    let output = Command::new(&binary)
        .args(args.iter().map(String::as_str))
        .output()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                anyhow!(
                    "ffprobe executable not found (resolved_path={}). Install ffmpeg or build with `--features sidecar_ffmpeg`.",
                    binary.display()
                )
            } else {
                anyhow!("failed to run ffprobe on {}: {error}", input.display())
            }
        })?;
    if !output.status.success() {
        bail!(
            "ffprobe failed with status {} on {}: {}",
            output.status,
            input.display(),
            tail(&String::from_utf8_lossy(&output.stderr), 500)
        );
    }
    parse_probe_json(&String::from_utf8_lossy(&output.stdout))
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
}

pub fn parse_probe_json(raw: &str) -> Result<ProbeInfo> {
    let parsed: ProbeOutput =
        serde_json::from_str(raw).context("failed to decode ffprobe output")?;
    let video = parsed
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"));
    let duration_ms = parsed
        .format
        .and_then(|format| format.duration)
        .and_then(|duration| duration.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
        .map(|seconds| (seconds * 1000.0).round() as u64);
    Ok(ProbeInfo {
        width: video.and_then(|stream| stream.width),
        height: video.and_then(|stream| stream.height),
        duration_ms,
        fps: video
            .and_then(|stream| stream.r_frame_rate.as_deref())
            .and_then(parse_rational_fps),
    })
}

/// Parses ffprobe's `num/den` frame rate (a bare number is also
/// accepted). Zero denominators and non-finite results yield `None`.
pub fn parse_rational_fps(raw: &str) -> Option<f32> {
    let raw = raw.trim();
    let fps = if let Some((num, den)) = raw.split_once('/') {
        let num: f32 = num.trim().parse().ok()?;
        let den: f32 = den.trim().parse().ok()?;
        if den == 0.0 {
            return None;
        }
        num / den
    } else {
        raw.parse().ok()?
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

pub(crate) fn tail(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars().collect::<Vec<_>>();
    if chars.len() > max_chars {
        chars = chars[chars.len().saturating_sub(max_chars)..].to_vec();
    }
    chars.into_iter().collect::<String>().trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rational_fps_parses_common_rates() {
        assert_eq!(parse_rational_fps("30/1"), Some(30.0));
        let ntsc = parse_rational_fps("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_rational_fps("24"), Some(24.0));
    }

    #[test]
    fn rational_fps_rejects_degenerate_input() {
        assert_eq!(parse_rational_fps("0/0"), None);
        assert_eq!(parse_rational_fps("30/0"), None);
        assert_eq!(parse_rational_fps("-25/1"), None);
        assert_eq!(parse_rational_fps("process.exit()"), None);
        assert_eq!(parse_rational_fps(""), None);
    }

    #[test]
    fn probe_json_extracts_video_stream_and_duration() {
        let raw = r#"{
            "streams": [
                {"codec_type": "audio", "r_frame_rate": "0/0"},
                {"codec_type": "video", "width": 512, "height": 288, "r_frame_rate": "25/1"}
            ],
            "format": {"duration": "2.040000"}
        }"#;
        let info = parse_probe_json(raw).unwrap();
        assert_eq!(info.width, Some(512));
        assert_eq!(info.height, Some(288));
        assert_eq!(info.duration_ms, Some(2040));
        assert_eq!(info.fps, Some(25.0));
    }

    #[test]
    fn probe_json_tolerates_missing_pieces() {
        let info = parse_probe_json(r#"{"streams": []}"#).unwrap();
        assert_eq!(info, ProbeInfo::default());
        assert!(parse_probe_json("not json").is_err());
    }

    #[test]
    fn probe_args_request_json_streams_and_format() {
        let args = probe_args(Path::new("/tmp/in.webm"));
        assert_eq!(args[0], "-v");
        assert!(args.contains(&"-show_streams".to_owned()));
        assert!(args.contains(&"-show_format".to_owned()));
        assert_eq!(args.last().unwrap(), "/tmp/in.webm");
    }

    #[test]
    fn tail_keeps_the_last_chars_trimmed() {
        assert_eq!(tail("abcdef\n", 3), "def");
        assert_eq!(tail("ab", 10), "ab");
    }
}
