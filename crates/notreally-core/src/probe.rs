//! Container and stream metadata via `ffprobe`.

use std::path::Path;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::capability::Extractor;

/// Container/codec attributes of a media file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub container_format: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub duration_seconds: Option<f64>,
    pub bit_rate: Option<u64>,
    pub has_video: bool,
    pub has_audio: bool,
    pub video_codec: Option<String>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    pub video_avg_fps: Option<f64>,
    /// Display rotation in degrees, normalized to 0, 90, 180 or 270.
    pub video_rotation: Option<u32>,
    pub audio_codec: Option<String>,
    pub audio_sample_rate: Option<u32>,
    pub audio_channels: Option<u32>,
}

/// Probes media files with an external `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct ContainerProbe {
    ffprobe: String,
}

impl Default for ContainerProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl ContainerMetadata {
    /// Video dimensions as displayed, after applying the rotation.
    pub fn display_dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = (self.video_width?, self.video_height?);
        match self.video_rotation {
            Some(90) | Some(270) => Some((h, w)),
            _ => Some((w, h)),
        }
    }
}

impl ContainerProbe {
    pub fn new(ffprobe: impl Into<String>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }

    /// Probe `path`. Any failure yields `None`.
    pub fn probe(&self, path: &Path) -> Option<ContainerMetadata> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .output();

        let output = match output {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(program = %self.ffprobe, error = %e, "ffprobe unavailable");
                return None;
            }
        };
        if !output.status.success() {
            tracing::debug!(
                path = %path.display(),
                status = ?output.status.code(),
                "ffprobe rejected input"
            );
            return None;
        }

        match parse_probe_json(&output.stdout) {
            Some(meta) => Some(meta),
            None => {
                tracing::debug!(path = %path.display(), "ffprobe output not understood");
                None
            }
        }
    }
}

impl Extractor<ContainerMetadata> for ContainerProbe {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn try_extract(&self, media: &Path) -> Option<ContainerMetadata> {
        self.probe(media)
    }
}

// ── ffprobe JSON ──────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize, Default)]
struct ProbeFormat {
    format_name: Option<String>,
    size: Option<serde_json::Value>,
    duration: Option<serde_json::Value>,
    bit_rate: Option<serde_json::Value>,
}

#[derive(Deserialize, Default)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<serde_json::Value>,
    height: Option<serde_json::Value>,
    avg_frame_rate: Option<String>,
    sample_rate: Option<serde_json::Value>,
    channels: Option<serde_json::Value>,
    #[serde(default)]
    tags: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    side_data_list: Vec<serde_json::Map<String, serde_json::Value>>,
}

impl ProbeStream {
    /// Rotation from the display matrix side data, or the legacy `rotate` tag.
    fn rotation(&self) -> Option<u32> {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|sd| sd.get("rotation").and_then(lenient_f64))
            .or_else(|| self.tags.get("rotate").and_then(lenient_f64))?;
        let quarter = (degrees / 90.0).round() as i64;
        Some((quarter.rem_euclid(4) * 90) as u32)
    }
}

/// Build metadata from raw `ffprobe -print_format json` output.
pub fn parse_probe_json(bytes: &[u8]) -> Option<ContainerMetadata> {
    let probe: ProbeOutput = serde_json::from_slice(bytes).ok()?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    Some(ContainerMetadata {
        container_format: probe.format.format_name.clone(),
        file_size_bytes: probe.format.size.as_ref().and_then(lenient_u64),
        duration_seconds: probe.format.duration.as_ref().and_then(lenient_f64),
        bit_rate: probe.format.bit_rate.as_ref().and_then(lenient_u64),
        has_video: video.is_some(),
        has_audio: audio.is_some(),
        video_codec: video.and_then(|v| v.codec_name.clone()),
        video_width: video.and_then(|v| v.width.as_ref()).and_then(lenient_u32),
        video_height: video.and_then(|v| v.height.as_ref()).and_then(lenient_u32),
        video_avg_fps: video
            .and_then(|v| v.avg_frame_rate.as_deref())
            .and_then(parse_frame_rate),
        video_rotation: video.and_then(ProbeStream::rotation),
        audio_codec: audio.and_then(|a| a.codec_name.clone()),
        audio_sample_rate: audio.and_then(|a| a.sample_rate.as_ref()).and_then(lenient_u32),
        audio_channels: audio.and_then(|a| a.channels.as_ref()).and_then(lenient_u32),
    })
}

/// Parse an ffprobe rational such as `"30000/1001"`.
///
/// `"0/0"`, malformed input and zero denominators all yield `None`.
pub fn parse_frame_rate(fraction: &str) -> Option<f64> {
    let (num, den) = fraction.trim().split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 || !num.is_finite() || !den.is_finite() {
        return None;
    }
    Some(num / den)
}

fn lenient_f64(value: &serde_json::Value) -> Option<f64> {
    let v = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

fn lenient_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_u32(value: &serde_json::Value) -> Option<u32> {
    lenient_u64(value).and_then(|v| u32::try_from(v).ok())
}
