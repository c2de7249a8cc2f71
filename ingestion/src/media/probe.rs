use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use super::{CommandRunner, ToolError};

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("probe output is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("probe reported no streams")]
    NoStreams,
    #[error("probe reported no video stream")]
    NoVideoStream,
}

/// Frame geometry bucket used to partition object keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AspectClass {
    Landscape,
    Portrait,
    Other,
}

impl AspectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectClass::Landscape => "landscape",
            AspectClass::Portrait => "portrait",
            AspectClass::Other => "other",
        }
    }

    /// Classify by the width/height ratio truncated to two decimals:
    /// 1.77 is 16:9, 0.56 is 9:16, everything else (including a zero
    /// dimension) is `Other`.
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            return AspectClass::Other;
        }

        // integer division is the floor of ratio * 100 without float drift
        let hundredths = u64::from(width) * 100 / u64::from(height);
        match hundredths {
            177 => AspectClass::Landscape,
            56 => AspectClass::Portrait,
            _ => AspectClass::Other,
        }
    }
}

impl fmt::Display for AspectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<serde_json::Value>,
    height: Option<serde_json::Value>,
}

impl ProbeStream {
    fn dimension(value: &Option<serde_json::Value>) -> u32 {
        value
            .as_ref()
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    }
}

/// Reads stream geometry from a local media file through ffprobe.
#[derive(Clone)]
pub struct MediaInspector {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl MediaInspector {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        MediaInspector {
            runner,
            program: program.into(),
        }
    }

    pub async fn aspect_class(&self, path: &Path) -> Result<AspectClass, InspectError> {
        let args = [
            "-v".into(),
            "error".into(),
            "-print_format".into(),
            "json".into(),
            "-show_streams".into(),
            path.as_os_str().to_owned(),
        ];

        let stdout = self.runner.run(&self.program, &args).await?;
        tracing::debug!("ffprobe output for {}: {}", path.display(), String::from_utf8_lossy(&stdout));

        classify_probe_output(&stdout)
    }
}

fn classify_probe_output(stdout: &[u8]) -> Result<AspectClass, InspectError> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)?;

    if probe.streams.is_empty() {
        return Err(InspectError::NoStreams);
    }

    let video = probe
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or(InspectError::NoVideoStream)?;

    let width = ProbeStream::dimension(&video.width);
    let height = ProbeStream::dimension(&video.height);
    let class = AspectClass::from_dimensions(width, height);
    tracing::info!("Video stream is {}x{}, classified as {}", width, height, class);

    Ok(class)
}
