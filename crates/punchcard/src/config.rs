use anyhow::{Context, Result};
use punchcard_core::RepeatPunchPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Session configuration: defaults, then an optional TOML file, then
/// `PUNCHCARD_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Folder of reference images, one or more per employee.
    pub images_dir: PathBuf,
    /// Cache of computed face encodings.
    pub encodings_dir: PathBuf,
    /// Where the CSV report is written at shutdown.
    pub report_dir: PathBuf,
    /// V4L2 device path.
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Frames discarded at startup while exposure settles.
    pub warmup_frames: usize,
    /// Downscale factor applied before encoding.
    pub frame_scale: f32,
    /// Maximum encoding distance for a positive match.
    pub match_tolerance: f32,
    /// Shell command of the face encoder process.
    pub encoder_cmd: Option<String>,
    pub repeat_punch: RepeatPunchPolicy,
    /// Ring the terminal bell on each punch.
    pub sound_enabled: bool,
    /// Redraw the punch status table on each punch.
    pub status_board: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("./images"),
            encodings_dir: PathBuf::from("./images_encoding"),
            report_dir: PathBuf::from("."),
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            warmup_frames: 4,
            frame_scale: punchcard_core::recognition::DEFAULT_FRAME_SCALE,
            match_tolerance: punchcard_core::gallery::DEFAULT_MATCH_TOLERANCE,
            encoder_cmd: None,
            repeat_punch: RepeatPunchPolicy::default(),
            sound_enabled: true,
            status_board: true,
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(config.with_env(|key| std::env::var(key).ok()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Overlay `PUNCHCARD_*` variables read through `lookup`.
    fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("PUNCHCARD_IMAGES_DIR") {
            self.images_dir = v.into();
        }
        if let Some(v) = lookup("PUNCHCARD_ENCODINGS_DIR") {
            self.encodings_dir = v.into();
        }
        if let Some(v) = lookup("PUNCHCARD_REPORT_DIR") {
            self.report_dir = v.into();
        }
        if let Some(v) = lookup("PUNCHCARD_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("PUNCHCARD_ENCODER_CMD") {
            self.encoder_cmd = Some(v);
        }
        self.warmup_frames = parse_var(&lookup, "PUNCHCARD_WARMUP_FRAMES").unwrap_or(self.warmup_frames);
        self.frame_scale = parse_var(&lookup, "PUNCHCARD_FRAME_SCALE").unwrap_or(self.frame_scale);
        self.match_tolerance = parse_var(&lookup, "PUNCHCARD_MATCH_TOLERANCE").unwrap_or(self.match_tolerance);
        self.repeat_punch = parse_var(&lookup, "PUNCHCARD_REPEAT_PUNCH").unwrap_or(self.repeat_punch);
        if let Some(v) = lookup("PUNCHCARD_SOUND") {
            self.sound_enabled = v != "0";
        }
        if let Some(v) = lookup("PUNCHCARD_STATUS_BOARD") {
            self.status_board = v != "0";
        }
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.parse().ok())
}
