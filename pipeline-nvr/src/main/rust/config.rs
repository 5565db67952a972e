use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;

use crate::application::services::{CaptureSettings, RecorderSettings, RegistrySettings};
use crate::domain::entities::MIN_READY_SEGMENTS;
use crate::domain::value_objects::{EncoderCommand, RecordingLayout, RetentionPolicy, StreamConfig};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pipeline-nvr",
    version = "0.1.0",
    author = "Hawkeye Video Pipeline",
    about = "Camera ingest, HLS fan-out, encrypted recording and disk retention"
)]
pub struct Config {
    /// JSON file with the configured streams
    #[arg(long, env = "NVR_STREAMS_FILE", default_value = "streams.json")]
    pub streams_file: PathBuf,

    /// Base directory the storage directories are resolved against
    #[arg(long, env = "NVR_BASE_ROOT", default_value = ".")]
    pub base_root: PathBuf,

    /// Recording tree, relative to the base root
    #[arg(long, env = "NVR_RECORDINGS_DIR", default_value = "nvr_recordings")]
    pub recordings_dir: PathBuf,

    /// Encryption keys, relative to the base root
    #[arg(long, env = "NVR_KEY_DIR", default_value = "keys")]
    pub key_dir: PathBuf,

    /// Local MP4 captures, relative to the base root
    #[arg(long, env = "NVR_SAVE_DIR", default_value = "save")]
    pub save_dir: PathBuf,

    /// Encoder binary, or the directory holding it
    #[arg(long, env = "NVR_ENCODER_PATH", default_value = "./external_tools/")]
    pub encoder_path: PathBuf,

    /// Key URI written into recording playlists
    #[arg(
        long,
        env = "NVR_KEY_URL_TEMPLATE",
        default_value = "/stream/{stream}/channel/{channel}/recording/key"
    )]
    pub key_url_template: String,

    /// Encoder input URL, e.g. rtsp://127.0.0.1:5541/{stream}/{channel}.
    /// Defaults to the channel's upstream URL.
    #[arg(long, env = "NVR_RECORDING_INPUT_TEMPLATE")]
    pub recording_input_template: Option<String>,

    /// Recording segment length in seconds
    #[arg(long, env = "NVR_SEGMENT_SECONDS", default_value = "10")]
    pub segment_seconds: u32,

    /// Hours between retention sweeps
    #[arg(long, env = "NVR_DISK_CHECK_INTERVAL_HOURS", default_value = "1")]
    pub disk_check_interval_hours: u64,

    /// Days of recordings to keep (0 disables the age limit)
    #[arg(long, env = "NVR_RETENTION_DAYS", default_value = "30")]
    pub retention_days: u32,

    /// Maximum size of the recording tree in GB (0 disables the limit)
    #[arg(long, env = "NVR_RETENTION_CAPACITY_GB", default_value = "500")]
    pub retention_capacity_gb: f64,

    /// Free space to keep on the recording disk in GB
    #[arg(long, env = "NVR_MIN_FREE_SPACE_GB", default_value = "5")]
    pub min_free_space_gb: f64,

    /// Segments kept in the live HLS window
    #[arg(long, env = "NVR_HLS_WINDOW", default_value = "6")]
    pub hls_window: usize,

    /// Metrics server port
    #[arg(long, env = "METRICS_PORT", default_value = "9003")]
    pub metrics_port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Minimum allowed port (ports below 1024 are privileged)
const MIN_USER_PORT: u16 = 1024;
const SECONDS_PER_HOUR: u64 = 3600;

#[derive(Debug, Default, Deserialize)]
struct StreamsFile {
    #[serde(default)]
    streams: BTreeMap<String, StreamConfig>,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        Self::validate_port(self.metrics_port, "metrics")?;

        if self.segment_seconds == 0 {
            anyhow::bail!("Segment length cannot be 0");
        }

        if self.disk_check_interval_hours == 0 {
            anyhow::bail!("Disk check interval cannot be 0");
        }

        if self.retention_capacity_gb < 0.0 {
            anyhow::bail!("Retention capacity cannot be negative");
        }

        if self.min_free_space_gb < 0.0 {
            anyhow::bail!("Minimum free space cannot be negative");
        }

        if self.hls_window < MIN_READY_SEGMENTS {
            anyhow::bail!(
                "HLS window ({}) cannot be smaller than {} segments",
                self.hls_window,
                MIN_READY_SEGMENTS
            );
        }

        if !self.key_url_template.contains("{stream}") || !self.key_url_template.contains("{channel}") {
            anyhow::bail!("Key URL template must contain {{stream}} and {{channel}}");
        }

        Ok(())
    }

    fn validate_port(port: u16, name: &str) -> anyhow::Result<()> {
        if port == 0 {
            anyhow::bail!("Invalid {} port: port cannot be 0", name);
        }
        if port < MIN_USER_PORT {
            anyhow::bail!(
                "Invalid {} port: {} is a privileged port (< {}). Use a port >= {}",
                name,
                port,
                MIN_USER_PORT,
                MIN_USER_PORT
            );
        }
        Ok(())
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        self.base_root.join(dir)
    }

    pub fn recordings_root(&self) -> PathBuf {
        self.resolve(&self.recordings_dir)
    }

    pub fn key_root(&self) -> PathBuf {
        self.resolve(&self.key_dir)
    }

    pub fn to_retention_policy(&self) -> crate::domain::errors::Result<RetentionPolicy> {
        RetentionPolicy::new(
            Duration::from_secs(self.disk_check_interval_hours * SECONDS_PER_HOUR),
            Some(self.retention_days),
            Some(self.retention_capacity_gb).filter(|gb| *gb > 0.0),
            self.min_free_space_gb,
        )
    }

    pub fn to_registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            hls_window: self.hls_window,
            ..RegistrySettings::default()
        }
    }

    pub fn to_recorder_settings(&self) -> RecorderSettings {
        let mut settings = RecorderSettings::new(
            RecordingLayout::new(self.recordings_root()),
            EncoderCommand::resolve_program(&self.encoder_path),
        );
        settings.input_template = self.recording_input_template.clone();
        settings.segment_seconds = self.segment_seconds;
        settings
    }

    pub fn to_capture_settings(&self) -> CaptureSettings {
        CaptureSettings::new(self.resolve(&self.save_dir))
    }

    /// Streams configured in `--streams-file`. A missing file means none.
    pub fn load_streams(&self) -> anyhow::Result<BTreeMap<String, StreamConfig>> {
        let text = match fs::read_to_string(&self.streams_file) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %self.streams_file.display(),
                    "Streams file not found, starting with no streams"
                );
                return Ok(BTreeMap::new());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read {}", self.streams_file.display())
                })
            }
        };
        let file: StreamsFile = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse {}", self.streams_file.display()))?;
        Ok(file.streams)
    }
}
