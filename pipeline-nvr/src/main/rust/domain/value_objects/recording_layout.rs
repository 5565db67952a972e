use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};

use super::ChannelKey;

pub const DAY_FORMAT: &str = "%Y-%m-%d";
pub const SESSION_ID_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const PLAYBACK_PREFIX: &str = "playback_";

/// On-disk naming of recordings under the retention root
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingLayout {
    root: PathBuf,
}

impl RecordingLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn day_dir(&self, day: NaiveDate) -> PathBuf {
        self.root.join(day.format(DAY_FORMAT).to_string())
    }

    /// `<root>/<YYYY-MM-DD>/<stream>/<channel>`
    pub fn channel_dir(&self, day: NaiveDate, key: &ChannelKey) -> PathBuf {
        self.day_dir(day).join(key.stream_id()).join(key.channel_id())
    }

    pub fn session_id(started_at: NaiveDateTime) -> String {
        started_at.format(SESSION_ID_FORMAT).to_string()
    }

    pub fn playlist_path(dir: &Path, session_id: &str) -> PathBuf {
        dir.join(format!("{}.m3u8", session_id))
    }

    /// strftime pattern handed to the encoder
    pub fn segment_pattern(dir: &Path, stream_name: &str) -> PathBuf {
        dir.join(format!(
            "{}_{}.ts",
            Self::segment_prefix(stream_name),
            SESSION_ID_FORMAT
        ))
    }

    /// File name the encoder produces for a segment starting at `at`
    pub fn segment_file_name(stream_name: &str, at: NaiveDateTime) -> String {
        format!(
            "{}_{}.ts",
            Self::segment_prefix(stream_name),
            at.format(SESSION_ID_FORMAT)
        )
    }

    /// Stream names are user supplied; keep them filesystem and strftime safe
    pub fn segment_prefix(stream_name: &str) -> String {
        let prefix: String = stream_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if prefix.is_empty() {
            "stream".to_string()
        } else {
            prefix
        }
    }

    pub fn is_session_playlist(path: &Path) -> bool {
        let is_m3u8 = path.extension().map(|ext| ext == "m3u8").unwrap_or(false);
        let is_playback = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(PLAYBACK_PREFIX))
            .unwrap_or(false);
        is_m3u8 && !is_playback
    }
}
