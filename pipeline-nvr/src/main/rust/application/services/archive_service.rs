use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info};

use super::ChannelRegistry;
use crate::domain::errors::{DomainError, Result};
use crate::domain::value_objects::{
    ChannelKey, RecordingLayout, DAY_FORMAT, PLAYBACK_PREFIX, SESSION_ID_FORMAT,
};

/// `findTime` format of seek requests: `2025-09-17 093026`
pub const FIND_TIME_FORMAT: &str = "%Y-%m-%d %H%M%S";
const LOOKBACK_SECONDS: i64 = 10;
const DEFAULT_SEGMENT_DURATION: &str = "10.0";
const KEY_TAG: &str = "#EXT-X-KEY:";
const EXTINF_TAG: &str = "#EXTINF:";
const EMPTY_TARGET: &str = "#EXT-X-TARGETDURATION:0";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingEntry {
    pub session_id: String,
    pub file_name: String,
    /// Relative to the recording root
    pub file_path: String,
    pub start_time: String,
    pub size: u64,
    #[serde(rename = "sizeKB")]
    pub size_kb: f64,
    pub channel_id: String,
    pub m3u8_content: String,
}

#[derive(Debug, Clone)]
struct FoundSegment {
    file_name: String,
}

/// Read-only queries over recordings on disk
pub struct ArchiveService {
    registry: Arc<ChannelRegistry>,
    layout: RecordingLayout,
}

impl ArchiveService {
    pub fn new(registry: Arc<ChannelRegistry>, layout: RecordingLayout) -> Self {
        Self { registry, layout }
    }

    /// Segment prefix of a stream. Streams deleted since recording fall
    /// back to their id.
    fn stream_name(&self, stream_id: &str) -> String {
        self.registry
            .stream_name(stream_id)
            .unwrap_or_else(|_| stream_id.to_string())
    }

    /// Write a playlist covering `[find_time - 10s, find_time + duration]`
    /// and return its path.
    pub fn video_serve_prepare(
        &self,
        key: &ChannelKey,
        find_time: &str,
        duration_secs: u32,
    ) -> Result<PathBuf> {
        let target = NaiveDateTime::parse_from_str(find_time, FIND_TIME_FORMAT)
            .map_err(|e| DomainError::InvalidTime(format!("{}: {}", find_time, e)))?;

        let directory = self.layout.channel_dir(target.date(), key);
        if !directory.is_dir() {
            return Err(DomainError::RecordingNotFound(directory.display().to_string()));
        }

        let existing = RecordingLayout::playlist_path(&directory, &RecordingLayout::session_id(target));
        if existing.is_file() {
            return Ok(existing);
        }

        let segments = find_segments(
            &directory,
            &self.stream_name(key.stream_id()),
            target,
            duration_secs,
        );
        if segments.is_empty() {
            return Err(DomainError::RecordingNotFound(format!("{} at {}", key, find_time)));
        }

        let playlists = session_playlists(&directory)?;
        let key_line = find_key_line(&playlists);
        let durations = find_durations(&playlists, &segments);

        let path = directory.join(format!(
            "{}{}_{}s.m3u8",
            PLAYBACK_PREFIX,
            RecordingLayout::session_id(target),
            duration_secs
        ));
        fs::write(&path, render_playlist(key_line.as_deref(), &segments, &durations))?;
        info!(
            channel = %key,
            segments = segments.len(),
            path = %path.display(),
            "Playback playlist prepared"
        );
        Ok(path)
    }

    /// Session playlists of every channel of a stream for one day
    pub fn recording_list_by_date(&self, stream_id: &str, date: &str) -> Result<Vec<RecordingEntry>> {
        let day = NaiveDate::parse_from_str(date, DAY_FORMAT)
            .map_err(|e| DomainError::InvalidTime(format!("{}: {}", date, e)))?;
        let stream_dir = self.layout.day_dir(day).join(stream_id);
        if !stream_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for channel in fs::read_dir(&stream_dir)? {
            let channel = channel?;
            if !channel.file_type()?.is_dir() {
                continue;
            }
            let channel_id = channel.file_name().to_string_lossy().into_owned();
            let playlists = match session_playlists(&channel.path()) {
                Ok(playlists) => playlists,
                Err(e) => {
                    debug!(path = %channel.path().display(), error = %e, "Skipping channel directory");
                    continue;
                }
            };

            for path in playlists {
                let Ok(content) = fs::read_to_string(&path) else {
                    continue;
                };
                if content.lines().any(|line| line.trim() == EMPTY_TARGET) {
                    continue;
                }
                let size = match fs::metadata(&path) {
                    Ok(metadata) => metadata.len(),
                    Err(_) => continue,
                };
                let file_name = file_name(&path);
                let session_id = file_name.trim_end_matches(".m3u8").to_string();
                let start_time = NaiveDateTime::parse_from_str(&session_id, SESSION_ID_FORMAT)
                    .map(|at| at.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|_| session_id.clone());

                entries.push(RecordingEntry {
                    file_path: format!("{}/{}/{}/{}", date, stream_id, channel_id, file_name),
                    session_id,
                    file_name,
                    start_time,
                    size,
                    size_kb: size as f64 / 1024.0,
                    channel_id: channel_id.clone(),
                    m3u8_content: content,
                });
            }
        }

        entries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(entries)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Probe one candidate name per second instead of listing the directory
fn find_segments(
    directory: &Path,
    stream_name: &str,
    target: NaiveDateTime,
    duration_secs: u32,
) -> Vec<FoundSegment> {
    let start = target - ChronoDuration::seconds(LOOKBACK_SECONDS);
    let end = target + ChronoDuration::seconds(i64::from(duration_secs));

    let mut found = Vec::new();
    let mut at = start;
    while at <= end {
        let file_name = RecordingLayout::segment_file_name(stream_name, at);
        if directory.join(&file_name).is_file() {
            found.push(FoundSegment { file_name });
        }
        at += ChronoDuration::seconds(1);
    }
    found
}

fn session_playlists(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut playlists: Vec<PathBuf> = fs::read_dir(directory)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| RecordingLayout::is_session_playlist(path))
        .collect();
    playlists.sort();
    Ok(playlists)
}

fn find_key_line(playlists: &[PathBuf]) -> Option<String> {
    playlists.iter().find_map(|path| {
        fs::read_to_string(path)
            .ok()?
            .lines()
            .find(|line| line.starts_with(KEY_TAG))
            .map(str::to_string)
    })
}

/// `#EXTINF` value preceding each wanted segment in the session playlists
fn find_durations(playlists: &[PathBuf], segments: &[FoundSegment]) -> HashMap<String, String> {
    let mut durations = HashMap::new();
    for path in playlists {
        if durations.len() == segments.len() {
            break;
        }
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        let mut duration = None;
        for line in content.lines() {
            if let Some(value) = line.strip_prefix(EXTINF_TAG) {
                duration = Some(value.trim_end_matches(',').to_string());
            } else if segments.iter().any(|segment| segment.file_name == line) {
                if let Some(value) = duration.take() {
                    durations.insert(line.to_string(), value);
                }
            }
        }
    }
    durations
}

fn render_playlist(
    key_line: Option<&str>,
    segments: &[FoundSegment],
    durations: &HashMap<String, String>,
) -> String {
    let duration_of = |segment: &FoundSegment| -> String {
        durations
            .get(&segment.file_name)
            .cloned()
            .unwrap_or_else(|| DEFAULT_SEGMENT_DURATION.to_string())
    };
    let target = segments
        .iter()
        .filter_map(|segment| duration_of(segment).parse::<f64>().ok())
        .fold(0.0_f64, f64::max)
        .ceil() as u64;

    let mut text = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    text.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", target.max(1)));
    text.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    if let Some(line) = key_line {
        text.push_str(line);
        text.push('\n');
    }
    for segment in segments {
        text.push_str(&format!("#EXTINF:{},\n{}\n", duration_of(segment), segment.file_name));
    }
    text.push_str("#EXT-X-ENDLIST\n");
    text
}
