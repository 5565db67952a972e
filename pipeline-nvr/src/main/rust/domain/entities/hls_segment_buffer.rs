use std::collections::VecDeque;
use std::fmt::Write;
use std::time::Duration;

use crate::domain::errors::{DomainError, Result};
use crate::domain::value_objects::MediaPacket;

pub const MIN_READY_SEGMENTS: usize = 5;
pub const DEFAULT_WINDOW: usize = 6;

/// Keyframe-to-keyframe packet group
#[derive(Debug, Clone)]
pub struct Segment {
    sequence: u64,
    duration: Duration,
    packets: Vec<MediaPacket>,
}

impl Segment {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn packets(&self) -> &[MediaPacket] {
        &self.packets
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub text: String,
    pub first_sequence: u64,
    pub segment_count: usize,
}

/// Rolling window of the most recent HLS segments of one channel
#[derive(Debug)]
pub struct HlsSegmentBuffer {
    window: usize,
    min_ready: usize,
    next_sequence: u64,
    segments: VecDeque<Segment>,
}

impl HlsSegmentBuffer {
    pub fn new(window: usize) -> Result<Self> {
        if window < MIN_READY_SEGMENTS {
            return Err(DomainError::InvalidConfiguration(format!(
                "HLS window {} is below the {} segments needed for a playlist",
                window, MIN_READY_SEGMENTS
            )));
        }
        Ok(Self {
            window,
            min_ready: MIN_READY_SEGMENTS,
            next_sequence: 0,
            segments: VecDeque::with_capacity(window + 1),
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.segments.len() >= self.min_ready
    }

    /// Append a closed segment, evicting the oldest beyond the window
    pub fn add_segment(&mut self, packets: Vec<MediaPacket>, duration: Duration) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.segments.push_back(Segment {
            sequence,
            duration,
            packets,
        });
        while self.segments.len() > self.window {
            self.segments.pop_front();
        }
        sequence
    }

    pub fn segment(&self, sequence: u64) -> Option<&Segment> {
        let first = self.segments.front()?.sequence;
        let index = usize::try_from(sequence.checked_sub(first)?).ok()?;
        self.segments.get(index)
    }

    pub fn playlist(&self) -> Result<MediaPlaylist> {
        if !self.is_ready() {
            return Err(DomainError::PlaylistNotReady {
                available: self.segments.len(),
                required: self.min_ready,
            });
        }

        let target = self
            .segments
            .iter()
            .map(|segment| segment.duration.as_secs_f64().ceil() as u64)
            .max()
            .unwrap_or(1)
            .max(1);
        let first_sequence = self.segments.front().map(|s| s.sequence).unwrap_or(0);

        let mut text = String::with_capacity(64 + self.segments.len() * 48);
        text.push_str("#EXTM3U\n#EXT-X-VERSION:3\n");
        let _ = writeln!(text, "#EXT-X-TARGETDURATION:{}", target);
        let _ = writeln!(text, "#EXT-X-MEDIA-SEQUENCE:{}", first_sequence);
        for segment in &self.segments {
            let _ = writeln!(text, "#EXTINF:{:.3},", segment.duration.as_secs_f64());
            let _ = writeln!(text, "segment/{}/file.ts", segment.sequence);
        }

        Ok(MediaPlaylist {
            text,
            first_sequence,
            segment_count: self.segments.len(),
        })
    }

    /// Drop buffered segments when a session ends. Sequence numbers keep growing.
    pub fn flush(&mut self) {
        self.segments.clear();
    }
}
