use std::collections::VecDeque;
use std::fmt::Write;
use std::time::Duration;

use bytes::Bytes;

use crate::domain::errors::{DomainError, Result};
use crate::domain::value_objects::MediaPacket;

const PARTS_IN_PLAYLIST_SEGMENTS: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct Part {
    duration: Duration,
    independent: bool,
    packets: Vec<MediaPacket>,
}

impl Part {
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_independent(&self) -> bool {
        self.independent
    }

    pub fn packets(&self) -> &[MediaPacket] {
        &self.packets
    }

    fn push(&mut self, packet: MediaPacket) {
        if self.packets.is_empty() {
            self.independent = packet.is_video_keyframe();
        }
        if packet.is_video() {
            self.duration += packet.duration;
        }
        self.packets.push(packet);
    }
}

#[derive(Debug, Clone)]
struct LlSegment {
    msn: u64,
    parts: Vec<Part>,
    open: Part,
    complete: bool,
}

impl LlSegment {
    fn new(msn: u64) -> Self {
        Self {
            msn,
            parts: Vec::new(),
            open: Part::default(),
            complete: false,
        }
    }

    fn duration(&self) -> Duration {
        self.parts.iter().map(Part::duration).sum::<Duration>() + self.open.duration
    }

    fn close_part(&mut self) {
        if !self.open.packets.is_empty() {
            self.parts.push(std::mem::take(&mut self.open));
        }
    }

    fn close(&mut self) {
        self.close_part();
        self.complete = true;
    }

    fn packets(&self) -> Vec<MediaPacket> {
        self.parts
            .iter()
            .flat_map(|part| part.packets.iter().cloned())
            .collect()
    }
}

/// Low-latency HLS packager: segments split into addressable parts.
///
/// Expects packet durations already normalised to the frame interval.
#[derive(Debug)]
pub struct LowLatencyMuxer {
    segment_target: Duration,
    part_target: Duration,
    window: usize,
    next_msn: u64,
    segments: VecDeque<LlSegment>,
    init: Option<Bytes>,
}

impl LowLatencyMuxer {
    pub fn new(segment_target: Duration, part_target: Duration, window: usize) -> Self {
        Self {
            segment_target,
            part_target: part_target.min(segment_target),
            window: window.max(2),
            next_msn: 0,
            segments: VecDeque::with_capacity(window + 1),
            init: None,
        }
    }

    pub fn part_target(&self) -> Duration {
        self.part_target
    }

    pub fn write_packet(&mut self, packet: MediaPacket) {
        let keyframe = packet.is_video_keyframe();
        let needs_new_segment = match self.segments.back() {
            None => true,
            Some(current) => {
                current.complete || (keyframe && current.duration() >= self.segment_target)
            }
        };

        if needs_new_segment {
            if !keyframe {
                // a segment must open on a keyframe
                return;
            }
            if let Some(current) = self.segments.back_mut() {
                current.close();
            }
            self.segments.push_back(LlSegment::new(self.next_msn));
            self.next_msn += 1;
            while self.segments.len() > self.window {
                self.segments.pop_front();
            }
        }

        if let Some(current) = self.segments.back_mut() {
            if packet.is_video() && current.open.duration >= self.part_target {
                current.close_part();
            }
            current.open.push(packet);
        }
    }

    fn find(&self, msn: u64) -> Option<&LlSegment> {
        self.segments.iter().find(|segment| segment.msn == msn)
    }

    /// Blocking-reload predicate for `_HLS_msn` / `_HLS_part`
    pub fn has(&self, msn: u64, part: Option<usize>) -> bool {
        match (self.find(msn), part) {
            (Some(segment), Some(part)) => segment.complete || segment.parts.len() > part,
            (Some(segment), None) => segment.complete,
            (None, _) => self.segments.front().map(|s| msn < s.msn).unwrap_or(false),
        }
    }

    /// Packets of a completed segment
    pub fn segment(&self, msn: u64) -> Option<Vec<MediaPacket>> {
        self.find(msn)
            .filter(|segment| segment.complete)
            .map(LlSegment::packets)
    }

    /// Packets of a closed part
    pub fn fragment(&self, msn: u64, part: usize) -> Option<Vec<MediaPacket>> {
        self.find(msn)
            .and_then(|segment| segment.parts.get(part))
            .map(|part| part.packets.clone())
    }

    /// Packets used to derive the init section: the first closed part
    pub fn first_part(&self) -> Option<Vec<MediaPacket>> {
        self.segments
            .iter()
            .find_map(|segment| segment.parts.first())
            .map(|part| part.packets.clone())
    }

    pub fn init(&self) -> Option<Bytes> {
        self.init.clone()
    }

    pub fn set_init(&mut self, init: Bytes) {
        self.init = Some(init);
    }

    pub fn playlist(&self) -> Result<String> {
        let complete = self.segments.iter().filter(|s| s.complete).count();
        if complete == 0 {
            return Err(DomainError::PlaylistNotReady {
                available: 0,
                required: 1,
            });
        }

        let target = self
            .segments
            .iter()
            .map(|segment| segment.duration())
            .max()
            .unwrap_or(self.segment_target)
            .max(self.segment_target)
            .as_secs_f64()
            .ceil() as u64;
        let part = self.part_target.as_secs_f64();
        let first_msn = self.segments.front().map(|s| s.msn).unwrap_or(0);
        let detailed_from = self.segments.len().saturating_sub(PARTS_IN_PLAYLIST_SEGMENTS + 1);

        let mut text = String::with_capacity(512);
        text.push_str("#EXTM3U\n#EXT-X-VERSION:9\n");
        let _ = writeln!(text, "#EXT-X-TARGETDURATION:{}", target);
        let _ = writeln!(
            text,
            "#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES,PART-HOLD-BACK={:.3}",
            part * 3.0
        );
        let _ = writeln!(text, "#EXT-X-PART-INF:PART-TARGET={:.3}", part);
        let _ = writeln!(text, "#EXT-X-MEDIA-SEQUENCE:{}", first_msn);
        text.push_str("#EXT-X-MAP:URI=\"init.mp4\"\n");

        for (index, segment) in self.segments.iter().enumerate() {
            if index >= detailed_from {
                for (part_index, part) in segment.parts.iter().enumerate() {
                    let _ = write!(
                        text,
                        "#EXT-X-PART:DURATION={:.3},URI=\"fragment/{}/{}/0.m4s\"",
                        part.duration.as_secs_f64(),
                        segment.msn,
                        part_index
                    );
                    if part.independent {
                        text.push_str(",INDEPENDENT=YES");
                    }
                    text.push('\n');
                }
            }
            if segment.complete {
                let _ = writeln!(text, "#EXTINF:{:.3},", segment.duration().as_secs_f64());
                let _ = writeln!(text, "segment/{}/0.m4s", segment.msn);
            }
        }

        if let Some(current) = self.segments.back().filter(|s| !s.complete) {
            let _ = writeln!(
                text,
                "#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"fragment/{}/{}/0.m4s\"",
                current.msn,
                current.parts.len()
            );
        }

        Ok(text)
    }

    /// Discard everything buffered for the ended session
    pub fn flush(&mut self) {
        self.segments.clear();
        self.init = None;
    }
}
