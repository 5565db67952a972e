use std::time::Duration;

use crate::domain::value_objects::MediaPacket;

const PROBE_WINDOW: Duration = Duration::from_secs(1);
const PROBE_WINDOWS: u32 = 2;

/// Estimates the video frame rate from keyframe-aligned one second windows.
///
/// The first window warms up; the rate is taken from the second.
#[derive(Debug, Default, Clone)]
pub struct FpsProbe {
    started: bool,
    frames: u32,
    elapsed: Duration,
    windows: u32,
    fps: Option<u32>,
}

impl FpsProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fps(&self) -> Option<u32> {
        self.fps
    }

    /// Interval every video packet is normalised to once the rate is known
    pub fn frame_interval(&self) -> Option<Duration> {
        self.fps
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }

    /// Feed one packet; returns the estimate once it is stable
    pub fn observe(&mut self, packet: &MediaPacket) -> Option<u32> {
        if self.fps.is_some() || !packet.is_video() {
            return self.fps;
        }
        if packet.is_keyframe {
            if self.started && self.elapsed >= PROBE_WINDOW {
                self.windows += 1;
                if self.windows >= PROBE_WINDOWS {
                    let rate = f64::from(self.frames) / self.elapsed.as_secs_f64();
                    let rounded = rate.round() as u32;
                    if rounded > 0 {
                        self.fps = Some(rounded);
                    }
                }
                self.frames = 0;
                self.elapsed = Duration::ZERO;
            }
            self.started = true;
        }
        if !self.started {
            return None;
        }
        self.frames += 1;
        self.elapsed += packet.duration;
        self.fps
    }
}
