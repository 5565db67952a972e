use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{info, warn};

use super::IngestService;
use crate::domain::entities::ClientSubscription;
use crate::domain::errors::Result;
use crate::domain::ports::ContainerMuxer;
use crate::domain::value_objects::{
    ChannelKey, ClientMode, CodecParameters, MediaPacket, RecordingLayout,
};

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub save_dir: PathBuf,
    pub no_video_timeout: Duration,
}

impl CaptureSettings {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
            no_video_timeout: Duration::from_secs(10),
        }
    }
}

/// Writes a live channel to a local fragmented MP4 file
pub struct CaptureService {
    ingest: Arc<IngestService>,
    muxer: Arc<dyn ContainerMuxer>,
    settings: CaptureSettings,
}

struct Mp4Writer {
    file: File,
    init_written: bool,
}

impl CaptureService {
    pub fn new(
        ingest: Arc<IngestService>,
        muxer: Arc<dyn ContainerMuxer>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            ingest,
            muxer,
            settings,
        }
    }

    /// Capture up to `duration` of the channel and return the file path
    pub async fn save_mp4(&self, key: &ChannelKey, duration: Duration) -> Result<PathBuf> {
        let subscription = self.ingest.attach_client(key, ClientMode::LocalSave)?;
        let client_id = subscription.id;
        let result = self.capture(key, subscription, duration).await;
        if let Err(e) = self.ingest.detach_client(key, &client_id) {
            warn!(channel = %key, error = %e, "Could not detach capture client");
        }
        result
    }

    async fn capture(
        &self,
        key: &ChannelKey,
        mut subscription: ClientSubscription,
        duration: Duration,
    ) -> Result<PathBuf> {
        let codecs = self.ingest.wait_codecs(key).await?;

        let directory = self
            .settings
            .save_dir
            .join(key.stream_id())
            .join(key.channel_id());
        fs::create_dir_all(&directory).await?;
        let path = directory.join(format!(
            "{}.mp4",
            RecordingLayout::session_id(Local::now().naive_local())
        ));
        let mut writer = Mp4Writer {
            file: File::create(&path).await?,
            init_written: false,
        };
        info!(channel = %key, path = %path.display(), ?duration, "Local capture started");

        let deadline = Instant::now() + duration;
        let no_video = sleep(self.settings.no_video_timeout);
        tokio::pin!(no_video);
        let mut group: Vec<MediaPacket> = Vec::new();
        let mut started = false;

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                _ = &mut no_video => {
                    warn!(channel = %key, "No video during local capture");
                    break;
                }
                packet = subscription.packets.recv() => {
                    let Some(packet) = packet else {
                        break;
                    };
                    if packet.is_video() {
                        no_video.as_mut().reset(Instant::now() + self.settings.no_video_timeout);
                    }
                    if packet.is_video_keyframe() {
                        started = true;
                        if !group.is_empty() {
                            let packets = std::mem::take(&mut group);
                            self.write_group(&mut writer, &codecs, &packets).await?;
                        }
                    }
                    if started {
                        group.push(packet);
                    }
                }
            }
        }

        if !group.is_empty() {
            self.write_group(&mut writer, &codecs, &group).await?;
        }
        writer.file.flush().await?;
        info!(channel = %key, path = %path.display(), "Local capture finished");
        Ok(path)
    }

    async fn write_group(
        &self,
        writer: &mut Mp4Writer,
        codecs: &CodecParameters,
        packets: &[MediaPacket],
    ) -> Result<()> {
        let fragment = self.muxer.fragmented_mp4(codecs, packets)?;
        if !writer.init_written {
            writer.file.write_all(&fragment.init).await?;
            writer.init_written = true;
        }
        writer.file.write_all(&fragment.media).await?;
        Ok(())
    }
}
