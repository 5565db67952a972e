#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use pipeline_nvr::domain::entities::DayFolder;
use pipeline_nvr::domain::ports::{
    Clock, ContainerMuxer, DayFolderStore, DialRequest, FragmentedMp4, DiskSpace, EncoderInput, EncoderLauncher, EncoderOutput,
    EncoderProcess, MediaSource, ProcessExit, UpstreamEvent, UpstreamSession,
};
use pipeline_nvr::domain::value_objects::{
    ChannelConfig, CodecParameters, EncoderCommand, MediaPacket, StreamConfig, VideoCodec,
    VideoParameters,
};
use pipeline_nvr::{DomainError, Result};

pub fn codecs() -> CodecParameters {
    CodecParameters::video_only(VideoParameters {
        codec: VideoCodec::H264,
        width: 1280,
        height: 720,
        codec_data: Bytes::from_static(&[1, 100, 0, 31]),
    })
}

pub fn stream(name: &str, url: &str, on_demand: bool, on_recording: bool) -> StreamConfig {
    StreamConfig::new(name).with_channel(
        "0",
        ChannelConfig::new(url)
            .on_demand(on_demand)
            .with_recording(on_recording),
    )
}

/// 25 fps video, keyframe every `gop` frames
pub fn frame(index: u64, gop: u64) -> MediaPacket {
    MediaPacket::video(
        Duration::from_millis(index * 40),
        index % gop == 0,
        Bytes::from(vec![0u8; 32]),
    )
}

/// Poll `check` every 10ms until it holds or `limit` passes
pub async fn eventually(limit: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Upstream connection handed to a test after a dial
pub struct FakeUpstream {
    pub events: mpsc::Sender<UpstreamEvent>,
    pub running: Arc<AtomicBool>,
    pub url: String,
}

impl FakeUpstream {
    pub async fn send(&self, event: UpstreamEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    pub fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.events.is_closed()
    }
}

/// Transport whose sessions are driven by the test
#[derive(Default)]
pub struct FakeSource {
    dials: AtomicUsize,
    failures_left: AtomicUsize,
    announce_codecs: AtomicBool,
    upstreams: Mutex<Vec<Arc<FakeUpstream>>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            announce_codecs: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Sessions report codecs through a later `CodecReady` event
    pub fn without_initial_codecs(self) -> Self {
        self.announce_codecs.store(false, Ordering::SeqCst);
        self
    }

    pub fn fail_next(&self, dials: usize) {
        self.failures_left.store(dials, Ordering::SeqCst);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn upstream(&self, index: usize) -> Option<Arc<FakeUpstream>> {
        self.upstreams.lock().unwrap().get(index).cloned()
    }

    pub fn open_sessions(&self) -> usize {
        self.upstreams
            .lock()
            .unwrap()
            .iter()
            .filter(|upstream| upstream.is_open())
            .count()
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn dial(&self, request: DialRequest) -> Result<UpstreamSession> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DomainError::UpstreamDial("connection refused".to_string()));
        }

        let (events, receiver) = mpsc::channel(256);
        let running = Arc::new(AtomicBool::new(true));
        self.upstreams.lock().unwrap().push(Arc::new(FakeUpstream {
            events,
            running: Arc::clone(&running),
            url: request.url,
        }));
        let initial = self
            .announce_codecs
            .load(Ordering::SeqCst)
            .then(codecs);
        Ok(UpstreamSession::new(initial, receiver, running))
    }
}

/// One spawned fake encoder
pub struct SpawnedEncoder {
    pub command: EncoderCommand,
    exits: mpsc::UnboundedSender<Option<i32>>,
    quits: Arc<AtomicUsize>,
}

impl SpawnedEncoder {
    /// `q` keystrokes received on stdin
    pub fn quit_count(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }

    /// Make the process exit with `code`
    pub fn exit(&self, code: i32) {
        let _ = self.exits.send(Some(code));
    }
}

/// Encoder launcher whose processes quit on `q`, can be told to exit, and
/// optionally print a progress line every 500ms.
pub struct FakeLauncher {
    chatty: bool,
    refuse: AtomicBool,
    spawned: Mutex<Vec<Arc<SpawnedEncoder>>>,
}

impl FakeLauncher {
    pub fn chatty() -> Self {
        Self {
            chatty: true,
            refuse: AtomicBool::new(false),
            spawned: Mutex::new(Vec::new()),
        }
    }

    pub fn silent() -> Self {
        Self {
            chatty: false,
            ..Self::chatty()
        }
    }

    pub fn refuse_spawns(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    pub fn encoder(&self, index: usize) -> Arc<SpawnedEncoder> {
        Arc::clone(&self.spawned.lock().unwrap()[index])
    }
}

impl EncoderLauncher for FakeLauncher {
    fn spawn(&self, command: &EncoderCommand) -> Result<Box<dyn EncoderProcess>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(DomainError::Process("spawn refused".to_string()));
        }

        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let exited = Arc::new(AtomicBool::new(false));

        let (stdin, mut stdin_reader) = tokio::io::duplex(64);
        let quit = exit_tx.clone();
        let quits = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&quits);
        tokio::spawn(async move {
            let mut buf = [0u8; 16];
            loop {
                match stdin_reader.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => {
                        let pressed = buf[..n].iter().filter(|b| **b == b'q').count();
                        if pressed > 0 && counted.fetch_add(pressed, Ordering::SeqCst) == 0 {
                            let _ = quit.send(Some(0));
                        }
                    }
                }
            }
        });

        let (mut stderr_writer, stderr) = tokio::io::duplex(4096);
        if self.chatty {
            let exited = Arc::clone(&exited);
            tokio::spawn(async move {
                let mut frame = 0u64;
                while !exited.load(Ordering::SeqCst) {
                    let line = format!("frame={} fps=25 speed=1.0x\n", frame);
                    if stderr_writer.write_all(line.as_bytes()).await.is_err() {
                        return;
                    }
                    frame += 1;
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            });
        }

        self.spawned.lock().unwrap().push(Arc::new(SpawnedEncoder {
            command: command.clone(),
            exits: exit_tx.clone(),
            quits,
        }));

        Ok(Box::new(FakeProcess {
            stdin: Some(Box::new(stdin)),
            stderr: Some(Box::new(stderr)),
            exits: exit_rx,
            kill: exit_tx,
            exited,
        }))
    }
}

struct FakeProcess {
    stdin: Option<EncoderInput>,
    stderr: Option<EncoderOutput>,
    exits: mpsc::UnboundedReceiver<Option<i32>>,
    kill: mpsc::UnboundedSender<Option<i32>>,
    exited: Arc<AtomicBool>,
}

#[async_trait]
impl EncoderProcess for FakeProcess {
    fn take_stdin(&mut self) -> Option<EncoderInput> {
        self.stdin.take()
    }

    fn take_stderr(&mut self) -> Option<EncoderOutput> {
        self.stderr.take()
    }

    async fn wait(&mut self) -> io::Result<ProcessExit> {
        let code = self.exits.recv().await.flatten();
        self.exited.store(true, Ordering::SeqCst);
        Ok(ProcessExit { code })
    }

    fn start_kill(&mut self) -> io::Result<()> {
        // Killed by signal: no exit code
        let _ = self.kill.send(None);
        Ok(())
    }
}

/// Calendar date that only moves when told to
pub struct FakeClock {
    today: Mutex<NaiveDate>,
}

impl FakeClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: Mutex::new(today),
        }
    }

    pub fn advance_days(&self, days: u64) {
        let mut today = self.today.lock().unwrap();
        *today = *today + chrono::Days::new(days);
    }
}

impl Clock for FakeClock {
    fn today(&self) -> NaiveDate {
        *self.today.lock().unwrap()
    }
}

/// Free space that grows by the size of every folder removed through
/// `FakeFolders`
pub struct FakeDisk {
    free: Arc<AtomicU64>,
}

impl FakeDisk {
    pub fn new(free: Arc<AtomicU64>) -> Self {
        Self { free }
    }
}

impl DiskSpace for FakeDisk {
    fn free_bytes(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.free.load(Ordering::SeqCst))
    }
}

/// In-memory day folders with injectable delete failures
pub struct FakeFolders {
    folders: Mutex<Vec<DayFolder>>,
    failing: Mutex<HashMap<String, io::ErrorKind>>,
    free: Arc<AtomicU64>,
}

impl FakeFolders {
    pub fn new(folders: Vec<DayFolder>, free: Arc<AtomicU64>) -> Self {
        Self {
            folders: Mutex::new(folders),
            failing: Mutex::new(HashMap::new()),
            free,
        }
    }

    pub fn fail_delete(&self, name: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert(name.to_string(), io::ErrorKind::PermissionDenied);
    }

    pub fn remaining(&self) -> Vec<String> {
        self.folders
            .lock()
            .unwrap()
            .iter()
            .map(DayFolder::name)
            .collect()
    }
}

impl DayFolderStore for FakeFolders {
    fn list(&self) -> io::Result<Vec<DayFolder>> {
        let mut folders = self.folders.lock().unwrap().clone();
        folders.sort_by_key(|folder| folder.date);
        Ok(folders)
    }

    fn remove(&self, folder: &DayFolder) -> io::Result<()> {
        if let Some(kind) = self.failing.lock().unwrap().get(&folder.name()) {
            return Err(io::Error::new(*kind, "folder is busy"));
        }
        self.folders
            .lock()
            .unwrap()
            .retain(|existing| existing.path != folder.path);
        self.free.fetch_add(folder.size_bytes, Ordering::SeqCst);
        Ok(())
    }
}

/// Container muxer writing readable markers instead of real boxes
#[derive(Default)]
pub struct FakeMuxer {
    fragment_calls: AtomicUsize,
}

impl FakeMuxer {
    pub fn fragment_calls(&self) -> usize {
        self.fragment_calls.load(Ordering::SeqCst)
    }
}

impl ContainerMuxer for FakeMuxer {
    fn mpegts(&self, _codecs: &CodecParameters, packets: &[MediaPacket]) -> Result<Bytes> {
        Ok(Bytes::from(format!("ts:{}", packets.len())))
    }

    fn fragmented_mp4(
        &self,
        _codecs: &CodecParameters,
        packets: &[MediaPacket],
    ) -> Result<FragmentedMp4> {
        self.fragment_calls.fetch_add(1, Ordering::SeqCst);
        Ok(FragmentedMp4 {
            init: Bytes::from_static(b"init;"),
            media: Bytes::from(format!("media:{};", packets.len())),
        })
    }
}
