mod support;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use pipeline_nvr::application::services::ENCODER_LOG;
use pipeline_nvr::{
    ChannelKey, ChannelRegistry, ExitReason, FileKeyStore, NoopMetrics, RecorderSettings,
    RecordingLayout, RecordingService, RecordingStatus, RegistrySettings,
};
use support::{eventually, FakeLauncher};

const WAIT: Duration = Duration::from_secs(3);

struct Harness {
    _dir: TempDir,
    key: ChannelKey,
    launcher: Arc<FakeLauncher>,
    keys: Arc<FileKeyStore>,
    recorder: Arc<RecordingService>,
}

fn harness(
    launcher: FakeLauncher,
    on_recording: bool,
    configure: impl FnOnce(&mut RecorderSettings),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(ChannelRegistry::new(RegistrySettings::default()).unwrap());
    registry
        .add_stream(
            "lobby",
            support::stream("Lobby", "rtsp://10.0.0.5/live", false, on_recording),
        )
        .unwrap();

    let mut settings = RecorderSettings::new(
        RecordingLayout::new(dir.path().join("recordings")),
        "/opt/encoder/ffmpeg",
    );
    settings.restart_delay = Duration::from_millis(20);
    settings.liveness_poll = Duration::from_millis(50);
    settings.liveness_timeout = Duration::from_secs(5);
    settings.drain_timeout = Duration::from_millis(200);
    configure(&mut settings);

    let launcher = Arc::new(launcher);
    let keys = Arc::new(FileKeyStore::new(
        dir.path().join("keys"),
        "/stream/{stream}/channel/{channel}/recording/key",
    ));
    let recorder = Arc::new(RecordingService::new(
        registry,
        launcher.clone(),
        keys.clone(),
        Arc::new(NoopMetrics),
        settings,
    ));

    Harness {
        _dir: dir,
        key: ChannelKey::new("lobby", "0"),
        launcher,
        keys,
        recorder,
    }
}

#[tokio::test]
async fn test_start_then_stop_recording() {
    let h = harness(FakeLauncher::chatty(), true, |_| {});

    h.recorder.start_recording(&h.key).unwrap();
    assert_eq!(h.recorder.recording_status(&h.key), Some(RecordingStatus::On));
    let recording = h.recorder.recording(&h.key).unwrap();
    let log_path = recording.directory().join(ENCODER_LOG);

    assert!(
        eventually(WAIT, || {
            fs::read_to_string(&log_path)
                .map(|log| log.contains("frame="))
                .unwrap_or(false)
        })
        .await
    );

    assert!(h.recorder.stop_recording(&h.key).await);
    assert!(recording.is_done());
    assert_eq!(recording.exit_reason(), Some(ExitReason::UserStopped));
    assert!(recording.ended_at().is_some());
    assert_eq!(h.recorder.recording_status(&h.key), None);

    // A second stop finds nothing to do
    assert!(!h.recorder.stop_recording(&h.key).await);
    assert_eq!(h.launcher.spawn_count(), 1);

    let log = fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("=== Recording started at"));
    assert!(log.contains("reason=user_stopped"));
}

#[tokio::test]
async fn test_concurrent_stops_report_one_winner() {
    let h = harness(FakeLauncher::chatty(), true, |_| {});

    h.recorder.start_recording(&h.key).unwrap();
    let recording = h.recorder.recording(&h.key).unwrap();

    let (first, second) = tokio::join!(
        h.recorder.stop_recording(&h.key),
        h.recorder.stop_recording(&h.key)
    );

    assert!(first ^ second, "exactly one stop should win: {} {}", first, second);
    assert!(recording.is_done());
    assert_eq!(recording.exit_reason(), Some(ExitReason::UserStopped));
    assert_eq!(h.launcher.encoder(0).quit_count(), 1);
    assert_eq!(h.recorder.recording_status(&h.key), None);

    // The finished session does not block a fresh one
    h.recorder.start_recording(&h.key).unwrap();
    assert_eq!(h.launcher.spawn_count(), 2);
    h.recorder.stop_all().await;
}

#[tokio::test]
async fn test_second_start_is_a_no_op() {
    let h = harness(FakeLauncher::chatty(), true, |_| {});

    h.recorder.start_recording(&h.key).unwrap();
    h.recorder.start_recording(&h.key).unwrap();

    assert_eq!(h.launcher.spawn_count(), 1);
    assert_eq!(h.recorder.active_recordings().len(), 1);
    h.recorder.stop_all().await;
}

#[tokio::test]
async fn test_encoder_command_uses_channel_and_key_info() {
    let h = harness(FakeLauncher::chatty(), true, |_| {});

    h.recorder.start_recording(&h.key).unwrap();
    let command = h.launcher.encoder(0).command.clone();
    let args = command.args();

    assert_eq!(command.input_url(), "rtsp://10.0.0.5/live");
    assert_eq!(args.first().map(String::as_str), Some("-rtsp_transport"));
    let key_info = h.keys.key_info_path(&h.key).display().to_string();
    assert!(args.windows(2).any(|pair| pair[0] == "-hls_key_info_file" && pair[1] == key_info));
    assert!(command.playlist().starts_with(h.recorder.settings().layout.root()));
    h.recorder.stop_all().await;
}

#[tokio::test]
async fn test_input_template_overrides_upstream_url() {
    let h = harness(FakeLauncher::chatty(), true, |settings| {
        settings.input_template = Some("rtsp://127.0.0.1:5541/{stream}/{channel}".to_string());
    });

    h.recorder.start_recording(&h.key).unwrap();
    assert_eq!(
        h.launcher.encoder(0).command.input_url(),
        "rtsp://127.0.0.1:5541/lobby/0"
    );
    h.recorder.stop_all().await;
}

#[tokio::test]
async fn test_process_error_restarts_recording() {
    let h = harness(FakeLauncher::chatty(), true, |_| {});

    h.recorder.start_recording(&h.key).unwrap();
    let first = h.recorder.recording(&h.key).unwrap();
    h.launcher.encoder(0).exit(1);

    assert!(eventually(WAIT, || h.launcher.spawn_count() == 2).await);
    assert_eq!(first.exit_reason(), Some(ExitReason::ProcessError));
    assert!(eventually(WAIT, || h.recorder.recording_status(&h.key) == Some(RecordingStatus::On)).await);
    let second = h.recorder.recording(&h.key).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    h.recorder.stop_all().await;
}

#[tokio::test]
async fn test_clean_exit_is_a_scheduled_restart() {
    let h = harness(FakeLauncher::chatty(), true, |_| {});

    h.recorder.start_recording(&h.key).unwrap();
    let first = h.recorder.recording(&h.key).unwrap();
    let key_info = fs::read_to_string(h.keys.key_info_path(&h.key)).unwrap();
    h.launcher.encoder(0).exit(0);

    assert!(eventually(WAIT, || h.launcher.spawn_count() == 2).await);
    assert_eq!(first.exit_reason(), Some(ExitReason::ScheduledRestart));

    // The channel keeps its key across sessions
    assert_eq!(fs::read_to_string(h.keys.key_info_path(&h.key)).unwrap(), key_info);
    h.recorder.stop_all().await;
}

#[tokio::test]
async fn test_silent_encoder_is_killed_and_restarted() {
    let h = harness(FakeLauncher::silent(), true, |settings| {
        settings.liveness_timeout = Duration::from_millis(200);
    });

    h.recorder.start_recording(&h.key).unwrap();
    let first = h.recorder.recording(&h.key).unwrap();

    assert!(eventually(WAIT, || first.is_done()).await);
    assert_eq!(first.exit_reason(), Some(ExitReason::Timeout));
    assert!(eventually(WAIT, || h.launcher.spawn_count() >= 2).await);

    let log = fs::read_to_string(first.directory().join(ENCODER_LOG)).unwrap();
    assert!(log.contains("reason=timeout"));
}

#[tokio::test]
async fn test_no_restart_when_recording_disabled() {
    let h = harness(FakeLauncher::chatty(), false, |_| {});

    h.recorder.start_recording(&h.key).unwrap();
    let first = h.recorder.recording(&h.key).unwrap();
    h.launcher.encoder(0).exit(1);

    assert!(eventually(WAIT, || h.recorder.recording_status(&h.key).is_none()).await);
    assert_eq!(first.exit_reason(), Some(ExitReason::ProcessError));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.launcher.spawn_count(), 1);
}

#[tokio::test]
async fn test_spawn_failure_leaves_no_entry() {
    let h = harness(FakeLauncher::chatty(), true, |_| {});
    h.launcher.refuse_spawns(true);

    assert!(h.recorder.start_recording(&h.key).is_err());
    assert_eq!(h.recorder.recording_status(&h.key), None);
    assert!(h.recorder.active_recordings().is_empty());

    h.launcher.refuse_spawns(false);
    h.recorder.start_recording(&h.key).unwrap();
    assert_eq!(h.recorder.recording_status(&h.key), Some(RecordingStatus::On));
    h.recorder.stop_all().await;
}

#[tokio::test]
async fn test_restart_all_rolls_sessions_over() {
    let h = harness(FakeLauncher::chatty(), true, |_| {});

    h.recorder.start_recording(&h.key).unwrap();
    let first = h.recorder.recording(&h.key).unwrap();

    assert_eq!(h.recorder.restart_all().await, 1);
    assert_eq!(first.exit_reason(), Some(ExitReason::UserStopped));
    assert_eq!(h.launcher.spawn_count(), 2);
    assert_eq!(h.recorder.recording_status(&h.key), Some(RecordingStatus::On));

    assert_eq!(h.recorder.stop_all().await, 1);
    assert!(h.recorder.active_recordings().is_empty());
}
