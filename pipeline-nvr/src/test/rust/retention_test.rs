mod support;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::watch;

use pipeline_nvr::domain::value_objects::gb_to_bytes;
use pipeline_nvr::{
    ChannelKey, ChannelRegistry, DayFolder, FileKeyStore, FsDayFolderStore, MaintenanceService,
    NoopMetrics, RecorderSettings, RecordingLayout, RecordingService, RecordingStatus,
    RegistrySettings, RetentionPolicy, RetentionSweeper, SweepRule,
};
use support::{eventually, FakeClock, FakeDisk, FakeFolders, FakeLauncher};

const GB: u64 = 1024 * 1024 * 1024;
const PLENTY: u64 = 1000 * GB;

fn date(text: &str) -> NaiveDate {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap()
}

fn folder(name: &str, size_bytes: u64) -> DayFolder {
    DayFolder {
        path: PathBuf::from("/recordings").join(name),
        date: date(name),
        size_bytes,
    }
}

fn policy(days: Option<u32>, capacity_gb: Option<f64>, floor_gb: f64) -> RetentionPolicy {
    RetentionPolicy::new(Duration::from_secs(3600), days, capacity_gb, floor_gb).unwrap()
}

fn sweeper(
    folders: Vec<DayFolder>,
    free: u64,
    policy: RetentionPolicy,
) -> (RetentionSweeper, Arc<FakeFolders>) {
    let free = Arc::new(AtomicU64::new(free));
    let store = Arc::new(FakeFolders::new(folders, Arc::clone(&free)));
    let sweeper = RetentionSweeper::new(
        store.clone(),
        Arc::new(FakeDisk::new(free)),
        "/recordings",
        policy,
        Arc::new(NoopMetrics),
    );
    (sweeper, store)
}

#[test]
fn test_capacity_deletes_oldest_until_under_limit() {
    let (sweeper, store) = sweeper(
        vec![
            folder("2025-01-01", 6 * GB),
            folder("2025-01-02", 5 * GB),
            folder("2025-01-03", 2 * GB),
        ],
        PLENTY,
        policy(None, Some(10.0), 5.0),
    );

    let report = sweeper.sweep(date("2025-01-03")).unwrap();

    assert_eq!(report.deleted_by(SweepRule::Capacity), vec!["2025-01-01"]);
    assert_eq!(report.bytes_freed(), 6 * GB);
    assert_eq!(store.remaining(), vec!["2025-01-02", "2025-01-03"]);
    assert!(report.floor_satisfied);
}

#[test]
fn test_capacity_never_deletes_newest_folder() {
    let (sweeper, store) = sweeper(
        vec![folder("2025-01-01", 3 * GB), folder("2025-01-02", 4 * GB)],
        PLENTY,
        policy(None, Some(1.0), 0.0),
    );

    let report = sweeper.sweep(date("2025-01-02")).unwrap();

    assert_eq!(report.deleted_names(), vec!["2025-01-01"]);
    assert_eq!(store.remaining(), vec!["2025-01-02"]);
}

#[test]
fn test_age_limit_removes_folders_through_cutoff_day() {
    let (sweeper, store) = sweeper(
        vec![
            folder("2024-12-30", GB),
            folder("2024-12-31", GB),
            folder("2025-01-01", GB),
            folder("2025-01-02", GB),
            folder("2025-01-31", GB),
        ],
        PLENTY,
        policy(Some(30), None, 0.0),
    );

    // 30 days before 2025-01-31 is 2025-01-01, whose midnight has passed
    let report = sweeper.sweep(date("2025-01-31")).unwrap();

    assert_eq!(
        report.deleted_by(SweepRule::Age),
        vec!["2024-12-30", "2024-12-31", "2025-01-01"]
    );
    assert_eq!(store.remaining(), vec!["2025-01-02", "2025-01-31"]);
}

#[test]
fn test_free_space_floor_deletes_until_satisfied() {
    let (sweeper, store) = sweeper(
        vec![
            folder("2025-01-01", 3 * GB),
            folder("2025-01-02", 3 * GB),
            folder("2025-01-03", 3 * GB),
        ],
        GB,
        policy(None, None, 5.0),
    );

    let report = sweeper.sweep(date("2025-01-03")).unwrap();

    assert_eq!(report.deleted_by(SweepRule::FreeSpace), vec!["2025-01-01", "2025-01-02"]);
    assert!(report.floor_satisfied);
    assert_eq!(store.remaining(), vec!["2025-01-03"]);
}

#[test]
fn test_free_space_floor_gives_up_when_nothing_is_left() {
    let (sweeper, store) = sweeper(
        vec![folder("2025-01-01", GB), folder("2025-01-02", GB)],
        0,
        policy(None, None, 5.0),
    );

    let report = sweeper.sweep(date("2025-01-02")).unwrap();

    assert_eq!(report.deleted.len(), 2);
    assert!(!report.floor_satisfied);
    assert!(store.remaining().is_empty());
}

#[test]
fn test_free_space_floor_skips_failed_folders_and_caps_failures() {
    let folders: Vec<DayFolder> = (1..=6)
        .map(|day| folder(&format!("2025-01-0{}", day), GB))
        .collect();
    let (sweeper, store) = sweeper(folders, 0, policy(None, None, 50.0));
    store.fail_delete("2025-01-01");
    store.fail_delete("2025-01-03");
    store.fail_delete("2025-01-05");

    let report = sweeper.sweep(date("2025-01-06")).unwrap();

    assert_eq!(report.failures, 3);
    assert_eq!(report.deleted_names(), vec!["2025-01-02", "2025-01-04"]);
    assert!(!report.floor_satisfied);
    assert_eq!(store.remaining(), vec!["2025-01-01", "2025-01-03", "2025-01-05", "2025-01-06"]);
}

fn write_segment(root: &Path, day: &str, bytes: usize) {
    let dir = root.join(day).join("lobby").join("0");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("Lobby_20250101_000000.ts"), vec![0u8; bytes]).unwrap();
}

#[test]
fn test_sweep_over_recording_tree() {
    let dir = tempfile::tempdir().unwrap();
    write_segment(dir.path(), "2025-01-01", 2000);
    write_segment(dir.path(), "2025-01-02", 1000);
    write_segment(dir.path(), "2025-01-03", 500);
    fs::create_dir_all(dir.path().join("exports")).unwrap();

    let capacity_gb = 1600.0 / GB as f64;
    assert!(gb_to_bytes(capacity_gb) >= 1500);
    let sweeper = RetentionSweeper::new(
        Arc::new(FsDayFolderStore::new(dir.path())),
        Arc::new(FakeDisk::new(Arc::new(AtomicU64::new(PLENTY)))),
        dir.path(),
        policy(None, Some(capacity_gb), 0.0),
        Arc::new(NoopMetrics),
    );

    let report = sweeper.sweep(date("2025-01-03")).unwrap();

    assert_eq!(report.deleted_names(), vec!["2025-01-01"]);
    assert_eq!(report.bytes_freed(), 2000);
    assert!(!dir.path().join("2025-01-01").exists());
    assert!(dir.path().join("2025-01-02").exists());
    assert!(dir.path().join("exports").exists());
}

fn recorder(dir: &Path, launcher: Arc<FakeLauncher>, on_recording: bool) -> Arc<RecordingService> {
    let registry = Arc::new(ChannelRegistry::new(RegistrySettings::default()).unwrap());
    registry
        .add_stream(
            "lobby",
            support::stream("Lobby", "rtsp://10.0.0.5/live", false, on_recording),
        )
        .unwrap();
    let mut settings = RecorderSettings::new(RecordingLayout::new(dir.join("recordings")), "ffmpeg");
    settings.restart_delay = Duration::from_millis(20);
    settings.drain_timeout = Duration::from_millis(200);
    Arc::new(RecordingService::new(
        registry,
        launcher,
        Arc::new(FileKeyStore::new(dir.join("keys"), "/key/{stream}/{channel}")),
        Arc::new(NoopMetrics),
        settings,
    ))
}

#[tokio::test]
async fn test_maintenance_loop_sweeps_after_first_interval() {
    let dir = tempfile::tempdir().unwrap();
    let free = Arc::new(AtomicU64::new(0));
    let store = Arc::new(FakeFolders::new(
        vec![folder("2025-01-01", 10 * GB), folder("2025-01-02", GB)],
        Arc::clone(&free),
    ));
    let interval = Duration::from_millis(300);
    let sweeper = RetentionSweeper::new(
        store.clone(),
        Arc::new(FakeDisk::new(free)),
        "/recordings",
        RetentionPolicy::new(interval, None, None, 5.0).unwrap(),
        Arc::new(NoopMetrics),
    );
    let maintenance = MaintenanceService::new(
        sweeper,
        recorder(dir.path(), Arc::new(FakeLauncher::chatty()), false),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let started = tokio::time::Instant::now();
    let handle = tokio::spawn(async move { maintenance.run(shutdown_rx).await });

    // Nothing is deleted at boot
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.remaining().len(), 2);

    assert!(eventually(Duration::from_secs(2), || store.remaining() == vec!["2025-01-02"]).await);
    assert!(started.elapsed() >= interval);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_day_change_restarts_recordings_once() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(FakeLauncher::chatty());
    let recorder = recorder(dir.path(), launcher.clone(), true);
    let key = ChannelKey::new("lobby", "0");
    recorder.start_recording(&key).unwrap();

    let (sweeper, _store) = sweeper(Vec::new(), PLENTY, policy(None, None, 0.0));
    let clock = Arc::new(FakeClock::new(date("2025-09-17")));
    let maintenance = MaintenanceService::new(sweeper, recorder.clone())
        .with_day_check_interval(Duration::from_millis(20))
        .with_clock(clock.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { maintenance.run(shutdown_rx).await });

    // Same-day checks leave the encoder alone
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(launcher.spawn_count(), 1);

    clock.advance_days(1);
    assert!(eventually(Duration::from_secs(2), || launcher.spawn_count() == 2).await);
    assert_eq!(launcher.encoder(0).quit_count(), 1);

    // Later checks on the new day do not roll over again
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(launcher.spawn_count(), 2);
    assert_eq!(recorder.recording_status(&key), Some(RecordingStatus::On));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    recorder.stop_all().await;
}
