mod support;

use std::sync::Arc;
use std::time::Duration;

use pipeline_nvr::domain::ports::UpstreamEvent;
use pipeline_nvr::domain::value_objects::IngestState;
use pipeline_nvr::{
    ChannelKey, ChannelRegistry, ChannelStatus, ClientMode, IngestService, IngestSettings,
    NoopMetrics, RegistrySettings,
};
use support::{eventually, frame, FakeSource};

const WAIT: Duration = Duration::from_secs(2);

fn service(source: Arc<FakeSource>, on_demand: bool, settings: IngestSettings) -> Arc<IngestService> {
    let registry = Arc::new(ChannelRegistry::new(RegistrySettings::default()).unwrap());
    registry
        .add_stream(
            "lobby",
            support::stream("Lobby", "rtsp://10.0.0.5/live", on_demand, false),
        )
        .unwrap();
    Arc::new(IngestService::new(
        registry,
        source,
        Arc::new(NoopMetrics),
        settings,
    ))
}

fn key() -> ChannelKey {
    ChannelKey::new("lobby", "0")
}

#[tokio::test]
async fn test_concurrent_ensure_running_spawns_one_session() {
    let source = Arc::new(FakeSource::new());
    let ingest = service(source.clone(), false, IngestSettings::default());

    let spawned = (0..16)
        .filter(|_| ingest.ensure_running(&key()).unwrap())
        .count();
    assert_eq!(spawned, 1);

    assert!(eventually(WAIT, || source.dial_count() == 1).await);
    assert!(eventually(WAIT, || ingest.registry().status(&key()).unwrap() == ChannelStatus::Online).await);
    assert_eq!(source.open_sessions(), 1);
    assert!(!ingest.ensure_running(&key()).unwrap());

    ingest.stop(&key()).unwrap();
    assert!(eventually(WAIT, || !ingest.registry().is_running(&key())).await);
}

#[tokio::test]
async fn test_run_all_starts_always_on_channels_only() {
    let source = Arc::new(FakeSource::new());
    let ingest = service(source.clone(), false, IngestSettings::default());
    ingest
        .registry()
        .add_stream(
            "garage",
            support::stream("Garage", "rtsp://10.0.0.6/live", true, false),
        )
        .unwrap();

    assert_eq!(ingest.run_all(), 1);
    assert!(ingest.registry().is_running(&key()));
    assert!(!ingest.registry().is_running(&ChannelKey::new("garage", "0")));
    ingest.stop_all();
}

#[tokio::test]
async fn test_clients_and_hls_receive_packets() {
    let source = Arc::new(FakeSource::new());
    let ingest = service(source.clone(), false, IngestSettings::default());

    let mut subscription = ingest.attach_client(&key(), ClientMode::FragmentStream).unwrap();
    assert!(eventually(WAIT, || source.upstream(0).is_some()).await);
    let codecs = ingest.wait_codecs(&key()).await.unwrap();
    assert_eq!(codecs, support::codecs());

    let upstream = source.upstream(0).unwrap();
    // Seven keyframes close six segments
    for index in 0..(25 * 7) {
        assert!(upstream.send(UpstreamEvent::Packet(frame(index, 25))).await);
    }

    let first = subscription.packets.recv().await.unwrap();
    assert!(first.is_video_keyframe());
    assert_eq!(first.time, Duration::ZERO);

    assert!(eventually(WAIT, || ingest.registry().hls_playlist(&key()).is_ok()).await);
    let playlist = ingest.registry().hls_playlist(&key()).unwrap();
    assert!(playlist.segment_count >= 5);
    assert!(playlist.text.contains("#EXTINF:1.000"));

    assert!(ingest.detach_client(&key(), &subscription.id).unwrap());
    ingest.stop(&key()).unwrap();
}

#[tokio::test]
async fn test_packets_before_codecs_are_dropped() {
    let source = Arc::new(FakeSource::new().without_initial_codecs());
    let ingest = service(source.clone(), false, IngestSettings::default());

    let mut subscription = ingest.attach_client(&key(), ClientMode::WebRtc).unwrap();
    assert!(eventually(WAIT, || source.upstream(0).is_some()).await);
    let upstream = source.upstream(0).unwrap();

    upstream.send(UpstreamEvent::Packet(frame(0, 25))).await;
    upstream.send(UpstreamEvent::Packet(frame(1, 25))).await;
    upstream
        .send(UpstreamEvent::CodecReady(support::codecs()))
        .await;
    upstream.send(UpstreamEvent::Packet(frame(25, 25))).await;

    let first = subscription.packets.recv().await.unwrap();
    assert_eq!(first.time, Duration::from_millis(1000));
    assert!(ingest.registry().codecs(&key()).unwrap().is_some());
    ingest.stop(&key()).unwrap();
}

#[tokio::test]
async fn test_stop_is_terminal() {
    let source = Arc::new(FakeSource::new());
    let ingest = service(source.clone(), false, IngestSettings::default());

    ingest.ensure_running(&key()).unwrap();
    assert!(eventually(WAIT, || source.open_sessions() == 1).await);

    ingest.stop(&key()).unwrap();
    assert!(eventually(WAIT, || !ingest.registry().is_running(&key())).await);
    assert_eq!(source.open_sessions(), 0);
    assert_eq!(ingest.registry().status(&key()).unwrap(), ChannelStatus::Offline);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.dial_count(), 1);
}

#[tokio::test]
async fn test_restart_and_codec_change_redial() {
    let source = Arc::new(FakeSource::new());
    let ingest = service(source.clone(), false, IngestSettings::default());

    ingest.ensure_running(&key()).unwrap();
    assert!(eventually(WAIT, || source.dial_count() == 1).await);

    ingest.restart(&key()).unwrap();
    assert!(eventually(WAIT, || source.dial_count() == 2).await);

    let upstream = source.upstream(1).unwrap();
    upstream
        .send(UpstreamEvent::CodecUpdated(support::codecs()))
        .await;
    assert!(eventually(WAIT, || source.dial_count() == 3).await);
    assert_eq!(source.open_sessions(), 1);
    ingest.stop(&key()).unwrap();
}

#[tokio::test]
async fn test_delete_stream_ends_loop() {
    let source = Arc::new(FakeSource::new());
    let ingest = service(source.clone(), false, IngestSettings::default());

    ingest.ensure_running(&key()).unwrap();
    assert!(eventually(WAIT, || source.open_sessions() == 1).await);

    ingest.delete_stream("lobby").await.unwrap();
    assert!(eventually(WAIT, || source.open_sessions() == 0).await);
    assert!(ingest.registry().status(&key()).is_err());
}

#[tokio::test]
async fn test_dial_failure_retries_after_backoff() {
    tokio::time::pause();
    let source = Arc::new(FakeSource::new());
    source.fail_next(1);
    let ingest = service(source.clone(), false, IngestSettings::default());

    ingest.ensure_running(&key()).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(source.dial_count(), 1);
    assert!(matches!(
        ingest.registry().ingest_state(&key()).unwrap(),
        IngestState::Backoff { attempt: 1 }
    ));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(source.dial_count(), 2);
    assert_eq!(ingest.registry().status(&key()).unwrap(), ChannelStatus::Online);
    ingest.stop(&key()).unwrap();
}

#[tokio::test]
async fn test_status_listing_reports_retries_and_uptime() {
    tokio::time::pause();
    let source = Arc::new(FakeSource::new());
    source.fail_next(2);
    let settings = IngestSettings {
        retry_delay: Duration::from_millis(500),
        read_timeout: Duration::from_secs(120),
        no_video_timeout: Duration::from_secs(120),
        ..IngestSettings::default()
    };
    let ingest = service(source.clone(), false, settings);

    ingest.ensure_running(&key()).unwrap();
    // Two refused dials half a second apart, then a session
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(source.dial_count(), 3);
    tokio::time::sleep(Duration::from_secs(30)).await;

    let summary = ingest.registry().streams_status();
    let status = &summary[0].channels[0].ingest;
    assert_eq!(status.state, IngestState::Streaming);
    assert_eq!(status.failures, 2);
    assert!(status.last_error.as_deref().unwrap().contains("connection refused"));
    assert!(matches!(status.uptime_secs, Some(30..=31)));

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json[0]["channels"][0]["ingest"]["state"], "streaming");
    ingest.stop(&key()).unwrap();
}

#[tokio::test]
async fn test_on_demand_channel_without_viewers_stops() {
    tokio::time::pause();
    let source = Arc::new(FakeSource::new());
    let settings = IngestSettings {
        no_video_timeout: Duration::from_secs(120),
        ..IngestSettings::default()
    };
    let ingest = service(source.clone(), true, settings);

    ingest.ensure_running(&key()).unwrap();
    tokio::time::sleep(Duration::from_secs(19)).await;
    assert!(ingest.registry().is_running(&key()));
    assert_eq!(source.open_sessions(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!ingest.registry().is_running(&key()));
    assert_eq!(source.open_sessions(), 0);
}

#[tokio::test]
async fn test_detached_viewer_keeps_grace_period() {
    tokio::time::pause();
    let source = Arc::new(FakeSource::new());
    let settings = IngestSettings {
        no_video_timeout: Duration::from_secs(120),
        ..IngestSettings::default()
    };
    let ingest = service(source.clone(), true, settings);

    let subscription = ingest.attach_client(&key(), ClientMode::FragmentStream).unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(ingest.registry().is_running(&key()));

    ingest.detach_client(&key(), &subscription.id).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(ingest.registry().is_running(&key()));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!ingest.registry().is_running(&key()));
}

#[tokio::test]
async fn test_silent_upstream_is_redialed() {
    tokio::time::pause();
    let source = Arc::new(FakeSource::new());
    let ingest = service(source.clone(), false, IngestSettings::default());

    ingest.ensure_running(&key()).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.dial_count(), 1);

    // 20s without a keyframe, then the 2s retry delay
    tokio::time::sleep(Duration::from_secs(22)).await;
    assert_eq!(source.dial_count(), 2);
    ingest.stop(&key()).unwrap();
}
