use std::time::Duration;

use pipeline_nvr::domain::ports::DialRequest;
use pipeline_nvr::domain::value_objects::VideoCodec;
use pipeline_nvr::{DomainError, PipelineBuilder, PrometheusReporter};

fn dial_request(url: &str) -> DialRequest {
    DialRequest {
        url: url.to_string(),
        connect_timeout: Duration::from_secs(3),
        read_timeout: Duration::from_secs(20),
        audio: false,
        debug: false,
        insecure_skip_verify: false,
    }
}

/// Parse `launch` only when every element it names is installed
fn parses_if_available(launch: &str, elements: &[&str]) {
    gstreamer::init().unwrap();
    if let Some(missing) = elements
        .iter()
        .find(|name| gstreamer::ElementFactory::find(name).is_none())
    {
        eprintln!("Skipping test: element {} not installed", missing);
        return;
    }

    let result = gstreamer::parse::launch(launch);
    assert!(
        result.is_ok(),
        "Pipeline should parse successfully: {:?}",
        result.err()
    );
}

#[test]
fn test_gstreamer_init() {
    assert!(gstreamer::init().is_ok());
}

#[test]
fn test_build_rtsp_source_pipeline() {
    let mut request = dial_request("rtsp://10.0.0.5:554/live");
    request.audio = true;
    let launch = PipelineBuilder::source_pipeline(&request).unwrap();

    assert!(launch.contains("rtspsrc name=upstream location=\"rtsp://10.0.0.5:554/live\""));
    assert!(launch.contains("protocols=tcp"));
    assert!(launch.contains("tcp-timeout=3000000"));
    assert!(launch.contains("appsink name=video"));
    assert!(launch.contains("appsink name=audio"));
    assert!(!launch.contains("tls-validation-flags"));
}

#[test]
fn test_build_rtmp_source_pipeline() {
    let launch = PipelineBuilder::source_pipeline(&dial_request("rtmp://10.0.0.7/app/key")).unwrap();

    assert!(launch.contains("rtmpsrc location=\"rtmp://10.0.0.7/app/key\""));
    assert!(launch.contains("flvdemux name=demux"));
    assert!(launch.contains("h264parse"));
    assert!(!launch.contains("aacparse"));
}

#[test]
fn test_unsupported_scheme_is_rejected() {
    let result = PipelineBuilder::source_pipeline(&dial_request("http://10.0.0.5/live.m3u8"));
    assert!(matches!(result, Err(DomainError::InvalidSourceUrl(_))));
}

#[test]
fn test_source_pipeline_parsing() {
    let launch = PipelineBuilder::source_pipeline(&dial_request("rtsp://127.0.0.1:8554/cam1")).unwrap();
    parses_if_available(&launch, &["rtspsrc", "parsebin", "appsink"]);
}

#[test]
fn test_muxer_pipeline_parsing() {
    parses_if_available(
        &PipelineBuilder::mpegts_pipeline(VideoCodec::H264),
        &["appsrc", "h264parse", "mpegtsmux", "appsink"],
    );
    parses_if_available(
        &PipelineBuilder::fragmented_mp4_pipeline(VideoCodec::H265, 60_000),
        &["appsrc", "h265parse", "mp4mux", "appsink"],
    );
}

#[test]
fn test_metrics_initialization() {
    let result = PrometheusReporter::init_metrics();
    // First call should succeed, subsequent calls might fail (already registered)
    assert!(result.is_ok() || result.is_err());
}
