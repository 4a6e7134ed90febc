//! Integration tests for the compression pipeline, driven by fake media

mod common;

use common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use vidshrink::frame::FramePool;
use vidshrink::{
    CancelToken, CompressOptions, Compressor, ErrorKind, Output, ProgressEvent, Stage,
};

const MIB: u64 = 1024 * 1024;

struct Run {
    calls: Arc<Calls>,
    pool: FramePool,
    result: vidshrink::Result<Output>,
    events: Vec<ProgressEvent>,
}

fn run(behavior: FakeBehavior, asset_size: u64) -> Run {
    run_with(behavior, asset_size, CompressOptions::default(), &CancelToken::new())
}

fn run_with(
    behavior: FakeBehavior,
    asset_size: u64,
    options: CompressOptions,
    cancel: &CancelToken,
) -> Run {
    let backend = FakeBackend::new(behavior);
    let calls = Arc::clone(&backend.calls);
    let pool = backend.pool.clone();

    let asset = virtual_asset("clip.mov", asset_size);
    let compressor = Compressor::new(backend, options);
    let mut events = Vec::new();
    let result = compressor.compress_with_cancel(&asset, |e| events.push(e), cancel);

    Run {
        calls,
        pool,
        result,
        events,
    }
}

fn compressed(result: vidshrink::Result<Output>) -> vidshrink::CompressedAsset {
    match result {
        Ok(Output::Compressed(asset)) => asset,
        Ok(Output::Original(asset)) => panic!("expected compression, got original {:?}", asset),
        Err(e) => panic!("compression failed: {}", e),
    }
}

// ============================================================================
// Size policy
// ============================================================================

#[test]
fn test_small_asset_short_circuits() {
    let behavior = FakeBehavior::new(640, 480, 30.0, 30);
    let Run { result, events, calls, .. } = run(behavior, 4 * MIB);

    match result.unwrap() {
        Output::Original(asset) => {
            assert_eq!(asset.name(), "clip.mov");
            assert_eq!(asset.size(), 4 * MIB);
        }
        Output::Compressed(_) => panic!("small asset must not be compressed"),
    }
    assert_eq!(events, vec![ProgressEvent::new(Stage::Completed, 100)]);
    assert_eq!(calls.probes.load(Ordering::SeqCst), 0);
    assert_eq!(calls.sources_opened(), 0);
    assert_eq!(calls.encoders_created(), 0);
}

#[test]
fn test_asset_at_target_size_short_circuits() {
    let behavior = FakeBehavior::new(640, 480, 30.0, 30);
    let Run { result, events, .. } = run(behavior, 5 * MIB);
    assert!(!result.unwrap().is_compressed());
    assert_eq!(events.len(), 1);
}

#[test]
fn test_invalid_options_rejected_before_any_work() {
    let behavior = FakeBehavior::new(640, 480, 30.0, 30);
    let options = CompressOptions {
        bitrate: 0,
        ..Default::default()
    };
    let Run {
        result,
        events,
        calls,
        ..
    } = run_with(behavior, 50 * MIB, options, &CancelToken::new());

    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidInput);
    assert!(events.is_empty());
    assert_eq!(calls.sources_opened(), 0);
}

#[test]
fn test_encoder_options_ignored_when_no_compression_needed() {
    let behavior = FakeBehavior::new(640, 480, 30.0, 30);
    let options = CompressOptions {
        bitrate: 0,
        resolution: Some((641, 480)),
        ..Default::default()
    };
    let Run {
        result,
        events,
        calls,
        ..
    } = run_with(behavior, MIB, options, &CancelToken::new());

    assert!(!result.unwrap().is_compressed());
    assert_eq!(events, vec![ProgressEvent::new(Stage::Completed, 100)]);
    assert_eq!(calls.sources_opened(), 0);
}

#[test]
fn test_invalid_size_policy_rejected_for_small_asset() {
    let behavior = FakeBehavior::new(640, 480, 30.0, 30);
    let options = CompressOptions {
        target_size: 0,
        ..Default::default()
    };
    let Run { result, events, .. } = run_with(behavior, MIB, options, &CancelToken::new());
    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidInput);
    assert!(events.is_empty());
}

// ============================================================================
// Capability and decode failures
// ============================================================================

#[test]
fn test_unsupported_environment_never_opens_source() {
    let mut behavior = FakeBehavior::new(1920, 1080, 30.0, 300);
    behavior.supported = false;
    let Run { result, events, calls, .. } = run(behavior, 50 * MIB);

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedEnvironment);
    assert_eq!(err.stage(), Some(Stage::Initializing));
    assert!(err.to_string().contains("fake backend disabled"));
    assert_eq!(calls.sources_opened(), 0);
    assert_eq!(calls.encoders_created(), 0);
    assert_eq!(stages(&events), vec![Stage::Initializing]);
}

#[test]
fn test_unplayable_source_fails_in_preparing() {
    let mut behavior = FakeBehavior::new(640, 480, 30.0, 30);
    behavior.fail_open = true;
    let Run { result, events, calls, .. } = run(behavior, 50 * MIB);

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DecodeUnavailable);
    assert_eq!(err.stage(), Some(Stage::Preparing));
    assert!(err.to_string().starts_with("preparing failed: "));
    assert_eq!(calls.encoders_created(), 0);
    assert_eq!(stages(&events), vec![Stage::Initializing, Stage::Preparing]);
}

#[test]
fn test_empty_source_is_decode_failure() {
    let behavior = FakeBehavior::new(640, 480, 30.0, 0);
    let Run { result, .. } = run(behavior, 50 * MIB);

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DecodeUnavailable);
    assert_eq!(err.stage(), Some(Stage::Compressing));
}

// ============================================================================
// Full runs
// ============================================================================

#[test]
fn test_full_hd_scenario() {
    let behavior = FakeBehavior::new(1920, 1080, 30.0, 300);
    let Run { result, events, calls, pool } = run(behavior, 50 * MIB);
    let output = compressed(result);

    assert_eq!(output.name, "clip.mp4");
    assert_eq!(output.content_type, "video/mp4");
    assert!(output.size() <= 5 * MIB);

    let report = output.report;
    assert_eq!(report.estimated_frames, 300);
    assert_eq!(report.frames_decoded, 300);
    assert_eq!(report.samples_written, 300);
    assert_eq!(report.frames_dropped, 0);
    assert_eq!(report.original_size, 50 * MIB);
    assert_eq!(report.compressed_size, output.size());

    assert_progress_well_formed(&events);
    assert_eq!(
        stages(&events),
        vec![
            Stage::Initializing,
            Stage::Preparing,
            Stage::Compressing,
            Stage::Packaging,
            Stage::Completed
        ]
    );
    assert_eq!(events[0], ProgressEvent::new(Stage::Initializing, 0));
    assert_eq!(events[1], ProgressEvent::new(Stage::Preparing, 10));
    let compressing: Vec<u8> = events
        .iter()
        .filter(|e| e.stage == Stage::Compressing)
        .map(|e| e.percent)
        .collect();
    assert_eq!(compressing, (0..=80).collect::<Vec<u8>>());
    assert_eq!(
        &events[events.len() - 2..],
        &[
            ProgressEvent::new(Stage::Packaging, 90),
            ProgressEvent::new(Stage::Completed, 100)
        ]
    );

    assert_eq!(pool.outstanding(), 0);
    assert_eq!(calls.frames_yielded(), 300);
}

#[test]
fn test_output_round_trips_through_mp4_reader() {
    let behavior = FakeBehavior::new(1920, 1080, 30.0, 300);
    let Run { result, .. } = run(behavior, 50 * MIB);
    let output = compressed(result);

    let mut reader = read_mp4(output.data);
    assert_eq!(reader.tracks().len(), 1);
    let track = reader.tracks().get(&1).expect("track 1");
    assert_eq!(track.width(), 1920);
    assert_eq!(track.height(), 1080);
    assert_eq!(track.timescale(), 30);
    assert_eq!(track.sample_count(), 300);

    let first = reader.read_sample(1, 1).unwrap().unwrap();
    assert!(first.is_sync);
    assert_eq!(first.start_time, 0);
    assert_eq!(first.bytes.len(), 68);
    assert_eq!(&first.bytes[..5], &[0, 0, 0, 64, 0x65]);

    let second = reader.read_sample(1, 2).unwrap().unwrap();
    assert!(!second.is_sync);
    assert_eq!(second.start_time, 1);
    assert_eq!(second.duration, 1);

    // Keyframe every 2 seconds at 30 fps
    let keyframe = reader.read_sample(1, 61).unwrap().unwrap();
    assert!(keyframe.is_sync);
}

#[test]
fn test_delayed_encoder_output_is_flushed() {
    let mut behavior = FakeBehavior::new(640, 480, 25.0, 50);
    behavior.latency = 4;
    let Run { result, pool, .. } = run(behavior, 50 * MIB);
    let output = compressed(result);

    assert_eq!(output.report.samples_written, 50);
    assert_eq!(output.report.frames_dropped, 0);
    assert_eq!(read_mp4(output.data).sample_count(1).unwrap(), 50);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_dropped_frames_are_reported() {
    let mut behavior = FakeBehavior::new(640, 480, 30.0, 100);
    behavior.drop_every = Some(10);
    let Run { result, .. } = run(behavior, 50 * MIB);
    let output = compressed(result);

    assert_eq!(output.report.frames_decoded, 100);
    assert_eq!(output.report.samples_written, 90);
    assert_eq!(output.report.frames_dropped, 10);
    assert_eq!(read_mp4(output.data).sample_count(1).unwrap(), 90);
}

#[test]
fn test_frame_estimate_divergence_is_tolerated() {
    // Container claims 5 seconds but 300 frames decode
    let mut behavior = FakeBehavior::new(1280, 720, 30.0, 300);
    behavior.info.duration_secs = 5.0;
    let Run { result, events, .. } = run(behavior, 50 * MIB);
    let output = compressed(result);

    assert_eq!(output.report.estimated_frames, 150);
    assert_eq!(output.report.samples_written, 300);
    assert_progress_well_formed(&events);

    let max_compressing = events
        .iter()
        .filter(|e| e.stage == Stage::Compressing)
        .map(|e| e.percent)
        .max();
    assert_eq!(max_compressing, Some(80));
}

#[test]
fn test_resolution_override_sets_track_size() {
    let behavior = FakeBehavior::new(1920, 1080, 30.0, 30);
    let options = CompressOptions {
        resolution: Some((1280, 720)),
        ..Default::default()
    };
    let Run { result, .. } = run_with(behavior, 50 * MIB, options, &CancelToken::new());
    let output = compressed(result);

    let reader = read_mp4(output.data);
    let track = reader.tracks().get(&1).expect("track 1");
    assert_eq!((track.width(), track.height()), (1280, 720));
}

// ============================================================================
// Mid-stream failures
// ============================================================================

#[test]
fn test_encode_failure_aborts_without_output() {
    let mut behavior = FakeBehavior::new(640, 480, 30.0, 60);
    behavior.fail_encode_at = Some(5);
    let Run { result, events, calls, pool } = run(behavior, 50 * MIB);

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EncodeFailure);
    assert_eq!(err.stage(), Some(Stage::Compressing));
    assert!(err.to_string().contains("injected failure at frame 5"));

    assert_eq!(calls.frames_yielded(), 6);
    assert_eq!(pool.outstanding(), 0);
    assert!(events.iter().all(|e| e.stage < Stage::Packaging));
}

#[test]
fn test_cancellation_releases_frames() {
    let cancel = CancelToken::new();
    let mut behavior = FakeBehavior::new(640, 480, 30.0, 100);
    behavior.cancel_after = Some((10, cancel.clone()));
    let Run { result, events, calls, pool } =
        run_with(behavior, 50 * MIB, CompressOptions::default(), &cancel);

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.stage(), Some(Stage::Compressing));
    assert_eq!(calls.frames_yielded(), 10);
    assert_eq!(pool.outstanding(), 0);
    assert!(events.iter().all(|e| e.stage <= Stage::Compressing));
}

#[test]
fn test_cancelled_before_start() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let behavior = FakeBehavior::new(640, 480, 30.0, 100);
    let Run { result, calls, .. } =
        run_with(behavior, 50 * MIB, CompressOptions::default(), &cancel);

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    assert_eq!(calls.sources_opened(), 0);
}
