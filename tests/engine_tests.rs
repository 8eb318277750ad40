// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the engine over both simulated backends

use camera_engine::backends::camera::legacy::SimulatedLegacyApi;
use camera_engine::backends::camera::session::SimulatedSessionApi;
use camera_engine::engine::controls::{Facing, Mode, PointF};
use camera_engine::engine::{ChannelCallback, EngineEvent, Reference};
use camera_engine::pipelines::DefaultRecorderFactory;
use camera_engine::pipelines::overlay::{Overlay, OverlayCanvas, OverlayTarget};
use camera_engine::preview::SimulatedPreview;
use camera_engine::{
    AspectRatio, BackendKind, CameraEngine, CameraHardware, CameraState, EngineConfig, EngineError, ErrorReason,
    Size, SizeSelector,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn config(kind: BackendKind, facing: Facing, mode: Mode) -> EngineConfig {
    EngineConfig {
        backend: kind,
        facing,
        mode,
        ..EngineConfig::default()
    }
}

fn build(hardware: CameraHardware, config: EngineConfig) -> (CameraEngine, UnboundedReceiver<EngineEvent>) {
    let (sender, receiver) = unbounded_channel();
    let engine = CameraEngine::builder(hardware)
        .config(config)
        .callback(Arc::new(ChannelCallback::new(sender)))
        .preview(Arc::new(SimulatedPreview::with_surface(Size::new(1080, 1920))))
        .build()
        .expect("engine should build inside a runtime");
    (engine, receiver)
}

async fn started(kind: BackendKind, facing: Facing, mode: Mode) -> (CameraEngine, UnboundedReceiver<EngineEvent>) {
    let (engine, events) = build(CameraHardware::simulated(kind), config(kind, facing, mode));
    engine.start().await.expect("simulated camera should start");
    assert_eq!(engine.state(), CameraState::Preview);
    (engine, events)
}

/// Wait for the first event matching `predicate`, skipping others
async fn wait_for<T>(
    events: &mut UnboundedReceiver<EngineEvent>,
    mut predicate: impl FnMut(EngineEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("engine dropped the callback");
            if let Some(value) = predicate(event) {
                return value;
            }
        }
    })
    .await
    .expect("timed out waiting for an engine event")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_and_stop_both_backends() {
    for kind in BackendKind::ALL {
        let (engine, mut events) = started(kind, Facing::Back, Mode::Picture).await;
        wait_for(&mut events, |e| matches!(e, EngineEvent::CameraOpened).then_some(())).await;
        assert!(engine.options().is_some(), "{} options missing", kind);

        engine.stop(false).await.expect("stop should succeed");
        assert_eq!(engine.state(), CameraState::Off);
        assert!(engine.options().is_none());
        wait_for(&mut events, |e| matches!(e, EngineEvent::CameraClosed).then_some(())).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_default_picture_size_is_biggest() {
    for kind in BackendKind::ALL {
        let (engine, _events) = started(kind, Facing::Back, Mode::Picture).await;
        // The back sensor is mounted at 90 degrees
        assert_eq!(engine.picture_size(Reference::Sensor), Some(Size::new(4032, 3024)));
        assert_eq!(engine.picture_size(Reference::View), Some(Size::new(3024, 4032)));
        assert_eq!(engine.video_size(Reference::Sensor), None);
        engine.stop(true).await.ok();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_picture_selector_binds_full_hd() {
    for kind in BackendKind::ALL {
        let (engine, _events) = build(CameraHardware::simulated(kind), config(kind, Facing::Back, Mode::Picture));
        engine.set_picture_size_selector(Some(SizeSelector::and(vec![
            SizeSelector::aspect_ratio(AspectRatio::of(Size::new(1080, 1920)), 0.0),
            SizeSelector::max_height(1920),
            SizeSelector::biggest(),
        ])));
        engine.start().await.expect("simulated camera should start");

        assert_eq!(engine.picture_size(Reference::Sensor), Some(Size::new(1920, 1080)));
        let preview = engine
            .preview_stream_size(Reference::Sensor)
            .expect("preview stream size is set while bound");
        assert_eq!(preview.aspect_ratio(), AspectRatio::of(Size::new(1920, 1080)));
        engine.stop(true).await.ok();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_video_in_picture_mode_is_rejected() {
    let (engine, _events) = started(BackendKind::Session, Facing::Back, Mode::Picture).await;
    let result = engine.take_video("/tmp/never-written.cevid").await;
    assert!(matches!(result, Err(EngineError::Precondition(_))), "got {:?}", result);
    assert!(!engine.is_taking_video());
    engine.stop(true).await.ok();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_picture_in_video_mode_is_rejected() {
    let (engine, _events) = started(BackendKind::Legacy, Facing::Back, Mode::Video).await;
    let result = engine.take_picture().await;
    assert!(matches!(result, Err(EngineError::Precondition(_))), "got {:?}", result);
    engine.stop(true).await.ok();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unsupported_zoom_rolls_back() {
    for kind in BackendKind::ALL {
        let (engine, _events) = started(kind, Facing::Front, Mode::Picture).await;
        assert!(!engine.options().is_some_and(|o| o.zoom_supported));

        engine.set_zoom(0.5, None, true).await.expect("zoom job should run");
        assert_eq!(engine.zoom(), 0.0, "{} kept an unsupported zoom", kind);
        engine.stop(true).await.ok();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_zoom_is_applied_and_notified() {
    let (engine, mut events) = started(BackendKind::Session, Facing::Back, Mode::Picture).await;
    engine.set_zoom(0.25, None, true).await.expect("zoom job should run");
    assert_eq!(engine.zoom(), 0.25);
    let zoom = wait_for(&mut events, |e| match e {
        EngineEvent::ZoomChanged(zoom) => Some(zoom),
        _ => None,
    })
    .await;
    assert_eq!(zoom, 0.25);
    engine.stop(true).await.ok();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_non_finite_values_are_rejected() {
    let (engine, _events) = started(BackendKind::Session, Facing::Back, Mode::Picture).await;
    let zoom = engine.zoom();
    let result = engine.set_zoom(f32::NAN, None, false).await;
    assert!(matches!(result, Err(EngineError::Precondition(_))), "got {:?}", result);
    assert_eq!(engine.zoom(), zoom);

    let ev = engine.exposure_correction();
    let result = engine.set_exposure_correction(f32::INFINITY, [-2.0, 2.0], None, false).await;
    assert!(matches!(result, Err(EngineError::Precondition(_))), "got {:?}", result);
    assert_eq!(engine.exposure_correction(), ev);
    engine.stop(true).await.ok();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_double_take_picture_captures_once() {
    for kind in BackendKind::ALL {
        let (engine, mut events) = started(kind, Facing::Back, Mode::Picture).await;
        let first = engine.take_picture();
        let second = engine.take_picture();
        first.await.expect("first picture should be accepted");
        second.await.expect("second picture is ignored, not failed");

        let picture = wait_for(&mut events, |e| match e {
            EngineEvent::PictureTaken(picture) => Some(picture),
            _ => None,
        })
        .await;
        assert!(!picture.is_snapshot);
        assert!(!picture.data.is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, EngineEvent::PictureTaken(_)), "{} took two pictures", kind);
        }
        assert!(!engine.is_taking_picture());
        engine.stop(true).await.ok();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_session_picture_with_metering() {
    let (engine, mut events) = started(BackendKind::Session, Facing::Back, Mode::Picture).await;
    engine.set_picture_metering(true);
    engine.take_picture().await.expect("picture should be accepted");

    wait_for(&mut events, |e| matches!(e, EngineEvent::Shutter { .. }).then_some(())).await;
    let picture = wait_for(&mut events, |e| match e {
        EngineEvent::PictureTaken(picture) => Some(picture),
        _ => None,
    })
    .await;
    assert_eq!(Some(picture.size), engine.picture_size(Reference::Output));
    // JPEG start of image marker
    assert_eq!(&picture.data[..2], &[0xFF, 0xD8]);
    engine.stop(true).await.ok();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_picture_snapshot_matches_surface_ratio() {
    for kind in BackendKind::ALL {
        let (engine, mut events) = started(kind, Facing::Back, Mode::Picture).await;
        engine.take_picture_snapshot().await.expect("snapshot should be accepted");
        let picture = wait_for(&mut events, |e| match e {
            EngineEvent::PictureTaken(picture) => Some(picture),
            _ => None,
        })
        .await;
        assert!(picture.is_snapshot);
        let ratio = picture.size.width as f32 / picture.size.height as f32;
        assert!((ratio - 1080.0 / 1920.0).abs() < 0.01, "{} snapshot {}", kind, picture.size);
        engine.stop(true).await.ok();
    }
}

struct Watermark;

impl Overlay for Watermark {
    fn draws_on(&self, target: OverlayTarget) -> bool {
        target == OverlayTarget::PictureSnapshot
    }

    fn draw_on(&self, _target: OverlayTarget, canvas: &mut OverlayCanvas) {
        canvas.draw(format!("watermark {}", canvas.size()));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_overlay_is_drawn_on_picture_snapshots() {
    for kind in BackendKind::ALL {
        let (sender, mut events) = unbounded_channel();
        let engine = CameraEngine::builder(CameraHardware::simulated(kind))
            .config(config(kind, Facing::Back, Mode::Picture))
            .callback(Arc::new(ChannelCallback::new(sender)))
            .preview(Arc::new(SimulatedPreview::with_surface(Size::new(1080, 1920))))
            .recorders(Arc::new(DefaultRecorderFactory::new().with_overlay(Arc::new(Watermark))))
            .build()
            .expect("engine should build inside a runtime");
        engine.start().await.expect("simulated camera should start");

        engine.take_picture_snapshot().await.expect("snapshot should be accepted");
        let picture = wait_for(&mut events, |e| match e {
            EngineEvent::PictureTaken(picture) => Some(picture),
            _ => None,
        })
        .await;
        let mark = format!("watermark {}", picture.size);
        let found = picture.data.windows(mark.len()).any(|w| w == mark.as_bytes());
        assert!(found, "{} snapshot has no overlay", kind);
        engine.stop(true).await.ok();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_video_recording_both_backends() {
    let dir = tempfile::tempdir().expect("temp dir");
    for kind in BackendKind::ALL {
        let (engine, mut events) = started(kind, Facing::Back, Mode::Video).await;
        let file = dir.path().join(format!("{}.cevid", kind));
        engine.take_video(&file).await.expect("video should be accepted");

        wait_for(&mut events, |e| matches!(e, EngineEvent::VideoRecordingStart).then_some(())).await;
        assert!(engine.is_taking_video());
        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.stop_video().await.expect("stop video should run");

        let video = wait_for(&mut events, |e| match e {
            EngineEvent::VideoTaken(video) => Some(video),
            _ => None,
        })
        .await;
        assert_eq!(video.file, file);
        let data = std::fs::read(&file).expect("video file written");
        assert_eq!(&data[..6], b"CEVID\0");
        assert_eq!(engine.state(), CameraState::Preview, "{} left the preview", kind);
        engine.stop(true).await.ok();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_double_take_video_records_once() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (engine, mut events) = started(BackendKind::Session, Facing::Back, Mode::Video).await;
    let first = dir.path().join("first.cevid");
    let second = dir.path().join("second.cevid");
    let a = engine.take_video(&first);
    let b = engine.take_video(&second);
    a.await.expect("first video should be accepted");
    // Dropped while the first one waits for its encoder stream
    b.await.expect("second video is ignored, not failed");
    assert!(engine.is_taking_video());

    wait_for(&mut events, |e| matches!(e, EngineEvent::VideoRecordingStart).then_some(())).await;
    engine.stop_video().await.expect("stop video should run");
    let video = wait_for(&mut events, |e| match e {
        EngineEvent::VideoTaken(video) => Some(video),
        EngineEvent::CameraError(error) => panic!("unexpected error {:?}", error),
        _ => None,
    })
    .await;
    assert_eq!(video.file, first);
    assert!(!second.exists());

    tokio::time::sleep(Duration::from_millis(300)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, EngineEvent::VideoRecordingStart | EngineEvent::VideoTaken(_)),
            "a second recording ran: {:?}",
            event
        );
    }
    assert!(!engine.is_taking_video());
    engine.stop(true).await.ok();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_fails_video_waiting_for_rebind() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (engine, mut events) = started(BackendKind::Session, Facing::Back, Mode::Video).await;
    let take = engine.take_video(dir.path().join("never.cevid"));
    let stop = engine.stop(true);
    take.await.expect("video should be accepted");
    stop.await.expect("stop should succeed");

    let error = wait_for(&mut events, |e| match e {
        EngineEvent::CameraError(error) => Some(error),
        EngineEvent::VideoTaken(video) => panic!("video {:?} taken after stop", video.file),
        _ => None,
    })
    .await;
    assert_eq!(error.reason, ErrorReason::VideoFailed);
    assert!(!engine.is_taking_video());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_double_metered_snapshot_captures_once() {
    let api = Arc::new(SimulatedSessionApi::new());
    let (engine, mut events) = build(
        CameraHardware::Session(api.clone()),
        config(BackendKind::Session, Facing::Back, Mode::Picture),
    );
    engine.start().await.expect("simulated camera should start");
    engine.set_picture_snapshot_metering(true);

    // Keep the first snapshot metering while the second one arrives
    api.faults().hold_focus(true);
    let first = engine.take_picture_snapshot();
    let second = engine.take_picture_snapshot();
    first.await.expect("first snapshot should be accepted");
    second.await.expect("second snapshot is ignored, not failed");
    api.faults().hold_focus(false);

    let picture = wait_for(&mut events, |e| match e {
        EngineEvent::PictureTaken(picture) => Some(picture),
        EngineEvent::CameraError(error) => panic!("unexpected error {:?}", error),
        _ => None,
    })
    .await;
    assert!(picture.is_snapshot);

    tokio::time::sleep(Duration::from_millis(500)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, EngineEvent::PictureTaken(_)), "took two snapshots");
    }
    assert!(!engine.is_taking_picture());
    engine.stop(true).await.ok();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_destroy_waits_for_slow_release() {
    let api = Arc::new(SimulatedSessionApi::new());
    let (engine, _events) = build(
        CameraHardware::Session(api.clone()),
        EngineConfig {
            release_timeout_ms: 2000,
            ..config(BackendKind::Session, Facing::Back, Mode::Picture)
        },
    );
    engine.start().await.expect("simulated camera should start");

    api.faults().set_release_delay(Duration::from_millis(300));
    let begin = std::time::Instant::now();
    engine.destroy(false).await.expect("release fits in the timeout");
    let elapsed = begin.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "destroy returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2000), "destroy returned after {:?}", elapsed);
    assert_eq!(engine.state(), CameraState::Off);

    api.faults().set_release_delay(Duration::ZERO);
    engine.start().await.expect("engine should start again after destroy");
    assert_eq!(engine.state(), CameraState::Preview);
    engine.stop(true).await.ok();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_destroy_gives_up_after_timeout() {
    let api = Arc::new(SimulatedSessionApi::new());
    let (engine, _events) = build(
        CameraHardware::Session(api.clone()),
        EngineConfig {
            release_timeout_ms: 200,
            destroy_retries: 1,
            ..config(BackendKind::Session, Facing::Back, Mode::Picture)
        },
    );
    engine.start().await.expect("simulated camera should start");

    api.faults().set_release_delay(Duration::from_millis(1000));
    let begin = std::time::Instant::now();
    let result = engine.destroy(true).await;
    assert!(matches!(result, Err(EngineError::Timeout(_))), "got {:?}", result);
    assert!(begin.elapsed() < Duration::from_millis(1000));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_ends_pending_auto_focus() {
    let api = Arc::new(SimulatedSessionApi::new());
    api.faults().hold_focus(true);
    let (engine, mut events) = build(
        CameraHardware::Session(api.clone()),
        config(BackendKind::Session, Facing::Back, Mode::Picture),
    );
    engine.start().await.expect("simulated camera should start");
    engine
        .start_auto_focus(PointF::new(540.0, 960.0))
        .await
        .expect("auto focus should be accepted");
    wait_for(&mut events, |e| matches!(e, EngineEvent::FocusStart(_)).then_some(())).await;

    // The scan can't settle, so only stopping ends it
    engine.stop(false).await.expect("stop should succeed");
    let (success, point) = wait_for(&mut events, |e| match e {
        EngineEvent::FocusEnd { success, point } => Some((success, point)),
        _ => None,
    })
    .await;
    assert!(!success, "an aborted scan must not report focus");
    assert_eq!(point, Some(PointF::new(540.0, 960.0)));
    assert_eq!(engine.state(), CameraState::Off);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_bind_returns_to_preview() {
    for kind in BackendKind::ALL {
        let (engine, _events) = started(kind, Facing::Back, Mode::Picture).await;
        engine.restart_bind().await.expect("rebinding should succeed");
        assert_eq!(engine.state(), CameraState::Preview);
        assert!(engine.preview_stream_size(Reference::Sensor).is_some());
        engine.stop(true).await.ok();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_open_reports_camera_error() {
    let api = Arc::new(SimulatedSessionApi::new());
    api.faults().fail_next_open();
    let (engine, mut events) = build(
        CameraHardware::Session(api.clone()),
        config(BackendKind::Session, Facing::Back, Mode::Picture),
    );

    let result = engine.start().await;
    assert!(
        matches!(&result, Err(EngineError::Camera(e)) if e.reason == ErrorReason::FailedToConnect),
        "got {:?}",
        result
    );
    let error = wait_for(&mut events, |e| match e {
        EngineEvent::CameraError(error) => Some(error),
        _ => None,
    })
    .await;
    assert_eq!(error.reason, ErrorReason::FailedToConnect);

    // The fault fires once
    engine.start().await.expect("second start should succeed");
    assert_eq!(engine.state(), CameraState::Preview);
    engine.stop(true).await.ok();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_legacy_disconnect_closes_camera() {
    let api = Arc::new(SimulatedLegacyApi::new());
    let (engine, mut events) = build(
        CameraHardware::Legacy(api.clone()),
        config(BackendKind::Legacy, Facing::Back, Mode::Picture),
    );
    engine.start().await.expect("simulated camera should start");

    api.disconnect();
    let error = wait_for(&mut events, |e| match e {
        EngineEvent::CameraError(error) => Some(error),
        _ => None,
    })
    .await;
    assert_eq!(error.reason, ErrorReason::Disconnected);
    assert_eq!(engine.state(), CameraState::Off);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_switching_facing_restarts_on_front_camera() {
    let (engine, mut events) = started(BackendKind::Session, Facing::Back, Mode::Picture).await;
    wait_for(&mut events, |e| matches!(e, EngineEvent::CameraOpened).then_some(())).await;

    engine.set_facing(Facing::Front).await.expect("facing job should run");
    wait_for(&mut events, |e| matches!(e, EngineEvent::CameraOpened).then_some(())).await;
    assert_eq!(engine.facing(), Facing::Front);
    engine.stop(true).await.ok();
}
