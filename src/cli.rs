// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! Every command drives a [`CameraEngine`] over simulated hardware of the
//! selected API family, the same way an application would drive a real one.

use camera_engine::constants::DEFAULT_SAVE_FOLDER;
use camera_engine::engine::controls::{Facing, Mode, PictureFormat};
use camera_engine::engine::{ChannelCallback, EngineEvent};
use camera_engine::preview::SimulatedPreview;
use camera_engine::{BackendKind, CameraEngine, CameraHardware, EngineConfig, Size};
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

type BoxError = Box<dyn std::error::Error>;
type CliResult = Result<(), BoxError>;

/// Portrait phone-sized surface for the simulated preview
const PREVIEW_SURFACE: Size = Size::new(1080, 1920);

/// How long to wait for a capture result before giving up
const RESULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration from the user's config file with the command's overrides applied
fn load_config(backend: BackendKind, front: bool, mode: Mode) -> Result<EngineConfig, BoxError> {
    let mut config = match EngineConfig::default_path() {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::default(),
    };
    config.backend = backend;
    config.facing = if front { Facing::Front } else { Facing::Back };
    config.mode = mode;
    Ok(config)
}

fn build_engine(config: EngineConfig) -> Result<(CameraEngine, UnboundedReceiver<EngineEvent>), BoxError> {
    let (sender, receiver) = unbounded_channel();
    let engine = CameraEngine::builder(CameraHardware::simulated(config.backend))
        .config(config)
        .callback(Arc::new(ChannelCallback::new(sender)))
        .preview(Arc::new(SimulatedPreview::with_surface(PREVIEW_SURFACE)))
        .build()?;
    Ok((engine, receiver))
}

/// Wait for the first event `select` accepts, failing on camera errors
async fn wait_for<T>(
    events: &mut UnboundedReceiver<EngineEvent>,
    mut select: impl FnMut(EngineEvent) -> Option<T>,
) -> Result<T, BoxError> {
    let deadline = tokio::time::Instant::now() + RESULT_TIMEOUT;
    loop {
        let event = match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => return Err("Engine went away".into()),
            Err(_) => return Err("Timed out waiting for the camera".into()),
        };
        if let EngineEvent::CameraError(error) = &event {
            return Err(format!("Camera error: {}", error).into());
        }
        if let Some(value) = select(event) {
            return Ok(value);
        }
    }
}

/// List all available cameras
pub fn list_cameras(backend: BackendKind) -> CliResult {
    tokio::runtime::Runtime::new()?.block_on(list_cameras_async(backend))
}

async fn list_cameras_async(backend: BackendKind) -> CliResult {
    let (engine, _events) = build_engine(load_config(backend, false, Mode::Picture)?)?;
    let cameras = engine.enumerate_cameras().await;

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras ({}):", backend);
    println!();
    for (index, camera) in cameras.iter().enumerate() {
        println!("  [{}] {}", index, camera);
    }
    Ok(())
}

/// Print the picture and video sizes of the selected camera
pub fn print_sizes(backend: BackendKind, front: bool) -> CliResult {
    tokio::runtime::Runtime::new()?.block_on(print_sizes_async(backend, front))
}

async fn print_sizes_async(backend: BackendKind, front: bool) -> CliResult {
    let (engine, _events) = build_engine(load_config(backend, front, Mode::Picture)?)?;
    engine.start().await?;

    let options = engine.options().ok_or("Camera did not report its options")?;
    println!("Picture sizes:");
    for size in options.picture_sizes() {
        println!("  {}", size);
    }
    println!();
    println!("Video sizes:");
    for size in options.video_sizes() {
        println!("  {}", size);
    }

    engine.stop(true).await?;
    Ok(())
}

/// Take a photo and write it to disk
pub fn take_photo(backend: BackendKind, front: bool, snapshot: bool, output: Option<PathBuf>) -> CliResult {
    tokio::runtime::Runtime::new()?.block_on(take_photo_async(backend, front, snapshot, output))
}

async fn take_photo_async(backend: BackendKind, front: bool, snapshot: bool, output: Option<PathBuf>) -> CliResult {
    let (engine, mut events) = build_engine(load_config(backend, front, Mode::Picture)?)?;
    engine.start().await?;
    println!("Using camera: {} ({})", engine.facing(), backend);

    println!("Capturing...");
    if snapshot {
        engine.take_picture_snapshot().await?;
    } else {
        engine.take_picture().await?;
    }
    let picture = wait_for(&mut events, |event| match event {
        EngineEvent::PictureTaken(picture) => Some(picture),
        _ => None,
    })
    .await?;
    engine.stop(true).await?;

    let extension = match picture.format {
        PictureFormat::Jpeg => "jpg",
        PictureFormat::Dng => "dng",
    };
    let output_path = match output {
        Some(path) if path.is_dir() => path.join(timestamped("photo", extension)),
        Some(path) => path,
        None => {
            let dir = get_default_photo_dir();
            std::fs::create_dir_all(&dir)?;
            dir.join(timestamped("photo", extension))
        }
    };
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&output_path, &picture.data)?;

    println!(
        "Photo saved: {} ({}, rotation {})",
        output_path.display(),
        picture.size,
        picture.rotation
    );
    Ok(())
}

/// Record a video until the duration elapses or Ctrl+C is pressed
pub fn record_video(backend: BackendKind, front: bool, duration: u64, output: Option<PathBuf>) -> CliResult {
    let output_path = match output {
        Some(path) => path,
        None => {
            let dir = get_default_video_dir();
            std::fs::create_dir_all(&dir)?;
            dir.join(timestamped("video", "cevid"))
        }
    };

    println!("Output: {}", output_path.display());
    println!("Duration: {} seconds", duration);

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = Arc::clone(&stop_flag);
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(record_video_async(backend, front, duration, output_path, stop_flag))
}

async fn record_video_async(
    backend: BackendKind,
    front: bool,
    duration: u64,
    output_path: PathBuf,
    stop_flag: Arc<AtomicBool>,
) -> CliResult {
    let (engine, mut events) = build_engine(load_config(backend, front, Mode::Video)?)?;
    engine.start().await?;
    println!("Using camera: {} ({})", engine.facing(), backend);

    engine.take_video(&output_path).await?;
    // The session backend rebinds before the recorder starts
    wait_for(&mut events, |event| match event {
        EngineEvent::VideoRecordingStart => Some(()),
        _ => None,
    })
    .await?;

    let start = Instant::now();
    let target_duration = Duration::from_secs(duration);
    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }
        if !engine.is_taking_video() {
            println!();
            println!("Recording ended by the camera");
            break;
        }

        let elapsed = start.elapsed().as_secs();
        print!("\rRecording: {:02}:{:02}", elapsed / 60, elapsed % 60);
        std::io::Write::flush(&mut std::io::stdout())?;

        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!();

    engine.stop_video().await?;
    let video = wait_for(&mut events, |event| match event {
        EngineEvent::VideoTaken(video) => Some(video),
        _ => None,
    })
    .await?;
    engine.stop(true).await?;

    println!("Video saved: {} ({})", video.file.display(), video.size);
    Ok(())
}

fn timestamped(prefix: &str, extension: &str) -> String {
    format!("{}_{}.{}", prefix, Local::now().format("%Y%m%d_%H%M%S"), extension)
}

/// Get default photo directory
fn get_default_photo_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}

/// Get default video directory
fn get_default_video_dir() -> PathBuf {
    dirs::video_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}
