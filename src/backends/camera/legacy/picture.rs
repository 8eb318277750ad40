// SPDX-License-Identifier: GPL-3.0-only

//! Full-resolution pictures through the legacy device

use super::device::{LegacyCamera, PreviewCallback};
use crate::engine::angles::Angles;
use crate::engine::callback::PictureResult;
use crate::engine::controls::FrameFormat;
use crate::engine::{CameraState, EngineContext};
use crate::errors::{EngineError, ErrorReason};
use crate::frame::FrameManager;
use crate::pipelines::{PictureRecorder, RecorderListener};
use crate::size::Size;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// How to bring the preview back once the picture is taken
#[derive(Clone)]
pub struct PreviewResume {
    pub callback: Option<PreviewCallback>,
    pub frames: Option<FrameManager>,
    /// Preview stream size in the `Sensor` reference
    pub size: Size,
    pub angles: Angles,
}

/// Takes one picture; the device stops its preview while capturing
pub struct FullPictureRecorder {
    camera: Arc<dyn LegacyCamera>,
    ctx: Weak<EngineContext>,
    resume: Option<PreviewResume>,
}

impl FullPictureRecorder {
    pub fn new(camera: Arc<dyn LegacyCamera>, ctx: &Arc<EngineContext>, resume: PreviewResume) -> Self {
        Self {
            camera,
            ctx: Arc::downgrade(ctx),
            resume: Some(resume),
        }
    }
}

fn resume_preview(camera: &dyn LegacyCamera, ctx: &Weak<EngineContext>, resume: PreviewResume) {
    // The engine may have stopped previewing while the picture was taken
    let previewing = ctx
        .upgrade()
        .is_some_and(|ctx| ctx.state().is_at_least(CameraState::Preview));
    if !previewing {
        debug!("Not previewing anymore, leaving preview stopped");
        return;
    }
    camera.set_preview_callback(resume.callback);
    if let Some(frames) = &resume.frames {
        frames.set_up(FrameFormat::Nv21, resume.size, &resume.angles);
    }
    if let Err(e) = camera.start_preview() {
        warn!(error = %e, "Could not restart preview after picture");
    }
}

impl PictureRecorder for FullPictureRecorder {
    fn take(&mut self, mut stub: PictureResult, listener: Arc<dyn RecorderListener>) {
        let Some(resume) = self.resume.take() else {
            warn!("Picture recorder reused");
            return;
        };

        // Older devices hang in take_picture while frames are being delivered
        self.camera.set_preview_callback(None);
        if let Some(frames) = &resume.frames {
            frames.release();
        }

        let shutter_listener = Arc::clone(&listener);
        let result_listener = Arc::clone(&listener);
        let camera = Arc::clone(&self.camera);
        let ctx = self.ctx.clone();
        let fallback = resume.clone();
        let taken = self.camera.take_picture(
            Box::new(move || shutter_listener.on_picture_shutter(true)),
            Box::new(move |result| {
                resume_preview(camera.as_ref(), &ctx, resume);
                match result {
                    Ok(data) => {
                        info!(bytes = data.len(), size = %stub.size, "Picture received");
                        stub.data = data;
                        result_listener.on_picture_result(Ok(stub));
                    }
                    Err(e) => {
                        warn!(error = %e, "Picture failed");
                        result_listener
                            .on_picture_result(Err(EngineError::camera(ErrorReason::PictureFailed, e.to_string())));
                    }
                }
            }),
        );
        if let Err(e) = taken {
            warn!(error = %e, "take_picture rejected");
            resume_preview(self.camera.as_ref(), &self.ctx, fallback);
            listener.on_picture_result(Err(EngineError::camera(ErrorReason::PictureFailed, e.to_string())));
        }
    }
}
