// SPDX-License-Identifier: GPL-3.0-only

//! Full-resolution pictures through a capture session
//!
//! The picture stream is part of the session, so the preview keeps running.
//! A single still capture request is submitted in between repeating ones and
//! the encoded image arrives on the picture stream's reader.

use super::actions::timeout;
use super::device::{CaptureListener, CaptureRequest, CaptureResult, Image, StreamRole, Template};
use super::meter::meter_action;
use super::{SessionShared, copy_controls, lock};
use crate::constants::timing;
use crate::engine::EngineContext;
use crate::engine::callback::PictureResult;
use crate::engine::controls::PictureFormat;
use crate::errors::{EngineError, ErrorReason};
use crate::pipelines::{PictureRecorder, RecorderListener};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// A picture waiting for its image
pub(super) struct PendingPicture {
    stub: PictureResult,
    listener: Arc<dyn RecorderListener>,
    /// Metering ran before the capture and must be undone afterwards
    metered: bool,
}

fn picture_failed(message: impl Into<String>) -> EngineError {
    EngineError::camera(ErrorReason::PictureFailed, message)
}

/// Reports the shutter of the still capture
struct ShutterListener {
    shared: Weak<SessionShared>,
    listener: Arc<dyn RecorderListener>,
}

impl CaptureListener for ShutterListener {
    fn on_capture_started(&self, request: &CaptureRequest) {
        if request.template == Template::StillCapture {
            debug!("Dispatching picture shutter");
            self.listener.on_picture_shutter(false);
        }
    }

    fn on_capture_completed(&self, _request: &CaptureRequest, _result: &CaptureResult) {}

    fn on_capture_failed(&self, _request: &CaptureRequest) {
        if let Some(shared) = self.shared.upgrade() {
            shared.fail_picture("still capture failed");
        }
    }
}

impl SessionShared {
    /// Submit the still capture for `stub`
    pub(super) fn capture_picture(self: &Arc<Self>, stub: PictureResult, listener: Arc<dyn RecorderListener>, metered: bool) {
        let prepared = {
            let state = lock(&self.state);
            match (&state.device, &state.session, &state.request) {
                (Some(device), Some(session), Some(repeating)) => device
                    .create_request(Template::StillCapture)
                    .map(|mut request| {
                        copy_controls(repeating, &mut request);
                        request.af_mode = repeating.af_mode;
                        request.add_target(StreamRole::Picture);
                        if stub.format == PictureFormat::Jpeg {
                            request.jpeg_orientation = stub.rotation;
                        }
                        (Arc::clone(session), request)
                    })
                    .map_err(|e| e.to_string()),
                _ => Err("no capture session".to_string()),
            }
        };

        *lock(&self.picture) = Some(PendingPicture {
            stub,
            listener: Arc::clone(&listener),
            metered,
        });
        let (session, request) = match prepared {
            Ok(prepared) => prepared,
            Err(message) => {
                warn!(error = %message, "Could not prepare still capture");
                self.fail_picture(message);
                return;
            }
        };
        let shutter: Arc<dyn CaptureListener> = Arc::new(ShutterListener {
            shared: Arc::downgrade(self),
            listener,
        });
        debug!(orientation = request.jpeg_orientation, "Submitting still capture");
        if let Err(e) = session.capture(&request, Some(shutter)) {
            warn!(error = %e, "Still capture rejected");
            self.fail_picture(e.to_string());
        }
    }

    /// Meter the whole frame, then capture
    pub(super) fn meter_then_capture(self: &Arc<Self>, stub: PictureResult, listener: Arc<dyn RecorderListener>) {
        let weak = Arc::downgrade(self);
        let action = timeout(timing::METER_TIMEOUT_SHORT, meter_action(Vec::new()));
        self.start_meter(
            action,
            Box::new(move |success| {
                debug!(success, "Metering before picture finished");
                match weak.upgrade() {
                    Some(shared) => shared.capture_picture(stub, listener, true),
                    None => listener.on_picture_result(Err(picture_failed("camera closed while metering"))),
                }
            }),
        );
    }

    /// Called on the picture stream's reader
    pub(super) fn on_picture_image(self: &Arc<Self>, image: Image) {
        let Some(PendingPicture {
            mut stub,
            listener,
            metered,
        }) = lock(&self.picture).take()
        else {
            debug!("Picture image without a pending picture, dropping");
            return;
        };
        info!(bytes = image.data.len(), size = %image.size, "Picture received");
        stub.data = image.data;
        listener.on_picture_result(Ok(stub));
        if metered {
            self.schedule_metering_reset();
        }
    }

    pub(super) fn fail_picture(self: &Arc<Self>, message: impl Into<String>) {
        let Some(pending) = lock(&self.picture).take() else {
            return;
        };
        pending.listener.on_picture_result(Err(picture_failed(message)));
        if pending.metered {
            self.schedule_metering_reset();
        }
    }

    /// Unlock 3A once the preview runs again
    pub(super) fn schedule_metering_reset(self: &Arc<Self>) {
        let Some(ctx) = self.ctx.upgrade() else {
            return;
        };
        schedule_metering_reset(&ctx, Arc::downgrade(self));
    }
}

pub(super) fn schedule_metering_reset(ctx: &Arc<EngineContext>, shared: Weak<SessionShared>) {
    let _ = ctx.orchestrator().schedule_stateful(
        "reset metering after picture",
        crate::engine::CameraState::Preview,
        move || async move {
            if let Some(shared) = shared.upgrade() {
                shared.unlock_and_reset();
            }
            Ok(())
        },
    );
}

/// Takes one picture from the session's picture stream
pub struct SessionPictureRecorder {
    shared: Weak<SessionShared>,
    metering: bool,
}

impl SessionPictureRecorder {
    pub(super) fn new(shared: &Arc<SessionShared>, metering: bool) -> Self {
        Self {
            shared: Arc::downgrade(shared),
            metering,
        }
    }
}

impl PictureRecorder for SessionPictureRecorder {
    fn take(&mut self, stub: PictureResult, listener: Arc<dyn RecorderListener>) {
        let Some(shared) = self.shared.upgrade() else {
            listener.on_picture_result(Err(picture_failed("camera closed")));
            return;
        };
        if self.metering {
            debug!("Metering before the picture");
            shared.meter_then_capture(stub, listener);
        } else {
            shared.capture_picture(stub, listener, false);
        }
    }
}
