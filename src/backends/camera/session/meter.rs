// SPDX-License-Identifier: GPL-3.0-only

//! 3A metering, locking and reset actions
//!
//! Meters trigger exposure, focus and white balance convergence over the
//! given regions and report whether each converged. Locks freeze the current
//! values before a capture. Resets restore whole-frame metering.

use super::actions::{Action, ActionContext, Step, sequence, together};
use super::device::{
    AeState, AfMode, AfState, AwbMode, AwbState, CaptureResult, HardwareLevel, MeteringRectangle, Trigger,
};
use crate::engine::metering::Rect;
use tracing::debug;

fn is_legacy(ctx: &ActionContext<'_>) -> bool {
    ctx.characteristics.hardware_level == HardwareLevel::Legacy
}

fn is_ae_on(ctx: &ActionContext<'_>) -> bool {
    ctx.request.ae_mode.is_some_and(|mode| mode.is_on())
}

fn is_awb_auto(ctx: &ActionContext<'_>) -> bool {
    ctx.request.awb_mode == Some(AwbMode::Auto)
}

fn first(areas: &[MeteringRectangle], max: usize) -> Vec<MeteringRectangle> {
    areas.iter().take(max).copied().collect()
}

/// Whole sensor array, for resetting regions
fn whole_array(ctx: &ActionContext<'_>) -> MeteringRectangle {
    let array = ctx.characteristics.active_array;
    MeteringRectangle {
        rect: Rect {
            left: 0,
            top: 0,
            right: array.width - 1,
            bottom: array.height - 1,
        },
        weight: MeteringRectangle::WEIGHT_DONT_CARE,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AeWait {
    Precapture,
    PrecaptureEnd,
}

/// Runs the AE precapture sequence
pub struct ExposureMeter {
    areas: Vec<MeteringRectangle>,
    skip_if_possible: bool,
    supports_trigger: bool,
    waiting: AeWait,
    successful: bool,
}

impl ExposureMeter {
    pub fn new(areas: Vec<MeteringRectangle>, skip_if_possible: bool) -> Self {
        Self {
            areas,
            skip_if_possible,
            supports_trigger: false,
            waiting: AeWait::Precapture,
            successful: false,
        }
    }

    fn finish(&mut self, ctx: &mut ActionContext<'_>, successful: bool) -> Step {
        self.successful = successful;
        // Not applied; later requests simply stop carrying it
        ctx.request.ae_precapture_trigger = None;
        Step::Completed
    }
}

impl Action for ExposureMeter {
    fn name(&self) -> &'static str {
        "exposure meter"
    }

    fn on_start(&mut self, ctx: &mut ActionContext<'_>) -> Step {
        let max_regions = ctx.characteristics.max_regions_ae;
        self.supports_trigger = !is_legacy(ctx);
        let supported = is_ae_on(ctx) && (self.supports_trigger || max_regions > 0);
        let skipped = self.skip_if_possible
            && ctx
                .last_result
                .is_some_and(|r| r.ae_state == Some(AeState::Converged));
        if !supported || skipped {
            debug!(supported, skipped, "Exposure metering not needed");
            self.successful = true;
            return Step::Completed;
        }

        if max_regions > 0 && !self.areas.is_empty() {
            ctx.request.ae_regions = Some(first(&self.areas, max_regions));
        }
        if self.supports_trigger {
            ctx.request.ae_precapture_trigger = Some(Trigger::Start);
            self.waiting = AeWait::Precapture;
        } else {
            self.waiting = AeWait::PrecaptureEnd;
        }
        ctx.apply();
        Step::Running
    }

    fn on_capture_completed(&mut self, ctx: &mut ActionContext<'_>, result: &CaptureResult) -> Step {
        let Some(state) = result.ae_state else {
            return Step::Running;
        };
        if self.waiting == AeWait::Precapture {
            match state {
                AeState::Precapture => self.waiting = AeWait::PrecaptureEnd,
                // Converged only counts once the result carries the trigger
                AeState::Converged | AeState::FlashRequired
                    if result.ae_precapture_trigger == Some(Trigger::Start) =>
                {
                    return self.finish(ctx, true);
                }
                AeState::Locked => return self.finish(ctx, false),
                _ => {}
            }
        }
        if self.waiting == AeWait::PrecaptureEnd {
            match state {
                AeState::Converged | AeState::FlashRequired => return self.finish(ctx, true),
                AeState::Locked => return self.finish(ctx, false),
                _ => {}
            }
        }
        Step::Running
    }

    fn on_abort(&mut self, ctx: &mut ActionContext<'_>) {
        self.successful = false;
        ctx.request.ae_precapture_trigger = None;
    }

    fn is_successful(&self) -> bool {
        self.successful
    }
}

/// Triggers an auto focus scan
pub struct FocusMeter {
    areas: Vec<MeteringRectangle>,
    skip_if_possible: bool,
    successful: bool,
}

impl FocusMeter {
    pub fn new(areas: Vec<MeteringRectangle>, skip_if_possible: bool) -> Self {
        Self {
            areas,
            skip_if_possible,
            successful: false,
        }
    }

    fn finish(&mut self, ctx: &mut ActionContext<'_>, successful: bool) -> Step {
        self.successful = successful;
        ctx.request.af_trigger = None;
        Step::Completed
    }
}

impl Action for FocusMeter {
    fn name(&self) -> &'static str {
        "focus meter"
    }

    fn on_start(&mut self, ctx: &mut ActionContext<'_>) -> Step {
        // Off and fixed modes ignore the trigger
        let supported = matches!(
            ctx.request.af_mode,
            Some(AfMode::Auto | AfMode::ContinuousPicture | AfMode::ContinuousVideo | AfMode::Macro)
        );
        let skipped = self.skip_if_possible
            && ctx.last_result.is_some_and(|r| {
                matches!(r.af_state, Some(AfState::FocusedLocked | AfState::PassiveFocused))
            });
        if !supported || skipped {
            debug!(supported, skipped, "Focus metering not needed");
            self.successful = true;
            return Step::Completed;
        }

        ctx.request.af_trigger = Some(Trigger::Start);
        let max_regions = ctx.characteristics.max_regions_af;
        if max_regions > 0 && !self.areas.is_empty() {
            ctx.request.af_regions = Some(first(&self.areas, max_regions));
        }
        ctx.apply();
        Step::Running
    }

    fn on_capture_completed(&mut self, ctx: &mut ActionContext<'_>, result: &CaptureResult) -> Step {
        match result.af_state {
            Some(AfState::FocusedLocked) => self.finish(ctx, true),
            Some(AfState::NotFocusedLocked) => self.finish(ctx, false),
            _ => Step::Running,
        }
    }

    fn on_abort(&mut self, ctx: &mut ActionContext<'_>) {
        self.successful = false;
        ctx.request.af_trigger = None;
    }

    fn is_successful(&self) -> bool {
        self.successful
    }
}

/// Waits for auto white balance to converge over the regions
pub struct WhiteBalanceMeter {
    areas: Vec<MeteringRectangle>,
    skip_if_possible: bool,
    successful: bool,
}

impl WhiteBalanceMeter {
    pub fn new(areas: Vec<MeteringRectangle>, skip_if_possible: bool) -> Self {
        Self {
            areas,
            skip_if_possible,
            successful: false,
        }
    }
}

impl Action for WhiteBalanceMeter {
    fn name(&self) -> &'static str {
        "white balance meter"
    }

    fn on_start(&mut self, ctx: &mut ActionContext<'_>) -> Step {
        let supported = !is_legacy(ctx) && is_awb_auto(ctx);
        let skipped = self.skip_if_possible
            && ctx
                .last_result
                .is_some_and(|r| r.awb_state == Some(AwbState::Converged));
        if !supported || skipped {
            debug!(supported, skipped, "White balance metering not needed");
            self.successful = true;
            return Step::Completed;
        }

        let max_regions = ctx.characteristics.max_regions_awb;
        if max_regions > 0 && !self.areas.is_empty() {
            ctx.request.awb_regions = Some(first(&self.areas, max_regions));
            ctx.apply();
        }
        Step::Running
    }

    fn on_capture_completed(&mut self, _ctx: &mut ActionContext<'_>, result: &CaptureResult) -> Step {
        match result.awb_state {
            Some(AwbState::Converged) => {
                self.successful = true;
                Step::Completed
            }
            // Locked white balance ignores regions
            Some(AwbState::Locked) => {
                self.successful = false;
                Step::Completed
            }
            _ => Step::Running,
        }
    }

    fn on_abort(&mut self, _ctx: &mut ActionContext<'_>) {
        self.successful = false;
    }

    fn is_successful(&self) -> bool {
        self.successful
    }
}

/// Meter exposure, focus and white balance at once
///
/// Without areas the meters only run when the device has not converged yet.
pub fn meter_action(areas: Vec<MeteringRectangle>) -> Box<dyn Action> {
    let skip_if_possible = areas.is_empty();
    together(vec![
        Box::new(ExposureMeter::new(areas.clone(), skip_if_possible)),
        Box::new(FocusMeter::new(areas.clone(), skip_if_possible)),
        Box::new(WhiteBalanceMeter::new(areas, skip_if_possible)),
    ])
}

/// Restores whole-frame exposure metering
///
/// AE is locked for one frame so a running precapture is dropped.
#[derive(Default)]
pub struct ExposureReset {
    waiting_lock: bool,
}

impl Action for ExposureReset {
    fn name(&self) -> &'static str {
        "exposure reset"
    }

    fn on_start(&mut self, ctx: &mut ActionContext<'_>) -> Step {
        if ctx.characteristics.max_regions_ae > 0 {
            ctx.request.ae_regions = Some(vec![whole_array(ctx)]);
        }
        if ctx
            .last_result
            .is_some_and(|r| r.ae_precapture_trigger == Some(Trigger::Start))
        {
            debug!("Cancelling precapture");
            ctx.request.ae_precapture_trigger = Some(Trigger::Cancel);
        }
        ctx.request.ae_lock = true;
        ctx.apply();
        self.waiting_lock = true;
        Step::Running
    }

    fn on_capture_completed(&mut self, ctx: &mut ActionContext<'_>, _result: &CaptureResult) -> Step {
        if !self.waiting_lock {
            return Step::Completed;
        }
        self.waiting_lock = false;
        ctx.request.ae_lock = false;
        ctx.request.ae_precapture_trigger = None;
        ctx.apply();
        Step::Completed
    }

    fn on_abort(&mut self, ctx: &mut ActionContext<'_>) {
        if self.waiting_lock {
            ctx.request.ae_lock = false;
        }
    }
}

/// Restores whole-frame focus regions and cancels a pending scan
pub struct FocusReset;

impl Action for FocusReset {
    fn name(&self) -> &'static str {
        "focus reset"
    }

    fn on_start(&mut self, ctx: &mut ActionContext<'_>) -> Step {
        let mut changed = false;
        if ctx.characteristics.max_regions_af > 0 {
            ctx.request.af_regions = Some(vec![whole_array(ctx)]);
            changed = true;
        }
        if ctx.last_result.is_some_and(|r| r.af_trigger == Some(Trigger::Start)) {
            ctx.request.af_trigger = Some(Trigger::Cancel);
            changed = true;
        }
        if changed {
            ctx.apply();
        }
        Step::Completed
    }
}

pub struct WhiteBalanceReset;

impl Action for WhiteBalanceReset {
    fn name(&self) -> &'static str {
        "white balance reset"
    }

    fn on_start(&mut self, ctx: &mut ActionContext<'_>) -> Step {
        if ctx.characteristics.max_regions_awb > 0 {
            ctx.request.awb_regions = Some(vec![whole_array(ctx)]);
            ctx.apply();
        }
        Step::Completed
    }
}

pub fn meter_reset_action() -> Box<dyn Action> {
    together(vec![
        Box::new(ExposureReset::default()),
        Box::new(FocusReset),
        Box::new(WhiteBalanceReset),
    ])
}

/// Locks auto exposure
pub struct ExposureLock;

impl Action for ExposureLock {
    fn name(&self) -> &'static str {
        "exposure lock"
    }

    fn on_start(&mut self, ctx: &mut ActionContext<'_>) -> Step {
        let supported = !is_legacy(ctx) && is_ae_on(ctx);
        let skipped = ctx.last_result.is_some_and(|r| r.ae_state == Some(AeState::Locked));
        if !supported || skipped {
            return Step::Completed;
        }
        ctx.request.ae_precapture_trigger = Some(Trigger::Cancel);
        ctx.request.ae_lock = true;
        ctx.apply();
        Step::Running
    }

    fn on_capture_completed(&mut self, _ctx: &mut ActionContext<'_>, result: &CaptureResult) -> Step {
        if result.ae_state == Some(AeState::Locked) {
            Step::Completed
        } else {
            Step::Running
        }
    }
}

fn focus_settled(state: Option<AfState>) -> bool {
    matches!(
        state,
        Some(
            AfState::FocusedLocked
                | AfState::NotFocusedLocked
                | AfState::Inactive
                | AfState::PassiveFocused
                | AfState::PassiveUnfocused
        )
    )
}

/// Holds focus by leaving continuous modes
pub struct FocusLock;

impl Action for FocusLock {
    fn name(&self) -> &'static str {
        "focus lock"
    }

    fn on_start(&mut self, ctx: &mut ActionContext<'_>) -> Step {
        let supported = ctx.characteristics.af_available_modes.contains(&AfMode::Auto);
        let skipped = ctx
            .last_result
            .is_some_and(|r| focus_settled(r.af_state) && r.af_mode == Some(AfMode::Auto));
        if !supported || skipped {
            return Step::Completed;
        }
        ctx.request.af_mode = Some(AfMode::Auto);
        ctx.request.af_trigger = Some(Trigger::Cancel);
        ctx.apply();
        Step::Running
    }

    fn on_capture_completed(&mut self, _ctx: &mut ActionContext<'_>, result: &CaptureResult) -> Step {
        if result.af_mode == Some(AfMode::Auto) && focus_settled(result.af_state) {
            Step::Completed
        } else {
            Step::Running
        }
    }
}

pub struct WhiteBalanceLock;

impl Action for WhiteBalanceLock {
    fn name(&self) -> &'static str {
        "white balance lock"
    }

    fn on_start(&mut self, ctx: &mut ActionContext<'_>) -> Step {
        let supported = !is_legacy(ctx) && is_awb_auto(ctx);
        let skipped = ctx
            .last_result
            .is_some_and(|r| r.awb_state == Some(AwbState::Locked));
        if !supported || skipped {
            return Step::Completed;
        }
        ctx.request.awb_lock = true;
        ctx.apply();
        Step::Running
    }

    fn on_capture_completed(&mut self, _ctx: &mut ActionContext<'_>, result: &CaptureResult) -> Step {
        if result.awb_state == Some(AwbState::Locked) {
            Step::Completed
        } else {
            Step::Running
        }
    }
}

pub fn lock_action() -> Box<dyn Action> {
    together(vec![Box::new(ExposureLock), Box::new(FocusLock), Box::new(WhiteBalanceLock)])
}

/// Unlock everything, then reset regions
///
/// `default_focus` is the focus mode to return to.
pub fn unlock_and_reset(default_focus: Option<AfMode>) -> Box<dyn Action> {
    sequence(vec![Box::new(Unlock { default_focus }), meter_reset_action()])
}

struct Unlock {
    default_focus: Option<AfMode>,
}

impl Action for Unlock {
    fn name(&self) -> &'static str {
        "unlock"
    }

    fn on_start(&mut self, ctx: &mut ActionContext<'_>) -> Step {
        if let Some(mode) = self.default_focus {
            ctx.request.af_mode = Some(mode);
        }
        ctx.request.ae_lock = false;
        ctx.request.awb_lock = false;
        ctx.apply();
        Step::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::session::device::{AeMode, CaptureRequest, Template};
    use crate::backends::camera::session::simulated::back_characteristics;

    fn result(ae: AeState, af: AfState, awb: AwbState) -> CaptureResult {
        CaptureResult {
            ae_state: Some(ae),
            af_state: Some(af),
            awb_state: Some(awb),
            ..Default::default()
        }
    }

    fn area() -> Vec<MeteringRectangle> {
        vec![MeteringRectangle {
            rect: Rect {
                left: 10,
                top: 10,
                right: 110,
                bottom: 110,
            },
            weight: 1000,
        }]
    }

    #[test]
    fn test_exposure_meter_waits_for_precapture() {
        let characteristics = back_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        let last = result(AeState::Searching, AfState::Inactive, AwbState::Searching);
        let mut ctx = ActionContext::new(&mut request, &characteristics, Some(&last));

        let mut meter = ExposureMeter::new(area(), false);
        assert_eq!(meter.on_start(&mut ctx), Step::Running);
        assert!(ctx.needs_apply());
        assert_eq!(ctx.request.ae_precapture_trigger, Some(Trigger::Start));
        assert!(ctx.request.ae_regions.is_some());

        let precapture = result(AeState::Precapture, AfState::Inactive, AwbState::Searching);
        assert_eq!(meter.on_capture_completed(&mut ctx, &precapture), Step::Running);
        let converged = result(AeState::Converged, AfState::Inactive, AwbState::Searching);
        assert_eq!(meter.on_capture_completed(&mut ctx, &converged), Step::Completed);
        assert!(meter.is_successful());
        assert_eq!(ctx.request.ae_precapture_trigger, None);
    }

    #[test]
    fn test_exposure_meter_skips_when_converged() {
        let characteristics = back_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        let last = result(AeState::Converged, AfState::Inactive, AwbState::Searching);
        let mut ctx = ActionContext::new(&mut request, &characteristics, Some(&last));
        let mut meter = ExposureMeter::new(Vec::new(), true);
        assert_eq!(meter.on_start(&mut ctx), Step::Completed);
        assert!(meter.is_successful());
        assert!(!ctx.needs_apply());
    }

    #[test]
    fn test_exposure_meter_needs_auto_exposure() {
        let characteristics = back_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        request.ae_mode = Some(AeMode::Off);
        let last = CaptureResult::default();
        let mut ctx = ActionContext::new(&mut request, &characteristics, Some(&last));
        let mut meter = ExposureMeter::new(area(), false);
        assert_eq!(meter.on_start(&mut ctx), Step::Completed);
        assert_eq!(ctx.request.ae_precapture_trigger, None);
    }

    #[test]
    fn test_focus_meter_outcomes() {
        let characteristics = back_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        request.af_mode = Some(AfMode::Auto);
        let last = result(AeState::Converged, AfState::Inactive, AwbState::Converged);
        let mut ctx = ActionContext::new(&mut request, &characteristics, Some(&last));

        let mut meter = FocusMeter::new(area(), false);
        assert_eq!(meter.on_start(&mut ctx), Step::Running);
        assert_eq!(ctx.request.af_trigger, Some(Trigger::Start));
        let scanning = result(AeState::Converged, AfState::ActiveScan, AwbState::Converged);
        assert_eq!(meter.on_capture_completed(&mut ctx, &scanning), Step::Running);
        let failed = result(AeState::Converged, AfState::NotFocusedLocked, AwbState::Converged);
        assert_eq!(meter.on_capture_completed(&mut ctx, &failed), Step::Completed);
        assert!(!meter.is_successful());
        assert_eq!(ctx.request.af_trigger, None);
    }

    #[test]
    fn test_focus_meter_unsupported_without_af_mode() {
        let characteristics = back_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        request.af_mode = Some(AfMode::Off);
        let last = CaptureResult::default();
        let mut ctx = ActionContext::new(&mut request, &characteristics, Some(&last));
        let mut meter = FocusMeter::new(area(), false);
        assert_eq!(meter.on_start(&mut ctx), Step::Completed);
        assert!(meter.is_successful());
    }

    #[test]
    fn test_white_balance_meter_locked_fails() {
        let characteristics = back_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        let last = result(AeState::Converged, AfState::Inactive, AwbState::Searching);
        let mut ctx = ActionContext::new(&mut request, &characteristics, Some(&last));
        let mut meter = WhiteBalanceMeter::new(area(), false);
        assert_eq!(meter.on_start(&mut ctx), Step::Running);
        let locked = result(AeState::Converged, AfState::Inactive, AwbState::Locked);
        assert_eq!(meter.on_capture_completed(&mut ctx, &locked), Step::Completed);
        assert!(!meter.is_successful());
    }

    #[test]
    fn test_exposure_reset_unlocks_after_one_frame() {
        let characteristics = back_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        let last = CaptureResult {
            ae_precapture_trigger: Some(Trigger::Start),
            ..Default::default()
        };
        let mut ctx = ActionContext::new(&mut request, &characteristics, Some(&last));
        let mut reset = ExposureReset::default();
        assert_eq!(reset.on_start(&mut ctx), Step::Running);
        assert!(ctx.request.ae_lock);
        assert_eq!(ctx.request.ae_precapture_trigger, Some(Trigger::Cancel));
        let array = characteristics.active_array;
        let regions = ctx.request.ae_regions.clone().unwrap_or_default();
        assert_eq!(regions[0].rect.right, array.width - 1);
        assert_eq!(regions[0].weight, MeteringRectangle::WEIGHT_DONT_CARE);

        assert_eq!(reset.on_capture_completed(&mut ctx, &CaptureResult::default()), Step::Completed);
        assert!(!ctx.request.ae_lock);
    }

    #[test]
    fn test_focus_lock_switches_to_auto() {
        let characteristics = back_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        request.af_mode = Some(AfMode::ContinuousPicture);
        let last = result(AeState::Converged, AfState::PassiveFocused, AwbState::Converged);
        let mut ctx = ActionContext::new(&mut request, &characteristics, Some(&last));
        let mut lock = FocusLock;
        assert_eq!(lock.on_start(&mut ctx), Step::Running);
        assert_eq!(ctx.request.af_mode, Some(AfMode::Auto));
        let settled = CaptureResult {
            af_state: Some(AfState::Inactive),
            af_mode: Some(AfMode::Auto),
            ..Default::default()
        };
        assert_eq!(lock.on_capture_completed(&mut ctx, &settled), Step::Completed);
    }

    #[test]
    fn test_unlock_restores_default_focus() {
        let characteristics = back_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        request.af_mode = Some(AfMode::Auto);
        request.ae_lock = true;
        request.awb_lock = true;
        let last = CaptureResult::default();
        let mut ctx = ActionContext::new(&mut request, &characteristics, Some(&last));
        let mut action = unlock_and_reset(Some(AfMode::ContinuousPicture));
        // The exposure reset holds the lock for one frame
        assert_eq!(action.on_start(&mut ctx), Step::Running);
        assert_eq!(ctx.request.af_mode, Some(AfMode::ContinuousPicture));
        assert!(!ctx.request.awb_lock);
        assert_eq!(action.on_capture_completed(&mut ctx, &last), Step::Completed);
        assert!(!ctx.request.ae_lock);
    }
}
