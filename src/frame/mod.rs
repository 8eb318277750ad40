// SPDX-License-Identifier: GPL-3.0-only

//! Preview frame pooling
//!
//! The [`FrameManager`] hands out at most `pool_size` [`Frame`]s at a time.
//! A frame returns its buffer to the manager when dropped; the manager then
//! hands the buffer back to the producer through the buffer callback so the
//! hardware can fill it again.

use crate::engine::angles::{Angles, Axis, Reference};
use crate::engine::controls::FrameFormat;
use crate::size::Size;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Receives buffers that may be filled again
pub type BufferCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Setup {
    format: FrameFormat,
    size: Size,
    frame_bytes: usize,
    rotation_to_user: i32,
    rotation_to_view: i32,
}

struct Pool {
    pool_size: usize,
    outstanding: usize,
    generation: u64,
    setup: Option<Setup>,
}

struct Shared {
    pool: Mutex<Pool>,
    buffer_callback: Option<BufferCallback>,
}

impl Shared {
    fn pool(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recycle(&self, buffer: Vec<u8>) {
        if let Some(callback) = &self.buffer_callback {
            callback(buffer);
        }
    }

    fn on_frame_released(&self, generation: u64, buffer: Vec<u8>) {
        let recycle = {
            let mut pool = self.pool();
            if pool.generation != generation {
                false
            } else {
                pool.outstanding = pool.outstanding.saturating_sub(1);
                pool.setup.is_some()
            }
        };
        if recycle {
            self.recycle(buffer);
        }
    }
}

/// Bounded pool of preview frames
#[derive(Clone)]
pub struct FrameManager {
    shared: Arc<Shared>,
}

impl FrameManager {
    pub fn new(pool_size: usize, buffer_callback: Option<BufferCallback>) -> Self {
        Self {
            shared: Arc::new(Shared {
                pool: Mutex::new(Pool {
                    pool_size: pool_size.max(1),
                    outstanding: 0,
                    generation: 0,
                    setup: None,
                }),
                buffer_callback,
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.shared.pool().pool_size
    }

    /// Prepare for frames of `format` and `size`
    ///
    /// Returns the byte size of one frame. When a buffer callback is set,
    /// `pool_size` empty buffers of that size are handed to it.
    pub fn set_up(&self, format: FrameFormat, size: Size, angles: &Angles) -> usize {
        let bits = size.area() as u64 * format.bits_per_pixel() as u64;
        let frame_bytes = bits.div_ceil(8) as usize;
        let pool_size = {
            let mut pool = self.shared.pool();
            pool.generation += 1;
            pool.outstanding = 0;
            pool.setup = Some(Setup {
                format,
                size,
                frame_bytes,
                rotation_to_user: angles.offset(Reference::Sensor, Reference::Output, Axis::RelativeToSensor),
                rotation_to_view: angles.offset(Reference::Sensor, Reference::View, Axis::RelativeToSensor),
            });
            pool.pool_size
        };
        debug!(format = %format, size = %size, frame_bytes, pool_size, "Frame manager set up");
        for _ in 0..pool_size {
            self.shared.recycle(vec![0; frame_bytes]);
        }
        frame_bytes
    }

    pub fn is_set_up(&self) -> bool {
        self.shared.pool().setup.is_some()
    }

    /// Byte size of one frame, if set up
    pub fn frame_bytes(&self) -> Option<usize> {
        self.shared.pool().setup.map(|s| s.frame_bytes)
    }

    /// Wrap `data` in a frame if the pool has room
    ///
    /// When every frame is in use the buffer goes straight back to the
    /// producer.
    pub fn get_frame(&self, data: Vec<u8>, time_ms: i64) -> Option<Frame> {
        let claimed = {
            let mut pool = self.shared.pool();
            match pool.setup {
                Some(setup) if pool.outstanding < pool.pool_size => {
                    pool.outstanding += 1;
                    Some((setup, pool.generation))
                }
                Some(_) => None,
                None => {
                    warn!("Frame received before set up or after release");
                    return None;
                }
            }
        };

        match claimed {
            Some((setup, generation)) => Some(Frame {
                data: Some(data),
                time_ms,
                size: setup.size,
                format: setup.format,
                rotation_to_user: setup.rotation_to_user,
                rotation_to_view: setup.rotation_to_view,
                owner: Some((Arc::clone(&self.shared), generation)),
            }),
            None => {
                debug!("All frames in use, dropping frame");
                self.shared.recycle(data);
                None
            }
        }
    }

    /// Frames currently held by consumers
    pub fn outstanding(&self) -> usize {
        self.shared.pool().outstanding
    }

    /// Forget the current setup; frames still held are dropped on release
    pub fn release(&self) {
        let mut pool = self.shared.pool();
        if pool.setup.take().is_some() {
            pool.generation += 1;
            pool.outstanding = 0;
            debug!("Frame manager released");
        }
    }
}

impl std::fmt::Debug for FrameManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pool = self.shared.pool();
        f.debug_struct("FrameManager")
            .field("pool_size", &pool.pool_size)
            .field("outstanding", &pool.outstanding)
            .field("set_up", &pool.setup.is_some())
            .finish()
    }
}

/// One preview frame
///
/// The buffer returns to its pool when the frame is dropped or released.
/// Use [`Frame::freeze`] to keep a copy beyond that.
pub struct Frame {
    data: Option<Vec<u8>>,
    time_ms: i64,
    size: Size,
    format: FrameFormat,
    rotation_to_user: i32,
    rotation_to_view: i32,
    owner: Option<(Arc<Shared>, u64)>,
}

impl Frame {
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn time_ms(&self) -> i64 {
        self.time_ms
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Clockwise rotation that makes the frame upright for the user
    pub fn rotation_to_user(&self) -> i32 {
        self.rotation_to_user
    }

    /// Clockwise rotation that matches the preview surface
    pub fn rotation_to_view(&self) -> i32 {
        self.rotation_to_view
    }

    pub fn is_released(&self) -> bool {
        self.data.is_none()
    }

    /// Independent copy that does not hold a pool slot
    pub fn freeze(&self) -> Frame {
        Frame {
            data: self.data.clone(),
            time_ms: self.time_ms,
            size: self.size,
            format: self.format,
            rotation_to_user: self.rotation_to_user,
            rotation_to_view: self.rotation_to_view,
            owner: None,
        }
    }

    /// Return the buffer to the pool; later calls do nothing
    pub fn release(&mut self) {
        if let Some(data) = self.data.take()
            && let Some((shared, generation)) = self.owner.take()
        {
            shared.on_frame_released(generation, data);
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("time_ms", &self.time_ms)
            .field("size", &self.size)
            .field("format", &self.format)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_manager(pool_size: usize) -> (FrameManager, Arc<Mutex<Vec<usize>>>) {
        let recycled = Arc::new(Mutex::new(Vec::new()));
        let recycled_clone = Arc::clone(&recycled);
        let callback: BufferCallback = Arc::new(move |buffer: Vec<u8>| {
            recycled_clone.lock().unwrap().push(buffer.len());
        });
        (FrameManager::new(pool_size, Some(callback)), recycled)
    }

    #[test]
    fn test_set_up_allocates_pool() {
        let (manager, recycled) = create_test_manager(2);
        let bytes = manager.set_up(FrameFormat::Nv21, Size::new(640, 480), &Angles::new());
        assert_eq!(bytes, 640 * 480 * 3 / 2);
        assert_eq!(*recycled.lock().unwrap(), vec![bytes, bytes]);
    }

    #[test]
    fn test_pool_is_bounded() {
        let (manager, recycled) = create_test_manager(1);
        manager.set_up(FrameFormat::Nv21, Size::new(4, 4), &Angles::new());
        recycled.lock().unwrap().clear();

        let first = manager.get_frame(vec![1; 24], 1);
        assert!(first.is_some());
        assert!(manager.get_frame(vec![2; 24], 2).is_none());
        // The rejected buffer went straight back
        assert_eq!(recycled.lock().unwrap().len(), 1);

        drop(first);
        assert_eq!(manager.outstanding(), 0);
        assert_eq!(recycled.lock().unwrap().len(), 2);
        assert!(manager.get_frame(vec![3; 24], 3).is_some());
    }

    #[test]
    fn test_release_is_idempotent() {
        let (manager, recycled) = create_test_manager(2);
        manager.set_up(FrameFormat::Yuv420, Size::new(2, 2), &Angles::new());
        recycled.lock().unwrap().clear();

        let mut frame = manager.get_frame(vec![0; 6], 0).unwrap();
        frame.release();
        frame.release();
        assert!(frame.is_released());
        drop(frame);
        assert_eq!(recycled.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_frozen_frame_holds_no_slot() {
        let (manager, _) = create_test_manager(1);
        manager.set_up(FrameFormat::Nv21, Size::new(2, 2), &Angles::new());
        let frame = manager.get_frame(vec![9; 6], 5).unwrap();
        let frozen = frame.freeze();
        drop(frame);
        assert_eq!(manager.outstanding(), 0);
        assert_eq!(frozen.data(), &[9; 6]);
        assert_eq!(frozen.time_ms(), 5);
    }

    #[test]
    fn test_frames_after_release_are_not_recycled() {
        let (manager, recycled) = create_test_manager(2);
        manager.set_up(FrameFormat::Nv21, Size::new(2, 2), &Angles::new());
        let frame = manager.get_frame(vec![0; 6], 0).unwrap();
        manager.release();
        recycled.lock().unwrap().clear();
        drop(frame);
        assert!(recycled.lock().unwrap().is_empty());
        assert!(manager.get_frame(vec![0; 6], 1).is_none());
    }

    #[test]
    fn test_rotations_follow_angles() {
        let (manager, _) = create_test_manager(1);
        let mut angles = Angles::new();
        angles.set_sensor_offset(crate::engine::controls::Facing::Back, 90);
        manager.set_up(FrameFormat::Nv21, Size::new(2, 2), &angles);
        let frame = manager.get_frame(vec![0; 6], 0).unwrap();
        assert_eq!(frame.rotation_to_view(), 90);
        assert_eq!(frame.rotation_to_user(), 90);
    }
}
