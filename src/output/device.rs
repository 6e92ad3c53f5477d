//! Virtual camera abstractions

use std::thread;
use std::time::{Duration, Instant};

use crate::capture::PixelFormat;
use crate::error::{DeviceOpenError, DeviceWriteError};

/// An open virtual camera endpoint.
///
/// Owned by exactly one output writer for the lifetime of a session. Dropping
/// the handle releases the device.
pub trait VirtualCamera: Send {
    /// Human readable device identifier (e.g. `/dev/video10`)
    fn device(&self) -> &str;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn fps(&self) -> u32;

    /// Channel order the device consumes
    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }

    /// Write one packed frame at the opened resolution
    fn send(&mut self, frame: &[u8]) -> Result<(), DeviceWriteError>;

    /// Block until the next frame boundary of the device's frame rate
    fn sleep_until_next_frame(&mut self);
}

/// Factory for virtual camera handles
pub trait CameraBackend: Send + Sync {
    fn name(&self) -> &str;

    fn open(
        &self,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn VirtualCamera>, DeviceOpenError>;
}

/// Paces writes to a fixed frame interval
#[derive(Debug)]
pub struct FramePacer {
    interval: Duration,
    next_deadline: Option<Instant>,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / fps.max(1),
            next_deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep until one interval after the previous frame boundary.
    ///
    /// After a gap longer than an interval (e.g. no frames arrived) the
    /// schedule restarts from now instead of bursting to catch up.
    pub fn wait(&mut self) {
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now + self.interval);

        if deadline > now {
            thread::sleep(deadline - now);
            self.next_deadline = Some(deadline + self.interval);
        } else {
            self.next_deadline = Some(now + self.interval);
        }
    }
}
