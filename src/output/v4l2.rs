//! v4l2loopback virtual camera
//!
//! Frames are written as packed RGB24 to a loopback output node. The
//! `v4l2loopback` kernel module must be loaded, for example:
//!
//! ```bash
//! sudo modprobe v4l2loopback devices=1 video_nr=10 card_label="camrelay" exclusive_caps=1
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};
use v4l::video::Output;
use v4l::{Device, FourCC};

use crate::capture::PixelFormat;
use crate::error::{DeviceOpenError, DeviceWriteError};
use crate::output::device::{CameraBackend, FramePacer, VirtualCamera};
use crate::utils;

/// Opens loopback devices, either a fixed node or the first one detected
#[derive(Debug, Clone, Default)]
pub struct V4l2LoopbackBackend {
    device: Option<PathBuf>,
}

impl V4l2LoopbackBackend {
    pub fn new(device: Option<PathBuf>) -> Self {
        Self { device }
    }

    fn resolve_device(&self) -> Result<PathBuf, DeviceOpenError> {
        if let Some(path) = &self.device {
            if !path.exists() {
                return Err(DeviceOpenError::NoBackend(format!(
                    "{} does not exist, is v4l2loopback loaded?",
                    path.display()
                )));
            }
            return Ok(path.clone());
        }

        utils::find_loopback_devices()
            .into_iter()
            .next()
            .ok_or_else(|| {
                DeviceOpenError::NoBackend("no v4l2loopback device found".into())
            })
    }
}

impl CameraBackend for V4l2LoopbackBackend {
    fn name(&self) -> &str {
        "v4l2loopback"
    }

    fn open(
        &self,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn VirtualCamera>, DeviceOpenError> {
        let path = self.resolve_device()?;
        let camera = V4l2Camera::open(&path, width, height, fps)?;
        Ok(Box::new(camera))
    }
}

/// An open loopback output node
pub struct V4l2Camera {
    name: String,
    file: File,
    // Keeps the negotiated format alive while we are the producer
    _control: Device,
    width: u32,
    height: u32,
    fps: u32,
    frame_size: usize,
    pacer: FramePacer,
    frames_written: u64,
}

impl V4l2Camera {
    #[instrument]
    pub fn open(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self, DeviceOpenError> {
        let name = path.display().to_string();
        info!("Opening virtual camera {} ({}x{} @ {}fps)", name, width, height, fps);

        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| open_error(&name, e))?;

        let control = Device::with_path(path).map_err(|e| open_error(&name, e))?;

        let caps = control.query_caps().map_err(|e| open_error(&name, e))?;
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_OUTPUT)
        {
            return Err(DeviceOpenError::NoBackend(format!(
                "{} ({}) is not a video output device",
                name, caps.driver
            )));
        }
        debug!("Device: {} ({})", caps.card, caps.driver);

        let format = PixelFormat::Rgb24;
        let requested = v4l::Format::new(width, height, FourCC::new(&format.fourcc()));
        let applied = Output::set_format(&control, &requested).map_err(|e| match e.raw_os_error() {
            Some(libc::EINVAL) => DeviceOpenError::UnsupportedResolution {
                device: name.clone(),
                width,
                height,
            },
            _ => open_error(&name, e),
        })?;

        if applied.width != width || applied.height != height {
            return Err(DeviceOpenError::UnsupportedResolution {
                device: name,
                width,
                height,
            });
        }

        info!("Virtual camera created: {}", name);

        Ok(Self {
            name,
            file,
            _control: control,
            width,
            height,
            fps,
            frame_size: format.buffer_size(width, height),
            pacer: FramePacer::new(fps),
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

fn open_error(device: &str, e: io::Error) -> DeviceOpenError {
    match (e.kind(), e.raw_os_error()) {
        (io::ErrorKind::PermissionDenied, _) => DeviceOpenError::PermissionDenied(device.into()),
        (io::ErrorKind::NotFound, _) => DeviceOpenError::NoBackend(format!("{} not found", device)),
        (_, Some(libc::EBUSY)) => DeviceOpenError::Busy {
            device: device.into(),
        },
        _ => DeviceOpenError::Io {
            device: device.into(),
            source: e,
        },
    }
}

impl VirtualCamera for V4l2Camera {
    fn device(&self) -> &str {
        &self.name
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn fps(&self) -> u32 {
        self.fps
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), DeviceWriteError> {
        if frame.len() != self.frame_size {
            return Err(DeviceWriteError::BufferSize {
                expected: self.frame_size,
                actual: frame.len(),
            });
        }
        self.file.write_all(frame)?;
        self.frames_written += 1;
        Ok(())
    }

    fn sleep_until_next_frame(&mut self) {
        self.pacer.wait();
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        info!(
            "Closing virtual camera {} (wrote {} frames)",
            self.name, self.frames_written
        );
    }
}
