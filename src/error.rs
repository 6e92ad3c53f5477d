//! Error taxonomy for the relay pipeline

use std::io;

use thiserror::Error;

/// A frame payload that could not be turned into pixels. The frame is dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty frame payload")]
    Empty,
    #[error("malformed data URI envelope: {0}")]
    Envelope(String),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid image data: {0}")]
    Image(#[from] image::ImageError),
    #[error("decoded image has zero size")]
    ZeroSized,
}

/// Creating the virtual camera failed. Fatal for the start attempt only.
#[derive(Debug, Error)]
pub enum DeviceOpenError {
    #[error("no virtual camera backend available: {0}")]
    NoBackend(String),
    #[error("virtual camera {device} is busy")]
    Busy { device: String },
    #[error("virtual camera {device} does not support {width}x{height}")]
    UnsupportedResolution {
        device: String,
        width: u32,
        height: u32,
    },
    #[error("permission denied for {0}, try adding the user to the 'video' group")]
    PermissionDenied(String),
    #[error("failed to open {device}: {source}")]
    Io {
        device: String,
        #[source]
        source: io::Error,
    },
}

/// A single write to the device failed. The writer loop logs it and moves on.
#[derive(Debug, Error)]
pub enum DeviceWriteError {
    #[error("frame is {frame_width}x{frame_height} but device was opened at {device_width}x{device_height}")]
    DimensionMismatch {
        frame_width: u32,
        frame_height: u32,
        device_width: u32,
        device_height: u32,
    },
    #[error("frame buffer is {actual} bytes, device expects {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("device write failed: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced to callers of the session controller
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("virtual camera not running")]
    NoActiveSession,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    DeviceOpen(#[from] DeviceOpenError),
    #[error("output writer failed: {0}")]
    Writer(String),
}

impl RelayError {
    /// Per-frame failures leave the session running.
    pub fn is_per_frame(&self) -> bool {
        matches!(self, RelayError::NoActiveSession | RelayError::Decode(_))
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
