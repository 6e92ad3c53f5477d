use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Encoded frame as it arrives from the transport
#[derive(Debug, Clone)]
pub enum FramePayload {
    /// Base64 text, optionally wrapped in a `data:image/...;base64,` envelope
    Text(String),
    /// Raw compressed image bytes
    Binary(Bytes),
}

impl From<String> for FramePayload {
    fn from(text: String) -> Self {
        FramePayload::Text(text)
    }
}

impl From<&str> for FramePayload {
    fn from(text: &str) -> Self {
        FramePayload::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for FramePayload {
    fn from(data: Vec<u8>) -> Self {
        FramePayload::Binary(Bytes::from(data))
    }
}

impl From<Bytes> for FramePayload {
    fn from(data: Bytes) -> Self {
        FramePayload::Binary(data)
    }
}

/// Decoded frame with zero-copy semantics
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Packed pixel data, `stride * height` bytes
    pub data: Bytes,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// Arrival timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

/// Pixel layouts flowing through the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
        }
    }

    /// Buffer size of a tightly packed frame
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel() as usize
    }

    /// V4L2 fourcc for this layout
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Bgr24 => *b"BGR3",
        }
    }
}

impl DecodedFrame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            meta: FrameMetadata {
                sequence: 0,
                width,
                height,
                stride: width * format.bytes_per_pixel(),
                format,
            },
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// Convert to another channel order; same-format conversion is a cheap clone
    pub fn convert(&self, target: PixelFormat) -> DecodedFrame {
        if self.meta.format == target {
            return self.clone();
        }

        // Both formats are packed 3-byte pixels differing only in R/B order
        let mut swapped = self.data.to_vec();
        swap_red_blue(&mut swapped);
        DecodedFrame {
            data: Bytes::from(swapped),
            meta: FrameMetadata {
                format: target,
                ..self.meta.clone()
            },
            timestamp: self.timestamp,
        }
    }
}

/// Swap the first and third channel of every packed 3-byte pixel in place
pub fn swap_red_blue(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}
