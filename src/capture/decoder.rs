use base64::Engine;
use bytes::Bytes;

use super::frame::{swap_red_blue, DecodedFrame, FramePayload, PixelFormat};
use crate::error::DecodeError;

const DATA_URI_SCHEME: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

/// Resolve a transport payload into compressed image bytes.
///
/// Text payloads may carry a `data:image/<type>;base64,` envelope, which is
/// stripped. Anything else starting with `data:` is rejected.
pub fn payload_bytes(payload: &FramePayload) -> Result<Bytes, DecodeError> {
    match payload {
        FramePayload::Binary(data) => {
            if data.is_empty() {
                return Err(DecodeError::Empty);
            }
            Ok(data.clone())
        }
        FramePayload::Text(text) => {
            let body = strip_envelope(text.trim())?;
            let cleaned: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            if cleaned.is_empty() {
                return Err(DecodeError::Empty);
            }
            let data = base64::engine::general_purpose::STANDARD.decode(cleaned)?;
            Ok(Bytes::from(data))
        }
    }
}

/// Strip a `data:image/...;base64,` prefix if present
pub fn strip_envelope(text: &str) -> Result<&str, DecodeError> {
    let Some(rest) = text.strip_prefix(DATA_URI_SCHEME) else {
        return Ok(text);
    };

    let Some(marker) = rest.find(BASE64_MARKER) else {
        return Err(DecodeError::Envelope("missing ';base64,' marker".into()));
    };

    let media_type = &rest[..marker];
    match media_type.strip_prefix("image/") {
        Some(subtype) if !subtype.is_empty() => Ok(&rest[marker + BASE64_MARKER.len()..]),
        _ => Err(DecodeError::Envelope(format!(
            "unexpected media type '{}'",
            media_type
        ))),
    }
}

/// Decode a compressed still image into a packed BGR frame.
///
/// No resizing happens; the frame keeps the dimensions of the image.
pub fn decode_frame(data: &[u8]) -> Result<DecodedFrame, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }

    let image = image::load_from_memory(data)?.into_rgb8();
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::ZeroSized);
    }

    let mut pixels = image.into_raw();
    swap_red_blue(&mut pixels);

    Ok(DecodedFrame::new(width, height, PixelFormat::Bgr24, pixels))
}

/// Envelope handling plus image decoding in one step
pub fn decode_payload(payload: &FramePayload) -> Result<DecodedFrame, DecodeError> {
    let data = payload_bytes(payload)?;
    decode_frame(&data)
}
