pub mod decoder;
pub mod frame;

pub use decoder::{decode_frame, decode_payload};
pub use frame::DecodedFrame;
pub use frame::FramePayload;
pub use frame::PixelFormat;
