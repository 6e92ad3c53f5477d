pub mod device;
pub mod v4l2;

pub use device::{CameraBackend, FramePacer, VirtualCamera};
pub use v4l2::{V4l2Camera, V4l2LoopbackBackend};
