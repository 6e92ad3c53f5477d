use std::path::{Path, PathBuf};

use tracing::{debug, info};
use v4l::{capability::Flags, Device};

// Detected loopback device info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundDevice {
    pub path: PathBuf,
    pub card: String,
}

/// Find v4l2loopback output nodes, sorted by path
pub fn find_loopback_devices() -> Vec<PathBuf> {
    detect_loopback_devices()
        .into_iter()
        .map(|found| found.path)
        .collect()
}

/// Enumerate `/dev/video*` and keep the loopback output nodes
pub fn detect_loopback_devices() -> Vec<FoundDevice> {
    let mut devices: Vec<FoundDevice> = std::fs::read_dir("/dev")
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| is_video_node(path))
        .filter_map(|path| probe_loopback(&path))
        .collect();

    devices.sort_by(|a, b| a.path.cmp(&b.path));
    devices
}

fn is_video_node(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("video"))
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

fn probe_loopback(path: &Path) -> Option<FoundDevice> {
    let dev = Device::with_path(path).ok()?;
    let caps = dev.query_caps().ok()?;

    if caps.capabilities.contains(Flags::VIDEO_OUTPUT) && caps.driver.contains("v4l2 loopback") {
        info!("Found loopback device: {} - {}", path.display(), caps.card);
        Some(FoundDevice {
            path: path.to_path_buf(),
            card: caps.card,
        })
    } else {
        debug!("Skipping {} ({})", path.display(), caps.driver);
        None
    }
}
