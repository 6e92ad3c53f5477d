//! Test utilities: an in-memory virtual camera and image payload helpers

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use base64::Engine;
use camrelay::error::{DeviceOpenError, DeviceWriteError};
use camrelay::output::{CameraBackend, VirtualCamera};
use camrelay::PipelineConfig;
use camrelay::{RelayEvent, SessionController};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// Shared view of everything the recording devices saw
#[derive(Default)]
pub struct Recording {
    pub opened: Mutex<Vec<(u32, u32, u32)>>,
    pub frames: Mutex<Vec<Vec<u8>>>,
    pub closed: AtomicUsize,
    /// When set, the next write blocks until the test releases it
    pub hold: Mutex<Option<Hold>>,
}

pub struct Hold {
    pub entered: flume::Sender<()>,
    pub release: flume::Receiver<()>,
}

impl Recording {
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Block the next device write; returns (entered, release) handles
    pub fn hold_next_write(&self) -> (flume::Receiver<()>, flume::Sender<()>) {
        let (entered_tx, entered_rx) = flume::unbounded();
        let (release_tx, release_rx) = flume::unbounded();
        *self.hold.lock().unwrap() = Some(Hold {
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }
}

pub struct RecordingBackend {
    pub recording: Arc<Recording>,
    pub fail_with: Mutex<Option<DeviceOpenError>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            recording: Arc::new(Recording::default()),
            fail_with: Mutex::new(None),
        }
    }

    pub fn fail_next_open(&self, error: DeviceOpenError) {
        *self.fail_with.lock().unwrap() = Some(error);
    }
}

impl CameraBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn open(
        &self,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn VirtualCamera>, DeviceOpenError> {
        if let Some(error) = self.fail_with.lock().unwrap().take() {
            return Err(error);
        }
        self.recording.opened.lock().unwrap().push((width, height, fps));
        Ok(Box::new(RecordingCamera {
            name: format!("/dev/recording{}", self.recording.open_count()),
            width,
            height,
            fps,
            recording: Arc::clone(&self.recording),
        }))
    }
}

pub struct RecordingCamera {
    name: String,
    width: u32,
    height: u32,
    fps: u32,
    recording: Arc<Recording>,
}

impl VirtualCamera for RecordingCamera {
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
        let hold = self.recording.hold.lock().unwrap().take();
        if let Some(hold) = hold {
            let _ = hold.entered.send(());
            let _ = hold.release.recv_timeout(Duration::from_secs(5));
        }

        let expected = (self.width * self.height * 3) as usize;
        if frame.len() != expected {
            return Err(DeviceWriteError::BufferSize {
                expected,
                actual: frame.len(),
            });
        }
        self.recording.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    fn sleep_until_next_frame(&mut self) {}
}

impl Drop for RecordingCamera {
    fn drop(&mut self) {
        self.recording.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn controller() -> (Arc<SessionController>, Arc<RecordingBackend>) {
    controller_with_timeout(1000)
}

pub fn controller_with_timeout(take_timeout_ms: u64) -> (Arc<SessionController>, Arc<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::new());
    let config = PipelineConfig {
        take_timeout_ms,
        ..PipelineConfig::default()
    };
    let controller = SessionController::new(backend.clone(), &config);
    (Arc::new(controller), backend)
}

/// Controller whose writer notices land in the returned receiver
pub fn controller_with_notices() -> (
    Arc<SessionController>,
    Arc<RecordingBackend>,
    flume::Receiver<RelayEvent>,
) {
    let backend = Arc::new(RecordingBackend::new());
    let (tx, rx) = flume::bounded(8);
    let controller =
        SessionController::new(backend.clone(), &PipelineConfig::default()).with_notices(tx);
    (Arc::new(controller), backend, rx)
}

/// Solid-colour PNG (lossless) as raw bytes
pub fn png_frame(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Same image wrapped the way a browser canvas sends it
pub fn png_data_uri(width: u32, height: u32, color: [u8; 3]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png_frame(width, height, color))
    )
}

/// Expected RGB device buffer for a solid-colour frame
pub fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    color
        .iter()
        .copied()
        .cycle()
        .take((width * height * 3) as usize)
        .collect()
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
