//! Session controller: owns the single camera session and routes frames into it

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::capture::{decoder, FramePayload};
use crate::error::{DeviceOpenError, RelayError, Result};
use crate::events::RelayEvent;
use crate::output::CameraBackend;
use crate::pipeline::exchange::{ExchangeStats, FrameExchange, Offer};
use crate::pipeline::writer::{OutputWriter, WriterReport, WriterStats};
use crate::PipelineConfig;

/// Frame rate every session's device is opened at
pub const TARGET_FPS: u32 = 30;

/// Lifecycle of the output writer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoopState::Starting,
            2 => LoopState::Running,
            3 => LoopState::Stopping,
            _ => LoopState::Idle,
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Idle => "idle",
            LoopState::Starting => "starting",
            LoopState::Running => "running",
            LoopState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Description of the active session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub device: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(SessionInfo),
    /// A session was already active; its parameters are unchanged
    AlreadyRunning(SessionInfo),
}

impl StartOutcome {
    pub fn info(&self) -> &SessionInfo {
        match self {
            StartOutcome::Started(info) | StartOutcome::AlreadyRunning(info) => info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(WriterReport),
    NotRunning,
}

/// A frame accepted into the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submitted {
    pub sequence: u64,
    /// Pending frame discarded to make room for this one
    pub superseded: Option<u64>,
}

/// Controller-wide statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub frames_received: u64,
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub frames_dropped: u64,
    pub frames_written: u64,
    pub write_errors: u64,
}

/// One active virtual-device binding
struct CameraSession {
    info: SessionInfo,
    exchange: Arc<FrameExchange>,
    stop: Arc<AtomicBool>,
    writer_stats: Arc<WriterStats>,
    handle: JoinHandle<WriterReport>,
}

#[derive(Default)]
struct Counters {
    frames_received: AtomicU64,
    frames_decoded: AtomicU64,
    decode_errors: AtomicU64,
}

/// Starts and stops the output writer and feeds it decoded frames.
///
/// At most one session exists at a time. `start` and `stop` are serialized by
/// the session lock; `submit_frame` only touches the exchange.
pub struct SessionController {
    backend: Arc<dyn CameraBackend>,
    take_timeout: Duration,
    session: Mutex<Option<CameraSession>>,
    // Exchange of the running session, published for frame submission
    ingest: RwLock<Option<Arc<FrameExchange>>>,
    state: AtomicU8,
    sequence: AtomicU64,
    counters: Counters,
    // Totals of finished sessions
    retired: Mutex<RelayStats>,
    notices: Option<flume::Sender<RelayEvent>>,
}

impl SessionController {
    pub fn new(backend: Arc<dyn CameraBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            take_timeout: Duration::from_millis(config.take_timeout_ms.max(1)),
            session: Mutex::new(None),
            ingest: RwLock::new(None),
            state: AtomicU8::new(LoopState::Idle as u8),
            sequence: AtomicU64::new(0),
            counters: Counters::default(),
            retired: Mutex::new(RelayStats::default()),
            notices: None,
        }
    }

    /// Send asynchronous writer notices (e.g. write failures) to `tx`
    pub fn with_notices(mut self, tx: flume::Sender<RelayEvent>) -> Self {
        self.notices = Some(tx);
        self
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LoopState) {
        debug!("Output writer state -> {}", state);
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<CameraSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, exchange: Option<Arc<FrameExchange>>) {
        *self.ingest.write().unwrap_or_else(PoisonError::into_inner) = exchange;
    }

    /// Description of the active session, if any
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.lock_session().as_ref().map(|s| s.info.clone())
    }

    /// Open the virtual camera and start the output writer.
    ///
    /// Idempotent: while a session is active the request is ignored, even with
    /// different dimensions.
    pub fn start(&self, width: u32, height: u32) -> Result<StartOutcome> {
        let mut session = self.lock_session();
        if let Some(active) = session.as_ref() {
            debug!(
                "Start requested for {}x{} but {}x{} session is active",
                width, height, active.info.width, active.info.height
            );
            return Ok(StartOutcome::AlreadyRunning(active.info.clone()));
        }

        if width == 0 || height == 0 {
            return Err(DeviceOpenError::UnsupportedResolution {
                device: self.backend.name().to_owned(),
                width,
                height,
            }
            .into());
        }

        self.set_state(LoopState::Starting);
        let device = match self.backend.open(width, height, TARGET_FPS) {
            Ok(device) => device,
            Err(e) => {
                self.set_state(LoopState::Idle);
                error!("Error creating virtual camera: {}", e);
                return Err(e.into());
            }
        };

        let info = SessionInfo {
            width,
            height,
            fps: TARGET_FPS,
            device: device.device().to_owned(),
        };
        let exchange = Arc::new(FrameExchange::new());
        let stop = Arc::new(AtomicBool::new(false));
        let writer_stats = Arc::new(WriterStats::default());

        let writer = OutputWriter::new(
            device,
            Arc::clone(&exchange),
            Arc::clone(&stop),
            self.take_timeout,
            Arc::clone(&writer_stats),
        )
        .with_notices(self.notices.clone());

        // On spawn failure the closure, and with it the device, is dropped
        let handle = match thread::Builder::new()
            .name("camrelay-writer".into())
            .spawn(move || writer.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                self.set_state(LoopState::Idle);
                error!("Failed to spawn output writer: {}", e);
                return Err(RelayError::Writer(e.to_string()));
            }
        };

        self.publish(Some(Arc::clone(&exchange)));
        self.set_state(LoopState::Running);
        info!(
            "Virtual camera started: {} ({}x{} @ {}fps)",
            info.device, width, height, TARGET_FPS
        );

        *session = Some(CameraSession {
            info: info.clone(),
            exchange,
            stop,
            writer_stats,
            handle,
        });
        Ok(StartOutcome::Started(info))
    }

    /// Stop the active session and wait for the writer to release the device.
    ///
    /// No-op when nothing is running.
    pub fn stop(&self) -> Result<StopOutcome> {
        let mut guard = self.lock_session();
        let Some(active) = guard.take() else {
            return Ok(StopOutcome::NotRunning);
        };

        self.set_state(LoopState::Stopping);
        self.publish(None);
        active.stop.store(true, Ordering::Release);
        active.exchange.close();

        let joined = active.handle.join();
        self.retire(&active.exchange.stats(), &active.writer_stats);
        self.set_state(LoopState::Idle);

        match joined {
            Ok(report) => {
                info!("Virtual camera stopped: {}", report.device);
                Ok(StopOutcome::Stopped(report))
            }
            Err(_) => {
                error!("Output writer for {} panicked", active.info.device);
                Err(RelayError::Writer(format!(
                    "writer for {} panicked",
                    active.info.device
                )))
            }
        }
    }

    /// Decode a frame payload and hand it to the output writer.
    ///
    /// Decode failures are per-frame: the session keeps running.
    pub fn submit_frame(&self, payload: impl Into<FramePayload>) -> Result<Submitted> {
        let exchange = self
            .ingest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(RelayError::NoActiveSession)?;

        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);

        let mut frame = match decoder::decode_payload(&payload.into()) {
            Ok(frame) => frame,
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("camrelay_decode_errors").increment(1);
                warn!("Error processing frame: {}", e);
                return Err(e.into());
            }
        };
        self.counters.frames_decoded.fetch_add(1, Ordering::Relaxed);

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        frame.meta.sequence = sequence;

        match exchange.offer(frame) {
            Offer::Stored => Ok(Submitted {
                sequence,
                superseded: None,
            }),
            Offer::Replaced { dropped } => Ok(Submitted {
                sequence,
                superseded: Some(dropped),
            }),
            // Session stopped while we were decoding
            Offer::Closed => Err(RelayError::NoActiveSession),
        }
    }

    fn retire(&self, exchange: &ExchangeStats, writer: &WriterStats) {
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        retired.frames_dropped += exchange.dropped;
        retired.frames_written += writer.frames_written();
        retired.write_errors += writer.write_errors();
    }

    /// Totals across all sessions of this controller
    pub fn stats(&self) -> RelayStats {
        let mut stats = *self.retired.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(active) = self.lock_session().as_ref() {
            stats.frames_dropped += active.exchange.stats().dropped;
            stats.frames_written += active.writer_stats.frames_written();
            stats.write_errors += active.writer_stats.write_errors();
        }

        stats.frames_received = self.counters.frames_received.load(Ordering::Relaxed);
        stats.frames_decoded = self.counters.frames_decoded.load(Ordering::Relaxed);
        stats.decode_errors = self.counters.decode_errors.load(Ordering::Relaxed);
        stats
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Error stopping session on drop: {}", e);
        }
    }
}
