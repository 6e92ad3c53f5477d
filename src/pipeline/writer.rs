//! Output writer loop: exchange → channel-order conversion → virtual camera

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::capture::DecodedFrame;
use crate::error::DeviceWriteError;
use crate::events::RelayEvent;
use crate::output::VirtualCamera;
use crate::pipeline::exchange::FrameExchange;

/// Counters shared between the writer and the controller
#[derive(Debug, Default)]
pub struct WriterStats {
    frames_written: AtomicU64,
    write_errors: AtomicU64,
}

impl WriterStats {
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }
}

/// Summary returned when the loop exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub device: String,
    pub frames_written: u64,
    pub write_errors: u64,
}

/// Drains one session's exchange into its device handle
pub struct OutputWriter {
    device: Box<dyn VirtualCamera>,
    exchange: Arc<FrameExchange>,
    stop: Arc<AtomicBool>,
    take_timeout: Duration,
    stats: Arc<WriterStats>,
    notices: Option<flume::Sender<RelayEvent>>,
}

impl OutputWriter {
    pub fn new(
        device: Box<dyn VirtualCamera>,
        exchange: Arc<FrameExchange>,
        stop: Arc<AtomicBool>,
        take_timeout: Duration,
        stats: Arc<WriterStats>,
    ) -> Self {
        Self {
            device,
            exchange,
            stop,
            take_timeout,
            stats,
            notices: None,
        }
    }

    pub fn with_notices(mut self, notices: Option<flume::Sender<RelayEvent>>) -> Self {
        self.notices = notices;
        self
    }

    /// Run until the stop flag is raised. Per-frame failures never end the loop.
    ///
    /// The device handle is released when this returns.
    pub fn run(mut self) -> WriterReport {
        info!(
            "Output writer running on {} ({}x{} @ {}fps)",
            self.device.device(),
            self.device.width(),
            self.device.height(),
            self.device.fps()
        );

        while !self.stop.load(Ordering::Acquire) {
            let Some(frame) = self.exchange.take(self.take_timeout) else {
                // Silence: keep the last frame on the device
                continue;
            };

            if self.stop.load(Ordering::Acquire) {
                break;
            }

            let sequence = frame.sequence();
            match self.write_frame(&frame) {
                Ok(()) => {
                    self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("camrelay_frames_written").increment(1);
                    debug!(
                        "Frame {} written after {:?}",
                        sequence,
                        frame.timestamp.elapsed()
                    );
                    self.device.sleep_until_next_frame();
                }
                Err(e) => {
                    self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("camrelay_write_errors").increment(1);
                    warn!("Error writing frame {}: {}", sequence, e);
                    self.notify(RelayEvent::error(format!(
                        "Error writing frame {}: {}",
                        sequence, e
                    )));
                }
            }
        }

        let report = WriterReport {
            device: self.device.device().to_owned(),
            frames_written: self.stats.frames_written(),
            write_errors: self.stats.write_errors(),
        };
        info!(
            "Output writer stopped ({} written, {} write errors)",
            report.frames_written, report.write_errors
        );
        report
    }

    fn write_frame(&mut self, frame: &DecodedFrame) -> Result<(), DeviceWriteError> {
        let (width, height) = (self.device.width(), self.device.height());
        if frame.width() != width || frame.height() != height {
            return Err(DeviceWriteError::DimensionMismatch {
                frame_width: frame.width(),
                frame_height: frame.height(),
                device_width: width,
                device_height: height,
            });
        }

        let converted = frame.convert(self.device.pixel_format());

        let write_start = Instant::now();
        self.device.send(&converted.data)?;
        metrics::histogram!("camrelay_write_time_us")
            .record(write_start.elapsed().as_micros() as f64);
        Ok(())
    }

    fn notify(&self, event: RelayEvent) {
        if let Some(tx) = &self.notices {
            // Never block the writer on a slow listener
            let _ = tx.try_send(event);
        }
    }
}
