//! Status notifications handed back to the transport layer

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::pipeline::{StartOutcome, StopOutcome, Submitted};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RelayEvent {
    Status {
        message: String,
    },
    CameraStarted {
        width: u32,
        height: u32,
        fps: u32,
        device: String,
    },
    CameraStopped {
        frames_written: u64,
    },
    FrameReceived {
        sequence: u64,
    },
    /// A pending frame was superseded before the writer picked it up
    FrameDropped {
        sequence: u64,
        superseded_by: u64,
    },
    Error {
        message: String,
    },
}

impl RelayEvent {
    pub fn status(message: impl Into<String>) -> Self {
        RelayEvent::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        RelayEvent::Error {
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::Status { .. } => "status",
            RelayEvent::CameraStarted { .. } => "camera_started",
            RelayEvent::CameraStopped { .. } => "camera_stopped",
            RelayEvent::FrameReceived { .. } => "frame_received",
            RelayEvent::FrameDropped { .. } => "frame_dropped",
            RelayEvent::Error { .. } => "error",
        }
    }
}

impl From<&RelayError> for RelayEvent {
    fn from(e: &RelayError) -> Self {
        RelayEvent::error(e.to_string())
    }
}

impl From<&StartOutcome> for RelayEvent {
    fn from(outcome: &StartOutcome) -> Self {
        let info = outcome.info();
        RelayEvent::CameraStarted {
            width: info.width,
            height: info.height,
            fps: info.fps,
            device: info.device.clone(),
        }
    }
}

impl From<&StopOutcome> for RelayEvent {
    fn from(outcome: &StopOutcome) -> Self {
        match outcome {
            StopOutcome::Stopped(report) => RelayEvent::CameraStopped {
                frames_written: report.frames_written,
            },
            StopOutcome::NotRunning => RelayEvent::CameraStopped { frames_written: 0 },
        }
    }
}

impl From<&Submitted> for RelayEvent {
    fn from(submitted: &Submitted) -> Self {
        match submitted.superseded {
            Some(sequence) => RelayEvent::FrameDropped {
                sequence,
                superseded_by: submitted.sequence,
            },
            None => RelayEvent::FrameReceived {
                sequence: submitted.sequence,
            },
        }
    }
}

/// Map a controller call result to the single event it reports
pub fn event_for<T>(result: &Result<T, RelayError>) -> RelayEvent
where
    for<'a> RelayEvent: From<&'a T>,
{
    match result {
        Ok(value) => RelayEvent::from(value),
        Err(e) => RelayEvent::from(e),
    }
}
