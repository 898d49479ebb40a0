//! Events published by a running session

use std::sync::Arc;

use crate::ghost::RecordedLap;
use crate::heartbeat::HeartbeatEvent;
use crate::protocol::TrackNotification;
use crate::timing::LapCompleted;
use crate::transport::Endpoint;

/// Something that happened on the powerbase.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A slot crossed the line and completed a lap.
    LapCompleted(LapCompleted),
    /// A ghost lap finished recording.
    LapRecorded(Arc<RecordedLap>),
    /// A track sensor fired.
    TrackSensor(TrackNotification),
    /// A notification could not be decoded and was dropped.
    DecodeFailed { endpoint: Endpoint, reason: String },
    /// A heartbeat write failed; power stays on until the failure bound.
    HeartbeatFailed { consecutive_failures: u32, reason: String },
    /// Heartbeat writes succeed again.
    HeartbeatRecovered { after_failures: u32 },
    /// The session cut power on its own.
    PowerDisabled { reason: String },
}

impl From<HeartbeatEvent> for SessionEvent {
    fn from(event: HeartbeatEvent) -> Self {
        match event {
            HeartbeatEvent::WriteFailed { consecutive_failures, reason } => {
                SessionEvent::HeartbeatFailed { consecutive_failures, reason }
            }
            HeartbeatEvent::Recovered { after_failures } => {
                SessionEvent::HeartbeatRecovered { after_failures }
            }
        }
    }
}
