//! Control core for wireless slot-car powerbases.
//!
//! Powerbase drives a six-slot digital slot-car track over an abstract
//! wireless link: it encodes command packets, keeps track power alive with a
//! heartbeat, turns finish line notifications into lap times and records and
//! replays ghost cars.
//!
//! # Features
//!
//! - **Codec**: 20-byte command packets, throttle profile blocks, slot,
//!   throttle and track notifications
//! - **Heartbeat**: 100–200 ms command cadence with bounded power-off
//! - **Lap Timing**: wrap-safe tick deltas calibrated to wall-clock time
//! - **Ghost Cars**: record laps of throttle input and replay them
//!
//! The link itself is a [`Transport`] plus a notification channel; scanning
//! and connecting are left to the caller.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use powerbase::{Powerbase, PowerbaseConfig, SlotId, Transport, notification_channel};
//!
//! # async fn run(transport: Arc<dyn Transport>) -> powerbase::Result<()> {
//! let config = PowerbaseConfig::from_yaml("heartbeat_interval_ms: 120\n")?;
//! let (_link, notifications) = notification_channel(config.notification_queue_depth);
//!
//! let powerbase = Powerbase::start(transport, notifications, config)?;
//! powerbase.set_power_multiplier(SlotId::new(1)?, 45);
//! powerbase.power_on().await?;
//! // ...
//! powerbase.power_off().await?;
//! # Ok(())
//! # }
//! ```

// Core types and error handling
mod config;
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Wire protocol and link seam
pub mod protocol;
pub mod transport;

// Control components
pub mod calibration;
pub mod ghost;
pub mod heartbeat;
pub mod timing;

// Session orchestration
mod driver;
pub mod session;

// Core exports
pub use config::*;
pub use error::*;
pub use types::*;

// Main API exports
pub use ghost::{InMemoryLapStore, LapStore, RecordedLap};
pub use protocol::{CommandPacket, ThrottleCurve, ThrottleProfile};
pub use session::{Powerbase, SessionEvent, ShutdownReport};
pub use timing::{LapCompleted, LapSnapshot};
pub use transport::{Endpoint, Notification, Transport, notification_channel};
