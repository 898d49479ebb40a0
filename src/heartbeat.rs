//! Power heartbeat scheduler
//!
//! The powerbase cuts track power unless it keeps receiving command packets.
//! The scheduler owns a task that builds a fresh packet every interval and
//! writes it to the command endpoint until stopped.
//!
//! A failed write is reported on the event channel and the loop carries on:
//! one stale command is better than no command. Reacting to repeated failures
//! is the owner's decision.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::protocol::CommandPacket;
use crate::transport::{Endpoint, Transport, write_with_timeout};
use crate::{PowerbaseError, Result};

/// Shortest supported heartbeat interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);
/// Longest supported heartbeat interval.
pub const MAX_INTERVAL: Duration = Duration::from_millis(200);

/// Something the heartbeat loop wants its owner to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// A command write failed; the loop keeps running.
    WriteFailed { consecutive_failures: u32, reason: String },
    /// A write succeeded after one or more failures.
    Recovered { after_failures: u32 },
}

struct RunningHeartbeat {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Periodic command sender.
pub struct HeartbeatScheduler {
    transport: Arc<dyn Transport>,
    interval: Duration,
    write_timeout: Duration,
    events: broadcast::Sender<HeartbeatEvent>,
    running: Mutex<Option<RunningHeartbeat>>,
}

impl HeartbeatScheduler {
    /// Create a scheduler. `interval` must lie in 100–200 ms.
    pub fn new(
        transport: Arc<dyn Transport>,
        interval: Duration,
        write_timeout: Duration,
    ) -> Result<Self> {
        if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&interval) {
            return Err(PowerbaseError::configuration(format!(
                "heartbeat interval {:?} outside {:?}..={:?}",
                interval, MIN_INTERVAL, MAX_INTERVAL
            )));
        }
        let (events, _) = broadcast::channel(64);
        Ok(Self { transport, interval, write_timeout, events, running: Mutex::new(None) })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Receive write failure and recovery events.
    pub fn subscribe(&self) -> broadcast::Receiver<HeartbeatEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().as_ref().is_some_and(|r| !r.task.is_finished())
    }

    /// Start sending packets produced by `builder`.
    ///
    /// `builder` runs on the heartbeat task every tick and must not block.
    /// Starting while already running replaces the previous loop.
    pub fn start<F>(&self, builder: F)
    where
        F: Fn() -> CommandPacket + Send + Sync + 'static,
    {
        let mut running = self.running.lock();
        let restarted = match running.take() {
            Some(previous) => {
                previous.cancel.cancel();
                previous.task.abort();
                true
            }
            None => false,
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::heartbeat_task(
            Arc::clone(&self.transport),
            builder,
            self.interval,
            self.write_timeout,
            self.events.clone(),
            cancel.clone(),
        ));
        *running = Some(RunningHeartbeat { cancel, task });

        if restarted {
            debug!("Heartbeat restarted");
        } else {
            info!(interval_ms = self.interval.as_millis() as u64, "Heartbeat started");
        }
    }

    /// Stop the loop. No write starts after this returns. Idempotent.
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.cancel.cancel();
            running.task.abort();
            info!("Heartbeat stopped");
        }
    }

    /// Stop the heartbeat and send the power-off sequence.
    pub async fn power_off(
        &self,
        clear_ghosts: Option<CommandPacket>,
        timeout: Duration,
    ) -> Result<()> {
        self.stop();
        power_off_sequence(self.transport.as_ref(), clear_ghosts, timeout).await
    }

    async fn heartbeat_task<F>(
        transport: Arc<dyn Transport>,
        builder: F,
        period: Duration,
        write_timeout: Duration,
        events: broadcast::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) where
        F: Fn() -> CommandPacket + Send + Sync + 'static,
    {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;
        let mut beats = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let packet = builder();
            let bytes = packet.to_bytes();
            beats += 1;
            trace!(beat = beats, kind = ?packet.kind(), "Heartbeat");

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = write_with_timeout(
                    transport.as_ref(),
                    Endpoint::Command,
                    &bytes,
                    write_timeout,
                ) => result,
            };

            match result {
                Ok(()) => {
                    if consecutive_failures > 0 {
                        info!(after_failures = consecutive_failures, "Heartbeat writes recovered");
                        let _ = events.send(HeartbeatEvent::Recovered {
                            after_failures: consecutive_failures,
                        });
                    }
                    consecutive_failures = 0;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(consecutive_failures, "Heartbeat write failed: {}", e);
                    let _ = events.send(HeartbeatEvent::WriteFailed {
                        consecutive_failures,
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(beats, "Heartbeat task ended");
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Send the power-off sequence: an optional ghost-clearing packet followed by
/// the all-zero power-off packet, all within `timeout`.
pub async fn power_off_sequence(
    transport: &dyn Transport,
    clear_ghosts: Option<CommandPacket>,
    timeout: Duration,
) -> Result<()> {
    let sequence = async {
        let cleared = match clear_ghosts {
            Some(packet) => transport.write(Endpoint::Command, &packet.to_bytes()).await,
            None => Ok(()),
        };
        // The zero packet goes out even when clearing failed.
        let zero = CommandPacket::power_off().to_bytes();
        let stopped = transport.write(Endpoint::Command, &zero).await;
        cleared.and(stopped)
    };

    match tokio::time::timeout(timeout, sequence).await {
        Ok(Ok(())) => {
            info!("Power-off sequence sent");
            Ok(())
        }
        Ok(Err(e)) => {
            warn!("Power-off sequence failed: {}", e);
            Err(e)
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Power-off sequence timed out");
            Err(PowerbaseError::Timeout { duration: timeout })
        }
    }
}
