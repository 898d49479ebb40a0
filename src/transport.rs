//! Transport seam for the wireless link
//!
//! The link itself (scanning, connecting, subscribing) lives outside this
//! crate. It is modelled as something that can write a payload to a named
//! [`Endpoint`] and that pushes [`Notification`]s into a channel.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::protocol::ThrottleProfile;
use crate::types::SlotId;
use crate::{PowerbaseError, Result};

/// A named characteristic on the powerbase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Command packets (heartbeat target).
    Command,
    /// Finish line crossing notifications.
    Slot,
    /// Hand controller notifications.
    Throttle,
    /// Track sensor notifications.
    Track,
    /// Throttle profile upload for one slot.
    ThrottleProfile(SlotId),
}

/// A raw notification as delivered by the link.
#[derive(Debug, Clone)]
pub struct Notification {
    pub endpoint: Endpoint,
    /// Payload bytes (zero-copy via Arc)
    pub payload: Arc<[u8]>,
    /// Local wall-clock time the notification arrived.
    pub received_at: SystemTime,
}

impl Notification {
    pub fn new(endpoint: Endpoint, payload: impl Into<Arc<[u8]>>, received_at: SystemTime) -> Self {
        Self { endpoint, payload: payload.into(), received_at }
    }

    /// A notification stamped with the current wall-clock time.
    pub fn now(endpoint: Endpoint, payload: impl Into<Arc<[u8]>>) -> Self {
        Self::new(endpoint, payload, SystemTime::now())
    }
}

/// Sending half handed to the link so it can push notifications.
pub type NotificationSender = mpsc::Sender<Notification>;
/// Receiving half consumed by the powerbase driver.
pub type NotificationReceiver = mpsc::Receiver<Notification>;

/// Create the bounded notification queue between the link and the driver.
pub fn notification_channel(depth: usize) -> (NotificationSender, NotificationReceiver) {
    mpsc::channel(depth.max(1))
}

/// Write access to the powerbase.
///
/// Implementations should return promptly; callers bound every write with a
/// timeout regardless.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Write `payload` to `endpoint`.
    ///
    /// Returns:
    /// - `Ok(())` - The link accepted the write
    /// - `Err(e)` - The write did not complete
    async fn write(&self, endpoint: Endpoint, payload: &[u8]) -> Result<()>;
}

/// Write with an upper bound on how long the link may take.
pub async fn write_with_timeout(
    transport: &dyn Transport,
    endpoint: Endpoint,
    payload: &[u8],
    timeout: Duration,
) -> Result<()> {
    trace!(?endpoint, len = payload.len(), "Writing to powerbase");
    tokio::time::timeout(timeout, transport.write(endpoint, payload))
        .await
        .map_err(|_| PowerbaseError::Timeout { duration: timeout })?
}

/// Upload a throttle profile to one slot.
///
/// The six blocks go out in order, `spacing` apart, each write bounded by
/// `write_timeout`. The powerbase drops blocks that arrive too close together.
pub async fn upload_throttle_profile(
    transport: &dyn Transport,
    slot: SlotId,
    profile: &ThrottleProfile,
    spacing: Duration,
    write_timeout: Duration,
) -> Result<()> {
    let endpoint = Endpoint::ThrottleProfile(slot);
    for (i, block) in profile.blocks().enumerate() {
        if i > 0 {
            tokio::time::sleep(spacing).await;
        }
        write_with_timeout(transport, endpoint, &block.to_bytes(), write_timeout).await?;
        trace!(%slot, block = block.index, "Throttle profile block written");
    }
    debug!(%slot, "Throttle profile uploaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ThrottleCurve;
    use crate::test_utils::MockTransport;

    #[tokio::test(start_paused = true)]
    async fn profile_blocks_are_spaced_and_ordered() {
        let transport = MockTransport::new();
        let slot = SlotId::new(2).unwrap();
        let profile = ThrottleProfile::from_curve(&ThrottleCurve::Linear).unwrap();

        upload_throttle_profile(
            transport.as_ref(),
            slot,
            &profile,
            Duration::from_millis(50),
            Duration::from_millis(100),
        )
        .await
        .unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), ThrottleProfile::BLOCKS);
        for (i, write) in writes.iter().enumerate() {
            assert_eq!(write.endpoint, Endpoint::ThrottleProfile(slot));
            assert_eq!(write.payload.len(), 17);
            assert_eq!(write.payload[0] as usize, i);
        }
        for pair in writes.windows(2) {
            assert!(pair[1].at - pair[0].at >= Duration::from_millis(50));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn profile_upload_stops_on_first_failure() {
        let transport = MockTransport::new();
        transport.set_failing(true);
        let profile = ThrottleProfile::default();

        let result = upload_throttle_profile(
            transport.as_ref(),
            SlotId::new(1).unwrap(),
            &profile,
            Duration::from_millis(50),
            Duration::from_millis(100),
        )
        .await;

        assert!(matches!(result, Err(PowerbaseError::Transport { .. })));
        assert_eq!(transport.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_write_times_out() {
        let transport = MockTransport::new();
        transport.set_hanging(true);

        let timeout = Duration::from_millis(30);
        let result =
            write_with_timeout(transport.as_ref(), Endpoint::Command, &[0; 20], timeout).await;
        assert!(matches!(result, Err(PowerbaseError::Timeout { .. })));
    }
}
