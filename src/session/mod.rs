//! Powerbase session handle
//!
//! [`Powerbase`] ties the components together: the driver task consumes
//! notifications, the heartbeat keeps the track powered with packets composed
//! from the current per-slot controls and ghost throttles, and a watcher cuts
//! power when heartbeat writes keep failing.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use powerbase::{
//!     Powerbase, PowerbaseConfig, SessionEvent, SlotId, Transport, notification_channel,
//! };
//!
//! # async fn run(transport: Arc<dyn Transport>) -> powerbase::Result<()> {
//! let config = PowerbaseConfig::default();
//! let (link, notifications) = notification_channel(config.notification_queue_depth);
//! // hand `link` to the wireless layer so it can push notifications
//! # drop(link);
//!
//! let powerbase = Powerbase::start(transport, notifications, config)?;
//! powerbase.set_all_power(40);
//! powerbase.power_on().await?;
//!
//! let mut events = Box::pin(powerbase.events());
//! while let Some(event) = events.next().await {
//!     if let SessionEvent::LapCompleted(lap) = event {
//!         println!("Slot {} lap {}: {:.2}s", lap.slot, lap.lap, lap.lap_seconds());
//!     }
//! }
//!
//! let report = powerbase.shutdown().await;
//! println!("{report:?}");
//! # Ok(())
//! # }
//! ```

mod events;


pub use events::SessionEvent;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PowerbaseConfig;
use crate::driver::{Driver, PowerbaseState};
use crate::ghost::{LapStore, RecordedLap, RecordingProgress, RecordingState};
use crate::heartbeat::{HeartbeatEvent, HeartbeatScheduler, power_off_sequence};
use crate::protocol::{CommandPacket, ThrottleCurve, ThrottleProfile};
use crate::timing::LapSnapshot;
use crate::transport::{NotificationReceiver, Transport, upload_throttle_profile};
use crate::types::{CommandKind, ControllerInput, MAX_MULTIPLIER, SlotCommand, SlotId};
use crate::{PowerbaseError, Result};

/// Outcome of [`Powerbase::shutdown`].
#[derive(Debug)]
pub struct ShutdownReport {
    /// The power-off sequence was written.
    pub powered_off: bool,
    /// Why the power-off sequence failed, if it did.
    pub power_off_error: Option<PowerbaseError>,
    /// The notification task finished within the shutdown timeout.
    pub driver_drained: bool,
    /// Notifications processed over the session's lifetime, when drained.
    pub notifications_processed: Option<u64>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.powered_off && self.driver_drained
    }
}

/// A running powerbase session.
pub struct Powerbase {
    state: Arc<PowerbaseState>,
    transport: Arc<dyn Transport>,
    heartbeat: Arc<HeartbeatScheduler>,
    config: PowerbaseConfig,
    curve: Mutex<ThrottleCurve>,
    profiles_dirty: AtomicBool,
    cancel: CancellationToken,
    driver: Option<JoinHandle<u64>>,
    watcher: Option<JoinHandle<()>>,
}

impl Powerbase {
    /// Start a session without lap storage.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        transport: Arc<dyn Transport>,
        notifications: NotificationReceiver,
        config: PowerbaseConfig,
    ) -> Result<Self> {
        Self::spawn(transport, notifications, config, None)
    }

    /// Start a session that hands recorded laps to `store`.
    pub fn start_with_store(
        transport: Arc<dyn Transport>,
        notifications: NotificationReceiver,
        config: PowerbaseConfig,
        store: Arc<dyn LapStore>,
    ) -> Result<Self> {
        Self::spawn(transport, notifications, config, Some(store))
    }

    fn spawn(
        transport: Arc<dyn Transport>,
        notifications: NotificationReceiver,
        config: PowerbaseConfig,
        store: Option<Arc<dyn LapStore>>,
    ) -> Result<Self> {
        config.validate()?;

        let heartbeat = Arc::new(HeartbeatScheduler::new(
            Arc::clone(&transport),
            config.heartbeat_interval(),
            config.write_timeout(),
        )?);
        let state = Arc::new(PowerbaseState::new(store, config.notification_queue_depth));
        let cancel = CancellationToken::new();

        let channels = Driver::spawn(Arc::clone(&state), notifications, cancel.child_token());
        let watcher = tokio::spawn(Self::heartbeat_watcher(
            Arc::downgrade(&state),
            Arc::clone(&heartbeat),
            Arc::clone(&transport),
            heartbeat.subscribe(),
            config.max_consecutive_write_failures,
            config.shutdown_timeout(),
            cancel.child_token(),
        ));

        info!(slots = config.slot_count, "Powerbase session started");

        Ok(Self {
            state,
            transport,
            heartbeat,
            curve: Mutex::new(config.throttle_curve),
            config,
            profiles_dirty: AtomicBool::new(true),
            cancel,
            driver: Some(channels.task),
            watcher: Some(watcher),
        })
    }

    pub fn config(&self) -> &PowerbaseConfig {
        &self.config
    }

    pub fn is_powered(&self) -> bool {
        self.state.is_powered()
    }

    /// Turn track power on.
    ///
    /// Uploads throttle profiles first if they changed since the last upload;
    /// power stays off if any upload fails. Clears the timing calibration so
    /// the first crossing of this power cycle re-establishes it.
    ///
    /// Fails with [`PowerbaseError::SessionClosed`] once the link has closed
    /// the notification channel.
    pub async fn power_on(&self) -> Result<()> {
        if self.driver.as_ref().is_none_or(|task| task.is_finished()) {
            return Err(PowerbaseError::SessionClosed);
        }
        if self.profiles_dirty.load(Ordering::SeqCst) {
            self.upload_profiles().await?;
        }

        self.state.engine.calibration().reset();
        self.state.powered.store(true, Ordering::SeqCst);

        let state: Weak<PowerbaseState> = Arc::downgrade(&self.state);
        self.heartbeat.start(move || match state.upgrade() {
            Some(state) => state.compose_packet(SystemTime::now()),
            None => CommandPacket::power_off(),
        });
        info!("Track power on");
        Ok(())
    }

    /// Turn track power off.
    ///
    /// Stops the heartbeat, clears lap state and ghost activity, then sends
    /// the power-off sequence within the shutdown timeout.
    pub async fn power_off(&self) -> Result<()> {
        self.heartbeat.stop();
        let clear_ghosts = self.state.disable(SystemTime::now());
        let result = power_off_sequence(
            self.transport.as_ref(),
            clear_ghosts,
            self.config.shutdown_timeout(),
        )
        .await;
        match &result {
            Ok(()) => info!("Track power off"),
            Err(e) => warn!("Power-off sequence failed: {}", e),
        }
        result
    }

    async fn upload_profiles(&self) -> Result<()> {
        let curve = *self.curve.lock();
        let profile = ThrottleProfile::from_curve(&curve)?;
        for slot in self.config.slots() {
            upload_throttle_profile(
                self.transport.as_ref(),
                slot,
                &profile,
                self.config.profile_block_spacing(),
                self.config.write_timeout(),
            )
            .await
            .inspect_err(|e| warn!(%slot, "Throttle profile upload failed: {}", e))?;
        }
        // A curve change during the upload leaves the flag set for next time.
        if *self.curve.lock() == curve {
            self.profiles_dirty.store(false, Ordering::SeqCst);
        }
        info!(slots = self.config.slot_count, ?curve, "Throttle profiles uploaded");
        Ok(())
    }

    /// Replace the throttle curve. Takes effect at the next power-on.
    pub fn set_throttle_curve(&self, curve: ThrottleCurve) -> Result<()> {
        curve.validate()?;
        *self.curve.lock() = curve;
        self.profiles_dirty.store(true, Ordering::SeqCst);
        debug!(?curve, "Throttle curve changed");
        Ok(())
    }

    pub fn throttle_curve(&self) -> ThrottleCurve {
        *self.curve.lock()
    }

    /// Set the command kind carried by every heartbeat packet.
    ///
    /// Sessions start in [`CommandKind::PowerOnRacing`]. The kind only
    /// reaches the powerbase while power is on; power-off always ends with
    /// the all-zero packet.
    pub fn set_command_kind(&self, kind: CommandKind) {
        let previous = std::mem::replace(&mut *self.state.kind.lock(), kind);
        if previous != kind {
            debug!(?previous, ?kind, "Command kind changed");
        }
    }

    pub fn command_kind(&self) -> CommandKind {
        *self.state.kind.lock()
    }

    fn update_slot(&self, slot: SlotId, update: impl FnOnce(&mut SlotCommand)) {
        update(&mut self.state.controls[slot.index()].lock());
    }

    /// Set one slot's power multiplier (clamped to 0–63).
    pub fn set_power_multiplier(&self, slot: SlotId, multiplier: u8) {
        self.update_slot(slot, |command| {
            command.power = command.power.with_multiplier(multiplier.min(MAX_MULTIPLIER));
        });
    }

    /// Set every slot's power multiplier.
    pub fn set_all_power(&self, multiplier: u8) {
        for slot in SlotId::all() {
            self.set_power_multiplier(slot, multiplier);
        }
    }

    pub fn set_rumble(&self, slot: SlotId, rumble: u8) {
        self.update_slot(slot, |command| command.rumble = rumble);
    }

    pub fn set_brake(&self, slot: SlotId, brake: u8) {
        self.update_slot(slot, |command| command.brake = brake);
    }

    pub fn set_kers(&self, slot: SlotId, kers: bool) {
        self.update_slot(slot, |command| command.kers = kers);
    }

    pub fn set_bit_six(&self, slot: SlotId, bit_six: bool) {
        self.update_slot(slot, |command| command.power = command.power.with_bit_six(bit_six));
    }

    /// The controls currently sent for `slot` (ghost throttle not applied).
    pub fn slot_command(&self, slot: SlotId) -> SlotCommand {
        *self.state.controls[slot.index()].lock()
    }

    /// The packet the next heartbeat would send.
    pub fn current_packet(&self) -> CommandPacket {
        self.state.compose_packet(SystemTime::now())
    }

    pub fn lap_snapshot(&self, slot: SlotId) -> LapSnapshot {
        self.state.engine.snapshot(slot)
    }

    /// Stream of a slot's lap state, starting with the current value.
    pub fn watch_laps(&self, slot: SlotId) -> impl Stream<Item = LapSnapshot> + Send + 'static {
        WatchStream::new(self.state.engine.subscribe(slot))
    }

    pub fn lap_receiver(&self, slot: SlotId) -> watch::Receiver<LapSnapshot> {
        self.state.engine.subscribe(slot)
    }

    pub fn reset_slot(&self, slot: SlotId) {
        self.state.engine.reset_slot(slot);
    }

    /// Latest hand controller input for `slot`.
    pub fn controller_input(&self, slot: SlotId) -> ControllerInput {
        *self.state.inputs[slot.index()].borrow()
    }

    pub fn watch_controller(
        &self,
        slot: SlotId,
    ) -> impl Stream<Item = ControllerInput> + Send + 'static {
        WatchStream::new(self.state.inputs[slot.index()].subscribe())
    }

    /// Record `laps` ghost laps on `slot`, starting at its next crossing.
    pub fn start_recording(&self, slot: SlotId, laps: u32) {
        self.state.recorder.start_recording(slot, laps);
    }

    pub fn stop_recording(&self, slot: SlotId) {
        self.state.recorder.stop_recording(slot);
    }

    pub fn recording_state(&self, slot: SlotId) -> RecordingState {
        self.state.recorder.state(slot)
    }

    pub fn recording_progress(&self, slot: SlotId) -> RecordingProgress {
        self.state.recorder.progress(slot)
    }

    /// Drive `slot` as a ghost replaying `lap`.
    ///
    /// The car approaches the line at `approach_throttle` (the configured
    /// default when `None`) and replays the lap from each crossing on.
    pub fn start_playback(
        &self,
        slot: SlotId,
        lap: Arc<RecordedLap>,
        approach_throttle: Option<u8>,
    ) {
        let approach = approach_throttle.unwrap_or(self.config.default_approach_throttle);
        self.state.playback.start_playback(slot, lap, approach);
    }

    pub fn stop_playback(&self, slot: SlotId) -> bool {
        self.state.playback.stop_playback(slot)
    }

    pub fn is_playing(&self, slot: SlotId) -> bool {
        self.state.playback.is_active(slot)
    }

    /// Laps recorded during this session.
    pub fn recorded_laps(&self) -> Vec<RecordedLap> {
        self.state.laps.lock().clone()
    }

    /// Stored laps for `slot`, from the lap store if there is one.
    pub async fn load_laps(&self, slot: SlotId) -> Result<Vec<RecordedLap>> {
        match &self.state.store {
            Some(store) => store.load(slot).await,
            None => {
                let laps = self.state.laps.lock();
                Ok(laps.iter().filter(|lap| lap.slot == slot).cloned().collect())
            }
        }
    }

    /// Session events as a stream. Events missed by a slow consumer are skipped.
    pub fn events(&self) -> impl Stream<Item = SessionEvent> + Send + 'static {
        BroadcastStream::new(self.state.events.subscribe())
            .filter_map(|event| async move { event.ok() })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.state.events.subscribe()
    }

    /// Power off and stop all tasks, bounded by the shutdown timeout.
    pub async fn shutdown(mut self) -> ShutdownReport {
        info!("Shutting down powerbase session");
        let timeout = self.config.shutdown_timeout();

        self.heartbeat.stop();
        let clear_ghosts = self.state.disable(SystemTime::now());
        let power_off_error =
            power_off_sequence(self.transport.as_ref(), clear_ghosts, timeout).await.err();
        if let Some(e) = &power_off_error {
            warn!("Power-off during shutdown failed: {}", e);
        }

        self.cancel.cancel();
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }

        let notifications_processed = match self.driver.take() {
            Some(task) => match tokio::time::timeout(timeout, task).await {
                Ok(Ok(processed)) => Some(processed),
                Ok(Err(e)) => {
                    error!("Notification task failed: {}", e);
                    None
                }
                Err(_) => {
                    warn!(?timeout, "Notification task did not stop in time");
                    None
                }
            },
            None => None,
        };

        let report = ShutdownReport {
            powered_off: power_off_error.is_none(),
            power_off_error,
            driver_drained: notifications_processed.is_some(),
            notifications_processed,
        };
        info!(clean = report.is_clean(), "Powerbase session shut down");
        report
    }

    /// Forwards heartbeat events and cuts power after too many failures.
    async fn heartbeat_watcher(
        state: Weak<PowerbaseState>,
        heartbeat: Arc<HeartbeatScheduler>,
        transport: Arc<dyn Transport>,
        mut events: broadcast::Receiver<HeartbeatEvent>,
        max_failures: u32,
        timeout: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Heartbeat watcher lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            let Some(state) = state.upgrade() else {
                break;
            };
            let exhausted = matches!(
                &event,
                HeartbeatEvent::WriteFailed { consecutive_failures, .. }
                    if *consecutive_failures >= max_failures
            );
            state.emit(event.into());

            if exhausted && state.is_powered() {
                error!(max_failures, "Heartbeat keeps failing, disabling track power");
                heartbeat.stop();
                let clear_ghosts = state.disable(SystemTime::now());
                let result = power_off_sequence(transport.as_ref(), clear_ghosts, timeout).await;
                if let Err(e) = result {
                    warn!("Power-off after heartbeat failures did not complete: {}", e);
                }
                state.emit(SessionEvent::PowerDisabled {
                    reason: format!("{max_failures} consecutive heartbeat write failures"),
                });
            }
        }
        debug!("Heartbeat watcher ended");
    }
}

impl Drop for Powerbase {
    fn drop(&mut self) {
        debug!("Dropping powerbase session");
        self.cancel.cancel();
        self.heartbeat.stop();
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}
