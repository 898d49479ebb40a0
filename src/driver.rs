//! Driver spawns and runs the notification processing task
//!
//! One task owns the inbound notification queue. It decodes each payload and
//! feeds the lap timing engine and the ghost components in arrival order, so
//! per-slot lap state has a single writer. Lap storage happens in short-lived
//! spawned tasks to keep the notification path free of I/O.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::calibration::TimingCalibration;
use crate::ghost::{
    GhostPlayback, GhostRecorder, LapStore, RecordedLap, RecordingState, scale_throttle,
};
use crate::protocol::{
    CommandPacket, PowerbaseMessage, SlotNotification, ThrottleNotification, decode_notification,
};
use crate::session::SessionEvent;
use crate::timing::LapTimingEngine;
use crate::transport::{Notification, NotificationReceiver};
use crate::types::{CommandKind, ControllerInput, SLOT_COUNT, SlotCommand, SlotId};

/// State shared by the driver task, the heartbeat builder and the session handle.
pub(crate) struct PowerbaseState {
    pub(crate) engine: LapTimingEngine,
    pub(crate) recorder: GhostRecorder,
    pub(crate) playback: GhostPlayback,
    pub(crate) controls: [Mutex<SlotCommand>; SLOT_COUNT],
    pub(crate) kind: Mutex<CommandKind>,
    pub(crate) inputs: [watch::Sender<ControllerInput>; SLOT_COUNT],
    pub(crate) powered: AtomicBool,
    pub(crate) laps: Mutex<Vec<RecordedLap>>,
    pub(crate) store: Option<Arc<dyn LapStore>>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
}

impl PowerbaseState {
    pub(crate) fn new(store: Option<Arc<dyn LapStore>>, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(16));
        Self {
            engine: LapTimingEngine::new(Arc::new(TimingCalibration::new())),
            recorder: GhostRecorder::new(),
            playback: GhostPlayback::new(),
            controls: Default::default(),
            kind: Mutex::new(CommandKind::PowerOnRacing),
            inputs: std::array::from_fn(|_| watch::Sender::new(ControllerInput::default())),
            powered: AtomicBool::new(false),
            laps: Mutex::new(Vec::new()),
            store,
            events,
        }
    }

    pub(crate) fn is_powered(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// The packet the heartbeat sends at `now`.
    ///
    /// Slots playing a ghost take the ghost's throttle and have ghost mode set.
    pub(crate) fn compose_packet(&self, now: SystemTime) -> CommandPacket {
        let mut packet = CommandPacket::new(*self.kind.lock());
        for slot in SlotId::all() {
            let mut command = *self.controls[slot.index()].lock();
            command.power = match self.playback.throttle_at(slot, now) {
                Some(throttle) => command.power.with_multiplier(throttle).with_ghost_mode(true),
                None => command.power.with_ghost_mode(false),
            };
            *packet.slot_mut(slot) = command;
        }
        packet
    }

    /// Whether any slot is playing a ghost.
    pub(crate) fn ghosts_active(&self) -> bool {
        SlotId::all().any(|slot| self.playback.is_active(slot))
    }

    /// Mark power off and drop everything tied to the power cycle.
    ///
    /// Stops ghost playback, discards open recordings and clears lap state.
    /// Returns the ghost-clearing packet to send before the power-off packet
    /// when a ghost was playing.
    pub(crate) fn disable(&self, now: SystemTime) -> Option<CommandPacket> {
        self.powered.store(false, Ordering::SeqCst);

        let clear_ghosts = self.ghosts_active().then(|| self.compose_packet(now).without_ghosts());
        self.playback.stop_all();
        for slot in SlotId::all() {
            let discarded = self.recorder.stop_recording(slot);
            if discarded > 0 {
                debug!(%slot, discarded, "Open recording discarded");
            }
        }
        self.engine.reset_all();
        clear_ghosts
    }

    /// Decode and apply one notification.
    pub(crate) fn handle(&self, notification: &Notification) {
        let message = match decode_notification(notification.endpoint, &notification.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(endpoint = ?notification.endpoint, "Dropping notification: {}", e);
                self.emit(SessionEvent::DecodeFailed {
                    endpoint: notification.endpoint,
                    reason: e.to_string(),
                });
                return;
            }
        };

        match message {
            PowerbaseMessage::Slot(slot) => self.on_slot(&slot, notification.received_at),
            PowerbaseMessage::Throttle(throttle) => {
                self.on_throttle(&throttle, notification.received_at)
            }
            PowerbaseMessage::Track(track) => {
                trace!(sensor = track.sensor_id, tick = track.tick, "Track sensor");
                self.emit(SessionEvent::TrackSensor(track));
            }
        }
    }

    fn on_slot(&self, notification: &SlotNotification, arrival: SystemTime) {
        let slot = notification.slot;
        trace!(%slot, tick = notification.max_entry_tick(), "Slot notification");
        self.engine.calibration().observe(notification.max_entry_tick(), arrival);

        let Some(lap) = self.engine.process(notification, arrival) else {
            return;
        };
        self.emit(SessionEvent::LapCompleted(lap));
        self.playback.on_lap_completed(slot, lap.event_time);

        let recorded = self.recorder.on_lap_completed(slot, lap.lap_time(), lap.event_time);
        if let Some(recorded) = recorded {
            let all = {
                let mut laps = self.laps.lock();
                laps.push(recorded.clone());
                laps.clone()
            };
            self.emit(SessionEvent::LapRecorded(Arc::new(recorded)));
            self.persist(all);
        }
    }

    fn on_throttle(&self, notification: &ThrottleNotification, arrival: SystemTime) {
        for slot in SlotId::all() {
            let input = notification.input(slot);
            self.inputs[slot.index()].send_if_modified(|current| {
                let changed = *current != input;
                *current = input;
                changed
            });

            if self.recorder.state(slot) == RecordingState::Recording {
                let multiplier = self.controls[slot.index()].lock().power.multiplier();
                let throttle = scale_throttle(input.throttle, multiplier);
                self.recorder.record_sample(slot, throttle, arrival);
            }
        }
    }

    fn persist(&self, laps: Vec<RecordedLap>) {
        let Some(store) = self.store.clone() else {
            return;
        };
        tokio::spawn(async move {
            match store.save(&laps).await {
                Ok(()) => debug!(laps = laps.len(), "Recorded laps saved"),
                Err(e) => warn!("Failed to save recorded laps: {}", e),
            }
        });
    }
}

/// Handle to a spawned driver task.
pub(crate) struct DriverChannels {
    /// Resolves to the number of notifications processed.
    pub(crate) task: JoinHandle<u64>,
    /// Cancellation token for graceful shutdown
    pub(crate) cancel: CancellationToken,
}

/// Driver spawns and manages the notification processing task
pub(crate) struct Driver;

impl Driver {
    pub(crate) fn spawn(
        state: Arc<PowerbaseState>,
        notifications: NotificationReceiver,
        cancel: CancellationToken,
    ) -> DriverChannels {
        let task = tokio::spawn(Self::notification_task(state, notifications, cancel.clone()));
        DriverChannels { task, cancel }
    }

    async fn notification_task(
        state: Arc<PowerbaseState>,
        mut notifications: NotificationReceiver,
        cancel: CancellationToken,
    ) -> u64 {
        info!("Notification task started");
        let mut processed = 0u64;

        loop {
            let notification = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Notification task cancelled");
                    break;
                }
                notification = notifications.recv() => match notification {
                    Some(notification) => notification,
                    None => {
                        info!("Notification channel closed, clearing lap state");
                        state.engine.reset_all();
                        break;
                    }
                },
            };

            processed += 1;
            state.handle(&notification);
        }

        info!(processed, "Notification task ended");
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ghost::GhostSample;
    use crate::test_utils::{slot_payload, throttle_payload, track_payload};
    use crate::timing::LapSnapshot;
    use crate::transport::Endpoint;
    use std::time::Duration;

    fn at(millis: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000) + Duration::from_millis(millis)
    }

    fn slot(id: u8) -> SlotId {
        SlotId::new(id).unwrap()
    }

    #[test]
    fn decode_failures_are_reported_and_dropped() {
        let state = PowerbaseState::new(None, 16);
        let mut events = state.events.subscribe();

        state.handle(&Notification::new(Endpoint::Slot, vec![0u8; 3], at(0)));

        match events.try_recv().unwrap() {
            SessionEvent::DecodeFailed { endpoint, .. } => assert_eq!(endpoint, Endpoint::Slot),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(state.engine.snapshot(slot(1)).last_max_tick, None);
    }

    #[test]
    fn crossings_produce_lap_events() {
        let state = PowerbaseState::new(None, 16);
        let mut events = state.events.subscribe();

        state.handle(&Notification::new(Endpoint::Slot, slot_payload(1, 100, 0), at(0)));
        assert!(events.try_recv().is_err());
        assert!(state.engine.calibration().is_calibrated());

        state.handle(&Notification::new(Endpoint::Slot, slot_payload(1, 600, 0), at(5_000)));
        match events.try_recv().unwrap() {
            SessionEvent::LapCompleted(lap) => {
                assert_eq!(lap.lap_ticks, 500);
                assert!(lap.calibrated);
                assert_eq!(lap.event_time, at(5_000));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn throttle_updates_inputs() {
        let state = PowerbaseState::new(None, 16);
        let rx = state.inputs[slot(2).index()].subscribe();

        state.handle(&Notification::new(
            Endpoint::Throttle,
            throttle_payload([0, 0x40 | 30, 0, 0, 0, 0]),
            at(0),
        ));

        let input = *rx.borrow();
        assert_eq!(input.throttle, 30);
        assert!(input.brake);
        assert!(!input.lane_change);
    }

    #[test]
    fn track_sensor_is_forwarded() {
        let state = PowerbaseState::new(None, 16);
        let mut events = state.events.subscribe();
        state.handle(&Notification::new(Endpoint::Track, track_payload(4, 1234), at(0)));
        match events.try_recv().unwrap() {
            SessionEvent::TrackSensor(track) => {
                assert_eq!(track.sensor_id, 4);
                assert_eq!(track.tick, 1234);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn recording_collects_scaled_samples() {
        let state = PowerbaseState::new(None, 16);
        let mut events = state.events.subscribe();
        *state.controls[slot(1).index()].lock() = SlotCommand::with_power(63);
        state.recorder.start_recording(slot(1), 1);

        state.handle(&Notification::new(Endpoint::Slot, slot_payload(1, 0, 0), at(0)));
        state.handle(&Notification::new(Endpoint::Slot, slot_payload(1, 100, 0), at(1_000)));
        assert_eq!(state.recorder.state(slot(1)), RecordingState::Recording);

        state.handle(&Notification::new(
            Endpoint::Throttle,
            throttle_payload([40, 0, 0, 0, 0, 0]),
            at(1_250),
        ));
        state.handle(&Notification::new(Endpoint::Slot, slot_payload(1, 300, 0), at(3_000)));

        let mut recorded = None;
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::LapRecorded(lap) = event {
                recorded = Some(lap);
            }
        }
        let recorded = recorded.expect("lap recorded");
        assert_eq!(recorded.samples, vec![GhostSample { elapsed_ms: 250, throttle: 40 }]);
        assert_eq!(state.laps.lock().len(), 1);
        assert_eq!(state.recorder.state(slot(1)), RecordingState::Idle);
    }

    #[test]
    fn composed_packet_carries_ghost_throttle() {
        let state = PowerbaseState::new(None, 16);
        *state.controls[slot(2).index()].lock() = SlotCommand::with_power(50);
        let lap = RecordedLap::new(
            slot(2),
            at(0),
            Duration::from_secs(1),
            vec![GhostSample { elapsed_ms: 0, throttle: 12 }],
        );
        state.playback.start_playback(slot(3), Arc::new(lap), 7);

        let packet = state.compose_packet(at(0));
        assert_eq!(packet.kind(), CommandKind::PowerOnRacing);
        assert_eq!(packet.slot(slot(2)).power.multiplier(), 50);
        assert!(!packet.slot(slot(2)).power.ghost_mode());
        assert_eq!(packet.slot(slot(3)).power.multiplier(), 7);
        assert!(packet.slot(slot(3)).power.ghost_mode());
        assert!(state.ghosts_active());

        *state.kind.lock() = CommandKind::PowerOnTimerHalt;
        assert_eq!(state.compose_packet(at(0)).kind(), CommandKind::PowerOnTimerHalt);
    }

    #[test]
    fn disable_clears_power_cycle_state() {
        let state = PowerbaseState::new(None, 16);
        state.powered.store(true, Ordering::SeqCst);
        state.handle(&Notification::new(Endpoint::Slot, slot_payload(1, 100, 0), at(0)));
        state.handle(&Notification::new(Endpoint::Slot, slot_payload(1, 600, 0), at(5_000)));
        state.recorder.start_recording(slot(1), 1);
        let lap = RecordedLap::new(slot(2), at(0), Duration::from_secs(1), Vec::new());
        state.playback.start_playback(slot(2), Arc::new(lap), 9);

        let clear = state.disable(at(6_000)).expect("ghost-clearing packet");
        assert!(!clear.slot(slot(2)).power.ghost_mode());
        assert_eq!(clear.slot(slot(2)).power.multiplier(), 0);

        assert!(!state.is_powered());
        assert!(!state.ghosts_active());
        assert_eq!(state.recorder.state(slot(1)), RecordingState::Idle);
        assert_eq!(state.engine.snapshot(slot(1)), LapSnapshot::default());
        assert!(state.disable(at(7_000)).is_none());
    }

    #[tokio::test]
    async fn closed_channel_clears_lap_state() {
        let state = Arc::new(PowerbaseState::new(None, 16));
        let (tx, rx) = crate::transport::notification_channel(8);
        let channels = Driver::spawn(Arc::clone(&state), rx, CancellationToken::new());

        tx.send(Notification::new(Endpoint::Slot, slot_payload(1, 100, 0), at(0))).await.unwrap();
        tx.send(Notification::new(Endpoint::Slot, slot_payload(1, 400, 0), at(3_000)))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(channels.task.await.unwrap(), 2);
        assert_eq!(state.engine.snapshot(slot(1)), LapSnapshot::default());
    }
}
