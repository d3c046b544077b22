//! [`DispatchLoop`] – owns the tracking connection and the outbound
//! transport, and drives the Frame Adapter on every tracking frame.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ─▶ Connecting ─▶ Running ─▶ Stopping ─▶ Terminated
//!             │                                    ▲
//!             └──────── open() failed ─────────────┘
//! ```
//!
//! 1. **Connecting** – [`TrackingSource::open`], register the event queue,
//!    apply [`TrackingMode::Desktop`].  A failed open is fatal.
//! 2. **Running** – a passive wait on the event queue.  Frames are
//!    translated and sent one datagram per message; device attaches are
//!    opened and identified on the blocking pool; connection changes are
//!    logged.  Per-frame and
//!    per-device failures are logged and never end the loop.
//! 3. **Stopping** – entered on interrupt (or when the source ends its
//!    stream).  Queued events are discarded and the connection is released
//!    exactly once.
//!
//! The loop is the only consumer of the queue and the only writer on the
//! transport, so sends never overlap.

use std::sync::Arc;

use palmcast_hal::{event_queue, DeviceEvent, SourceEvent, TrackingSource, DEFAULT_QUEUE_CAPACITY};
use palmcast_middleware::{translate_frame, PoseTransport};
use palmcast_types::{ConnectionState, Frame, PalmError, TrackingMode};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle state of a [`DispatchLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    #[default]
    Idle,
    Connecting,
    Running,
    Stopping,
    Terminated,
}

/// Counters collected over one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub frames: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    /// Hands skipped because their side was not recognised.
    pub rejected_hands: u64,
    pub devices_identified: u64,
    pub device_failures: u64,
    /// Events the source could not queue because the queue was full.
    pub dropped_events: u64,
    pub final_state: DispatchState,
}

/// The event-driven dispatch loop.
pub struct DispatchLoop<S: TrackingSource> {
    source: S,
    transport: Arc<dyn PoseTransport>,
    queue_capacity: usize,
    state: watch::Sender<DispatchState>,
    report: DispatchReport,
}

impl<S: TrackingSource> DispatchLoop<S> {
    pub fn new(source: S, transport: Arc<dyn PoseTransport>) -> Self {
        let (state, _) = watch::channel(DispatchState::Idle);
        Self {
            source,
            transport,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            state,
            report: DispatchReport::default(),
        }
    }

    /// Override the event queue capacity.  Zero is bumped to one.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DispatchState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions from another task.
    pub fn subscribe_state(&self) -> watch::Receiver<DispatchState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// # Errors
    ///
    /// Returns [`PalmError::ConnectionOpen`] if the tracking connection
    /// cannot be opened.  Nothing after startup is fatal.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<DispatchReport, PalmError> {
        self.transition(DispatchState::Connecting);
        if let Err(e) = self.source.open() {
            error!(source = self.source.name(), error = %e, "tracking connection failed");
            self.source.close();
            self.transition(DispatchState::Terminated);
            return Err(e);
        }
        info!(source = self.source.name(), "connected to tracking service");

        let (sink, mut events) = event_queue(self.queue_capacity);
        self.source.add_listener(sink);
        if let Err(e) = self.source.set_tracking_mode(TrackingMode::Desktop) {
            warn!(error = %e, "tracking mode not applied; continuing with source default");
        }

        if *shutdown.borrow() {
            info!("interrupt already pending; not entering steady state");
        } else {
            self.transition(DispatchState::Running);
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("interrupt received");
                            break;
                        }
                    }
                    event = events.recv() => match event {
                        Some(event) => self.handle_event(event, &shutdown).await,
                        None => {
                            info!("tracking source ended its event stream");
                            break;
                        }
                    }
                }
            }
        }

        self.transition(DispatchState::Stopping);
        events.close();
        self.source.close();
        self.report.dropped_events = events.dropped();
        self.transition(DispatchState::Terminated);
        self.report.final_state = DispatchState::Terminated;
        info!(
            frames = self.report.frames,
            messages = self.report.messages_sent,
            send_failures = self.report.send_failures,
            "dispatch loop stopped"
        );
        Ok(self.report)
    }

    async fn handle_event(&mut self, event: SourceEvent, shutdown: &watch::Receiver<bool>) {
        match event {
            SourceEvent::Tracking(frame) => self.handle_frame(&frame, shutdown).await,
            SourceEvent::Device(device) => self.handle_device(device).await,
            SourceEvent::Connection(ConnectionState::Connected) => {
                info!("tracking service connected");
            }
            SourceEvent::Connection(ConnectionState::Lost) => {
                warn!("tracking service connection lost");
            }
        }
    }

    #[instrument(skip_all, fields(frame_id = frame.id, hands = frame.hands.len()))]
    async fn handle_frame(&mut self, frame: &Frame, shutdown: &watch::Receiver<bool>) {
        self.report.frames += 1;
        let translation = translate_frame(frame);
        for rejected in &translation.rejected {
            self.report.rejected_hands += 1;
            warn!(error = %rejected, "skipping hand");
        }
        for message in &translation.messages {
            if *shutdown.borrow() {
                debug!("interrupt observed mid-frame; remaining messages not sent");
                return;
            }
            match self.transport.send(message).await {
                Ok(()) => self.report.messages_sent += 1,
                Err(e) => {
                    self.report.send_failures += 1;
                    warn!(topic = %message.topic(), error = %e, "send failed");
                }
            }
        }
    }

    /// Opening a device talks to the tracking service and may block, so it
    /// runs on the blocking pool rather than on the loop's worker.
    async fn handle_device(&mut self, event: DeviceEvent) {
        let label = event.device.label().to_string();
        if !event.attached {
            info!(device = %label, "tracking device detached");
            return;
        }
        let device = event.device;
        let outcome = tokio::task::spawn_blocking(move || device.open_and_identify())
            .await
            .unwrap_or_else(|e| {
                Err(PalmError::DeviceOpen {
                    device: label.clone(),
                    details: format!("identify task failed: {e}"),
                })
            });
        match outcome {
            Ok(info) => {
                self.report.devices_identified += 1;
                info!(device = %label, serial = %info.serial, "found device");
            }
            Err(e) => {
                self.report.device_failures += 1;
                warn!(device = %label, error = %e, "could not open device");
            }
        }
    }

    fn transition(&self, next: DispatchState) {
        let previous = self.state.send_replace(next);
        debug!(from = ?previous, to = ?next, "dispatch state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use async_trait::async_trait;
    use palmcast_hal::sim::{ScriptedSource, SimDevice, SimTrackingSource};
    use palmcast_middleware::{OscReceiver, OscUdpTransport, ReceivedMessage};
    use palmcast_types::{HandSample, HandSide, OutboundMessage, Quaternion, Vec3};

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<OutboundMessage>>,
        fail_all: bool,
    }

    impl RecordingTransport {
        fn failing() -> Self {
            Self {
                fail_all: true,
                ..Self::default()
            }
        }

        fn topics(&self) -> Vec<&'static str> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.topic().as_str())
                .collect()
        }
    }

    #[async_trait]
    impl PoseTransport for RecordingTransport {
        async fn send(&self, message: &OutboundMessage) -> Result<(), PalmError> {
            if self.fail_all {
                return Err(PalmError::TransportSend("network unreachable".to_string()));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    /// Remembers the thread it was identified on.
    struct ThreadRecordingDevice {
        identified_on: Mutex<Option<std::thread::ThreadId>>,
    }

    impl palmcast_hal::TrackingDevice for ThreadRecordingDevice {
        fn label(&self) -> &str {
            "device#7"
        }

        fn open_and_identify(&self) -> Result<palmcast_types::DeviceInfo, PalmError> {
            *self.identified_on.lock().unwrap() = Some(std::thread::current().id());
            Ok(palmcast_types::DeviceInfo {
                serial: "LP77".to_string(),
            })
        }
    }

    /// Raises the interrupt flag as soon as it has sent one message.
    struct InterruptingTransport {
        sent: Mutex<Vec<OutboundMessage>>,
        interrupt: watch::Sender<bool>,
    }

    #[async_trait]
    impl PoseTransport for InterruptingTransport {
        async fn send(&self, message: &OutboundMessage) -> Result<(), PalmError> {
            self.sent.lock().unwrap().push(message.clone());
            self.interrupt.send_replace(true);
            Ok(())
        }
    }

    fn hand(side: HandSide, x: f32) -> HandSample {
        HandSample {
            side,
            position: Vec3::new(x, 20.0, 30.0),
            orientation: Quaternion::identity(),
        }
    }

    fn frame(id: u64, hands: Vec<HandSample>) -> SourceEvent {
        SourceEvent::Tracking(Frame {
            id,
            timestamp_us: id as i64 * 10_000,
            hands,
        })
    }

    /// Records the tracking mode it is asked for, optionally refusing it.
    struct ModeRecordingSource {
        inner: ScriptedSource,
        requested: Arc<Mutex<Option<TrackingMode>>>,
        refuse: bool,
    }

    impl TrackingSource for ModeRecordingSource {
        fn name(&self) -> &str {
            "mode-recording"
        }

        fn open(&mut self) -> Result<(), PalmError> {
            self.inner.open()
        }

        fn add_listener(&mut self, sink: palmcast_hal::EventSink) {
            self.inner.add_listener(sink);
        }

        fn set_tracking_mode(&mut self, mode: TrackingMode) -> Result<(), PalmError> {
            *self.requested.lock().unwrap() = Some(mode);
            if self.refuse {
                return Err(PalmError::ConnectionOpen("mode not supported".to_string()));
            }
            self.inner.set_tracking_mode(mode)
        }

        fn close(&mut self) {
            self.inner.close();
        }
    }

    #[tokio::test]
    async fn startup_requests_desktop_mode() {
        let transport = Arc::new(RecordingTransport::default());
        let requested = Arc::new(Mutex::new(None));
        let source = ModeRecordingSource {
            inner: ScriptedSource::new(Vec::new()),
            requested: requested.clone(),
            refuse: false,
        };
        let (_tx, rx) = watch::channel(false);

        DispatchLoop::new(source, transport).run(rx).await.unwrap();

        assert_eq!(*requested.lock().unwrap(), Some(TrackingMode::Desktop));
    }

    #[tokio::test]
    async fn refused_tracking_mode_is_not_fatal() {
        let transport = Arc::new(RecordingTransport::default());
        let source = ModeRecordingSource {
            inner: ScriptedSource::new(vec![frame(1, vec![hand(HandSide::Left, 0.0)])]),
            requested: Arc::new(Mutex::new(None)),
            refuse: true,
        };
        let (_tx, rx) = watch::channel(false);

        let report = DispatchLoop::new(source, transport.clone())
            .run(rx)
            .await
            .unwrap();

        assert_eq!(report.frames, 1);
        assert_eq!(transport.topics().len(), 2);
    }

    #[tokio::test]
    async fn frames_are_sent_in_hand_order() {
        let transport = Arc::new(RecordingTransport::default());
        let source = ScriptedSource::new(vec![
            frame(1, vec![hand(HandSide::Left, 10.0)]),
            frame(2, vec![hand(HandSide::Left, 1.0), hand(HandSide::Right, 2.0)]),
            frame(3, Vec::new()),
        ]);
        let (_tx, rx) = watch::channel(false);

        let report = DispatchLoop::new(source, transport.clone())
            .run(rx)
            .await
            .unwrap();

        assert_eq!(report.frames, 3);
        assert_eq!(report.messages_sent, 6);
        assert_eq!(
            transport.topics(),
            vec![
                "/hand/left/position",
                "/hand/left/orientation",
                "/hand/left/position",
                "/hand/left/orientation",
                "/hand/right/position",
                "/hand/right/orientation",
            ]
        );
        assert_eq!(report.final_state, DispatchState::Terminated);
    }

    #[tokio::test]
    async fn ended_stream_terminates_without_sends() {
        let transport = Arc::new(RecordingTransport::default());
        let source = ScriptedSource::new(Vec::new());
        let closes = source.close_counter();
        let (_tx, rx) = watch::channel(false);
        let dispatch = DispatchLoop::new(source, transport.clone());
        assert_eq!(dispatch.state(), DispatchState::Idle);

        let report = dispatch.run(rx).await.unwrap();

        assert_eq!(report.frames, 0);
        assert_eq!(report.final_state, DispatchState::Terminated);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(transport.topics().is_empty());
    }

    #[tokio::test]
    async fn open_failure_is_fatal_and_releases_connection() {
        let transport = Arc::new(RecordingTransport::default());
        let source = ScriptedSource::new(vec![frame(1, vec![hand(HandSide::Left, 0.0)])])
            .failing_open("tracking service not running");
        let closes = source.close_counter();
        let (_tx, rx) = watch::channel(false);

        let dispatch = DispatchLoop::new(source, transport.clone());
        let state = dispatch.subscribe_state();
        let err = dispatch.run(rx).await.unwrap_err();

        assert!(matches!(err, PalmError::ConnectionOpen(_)));
        assert_eq!(*state.borrow(), DispatchState::Terminated);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(transport.topics().is_empty());
    }

    #[tokio::test]
    async fn device_open_failure_does_not_stop_tracking() {
        let transport = Arc::new(RecordingTransport::default());
        let source = ScriptedSource::new(vec![
            SourceEvent::Connection(ConnectionState::Connected),
            SourceEvent::Device(DeviceEvent {
                device: SimDevice::failing("device#1"),
                attached: true,
            }),
            frame(1, vec![hand(HandSide::Right, 5.0)]),
            SourceEvent::Device(DeviceEvent {
                device: SimDevice::new("device#2", "LP22"),
                attached: true,
            }),
            frame(2, vec![hand(HandSide::Left, 6.0)]),
        ]);
        let (_tx, rx) = watch::channel(false);

        let report = DispatchLoop::new(source, transport.clone())
            .run(rx)
            .await
            .unwrap();

        assert_eq!(report.device_failures, 1);
        assert_eq!(report.devices_identified, 1);
        assert_eq!(report.frames, 2);
        assert_eq!(transport.topics().len(), 4);
    }

    #[tokio::test]
    async fn device_is_identified_off_the_loop_thread() {
        let transport = Arc::new(RecordingTransport::default());
        let device = Arc::new(ThreadRecordingDevice {
            identified_on: Mutex::new(None),
        });
        let source = ScriptedSource::new(vec![SourceEvent::Device(DeviceEvent {
            device: device.clone(),
            attached: true,
        })]);
        let (_tx, rx) = watch::channel(false);

        let report = DispatchLoop::new(source, transport).run(rx).await.unwrap();

        assert_eq!(report.devices_identified, 1);
        let identified_on = device.identified_on.lock().unwrap().expect("identified");
        assert_ne!(identified_on, std::thread::current().id());
    }

    #[tokio::test]
    async fn detach_is_logged_without_identifying() {
        let transport = Arc::new(RecordingTransport::default());
        let source = ScriptedSource::new(vec![
            SourceEvent::Device(DeviceEvent {
                device: SimDevice::failing("device#1"),
                attached: false,
            }),
            frame(1, vec![hand(HandSide::Left, 0.0)]),
        ]);
        let (_tx, rx) = watch::channel(false);

        let report = DispatchLoop::new(source, transport.clone())
            .run(rx)
            .await
            .unwrap();

        assert_eq!(report.devices_identified, 0);
        assert_eq!(report.device_failures, 0);
        assert_eq!(report.frames, 1);
        assert_eq!(transport.topics().len(), 2);
    }

    #[tokio::test]
    async fn send_failures_are_counted_and_loop_continues() {
        let transport = Arc::new(RecordingTransport::failing());
        let source = ScriptedSource::new(vec![
            frame(1, vec![hand(HandSide::Left, 0.0)]),
            frame(2, vec![hand(HandSide::Right, 0.0)]),
        ]);
        let (_tx, rx) = watch::channel(false);

        let report = DispatchLoop::new(source, transport).run(rx).await.unwrap();

        assert_eq!(report.frames, 2);
        assert_eq!(report.send_failures, 4);
        assert_eq!(report.messages_sent, 0);
    }

    #[tokio::test]
    async fn unrecognized_side_is_skipped() {
        let transport = Arc::new(RecordingTransport::default());
        let source = ScriptedSource::new(vec![frame(
            1,
            vec![hand(HandSide::Other(5), 0.0), hand(HandSide::Left, 1.0)],
        )]);
        let (_tx, rx) = watch::channel(false);

        let report = DispatchLoop::new(source, transport.clone())
            .run(rx)
            .await
            .unwrap();

        assert_eq!(report.rejected_hands, 1);
        assert_eq!(
            transport.topics(),
            vec!["/hand/left/position", "/hand/left/orientation"]
        );
    }

    #[tokio::test]
    async fn interrupt_while_idle_stops_cleanly() {
        let transport = Arc::new(RecordingTransport::default());
        let source = ScriptedSource::new(Vec::new()).hold_open();
        let closes = source.close_counter();
        let (tx, rx) = watch::channel(false);

        let dispatch = DispatchLoop::new(source, transport.clone());
        let mut state = dispatch.subscribe_state();
        let handle = tokio::spawn(dispatch.run(rx));

        state
            .wait_for(|s| *s == DispatchState::Running)
            .await
            .unwrap();
        tx.send(true).unwrap();

        let report = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop must stop promptly")
            .unwrap()
            .unwrap();

        assert_eq!(report.final_state, DispatchState::Terminated);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(transport.topics().is_empty());
    }

    #[tokio::test]
    async fn interrupt_during_frame_stops_remaining_sends() {
        let (tx, rx) = watch::channel(false);
        let transport = Arc::new(InterruptingTransport {
            sent: Mutex::new(Vec::new()),
            interrupt: tx,
        });
        let source = ScriptedSource::new(vec![
            frame(1, vec![hand(HandSide::Left, 1.0), hand(HandSide::Right, 2.0)]),
            frame(2, vec![hand(HandSide::Left, 3.0)]),
        ])
        .hold_open();
        let closes = source.close_counter();

        let report = tokio::time::timeout(
            Duration::from_secs(2),
            DispatchLoop::new(source, transport.clone()).run(rx),
        )
        .await
        .expect("loop must stop promptly")
        .unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic().as_str(), "/hand/left/position");
        assert_eq!(report.frames, 1);
        assert_eq!(report.messages_sent, 1);
        assert_eq!(report.final_state, DispatchState::Terminated);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pending_interrupt_discards_queued_frames() {
        let transport = Arc::new(RecordingTransport::default());
        let source = ScriptedSource::new(vec![
            frame(1, vec![hand(HandSide::Left, 0.0)]),
            frame(2, vec![hand(HandSide::Right, 0.0)]),
        ])
        .hold_open();
        let closes = source.close_counter();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = DispatchLoop::new(source, transport.clone())
            .run(rx)
            .await
            .unwrap();

        assert_eq!(report.frames, 0);
        assert!(transport.topics().is_empty());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_shutdown_sender_counts_as_interrupt() {
        let transport = Arc::new(RecordingTransport::default());
        let source = ScriptedSource::new(Vec::new()).hold_open();
        let (tx, rx) = watch::channel(false);

        let dispatch = DispatchLoop::new(source, transport);
        let mut state = dispatch.subscribe_state();
        let handle = tokio::spawn(dispatch.run(rx));
        state
            .wait_for(|s| *s == DispatchState::Running)
            .await
            .unwrap();
        drop(tx);

        let report = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop must stop promptly")
            .unwrap()
            .unwrap();
        assert_eq!(report.final_state, DispatchState::Terminated);
    }

    #[tokio::test]
    async fn overflow_is_reported_as_dropped() {
        let transport = Arc::new(RecordingTransport::default());
        let script = (1..=5)
            .map(|id| frame(id, vec![hand(HandSide::Left, 0.0)]))
            .collect();
        let source = ScriptedSource::new(script);
        let (_tx, rx) = watch::channel(false);

        let report = DispatchLoop::new(source, transport)
            .with_queue_capacity(2)
            .run(rx)
            .await
            .unwrap();

        assert_eq!(report.frames, 2);
        assert_eq!(report.dropped_events, 3);
    }

    #[tokio::test]
    async fn sim_source_reaches_a_udp_receiver() -> Result<(), Box<dyn std::error::Error>> {
        let mut receiver = OscReceiver::bind("127.0.0.1:0".parse()?).await?;
        let transport = Arc::new(OscUdpTransport::bind(receiver.local_addr()?).await?);
        let source = SimTrackingSource::new().with_rate_hz(200.0);
        let closes = source.close_counter();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(DispatchLoop::new(source, transport).run(rx));

        let mut updates = Vec::new();
        while updates.len() < 4 {
            let (_, messages) =
                tokio::time::timeout(Duration::from_secs(2), receiver.recv()).await??;
            for message in messages {
                if let ReceivedMessage::Pose(update) = message {
                    updates.push(update);
                }
            }
        }
        tx.send(true)?;
        let report = tokio::time::timeout(Duration::from_secs(2), handle).await???;

        assert!(report.frames >= 2);
        assert_eq!(report.devices_identified, 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
