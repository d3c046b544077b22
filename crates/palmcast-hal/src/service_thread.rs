//! [`ServiceThreadSource`] – a [`TrackingSource`] whose vendor connection
//! lives on a dedicated thread.
//!
//! Vendor tracking APIs are synchronous and their connection handles are
//! usually not `Send`, so the connection is created, polled and dropped on
//! one worker thread.  The [`TrackingSource`] methods only exchange messages
//! with that thread over `std::sync::mpsc`, which keeps every call short
//! enough for the async dispatch loop:
//!
//! - `open` waits for the worker to report whether the connection opened,
//!   bounded by [`OPEN_TIMEOUT`].
//! - `set_tracking_mode` waits for the worker's answer, bounded by
//!   [`REPLY_TIMEOUT`].
//! - `close` waits for the worker to finish its current poll, which takes at
//!   most [`POLL_TIMEOUT`].
//!
//! Events polled before a listener is registered are held back (up to
//! [`PENDING_LIMIT`]) and delivered once it is.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;

use palmcast_types::{PalmError, TrackingMode};
use tracing::{debug, info, warn};

use crate::event_queue::EventSink;
use crate::source::{SourceEvent, TrackingSource};

/// Longest single wait inside [`ServiceConnection::poll`].
pub const POLL_TIMEOUT: Duration = Duration::from_millis(50);
/// How long `open` waits for the worker to report back.
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
/// How long `set_tracking_mode` waits for the worker's answer.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(1);
/// Events kept while no listener is registered.
pub const PENDING_LIMIT: usize = 64;

/// A live connection to a tracking service, owned by the worker thread.
pub trait ServiceConnection {
    /// Wait up to `timeout` for the next event.  `Ok(None)` means nothing
    /// arrived in time.
    ///
    /// # Errors
    ///
    /// Any [`PalmError`]; the worker logs it and keeps polling.
    fn poll(&mut self, timeout: Duration) -> Result<Option<SourceEvent>, PalmError>;

    /// # Errors
    ///
    /// [`PalmError::ConnectionOpen`] if the service rejects the mode.
    fn set_tracking_mode(&mut self, mode: TrackingMode) -> Result<(), PalmError>;
}

/// Opens a [`ServiceConnection`].  Runs on the worker thread.
pub trait ServiceConnector: Send + 'static {
    type Connection: ServiceConnection;

    /// # Errors
    ///
    /// [`PalmError::ConnectionOpen`] if the service is unreachable.
    fn connect(self) -> Result<Self::Connection, PalmError>;
}

enum Command {
    Listen(EventSink),
    SetMode(TrackingMode, Sender<Result<(), PalmError>>),
    Stop,
}

/// [`TrackingSource`] backed by a worker thread that owns the connection.
pub struct ServiceThreadSource<C: ServiceConnector> {
    name: String,
    connector: Option<C>,
    commands: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    close_calls: Arc<AtomicUsize>,
}

impl<C: ServiceConnector> ServiceThreadSource<C> {
    pub fn new(name: impl Into<String>, connector: C) -> Self {
        Self {
            name: name.into(),
            connector: Some(connector),
            commands: None,
            worker: None,
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of [`TrackingSource::close`] calls.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_calls)
    }

    fn send(&self, command: Command) -> Result<(), PalmError> {
        self.commands
            .as_ref()
            .ok_or_else(|| PalmError::ConnectionOpen(format!("{} is not open", self.name)))?
            .send(command)
            .map_err(|_| PalmError::ConnectionOpen(format!("{} worker has stopped", self.name)))
    }

    fn stop_worker(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Stop);
        }
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!(source = %self.name, "tracking worker thread panicked");
        }
    }
}

impl<C: ServiceConnector> TrackingSource for ServiceThreadSource<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(), PalmError> {
        let connector = self
            .connector
            .take()
            .ok_or_else(|| PalmError::ConnectionOpen(format!("{} was already opened", self.name)))?;
        let (commands, inbox) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let name = self.name.clone();

        let worker = std::thread::Builder::new()
            .name(format!("{name}-tracking"))
            .spawn(move || run_worker(&name, connector, inbox, ready_tx))
            .map_err(|e| PalmError::ConnectionOpen(format!("spawn tracking thread: {e}")))?;
        self.commands = Some(commands);
        self.worker = Some(worker);

        let opened = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(PalmError::ConnectionOpen(format!(
                "{} did not answer within {OPEN_TIMEOUT:?}",
                self.name
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(PalmError::ConnectionOpen(format!(
                "{} worker exited during open",
                self.name
            ))),
        };
        if opened.is_err() {
            self.stop_worker();
        }
        opened
    }

    fn add_listener(&mut self, sink: EventSink) {
        if let Err(e) = self.send(Command::Listen(sink)) {
            warn!(error = %e, "listener not registered");
        }
    }

    fn set_tracking_mode(&mut self, mode: TrackingMode) -> Result<(), PalmError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(Command::SetMode(mode, reply_tx))?;
        reply_rx.recv_timeout(REPLY_TIMEOUT).map_err(|_| {
            PalmError::ConnectionOpen(format!("{} did not confirm tracking mode", self.name))
        })?
    }

    fn close(&mut self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.stop_worker();
    }
}

impl<C: ServiceConnector> Drop for ServiceThreadSource<C> {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

fn run_worker<C: ServiceConnector>(
    name: &str,
    connector: C,
    inbox: Receiver<Command>,
    ready: Sender<Result<(), PalmError>>,
) {
    let mut connection = match connector.connect() {
        Ok(connection) => connection,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }
    info!(source = name, "tracking worker started");

    let mut sink: Option<EventSink> = None;
    let mut pending: Vec<SourceEvent> = Vec::new();
    loop {
        loop {
            match inbox.try_recv() {
                Ok(Command::Listen(listener)) => {
                    for event in pending.drain(..) {
                        listener.emit(event);
                    }
                    sink = Some(listener);
                }
                Ok(Command::SetMode(mode, reply)) => {
                    let _ = reply.send(connection.set_tracking_mode(mode));
                }
                Ok(Command::Stop) | Err(TryRecvError::Disconnected) => {
                    debug!(source = name, "tracking worker stopping");
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match connection.poll(POLL_TIMEOUT) {
            Ok(Some(event)) => match &sink {
                Some(sink) => {
                    sink.emit(event);
                }
                None if pending.len() < PENDING_LIMIT => pending.push(event),
                None => debug!(source = name, "no listener yet; event dropped"),
            },
            Ok(None) => {}
            Err(e) => {
                warn!(source = name, error = %e, "tracking poll failed");
                std::thread::sleep(POLL_TIMEOUT);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_queue::event_queue;
    use palmcast_types::{ConnectionState, Frame};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed list of events, then idles.
    struct Replay {
        events: VecDeque<SourceEvent>,
        modes: Arc<Mutex<Vec<TrackingMode>>>,
        refuse_modes: bool,
    }

    impl ServiceConnection for Replay {
        fn poll(&mut self, timeout: Duration) -> Result<Option<SourceEvent>, PalmError> {
            match self.events.pop_front() {
                Some(event) => Ok(Some(event)),
                None => {
                    std::thread::sleep(timeout);
                    Ok(None)
                }
            }
        }

        fn set_tracking_mode(&mut self, mode: TrackingMode) -> Result<(), PalmError> {
            if self.refuse_modes {
                return Err(PalmError::ConnectionOpen("mode refused".to_string()));
            }
            self.modes.lock().unwrap().push(mode);
            Ok(())
        }
    }

    struct ReplayConnector {
        events: Vec<SourceEvent>,
        modes: Arc<Mutex<Vec<TrackingMode>>>,
        refuse_modes: bool,
        fail: bool,
    }

    impl ReplayConnector {
        fn new(events: Vec<SourceEvent>) -> Self {
            Self {
                events,
                modes: Arc::default(),
                refuse_modes: false,
                fail: false,
            }
        }
    }

    impl ServiceConnector for ReplayConnector {
        type Connection = Replay;

        fn connect(self) -> Result<Replay, PalmError> {
            if self.fail {
                return Err(PalmError::ConnectionOpen("service not running".to_string()));
            }
            Ok(Replay {
                events: self.events.into(),
                modes: self.modes,
                refuse_modes: self.refuse_modes,
            })
        }
    }

    fn tracking(id: u64) -> SourceEvent {
        SourceEvent::Tracking(Frame {
            id,
            timestamp_us: 0,
            hands: Vec::new(),
        })
    }

    #[tokio::test]
    async fn events_polled_before_listener_are_delivered() {
        let mut source = ServiceThreadSource::new(
            "replay",
            ReplayConnector::new(vec![
                SourceEvent::Connection(ConnectionState::Connected),
                tracking(1),
                tracking(2),
            ]),
        );
        source.open().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let (sink, mut events) = event_queue(8);
        source.add_listener(sink);

        assert!(matches!(
            events.recv().await,
            Some(SourceEvent::Connection(ConnectionState::Connected))
        ));
        assert!(matches!(events.recv().await, Some(SourceEvent::Tracking(f)) if f.id == 1));
        assert!(matches!(events.recv().await, Some(SourceEvent::Tracking(f)) if f.id == 2));

        source.close();
        assert_eq!(events.recv().await.map(|_| ()), None);
    }

    #[test]
    fn connect_failure_is_reported_by_open() {
        let mut connector = ReplayConnector::new(Vec::new());
        connector.fail = true;
        let mut source = ServiceThreadSource::new("replay", connector);

        let err = source.open().unwrap_err();
        assert!(matches!(err, PalmError::ConnectionOpen(msg) if msg.contains("not running")));

        source.close();
        assert_eq!(source.close_counter().load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tracking_mode_is_applied_on_the_worker() {
        let connector = ReplayConnector::new(Vec::new());
        let modes = Arc::clone(&connector.modes);
        let mut source = ServiceThreadSource::new("replay", connector);

        assert!(source.set_tracking_mode(TrackingMode::Desktop).is_err());
        source.open().unwrap();
        source.set_tracking_mode(TrackingMode::Desktop).unwrap();
        source.close();

        assert_eq!(*modes.lock().unwrap(), vec![TrackingMode::Desktop]);
    }

    #[test]
    fn refused_mode_is_returned_to_the_caller() {
        let mut connector = ReplayConnector::new(Vec::new());
        connector.refuse_modes = true;
        let mut source = ServiceThreadSource::new("replay", connector);
        source.open().unwrap();

        assert!(source.set_tracking_mode(TrackingMode::HeadMounted).is_err());
        source.close();
    }

    #[test]
    fn second_open_is_rejected_and_close_is_repeatable() {
        let mut source = ServiceThreadSource::new("replay", ReplayConnector::new(Vec::new()));
        source.open().unwrap();
        assert!(source.open().is_err());

        source.close();
        source.close();
        assert_eq!(source.close_counter().load(Ordering::SeqCst), 2);
    }
}
