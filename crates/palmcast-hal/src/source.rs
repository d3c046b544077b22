//! The `TrackingSource` contract and the events a source emits.
//!
//! A tracking source owns the connection to the vendor tracking service.  The
//! dispatch loop drives it through a fixed startup sequence:
//!
//! 1. [`TrackingSource::open`] – fatal on failure.
//! 2. [`TrackingSource::add_listener`] – hands over the [`EventSink`] that
//!    every frame, device and connection event is pushed through.
//! 3. [`TrackingSource::set_tracking_mode`] – always
//!    [`TrackingMode::Desktop`].
//!
//! and finally [`TrackingSource::close`] on shutdown.
//!
//! Every method is called from the dispatch loop's async task, so none of
//! them may block for longer than a bounded handshake.  Sources that talk to
//! a slow service keep that work on their own thread and only exchange
//! messages with it here.

use std::sync::Arc;

use palmcast_types::{ConnectionState, Frame, PalmError, TrackingMode};

use crate::device::TrackingDevice;
use crate::event_queue::EventSink;

/// A device attach or detach notification.
#[derive(Clone)]
pub struct DeviceEvent {
    pub device: Arc<dyn TrackingDevice>,
    /// `true` when the device was plugged in, `false` when it went away.
    pub attached: bool,
}

impl std::fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEvent")
            .field("device", &self.device.label())
            .field("attached", &self.attached)
            .finish()
    }
}

/// Everything a tracking source can report.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// A new tracking frame.
    Tracking(Frame),
    /// A controller was attached or detached.
    Device(DeviceEvent),
    /// The service connection changed state.  Informational only.
    Connection(ConnectionState),
}

/// Connection to a hand-tracking service.
pub trait TrackingSource: Send {
    /// Human-readable name used in log lines, e.g. `"sim"`.
    fn name(&self) -> &str;

    /// Open the connection to the tracking service.
    ///
    /// # Errors
    ///
    /// Returns [`PalmError::ConnectionOpen`] if the service is unreachable.
    fn open(&mut self) -> Result<(), PalmError>;

    /// Register the sink that receives every event this source produces.
    fn add_listener(&mut self, sink: EventSink);

    /// Apply a tracking profile.
    ///
    /// # Errors
    ///
    /// Returns [`PalmError::ConnectionOpen`] if the service rejects the mode
    /// or the connection is not open.
    fn set_tracking_mode(&mut self, mode: TrackingMode) -> Result<(), PalmError>;

    /// Release the connection.  Must be safe to call from any state,
    /// including before [`open`][Self::open] succeeded, and more than once.
    /// May wait for a worker thread, but only for as long as that thread
    /// needs to notice the request (one production period at most).
    fn close(&mut self);
}
