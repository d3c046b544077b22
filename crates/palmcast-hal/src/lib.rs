//! `palmcast-hal` – Tracking hardware abstraction
//!
//! Everything palmcast knows about the motion-tracking service lives behind
//! the traits in this crate, so a vendor SDK binding can be swapped in without
//! touching the frame adapter or the dispatch loop.
//!
//! # Modules
//!
//! - [`source`] – [`TrackingSource`]: scoped connection, listener
//!   registration and tracking-mode configuration, plus the [`SourceEvent`]
//!   values a source emits.
//! - [`device`] – [`TrackingDevice`]: a physical controller announced by a
//!   device event that can be opened to read its identity.
//! - [`event_queue`] – bounded single-consumer queue the source pushes its
//!   events onto.  Replaces the vendor callback thread with an explicit
//!   channel.
//! - [`service_thread`] – [`ServiceThreadSource`][service_thread::ServiceThreadSource]:
//!   a source whose vendor connection is owned and polled by one thread.
//! - `leap` (feature `leap`) – Ultraleap tracking via LeapC on top of
//!   `service_thread`.
//! - [`sim`] – [`SimTrackingSource`][sim::SimTrackingSource] and
//!   [`ScriptedSource`][sim::ScriptedSource] for running the whole stack
//!   without tracking hardware.

pub mod device;
pub mod event_queue;
#[cfg(feature = "leap")]
pub mod leap;
pub mod service_thread;
pub mod sim;
pub mod source;

pub use device::TrackingDevice;
pub use event_queue::{event_queue, EventReceiver, EventSink, DEFAULT_QUEUE_CAPACITY};
pub use source::{DeviceEvent, SourceEvent, TrackingSource};
