//! Generic `TrackingDevice` trait for hand-tracking controllers.

use palmcast_types::{DeviceInfo, PalmError};

/// A tracking controller announced by the tracking service.
///
/// Device handles travel inside [`DeviceEvent`][crate::source::DeviceEvent]s,
/// so implementations must be shareable across threads.
pub trait TrackingDevice: Send + Sync {
    /// Short label usable before the device has been opened, e.g. the
    /// service-assigned handle `"device#1"`.
    fn label(&self) -> &str;

    /// Open the device, read its identity and close it again.
    ///
    /// May block on the tracking service.  The dispatch loop calls it from
    /// the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns [`PalmError::DeviceOpen`] if the device cannot be opened (e.g.
    /// it is claimed by another process or was unplugged mid-handshake).
    fn open_and_identify(&self) -> Result<DeviceInfo, PalmError>;
}
