//! Which tracking source the `palmcast` binary streams from.
//!
//! Built with the `leap` feature it connects to the Ultraleap service;
//! otherwise it runs the simulator.

use palmcast_hal::TrackingSource;

#[cfg(feature = "leap")]
pub fn tracking_source() -> palmcast_hal::leap::LeapTrackingSource {
    palmcast_hal::leap::leap_source()
}

#[cfg(not(feature = "leap"))]
pub fn tracking_source() -> palmcast_hal::sim::SimTrackingSource {
    palmcast_hal::sim::SimTrackingSource::new()
}

/// One-line description of `source` for the status output.
pub fn describe(source: &impl TrackingSource) -> String {
    match source.name() {
        "sim" => "sim (simulated hands; build with --features leap for a real controller)".to_string(),
        "leap" => "leap (Ultraleap tracking service)".to_string(),
        other => other.to_string(),
    }
}
