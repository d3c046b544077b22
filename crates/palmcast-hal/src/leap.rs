//! Ultraleap tracking through the LeapC bindings in `leaprs`.
//!
//! Enabled by the `leap` feature.  Building it needs the LeapC SDK
//! installed (see the `leaprs` documentation for `LEAPSDK_LIB_PATH`).
//!
//! The LeapC connection is created and polled on the worker thread of a
//! [`ServiceThreadSource`].  Devices are opened on that thread as soon as
//! they are announced, because their handles belong to the connection; the
//! [`TrackingDevice`] handed to the dispatch loop replays that outcome.

use std::sync::Arc;
use std::time::Duration;

use leaprs::{Connection, ConnectionConfig, EventRef, HandType};
use palmcast_types::{
    ConnectionState, DeviceInfo, Frame, HandSample, HandSide, PalmError, Quaternion, TrackingMode,
    Vec3,
};
use tracing::debug;

use crate::device::TrackingDevice;
use crate::service_thread::{ServiceConnection, ServiceConnector, ServiceThreadSource};
use crate::source::{DeviceEvent, SourceEvent};

/// The LeapC-backed tracking source.
pub type LeapTrackingSource = ServiceThreadSource<LeapConnector>;

/// A source that connects to the local Ultraleap tracking service.
pub fn leap_source() -> LeapTrackingSource {
    ServiceThreadSource::new("leap", LeapConnector)
}

/// Opens a LeapC connection with the default configuration.
pub struct LeapConnector;

impl ServiceConnector for LeapConnector {
    type Connection = LeapConnection;

    fn connect(self) -> Result<LeapConnection, PalmError> {
        let mut connection = Connection::create(ConnectionConfig::default())
            .map_err(|e| PalmError::ConnectionOpen(format!("create LeapC connection: {e:?}")))?;
        connection
            .open()
            .map_err(|e| PalmError::ConnectionOpen(format!("open LeapC connection: {e:?}")))?;
        Ok(LeapConnection {
            connection,
            devices_seen: 0,
        })
    }
}

pub struct LeapConnection {
    connection: Connection,
    devices_seen: u32,
}

impl ServiceConnection for LeapConnection {
    fn poll(&mut self, timeout: Duration) -> Result<Option<SourceEvent>, PalmError> {
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let message = match self.connection.poll(timeout_ms) {
            Ok(message) => message,
            Err(leaprs::Error::Timeout) => return Ok(None),
            Err(e) => return Err(PalmError::TransportRecv(format!("LeapC poll: {e:?}"))),
        };

        let event = match message.event() {
            EventRef::Connection(_) => SourceEvent::Connection(ConnectionState::Connected),
            EventRef::ConnectionLost(_) => SourceEvent::Connection(ConnectionState::Lost),
            EventRef::Tracking(tracking) => {
                let hands = tracking
                    .hands()
                    .iter()
                    .map(|hand| {
                        let palm = hand.palm();
                        hand_sample(
                            hand_side(hand.hand_type()),
                            palm.position().array(),
                            palm.orientation().array(),
                        )
                    })
                    .collect();
                SourceEvent::Tracking(Frame {
                    id: tracking.tracking_frame_id as u64,
                    timestamp_us: tracking.info.timestamp,
                    hands,
                })
            }
            EventRef::Device(device_event) => {
                self.devices_seen += 1;
                let label = format!("leap#{}", self.devices_seen);
                let identity = device_event
                    .device()
                    .open()
                    .and_then(|device| device.get_info())
                    .map(|info| DeviceInfo {
                        serial: info.serial().unwrap_or("unknown").to_string(),
                    })
                    .map_err(|e| format!("{e:?}"));
                SourceEvent::Device(DeviceEvent {
                    device: Arc::new(LeapDevice { label, identity }),
                    attached: true,
                })
            }
            EventRef::DeviceLost(_) => SourceEvent::Device(DeviceEvent {
                device: Arc::new(LeapDevice {
                    label: "leap".to_string(),
                    identity: Err("device lost".to_string()),
                }),
                attached: false,
            }),
            _ => {
                debug!("LeapC event ignored");
                return Ok(None);
            }
        };
        Ok(Some(event))
    }

    fn set_tracking_mode(&mut self, mode: TrackingMode) -> Result<(), PalmError> {
        let mode = match mode {
            TrackingMode::Desktop => leaprs::TrackingMode::Desktop,
            TrackingMode::HeadMounted => leaprs::TrackingMode::HMD,
            TrackingMode::ScreenTop => leaprs::TrackingMode::ScreenTop,
        };
        self.connection
            .set_tracking_mode(mode)
            .map_err(|e| PalmError::ConnectionOpen(format!("set tracking mode: {e:?}")))
    }
}

/// A device that was opened on the LeapC thread when it was announced.
struct LeapDevice {
    label: String,
    identity: Result<DeviceInfo, String>,
}

impl TrackingDevice for LeapDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn open_and_identify(&self) -> Result<DeviceInfo, PalmError> {
        self.identity.clone().map_err(|details| PalmError::DeviceOpen {
            device: self.label.clone(),
            details,
        })
    }
}

fn hand_side(hand_type: HandType) -> HandSide {
    match hand_type {
        HandType::Left => HandSide::Left,
        HandType::Right => HandSide::Right,
    }
}

/// LeapC reports quaternions as `[x, y, z, w]`.
fn hand_sample(side: HandSide, position: [f32; 3], orientation_xyzw: [f32; 4]) -> HandSample {
    let [x, y, z] = position;
    let [qx, qy, qz, qw] = orientation_xyzw;
    HandSample {
        side,
        position: Vec3::new(x, y, z),
        orientation: Quaternion::new(qw, qx, qy, qz),
    }
}
