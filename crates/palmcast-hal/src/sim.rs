//! In-process tracking sources for running palmcast without tracking
//! hardware.
//!
//! [`SimTrackingSource`] behaves like a vendor SDK: once opened and given a
//! listener it announces the connection and an attached controller, then
//! streams synthetic palm poses from its own producer thread until closed.
//!
//! [`ScriptedSource`] replays a fixed list of [`SourceEvent`]s and records
//! how it was driven, which makes it the tool of choice for dispatch-loop
//! tests.
//!
//! # Example
//!
//! ```rust
//! use palmcast_hal::sim::SimTrackingSource;
//!
//! let source = SimTrackingSource::new()
//!     .with_rate_hz(50.0)
//!     .one_handed();
//! assert_eq!(source.rate_hz(), 50.0);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use palmcast_types::{
    ConnectionState, DeviceInfo, Frame, HandSample, HandSide, PalmError, Quaternion,
    TrackingMode, Vec3,
};
use tracing::{debug, info, warn};

use crate::device::TrackingDevice;
use crate::event_queue::EventSink;
use crate::source::{DeviceEvent, SourceEvent, TrackingSource};

/// Frame rate of the simulated controller.
pub const DEFAULT_SIM_RATE_HZ: f32 = 100.0;

/// Accepted range for [`SimTrackingSource::with_rate_hz`].
pub const MIN_SIM_RATE_HZ: f32 = 1.0;
pub const MAX_SIM_RATE_HZ: f32 = 1000.0;

// ────────────────────────────────────────────────────────────────────────────
// Simulated device
// ────────────────────────────────────────────────────────────────────────────

/// A simulated controller.  Either identifies with a fixed serial or always
/// fails to open.
pub struct SimDevice {
    label: String,
    serial: String,
    fail_open: bool,
}

impl SimDevice {
    /// A device that opens successfully and reports `serial`.
    pub fn new(label: impl Into<String>, serial: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            serial: serial.into(),
            fail_open: false,
        })
    }

    /// A device whose open always fails, like a controller claimed by
    /// another process.
    pub fn failing(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            serial: String::new(),
            fail_open: true,
        })
    }
}

impl TrackingDevice for SimDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn open_and_identify(&self) -> Result<DeviceInfo, PalmError> {
        if self.fail_open {
            return Err(PalmError::DeviceOpen {
                device: self.label.clone(),
                details: "device is in use".to_string(),
            });
        }
        Ok(DeviceInfo {
            serial: self.serial.clone(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Synthetic motion
// ────────────────────────────────────────────────────────────────────────────

/// Which hands the simulated controller reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimHands {
    Both,
    LeftOnly,
}

/// Build the synthetic frame for time `t_s` seconds after tracking started.
///
/// Each palm circles slowly above the device (millimetres, device
/// coordinates with +Y up) while yawing back and forth about +Y.
pub fn synthetic_frame(id: u64, t_s: f32, hands: SimHands) -> Frame {
    let palm = |side: HandSide, x_offset: f32, phase: f32| {
        let a = t_s + phase;
        let yaw = 0.6 * a.sin();
        HandSample {
            side,
            position: Vec3::new(
                x_offset + 40.0 * a.cos(),
                200.0 + 30.0 * a.sin(),
                20.0 * (0.5 * a).sin(),
            ),
            orientation: Quaternion::new((yaw * 0.5).cos(), 0.0, (yaw * 0.5).sin(), 0.0),
        }
    };

    let mut samples = vec![palm(HandSide::Left, -80.0, 0.0)];
    if hands == SimHands::Both {
        samples.push(palm(HandSide::Right, 80.0, std::f32::consts::PI));
    }
    Frame {
        id,
        timestamp_us: (f64::from(t_s) * 1_000_000.0) as i64,
        hands: samples,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimTrackingSource
// ────────────────────────────────────────────────────────────────────────────

/// A tracking source that synthesises palm poses on a background thread.
pub struct SimTrackingSource {
    rate_hz: f32,
    hands: SimHands,
    device: Arc<dyn TrackingDevice>,
    connected: bool,
    mode: Option<TrackingMode>,
    sink: Option<EventSink>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    close_calls: Arc<AtomicUsize>,
}

impl Default for SimTrackingSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTrackingSource {
    /// A two-handed controller at [`DEFAULT_SIM_RATE_HZ`].
    pub fn new() -> Self {
        Self {
            rate_hz: DEFAULT_SIM_RATE_HZ,
            hands: SimHands::Both,
            device: SimDevice::new("sim#0", "SIM-0000"),
            connected: false,
            mode: None,
            sink: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Emit frames at `rate_hz` instead of the default.  Non-positive and
    /// non-finite rates fall back to the default; anything else is clamped
    /// to [`MIN_SIM_RATE_HZ`]..=[`MAX_SIM_RATE_HZ`].
    pub fn with_rate_hz(mut self, rate_hz: f32) -> Self {
        self.rate_hz = if rate_hz.is_finite() && rate_hz > 0.0 {
            rate_hz.clamp(MIN_SIM_RATE_HZ, MAX_SIM_RATE_HZ)
        } else {
            DEFAULT_SIM_RATE_HZ
        };
        self
    }

    /// Announce a controller that cannot be opened.
    pub fn with_failing_device(mut self) -> Self {
        self.device = SimDevice::failing("sim#0");
        self
    }

    /// Report only the left hand.
    pub fn one_handed(mut self) -> Self {
        self.hands = SimHands::LeftOnly;
        self
    }

    pub fn rate_hz(&self) -> f32 {
        self.rate_hz
    }

    /// The tracking mode most recently applied, if any.
    pub fn tracking_mode(&self) -> Option<TrackingMode> {
        self.mode
    }

    /// Shared counter of [`TrackingSource::close`] calls.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_calls)
    }

    // Start the producer thread once both the connection and a listener exist.
    fn maybe_start(&mut self) {
        if !self.connected || self.worker.is_some() {
            return;
        }
        let Some(sink) = self.sink.take() else {
            return;
        };

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let device = Arc::clone(&self.device);
        let period = Duration::from_secs_f32(1.0 / self.rate_hz);
        let hands = self.hands;

        self.worker = Some(std::thread::spawn(move || {
            sink.emit(SourceEvent::Connection(ConnectionState::Connected));
            sink.emit(SourceEvent::Device(DeviceEvent {
                device,
                attached: true,
            }));

            let started = Instant::now();
            let mut id = 0u64;
            while running.load(Ordering::SeqCst) && !sink.is_closed() {
                id += 1;
                let t = started.elapsed().as_secs_f32();
                sink.emit(SourceEvent::Tracking(synthetic_frame(id, t, hands)));
                std::thread::sleep(period);
            }
            debug!(frames = id, "sim producer thread exiting");
        }));
    }
}

impl TrackingSource for SimTrackingSource {
    fn name(&self) -> &str {
        "sim"
    }

    fn open(&mut self) -> Result<(), PalmError> {
        self.connected = true;
        info!(rate_hz = self.rate_hz, "simulated tracking connection opened");
        self.maybe_start();
        Ok(())
    }

    fn add_listener(&mut self, sink: EventSink) {
        if self.worker.is_some() {
            warn!("sim source already streaming; additional listener ignored");
            return;
        }
        self.sink = Some(sink);
        self.maybe_start();
    }

    fn set_tracking_mode(&mut self, mode: TrackingMode) -> Result<(), PalmError> {
        if !self.connected {
            return Err(PalmError::ConnectionOpen(
                "cannot set tracking mode on a closed connection".to_string(),
            ));
        }
        self.mode = Some(mode);
        Ok(())
    }

    fn close(&mut self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.sink = None;
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("sim producer thread panicked");
        }
        if self.connected {
            info!("simulated tracking connection closed");
        }
        self.connected = false;
    }
}

impl Drop for SimTrackingSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ScriptedSource
// ────────────────────────────────────────────────────────────────────────────

/// A tracking source that emits a fixed list of events as soon as a listener
/// is registered.
///
/// By default the sink is released right after the script is delivered, so
/// the consumer sees the stream end.  Call [`hold_open`][Self::hold_open] to
/// keep the stream alive until [`TrackingSource::close`].
#[derive(Default)]
pub struct ScriptedSource {
    script: Vec<SourceEvent>,
    open_error: Option<String>,
    hold_open: bool,
    opened: bool,
    mode: Option<TrackingMode>,
    sink: Option<EventSink>,
    close_calls: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(script: Vec<SourceEvent>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Make [`TrackingSource::open`] fail with `reason`.
    pub fn failing_open(mut self, reason: impl Into<String>) -> Self {
        self.open_error = Some(reason.into());
        self
    }

    /// Keep the event stream open after the script has been delivered.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn tracking_mode(&self) -> Option<TrackingMode> {
        self.mode
    }

    /// Shared counter of [`TrackingSource::close`] calls.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_calls)
    }
}

impl TrackingSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&mut self) -> Result<(), PalmError> {
        if let Some(reason) = &self.open_error {
            return Err(PalmError::ConnectionOpen(reason.clone()));
        }
        self.opened = true;
        Ok(())
    }

    fn add_listener(&mut self, sink: EventSink) {
        for event in self.script.drain(..) {
            sink.emit(event);
        }
        if self.hold_open {
            self.sink = Some(sink);
        }
    }

    fn set_tracking_mode(&mut self, mode: TrackingMode) -> Result<(), PalmError> {
        if !self.opened {
            return Err(PalmError::ConnectionOpen("connection is not open".to_string()));
        }
        self.mode = Some(mode);
        Ok(())
    }

    fn close(&mut self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.sink = None;
        self.opened = false;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
