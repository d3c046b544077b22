//! Shared data model for palmcast: hand samples as reported by a tracking
//! source, the outbound pose messages derived from them, and the global
//! [`PalmError`] type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topic prefix shared by every outbound pose message.
pub const TOPIC_ROOT: &str = "/hand";

/// Which hand a sample belongs to, as reported by the tracking source.
///
/// Vendor SDKs encode the side as a small integer (`0` = left, `1` = right).
/// Anything else is kept as [`HandSide::Other`] so it can be reported instead
/// of being silently folded into one of the two real sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandSide {
    Left,
    Right,
    /// A side code the adapter does not recognise.
    Other(u32),
}

impl HandSide {
    /// Map a raw vendor side code onto a [`HandSide`].
    pub fn from_raw(code: u32) -> Self {
        match code {
            0 => HandSide::Left,
            1 => HandSide::Right,
            other => HandSide::Other(other),
        }
    }

    /// The literal used inside topic strings (`"left"` / `"right"`).
    ///
    /// # Errors
    ///
    /// Returns [`PalmError::UnrecognizedHandSide`] for [`HandSide::Other`].
    pub fn label(self) -> Result<&'static str, PalmError> {
        match self {
            HandSide::Left => Ok("left"),
            HandSide::Right => Ok("right"),
            HandSide::Other(code) => Err(PalmError::UnrecognizedHandSide(code)),
        }
    }
}

/// Palm position in millimetres, tracking-device coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Palm orientation as a quaternion (w, x, y, z convention).
///
/// Values are passed through exactly as the tracking source reports them;
/// nothing in the send path normalises them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Euclidean norm of the four components.
    pub fn norm(self) -> f32 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit-length copy of this quaternion.  A zero quaternion has no
    /// direction and maps to the identity.
    pub fn normalized(self) -> Self {
        let n = self.norm();
        if n <= f32::EPSILON {
            return Self::identity();
        }
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// One detected hand in one tracking frame, reduced to its palm pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HandSample {
    pub side: HandSide,
    /// Palm centre in millimetres.
    pub position: Vec3,
    pub orientation: Quaternion,
}

/// One sampled instant of tracking data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
    /// Monotonic frame counter assigned by the tracking source.
    pub id: u64,
    /// Source timestamp in microseconds.
    pub timestamp_us: i64,
    /// Hands in the order the source reported them.  No upper bound.
    pub hands: Vec<HandSample>,
}

/// Tracking profile applied to the source at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackingMode {
    /// Device lying face-up on a desk.
    #[default]
    Desktop,
    /// Device mounted on a headset.
    HeadMounted,
    /// Device above a screen, facing the user.
    ScreenTop,
}

/// Identity read from a tracking device once it has been opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial: String,
}

/// Connection state of the tracking service as reported by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Lost,
}

/// The kind of data carried by an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoseKind {
    Position,
    Orientation,
}

impl PoseKind {
    /// Number of float arguments every message of this kind carries.
    pub fn arity(self) -> usize {
        match self {
            PoseKind::Position => 3,
            PoseKind::Orientation => 4,
        }
    }
}

/// A validated outbound topic: one of `/hand/{left,right}/{position,orientation}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic {
    side: HandSide,
    kind: PoseKind,
    path: &'static str,
}

impl Topic {
    /// Build the topic for `side` and `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`PalmError::UnrecognizedHandSide`] when `side` is not left or
    /// right.
    pub fn new(side: HandSide, kind: PoseKind) -> Result<Self, PalmError> {
        let path = match (side, kind) {
            (HandSide::Left, PoseKind::Position) => "/hand/left/position",
            (HandSide::Left, PoseKind::Orientation) => "/hand/left/orientation",
            (HandSide::Right, PoseKind::Position) => "/hand/right/position",
            (HandSide::Right, PoseKind::Orientation) => "/hand/right/orientation",
            (HandSide::Other(code), _) => return Err(PalmError::UnrecognizedHandSide(code)),
        };
        Ok(Self { side, kind, path })
    }

    /// Parse a wire address back into a topic.  Returns `None` for anything
    /// that is not one of the four pose topics.
    pub fn parse(addr: &str) -> Option<Self> {
        let rest = addr.strip_prefix(TOPIC_ROOT)?.strip_prefix('/')?;
        let (side, kind) = rest.split_once('/')?;
        let side = match side {
            "left" => HandSide::Left,
            "right" => HandSide::Right,
            _ => return None,
        };
        let kind = match kind {
            "position" => PoseKind::Position,
            "orientation" => PoseKind::Orientation,
            _ => return None,
        };
        Self::new(side, kind).ok()
    }

    pub fn side(&self) -> HandSide {
        self.side
    }

    pub fn kind(&self) -> PoseKind {
        self.kind
    }

    pub fn as_str(&self) -> &'static str {
        self.path
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path)
    }
}

/// A pose message ready for the wire: a topic plus its float arguments.
///
/// The payload length always matches [`PoseKind::arity`] of the topic.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    topic: Topic,
    payload: Vec<f32>,
}

impl OutboundMessage {
    /// Build a message, checking the payload length against the topic.
    ///
    /// # Errors
    ///
    /// Returns [`PalmError::InvalidPayload`] on an arity mismatch.
    pub fn new(topic: Topic, payload: Vec<f32>) -> Result<Self, PalmError> {
        let expected = topic.kind().arity();
        if payload.len() != expected {
            return Err(PalmError::InvalidPayload {
                topic: topic.as_str().to_string(),
                expected,
                actual: payload.len(),
            });
        }
        Ok(Self { topic, payload })
    }

    /// `[x, y, z]` in millimetres, untransformed.
    pub fn position(side: HandSide, position: Vec3) -> Result<Self, PalmError> {
        let topic = Topic::new(side, PoseKind::Position)?;
        Ok(Self {
            topic,
            payload: vec![position.x, position.y, position.z],
        })
    }

    /// `[w, x, y, z]`, real part first, untransformed.
    pub fn orientation(side: HandSide, orientation: Quaternion) -> Result<Self, PalmError> {
        let topic = Topic::new(side, PoseKind::Orientation)?;
        Ok(Self {
            topic,
            payload: vec![orientation.w, orientation.x, orientation.y, orientation.z],
        })
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn payload(&self) -> &[f32] {
        &self.payload
    }
}

/// Global error type for the tracking-to-network bridge.
#[derive(Error, Debug)]
pub enum PalmError {
    #[error("Could not open device {device}: {details}")]
    DeviceOpen { device: String, details: String },

    #[error("Unrecognized hand side code {0}")]
    UnrecognizedHandSide(u32),

    #[error("Tracking connection failed to open: {0}")]
    ConnectionOpen(String),

    #[error("Transport bind error: {0}")]
    TransportBind(String),

    #[error("Transport send error: {0}")]
    TransportSend(String),

    #[error("Transport receive error: {0}")]
    TransportRecv(String),

    #[error("OSC encode error: {0}")]
    Encode(String),

    #[error("OSC decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Payload for {topic} has {actual} values, expected {expected}")]
    InvalidPayload {
        topic: String,
        expected: usize,
        actual: usize,
    },
}
