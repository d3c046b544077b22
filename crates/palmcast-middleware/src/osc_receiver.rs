//! Receive side of the pose protocol.
//!
//! [`decode_datagram`] turns one UDP datagram into the pose updates it
//! carries; [`HandPoseBoard`] keeps the most recent pose per hand; and
//! [`OscReceiver`] ties both to a listening socket.  Anything that is not one
//! of the four pose topics with the expected arity is surfaced as
//! [`ReceivedMessage::Unrecognized`] with each argument rendered as
//! `type:value`, so a monitor can print it instead of dropping it.

use std::net::SocketAddr;

use palmcast_types::{HandSide, PalmError, PoseKind, Quaternion, Topic, Vec3};
use rosc::{OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;

/// Largest payload a UDP datagram can carry over IPv4.
const MAX_DATAGRAM_BYTES: usize = 65_507;

/// A decoded pose message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PoseUpdate {
    Position { side: HandSide, position: Vec3 },
    Orientation { side: HandSide, orientation: Quaternion },
}

/// One message found in a datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceivedMessage {
    Pose(PoseUpdate),
    Unrecognized { addr: String, args: Vec<String> },
}

/// Decode every message in `datagram`.  Bundles are flattened in order.
///
/// # Errors
///
/// Returns [`PalmError::Decode`] if the bytes are not a valid OSC packet.
pub fn decode_datagram(datagram: &[u8]) -> Result<Vec<ReceivedMessage>, PalmError> {
    let (_, packet) =
        rosc::decoder::decode_udp(datagram).map_err(|e| PalmError::Decode(format!("{e:?}")))?;
    let mut out = Vec::new();
    flatten(packet, &mut out);
    Ok(out)
}

fn flatten(packet: OscPacket, out: &mut Vec<ReceivedMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push(classify(msg)),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, out);
            }
        }
    }
}

fn classify(msg: OscMessage) -> ReceivedMessage {
    if let Some(update) = as_pose(&msg) {
        return ReceivedMessage::Pose(update);
    }
    ReceivedMessage::Unrecognized {
        args: msg.args.iter().map(describe_arg).collect(),
        addr: msg.addr,
    }
}

fn as_pose(msg: &OscMessage) -> Option<PoseUpdate> {
    let topic = Topic::parse(&msg.addr)?;
    if msg.args.len() != topic.kind().arity() {
        return None;
    }
    let v = msg
        .args
        .iter()
        .map(arg_as_f32)
        .collect::<Option<Vec<f32>>>()?;
    let side = topic.side();
    Some(match topic.kind() {
        PoseKind::Position => PoseUpdate::Position {
            side,
            position: Vec3::new(v[0], v[1], v[2]),
        },
        PoseKind::Orientation => PoseUpdate::Orientation {
            side,
            orientation: Quaternion::new(v[0], v[1], v[2], v[3]),
        },
    })
}

// Numeric arguments of any width are accepted as floats.
fn arg_as_f32(arg: &OscType) -> Option<f32> {
    match arg {
        OscType::Float(v) => Some(*v),
        OscType::Double(v) => Some(*v as f32),
        OscType::Int(v) => Some(*v as f32),
        OscType::Long(v) => Some(*v as f32),
        _ => None,
    }
}

fn describe_arg(arg: &OscType) -> String {
    match arg {
        OscType::Int(v) => format!("int32:{v}"),
        OscType::Long(v) => format!("int64:{v}"),
        OscType::Float(v) => format!("float:{v}"),
        OscType::Double(v) => format!("double:{v}"),
        OscType::String(v) => format!("string:{v}"),
        OscType::Bool(v) => format!("bool:{v}"),
        OscType::Char(v) => format!("char:{v}"),
        OscType::Blob(v) => format!("blob:{} bytes", v.len()),
        OscType::Nil => "nil".to_string(),
        OscType::Inf => "inf".to_string(),
        other => format!("unhandled argument type {other:?}"),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// HandPoseBoard
// ────────────────────────────────────────────────────────────────────────────

/// Latest known pose of one hand.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HandPose {
    pub position: Option<Vec3>,
    pub orientation: Option<Quaternion>,
    /// Number of updates applied to this hand.
    pub updates: u64,
}

/// Latest left and right poses seen on the wire.
#[derive(Debug, Clone, Default)]
pub struct HandPoseBoard {
    left: HandPose,
    right: HandPose,
}

impl HandPoseBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `update`, replacing the previous value of the same kind.
    pub fn apply(&mut self, update: PoseUpdate) {
        match update {
            PoseUpdate::Position { side, position } => {
                if let Some(hand) = self.slot(side) {
                    hand.position = Some(position);
                    hand.updates += 1;
                }
            }
            PoseUpdate::Orientation { side, orientation } => {
                if let Some(hand) = self.slot(side) {
                    hand.orientation = Some(orientation);
                    hand.updates += 1;
                }
            }
        }
    }

    /// The pose recorded for `side`.  `None` for unrecognised sides.
    pub fn pose(&self, side: HandSide) -> Option<&HandPose> {
        match side {
            HandSide::Left => Some(&self.left),
            HandSide::Right => Some(&self.right),
            HandSide::Other(_) => None,
        }
    }

    /// Unit-length copy of the latest orientation for `side`, if any.
    pub fn normalized_orientation(&self, side: HandSide) -> Option<Quaternion> {
        self.pose(side)?.orientation.map(Quaternion::normalized)
    }

    fn slot(&mut self, side: HandSide) -> Option<&mut HandPose> {
        match side {
            HandSide::Left => Some(&mut self.left),
            HandSide::Right => Some(&mut self.right),
            HandSide::Other(_) => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OscReceiver
// ────────────────────────────────────────────────────────────────────────────

/// A UDP socket listening for pose datagrams.
pub struct OscReceiver {
    socket: UdpSocket,
    buffer: Vec<u8>,
}

impl OscReceiver {
    /// Listen on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`PalmError::TransportBind`] if the address is unavailable.
    pub async fn bind(addr: SocketAddr) -> Result<Self, PalmError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| PalmError::TransportBind(format!("listen on {addr}: {e}")))?;
        Ok(Self {
            socket,
            buffer: vec![0u8; MAX_DATAGRAM_BYTES],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, PalmError> {
        self.socket
            .local_addr()
            .map_err(|e| PalmError::TransportBind(e.to_string()))
    }

    /// Wait for the next datagram and decode it.
    ///
    /// # Errors
    ///
    /// [`PalmError::TransportRecv`] on a socket error, [`PalmError::Decode`]
    /// for a malformed datagram.  Neither leaves the receiver unusable.
    pub async fn recv(&mut self) -> Result<(SocketAddr, Vec<ReceivedMessage>), PalmError> {
        let (n, peer) = self
            .socket
            .recv_from(&mut self.buffer)
            .await
            .map_err(|e| PalmError::TransportRecv(e.to_string()))?;
        let messages = decode_datagram(&self.buffer[..n])?;
        Ok((peer, messages))
    }
}
