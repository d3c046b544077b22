//! `palmcast-middleware` – Frame translation and wire transport
//!
//! Turns tracking frames into pose messages and moves them over the network
//! without caring where the frames came from.
//!
//! # Modules
//!
//! - [`adapter`] – the Frame Adapter: a pure per-frame transform from
//!   [`Frame`][palmcast_types::Frame] to an ordered list of
//!   [`OutboundMessage`][palmcast_types::OutboundMessage]s.
//! - [`transport`] – the [`PoseTransport`] trait every outbound transport
//!   implements.
//! - [`osc_transport`] – [`OscUdpTransport`]: one OSC message per UDP
//!   datagram, fire-and-forget.
//! - [`osc_receiver`] – receive-side decoding of the same protocol and a
//!   latest-pose board, used by the monitor.

pub mod adapter;
pub mod osc_receiver;
pub mod osc_transport;
pub mod transport;

pub use adapter::{translate_frame, translate_hand, FrameTranslation};
pub use osc_receiver::{decode_datagram, HandPoseBoard, OscReceiver, PoseUpdate, ReceivedMessage};
pub use osc_transport::OscUdpTransport;
pub use transport::PoseTransport;
