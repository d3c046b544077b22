//! OSC-over-UDP pose transport.
//!
//! [`OscUdpTransport`] encodes each [`OutboundMessage`] as an OSC 1.0 message
//! whose address is the topic and whose arguments are 32-bit floats (`,fff`
//! or `,ffff`), and sends it as a single UDP datagram to a fixed destination.
//!
//! UDP is connectionless, so there is nothing to tear down and no delivery
//! guarantee.  Send errors are returned to the caller, which logs them and
//! moves on.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use palmcast_types::{OutboundMessage, PalmError};
use rosc::{OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;
use tracing::trace;

use crate::transport::PoseTransport;

/// Sends pose messages to one fixed `host:port`.
#[derive(Debug)]
pub struct OscUdpTransport {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl OscUdpTransport {
    /// Bind an ephemeral local socket for sending to `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`PalmError::TransportBind`] if no local socket can be bound.
    pub async fn bind(destination: SocketAddr) -> Result<Self, PalmError> {
        let local: SocketAddr = if destination.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| PalmError::TransportBind(format!("bind {local}: {e}")))?;
        Ok(Self {
            socket,
            destination,
        })
    }

    /// Where every message goes.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Encode `message` into the bytes of one OSC datagram.
    ///
    /// # Errors
    ///
    /// Returns [`PalmError::Encode`] if the OSC encoder rejects the message.
    pub fn encode(message: &OutboundMessage) -> Result<Vec<u8>, PalmError> {
        let packet = OscPacket::Message(OscMessage {
            addr: message.topic().as_str().to_string(),
            args: message.payload().iter().copied().map(OscType::Float).collect(),
        });
        rosc::encoder::encode(&packet).map_err(|e| PalmError::Encode(format!("{e:?}")))
    }
}

#[async_trait]
impl PoseTransport for OscUdpTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), PalmError> {
        let datagram = Self::encode(message)?;
        self.socket
            .send_to(&datagram, self.destination)
            .await
            .map_err(|e| {
                PalmError::TransportSend(format!(
                    "{} to {}: {e}",
                    message.topic(),
                    self.destination
                ))
            })?;
        trace!(topic = %message.topic(), bytes = datagram.len(), "sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palmcast_types::{HandSide, Quaternion, Vec3};

    fn unwrap_message(packet: OscPacket) -> OscMessage {
        match packet {
            OscPacket::Message(m) => m,
            OscPacket::Bundle(_) => panic!("expected a plain message"),
        }
    }

    #[test]
    fn encode_uses_float_arguments() {
        let msg = OutboundMessage::position(HandSide::Left, Vec3::new(10.0, 20.0, 30.0)).unwrap();
        let bytes = OscUdpTransport::encode(&msg).unwrap();

        // OSC messages are padded to 4-byte boundaries.
        assert_eq!(bytes.len() % 4, 0);
        let (_, packet) = rosc::decoder::decode_udp(&bytes).unwrap();
        let decoded = unwrap_message(packet);
        assert_eq!(decoded.addr, "/hand/left/position");
        assert_eq!(
            decoded.args,
            vec![
                OscType::Float(10.0),
                OscType::Float(20.0),
                OscType::Float(30.0)
            ]
        );
    }

    #[tokio::test]
    async fn send_delivers_one_datagram_per_message() -> Result<(), Box<dyn std::error::Error>> {
        let receiver = UdpSocket::bind("127.0.0.1:0").await?;
        let transport = OscUdpTransport::bind(receiver.local_addr()?).await?;

        let position = OutboundMessage::position(HandSide::Right, Vec3::new(1.5, -2.0, 3.25))?;
        let orientation =
            OutboundMessage::orientation(HandSide::Right, Quaternion::new(0.5, 0.5, 0.5, 0.5))?;
        transport.send(&position).await?;
        transport.send(&orientation).await?;

        let mut buf = [0u8; 1024];
        let mut addrs = Vec::new();
        for _ in 0..2 {
            let (n, _) = tokio::time::timeout(
                std::time::Duration::from_secs(2),
                receiver.recv_from(&mut buf),
            )
            .await??;
            let (_, packet) = rosc::decoder::decode_udp(&buf[..n])
                .map_err(|e| format!("decode failed: {e:?}"))?;
            let msg = unwrap_message(packet);
            if msg.addr == "/hand/right/orientation" {
                assert_eq!(msg.args[0], OscType::Float(0.5));
                assert_eq!(msg.args.len(), 4);
            }
            addrs.push(msg.addr);
        }
        assert_eq!(addrs, vec!["/hand/right/position", "/hand/right/orientation"]);
        Ok(())
    }

    #[tokio::test]
    async fn destination_is_kept() -> Result<(), Box<dyn std::error::Error>> {
        let dest: SocketAddr = "127.0.0.1:12345".parse()?;
        let transport = OscUdpTransport::bind(dest).await?;
        assert_eq!(transport.destination(), dest);
        Ok(())
    }
}
