//! The outbound transport seam.
//!
//! The dispatch loop never speaks a wire protocol itself.  It owns one
//! [`PoseTransport`] and hands each [`OutboundMessage`] to it in order, one
//! call per message.

use async_trait::async_trait;
use palmcast_types::{OutboundMessage, PalmError};

/// Every outbound transport must implement this trait.
///
/// # Contract
///
/// * One `send` call puts exactly one message on the wire; no batching.
/// * Sends are fire-and-forget.  A failure is reported to the caller but no
///   retry is attempted.
#[async_trait]
pub trait PoseTransport: Send + Sync {
    /// Transmit a single message.
    async fn send(&self, message: &OutboundMessage) -> Result<(), PalmError>;
}
