//! The Frame Adapter.
//!
//! Every hand in a frame becomes exactly two messages, position first, in the
//! order the tracking source reported the hands:
//!
//! | Topic | Payload |
//! |---|---|
//! | `/hand/{side}/position` | `[x, y, z]` millimetres |
//! | `/hand/{side}/orientation` | `[w, x, y, z]` quaternion |
//!
//! Values are forwarded untouched: no unit conversion, no axis remapping, no
//! smoothing and no de-duplication against earlier frames.  The adapter does
//! no I/O; sending is the dispatch loop's job.

use palmcast_types::{Frame, HandSample, OutboundMessage, PalmError};

/// Result of translating one frame.
#[derive(Debug, Default)]
pub struct FrameTranslation {
    /// Messages in send order.
    pub messages: Vec<OutboundMessage>,
    /// Hands that were skipped, one error per skipped hand.
    pub rejected: Vec<PalmError>,
}

/// Translate one hand into its `(position, orientation)` message pair.
///
/// # Errors
///
/// Returns [`PalmError::UnrecognizedHandSide`] when the sample's side is
/// neither left nor right.
pub fn translate_hand(sample: &HandSample) -> Result<[OutboundMessage; 2], PalmError> {
    Ok([
        OutboundMessage::position(sample.side, sample.position)?,
        OutboundMessage::orientation(sample.side, sample.orientation)?,
    ])
}

/// Translate a whole frame.
///
/// A hand with an unrecognised side is skipped and reported in
/// [`FrameTranslation::rejected`]; the remaining hands are still translated.
pub fn translate_frame(frame: &Frame) -> FrameTranslation {
    let mut out = FrameTranslation {
        messages: Vec::with_capacity(frame.hands.len() * 2),
        rejected: Vec::new(),
    };
    for sample in &frame.hands {
        match translate_hand(sample) {
            Ok(pair) => out.messages.extend(pair),
            Err(e) => out.rejected.push(e),
        }
    }
    out
}
