//! `palmcast-runtime` – The dispatch loop and process-level plumbing
//!
//! - [`dispatch_loop`] – [`DispatchLoop`]: connect to a
//!   [`TrackingSource`][palmcast_hal::TrackingSource], translate every frame,
//!   send the result over a [`PoseTransport`][palmcast_middleware::PoseTransport],
//!   and shut down cleanly on interrupt.
//! - [`telemetry`] – tracing subscriber and optional OTLP export.

pub mod dispatch_loop;
pub mod telemetry;

pub use dispatch_loop::{DispatchLoop, DispatchReport, DispatchState};
pub use telemetry::{init_tracing, TracerProviderGuard};
