//! `palmcast-cli` – shared pieces of the `palmcast` and `palmcast-monitor`
//! binaries.

pub mod config;
pub mod shutdown;
pub mod tracking;
