//! Cast CLI Library
//!
//! Shared functionality for the Cast command-line tools: simulation config,
//! a lossy link model, synthetic media, and statistics display.

pub mod config;
pub mod link;
pub mod sim;
pub mod stats;
pub mod synthetic;

pub use config::{LinkConfig, MediaKind, SimConfig};
pub use link::{LinkStats, SimulatedLink};
pub use sim::{run, SimError, SimSnapshot, SimSummary};
pub use stats::{display_compact_stats, display_summary, format_bandwidth, format_bytes};
