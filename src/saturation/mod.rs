//! Saturation tracking
//!
//! When the admission walk finds every eligible profile full, the channel is
//! marked saturated for a TTL. While the mark is live, later consumers are
//! steered to the fallback feed instead of re-walking a pool known to be
//! exhausted. Marks survive restarts via a JSON state file.
//!
//! # Lifecycle
//!
//! ```text
//!   admit() fails          mark()           TTL elapses
//!        │                   │                   │
//!        ▼                   ▼                   ▼
//!   ┌─────────┐    ┌──────────────────┐    ┌──────────┐
//!   │ absent  │───►│ live (count ≥ 1) │───►│  stale   │──► removed on
//!   └─────────┘    │ saturated when   │    └──────────┘    read or sweep
//!                  │ count ≥ threshold│
//!                  └──────────────────┘
//! ```
//!
//! Threshold crossings and expiries are reported to a [`ChannelReconciler`]
//! so the host can apply and remove the fallback feed.

pub mod entry;
pub mod store;

pub use entry::SaturationEntry;
pub use store::{ChannelReconciler, SaturationStore};
