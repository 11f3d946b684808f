//! Stream admission control with a synthesized fallback feed.
//!
//! spillway sits between an IPTV front end and a pool of upstream
//! accounts. Watch requests are admitted against per-profile connection
//! caps; when every profile a channel can use is at capacity, the channel
//! is marked saturated for a TTL and viewers can be pointed at a built-in
//! HTTP server that renders an endless MPEG-TS stream from a still image.
//! Players show a slate instead of an error while slots free up.
//!
//! # Architecture
//!
//! ```text
//!   watch request ──► AdmissionController ──► Granted { stream, profile }
//!                       │          │
//!                 AdmissionLedger  └─ pool exhausted
//!                 (slots+counters)            │
//!                                             ▼
//!                                      SaturationStore ── JSON state file,
//!                                             │           TTL sweep task
//!                                             ▼
//!                                      FallbackServer ◄── GET /stream.ts
//!                                             │
//!                                      PipelineSupervisor ──► encoder child
//! ```
//!
//! The admission side and the fallback side share only the
//! [`SaturationStore`]; either can be used on its own.

pub mod admission;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fallback;
pub mod saturation;

pub use admission::{Admission, AdmissionController, AdmissionError, Assignment};
pub use catalog::{Catalog, MemoryCatalog};
pub use config::{Config, SaturationPolicy};
pub use error::{Error, Result};
pub use fallback::{FallbackServer, PipelineSupervisor, StaticImage};
pub use saturation::{ChannelReconciler, SaturationStore};
