//! Admission control
//!
//! Decides whether a channel may take one of the finite upstream connection
//! slots, and what to hand the consumer when it cannot.
//!
//! # Decision flow
//!
//! ```text
//!   admit(channel)
//!        │
//!        ├─ existing assignment ────────────► Granted (reused)
//!        │
//!        ├─ walk streams ✕ profiles
//!        │      first free slot ────────────► Granted (recorded, counted)
//!        │
//!        └─ every profile full
//!               ├─ not yet saturated ──────► mark + Err(AllProfilesMaxed)
//!               └─ saturated ──────────────► Degraded (fallback feed)
//! ```
//!
//! The caller starts the real upstream on `Granted` and points the client at
//! the fallback server on `Degraded`. `release` gives the slot back when the
//! host stops the channel.

pub mod controller;
pub mod error;
pub mod ledger;

pub use controller::{Admission, AdmissionController};
pub use error::AdmissionError;
pub use ledger::{AdmissionLedger, Assignment};
