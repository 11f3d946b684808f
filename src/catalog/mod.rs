//! Channel/stream/account catalog
//!
//! The resource hierarchy the admission walk runs over, plus the [`Catalog`]
//! trait through which the host supplies it.
//!
//! # Hierarchy
//!
//! ```text
//!    Channel ──► streams: [StreamId]        (ordered by Stream::order)
//!                   │
//!                   ▼
//!    Stream  ──► account: Option<AccountId>
//!                   │
//!                   ▼
//!    Account ──► profiles: [Profile]        (default profile tried first)
//!                   │
//!                   ▼
//!    Profile ──► max_connections (0 = unlimited), is_active, is_default
//! ```

pub mod model;
pub mod provider;

pub use model::{Account, AccountId, Channel, ChannelId, Profile, ProfileId, Stream, StreamId};
pub use provider::{Catalog, MemoryCatalog};
