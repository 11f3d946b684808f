//! Synthetic fallback stream served over HTTP.
//!
//! When every upstream profile is at capacity, players are pointed at this
//! server instead of a dead URL. It answers with an endless MPEG-TS body
//! rendered from a still image, so the player keeps playing while slots
//! free up.
//!
//! ```text
//!   GET /stream.ts ──► FallbackServer
//!                          │ headers first, then body
//!                          ▼
//!                    PipelineSupervisor ──► encoder child (ffmpeg)
//!                          │    ▲   persistent restart on -t cap,
//!                          │    │   backoff on crash
//!                          ▼    │
//!                    FallbackStream ◄── mpsc chunks
//!                          │
//!                          ▼
//!                    chunked HTTP body
//! ```
//!
//! Every viewer gets its own pipeline; disconnecting tears the encoder
//! child down. Without an encoder or an image the body degrades to timed
//! MPEG-TS null packets, which players treat as a quiet, healthy stream.

pub mod encoder;
pub mod image;
pub mod pipeline;
pub mod server;
pub mod ts;

pub use encoder::{EncoderCapabilities, EncoderCommand};
pub use image::{ImageSource, StaticImage};
pub use pipeline::{FallbackStream, PipelineSupervisor};
pub use server::FallbackServer;
pub use ts::{null_packet, CHUNK_SIZE, PACKET_SIZE};
