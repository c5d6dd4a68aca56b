//! # EmberKV
//!
//! An embeddable, persistent key-value store with:
//! - Append-only log segments for all writes
//! - An in-memory index (Keydir) locating the latest record per key
//! - Single-seek reads with CRC verification
//! - Crash recovery by replaying segments
//! - Online compaction that reclaims superseded records and tombstones
//! - A RESP-compatible TCP front-end
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   RESP Server / CLI                          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       Engine                                 │
//! │             (Single Writer / Multi Reader)                   │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │   Keydir    │          │ Segment Set │
//!   │ (In-Memory) │          │  (Append)   │
//!   └─────────────┘          └──────┬──────┘
//!                                   │
//!                                   ▼
//!                           ┌─────────────┐
//!                           │  Compactor  │
//!                           │   (Merge)   │
//!                           └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod compact;
pub mod engine;
pub mod keydir;
pub mod network;
pub mod protocol;
pub mod record;
pub mod segment;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use compact::Compactor;
pub use config::Config;
pub use engine::Engine;
pub use error::{EmberError, Result};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
