//! Keepsake
//!
//! Single-node, file-based persistent memory store for AI agents.
//!
//! # Key features
//! - Durable sharded JSON storage with a write-ahead log and crash-safe
//!   replay
//! - Inverted-index search with BM25 ranking, decay weighting, and an
//!   optional embedding blend
//! - Cross-process safety: directory-based file locks, optimistic version
//!   tracking, atomic writes
//! - Lifecycle operations: ingest (with P0-P3 gating), search, purge,
//!   forget, compact, consolidate
//! - Namespace isolation and migration from the legacy single-file layout
//!
//! The store is authoritative over a single workspace directory; separate
//! processes coordinate through file locks only, so network filesystems
//! work as long as `mkdir` is atomic.
//!
//! ```no_run
//! use keepsake::{MemoryConfig, MemorySystem, SearchOptions};
//!
//! # fn main() -> keepsake::Result<()> {
//! let mut memory = MemorySystem::open(MemoryConfig::new("./workspace"))?;
//! memory.ingest(
//!     "Decided to use PostgreSQL for the database.",
//!     "meeting-notes",
//!     "strategic",
//! )?;
//! let results = memory.search("database decision", &SearchOptions::default())?;
//! for hit in &results {
//!     println!("{:.2} {}", hit.relevance, hit.entry.content);
//! }
//! memory.save()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod decay;
pub mod embed;
pub mod errors;
pub mod fsio;
pub mod gate;
pub mod lock;
pub mod memory;
pub mod sentiment;
pub mod version;

pub use config::MemoryConfig;
pub use decay::DecayEngine;
pub use embed::Embedder;
pub use errors::{MemoryError, Result};
pub use gate::Priority;
pub use lock::FileLock;
pub use memory::feedback::{FeedbackStats, OutcomeLabel};
pub use memory::forgetting::{ForgetCriteria, PurgeCriteria};
pub use memory::types::{
    DropReason, IngestStatus, MemoryEntry, MemoryType, RemovalReport, SearchOptions, SearchResult,
};
pub use memory::{BulkEntry, CompactReport, MemoryStats, MemorySystem};
pub use version::{FileVersion, VersionTracker};

// Re-export so downstream tests and tools use the same versions.
pub use chrono;
pub use serde_json;
