//! # BarrelKV
//!
//! An embeddable, persistent, single-node key-value store built on an
//! **append-only, log-structured (Bitcask-style)** design. Every mutation is
//! appended to the active segment file; an in-memory index per segment maps
//! each key to the byte offset of its most recent value.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Engine                           │
//! │  ┌──────────────┐   ┌──────────────────────────────┐    │
//! │  │    Active    │   │      Sealed segments         │    │
//! │  │   segment    │   │  1.dat  2.dat  …  N.dat      │    │
//! │  │  (appends)   │   │  (read-only, oldest first)   │    │
//! │  └──────┬───────┘   └──────────────┬───────────────┘    │
//! │         │  rotation (size limit)   │                    │
//! │         └──────────►───────────────┘                    │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  Compaction (snapshot → rebuild → atomic splice)   │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`record`] | Length-prefixed on-disk record codec |
//! | [`segment`] | Active and sealed segment files with per-segment indexes |
//! | [`dir`] | Data-directory validation, advisory locking, segment discovery |
//! | [`engine`] | Open, read, write, delete, rotation, recovery, close |
//! | [`compaction`] | Space reclamation and the background compaction ticker |
//!
//! ## Key properties
//!
//! - **Append-only writes** — `put` and `delete` are a single sequential
//!   append plus an in-memory index update; no read-modify-write.
//! - **Recency-ordered reads** — `get` probes the active segment's index,
//!   then sealed segments newest-first, and resolves the first hit with one
//!   positional read.
//! - **Tombstone deletes** — a reserved value marks a key deleted; tombstoned
//!   keys resolve as absent and are dropped by compaction.
//! - **Crash-tolerant recovery** — on open, segment files are rediscovered
//!   and their indexes rebuilt by a sequential scan; a partial record at the
//!   tail of a file is discarded.
//! - **Single-process discipline** — an advisory file lock on the data
//!   directory rejects a second engine with [`DirError::Locked`](dir::DirError::Locked).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use barrelkv::{Engine, EngineConfig};
//!
//! let engine = Engine::open("/tmp/barrelkv-demo/", EngineConfig::default()).unwrap();
//!
//! engine.put(b"hello", b"world").unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! engine.delete(b"hello").unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), None);
//!
//! engine.close().unwrap();
//! ```

pub mod compaction;
pub mod dir;
pub mod engine;
pub mod record;
pub mod segment;

pub use compaction::CompactionSummary;
pub use engine::{Engine, EngineConfig, EngineError, EngineStats};
