//! # convos
//!
//! A local-first, searchable archive of AI assistant conversations.
//!
//! convos pulls conversations from hosted chat products (ChatGPT, Claude.ai)
//! and from the session logs of coding CLIs (Claude Code, Codex), normalizes
//! them into one relational schema, and keeps a full-text index over message
//! content and reasoning. Re-syncing the same input never duplicates or
//! forks history: every record has a deterministic identity and is merged
//! with a column-diffing upsert.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │ fetch/import │──▶│ adapters │──▶│ reconcile │──▶│  SQLite  │
//! │ HTTP / files │   │ 4 sources│   │  upsert   │   │  + FTS5  │
//! └──────────────┘   └──────────┘   └───────────┘   └────┬─────┘
//!                                                        │
//!                                   ┌────────────────────┤
//!                                   ▼                    ▼
//!                              ┌─────────┐         ┌──────────┐
//!                              │ search  │         │  query   │
//!                              │ ranked  │         │ list/get │
//!                              └─────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! convos init
//! convos sync                    # local logs, imports, hosted sources
//! convos search "borrow checker" -s claude-code -d 30
//! convos show 3f9a
//! convos get 3f9a --after 81c2
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Canonical record types |
//! | [`identity`] | Deterministic record ids |
//! | [`adapters`] | Per-source normalization |
//! | [`normalize`] | Adapter output batches |
//! | [`reconcile`] | Idempotent upsert into the store |
//! | [`index`] | Full-text index maintenance |
//! | [`query`] | Prefix resolution, listings, paging |
//! | [`search`] | Ranked full-text search |
//! | [`import`] | Source detection and local file reading |
//! | [`fetch`] | Hosted source transport |
//! | [`credentials`] | Credential fallback chain |
//! | [`sync`] | Sync cycles and watch mode |
//! | [`config`] | TOML configuration |
//! | [`db`] | Store handle and checkpoints |
//! | [`migrate`] | Schema migrations |
//! | [`error`] | Error taxonomy and exit codes |

pub mod adapters;
pub mod config;
pub mod credentials;
pub mod db;
pub mod display;
pub mod doctor;
pub mod error;
pub mod export;
pub mod fetch;
pub mod get;
pub mod identity;
pub mod import;
pub mod index;
pub mod list;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod query;
pub mod reconcile;
pub mod search;
pub mod stats;
pub mod sync;
