//! Tickload Library
//!
//! Concurrent loader for per-day minute-bar files.
//!
//! # Overview
//!
//! A data directory holds one file per trading day (`btcusd-2024-01-01.csv`).
//! Each run loads every file that has not been loaded before into a
//! TimescaleDB table and records it in Redis so later runs skip it.
//!
//! ```text
//! FileSource ──► bounded queue ──► worker 0..W ──► dedup check ─► parse ─► insert ─► mark
//!                                       │                                   │          │
//!                                       └──── LeasePool (Redis) ◄───────────┼──────────┘
//!                                                        PgPool (Postgres) ◄┘
//! ```
//!
//! - **Per-file atomicity**: all rows of a file commit in one transaction.
//! - **Dedup by file name**: a file is marked only after its rows committed.
//! - **Fault isolation**: a failing file never stops the others.
//!
//! # Modules
//!
//! - [`source`]: directory scan and file name validation
//! - [`queue`]: bounded MPMC work queue
//! - [`pool`]: bounded connection leases
//! - [`parser`]: CSV and JSON-lines row parsers
//! - [`dedup`]: processed-file store (Redis, in-memory)
//! - [`sink`]: relational sink (PostgreSQL, in-memory)
//! - [`worker`]: the per-file pipeline
//! - [`coordinator`]: run orchestration, watch mode and summaries

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod models;
pub mod parser;
pub mod pool;
pub mod queue;
pub mod sink;
pub mod source;
pub mod worker;

pub use config::Config;
pub use coordinator::{IngestionCoordinator, RunSummary};
pub use error::{IngestError, Result};
