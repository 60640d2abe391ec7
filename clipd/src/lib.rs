//! clipd core — clipboard history store, fuzzy search, and IPC protocol.
//!
//! The daemon keeps a bounded, deduplicated, recency-ordered history of
//! clipboard payloads in memory (`store`), mirrors mutations to SQLite
//! (`database`), and serves local client processes over a Unix socket
//! with a length-prefixed JSON protocol (`ipc`).

pub mod config;
pub mod database;
pub mod fuzzy;
pub mod ipc;
pub mod models;
pub mod store;

pub use database::Database;
pub use ipc::IpcServer;
pub use models::Entry;
pub use store::{AddOutcome, Store};
