//! rollguard-state — append-only audit archive for rollguard.
//!
//! Backed by [redb](https://docs.rs/redb). Terminal sessions are archived
//! with their full audit log; rollback events are journaled separately the
//! moment a rollback finishes, so reporting tools can read them even when
//! the owning session was torn down before it could be archived.
//!
//! # Architecture
//!
//! Values are JSON-serialized into redb's `&[u8]` value columns. Rollback
//! keys (`{session_id}:{seq}`) allow prefix scans per session.
//!
//! The store exposes inserts and reads only. Historical records cannot be
//! updated or deleted through this API.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::ArchiveStore;
