//! # eduswap-store
//!
//! Durable storage for the EduSwap platform, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model.  No business rules live here — state machine validation and
//! authorization are the server's job; this layer is pure row mapping plus
//! the one transactional check-then-insert the duplicate-swap invariant
//! requires.

pub mod ai_messages;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reviews;
pub mod students;
pub mod subjects;
pub mod swaps;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
pub use swaps::PairInsert;
