//! # eduswap-shared
//!
//! Domain vocabulary shared by the store and server crates: id newtypes,
//! the school [`Subject`] enumeration, and the swap lifecycle status.

pub mod subject;
pub mod types;

pub use subject::Subject;
pub use types::{ConnectionId, MessageId, StudentId, SwapId, SwapStatus};
