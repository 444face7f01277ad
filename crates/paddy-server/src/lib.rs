//! Server side of Paddy.
//!
//! The server holds each user's authoritative save and replays offline
//! absences through the same deterministic engine the client runs, so
//! that an offline claim can be checked rather than trusted.
//!
//! - [`commands`]: file-based tooling used by the `paddy-server` binary.
//! - [`offline`]: stateless offline recomputation and claim checking.
//! - [`sync_service`]: per-user save storage, conflict detection, and
//!   clamping of over-claimed offline gains.
//!
//! Transport is the host's concern. [`sync_service::InProcessRemote`]
//! adapts a [`SyncService`] to the client-side
//! [`paddy_save::RemoteStore`] trait for single-process use.

pub mod commands;
pub mod error;
pub mod offline;
pub mod sync_service;

pub use error::ServiceError;
pub use offline::{ClaimCheck, DEFAULT_TOLERANCE, OfflineProgress, OfflineProgressService, corroborate};
pub use sync_service::{InProcessRemote, SyncService, UserId};
