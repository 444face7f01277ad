//! Persistence for Paddy games.
//!
//! - [`snapshot`]: checksummed JSON snapshots of [`paddy_core::state::GameState`]
//! - [`migration`]: chained save-format upgrades
//! - [`store`] / [`save_system`]: local key-value persistence with a backup ring
//! - [`sync`]: remote-store interface, conflict detection, and merge
//! - [`game`]: the session facade a host drives

pub mod config;
pub mod event;
pub mod game;
pub mod migration;
pub mod save_system;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use config::SaveConfig;
pub use event::SaveEvent;
pub use game::Game;
pub use save_system::{LoadSource, SaveError, SaveSystem};
pub use snapshot::{SAVE_FORMAT_VERSION, SaveSnapshot, SnapshotError};
pub use store::{KeyValueStore, MemoryStore, StoreError};
pub use sync::{Conflict, RemoteStore, Resolution, SyncError, SyncRequest, SyncResponse, SyncState};
