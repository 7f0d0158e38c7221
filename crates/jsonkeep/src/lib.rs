//! File-backed JSON object store.
//!
//! A [`Store`] loads one JSON file into a shared value tree and hands it out
//! as an [`ObservedContainer`]. Writes through that container are reported to
//! an optional update hook and, unless auto-save is off, schedule a debounced
//! save of the whole document back to disk.
//!
//! ```no_run
//! use jsonkeep::{MutableTree, Store};
//!
//! # async fn demo() -> jsonkeep::StoreResult<()> {
//! let store = Store::open_async("settings.json").await?;
//! store.data().set("theme", "dark")?;
//! store.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modes
//!
//! - **Observed** (default): mutations fire the hook and schedule saves.
//! - **Direct** (`direct_mode = true`): no hook, no scheduling. Call
//!   [`Store::save`] yourself.
//! - **Manual** (`auto_save = false`): the hook still fires, saves are
//!   explicit.

pub mod config;
pub mod error;
pub mod store;

pub use config::{ConfigError, StoreConfig};
pub use error::{Error, ErrorKind, StoreResult};
pub use store::{Store, StoreBuilder};

// Re-export the types a caller needs to work with store data.
pub use jsonkeep_gateway::{AsyncFilesystem, FileOptions, Filesystem, LocalFs, SyncMode};
pub use jsonkeep_observe::{
    update_hook, HookError, Observed, ObservedContainer, Operation, Outcome, Update, UpdateHook,
};
pub use jsonkeep_tree::{Container, ContainerKind, Key, MutableTree, Node};
