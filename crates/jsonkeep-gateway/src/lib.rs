//! Persistence gateway for jsonkeep.
//!
//! Moves a value tree between memory and a single JSON file. The gateway
//! decides *how* a save happens (directory creation, encoding, write flags);
//! *when* it happens is up to the caller, normally the save scheduler in
//! `jsonkeep-observe`.
//!
//! # Layers
//!
//! - [`codec`] -- `encode`/`decode` between [`Node`](jsonkeep_tree::Node) and JSON text
//! - [`Filesystem`] / [`AsyncFilesystem`] -- the raw file primitives, with
//!   [`LocalFs`] as the implementation backed by `std::fs` and `tokio::fs`
//! - [`Gateway`] -- `load`/`save`/`delete` for one path, blocking and async
//!
//! # Design Rules
//!
//! 1. A missing file loads as the caller's default; a malformed one is an error.
//! 2. The parent directory is created on the first save only.
//! 3. Errors are never retried or swallowed here.

pub mod codec;
pub mod error;
pub mod fs;
pub mod gateway;

pub use error::{GatewayError, GatewayResult};
pub use fs::{AsyncFilesystem, FileOptions, Filesystem, LocalFs, SyncMode};
pub use gateway::{Gateway, GatewayOptions};
