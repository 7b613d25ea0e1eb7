//! # uidkeep core
//!
//! A file-backed store of UIDs that either never expire or expire at a fixed
//! local time, kept in step with a remote access-control service.
//!
//! ## Features
//!
//! - Single JSON file, compatible with existing `uid_storage.json` files
//! - One store-wide lock held across every read-modify-write
//! - Background sweep that evicts expired UIDs and revokes them upstream
//! - Background credential refresh; readers take lock-free snapshots
//! - Upstream calls are best effort and never undo a local change
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use uidkeep_core::{
//!     Lifetime, Mirror, Registry, RecordStore, StoreConfig, Sweeper, SweeperConfig,
//!     SystemClock, TimeUnit,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), uidkeep_core::Error> {
//!     let clock = Arc::new(SystemClock);
//!     let store = RecordStore::with_config(StoreConfig::default());
//!     let mirror = Mirror::disabled();
//!
//!     let sweeper = Sweeper::new(store.clone(), mirror.clone(), clock.clone());
//!     let sweep_task = sweeper.spawn(&SweeperConfig::default());
//!
//!     let registry = Registry::new(store, mirror, clock);
//!     registry
//!         .add_record("100200300", Lifetime::Temporary { value: 2, unit: TimeUnit::Minutes })
//!         .await?;
//!     println!("{:?}", registry.query_remaining("100200300").await?);
//!
//!     sweep_task.shutdown().await;
//!     Ok(())
//! }
//! ```

mod clock;
mod config;
mod credential;
mod error;
mod mirror;
mod record;
mod registry;
mod store;
mod sweeper;
mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AccessControlConfig, CredentialConfig, StoreConfig, SweeperConfig, DEFAULT_ADD_URL,
    DEFAULT_ISSUER_URL, DEFAULT_REMOVE_URL, DEFAULT_STORAGE_FILE,
};
pub use credential::{
    Credential, CredentialHandle, CredentialProvider, HttpTokenIssuer, TokenIssuer,
};
pub use error::{Error, Result, StorageError};
pub use mirror::{AccessControl, HttpAccessControl, Mirror, MirrorAction, MirrorStats};
pub use record::{
    Lifetime, Policy, Record, Remaining, RemainingParts, TimeUnit, PERMANENT, TIMESTAMP_FORMAT,
};
pub use registry::Registry;
pub use store::{RecordMap, RecordStore};
pub use sweeper::{SweepReport, Sweeper};
pub use task::BackgroundTask;

#[cfg(any(test, feature = "test-util"))]
pub use mirror::testing;
