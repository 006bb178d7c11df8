//! # keysync
//!
//! Keyrings of public and private keys, replicated between installations
//! through encrypted sync packets, with cached key unlocking.
//!
//! ## Overview
//!
//! - **Keyring**: a key store, a change log and attributes. Mutations are
//!   serialized and persisted before they become visible.
//! - **Registry**: the keyrings of this installation, created and deleted
//!   explicitly. The local keyring always exists.
//! - **Sync**: pending changes are exported as a packet signed and encrypted
//!   with the keyring's own primary key. Peers merge packets by
//!   last-writer-wins per fingerprint.
//! - **Unlock**: operations needing secret material unlock keys through the
//!   password cache, an inline password or the user.
//!
//! ## Key Types
//!
//! - [`KeyringService`]: entry point for operations needing unlocked keys
//! - [`KeyringRegistry`]: the set of keyrings
//! - [`Keyring`]: lookups, imports, removal, attributes and sync
//! - [`KeyringError`]: every failure, see [`error`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keysync::{ExportMode, KeyringService, KeysyncConfig};
//! use keysync::core::{GenerateOptions, KeyringId, SoftCrypto, UserIdSpec};
//! use keysync::store::SqliteBlobStore;
//!
//! # async fn example(prompt: Arc<dyn keysync::unlock::PasswordPrompt>) -> keysync::Result<()> {
//! let blobs = Arc::new(SqliteBlobStore::open("keysync.db")?);
//! let service = KeyringService::open(
//!     KeysyncConfig::default(),
//!     blobs,
//!     Arc::new(SoftCrypto::new()),
//!     prompt,
//! )
//! .await?;
//!
//! let local = KeyringId::local();
//! let keyring = service.keyring(&local).await?;
//! keyring
//!     .generate(&GenerateOptions {
//!         user_ids: vec![UserIdSpec::new("Alice", "alice@example.org")],
//!         passphrase: Some("correct horse".into()),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! // Prompts for the passphrase unless it is cached
//! let export = service.export_sync_packet(&local, ExportMode::Pending).await?;
//! // ... hand export.bytes to the transport, then:
//! service.commit_sync(&local, export.token).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Re-exports
//!
//! - `keysync::core` - identifiers, key model, crypto provider
//! - `keysync::store` - blob store and SQLite
//! - `keysync::sync` - change log and sync packets
//! - `keysync::unlock` - password cache and unlock coordinator

pub mod config;
pub mod error;
pub mod keyring;
pub mod keystore;
pub mod registry;
pub mod service;

// Re-export component crates
pub use keysync_core as core;
pub use keysync_store as store;
pub use keysync_sync as sync;
pub use keysync_unlock as unlock;

pub use config::{AddressQuery, KeysyncConfig};
pub use error::{KeyringError, Result};
pub use keyring::{
    ArmoredExport, ImportItem, ImportResult, KeyDetails, KeyImport, KeySummary, Keyring,
    KeyringAttributes, SubKeySummary, SyncExport,
};
pub use keystore::{ImportRejection, ImportStatus, KeyStore};
pub use registry::KeyringRegistry;
pub use service::KeyringService;

pub use keysync_sync::{ExportMode, SyncReport, SyncToken};
pub use keysync_unlock::{CacheConfig, UnlockOptions};
