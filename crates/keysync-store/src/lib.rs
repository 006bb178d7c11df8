//! # Keysync Store
//!
//! Persistence for keyrings behind the [`BlobStore`] trait: opaque values
//! addressed by `(namespace, key)`.
//!
//! ## Key Types
//!
//! - [`BlobStore`] - The async trait for all storage operations
//! - [`BlobStoreExt`] - CBOR encode/decode helpers
//! - [`SqliteBlobStore`] - SQLite-based persistent storage
//! - [`MemoryBlobStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keysync_store::{BlobStore, BlobStoreExt, SqliteBlobStore};
//!
//! async fn example() -> keysync_store::Result<()> {
//!     let store = SqliteBlobStore::open("keysync.db")?;
//!     store.set_cbor("keysync", "keyrings", &vec!["local"]).await?;
//!     let ids: Option<Vec<String>> = store.get_cbor("keysync", "keyrings").await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryBlobStore;
pub use sqlite::SqliteBlobStore;
pub use traits::{BlobStore, BlobStoreExt};
