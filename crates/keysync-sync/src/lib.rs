//! # Keysync Sync
//!
//! Change tracking and peer reconciliation for keyrings.
//!
//! ## Overview
//!
//! Every keyring mutation is recorded in a [`ChangeLog`]. Exporting turns
//! the pending entries into a [`SyncPayload`] that is signed and encrypted
//! to the keyring's own primary key. A peer holding the same key opens the
//! packet and resolves each entry against its own applied history with
//! last-writer-wins.
//!
//! ## Key Properties
//!
//! - **At-least-once**: entries leave the log only on [`ChangeLog::commit`]
//! - **Order independent**: remote entries resolve against applied history
//! - **Lossless ties**: on equal timestamps an upsert beats a delete
//! - **All or nothing**: a packet that fails authentication is discarded whole
//!
//! ## Message Flow
//!
//! ```text
//! Replica A                                   Replica B
//!   record(fpr, Insert)
//!   begin_export() -> payload
//!   seal_packet(payload, primary) ---bytes---> open_packet(bytes, primary)
//!   commit(token)                              resolve() / accept_remote()
//! ```

pub mod changelog;
pub mod error;
pub mod packet;
pub mod report;

pub use changelog::{ChangeEntry, ChangeLog, ChangeOp, Resolution, SyncState, SyncToken};
pub use error::{Result, SyncError};
pub use packet::{open_packet, seal_packet, DeletedKey, InsertedKey, RemoteEntry, SyncPayload};
pub use report::{ExportMode, SyncReport};
