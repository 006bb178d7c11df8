//! # keysync testkit
//!
//! Testing utilities for keysync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: replicas backed by in-memory or SQLite blob stores, with
//!   a prompt that reports unlock requests over a channel
//! - **Generators**: proptest strategies for change-log entries
//!
//! End-to-end scenarios live in this crate's `tests/` directory.
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use keysync_testkit::fixtures::Replica;
//!
//! # async fn example() {
//! let mut replica = Replica::in_memory().await;
//! let key = replica.generate("alice@example.org", Some("pw")).await;
//!
//! // Answer the next unlock request
//! let request = replica.prompt.requested().await;
//! replica.service.coordinator().submit_password(request.request_id, "pw").unwrap();
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use keysync_testkit::generators::change_entry;
//!
//! proptest! {
//!     #[test]
//!     fn supersedes_is_antisymmetric(a in change_entry(), b in change_entry()) {
//!         prop_assert!(!(a.supersedes(&b) && b.supersedes(&a)));
//!     }
//! }
//! ```

use std::sync::Once;

pub mod fixtures;
pub mod generators;

pub use fixtures::{temp_db, test_crypto, PromptEvent, PromptEvents, Replica};
pub use generators::{change_entry, change_op, fingerprint};

/// Install a tracing subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
