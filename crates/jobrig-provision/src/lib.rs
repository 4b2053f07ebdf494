//! Throwaway databases for integration tests.
//!
//! An [`EphemeralDatabase`] is created on a [`DatabaseServer`] under a
//! unique name, configured so readers see committed snapshots, and dropped
//! again when the value goes out of scope. Teardown retries with a random
//! backoff ([`TeardownPolicy`]) and never fails the test that owns it.
//!
//! [`SqliteServer`] is the bundled server: a master catalog plus one SQLite
//! file per database, all under a scratch directory.

pub mod descriptor;
pub mod ephemeral;
pub mod error;
pub mod retry;
pub mod server;
pub mod sqlite_server;

pub use descriptor::{AuthMode, ConnectionDescriptor};
pub use ephemeral::{DatabaseState, EphemeralDatabase, TeardownOutcome};
pub use error::{AdminError, ProvisionError, ProvisionStage, Result};
pub use retry::{RetryExhausted, TeardownPolicy};
pub use server::{DatabaseServer, OfflineMode};
pub use sqlite_server::SqliteServer;
