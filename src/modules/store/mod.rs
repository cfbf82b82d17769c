//! Profile persistence.
//!
//! [`ProfileStore`] is the repository seam the selector talks to. Two
//! implementations ship: [`MemoryProfileStore`] for ephemeral runs and tests,
//! and [`RedbProfileStore`] backed by an embedded `redb` database. Both also
//! implement [`SnapshotStore`], a small key/value area for learned policies and
//! rate-limiter state.

mod memory;
mod redb_store;

pub use memory::MemoryProfileStore;
pub use redb_store::RedbProfileStore;

use std::fmt::Debug;
use thiserror::Error;

use crate::modules::profiles::Profile;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] redb::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("profile {0} already exists")]
    Duplicate(String),
}

macro_rules! redb_error_from {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for StoreError {
                fn from(err: $source) -> Self {
                    StoreError::Database(err.into())
                }
            }
        )*
    };
}

redb_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

pub type StoreResult<T> = Result<T, StoreError>;

/// Repository of profiles.
///
/// `update` applies the closure atomically with respect to other writers and
/// returns the stored result, or `None` when the id is unknown.
pub trait ProfileStore: Send + Sync + Debug {
    fn insert(&self, profile: &Profile) -> StoreResult<()>;
    fn get(&self, id: &str) -> StoreResult<Option<Profile>>;
    fn list(&self) -> StoreResult<Vec<Profile>>;
    fn update(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut Profile),
    ) -> StoreResult<Option<Profile>>;
    fn delete(&self, id: &str) -> StoreResult<bool>;
}

/// Opaque blobs keyed by name (Q-tables, bucket snapshots).
pub trait SnapshotStore: Send + Sync + Debug {
    fn save_snapshot(&self, key: &str, payload: &[u8]) -> StoreResult<()>;
    fn load_snapshot(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
}
