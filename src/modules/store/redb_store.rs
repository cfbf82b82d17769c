use redb::{Database, ReadableTable, TableDefinition};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{ProfileStore, SnapshotStore, StoreError, StoreResult};
use crate::modules::profiles::Profile;

const PROFILES: TableDefinition<&str, &[u8]> = TableDefinition::new("profiles");
const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

/// Embedded store persisting profiles as JSON documents in `redb`.
#[derive(Clone)]
pub struct RedbProfileStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl fmt::Debug for RedbProfileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbProfileStore")
            .field("path", &self.path)
            .finish()
    }
}

impl RedbProfileStore {
    /// Opens (or creates) the database file and makes sure both tables exist.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path)?;

        let txn = db.begin_write()?;
        {
            txn.open_table(PROFILES)?;
            txn.open_table(SNAPSHOTS)?;
        }
        txn.commit()?;

        log::debug!("Opened profile database at {}", path.display());
        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProfileStore for RedbProfileStore {
    fn insert(&self, profile: &Profile) -> StoreResult<()> {
        let bytes = serde_json::to_vec(profile)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(PROFILES)?;
            if table.get(profile.id.as_str())?.is_some() {
                return Err(StoreError::Duplicate(profile.id.clone()));
            }
            table.insert(profile.id.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get(&self, id: &str) -> StoreResult<Option<Profile>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PROFILES)?;
        match table.get(id)? {
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
            None => Ok(None),
        }
    }

    fn list(&self) -> StoreResult<Vec<Profile>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PROFILES)?;
        let mut profiles = Vec::new();
        for entry in table.iter()? {
            let (_, raw) = entry?;
            profiles.push(serde_json::from_slice(raw.value())?);
        }
        Ok(profiles)
    }

    fn update(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut Profile),
    ) -> StoreResult<Option<Profile>> {
        let txn = self.db.begin_write()?;
        let updated = {
            let mut table = txn.open_table(PROFILES)?;
            let current: Option<Profile> = match table.get(id)? {
                Some(raw) => Some(serde_json::from_slice(raw.value())?),
                None => None,
            };
            match current {
                Some(mut profile) => {
                    apply(&mut profile);
                    let bytes = serde_json::to_vec(&profile)?;
                    table.insert(id, bytes.as_slice())?;
                    Some(profile)
                }
                None => None,
            }
        };
        txn.commit()?;
        Ok(updated)
    }

    fn delete(&self, id: &str) -> StoreResult<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(PROFILES)?;
            let removed = table.remove(id)?.is_some();
            removed
        };
        txn.commit()?;
        Ok(removed)
    }
}

impl SnapshotStore for RedbProfileStore {
    fn save_snapshot(&self, key: &str, payload: &[u8]) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SNAPSHOTS)?;
            table.insert(key, payload)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn load_snapshot(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SNAPSHOTS)?;
        Ok(table.get(key)?.map(|raw| raw.value().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::spoofing::FingerprintGenerator;
    use chrono::Utc;

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.redb");
        let fingerprint = FingerprintGenerator::with_seed(9).generate();
        let profile = Profile::new("p1", "first", fingerprint, Utc::now());

        {
            let store = RedbProfileStore::open(&path).unwrap();
            store.insert(&profile).unwrap();
            store
                .update("p1", &mut |p| {
                    p.usage_count = 4;
                    p.success_rate = 75.0;
                })
                .unwrap();
            store.save_snapshot("behavior", b"{}").unwrap();
        }

        let store = RedbProfileStore::open(&path).unwrap();
        let loaded = store.get("p1").unwrap().unwrap();
        assert_eq!(loaded.usage_count, 4);
        assert_eq!(loaded.fingerprint, profile.fingerprint);
        assert_eq!(store.list().unwrap().len(), 1);
        assert_eq!(store.load_snapshot("behavior").unwrap().unwrap(), b"{}");

        assert!(store.delete("p1").unwrap());
        assert!(store.get("p1").unwrap().is_none());
    }
}
