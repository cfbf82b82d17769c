use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{ProfileStore, SnapshotStore, StoreError, StoreResult};
use crate::modules::profiles::Profile;

/// In-process store.
#[derive(Debug, Clone, Default)]
pub struct MemoryProfileStore {
    profiles: Arc<RwLock<HashMap<String, Profile>>>,
    snapshots: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProfileStore for MemoryProfileStore {
    fn insert(&self, profile: &Profile) -> StoreResult<()> {
        let mut guard = self.profiles.write().expect("store lock poisoned");
        if guard.contains_key(&profile.id) {
            return Err(StoreError::Duplicate(profile.id.clone()));
        }
        guard.insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> StoreResult<Option<Profile>> {
        Ok(self
            .profiles
            .read()
            .expect("store lock poisoned")
            .get(id)
            .cloned())
    }

    fn list(&self) -> StoreResult<Vec<Profile>> {
        Ok(self
            .profiles
            .read()
            .expect("store lock poisoned")
            .values()
            .cloned()
            .collect())
    }

    fn update(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut Profile),
    ) -> StoreResult<Option<Profile>> {
        let mut guard = self.profiles.write().expect("store lock poisoned");
        Ok(guard.get_mut(id).map(|profile| {
            apply(profile);
            profile.clone()
        }))
    }

    fn delete(&self, id: &str) -> StoreResult<bool> {
        Ok(self
            .profiles
            .write()
            .expect("store lock poisoned")
            .remove(id)
            .is_some())
    }
}

impl SnapshotStore for MemoryProfileStore {
    fn save_snapshot(&self, key: &str, payload: &[u8]) -> StoreResult<()> {
        self.snapshots
            .write()
            .expect("store lock poisoned")
            .insert(key.to_string(), payload.to_vec());
        Ok(())
    }

    fn load_snapshot(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .snapshots
            .read()
            .expect("store lock poisoned")
            .get(key)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::spoofing::FingerprintGenerator;
    use chrono::Utc;

    fn sample(id: &str) -> Profile {
        let fingerprint = FingerprintGenerator::with_seed(1).generate();
        Profile::new(id, "sample", fingerprint, Utc::now())
    }

    #[test]
    fn insert_update_delete() {
        let store = MemoryProfileStore::new();
        store.insert(&sample("a")).unwrap();
        assert!(matches!(
            store.insert(&sample("a")),
            Err(StoreError::Duplicate(_))
        ));

        let updated = store
            .update("a", &mut |p| p.usage_count += 3)
            .unwrap()
            .unwrap();
        assert_eq!(updated.usage_count, 3);
        assert!(store.update("missing", &mut |_| {}).unwrap().is_none());

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn snapshots_overwrite() {
        let store = MemoryProfileStore::new();
        store.save_snapshot("policy", b"one").unwrap();
        store.save_snapshot("policy", b"two").unwrap();
        assert_eq!(store.load_snapshot("policy").unwrap().unwrap(), b"two");
        assert!(store.load_snapshot("other").unwrap().is_none());
    }
}
