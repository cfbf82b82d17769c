use std::sync::Arc;

use stealthcrawl_rs::{
    BehaviorState,
    MemoryProfileStore,
    ProfileStore,
    RedbProfileStore,
    StealthCoordinator,
};

#[test]
fn profiles_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stealth.redb");

    let id = {
        let stealth = StealthCoordinator::builder()
            .with_database(&path)
            .unwrap()
            .build()
            .unwrap();
        let profile = stealth.select_profile().unwrap();
        stealth.report_outcome(&profile.id, true);
        stealth.report_outcome(&profile.id, true);
        stealth.report_outcome(&profile.id, false);
        profile.id
    };

    let stealth = StealthCoordinator::builder()
        .with_database(&path)
        .unwrap()
        .build()
        .unwrap();
    let stored = stealth.profiles().profile(&id).unwrap().unwrap();
    assert_eq!(stored.outcome_count, 3);
    assert!((stored.success_rate - 200.0 / 3.0).abs() < 1e-9);

    let reused = stealth.select_profile().unwrap();
    assert_eq!(reused.id, id);
    assert_eq!(reused.usage_count, 1);
    assert_eq!(reused.fingerprint, stored.fingerprint);
}

#[test]
fn learned_state_round_trips_through_a_memory_store() {
    let store = Arc::new(MemoryProfileStore::new());
    let state = BehaviorState::new("search", 0, false);
    let next = BehaviorState::new("results", 1, false);

    let first = StealthCoordinator::builder()
        .with_store(store.clone())
        .with_snapshot_store(store.clone())
        .with_seed(3)
        .build()
        .unwrap();
    first.learn(&state, "refine", 6.0, &next);
    first.record_response("shop.example", 429).unwrap();
    assert!(first.save_state().unwrap());

    let second = StealthCoordinator::builder()
        .with_store(store.clone())
        .with_snapshot_store(store.clone())
        .build()
        .unwrap();
    assert_eq!(second.q_value(&state, "refine"), 0.0);
    assert!(second.load_state().unwrap());
    assert!((second.q_value(&state, "refine") - 0.6).abs() < 1e-9);
    assert_eq!(
        second.rate_limiter().adjustment_factor("shop.example"),
        Some(0.5)
    );
}

#[test]
fn redb_store_is_a_drop_in_profile_store() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ProfileStore> =
        Arc::new(RedbProfileStore::open(dir.path().join("profiles.redb")).unwrap());

    let stealth = StealthCoordinator::builder()
        .with_store(store.clone())
        .build()
        .unwrap();
    let profile = stealth.select_profile().unwrap();
    assert_eq!(store.list().unwrap().len(), 1);
    assert!(store.delete(&profile.id).unwrap());
    assert!(stealth.profiles().profile(&profile.id).unwrap().is_none());
}
