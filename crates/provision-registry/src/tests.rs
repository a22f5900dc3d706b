use super::*;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use semver::Version;

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_registry() -> FileProfileRegistry {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "provision-registry-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    FileProfileRegistry::open(path).expect("must open registry")
}

fn cleanup(registry: &FileProfileRegistry) {
    let _ = fs::remove_dir_all(registry.layout().root());
}

#[test]
fn layout_paths_are_scoped_per_profile() {
    let layout = RegistryLayout::new(PathBuf::from("/srv/provision"));
    assert_eq!(
        layout.snapshot_path("main", 42),
        PathBuf::from("/srv/provision/profiles/main/snapshots/42.json")
    );
    assert_eq!(
        layout.lock_path("main"),
        PathBuf::from("/srv/provision/profiles/main/profile.lock")
    );
    assert_eq!(
        layout.data_dir("main"),
        PathBuf::from("/srv/provision/profiles/main/data")
    );
}

#[test]
fn add_profile_persists_first_snapshot() {
    let registry = test_registry();
    let created = registry.add_profile("main").expect("must add profile");
    assert!(created.timestamp() > 0);

    let loaded = registry
        .get_profile("main")
        .expect("must read profile")
        .expect("profile should exist");
    assert_eq!(loaded, created);
    assert_eq!(
        registry.list_snapshots("main").expect("must list"),
        vec![created.timestamp()]
    );

    let err = registry
        .add_profile("main")
        .expect_err("duplicate profile must fail");
    assert!(err.to_string().contains("already exists"));

    cleanup(&registry);
}

#[test]
fn add_profile_rejects_path_like_ids() {
    let registry = test_registry();
    assert!(registry.add_profile("").is_err());
    assert!(registry.add_profile("../escape").is_err());
    assert!(registry.add_profile("a/b").is_err());
    cleanup(&registry);
}

#[test]
fn get_profile_returns_none_for_unknown_id() {
    let registry = test_registry();
    assert!(registry
        .get_profile("missing")
        .expect("must read")
        .is_none());
    cleanup(&registry);
}

#[test]
fn update_profile_appends_new_snapshot_and_keeps_history() {
    let registry = test_registry();
    let mut profile = registry.add_profile("main").expect("must add profile");
    let first = profile.timestamp();

    profile.add_unit("ripgrep", Version::new(14, 1, 0));
    assert!(profile.is_changed());
    registry
        .update_profile(&mut profile)
        .expect("must persist snapshot");
    assert!(profile.timestamp() > first);

    let history = registry.list_snapshots("main").expect("must list");
    assert_eq!(history, vec![first, profile.timestamp()]);

    let original = registry
        .load_snapshot("main", first)
        .expect("must load original");
    assert!(original.units().is_empty());

    let latest = registry
        .get_profile("main")
        .expect("must read")
        .expect("must exist");
    assert_eq!(
        latest.unit_version("ripgrep"),
        Some(&Version::new(14, 1, 0))
    );
    assert!(!latest.is_changed(), "changed flag is never persisted");

    cleanup(&registry);
}

#[test]
fn validate_rejects_stale_and_unknown_profiles() {
    let registry = test_registry();
    let profile = registry.add_profile("main").expect("must add profile");
    registry.validate(&profile).expect("fresh profile is valid");

    let mut newer = profile.clone();
    newer.set_property("k", "v");
    registry.update_profile(&mut newer).expect("must update");

    let err = registry
        .validate(&profile)
        .expect_err("stale profile must be rejected");
    assert!(err.to_string().contains("stale"));

    let unknown = Profile::new("ghost");
    let err = registry
        .validate(&unknown)
        .expect_err("unknown profile must be rejected");
    assert!(err.to_string().contains("not known"));

    cleanup(&registry);
}

#[test]
fn update_profile_rejects_stale_base_and_keeps_newer_history() {
    let registry = test_registry();
    let base = registry.add_profile("main").expect("must add profile");

    let mut first = base.clone();
    first.add_unit("a", Version::new(1, 0, 0));
    registry.update_profile(&mut first).expect("must persist first");

    let mut second = base.clone();
    second.add_unit("b", Version::new(1, 0, 0));
    let err = registry
        .update_profile(&mut second)
        .expect_err("stale update must be rejected");
    assert!(err.to_string().contains("stale"));
    assert_eq!(second.timestamp(), base.timestamp());

    let latest = registry
        .get_profile("main")
        .expect("must read")
        .expect("must exist");
    assert_eq!(latest.units().keys().collect::<Vec<_>>(), vec!["a"]);
    assert_eq!(
        registry.list_snapshots("main").expect("must list"),
        vec![base.timestamp(), first.timestamp()]
    );

    cleanup(&registry);
}

#[test]
fn lock_is_exclusive_until_released() {
    let registry = test_registry();
    registry.add_profile("main").expect("must add profile");

    registry.lock_profile("main").expect("first lock succeeds");
    assert!(registry.is_locked("main"));
    let err = registry
        .lock_profile("main")
        .expect_err("second lock must fail");
    assert!(err.to_string().contains("already locked"));
    assert!(err
        .to_string()
        .contains(&format!("pid={}", std::process::id())));

    registry.unlock_profile("main").expect("unlock succeeds");
    assert!(!registry.is_locked("main"));
    registry.lock_profile("main").expect("relock succeeds");
    registry.unlock_profile("main").expect("unlock succeeds");

    let err = registry
        .unlock_profile("main")
        .expect_err("double unlock must fail");
    assert!(err.to_string().contains("not locked"));

    cleanup(&registry);
}

#[test]
fn tampered_snapshot_is_rejected() {
    let registry = test_registry();
    let profile = registry.add_profile("main").expect("must add profile");
    let path = registry
        .layout()
        .snapshot_path("main", profile.timestamp());
    let raw = fs::read_to_string(&path).expect("must read snapshot");
    let tampered = raw.replace("\"properties\": {}", "\"properties\": {\"x\": \"y\"}");
    assert_ne!(raw, tampered, "fixture must actually change the snapshot");
    fs::write(&path, tampered).expect("must write tampered snapshot");

    let err = registry
        .get_profile("main")
        .expect_err("tampered snapshot must fail");
    assert!(err.to_string().contains("digest mismatch"));

    cleanup(&registry);
}

#[test]
fn profile_data_dir_is_created_on_demand() {
    let registry = test_registry();
    registry.add_profile("main").expect("must add profile");
    let dir = registry.profile_data_dir("main").expect("must create");
    assert!(dir.is_dir());
    assert_eq!(dir, registry.layout().data_dir("main"));
    cleanup(&registry);
}

#[test]
fn profile_mutators_track_changes() {
    let mut profile = Profile::new("main");
    assert!(!profile.is_changed());
    assert!(profile.remove_unit("nothing").is_none());
    assert!(!profile.is_changed(), "removing a missing unit is not a change");

    assert_eq!(profile.add_unit("fd", Version::new(9, 0, 0)), None);
    assert_eq!(
        profile.add_unit("fd", Version::new(10, 0, 0)),
        Some(Version::new(9, 0, 0))
    );
    assert!(profile.is_installed("fd", &Version::new(10, 0, 0)));
    assert!(profile.is_changed());

    profile.clear_changed();
    assert_eq!(profile.set_property("root", "/opt"), None);
    assert_eq!(profile.property("root"), Some("/opt"));
    assert!(profile.is_changed());
}
