//! Integration tests: the SQLite queue feeding target planning.

use sidm_harvest::{
    plan_targets, ErrorKind, ExtractedRecord, FallbackPolicy, GeographyMode, Persistence, Screen,
};
use sidm_harvest_cli::SqliteStore;

// ─────────────────────── helpers ───────────────────────

/// A freshly seeded on-disk store.
fn seeded(dir: &tempfile::TempDir) -> SqliteStore {
    let mut store = SqliteStore::open(&dir.path().join("sidm.db")).unwrap();
    store.seed_catalog().unwrap();
    store
}

// ─────────────────────── tests ───────────────────────

#[test]
fn test_fresh_unit_targets_capital_province() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = seeded(&dir);

    let unit = store.next_pending_unit(3).unwrap().unwrap();
    let targets = plan_targets(&unit, &FallbackPolicy::default());

    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].mode, GeographyMode::Aggregate);
    assert_eq!(targets[0].geography, "41");
    assert_eq!(targets[0].screen, unit.screen);
}

#[test]
fn test_repeated_empty_loads_switch_to_provinces() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = seeded(&dir);
    let unit = store.next_pending_unit(3).unwrap().unwrap();

    for _ in 0..2 {
        store
            .mark_error(&unit, "no worksheets", ErrorKind::NoWorksheetsAfterLoad)
            .unwrap();
    }
    drop(store);

    // Drain the queue until the failed unit comes back.
    let mut store = SqliteStore::open(&dir.path().join("sidm.db")).unwrap();
    let retried = loop {
        let next = store.next_pending_unit(3).unwrap().unwrap();
        if next.id == unit.id {
            break next;
        }
        store.mark_processed(&next).unwrap();
    };
    assert_eq!(retried.error_count, 2);

    let targets = plan_targets(&retried, &FallbackPolicy::default());
    let codes: Vec<_> = targets.iter().map(|t| t.geography.as_str()).collect();
    assert_eq!(codes, vec!["04", "11", "14", "18", "21", "23", "29", "41"]);
    assert!(targets.iter().all(|t| t.mode == GeographyMode::Province));

    store.mark_processed(&retried).unwrap();
    assert!(store.next_pending_unit(3).unwrap().is_none());
    assert_eq!(store.count_exhausted(3).unwrap(), 0);
}

#[test]
fn test_values_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = seeded(&dir);
    store
        .upsert(&ExtractedRecord {
            screen: Screen::Economia,
            region: "16".into(),
            municipality: "01001".into(),
            variable: "Paro registrado".into(),
            value: Some("20".into()),
        })
        .unwrap();
    drop(store);

    let store = SqliteStore::open(&dir.path().join("sidm.db")).unwrap();
    assert_eq!(
        store
            .value(Screen::Economia, "16", "01001", "Paro registrado")
            .unwrap(),
        Some(Some("20".to_string()))
    );
}
