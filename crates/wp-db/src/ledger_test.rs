use super::*;
use chrono::NaiveDate;
use wp_core::ModuleName;

fn ts(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_micro_opt(hour, minute, 5, 250)
        .unwrap()
}

fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
}

#[test]
fn test_empty_ledger_lists_nothing() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    assert!(ledger.list_entries().unwrap().is_empty());
    assert!(ledger.finished_versions().unwrap().is_empty());
}

#[test]
fn test_ensure_schema_is_idempotent() {
    let db = TargetDb::open_memory().unwrap();
    let ledger = VersionLedger::new(&db).unwrap();
    ledger.ensure_schema().unwrap();
    ledger.ensure_schema().unwrap();
}

#[test]
fn test_start_then_finish_records_snapshot() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();

    ledger.start(&v("0.1.0"), "16.0", ts(10, 0), None).unwrap();
    let entry = ledger.entry(&v("0.1.0")).unwrap().unwrap();
    assert_eq!(entry.state(), StepState::Started);
    assert_eq!(entry.date_start, ts(10, 0));
    assert!(entry.operations.is_none());

    let ops = Operations {
        install: vec![ModuleName::new("sale")],
        ..Default::default()
    };
    ledger.finish(&v("0.1.0"), ts(10, 5), &ops).unwrap();

    let entry = ledger.entry(&v("0.1.0")).unwrap().unwrap();
    assert_eq!(entry.state(), StepState::Finished);
    assert_eq!(entry.date_done, Some(ts(10, 5)));
    assert_eq!(entry.operations, Some(ops));
    assert_eq!(entry.app_version, "16.0");
}

#[test]
fn test_start_rejects_existing_version() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    ledger.start(&v("0.1.0"), "16.0", ts(10, 0), None).unwrap();
    let err = ledger
        .start(&v("0.1.0"), "16.0", ts(11, 0), None)
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicateVersion { .. }));
}

#[test]
fn test_finish_without_start_is_unknown() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    let err = ledger
        .finish(&v("0.2.0"), ts(10, 0), &Operations::default())
        .unwrap_err();
    assert!(matches!(err, DbError::UnknownVersion { .. }));
}

#[test]
fn test_finish_twice_is_unknown() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    ledger.start(&v("0.1.0"), "16.0", ts(10, 0), None).unwrap();
    ledger
        .finish(&v("0.1.0"), ts(10, 1), &Operations::default())
        .unwrap();
    let err = ledger
        .finish(&v("0.1.0"), ts(10, 2), &Operations::default())
        .unwrap_err();
    assert!(matches!(err, DbError::UnknownVersion { .. }));
}

#[test]
fn test_entries_sort_by_semantic_version() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    for s in ["0.10.0", "0.2.0", "0.9.1"] {
        ledger.start(&v(s), "16.0", ts(9, 0), None).unwrap();
        ledger
            .finish(&v(s), ts(9, 1), &Operations::default())
            .unwrap();
    }
    assert_eq!(
        ledger.finished_versions().unwrap(),
        vec![v("0.2.0"), v("0.9.1"), v("0.10.0")]
    );
}

#[test]
fn test_service_step_states() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    ledger
        .start(&v("1.0.0"), "17.0", ts(8, 0), Some(ServiceName::Odoo))
        .unwrap();
    let entry = ledger.entry(&v("1.0.0")).unwrap().unwrap();
    assert_eq!(entry.state(), StepState::PendingRemote);
    assert!(ledger.unfinished_entries().unwrap().is_empty());

    ledger.mark_failed(&v("1.0.0"), "upgrade crashed").unwrap();
    let entry = ledger.entry(&v("1.0.0")).unwrap().unwrap();
    assert_eq!(entry.state(), StepState::RemoteFailed);
    assert_eq!(entry.failure.as_deref(), Some("upgrade crashed"));
    assert_eq!(ledger.unfinished_entries().unwrap().len(), 1);
}

#[test]
fn test_pending_remote_entries_lists_submitted_steps() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    ledger.start(&v("0.1.0"), "16.0", ts(8, 0), None).unwrap();
    ledger
        .start(&v("1.0.0"), "17.0", ts(8, 1), Some(ServiceName::Oca))
        .unwrap();
    let pending = ledger.pending_remote_entries().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].number, v("1.0.0"));
}

#[test]
fn test_mark_restored_makes_entry_blocking() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    ledger
        .start(&v("1.0.0"), "17.0", ts(8, 0), Some(ServiceName::Odoo))
        .unwrap();
    assert!(ledger.unfinished_entries().unwrap().is_empty());

    ledger.mark_restored(&v("1.0.0")).unwrap();
    let entry = ledger.entry(&v("1.0.0")).unwrap().unwrap();
    assert_eq!(entry.state(), StepState::Started);
    assert!(entry.service.is_none());
    assert!(ledger.pending_remote_entries().unwrap().is_empty());
    assert_eq!(ledger.unfinished_entries().unwrap().len(), 1);
}

#[test]
fn test_mark_restored_rejects_failed_or_finished_entries() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    ledger
        .start(&v("1.0.0"), "17.0", ts(8, 0), Some(ServiceName::Odoo))
        .unwrap();
    ledger.mark_failed(&v("1.0.0"), "boom").unwrap();
    assert!(matches!(
        ledger.mark_restored(&v("1.0.0")),
        Err(DbError::UnknownVersion { .. })
    ));

    ledger.start(&v("0.1.0"), "16.0", ts(7, 0), None).unwrap();
    ledger
        .finish(&v("0.1.0"), ts(7, 1), &Operations::default())
        .unwrap();
    assert!(ledger.mark_restored(&v("0.1.0")).is_err());
}

#[test]
fn test_read_only_ledger_sees_entries() {
    let db = TargetDb::open_memory().unwrap();
    VersionLedger::new(&db)
        .unwrap()
        .start(&v("0.1.0"), "16.0", ts(8, 0), None)
        .unwrap();
    let mut reader = VersionLedger::read_only(&db);
    assert_eq!(reader.list_entries().unwrap().len(), 1);
}

#[test]
fn test_mark_failed_requires_service_step() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    ledger.start(&v("0.1.0"), "16.0", ts(10, 0), None).unwrap();
    assert!(ledger.mark_failed(&v("0.1.0"), "boom").is_err());
}

#[test]
fn test_started_entry_blocks_run() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    ledger.start(&v("0.3.0"), "16.0", ts(10, 0), None).unwrap();
    let blocking = ledger.unfinished_entries().unwrap();
    assert_eq!(blocking.len(), 1);
    assert_eq!(blocking[0].number, v("0.3.0"));
}

#[test]
fn test_resolve_finishes_blocking_entry() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    ledger.start(&v("0.3.0"), "16.0", ts(10, 0), None).unwrap();
    let ops = Operations {
        upgrade: vec![ModuleName::new("base")],
        ..Default::default()
    };
    let previous = ledger.resolve(&v("0.3.0"), ts(12, 0), &ops).unwrap();
    assert_eq!(previous, StepState::Started);
    assert!(ledger.unfinished_entries().unwrap().is_empty());
    assert_eq!(ledger.finished_versions().unwrap(), vec![v("0.3.0")]);
    let entry = ledger.entry(&v("0.3.0")).unwrap().unwrap();
    assert_eq!(entry.operations, Some(ops));
}

#[test]
fn test_resolve_unknown_version_fails() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    assert!(matches!(
        ledger.resolve(&v("9.9.9"), ts(12, 0), &Operations::default()),
        Err(DbError::UnknownVersion { .. })
    ));
}

#[test]
fn test_cache_is_stale_until_invalidated() {
    let db = TargetDb::open_memory().unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    assert!(ledger.list_entries().unwrap().is_empty());

    db.execute_batch(
        "INSERT INTO waypoint_migration (number, app_version, date_start, date_done) \
         VALUES ('0.5.0', '16.0', TIMESTAMP '2024-01-01 00:00:00', TIMESTAMP '2024-01-01 00:01:00')",
    )
    .unwrap();
    assert!(ledger.list_entries().unwrap().is_empty());

    ledger.invalidate();
    assert_eq!(ledger.finished_versions().unwrap(), vec![v("0.5.0")]);
}

#[test]
fn test_corrupt_version_is_reported() {
    let db = TargetDb::open_memory().unwrap();
    db.execute_batch(
        "INSERT INTO waypoint_migration (number, app_version, date_start) \
         VALUES ('not-a-version', '16.0', TIMESTAMP '2024-01-01 00:00:00')",
    )
    .unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    assert!(matches!(
        ledger.list_entries(),
        Err(DbError::CorruptEntry { .. })
    ));
}

#[test]
fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("target.duckdb");
    {
        let db = TargetDb::open(&path).unwrap();
        let mut ledger = VersionLedger::new(&db).unwrap();
        ledger.start(&v("0.1.0"), "16.0", ts(10, 0), None).unwrap();
        ledger
            .finish(&v("0.1.0"), ts(10, 1), &Operations::default())
            .unwrap();
    }
    let db = TargetDb::open(&path).unwrap();
    let mut ledger = VersionLedger::new(&db).unwrap();
    assert_eq!(ledger.finished_versions().unwrap(), vec![v("0.1.0")]);
}
