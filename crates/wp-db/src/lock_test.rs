use super::*;

fn fast_settings(name: &str) -> LockSettings {
    LockSettings {
        ident: lock_ident(name),
        heartbeat_interval: Duration::from_millis(40),
        poll_interval: Duration::from_millis(5),
        stale_after: Duration::from_secs(60),
    }
}

fn lease_count(db: &TargetDb) -> i64 {
    db.with_conn(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM waypoint_lock", [], |r| {
            r.get::<_, i64>(0)
        })?)
    })
    .unwrap()
}

#[test]
fn test_lock_ident_is_stable_and_name_dependent() {
    assert_eq!(lock_ident("waypoint"), lock_ident("waypoint"));
    assert_ne!(lock_ident("waypoint"), lock_ident("other"));
}

#[test]
fn test_try_acquire_is_exclusive_between_holders() {
    let db = TargetDb::open_memory().unwrap();
    let lock = AdvisoryLock::new(42);
    db.with_conn(|conn| {
        assert!(lock.try_acquire(conn, "a", Duration::from_secs(60))?);
        assert!(!lock.try_acquire(conn, "b", Duration::from_secs(60))?);
        assert_eq!(lock.holder(conn)?.as_deref(), Some("a"));
        lock.release(conn, "a")?;
        assert!(lock.try_acquire(conn, "b", Duration::from_secs(60))?);
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_release_by_non_holder_keeps_lease() {
    let db = TargetDb::open_memory().unwrap();
    let lock = AdvisoryLock::new(7);
    db.with_conn(|conn| {
        assert!(lock.try_acquire(conn, "a", Duration::from_secs(60))?);
        lock.release(conn, "b")?;
        assert_eq!(lock.holder(conn)?.as_deref(), Some("a"));
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_stale_lease_is_reclaimed() {
    let db = TargetDb::open_memory().unwrap();
    db.execute_batch(
        "INSERT INTO waypoint_lock VALUES \
         (9, 'crashed', TIMESTAMP '2000-01-01 00:00:00', TIMESTAMP '2000-01-01 00:00:00')",
    )
    .unwrap();
    let lock = AdvisoryLock::new(9);
    db.with_conn(|conn| {
        assert!(lock.try_acquire(conn, "fresh", Duration::from_secs(60))?);
        assert_eq!(lock.holder(conn)?.as_deref(), Some("fresh"));
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_heartbeat_reports_takeover() {
    let db = TargetDb::open_memory().unwrap();
    let lock = AdvisoryLock::new(3);
    db.with_conn(|conn| {
        assert!(lock.try_acquire(conn, "a", Duration::from_secs(60))?);
        assert!(lock.heartbeat(conn, "a")?);
        assert!(!lock.heartbeat(conn, "b")?);
        Ok(())
    })
    .unwrap();
}

#[tokio::test]
async fn test_handle_acquires_and_releases() {
    let db = TargetDb::open_memory().unwrap();
    let mut handle = LockHandle::acquire(&db, fast_settings("acquire"))
        .await
        .unwrap();
    assert!(handle.is_held());
    assert_eq!(lease_count(&db), 1);

    handle.release().await.unwrap();
    assert!(!handle.is_held());
    assert_eq!(lease_count(&db), 0);

    // second release is a no-op
    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_second_acquire_is_contended() {
    let db = TargetDb::open_memory().unwrap();
    let settings = fast_settings("contended");
    let mut first = LockHandle::acquire(&db, settings.clone()).await.unwrap();

    let err = LockHandle::acquire(&db, settings.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DbError::LockContended { .. }));

    first.release().await.unwrap();
    let mut second = LockHandle::acquire(&db, settings).await.unwrap();
    second.release().await.unwrap();
}

#[tokio::test]
async fn test_distinct_names_do_not_contend() {
    let db = TargetDb::open_memory().unwrap();
    let mut a = LockHandle::acquire(&db, fast_settings("a")).await.unwrap();
    let mut b = LockHandle::acquire(&db, fast_settings("b")).await.unwrap();
    assert_eq!(lease_count(&db), 2);
    a.release().await.unwrap();
    b.release().await.unwrap();
}

#[tokio::test]
async fn test_keep_alive_refreshes_heartbeat() {
    let db = TargetDb::open_memory().unwrap();
    let mut handle = LockHandle::acquire(&db, fast_settings("beat"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let refreshed = db
        .with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT heartbeat_at > acquired_at FROM waypoint_lock",
                [],
                |r| r.get::<_, bool>(0),
            )?)
        })
        .unwrap();
    assert!(refreshed);
    handle.check().unwrap();
    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_takeover_is_detected() {
    let db = TargetDb::open_memory().unwrap();
    let handle = LockHandle::acquire(&db, fast_settings("takeover"))
        .await
        .unwrap();
    db.execute_batch("UPDATE waypoint_lock SET holder = 'intruder'")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(!handle.is_held());
    assert!(matches!(handle.check(), Err(DbError::LockLost { .. })));
}

#[tokio::test]
async fn test_stop_and_restart_keep_holder() {
    let db = TargetDb::open_memory().unwrap();
    let mut handle = LockHandle::acquire(&db, fast_settings("restart"))
        .await
        .unwrap();
    let holder = handle.holder().to_string();

    handle.stop().await.unwrap();
    assert_eq!(lease_count(&db), 0);

    handle.restart(&db).await.unwrap();
    assert!(handle.is_held());
    let current = db
        .with_conn(|conn| AdvisoryLock::new(handle.ident()).holder(conn))
        .unwrap();
    assert_eq!(current, Some(holder));
    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_dropping_handle_releases_lease() {
    let db = TargetDb::open_memory().unwrap();
    let settings = fast_settings("drop");
    drop(LockHandle::acquire(&db, settings.clone()).await.unwrap());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(lease_count(&db), 0);
}
