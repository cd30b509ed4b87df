mod common;

use std::sync::Barrier;
use std::thread;

use common::{database_exists, test_limits, test_target, TestDb};
use recc_db::accessors::{info, permission, role};
use recc_db::{
    create_schema, drop_schema, schema_version, BootstrapOutcome, BootstrapStage,
    ConnectionTarget, Database, DbError, PoolLimits, VERSION,
};
use recc_types::{DefaultPermission, DefaultRole, INFO_KEY_DB_VERSION, ROLE_UID_OWNER};

// ── Pool lifecycle ──────────────────────────────────────────────────

#[test]
fn unreachable_server_is_a_connect_failure() {
    let target = ConnectionTarget {
        host: "127.0.0.1".to_string(),
        port: 1,
        ..ConnectionTarget::default()
    };
    let db = Database::new(target, PoolLimits::default());

    let err = db.open().expect_err("nothing listens on port 1");
    assert!(matches!(err, DbError::ConnectFailure(_)), "got {err:?}");
    assert!(!db.is_open());
}

#[test]
fn missing_database_is_created_on_open() {
    let Some(target) = test_target("lazy_create") else {
        return;
    };
    let _ = recc_db::drop_database(&target);

    let db = Database::new(target.clone(), test_limits());
    db.open().expect("open should create the database");
    assert!(db.is_open());

    let one: i32 = db.fetch_scalar("SELECT 1", &[], 0).expect("should query");
    assert_eq!(one, 1);

    let current: String = db
        .fetch_scalar("SELECT current_database()", &[], 0)
        .expect("should query");
    assert_eq!(current, target.database);

    db.close().expect("close should succeed");
    assert!(database_exists(&target));
    db.drop_database().expect("drop should succeed");
    assert!(!database_exists(&target), "dropped database should leave no trace");
}

#[test]
fn closed_handle_fails_fast() {
    let Some(db) = TestDb::open("closed_handle") else {
        return;
    };

    assert!(matches!(db.open(), Err(DbError::AlreadyOpen)));

    db.close().expect("close should succeed");
    assert!(matches!(db.close(), Err(DbError::NotOpen)));
    assert!(matches!(
        db.fetch_scalar::<i32>("SELECT 1", &[], 0),
        Err(DbError::NotOpen)
    ));
    assert!(matches!(create_schema(&db), Err(DbError::NotOpen)));
    assert!(matches!(db.status(), Err(DbError::NotOpen)));
}

#[test]
fn status_reports_pool_occupancy() {
    let Some(db) = TestDb::open("status") else {
        return;
    };

    let status = db.status().expect("status should be available");
    assert_eq!(status.max_size, 4);
    assert!(status.connections <= status.max_size);
}

#[test]
fn exhausted_pool_times_out_and_recovers() {
    let limits = PoolLimits {
        min_size: 1,
        max_size: 1,
        acquire_timeout_secs: 0.5,
        ..test_limits()
    };
    let Some(db) = TestDb::open_with("exhausted", limits) else {
        return;
    };

    let held = db.acquire().expect("first session should be granted");
    let err = thread::scope(|s| {
        s.spawn(|| db.acquire().err())
            .join()
            .expect("acquiring thread should not panic")
    });
    assert!(matches!(err, Some(DbError::AcquireTimeout(_))), "got {err:?}");

    drop(held);
    let one: i32 = db
        .fetch_scalar("SELECT 1", &[], 0)
        .expect("handle should stay usable after a timeout");
    assert_eq!(one, 1);
}

#[test]
fn connections_are_recycled_after_max_queries() {
    let limits = PoolLimits {
        min_size: 1,
        max_size: 1,
        max_queries: 2,
        ..test_limits()
    };
    let Some(db) = TestDb::open_with("recycle", limits) else {
        return;
    };

    let pids: Vec<i32> = (0..5)
        .map(|_| db.fetch_scalar("SELECT pg_backend_pid()", &[], 0))
        .collect::<Result<_, _>>()
        .expect("should query");

    assert_eq!(pids[0], pids[1]);
    assert_ne!(pids[1], pids[2], "third query should run on a fresh connection");
    assert_eq!(pids[2], pids[3]);
    assert_ne!(pids[3], pids[4], "fifth query should run on a fresh connection");
}

// ── Bootstrap ───────────────────────────────────────────────────────

#[test]
fn bootstrap_seeds_once_and_tears_down() {
    let Some(db) = TestDb::open("bootstrap") else {
        return;
    };

    let first = create_schema(&db).expect("first bootstrap should succeed");
    assert_eq!(
        first,
        BootstrapOutcome::Initialized {
            version: VERSION.to_string()
        }
    );

    let roles = role::select_role_all(&db).expect("should list roles");
    let slugs: Vec<&str> = roles.iter().map(|r| r.slug.as_str()).collect();
    assert_eq!(
        slugs,
        DefaultRole::ALL.iter().map(|r| r.slug()).collect::<Vec<_>>()
    );
    assert_eq!(roles[0].uid, ROLE_UID_OWNER);
    assert!(roles[0].lock, "owner should be locked");
    assert!(roles[1..].iter().all(|r| !r.lock));

    let owner_permissions =
        role::select_role_permission_slugs(&db, ROLE_UID_OWNER).expect("should list grants");
    assert_eq!(owner_permissions.len(), 9);
    let mut sorted = owner_permissions.clone();
    sorted.sort();
    assert_eq!(owner_permissions, sorted);

    let guest = role::select_role_uid_by_slug(&db, "guest").expect("guest should exist");
    assert_eq!(
        role::select_role_permission_slugs(&db, guest).expect("should list grants"),
        vec!["view_group".to_string(), "view_project".to_string()]
    );

    // Second run: DDL is replayed, seeding is skipped.
    let second = create_schema(&db).expect("second bootstrap should succeed");
    match second {
        BootstrapOutcome::AlreadyInitialized { version, .. } => assert_eq!(version, VERSION),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(role::select_role_all(&db).expect("should list roles").len(), 5);

    let marker = schema_version(&db)
        .expect("should read marker")
        .expect("marker should exist");
    assert_eq!(marker.key, INFO_KEY_DB_VERSION);
    assert_eq!(marker.value.as_deref(), Some(VERSION));
    assert_eq!(
        info::select_db_version(&db).expect("should read version"),
        Some(VERSION.to_string())
    );

    drop_schema(&db).expect("drop schema should succeed");
    assert_eq!(schema_version(&db).expect("missing schema is not an error"), None);

    // Teardown tolerates objects that are already gone.
    drop_schema(&db).expect("second drop schema should succeed");
}

#[test]
fn failed_bootstrap_commits_nothing() {
    let Some(db) = TestDb::open("partial_bootstrap") else {
        return;
    };
    // Compatible with the DDL but not with the seeded columns.
    db.execute(
        "CREATE TABLE \"permission\" (uid SERIAL PRIMARY KEY, slug TEXT NOT NULL UNIQUE)",
        &[],
    )
    .expect("should create the conflicting table");

    let err = create_schema(&db).expect_err("seeding should fail");
    match &err {
        DbError::BootstrapFailure { stage, .. } => {
            assert_eq!(*stage, BootstrapStage::SeedPermissions);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let tables: i64 = db
        .fetch_scalar("SELECT count(*) FROM pg_tables WHERE schemaname = 'public'", &[], 0)
        .expect("should count tables");
    assert_eq!(tables, 1, "only the pre-existing table should remain");
    assert_eq!(schema_version(&db).expect("should read marker"), None);
}

#[test]
fn concurrent_bootstraps_both_succeed() {
    let Some(first) = TestDb::open("concurrent_bootstrap") else {
        return;
    };
    let second = Database::new(first.target().clone(), test_limits());
    second.open().expect("second handle should open");

    let barrier = Barrier::new(2);
    let outcomes: Vec<Result<BootstrapOutcome, DbError>> = thread::scope(|s| {
        let handles = [&*first, &second].map(|db| {
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                create_schema(db)
            })
        });
        handles
            .into_iter()
            .map(|h| h.join().expect("bootstrap thread should not panic"))
            .collect()
    });
    second.close().expect("close should succeed");

    let mut initialized = 0;
    for outcome in outcomes {
        let outcome = outcome.expect("both bootstraps should succeed");
        assert_eq!(outcome.version(), VERSION);
        if matches!(outcome, BootstrapOutcome::Initialized { .. }) {
            initialized += 1;
        }
    }
    assert_eq!(initialized, 1, "exactly one call should seed");

    assert_eq!(role::select_role_all(&first).expect("should list roles").len(), 5);
    assert_eq!(
        permission::select_permission_all(&first)
            .expect("should list permissions")
            .len(),
        DefaultPermission::ALL.len()
    );
}

#[test]
fn bootstrap_after_teardown_seeds_again() {
    let Some(db) = TestDb::bootstrapped("rebootstrap") else {
        return;
    };

    drop_schema(&db).expect("drop schema should succeed");
    let outcome = create_schema(&db).expect("bootstrap should succeed");
    assert!(matches!(outcome, BootstrapOutcome::Initialized { .. }));
    assert_eq!(role::select_role_all(&db).expect("should list roles").len(), 5);
}
