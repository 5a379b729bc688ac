//! End-to-end tests across the storage, transaction, and SQL layers.

use quartzdb::access::value::Value;
use quartzdb::database::{Database, DatabaseOptions};
use quartzdb::error::Error;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Database {
    Database::open(&dir.path().join("test.qdb")).unwrap()
}

fn setup_kv(db: &Database) {
    db.execute("CREATE TABLE kv (k INTEGER PRIMARY KEY, v TEXT)", &[])
        .unwrap();
}

fn insert_kv(db: &Database, k: i64, v: &str) {
    db.execute(
        "INSERT INTO kv VALUES (?, ?)",
        &[Value::Integer(k), Value::Text(v.into())],
    )
    .unwrap();
}

#[test]
fn committed_writes_visible_to_later_transactions() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    setup_kv(&db);

    for i in 0..50 {
        insert_kv(&db, i, &format!("value-{i}"));
    }

    let rows = db.select("SELECT v FROM kv WHERE k = 37", &[]).unwrap();
    assert_eq!(rows.rows[0].get("v"), Some(&Value::Text("value-37".into())));

    let all = db.select("SELECT k FROM kv", &[]).unwrap();
    assert_eq!(all.len(), 50);
}

#[test]
fn read_your_writes_before_commit() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    setup_kv(&db);

    db.execute("BEGIN", &[]).unwrap();
    insert_kv(&db, 1, "uncommitted");
    let rows = db.select("SELECT v FROM kv WHERE k = 1", &[]).unwrap();
    assert_eq!(
        rows.rows[0].get("v"),
        Some(&Value::Text("uncommitted".into()))
    );
    db.execute("ROLLBACK", &[]).unwrap();

    assert!(db.select("SELECT * FROM kv", &[]).unwrap().is_empty());
}

#[test]
fn delete_of_absent_key_reports_zero_rows() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    setup_kv(&db);
    insert_kv(&db, 1, "only");

    // Predicated delete that matches nothing simply affects zero rows.
    let n = db.execute("DELETE FROM kv WHERE k = 99", &[]).unwrap();
    assert_eq!(n, 0);
    assert_eq!(db.select("SELECT * FROM kv", &[]).unwrap().len(), 1);
}

#[test]
fn range_scan_respects_bounds_and_order() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    setup_kv(&db);

    // Inserted out of order on purpose.
    for k in [7i64, 1, 5, 3] {
        insert_kv(&db, k, "x");
    }

    let rows = db
        .select("SELECT k FROM kv WHERE k BETWEEN 2 AND 6", &[])
        .unwrap();
    let keys: Vec<_> = rows.iter().map(|r| r.values[0].clone()).collect();
    assert_eq!(keys, vec![Value::Integer(3), Value::Integer(5)]);
}

/// A database handle multiplexes one session, so overlapping transactions
/// are exercised on the transaction layer directly, with SQL on top.
#[test]
fn snapshot_isolation_for_overlapping_transactions() {
    use quartzdb::executor::{self, ExecutionResult};
    use quartzdb::sql::{self, Parser};
    use quartzdb::storage::buffer::PageCache;
    use quartzdb::storage::disk::StorageFile;
    use quartzdb::storage::wal::{Lsn, WalManager, WalOptions};
    use quartzdb::transaction::{Transaction, TransactionManager, TransactionManagerOptions};

    fn run_sql(tx: &mut Transaction, statement: &str, params: &[Value]) -> ExecutionResult {
        let parsed = Parser::new(statement).parse().unwrap();
        let tables = quartzdb::catalog::list_tables(tx).unwrap();
        let plan = sql::plan(parsed, params, &tables).unwrap();
        executor::execute(plan, tx).unwrap()
    }

    let dir = TempDir::new().unwrap();
    let storage = StorageFile::create(&dir.path().join("test.qdb")).unwrap();
    let cache = PageCache::new(storage, 64);
    let wal = WalManager::open(
        &dir.path().join("test.qdb.wal"),
        WalOptions {
            sync_on_write: false,
        },
        Lsn(0),
    )
    .unwrap();
    let manager = TransactionManager::new(cache, wal, TransactionManagerOptions::default());

    let mut setup = manager.begin();
    run_sql(
        &mut setup,
        "CREATE TABLE kv (k INTEGER PRIMARY KEY, v TEXT)",
        &[],
    );
    setup.commit().unwrap();

    // The reader's snapshot predates the writer's commit.
    let mut reader = manager.begin();
    let mut writer = manager.begin();
    run_sql(
        &mut writer,
        "INSERT INTO kv VALUES (1, 'from writer')",
        &[],
    );
    writer.commit().unwrap();

    let ExecutionResult::Rows(seen) = run_sql(&mut reader, "SELECT * FROM kv WHERE k = 1", &[])
    else {
        panic!("expected rows");
    };
    assert!(seen.is_empty(), "reader saw a commit newer than its snapshot");
    reader.commit().unwrap();

    // A transaction begun after the commit sees the row.
    let mut fresh = manager.begin();
    let ExecutionResult::Rows(seen) = run_sql(&mut fresh, "SELECT * FROM kv WHERE k = 1", &[])
    else {
        panic!("expected rows");
    };
    assert_eq!(seen.len(), 1);
    fresh.commit().unwrap();
}

#[test]
fn crash_before_checkpoint_recovers_committed_transactions() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.qdb");

    {
        let db = Database::open(&path).unwrap();
        setup_kv(&db);
        insert_kv(&db, 1, "durable");
        insert_kv(&db, 2, "also durable");

        // An uncommitted transaction must not survive the crash.
        db.execute("BEGIN", &[]).unwrap();
        insert_kv(&db, 3, "in flight");

        // Simulate a hard crash: the handle never checkpoints, never
        // flushes, never runs destructors. The WAL is all that survives.
        std::mem::forget(db);
    }

    let db = Database::open(&path).unwrap();
    let rows = db.select("SELECT k, v FROM kv", &[]).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.rows[0].get("v"), Some(&Value::Text("durable".into())));
    assert_eq!(
        rows.rows[1].get("v"),
        Some(&Value::Text("also durable".into()))
    );
}

#[test]
fn crash_mid_schema_change_recovers_cleanly() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.qdb");

    {
        let db = Database::open(&path).unwrap();
        setup_kv(&db);
        insert_kv(&db, 10, "ten");
        db.execute("CREATE TABLE other (id INTEGER PRIMARY KEY)", &[])
            .unwrap();
        std::mem::forget(db);
    }

    let db = Database::open(&path).unwrap();
    assert_eq!(db.select("SELECT * FROM kv", &[]).unwrap().len(), 1);
    db.execute("INSERT INTO other VALUES (1)", &[]).unwrap();
    assert_eq!(db.select("SELECT * FROM other", &[]).unwrap().len(), 1);
}

#[test]
fn reopen_after_clean_close_uses_checkpointed_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.qdb");
    let wal_path = dir.path().join("test.qdb.wal");

    {
        let db = Database::open(&path).unwrap();
        setup_kv(&db);
        insert_kv(&db, 1, "checkpointed");
        db.close().unwrap();
    }

    // A clean close leaves nothing in the log.
    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), 0);

    let db = Database::open(&path).unwrap();
    let rows = db.select("SELECT v FROM kv WHERE k = 1", &[]).unwrap();
    assert_eq!(
        rows.rows[0].get("v"),
        Some(&Value::Text("checkpointed".into()))
    );
}

#[test]
fn many_rows_split_pages_and_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.qdb");

    {
        let db = Database::open(&path).unwrap();
        db.execute(
            "CREATE TABLE events (id INTEGER PRIMARY KEY, payload TEXT)",
            &[],
        )
        .unwrap();
        db.execute("BEGIN", &[]).unwrap();
        for i in 0..1000 {
            db.execute(
                "INSERT INTO events VALUES (?, ?)",
                &[
                    Value::Integer(i),
                    Value::Text(format!("payload-{i:04} {}", "x".repeat(40))),
                ],
            )
            .unwrap();
        }
        db.execute("COMMIT", &[]).unwrap();
        db.close().unwrap();
    }

    let db = Database::open(&path).unwrap();
    let all = db.select("SELECT id FROM events", &[]).unwrap();
    assert_eq!(all.len(), 1000);
    // Ascending key order end to end.
    let ids: Vec<_> = all.iter().map(|r| r.values[0].clone()).collect();
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(id, &Value::Integer(i as i64));
    }

    let slice = db
        .select("SELECT id FROM events WHERE id >= 500 AND id < 510", &[])
        .unwrap();
    assert_eq!(slice.len(), 10);
}

#[test]
fn delete_shrinks_tree_and_frees_pages_for_reuse() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.qdb");
    let db = Database::open(&path).unwrap();

    db.execute(
        "CREATE TABLE events (id INTEGER PRIMARY KEY, payload TEXT)",
        &[],
    )
    .unwrap();

    db.execute("BEGIN", &[]).unwrap();
    for i in 0..500 {
        db.execute(
            "INSERT INTO events VALUES (?, ?)",
            &[
                Value::Integer(i),
                Value::Text("y".repeat(50)),
            ],
        )
        .unwrap();
    }
    db.execute("COMMIT", &[]).unwrap();

    let n = db.execute("DELETE FROM events WHERE id < 400", &[]).unwrap();
    assert_eq!(n, 400);
    assert_eq!(db.select("SELECT * FROM events", &[]).unwrap().len(), 100);

    // Freed pages are reused rather than growing the file.
    db.close().unwrap();
    let size_after_delete = std::fs::metadata(&path).unwrap().len();

    let db = Database::open(&path).unwrap();
    db.execute("BEGIN", &[]).unwrap();
    for i in 1000..1200 {
        db.execute(
            "INSERT INTO events VALUES (?, ?)",
            &[Value::Integer(i), Value::Text("z".repeat(50))],
        )
        .unwrap();
    }
    db.execute("COMMIT", &[]).unwrap();
    db.close().unwrap();

    let size_after_reinsert = std::fs::metadata(&path).unwrap().len();
    assert_eq!(size_after_reinsert, size_after_delete);
}

#[test]
fn explicit_transaction_batches_atomically() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    setup_kv(&db);
    insert_kv(&db, 1, "seed");

    db.execute("BEGIN", &[]).unwrap();
    insert_kv(&db, 2, "two");
    insert_kv(&db, 3, "three");
    let err = db
        .execute(
            "INSERT INTO kv VALUES (?, ?)",
            &[Value::Integer(1), Value::Text("dup".into())],
        )
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateKey));

    // The explicit transaction is still open; the caller decides.
    db.execute("ROLLBACK", &[]).unwrap();
    assert_eq!(db.select("SELECT * FROM kv", &[]).unwrap().len(), 1);
}

#[test]
fn failed_statement_inside_explicit_transaction_is_atomic() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    setup_kv(&db);
    insert_kv(&db, 1, "seed");

    db.execute("BEGIN", &[]).unwrap();
    insert_kv(&db, 2, "kept");

    // Multi-row insert whose last row collides: the whole statement must
    // vanish, while the earlier staged insert survives.
    let err = db
        .execute(
            "INSERT INTO kv VALUES (3, 'lost'), (1, 'dup')",
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateKey));

    db.execute("COMMIT", &[]).unwrap();
    let rows = db.select("SELECT k FROM kv", &[]).unwrap();
    let keys: Vec<_> = rows.iter().map(|r| r.values[0].clone()).collect();
    assert_eq!(keys, vec![Value::Integer(1), Value::Integer(2)]);
}

#[test]
fn checkpoint_threshold_truncates_wal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.qdb");
    let wal_path = dir.path().join("test.qdb.wal");

    let db = Database::open_with_options(
        &path,
        DatabaseOptions {
            checkpoint_threshold: 16 * 1024,
            wal_sync: false,
            ..DatabaseOptions::default()
        },
    )
    .unwrap();
    setup_kv(&db);

    for i in 0..100 {
        insert_kv(&db, i, "some payload to fatten the log");
    }

    // At least one auto-checkpoint fired along the way, so the log stayed
    // far below the total volume written.
    let wal_len = std::fs::metadata(&wal_path).unwrap().len();
    assert!(wal_len < 200 * 1024, "wal grew to {wal_len} bytes");

    let rows = db.select("SELECT * FROM kv", &[]).unwrap();
    assert_eq!(rows.len(), 100);
}

#[test]
fn corrupted_wal_refuses_to_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.qdb");
    let wal_path = dir.path().join("test.qdb.wal");

    {
        let db = Database::open(&path).unwrap();
        setup_kv(&db);
        insert_kv(&db, 1, "x");
        std::mem::forget(db); // leave frames in the log
    }

    // Flip a byte inside the first frame's payload.
    {
        use std::io::{Read, Seek, SeekFrom, Write};
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&wal_path)
            .unwrap();
        let mut byte = [0u8; 1];
        file.seek(SeekFrom::Start(64)).unwrap();
        file.read_exact(&mut byte).unwrap();
        file.seek(SeekFrom::Start(64)).unwrap();
        file.write_all(&[byte[0] ^ 0xff]).unwrap();
    }

    let err = Database::open(&path).err().expect("open must fail");
    assert!(matches!(err, Error::Corruption(_)), "got {err}");
}

#[test]
fn multi_threaded_readers_with_single_writer() {
    use std::sync::Arc;

    let dir = TempDir::new().unwrap();
    let db = Arc::new(open(&dir));
    setup_kv(&db);
    for i in 0..100 {
        insert_kv(&db, i, "initial");
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let db = Arc::clone(&db);
        handles.push(std::thread::spawn(move || {
            for _ in 0..50 {
                let rows = db.select("SELECT k FROM kv", &[]).unwrap();
                // Writers only append; a reader sees a consistent count.
                assert!(rows.len() >= 100);
            }
        }));
    }

    // One writer thread appends concurrently.
    {
        let db = Arc::clone(&db);
        handles.push(std::thread::spawn(move || {
            for i in 100..150 {
                insert_kv(&db, i, "concurrent");
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(db.select("SELECT * FROM kv", &[]).unwrap().len(), 150);
}
