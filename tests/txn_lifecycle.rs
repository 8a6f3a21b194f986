//! # Transaction Lifecycle Tests
//!
//! Visibility per isolation level, commit durability through the
//! facade, abort discarding in-memory changes, and the serializable
//! validation that closes the write-skew window.

use minidb::schema::{ColumnDef, ColumnType};
use minidb::{Database, Error, IsolationLevel, TxnState};
use tempfile::tempdir;

fn open_db(dir: &tempfile::TempDir) -> Database {
    Database::open(dir.path().join("txn")).unwrap()
}

#[test]
fn visibility_ladder_per_isolation_level() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let mgr = db.txn_manager();

    let writer = db.begin(IsolationLevel::ReadCommitted).unwrap();
    let writer_id = writer.lock().id();

    let uncommitted_reader = db.begin(IsolationLevel::ReadUncommitted).unwrap();
    let committed_reader = db.begin(IsolationLevel::ReadCommitted).unwrap();
    let snapshot_reader = db.begin(IsolationLevel::RepeatableRead).unwrap();

    // While the writer is active, only READ_UNCOMMITTED sees it.
    assert!(mgr.is_visible(writer_id, &uncommitted_reader));
    assert!(!mgr.is_visible(writer_id, &committed_reader));
    assert!(!mgr.is_visible(writer_id, &snapshot_reader));

    db.commit(&writer).unwrap();

    // Committed: READ_COMMITTED sees it now; the snapshot reader still
    // does not, because the commit happened after its snapshot.
    assert!(mgr.is_visible(writer_id, &uncommitted_reader));
    assert!(mgr.is_visible(writer_id, &committed_reader));
    assert!(!mgr.is_visible(writer_id, &snapshot_reader));

    // A snapshot taken after the commit sees it.
    let late_snapshot = db.begin(IsolationLevel::RepeatableRead).unwrap();
    assert!(mgr.is_visible(writer_id, &late_snapshot));
}

#[test]
fn abort_discards_unflushed_page_changes() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    // Committed baseline row.
    let baseline = db.begin(IsolationLevel::ReadCommitted).unwrap();
    let baseline_id = baseline.lock().id();
    let mut guard = db.buffer_pool().new_page().unwrap();
    let page_id = guard.page_id();
    db.wal()
        .log_insert(baseline_id, page_id, 0, b"stable")
        .unwrap();
    guard.page_mut().insert_record(b"stable").unwrap();
    drop(guard);
    baseline.lock().add_modified_page(page_id);
    db.commit(&baseline).unwrap();

    // A second transaction scribbles on the page, then aborts.
    let txn = db.begin(IsolationLevel::ReadCommitted).unwrap();
    let txn_id = txn.lock().id();
    let mut guard = db.buffer_pool().fetch_page(page_id).unwrap();
    db.wal()
        .log_update(txn_id, page_id, 0, b"stable", b"undone")
        .unwrap();
    guard.page_mut().update_record(0, b"undone").unwrap();
    drop(guard);
    txn.lock().add_modified_page(page_id);

    db.abort(&txn).unwrap();
    assert_eq!(txn.lock().state(), TxnState::Aborted);

    // The discard dropped the dirty frame; disk still has the
    // committed image.
    let guard = db.buffer_pool().fetch_page(page_id).unwrap();
    assert_eq!(guard.page().get_record(0).unwrap(), b"stable");
}

#[test]
fn serializable_read_write_conflict_forces_abort() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    let reader = db.begin(IsolationLevel::Serializable).unwrap();
    reader.lock().add_read_item(1, 3, 0);

    let writer = db.begin(IsolationLevel::ReadCommitted).unwrap();
    writer.lock().add_write_item(1, 3, 0);
    db.commit(&writer).unwrap();

    assert!(matches!(
        db.commit(&reader),
        Err(Error::SerializationConflict)
    ));
    assert_eq!(reader.lock().state(), TxnState::Aborted);

    // A disjoint serializable transaction is unaffected.
    let clean = db.begin(IsolationLevel::Serializable).unwrap();
    clean.lock().add_read_item(2, 0, 0);
    db.commit(&clean).unwrap();
}

#[test]
fn lock_failure_aborts_transaction_cleanly() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    db.catalog()
        .create_table(
            "t",
            vec![ColumnDef::new("id", ColumnType::Int).primary_key()],
        )
        .unwrap();
    let table_id = db.catalog().get_table("t").unwrap().id;

    let holder = db.begin(IsolationLevel::ReadCommitted).unwrap();
    let holder_id = holder.lock().id();
    db.lock_manager()
        .lock_table(holder_id, table_id, minidb::LockMode::Exclusive)
        .unwrap();

    let loser = db.begin(IsolationLevel::ReadCommitted).unwrap();
    let loser_id = loser.lock().id();
    let denied = db.lock_manager().acquire(
        loser_id,
        minidb::ResourceId::Table(table_id),
        minidb::LockMode::Shared,
        std::time::Duration::from_millis(40),
    );
    assert!(matches!(denied, Err(Error::LockTimeout(_))));

    // The expected policy: a timed-out transaction aborts.
    db.abort(&loser).unwrap();
    assert_eq!(loser.lock().state(), TxnState::Aborted);

    db.commit(&holder).unwrap();
    assert!(!db
        .lock_manager()
        .holds(holder_id, minidb::ResourceId::Table(table_id), minidb::LockMode::Shared));
}

#[test]
fn current_transaction_tracks_lifecycle() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let mgr = db.txn_manager();

    assert!(mgr.current().is_none());

    let txn = db.begin(IsolationLevel::ReadCommitted).unwrap();
    let txn_id = txn.lock().id();
    let current_id = mgr.current().unwrap().lock().id();
    assert_eq!(current_id, txn_id);

    db.commit(&txn).unwrap();
    assert!(mgr.current().is_none());
}
