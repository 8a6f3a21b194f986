//! # Storage Persistence Tests
//!
//! End-to-end checks that data written through the full stack (catalog,
//! buffer pool, WAL, index) is identical after closing and reopening
//! the database, and that free-list reuse never moves a live page.

use minidb::records::{decode_row, encode_row, Value};
use minidb::schema::{ColumnDef, ColumnType};
use minidb::storage::{FileManager, Page, INVALID_PAGE_ID};
use minidb::{Database, IsolationLevel, RecordId};
use tempfile::tempdir;

/// Insert one row through every subsystem the way the executor would:
/// lock, log, mutate the page, update the index and catalog.
fn insert_row(db: &Database, table: &str, id: i64, name: &str) -> RecordId {
    let schema = db.catalog().get_table(table).unwrap();
    let txn = db.begin(IsolationLevel::ReadCommitted).unwrap();
    let txn_id = txn.lock().id();

    db.lock_manager()
        .lock_table(txn_id, schema.id, minidb::LockMode::Exclusive)
        .unwrap();

    let row = encode_row(&[Value::Int(id), Value::Text(name.into())]);

    let mut guard = if schema.first_page == INVALID_PAGE_ID {
        let guard = db.buffer_pool().new_page().unwrap();
        db.catalog().set_first_page(table, guard.page_id());
        guard
    } else {
        db.buffer_pool().fetch_page(schema.first_page).unwrap()
    };
    let page_id = guard.page_id();

    // Log first, mutate second.
    let slot_hint = guard.page().num_slots();
    db.wal()
        .log_insert(txn_id, page_id, slot_hint, &row)
        .unwrap();
    let slot_id = guard.page_mut().insert_record(&row).unwrap();
    drop(guard);

    let record_id = RecordId::new(page_id, slot_id);
    db.catalog()
        .with_index(table, |tree| tree.insert(id, record_id))
        .unwrap();
    db.catalog().update_row_count(table, 1);

    txn.lock().add_modified_page(page_id);
    db.commit(&txn).unwrap();
    record_id
}

fn read_id_column(db: &Database, table: &str, record_id: RecordId) -> i64 {
    let schema = db.catalog().get_table(table).unwrap();
    let guard = db.buffer_pool().fetch_page(record_id.page_id).unwrap();
    let page = guard.page();
    let bytes = page.get_record(record_id.slot_id).unwrap();
    let row = decode_row(bytes, schema.columns.len()).unwrap();
    row[0].as_int().unwrap()
}

#[test]
fn rows_persist_across_reopen_in_index_order() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("mini");

    {
        let db = Database::open(&base).unwrap();
        db.catalog()
            .create_table(
                "t",
                vec![
                    ColumnDef::new("id", ColumnType::Int).primary_key(),
                    ColumnDef::new("name", ColumnType::Varchar).with_size(16),
                ],
            )
            .unwrap();

        insert_row(&db, "t", 2, "b");
        insert_row(&db, "t", 1, "a");
        insert_row(&db, "t", 3, "c");
        db.close().unwrap();
    }

    let db = Database::open(&base).unwrap();
    assert_eq!(db.catalog().get_table("t").unwrap().row_count, 3);

    // The rebuilt index yields the rows in key order.
    let records = db.catalog().with_index("t", |tree| tree.scan_all()).unwrap();
    let ids: Vec<i64> = records
        .into_iter()
        .map(|record_id| read_id_column(&db, "t", record_id))
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn updates_and_deletes_survive_reopen() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("mini");
    let keep;
    let gone;

    {
        let db = Database::open(&base).unwrap();
        db.catalog()
            .create_table(
                "t",
                vec![
                    ColumnDef::new("id", ColumnType::Int).primary_key(),
                    ColumnDef::new("name", ColumnType::Varchar).with_size(16),
                ],
            )
            .unwrap();

        keep = insert_row(&db, "t", 10, "keep");
        gone = insert_row(&db, "t", 20, "gone");

        let txn = db.begin(IsolationLevel::ReadCommitted).unwrap();
        let txn_id = txn.lock().id();
        let mut guard = db.buffer_pool().fetch_page(gone.page_id).unwrap();
        let old = guard.page().get_record(gone.slot_id).unwrap().to_vec();
        db.wal()
            .log_delete(txn_id, gone.page_id, gone.slot_id, &old)
            .unwrap();
        guard.page_mut().delete_record(gone.slot_id).unwrap();
        drop(guard);
        db.catalog().with_index("t", |tree| tree.remove(20)).unwrap();
        db.catalog().update_row_count("t", -1);
        txn.lock().add_modified_page(gone.page_id);
        db.commit(&txn).unwrap();
        db.close().unwrap();
    }

    let db = Database::open(&base).unwrap();
    assert_eq!(read_id_column(&db, "t", keep), 10);
    assert_eq!(db.catalog().get_table("t").unwrap().row_count, 1);

    let guard = db.buffer_pool().fetch_page(gone.page_id).unwrap();
    assert!(guard.page().get_record(gone.slot_id).is_err());

    let keys = db.catalog().with_index("t", |tree| tree.scan_all()).unwrap();
    assert_eq!(keys, vec![keep]);
}

#[test]
fn free_list_reuse_does_not_shift_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reuse.db");
    let (p1, p2, p3, p4);

    {
        let mut fm = FileManager::open(&path).unwrap();
        p1 = fm.allocate_page().unwrap();
        p2 = fm.allocate_page().unwrap();
        p3 = fm.allocate_page().unwrap();

        for (page_id, content) in [(p1, "P1"), (p2, "P2"), (p3, "P3")] {
            let mut page = Page::new(page_id);
            page.insert_record(content.as_bytes()).unwrap();
            fm.write_page(page_id, &page).unwrap();
        }

        fm.deallocate_page(p2).unwrap();
        p4 = fm.allocate_page().unwrap();
        assert_eq!(p4, p2);

        let mut page = Page::new(p4);
        page.insert_record(b"P4").unwrap();
        fm.write_page(p4, &page).unwrap();
        fm.flush().unwrap();
    }

    let mut fm = FileManager::open(&path).unwrap();
    assert_eq!(fm.read_page(p1).unwrap().get_record(0).unwrap(), b"P1");
    assert_eq!(fm.read_page(p3).unwrap().get_record(0).unwrap(), b"P3");
    assert_eq!(fm.read_page(p4).unwrap().get_record(0).unwrap(), b"P4");
}
