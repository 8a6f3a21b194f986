//! # Catalog
//!
//! Persisted table and index descriptors, plus the in-memory B+ tree
//! indexes themselves. One mutex guards all catalog state; it is held
//! only for metadata reads/writes and index operations, never across
//! buffer-pool I/O.
//!
//! ## Catalog File Format
//!
//! Little-endian throughout:
//!
//! ```text
//! u32 table_count
//! per table:
//!   u32 name_len, name bytes
//!   u32 table_id
//!   u32 first_page
//!   u64 row_count
//!   u32 column_count
//!   per column:
//!     u32 name_len, name bytes
//!     u8  type_tag
//!     u16 size
//!     u8  is_primary_key
//!     u8  is_nullable
//!     u16 column_id
//!   u8  has_pk (1 => followed by u16 pk_column_id)
//! u32 next_table_id
//! ```
//!
//! ## Indexes
//!
//! Every table gets a primary index (keyed by the table name) at
//! creation; when the table declares a primary key, that index is also
//! surfaced as an [`IndexDef`] with `primary` set, listed by
//! [`indexes_for_table`](Catalog::indexes_for_table) and refused by
//! [`drop_index`](Catalog::drop_index). Named secondary indexes carry
//! their own `IndexDef`. Index contents are in-memory only: after a
//! reopen, [`rebuild_index`](Catalog::rebuild_index) reconstructs a
//! table's primary index by scanning its page chain, and the primary
//! `IndexDef` is re-derived from the schema in
//! [`load`](Catalog::load).

use std::collections::HashMap;
use std::path::Path;

use log::{info, warn};
use parking_lot::Mutex;

use crate::btree::BTree;
use crate::config::DEFAULT_BTREE_ORDER;
use crate::error::{Error, Result};
use crate::records::decode_row;
use crate::schema::{ColumnDef, ColumnType, IndexDef, TableSchema};
use crate::storage::{BufferPool, PageId, RecordId, SlotId, TableId, INVALID_PAGE_ID};

struct CatalogInner {
    tables: HashMap<String, TableSchema>,
    /// Primary indexes are keyed by table name, named secondary indexes
    /// by their own name.
    indexes: HashMap<String, BTree>,
    index_info: HashMap<String, IndexDef>,
    next_table_id: TableId,
}

pub struct Catalog {
    inner: Mutex<CatalogInner>,
    btree_order: usize,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(DEFAULT_BTREE_ORDER)
    }
}

impl Catalog {
    pub fn new(btree_order: usize) -> Self {
        Self {
            inner: Mutex::new(CatalogInner {
                tables: HashMap::new(),
                indexes: HashMap::new(),
                index_info: HashMap::new(),
                next_table_id: 1,
            }),
            btree_order,
        }
    }

    pub fn create_table(&self, name: &str, columns: Vec<ColumnDef>) -> Result<TableId> {
        let mut inner = self.inner.lock();
        if inner.tables.contains_key(name) {
            return Err(Error::Catalog(format!("table '{}' already exists", name)));
        }
        if columns.is_empty() {
            return Err(Error::Catalog(format!("table '{}' has no columns", name)));
        }

        let table_id = inner.next_table_id;
        inner.next_table_id += 1;

        let schema = TableSchema::new(table_id, name, columns);
        let primary_def = primary_index_def(&schema);
        inner.tables.insert(name.to_string(), schema);
        inner
            .indexes
            .entry(name.to_string())
            .or_insert_with(|| BTree::new(self.btree_order));
        if let Some(def) = primary_def {
            inner.index_info.insert(name.to_string(), def);
        }
        Ok(table_id)
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.tables.remove(name).is_none() {
            return Err(Error::Catalog(format!("table '{}' does not exist", name)));
        }
        inner.indexes.remove(name);

        let named: Vec<String> = inner
            .index_info
            .iter()
            .filter(|(_, def)| def.table == name)
            .map(|(index_name, _)| index_name.clone())
            .collect();
        for index_name in named {
            inner.indexes.remove(&index_name);
            inner.index_info.remove(&index_name);
        }
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.inner.lock().tables.contains_key(name)
    }

    pub fn get_table(&self, name: &str) -> Option<TableSchema> {
        self.inner.lock().tables.get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Adjust a table's row count. Deltas below zero saturate at zero
    /// rather than wrapping.
    pub fn update_row_count(&self, name: &str, delta: i64) {
        let mut inner = self.inner.lock();
        if let Some(schema) = inner.tables.get_mut(name) {
            schema.row_count = if delta < 0 {
                schema.row_count.saturating_sub(delta.unsigned_abs())
            } else {
                schema.row_count.saturating_add(delta as u64)
            };
        }
    }

    pub fn set_first_page(&self, name: &str, page_id: PageId) {
        let mut inner = self.inner.lock();
        if let Some(schema) = inner.tables.get_mut(name) {
            schema.first_page = page_id;
        }
    }

    /// Ensure a table has its primary index tree.
    pub fn create_index(&self, table: &str) {
        let mut inner = self.inner.lock();
        if !inner.indexes.contains_key(table) {
            inner
                .indexes
                .insert(table.to_string(), BTree::new(self.btree_order));
        }
    }

    pub fn create_named_index(
        &self,
        index_name: &str,
        table: &str,
        columns: Vec<String>,
        unique: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.indexes.contains_key(index_name) || inner.index_info.contains_key(index_name) {
            return Err(Error::Catalog(format!(
                "index '{}' already exists",
                index_name
            )));
        }
        let Some(schema) = inner.tables.get(table) else {
            return Err(Error::Catalog(format!("table '{}' does not exist", table)));
        };
        for column in &columns {
            if schema.column_index(column).is_none() {
                return Err(Error::Catalog(format!(
                    "column '{}' does not exist in table '{}'",
                    column, table
                )));
            }
        }

        inner
            .indexes
            .insert(index_name.to_string(), BTree::new(self.btree_order));
        inner.index_info.insert(
            index_name.to_string(),
            IndexDef {
                name: index_name.to_string(),
                table: table.to_string(),
                columns,
                unique,
                primary: false,
            },
        );
        Ok(())
    }

    /// Drop a named secondary index. A table's primary index is refused:
    /// it lives and dies with the table.
    pub fn drop_index(&self, index_name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner
            .index_info
            .get(index_name)
            .is_some_and(|def| def.primary)
        {
            return Err(Error::Catalog(format!(
                "cannot drop primary index '{}'",
                index_name
            )));
        }
        if inner.indexes.remove(index_name).is_none() {
            return Err(Error::Catalog(format!(
                "index '{}' does not exist",
                index_name
            )));
        }
        inner.index_info.remove(index_name);
        Ok(())
    }

    pub fn index_exists(&self, index_name: &str) -> bool {
        let inner = self.inner.lock();
        inner.indexes.contains_key(index_name) || inner.index_info.contains_key(index_name)
    }

    pub fn indexes_for_table(&self, table: &str) -> Vec<IndexDef> {
        let inner = self.inner.lock();
        let mut defs: Vec<IndexDef> = inner
            .index_info
            .values()
            .filter(|def| def.table == table)
            .cloned()
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().index_info.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run `f` against an index under the catalog mutex, the only safe
    /// exposure of tree mutation. `name` is a table name for the primary
    /// index or a secondary index name.
    pub fn with_index<R>(&self, name: &str, f: impl FnOnce(&mut BTree) -> R) -> Result<R> {
        let mut inner = self.inner.lock();
        let tree = inner
            .indexes
            .get_mut(name)
            .ok_or_else(|| Error::Catalog(format!("no index '{}'", name)))?;
        Ok(f(tree))
    }

    /// Rebuild a table's primary index by scanning its page chain and
    /// re-inserting every live row's INT primary key. Pages are fetched
    /// without holding the catalog mutex.
    pub fn rebuild_index(&self, table: &str, pool: &BufferPool) -> Result<()> {
        let Some(schema) = self.get_table(table) else {
            return Err(Error::Catalog(format!("table '{}' does not exist", table)));
        };
        let Some(pk_column) = schema.primary_key_column else {
            return Ok(());
        };
        let pk_index = pk_column as usize;

        let mut entries: Vec<(i64, RecordId)> = Vec::new();
        let mut page_id = schema.first_page;
        while page_id != INVALID_PAGE_ID {
            let guard = pool.fetch_page(page_id)?;
            let page = guard.page();
            for slot_id in 0..page.num_slots() {
                let Ok(bytes) = page.get_record(slot_id) else {
                    continue;
                };
                match decode_row(bytes, schema.columns.len()) {
                    Ok(row) => {
                        if let Some(key) = row.get(pk_index).and_then(|v| v.as_int()) {
                            entries.push((key, RecordId::new(page_id, slot_id as SlotId)));
                        }
                    }
                    Err(err) => warn!(
                        "rebuild of '{}' skipping page {} slot {}: {}",
                        table, page_id, slot_id, err
                    ),
                }
            }
            let next = page.next_page();
            drop(page);
            drop(guard);
            page_id = next;
        }

        let count = entries.len();
        self.with_index(table, move |tree| {
            tree.clear();
            for (key, record_id) in entries {
                tree.insert(key, record_id);
            }
        })?;
        info!("rebuilt index for '{}' with {} entries", table, count);
        Ok(())
    }

    /// Write the catalog file (format in the module docs). Tables are
    /// written in name order so the file is deterministic.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let inner = self.inner.lock();

        let mut names: Vec<&String> = inner.tables.keys().collect();
        names.sort();

        let mut out: Vec<u8> = Vec::new();
        out.extend_from_slice(&(inner.tables.len() as u32).to_le_bytes());

        for name in names {
            let schema = &inner.tables[name];
            write_string(&mut out, &schema.name);
            out.extend_from_slice(&schema.id.to_le_bytes());
            out.extend_from_slice(&schema.first_page.to_le_bytes());
            out.extend_from_slice(&schema.row_count.to_le_bytes());
            out.extend_from_slice(&(schema.columns.len() as u32).to_le_bytes());

            for column in &schema.columns {
                write_string(&mut out, &column.name);
                out.push(column.column_type as u8);
                out.extend_from_slice(&column.size.to_le_bytes());
                out.push(u8::from(column.primary_key));
                out.push(u8::from(column.nullable));
                out.extend_from_slice(&column.id.to_le_bytes());
            }

            match schema.primary_key_column {
                Some(pk) => {
                    out.push(1);
                    out.extend_from_slice(&pk.to_le_bytes());
                }
                None => out.push(0),
            }
        }

        out.extend_from_slice(&inner.next_table_id.to_le_bytes());
        std::fs::write(path, out)?;
        Ok(())
    }

    /// Load the catalog file, replacing all in-memory state. A missing
    /// file leaves the catalog empty (fresh database).
    pub fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(());
        }
        let bytes = std::fs::read(path)?;
        let mut reader = Reader::new(&bytes);

        let mut tables = HashMap::new();
        let mut indexes = HashMap::new();
        let mut index_info = HashMap::new();

        let table_count = reader.u32()?;
        for _ in 0..table_count {
            let name = reader.string()?;
            let id = reader.u32()?;
            let first_page = reader.u32()?;
            let row_count = reader.u64()?;
            let column_count = reader.u32()?;

            let mut columns = Vec::with_capacity(column_count as usize);
            for _ in 0..column_count {
                let column_name = reader.string()?;
                let tag = reader.u8()?;
                let column_type = ColumnType::from_tag(tag)
                    .ok_or_else(|| Error::Catalog(format!("bad column type tag {}", tag)))?;
                let size = reader.u16()?;
                let primary_key = reader.u8()? != 0;
                let nullable = reader.u8()? != 0;
                let column_id = reader.u16()?;
                columns.push(ColumnDef {
                    name: column_name,
                    column_type,
                    size,
                    primary_key,
                    nullable,
                    id: column_id,
                });
            }

            let primary_key_column = if reader.u8()? != 0 {
                Some(reader.u16()?)
            } else {
                None
            };

            let schema = TableSchema {
                id,
                name: name.clone(),
                columns,
                primary_key_column,
                first_page,
                row_count,
            };
            if let Some(def) = primary_index_def(&schema) {
                index_info.insert(name.clone(), def);
            }
            indexes.insert(name.clone(), BTree::new(self.btree_order));
            tables.insert(name, schema);
        }
        let next_table_id = reader.u32()?;

        let mut inner = self.inner.lock();
        inner.tables = tables;
        inner.indexes = indexes;
        inner.index_info = index_info;
        inner.next_table_id = next_table_id;
        info!("catalog loaded: {} tables", inner.tables.len());
        Ok(())
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// The descriptor of a table's primary index, named after the table;
/// `None` when the table declares no primary key.
fn primary_index_def(schema: &TableSchema) -> Option<IndexDef> {
    let pk = schema.primary_key_column?;
    let column = schema.columns.get(pk as usize)?;
    Some(IndexDef {
        name: schema.name.clone(),
        table: schema.name.clone(),
        columns: vec![column.name.clone()],
        unique: true,
        primary: true,
    })
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let slice = self
            .bytes
            .get(self.offset..self.offset + n)
            .ok_or_else(|| Error::Catalog("catalog file truncated".into()))?;
        self.offset += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn users_columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", ColumnType::Int).primary_key(),
            ColumnDef::new("name", ColumnType::Varchar).with_size(16),
        ]
    }

    #[test]
    fn create_table_assigns_ids_and_index() {
        let catalog = Catalog::default();
        let id = catalog.create_table("users", users_columns()).unwrap();
        assert_eq!(id, 1);
        assert!(catalog.table_exists("users"));
        assert!(catalog.with_index("users", |tree| tree.is_empty()).unwrap());

        let defs = catalog.indexes_for_table("users");
        assert_eq!(defs.len(), 1);
        assert!(defs[0].primary);
        assert!(defs[0].unique);
        assert_eq!(defs[0].name, "users");
        assert_eq!(defs[0].columns, vec!["id".to_string()]);

        let second = catalog.create_table("orders", users_columns()).unwrap();
        assert_eq!(second, 2);
    }

    #[test]
    fn table_without_primary_key_gets_no_primary_def() {
        let catalog = Catalog::default();
        catalog
            .create_table(
                "plain",
                vec![ColumnDef::new("data", ColumnType::Varchar).with_size(32)],
            )
            .unwrap();

        assert!(catalog.indexes_for_table("plain").is_empty());
        assert!(catalog.with_index("plain", |tree| tree.is_empty()).unwrap());
    }

    #[test]
    fn duplicate_table_rejected() {
        let catalog = Catalog::default();
        catalog.create_table("users", users_columns()).unwrap();
        assert!(matches!(
            catalog.create_table("users", users_columns()),
            Err(Error::Catalog(_))
        ));
    }

    #[test]
    fn drop_table_removes_indexes() {
        let catalog = Catalog::default();
        catalog.create_table("users", users_columns()).unwrap();
        catalog
            .create_named_index("users_name", "users", vec!["name".into()], false)
            .unwrap();

        catalog.drop_table("users").unwrap();
        assert!(!catalog.table_exists("users"));
        assert!(!catalog.index_exists("users_name"));
        assert!(catalog.with_index("users", |_| ()).is_err());
    }

    #[test]
    fn row_count_clamps_at_zero() {
        let catalog = Catalog::default();
        catalog.create_table("t", users_columns()).unwrap();

        catalog.update_row_count("t", 5);
        assert_eq!(catalog.get_table("t").unwrap().row_count, 5);

        catalog.update_row_count("t", -10);
        assert_eq!(catalog.get_table("t").unwrap().row_count, 0);
    }

    #[test]
    fn named_index_requires_table_and_columns() {
        let catalog = Catalog::default();
        catalog.create_table("users", users_columns()).unwrap();

        assert!(matches!(
            catalog.create_named_index("idx", "missing", vec!["id".into()], false),
            Err(Error::Catalog(_))
        ));
        assert!(matches!(
            catalog.create_named_index("idx", "users", vec!["nope".into()], false),
            Err(Error::Catalog(_))
        ));

        catalog
            .create_named_index("idx", "users", vec!["id".into()], true)
            .unwrap();
        assert!(catalog.index_exists("idx"));
        assert!(matches!(
            catalog.create_named_index("idx", "users", vec!["id".into()], true),
            Err(Error::Catalog(_))
        ));

        // Primary and secondary, sorted by name.
        let defs = catalog.indexes_for_table("users");
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "idx");
        assert!(!defs[0].primary);
        assert_eq!(defs[1].name, "users");
        assert!(defs[1].primary);
    }

    #[test]
    fn primary_index_cannot_be_dropped() {
        let catalog = Catalog::default();
        catalog.create_table("users", users_columns()).unwrap();
        catalog
            .create_named_index("idx", "users", vec!["name".into()], false)
            .unwrap();

        assert!(matches!(
            catalog.drop_index("users"),
            Err(Error::Catalog(_))
        ));
        assert!(catalog.with_index("users", |_| ()).is_ok());

        catalog.drop_index("idx").unwrap();
        assert!(!catalog.index_exists("idx"));
    }

    #[test]
    fn save_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.cat");

        let catalog = Catalog::default();
        catalog.create_table("users", users_columns()).unwrap();
        catalog.update_row_count("users", 3);
        catalog.set_first_page("users", 7);
        catalog.save(&path).unwrap();

        let restored = Catalog::default();
        restored.load(&path).unwrap();

        let schema = restored.get_table("users").unwrap();
        assert_eq!(schema, catalog.get_table("users").unwrap());
        assert_eq!(schema.row_count, 3);
        assert_eq!(schema.first_page, 7);
        assert_eq!(schema.primary_key_column, Some(0));

        // The primary index descriptor is re-derived from the schema.
        let defs = restored.indexes_for_table("users");
        assert_eq!(defs.len(), 1);
        assert!(defs[0].primary);

        // Table ids keep advancing from the persisted high-water mark.
        let next = restored.create_table("orders", users_columns()).unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn load_missing_file_is_fresh_catalog() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::default();
        catalog.load(dir.path().join("absent.cat")).unwrap();
        assert!(catalog.table_names().is_empty());
    }

    #[test]
    fn load_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.cat");
        std::fs::write(&path, [3, 0, 0, 0, 9]).unwrap();

        let catalog = Catalog::default();
        assert!(matches!(catalog.load(&path), Err(Error::Catalog(_))));
    }
}
