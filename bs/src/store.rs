//! Core Store implementation

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, params, params_from_iter};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::filter::Filter;
use crate::now_ms;
use crate::record::{IndexValue, Record};

/// Database file name inside the store directory
pub const DB_FILE: &str = "store.db";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);
CREATE TABLE IF NOT EXISTS record_indexes (
    collection TEXT NOT NULL,
    record_id TEXT NOT NULL,
    field TEXT NOT NULL,
    kind TEXT NOT NULL,
    value_text TEXT,
    value_int INTEGER
);
CREATE INDEX IF NOT EXISTS idx_record_indexes_lookup
    ON record_indexes (collection, field, kind, value_text, value_int);
CREATE INDEX IF NOT EXISTS idx_record_indexes_record
    ON record_indexes (collection, record_id);
";

/// SQLite-backed record store
///
/// Not `Sync`: callers own it from a single task (see the daemon's state actor).
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the store in `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        debug!(dir = %dir.display(), "Store::open: called");
        std::fs::create_dir_all(dir)?;

        let path = dir.join(DB_FILE);
        let conn = Connection::open(&path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), "Store opened");
        Ok(Self { conn, path: Some(path) })
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self, StoreError> {
        debug!("Store::open_in_memory: called");
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, path: None })
    }

    /// Path of the database file, if on disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert a new record, returning its id
    pub fn create<T: Record>(&mut self, record: T) -> Result<String, StoreError> {
        let collection = T::collection_name();
        let id = record.id().to_string();
        debug!(%collection, %id, "Store::create: called");

        let data = serde_json::to_string(&record)?;
        let tx = self.conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO records (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![collection, id, data, now_ms()],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                debug!(%collection, %id, "Store::create: id conflict");
                return Err(StoreError::AlreadyExists {
                    collection: collection.to_string(),
                    id,
                });
            }
            Err(e) => return Err(e.into()),
        }

        write_indexes(&tx, collection, &id, &record)?;
        tx.commit()?;
        Ok(id)
    }

    /// Fetch a record by id
    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>, StoreError> {
        let collection = T::collection_name();
        debug!(%collection, %id, "Store::get: called");

        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;

        data.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    /// Fetch the first record whose indexed `field` equals `value`
    pub fn get_by_field<T: Record>(&self, field: &str, value: impl Into<IndexValue>) -> Result<Option<T>, StoreError> {
        debug!(collection = T::collection_name(), %field, "Store::get_by_field: called");
        let mut found = self.list::<T>(&[Filter::eq(field, value)])?;
        Ok(if found.is_empty() { None } else { Some(found.swap_remove(0)) })
    }

    /// List records matching all filters, in id order
    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>, StoreError> {
        let collection = T::collection_name();
        debug!(%collection, filter_count = filters.len(), "Store::list: called");

        let mut sql = String::from("SELECT r.data FROM records r WHERE r.collection = ?");
        let mut bound: Vec<Value> = vec![Value::Text(collection.to_string())];
        for filter in filters {
            let (clause, params) = filter.to_sql()?;
            sql.push_str(" AND ");
            sql.push_str(&clause);
            bound.extend(params);
        }
        sql.push_str(" ORDER BY r.id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bound.iter()), |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row?)?);
        }
        debug!(%collection, count = records.len(), "Store::list: returning");
        Ok(records)
    }

    /// Replace an existing record and its index entries
    pub fn update<T: Record>(&mut self, record: T) -> Result<(), StoreError> {
        let collection = T::collection_name();
        let id = record.id().to_string();
        debug!(%collection, %id, "Store::update: called");

        let data = serde_json::to_string(&record)?;
        let tx = self.conn.transaction()?;

        let changed = tx.execute(
            "UPDATE records SET data = ?1, updated_at = ?2 WHERE collection = ?3 AND id = ?4",
            params![data, now_ms(), collection, id],
        )?;
        if changed == 0 {
            debug!(%collection, %id, "Store::update: record missing");
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id,
            });
        }

        write_indexes(&tx, collection, &id, &record)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a record; deleting a missing record is not an error
    pub fn delete<T: Record>(&mut self, id: &str) -> Result<(), StoreError> {
        let collection = T::collection_name();
        debug!(%collection, %id, "Store::delete: called");

        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM record_indexes WHERE collection = ?1 AND record_id = ?2",
            params![collection, id],
        )?;
        tx.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Rebuild index entries for every record of type `T`
    pub fn rebuild_indexes<T: Record>(&mut self) -> Result<usize, StoreError> {
        let collection = T::collection_name();
        debug!(%collection, "Store::rebuild_indexes: called");

        let records: Vec<T> = self.list(&[])?;
        let tx = self.conn.transaction()?;
        for record in &records {
            write_indexes(&tx, collection, record.id(), record)?;
        }
        tx.commit()?;

        debug!(%collection, count = records.len(), "Store::rebuild_indexes: done");
        Ok(records.len())
    }
}

fn write_indexes<T: Record>(tx: &Transaction<'_>, collection: &str, id: &str, record: &T) -> Result<(), StoreError> {
    tx.execute(
        "DELETE FROM record_indexes WHERE collection = ?1 AND record_id = ?2",
        params![collection, id],
    )?;

    let mut insert = tx.prepare_cached(
        "INSERT INTO record_indexes (collection, record_id, field, kind, value_text, value_int)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    for (field, value) in record.indexed_fields() {
        let kind = value.kind();
        match value {
            IndexValue::String(s) => {
                insert.execute(params![collection, id, field, kind, s, Option::<i64>::None])?;
            }
            IndexValue::Int(v) => {
                insert.execute(params![collection, id, field, kind, Option::<String>::None, v])?;
            }
            IndexValue::Bool(b) => {
                insert.execute(params![collection, id, field, kind, Option::<String>::None, b as i64])?;
            }
            IndexValue::List(items) => {
                for item in items {
                    insert.execute(params![collection, id, field, kind, item, Option::<i64>::None])?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        tags: Vec<String>,
        due: i64,
        done: bool,
    }

    impl Note {
        fn new(id: &str, tags: &[&str], due: i64) -> Self {
            Self {
                id: id.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                due,
                done: false,
            }
        }
    }

    impl Record for Note {
        fn id(&self) -> &str {
            &self.id
        }

        fn collection_name() -> &'static str {
            "notes"
        }

        fn indexed_fields(&self) -> HashMap<String, IndexValue> {
            let mut fields = HashMap::new();
            fields.insert("tags".to_string(), IndexValue::List(self.tags.clone()));
            fields.insert("due".to_string(), IndexValue::Int(self.due));
            fields.insert("done".to_string(), IndexValue::Bool(self.done));
            fields
        }
    }

    #[test]
    fn test_crud_roundtrip_on_disk() {
        let temp = tempdir().unwrap();
        let mut store = Store::open(temp.path()).unwrap();
        assert!(store.path().unwrap().ends_with(DB_FILE));

        let id = store.create(Note::new("n1", &["a"], 10)).unwrap();
        assert_eq!(id, "n1");

        let mut note: Note = store.get("n1").unwrap().unwrap();
        note.done = true;
        store.update(note.clone()).unwrap();
        assert_eq!(store.get::<Note>("n1").unwrap(), Some(note));

        store.delete::<Note>("n1").unwrap();
        assert!(store.get::<Note>("n1").unwrap().is_none());

        // Deleting again is a no-op
        store.delete::<Note>("n1").unwrap();
    }

    #[test]
    fn test_create_conflict() {
        let mut store = Store::open_in_memory().unwrap();
        store.create(Note::new("n1", &[], 0)).unwrap();
        let err = store.create(Note::new("n1", &[], 0)).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let mut store = Store::open_in_memory().unwrap();
        let err = store.update(Note::new("ghost", &[], 0)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_list_filters_are_anded() {
        let mut store = Store::open_in_memory().unwrap();
        store.create(Note::new("n1", &["x"], 5)).unwrap();
        store.create(Note::new("n2", &["x", "y"], 15)).unwrap();
        let mut done = Note::new("n3", &["y"], 1);
        done.done = true;
        store.create(done).unwrap();

        let due: Vec<Note> = store
            .list(&[
                Filter::new("due", FilterOp::Lte, 10i64),
                Filter::eq("done", false),
            ])
            .unwrap();
        assert_eq!(due.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(), vec!["n1"]);

        let tagged: Vec<Note> = store.list(&[Filter::new("tags", FilterOp::Contains, "y")]).unwrap();
        assert_eq!(tagged.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(), vec!["n2", "n3"]);

        let all: Vec<Note> = store.list(&[]).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_update_replaces_index_entries() {
        let mut store = Store::open_in_memory().unwrap();
        store.create(Note::new("n1", &["old"], 0)).unwrap();
        store.update(Note::new("n1", &["new"], 0)).unwrap();

        let old: Vec<Note> = store.list(&[Filter::new("tags", FilterOp::Contains, "old")]).unwrap();
        assert!(old.is_empty());
        let new: Vec<Note> = store.list(&[Filter::new("tags", FilterOp::Contains, "new")]).unwrap();
        assert_eq!(new.len(), 1);
    }

    #[test]
    fn test_get_by_field() {
        let mut store = Store::open_in_memory().unwrap();
        store.create(Note::new("n1", &[], 42)).unwrap();

        let found: Option<Note> = store.get_by_field("due", 42i64).unwrap();
        assert_eq!(found.map(|n| n.id), Some("n1".to_string()));
        let missing: Option<Note> = store.get_by_field("due", 7i64).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_rebuild_indexes_and_reopen() {
        let temp = tempdir().unwrap();
        {
            let mut store = Store::open(temp.path()).unwrap();
            store.create(Note::new("n1", &["a"], 1)).unwrap();
            store.create(Note::new("n2", &["b"], 2)).unwrap();
        }

        let mut store = Store::open(temp.path()).unwrap();
        assert_eq!(store.rebuild_indexes::<Note>().unwrap(), 2);
        let a: Vec<Note> = store.list(&[Filter::new("tags", FilterOp::Contains, "a")]).unwrap();
        assert_eq!(a.len(), 1);
    }
}
