// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # SQLite datastore backend.
//!
//! One table per entity. Each table holds the lookup columns of [`RowIndex`] next to the encoded
//! record in `value`. Transactions start with `BEGIN IMMEDIATE`, so concurrent agents (and
//! concurrent processes on the same file) serialize their writes.
//!

use store::{
    Error,
    datastore::{Datastore, DatastoreContext, Query, Row, RowIndex, Table, TransactionWork},
};

use rusqlite::{
    Connection, OpenFlags, OptionalExtension, TransactionBehavior, params,
    params_from_iter,
};
use tracing::{debug, info};

use std::sync::{Arc, Mutex};
use std::{fs, path::Path};

const COLUMNS: &str =
    "id, ebms_message_id, ebms_ref_to_message_id, operation, status, value";

#[derive(Clone)]
pub struct SqliteDatastore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatastore {
    /// Opens (or creates) `database.db` inside the directory `path`.
    pub fn new(path: &str) -> Result<Self, Error> {
        info!("Creating SQLite datastore");
        if !Path::new(&path).exists() {
            info!("Path does not exist, creating it");
            fs::create_dir_all(path).map_err(|e| {
                Error::CreateStore(format!(
                    "fail SQLite create directory: {}",
                    e
                ))
            })?;
        }

        info!("Opening SQLite connection");
        let conn = open(format!("{}/database.db", path)).map_err(|e| {
            Error::CreateStore(format!("fail SQLite open connection: {}", e))
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A private in-memory database.
    pub fn in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(|e| {
            Error::CreateStore(format!("fail SQLite open connection: {}", e))
        })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn table_name(table: Table) -> &'static str {
    match table {
        Table::InMessages => "in_messages",
        Table::OutMessages => "out_messages",
        Table::InExceptions => "in_exceptions",
        Table::OutExceptions => "out_exceptions",
        Table::ReceptionAwareness => "reception_awareness",
    }
}

impl Datastore for SqliteDatastore {
    fn ensure_created(&self) -> Result<(), Error> {
        let conn = self.conn.lock().map_err(|e| {
            Error::Store(format!("sqlite open connection: {}", e))
        })?;
        for table in Table::ALL {
            let name = table_name(table);
            let stmt = format!(
                "CREATE TABLE IF NOT EXISTS {name} (id INTEGER PRIMARY KEY AUTOINCREMENT, \
                ebms_message_id TEXT, ebms_ref_to_message_id TEXT, operation TEXT, \
                status TEXT, value BLOB NOT NULL);
                CREATE INDEX IF NOT EXISTS ix_{name}_ebms_message_id ON {name} (ebms_message_id);
                CREATE INDEX IF NOT EXISTS ix_{name}_ref ON {name} (ebms_ref_to_message_id);
                CREATE INDEX IF NOT EXISTS ix_{name}_operation ON {name} (operation);
                CREATE INDEX IF NOT EXISTS ix_{name}_status ON {name} (status);"
            );
            conn.execute_batch(&stmt).map_err(|e| {
                Error::CreateStore(format!("fail SQLite create table: {}", e))
            })?;
        }
        debug!("SQLite tables ready");
        Ok(())
    }

    fn transaction(&self, work: &mut TransactionWork<'_>) -> Result<(), Error> {
        let mut conn = self.conn.lock().map_err(|e| {
            Error::Store(format!("sqlite open connection: {}", e))
        })?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Store(format!("sqlite begin error: {}", e)))?;
        {
            let mut context = SqliteContext { conn: &tx };
            // Dropping `tx` without commit rolls back.
            work(&mut context)?;
        }
        tx.commit()
            .map_err(|e| Error::Store(format!("sqlite commit error: {}", e)))
    }
}

struct SqliteContext<'a> {
    conn: &'a Connection,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, Row)> {
    Ok((
        row.get(0)?,
        Row {
            index: RowIndex {
                ebms_message_id: row.get(1)?,
                ebms_ref_to_message_id: row.get(2)?,
                operation: row.get(3)?,
                status: row.get(4)?,
            },
            data: row.get(5)?,
        },
    ))
}

impl DatastoreContext for SqliteContext<'_> {
    fn insert(&mut self, table: Table, row: Row) -> Result<i64, Error> {
        let stmt = format!(
            "INSERT INTO {} (ebms_message_id, ebms_ref_to_message_id, operation, status, value) \
            VALUES (?1, ?2, ?3, ?4, ?5)",
            table_name(table)
        );
        self.conn
            .execute(
                &stmt,
                params![
                    row.index.ebms_message_id,
                    row.index.ebms_ref_to_message_id,
                    row.index.operation,
                    row.index.status,
                    row.data
                ],
            )
            .map_err(|e| Error::Store(format!("sqlite insert error: {}", e)))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get(&self, table: Table, id: i64) -> Result<Option<Row>, Error> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = ?1",
            COLUMNS,
            table_name(table)
        );
        let row = self
            .conn
            .query_row(&query, params![id], read_row)
            .optional()
            .map_err(|e| Error::Get(e.to_string()))?;
        Ok(row.map(|(_, row)| row))
    }

    fn update(&mut self, table: Table, id: i64, row: Row) -> Result<(), Error> {
        let stmt = format!(
            "UPDATE {} SET ebms_message_id = ?1, ebms_ref_to_message_id = ?2, \
            operation = ?3, status = ?4, value = ?5 WHERE id = ?6",
            table_name(table)
        );
        let changed = self
            .conn
            .execute(
                &stmt,
                params![
                    row.index.ebms_message_id,
                    row.index.ebms_ref_to_message_id,
                    row.index.operation,
                    row.index.status,
                    row.data,
                    id
                ],
            )
            .map_err(|e| Error::Store(format!("sqlite update error: {}", e)))?;
        if changed == 0 {
            return Err(Error::EntryNotFound(format!("{}/{}", table, id)));
        }
        Ok(())
    }

    fn select(&self, table: Table, query: &Query) -> Result<Vec<(i64, Row)>, Error> {
        let mut conditions = Vec::new();
        let mut values = Vec::new();
        let filters = [
            ("ebms_message_id", &query.ebms_message_id),
            ("ebms_ref_to_message_id", &query.ebms_ref_to_message_id),
            ("operation", &query.operation),
            ("status", &query.status),
        ];
        for (column, value) in filters {
            if let Some(value) = value {
                values.push(value.clone());
                conditions.push(format!("{} = ?{}", column, values.len()));
            }
        }

        let mut sql = format!("SELECT {} FROM {}", COLUMNS, table_name(table));
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY id ASC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| Error::Get(e.to_string()))?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), read_row)
            .map_err(|e| Error::Get(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Get(e.to_string()))
    }
}

pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection, Error> {
    let path = path.as_ref();
    let flags =
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let conn = Connection::open_with_flags(path, flags).map_err(|e| {
        Error::Store(format!("SQLite failed to open connection: {}", e))
    })?;

    conn.execute_batch(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        ",
    )
    .map_err(|e| {
        Error::Store(format!("SQLite failed to execute batch: {}", e))
    })?;

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::test_datastore_trait;

    fn created() -> SqliteDatastore {
        let datastore = SqliteDatastore::in_memory().unwrap();
        datastore.ensure_created().unwrap();
        datastore
    }

    test_datastore_trait! {
        unit_test_sqlite_datastore: created()
    }
}
