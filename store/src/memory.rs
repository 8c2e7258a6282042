// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Memory datastore implementation.
//!

use crate::{
    datastore::{Datastore, DatastoreContext, Query, Row, Table, TransactionWork},
    error::Error,
};

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

#[derive(Default, Clone)]
struct Tables {
    rows: HashMap<Table, BTreeMap<i64, Row>>,
    next_ids: HashMap<Table, i64>,
}

/// Datastore kept in process memory. Transactions run on a copy of the tables that replaces the
/// committed state only when the work succeeds.
#[derive(Default, Clone)]
pub struct MemoryDatastore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Datastore for MemoryDatastore {
    fn ensure_created(&self) -> Result<(), Error> {
        Ok(())
    }

    fn transaction(&self, work: &mut TransactionWork<'_>) -> Result<(), Error> {
        let mut committed = self.tables.lock().map_err(|e| {
            Error::Store(format!("Can not lock datastore: {}", e))
        })?;
        let mut working = committed.clone();
        {
            let mut context = MemoryContext {
                tables: &mut working,
            };
            work(&mut context)?;
        }
        *committed = working;
        Ok(())
    }
}

struct MemoryContext<'a> {
    tables: &'a mut Tables,
}

impl DatastoreContext for MemoryContext<'_> {
    fn insert(&mut self, table: Table, row: Row) -> Result<i64, Error> {
        let next = self.tables.next_ids.entry(table).or_insert(0);
        *next += 1;
        let id = *next;
        self.tables.rows.entry(table).or_default().insert(id, row);
        Ok(id)
    }

    fn get(&self, table: Table, id: i64) -> Result<Option<Row>, Error> {
        Ok(self
            .tables
            .rows
            .get(&table)
            .and_then(|rows| rows.get(&id))
            .cloned())
    }

    fn update(&mut self, table: Table, id: i64, row: Row) -> Result<(), Error> {
        match self
            .tables
            .rows
            .get_mut(&table)
            .and_then(|rows| rows.get_mut(&id))
        {
            Some(stored) => {
                *stored = row;
                Ok(())
            }
            None => Err(Error::EntryNotFound(format!("{}/{}", table, id))),
        }
    }

    fn select(&self, table: Table, query: &Query) -> Result<Vec<(i64, Row)>, Error> {
        let Some(rows) = self.tables.rows.get(&table) else {
            return Ok(Vec::new());
        };
        let matching = rows
            .iter()
            .filter(|(_, row)| query.matches(&row.index))
            .map(|(id, row)| (*id, row.clone()));
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }
}
