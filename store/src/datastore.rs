// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Datastore Abstraction
//!
//! This module provides the transactional storage contract shared by every agent, and the typed
//! repository the engine uses on top of it.
//!
//! ## Architecture Overview
//!
//! The abstraction is built in two layers:
//!
//! - **[`Datastore`]** and **[`DatastoreContext`]**: the backend contract. A backend stores
//!   opaque [`Row`]s per [`Table`], each row carrying a small set of lookup columns
//!   ([`RowIndex`]) next to its encoded body. Every unit of work runs inside
//!   [`Datastore::transaction`]; the backend commits when the work returns `Ok` and rolls back
//!   otherwise.
//! - **[`DatastoreRepository`]**: typed row-level operations over [`Record`] types (messages,
//!   exceptions, reception awareness), used by steps, receivers and exception handlers.
//!
//! ## Transactions
//!
//! Transactions are short-lived: one per claim, per step decision or per exception record,
//! never held across a whole pipeline. Backends serialize transactions against the same
//! datastore, so a read followed by a write within one transaction cannot interleave with
//! another agent touching the same row.
//!
//! ```ignore
//! use store::datastore::{DatastoreExt, Query};
//!
//! let claimed = datastore.transact(|repository| {
//!     let mut batch = repository.find_out_messages(&Query::operation("ToBeSent").limit(10))?;
//!     for message in batch.iter_mut() {
//!         message.lock("Sending");
//!         repository.save(message)?;
//!     }
//!     Ok(batch)
//! })?;
//! ```
//!

use crate::{
    entity::{
        InException, InMessage, OutException, OutMessage,
    },
    error::Error,
    reception::ReceptionAwareness,
};

use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use std::{fmt, str::FromStr};

/// Tables known to every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    InMessages,
    OutMessages,
    InExceptions,
    OutExceptions,
    ReceptionAwareness,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::InMessages,
        Table::OutMessages,
        Table::InExceptions,
        Table::OutExceptions,
        Table::ReceptionAwareness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::InMessages => "InMessages",
            Table::OutMessages => "OutMessages",
            Table::InExceptions => "InExceptions",
            Table::OutExceptions => "OutExceptions",
            Table::ReceptionAwareness => "ReceptionAwareness",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|table| table.as_str() == value)
            .ok_or_else(|| {
                Error::InvalidValue(format!("'{}' is not a known table", value))
            })
    }
}

/// Lookup columns stored next to a row body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowIndex {
    pub ebms_message_id: Option<String>,
    pub ebms_ref_to_message_id: Option<String>,
    pub operation: Option<String>,
    pub status: Option<String>,
}

/// A stored row: lookup columns plus the encoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub index: RowIndex,
    pub data: Vec<u8>,
}

/// Equality filter on lookup columns. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub ebms_message_id: Option<String>,
    pub ebms_ref_to_message_id: Option<String>,
    pub operation: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn ebms_message_id(id: impl Into<String>) -> Self {
        Self {
            ebms_message_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn referencing(id: impl Into<String>) -> Self {
        Self {
            ebms_ref_to_message_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn operation(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..Self::default()
        }
    }

    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True when `index` satisfies every set field.
    pub fn matches(&self, index: &RowIndex) -> bool {
        fn field(expected: &Option<String>, actual: &Option<String>) -> bool {
            match expected {
                Some(expected) => actual.as_deref() == Some(expected.as_str()),
                None => true,
            }
        }
        field(&self.ebms_message_id, &index.ebms_message_id)
            && field(&self.ebms_ref_to_message_id, &index.ebms_ref_to_message_id)
            && field(&self.operation, &index.operation)
            && field(&self.status, &index.status)
    }
}

/// A typed record stored in one table.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + 'static {
    const TABLE: Table;

    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    fn index(&self) -> RowIndex;

    /// Called before every write.
    fn touch(&mut self) {}

    fn to_row(&self) -> Result<Row, Error> {
        Ok(Row {
            index: self.index(),
            data: bincode::serialize(self)?,
        })
    }

    fn from_row(id: i64, row: &Row) -> Result<Self, Error> {
        let mut record: Self = bincode::deserialize(&row.data)?;
        record.set_id(id);
        Ok(record)
    }
}

impl Record for InMessage {
    const TABLE: Table = Table::InMessages;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn index(&self) -> RowIndex {
        RowIndex {
            ebms_message_id: Some(self.ebms_message_id.clone()),
            ebms_ref_to_message_id: self.ebms_ref_to_message_id.clone(),
            operation: Some(self.operation.to_string()),
            status: Some(self.status.to_string()),
        }
    }

    fn touch(&mut self) {
        self.modification_time = Utc::now();
    }
}

impl Record for OutMessage {
    const TABLE: Table = Table::OutMessages;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn index(&self) -> RowIndex {
        RowIndex {
            ebms_message_id: Some(self.ebms_message_id.clone()),
            ebms_ref_to_message_id: self.ebms_ref_to_message_id.clone(),
            operation: Some(self.operation.to_string()),
            status: Some(self.status.to_string()),
        }
    }

    fn touch(&mut self) {
        self.modification_time = Utc::now();
    }
}

impl Record for InException {
    const TABLE: Table = Table::InExceptions;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn index(&self) -> RowIndex {
        RowIndex {
            ebms_message_id: None,
            ebms_ref_to_message_id: self.ebms_ref_to_message_id.clone(),
            operation: Some(self.operation.to_string()),
            status: None,
        }
    }

    fn touch(&mut self) {
        self.modification_time = Utc::now();
    }
}

impl Record for OutException {
    const TABLE: Table = Table::OutExceptions;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn index(&self) -> RowIndex {
        RowIndex {
            ebms_message_id: None,
            ebms_ref_to_message_id: self.ebms_ref_to_message_id.clone(),
            operation: Some(self.operation.to_string()),
            status: None,
        }
    }

    fn touch(&mut self) {
        self.modification_time = Utc::now();
    }
}

impl Record for ReceptionAwareness {
    const TABLE: Table = Table::ReceptionAwareness;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn index(&self) -> RowIndex {
        RowIndex {
            ebms_message_id: Some(self.ebms_message_id.clone()),
            ebms_ref_to_message_id: None,
            operation: None,
            status: Some(self.status().to_string()),
        }
    }
}

/// Row operations available inside a transaction.
pub trait DatastoreContext {
    /// Inserts a row and returns its new id.
    fn insert(&mut self, table: Table, row: Row) -> Result<i64, Error>;

    /// Reads a row by id.
    fn get(&self, table: Table, id: i64) -> Result<Option<Row>, Error>;

    /// Replaces an existing row. Fails with `EntryNotFound` when the id is unknown.
    fn update(&mut self, table: Table, id: i64, row: Row) -> Result<(), Error>;

    /// Rows matching `query`, ordered by id.
    fn select(&self, table: Table, query: &Query) -> Result<Vec<(i64, Row)>, Error>;
}

/// Unit of work executed inside one transaction.
pub type TransactionWork<'a> =
    dyn FnMut(&mut dyn DatastoreContext) -> Result<(), Error> + 'a;

/// A transactional datastore backend.
pub trait Datastore: Send + Sync + 'static {
    /// Creates the tables if they do not exist yet.
    fn ensure_created(&self) -> Result<(), Error>;

    /// Runs `work` in a transaction, committing when it returns `Ok`.
    fn transaction(&self, work: &mut TransactionWork<'_>) -> Result<(), Error>;
}

/// Typed access to [`Datastore::transaction`].
pub trait DatastoreExt {
    /// Runs `work` against a [`DatastoreRepository`] in one transaction.
    fn transact<T, F>(&self, work: F) -> Result<T, Error>
    where
        F: FnOnce(&mut DatastoreRepository<'_>) -> Result<T, Error>;
}

impl<D: Datastore + ?Sized> DatastoreExt for D {
    fn transact<T, F>(&self, work: F) -> Result<T, Error>
    where
        F: FnOnce(&mut DatastoreRepository<'_>) -> Result<T, Error>,
    {
        let mut work = Some(work);
        let mut output = None;
        self.transaction(&mut |context| {
            let work = work.take().ok_or_else(|| {
                Error::Store("Transaction work already consumed".to_owned())
            })?;
            let mut repository = DatastoreRepository::new(context);
            output = Some(work(&mut repository)?);
            Ok(())
        })?;
        output.ok_or_else(|| {
            Error::Store("Transaction finished without result".to_owned())
        })
    }
}

/// Typed row-level operations within one transaction.
pub struct DatastoreRepository<'a> {
    context: &'a mut dyn DatastoreContext,
}

impl<'a> DatastoreRepository<'a> {
    pub fn new(context: &'a mut dyn DatastoreContext) -> Self {
        Self { context }
    }

    /// Inserts `record`, assigning its id.
    pub fn insert<R: Record>(&mut self, record: &mut R) -> Result<i64, Error> {
        record.touch();
        let id = self.context.insert(R::TABLE, record.to_row()?)?;
        record.set_id(id);
        debug!("Inserted {} row {}.", R::TABLE, id);
        Ok(id)
    }

    pub fn get<R: Record>(&self, id: i64) -> Result<Option<R>, Error> {
        self.context
            .get(R::TABLE, id)?
            .map(|row| R::from_row(id, &row))
            .transpose()
    }

    /// Writes `record` over the row with the same id.
    pub fn save<R: Record>(&mut self, record: &mut R) -> Result<(), Error> {
        record.touch();
        self.context.update(R::TABLE, record.id(), record.to_row()?)
    }

    /// Loads a row, applies `mutate` and writes it back.
    pub fn update<R, F>(&mut self, id: i64, mutate: F) -> Result<R, Error>
    where
        R: Record,
        F: FnOnce(&mut R),
    {
        let mut record: R = self.get(id)?.ok_or_else(|| {
            Error::EntryNotFound(format!("{}/{}", R::TABLE, id))
        })?;
        mutate(&mut record);
        self.save(&mut record)?;
        Ok(record)
    }

    pub fn find<R: Record>(&self, query: &Query) -> Result<Vec<R>, Error> {
        self.context
            .select(R::TABLE, query)?
            .iter()
            .map(|(id, row)| R::from_row(*id, row))
            .collect()
    }

    pub fn insert_in_message(&mut self, message: &mut InMessage) -> Result<i64, Error> {
        self.insert(message)
    }

    pub fn insert_out_message(&mut self, message: &mut OutMessage) -> Result<i64, Error> {
        self.insert(message)
    }

    pub fn insert_in_exception(&mut self, exception: &mut InException) -> Result<i64, Error> {
        self.insert(exception)
    }

    pub fn insert_out_exception(&mut self, exception: &mut OutException) -> Result<i64, Error> {
        self.insert(exception)
    }

    pub fn insert_reception_awareness(
        &mut self,
        record: &mut ReceptionAwareness,
    ) -> Result<i64, Error> {
        self.insert(record)
    }

    pub fn update_in_message<F>(&mut self, id: i64, mutate: F) -> Result<InMessage, Error>
    where
        F: FnOnce(&mut InMessage),
    {
        self.update(id, mutate)
    }

    pub fn update_out_message<F>(&mut self, id: i64, mutate: F) -> Result<OutMessage, Error>
    where
        F: FnOnce(&mut OutMessage),
    {
        self.update(id, mutate)
    }

    pub fn update_reception_awareness<F>(
        &mut self,
        id: i64,
        mutate: F,
    ) -> Result<ReceptionAwareness, Error>
    where
        F: FnOnce(&mut ReceptionAwareness),
    {
        self.update(id, mutate)
    }

    /// Applies `mutate` to every out message with the given ebMS id.
    pub fn update_out_messages_by_ebms_id<F>(
        &mut self,
        ebms_message_id: &str,
        mut mutate: F,
    ) -> Result<usize, Error>
    where
        F: FnMut(&mut OutMessage),
    {
        let mut messages: Vec<OutMessage> =
            self.find(&Query::ebms_message_id(ebms_message_id))?;
        for message in messages.iter_mut() {
            mutate(message);
            self.save(message)?;
        }
        Ok(messages.len())
    }

    /// True when an in message matching both `query` and `predicate` exists.
    pub fn in_message_exists<P>(&self, query: &Query, predicate: P) -> Result<bool, Error>
    where
        P: Fn(&InMessage) -> bool,
    {
        let messages: Vec<InMessage> = self.find(query)?;
        Ok(messages.iter().any(predicate))
    }

    /// Projects a single out message through `selector`.
    pub fn get_out_message_data<T, F>(&self, id: i64, selector: F) -> Result<Option<T>, Error>
    where
        F: FnOnce(&OutMessage) -> T,
    {
        Ok(self.get::<OutMessage>(id)?.as_ref().map(selector))
    }

    pub fn get_in_message(&self, id: i64) -> Result<Option<InMessage>, Error> {
        self.get(id)
    }

    pub fn get_out_message(&self, id: i64) -> Result<Option<OutMessage>, Error> {
        self.get(id)
    }

    pub fn get_reception_awareness(&self, id: i64) -> Result<Option<ReceptionAwareness>, Error> {
        self.get(id)
    }

    pub fn find_in_messages(&self, query: &Query) -> Result<Vec<InMessage>, Error> {
        self.find(query)
    }

    pub fn find_out_messages(&self, query: &Query) -> Result<Vec<OutMessage>, Error> {
        self.find(query)
    }

    pub fn find_reception_awareness(&self, query: &Query) -> Result<Vec<ReceptionAwareness>, Error> {
        self.find(query)
    }
}

/// Generates the datastore contract test-suite for a backend.
///
/// `$factory` is an expression producing a fresh, created datastore.
#[macro_export]
macro_rules! test_datastore_trait {
    ($name:ident: $factory:expr) => {
        #[cfg(test)]
        mod $name {
            use super::*;
            use $crate::datastore::{Datastore, DatastoreExt, Query};
            use $crate::entity::{InMessage, MessageType, Operation, OutMessage};
            use $crate::error::Error;
            use $crate::reception::ReceptionAwareness;

            #[test]
            fn test_insert_and_get() {
                let datastore = $factory;
                let mut message = OutMessage::new("out-1", MessageType::UserMessage);
                let id = datastore
                    .transact(|repository| repository.insert_out_message(&mut message))
                    .unwrap();
                assert!(id > 0);
                let loaded = datastore
                    .transact(|repository| repository.get_out_message(id))
                    .unwrap()
                    .unwrap();
                assert_eq!(loaded.id, id);
                assert_eq!(loaded.ebms_message_id, "out-1");
            }

            #[test]
            fn test_update_and_query() {
                let datastore = $factory;
                let id = datastore
                    .transact(|repository| {
                        let mut message =
                            OutMessage::new("out-2", MessageType::UserMessage);
                        message.operation = Operation::ToBeSent;
                        repository.insert_out_message(&mut message)
                    })
                    .unwrap();

                let pending = datastore
                    .transact(|repository| {
                        repository.find_out_messages(&Query::operation("ToBeSent"))
                    })
                    .unwrap();
                assert_eq!(pending.len(), 1);

                datastore
                    .transact(|repository| {
                        repository.update_out_message(id, |message| {
                            message.lock("Sending");
                        })
                    })
                    .unwrap();

                let pending = datastore
                    .transact(|repository| {
                        repository.find_out_messages(&Query::operation("ToBeSent"))
                    })
                    .unwrap();
                assert!(pending.is_empty());
                let sending = datastore
                    .transact(|repository| {
                        repository.find_out_messages(&Query::operation("Sending"))
                    })
                    .unwrap();
                assert_eq!(sending.len(), 1);
            }

            #[test]
            fn test_rollback_on_error() {
                let datastore = $factory;
                let result: Result<(), Error> = datastore.transact(|repository| {
                    let mut message = InMessage::new("in-1", MessageType::Receipt);
                    repository.insert_in_message(&mut message)?;
                    Err(Error::Store("abort".to_owned()))
                });
                assert!(result.is_err());
                let exists = datastore
                    .transact(|repository| {
                        repository.in_message_exists(&Query::all(), |_| true)
                    })
                    .unwrap();
                assert!(!exists);
            }

            #[test]
            fn test_update_missing_row() {
                let datastore = $factory;
                let result = datastore.transact(|repository| {
                    repository.update_reception_awareness(404, |record| {
                        record.mark_completed();
                    })
                });
                assert!(matches!(result, Err(Error::EntryNotFound(_))));
            }

            #[test]
            fn test_query_by_reference_and_limit() {
                let datastore = $factory;
                datastore
                    .transact(|repository| {
                        for n in 0..3 {
                            let mut message = InMessage::new(
                                format!("receipt-{}", n),
                                MessageType::Receipt,
                            );
                            message.ebms_ref_to_message_id = Some("out-9".to_owned());
                            repository.insert_in_message(&mut message)?;
                        }
                        let mut record = ReceptionAwareness::new(1, "out-9");
                        repository.insert_reception_awareness(&mut record)?;
                        Ok(())
                    })
                    .unwrap();

                let answered = datastore
                    .transact(|repository| {
                        repository.in_message_exists(&Query::referencing("out-9"), |m| {
                            m.ebms_ref_to_message_id.as_deref() == Some("out-9")
                        })
                    })
                    .unwrap();
                assert!(answered);

                let limited = datastore
                    .transact(|repository| {
                        repository.find_in_messages(&Query::referencing("out-9").limit(2))
                    })
                    .unwrap();
                assert_eq!(limited.len(), 2);

                let pending = datastore
                    .transact(|repository| {
                        repository.find_reception_awareness(&Query::status("Pending"))
                    })
                    .unwrap();
                assert_eq!(pending.len(), 1);
                assert_eq!(pending[0].ebms_message_id, "out-9");
            }

            #[test]
            fn test_ensure_created_is_idempotent() {
                let datastore = $factory;
                assert!(datastore.ensure_created().is_ok());
                assert!(datastore.ensure_created().is_ok());
            }
        }
    };
}
