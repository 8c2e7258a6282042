// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Datastore poller
//!
//! Claims rows of one table whose operation (or status) equals `value`, flipping it to `update`
//! in the same transaction so no other poller picks them again.
//!

use super::{optional, polling_interval, required};
use crate::services::Services;

use agent::{
    Error, MessageCallback, PollingReceiver, PollingSource, ReceivedMessage, Settings,
};
use store::{
    DatastoreRepository, InException, InMessage, InStatus, Operation, OutException, OutMessage,
    OutStatus, Query, ReceptionAwareness, ReceptionStatus, Record, Table,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use std::str::FromStr;

const DEFAULT_BATCH_SIZE: usize = 20;

/// Lookup column a datastore poller filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Operation,
    Status,
}

impl FromStr for FilterField {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Operation" => Ok(FilterField::Operation),
            "Status" => Ok(FilterField::Status),
            _ => Err(Error::Configuration(format!("Unknown filter field '{}'", value))),
        }
    }
}

pub struct DatastoreSource {
    services: Services,
    table: Table,
    field: FilterField,
    value: String,
    update: String,
    batch_size: usize,
}

impl DatastoreSource {
    pub fn new(services: Services, settings: &Settings) -> Result<Self, Error> {
        let table: Table = required(settings, "table")?
            .parse()
            .map_err(|e: store::Error| Error::Configuration(e.to_string()))?;
        let field = optional(settings, "field", FilterField::Operation)?;
        let value = required(settings, "value")?.to_owned();
        let update = required(settings, "update")?.to_owned();
        let batch_size = optional(settings, "batch_size", DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(Error::Configuration(
                "Receiver batch_size must be greater than zero".to_owned(),
            ));
        }

        validate(table, field, &value)?;
        validate(table, field, &update)?;
        if field == FilterField::Operation && update == Operation::default().as_str() {
            return Err(Error::Configuration(format!(
                "Receiver on {} can not claim rows with '{}'",
                table, update
            )));
        }

        Ok(Self {
            services,
            table,
            field,
            value,
            update,
            batch_size,
        })
    }

    /// A polling receiver over this source.
    pub fn receiver(
        services: Services,
        settings: &Settings,
    ) -> Result<PollingReceiver<DatastoreSource>, Error> {
        let interval = polling_interval(settings)?;
        Ok(PollingReceiver::new(Self::new(services, settings)?, interval))
    }

    pub fn table(&self) -> Table {
        self.table
    }

    fn query(&self) -> Query {
        let query = match self.field {
            FilterField::Operation => Query::operation(self.value.clone()),
            FilterField::Status => Query::status(self.value.clone()),
        };
        query.limit(self.batch_size)
    }
}

fn validate(table: Table, field: FilterField, value: &str) -> Result<(), Error> {
    let valid = match (table, field) {
        (Table::ReceptionAwareness, FilterField::Status) => {
            value.parse::<ReceptionStatus>().is_ok()
        }
        (Table::ReceptionAwareness, FilterField::Operation) => false,
        (_, FilterField::Operation) => value.parse::<Operation>().is_ok(),
        (Table::InMessages, FilterField::Status) => value.parse::<InStatus>().is_ok(),
        (Table::OutMessages, FilterField::Status) => value.parse::<OutStatus>().is_ok(),
        (_, FilterField::Status) => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "'{}' is not a valid {:?} of {}",
            value, field, table
        )))
    }
}

/// Locks every row matching `query`, keeping the ones `lock` changed.
fn claim<R, F>(
    repository: &mut DatastoreRepository<'_>,
    query: &Query,
    lock: F,
) -> Result<Vec<R>, store::Error>
where
    R: Record,
    F: Fn(&mut R) -> bool,
{
    let mut claimed = Vec::new();
    for mut record in repository.find::<R>(query)? {
        if lock(&mut record) {
            repository.save(&mut record)?;
            claimed.push(record);
        }
    }
    Ok(claimed)
}

fn wrap<R>(records: Vec<R>, variant: fn(R) -> ReceivedMessage) -> Vec<ReceivedMessage> {
    records.into_iter().map(variant).collect()
}

#[async_trait]
impl PollingSource for DatastoreSource {
    type Item = ReceivedMessage;

    async fn get_batch(&self) -> Result<Vec<ReceivedMessage>, Error> {
        let table = self.table;
        let field = self.field;
        let update = self.update.clone();
        let query = self.query();

        self.services
            .transact(move |repository| {
                let update = update.as_str();
                let batch = match (table, field) {
                    (Table::InMessages, FilterField::Operation) => wrap(
                        claim(repository, &query, |m: &mut InMessage| m.lock(update))?,
                        ReceivedMessage::InMessage,
                    ),
                    (Table::InMessages, FilterField::Status) => wrap(
                        claim(repository, &query, |m: &mut InMessage| m.lock_status(update))?,
                        ReceivedMessage::InMessage,
                    ),
                    (Table::OutMessages, FilterField::Operation) => wrap(
                        claim(repository, &query, |m: &mut OutMessage| m.lock(update))?,
                        ReceivedMessage::OutMessage,
                    ),
                    (Table::OutMessages, FilterField::Status) => wrap(
                        claim(repository, &query, |m: &mut OutMessage| m.lock_status(update))?,
                        ReceivedMessage::OutMessage,
                    ),
                    (Table::InExceptions, _) => wrap(
                        claim(repository, &query, |e: &mut InException| e.lock(update))?,
                        ReceivedMessage::InException,
                    ),
                    (Table::OutExceptions, _) => wrap(
                        claim(repository, &query, |e: &mut OutException| e.lock(update))?,
                        ReceivedMessage::OutException,
                    ),
                    (Table::ReceptionAwareness, _) => wrap(
                        claim(repository, &query, |r: &mut ReceptionAwareness| {
                            r.lock(update)
                        })?,
                        ReceivedMessage::ReceptionAwareness,
                    ),
                };
                Ok(batch)
            })
            .await
    }

    async fn on_item(
        &self,
        item: ReceivedMessage,
        callback: MessageCallback,
        token: CancellationToken,
    ) -> Result<(), Error> {
        let context = callback(item, token).await;
        if let Some(e) = context.exception() {
            debug!(table = %self.table, "Item finished with exception: {}", e);
        }
        Ok(())
    }

    async fn handle_error(&self, item: ReceivedMessage, error: Error) {
        error!(
            table = %self.table,
            "Can not process {:?}: {}",
            item.table(),
            error
        );
    }
}
