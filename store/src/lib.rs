// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Store module.
//!
//! Durable entities of the messaging engine together with the transactional datastore
//! contract, an in-memory backend and the message body persister.
//!

pub mod body;
pub mod datastore;
pub mod entity;
pub mod error;
pub mod memory;
pub mod reception;

pub use datastore::{
    Datastore, DatastoreContext, DatastoreExt, DatastoreRepository, Query, Record,
    Row, RowIndex, Table,
};
pub use entity::{
    ExceptionEntity, InException, InMessage, InStatus, MessageEntity, MessageStatus,
    MessageType, Mep, Operation, OutException, OutMessage, OutStatus,
};
pub use error::Error;
pub use reception::{ReceptionAwareness, ReceptionStatus, parse_retry_interval};
