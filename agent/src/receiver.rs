// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Receivers
//!
//! A receiver produces raw work items and hands each one to the agent callback. Push receivers
//! (an HTTP listener) and pollers both implement [`Receiver`].
//!

use crate::{Error, MessagingContext};

use async_trait::async_trait;
use futures::future::BoxFuture;
use store::{InException, InMessage, OutException, OutMessage, ReceptionAwareness, Table};
use tokio_util::sync::CancellationToken;

use std::sync::Arc;

/// Raw work item emitted by a receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceivedMessage {
    /// Unparsed bytes, from a request body or a file.
    Stream { content_type: String, body: Vec<u8> },
    InMessage(InMessage),
    OutMessage(OutMessage),
    InException(InException),
    OutException(OutException),
    ReceptionAwareness(ReceptionAwareness),
}

impl ReceivedMessage {
    /// Table a claimed entity was read from.
    pub fn table(&self) -> Option<Table> {
        match self {
            ReceivedMessage::Stream { .. } => None,
            ReceivedMessage::InMessage(_) => Some(Table::InMessages),
            ReceivedMessage::OutMessage(_) => Some(Table::OutMessages),
            ReceivedMessage::InException(_) => Some(Table::InExceptions),
            ReceivedMessage::OutException(_) => Some(Table::OutExceptions),
            ReceivedMessage::ReceptionAwareness(_) => Some(Table::ReceptionAwareness),
        }
    }

    /// Raw body of a stream item.
    pub fn body(&self) -> Option<&[u8]> {
        match self {
            ReceivedMessage::Stream { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Agent callback invoked once per received item.
pub type MessageCallback = Arc<
    dyn Fn(ReceivedMessage, CancellationToken) -> BoxFuture<'static, MessagingContext>
        + Send
        + Sync,
>;

#[async_trait]
pub trait Receiver: Send + Sync {
    /// Receives until `token` is cancelled or [`Receiver::stop_receiving`] is called.
    async fn start_receiving(
        &self,
        on_message: MessageCallback,
        token: CancellationToken,
    ) -> Result<(), Error>;

    async fn stop_receiving(&self);
}
