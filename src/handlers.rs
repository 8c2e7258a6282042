// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Exception handlers
//!
//! `outbound` and `inbound` persist every failure as an exception row and mark the message the
//! failure belongs to with the `Exception` status. The row asks for notification when the
//! PMode of the message says so. Store failures inside a handler are only logged.
//!

use crate::services::Services;

use agent::{
    Error, ExceptionHandler, MessagingContext, MessagingMode, ReceivedMessage,
    pmode::to_stored,
};
use store::{ExceptionEntity, InStatus, MessageStatus, Operation, OutStatus, Table};

use async_trait::async_trait;
use tracing::{error, warn};

/// What an exception row records.
#[derive(Debug, Clone, Default)]
struct ExceptionRecord {
    ref_to_message_id: Option<String>,
    message_location: Option<String>,
    exception: String,
    pmode_id: Option<String>,
    pmode: Option<String>,
    notify: bool,
}

impl ExceptionRecord {
    fn new(error: &Error) -> Self {
        Self {
            exception: error.to_string(),
            ..Default::default()
        }
    }

    /// Takes message id and PMode from `context`.
    fn from_context(error: &Error, context: &MessagingContext) -> Self {
        let mut record = Self::new(error);
        record.ref_to_message_id = context.ebms_message_id().map(str::to_owned);
        record.pmode_id = context.pmode_id().map(str::to_owned);
        if let Some(pmode) = context.sending_pmode() {
            record.pmode = to_stored(pmode).ok();
            record.notify = pmode.exception_handling.notify_message_producer;
        } else if let Some(pmode) = context.receiving_pmode() {
            record.pmode = to_stored(pmode).ok();
            record.notify = pmode.exception_handling.notify_message_producer;
        }
        record
    }

    fn into_entity<S: MessageStatus>(self) -> ExceptionEntity<S> {
        let mut entity = ExceptionEntity::new(self.exception);
        entity.ebms_ref_to_message_id = self.ref_to_message_id;
        entity.message_location = self.message_location;
        entity.pmode_id = self.pmode_id;
        entity.pmode = self.pmode;
        entity.operation = if self.notify {
            Operation::ToBeNotified
        } else {
            Operation::NotApplicable
        };
        entity
    }
}

/// Failures of submit and send agents.
pub struct OutboundExceptionHandler {
    services: Services,
}

impl OutboundExceptionHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn record(&self, record: ExceptionRecord) {
        let result = self
            .services
            .transact(move |repository| {
                let ebms_message_id = record.ref_to_message_id.clone();
                let mut exception = record.into_entity::<OutStatus>();
                repository.insert_out_exception(&mut exception)?;
                if let Some(id) = ebms_message_id {
                    repository.update_out_messages_by_ebms_id(&id, |message| {
                        message.status = OutStatus::Exception;
                    })?;
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            error!("Can not record outbound exception: {}", e);
        }
    }
}

#[async_trait]
impl ExceptionHandler for OutboundExceptionHandler {
    async fn handle_transformation_exception(
        &self,
        error: Error,
        message: &ReceivedMessage,
    ) -> MessagingContext {
        error!("Outbound transformation failed: {}", error);
        let mut record = ExceptionRecord::new(&error);
        match message {
            ReceivedMessage::OutMessage(entity) => {
                record.ref_to_message_id = Some(entity.ebms_message_id.clone());
                record.pmode_id = entity.pmode_id.clone();
                record.pmode = entity.pmode.clone();
            }
            ReceivedMessage::Stream { body, .. } => {
                match self.services.save_body("submit-exception", body.clone()).await {
                    Ok(location) => record.message_location = Some(location),
                    Err(e) => warn!("Can not keep failed submission: {}", e),
                }
            }
            _ => {}
        }
        self.record(record).await;
        MessagingContext::from_exception(error, MessagingMode::Unknown)
    }

    async fn handle_execution_exception(
        &self,
        error: Error,
        context: MessagingContext,
    ) -> MessagingContext {
        error!(
            mode = %context.mode(),
            "Outbound execution failed for {}: {}",
            context.ebms_message_id().unwrap_or("unknown message"),
            error
        );
        self.record(ExceptionRecord::from_context(&error, &context))
            .await;
        context.with_exception(error)
    }

    async fn handle_error_exception(
        &self,
        error: Error,
        context: MessagingContext,
    ) -> MessagingContext {
        error!(
            mode = %context.mode(),
            "Outbound error pipeline failed for {}: {}",
            context.ebms_message_id().unwrap_or("unknown message"),
            error
        );
        self.record(ExceptionRecord::from_context(&error, &context))
            .await;
        context.with_exception(error)
    }
}

/// Failures of receive, deliver and notify agents.
pub struct InboundExceptionHandler {
    services: Services,
}

impl InboundExceptionHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn record(&self, record: ExceptionRecord, in_message: Option<i64>) {
        let result = self
            .services
            .transact(move |repository| {
                let mut exception = record.into_entity::<InStatus>();
                repository.insert_in_exception(&mut exception)?;
                if let Some(id) = in_message {
                    repository.update_in_message(id, |message| {
                        message.status = InStatus::Exception;
                    })?;
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            error!("Can not record inbound exception: {}", e);
        }
    }
}

/// Row id of the in message a context works on.
fn in_message_row(context: &MessagingContext) -> Option<i64> {
    match context.mode() {
        MessagingMode::Notify => context
            .notify_message()
            .filter(|envelope| envelope.entity_table == Table::InMessages)
            .map(|envelope| envelope.entity_id),
        MessagingMode::Receive | MessagingMode::Deliver => context.entity_id(),
        _ => None,
    }
}

#[async_trait]
impl ExceptionHandler for InboundExceptionHandler {
    async fn handle_transformation_exception(
        &self,
        error: Error,
        message: &ReceivedMessage,
    ) -> MessagingContext {
        error!("Inbound transformation failed: {}", error);
        let mut record = ExceptionRecord::new(&error);
        let mut in_message = None;
        match message {
            ReceivedMessage::Stream { body, .. } => {
                match self.services.save_body("receive-exception", body.clone()).await {
                    Ok(location) => record.message_location = Some(location),
                    Err(e) => warn!("Can not keep failed message body: {}", e),
                }
            }
            ReceivedMessage::InMessage(entity) => {
                record.ref_to_message_id = Some(entity.ebms_message_id.clone());
                record.message_location = entity.message_location.clone();
                record.pmode_id = entity.pmode_id.clone();
                record.pmode = entity.pmode.clone();
                in_message = Some(entity.id);
            }
            _ => {}
        }
        self.record(record, in_message).await;
        MessagingContext::from_exception(error, MessagingMode::Unknown)
    }

    async fn handle_execution_exception(
        &self,
        error: Error,
        context: MessagingContext,
    ) -> MessagingContext {
        error!(
            mode = %context.mode(),
            "Inbound execution failed for {}: {}",
            context.ebms_message_id().unwrap_or("unknown message"),
            error
        );
        self.record(
            ExceptionRecord::from_context(&error, &context),
            in_message_row(&context),
        )
        .await;
        context.with_exception(error)
    }

    async fn handle_error_exception(
        &self,
        error: Error,
        context: MessagingContext,
    ) -> MessagingContext {
        error!(
            mode = %context.mode(),
            "Inbound error pipeline failed for {}: {}",
            context.ebms_message_id().unwrap_or("unknown message"),
            error
        );
        self.record(
            ExceptionRecord::from_context(&error, &context),
            in_message_row(&context),
        )
        .await;
        context.with_exception(error)
    }
}
