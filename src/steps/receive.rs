// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Receive steps
//!
//! A received user message is stored and answered with a receipt, or with an ebMS error when no
//! receiving PMode accepts it. A received signal answers one of our out messages: it is stored
//! for notification and the out message gets its final status.
//!

use super::missing;
use crate::services::Services;

use agent::{
    Error, MessagingContext, MessagingMode, Step, StepResult,
    model::{As4Message, ErrorDetail, ErrorSignal, MessageUnit, Receipt},
    pmode::{SendingProcessingMode, from_stored, to_stored},
};
use store::{InMessage, InStatus, MessageType, Operation, OutMessage, OutStatus, Query};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

/// Persists a received message.
pub struct SaveReceivedMessageStep {
    services: Services,
}

impl SaveReceivedMessageStep {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn save_signals(
        &self,
        message: As4Message,
        content_type: String,
        location: String,
    ) -> Result<(), Error> {
        self.services
            .transact(move |repository| {
                for unit in &message.message_units {
                    let status = match unit {
                        MessageUnit::Receipt(_) => OutStatus::Ack,
                        MessageUnit::Error(_) => OutStatus::Nack,
                        MessageUnit::UserMessage(_) => continue,
                    };
                    let mut entity = InMessage::new(unit.message_id(), unit.message_type());
                    entity.ebms_ref_to_message_id = unit.ref_to_message_id().map(str::to_owned);
                    entity.content_type = content_type.clone();
                    entity.message_location = Some(location.clone());
                    entity.status = InStatus::Received;

                    let referenced = match unit.ref_to_message_id() {
                        Some(id) => repository
                            .find_out_messages(&Query::ebms_message_id(id))?
                            .into_iter()
                            .next(),
                        None => None,
                    };
                    match referenced {
                        Some(out) => {
                            let pmode = out
                                .pmode
                                .as_deref()
                                .and_then(|stored| from_stored::<SendingProcessingMode>(stored).ok());
                            let notify = pmode.is_some_and(|pmode| match unit {
                                MessageUnit::Receipt(_) => {
                                    pmode.receipt_handling.notify_message_producer
                                }
                                _ => pmode.error_handling.notify_message_producer,
                            });
                            entity.pmode_id = out.pmode_id.clone();
                            entity.pmode = out.pmode.clone();
                            if notify {
                                entity.operation = Operation::ToBeNotified;
                            }
                            repository.update_out_message(out.id, |message| {
                                message.status = status;
                            })?;
                        }
                        None => warn!(
                            ebms_message_id = %unit.message_id(),
                            "Signal references no known out message."
                        ),
                    }
                    repository.insert_in_message(&mut entity)?;
                }
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl Step for SaveReceivedMessageStep {
    async fn execute(&self, mut context: MessagingContext) -> Result<StepResult, Error> {
        let message = context
            .as4_message()
            .ok_or_else(|| missing("AS4 message"))?
            .clone();
        let id = message
            .primary_message_id()
            .ok_or_else(|| missing("message id"))?
            .to_owned();
        let content_type = self.services.serializer.content_type().to_owned();
        let body = self.services.serializer.serialize(&message)?;
        let location = self.services.save_body(&id, body).await?;

        if message.is_signal() {
            self.save_signals(message, content_type, location).await?;
            debug!(ebms_message_id = %id, "Signal stored.");
            return Ok(StepResult::success(context).and_stop_execution());
        }

        let Some(user) = message.first_user_message() else {
            return Err(missing("user message"));
        };
        let pmode = self
            .services
            .pmodes
            .receiving_for(&user.collaboration)
            .cloned();
        let stored_pmode = pmode.as_ref().map(to_stored).transpose()?;
        let pmode_id = pmode.as_ref().map(|pmode| pmode.id.clone());
        let deliver = pmode.as_ref().is_some_and(|pmode| pmode.deliver.is_enabled);

        let first = self
            .services
            .transact(move |repository| {
                let mut first = None;
                for user in message.user_messages() {
                    let mut entity = InMessage::new(&user.message_id, MessageType::UserMessage);
                    entity.ebms_ref_to_message_id = user.ref_to_message_id.clone();
                    entity.content_type = content_type.clone();
                    entity.message_location = Some(location.clone());
                    entity.pmode_id = pmode_id.clone();
                    entity.pmode = stored_pmode.clone();
                    entity.status = InStatus::Received;
                    entity.operation = if deliver {
                        Operation::ToBeDelivered
                    } else {
                        Operation::NotApplicable
                    };
                    let row = repository.insert_in_message(&mut entity)?;
                    first.get_or_insert(row);
                }
                Ok(first)
            })
            .await?;
        if let Some(row) = first {
            context.set_entity_id(row);
        }

        match pmode {
            Some(pmode) => {
                info!(ebms_message_id = %id, pmode = %pmode.id, "User message received.");
                context.set_receiving_pmode(pmode);
                Ok(StepResult::success(context))
            }
            None => {
                warn!(ebms_message_id = %id, "No receiving PMode matches the user message.");
                Ok(StepResult::failed(context))
            }
        }
    }
}

/// Answers a received user message with a receipt.
pub struct CreateReceiptStep {
    services: Services,
}

impl CreateReceiptStep {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for CreateReceiptStep {
    async fn execute(&self, context: MessagingContext) -> Result<StepResult, Error> {
        let Some(user) = context.as4_message().and_then(As4Message::first_user_message) else {
            return Ok(StepResult::success(context));
        };
        let receipt = As4Message::with_unit(MessageUnit::Receipt(Receipt {
            message_id: self.services.new_message_id(),
            ref_to_message_id: user.message_id.clone(),
            timestamp: Utc::now(),
        }));
        store_signal(&self.services, &receipt, OutStatus::Sent).await?;
        debug!(ref_to_message_id = %user.message_id, "Receipt created.");

        let mut reply = MessagingContext::as4(receipt, MessagingMode::Send);
        if let Some(pmode) = context.receiving_pmode() {
            reply.set_receiving_pmode(pmode.clone());
        }
        Ok(StepResult::success(reply))
    }
}

/// Answers a rejected message with an ebMS error.
pub struct CreateAs4ErrorStep {
    services: Services,
}

impl CreateAs4ErrorStep {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for CreateAs4ErrorStep {
    async fn execute(&self, context: MessagingContext) -> Result<StepResult, Error> {
        let message = context.as4_message();
        let unmatched = message.is_some_and(As4Message::is_user_message)
            && context.receiving_pmode().is_none();
        let detail = if unmatched {
            ErrorDetail {
                code: "EBMS:0010".to_owned(),
                short_description: "ProcessingModeMismatch".to_owned(),
                detail: Some("No receiving PMode matches the message".to_owned()),
            }
        } else {
            ErrorDetail {
                code: "EBMS:0004".to_owned(),
                short_description: "Other".to_owned(),
                detail: context.exception().map(Error::to_string),
            }
        };
        let ref_to_message_id = message
            .and_then(As4Message::primary_message_id)
            .map(str::to_owned);
        let error = As4Message::with_unit(MessageUnit::Error(ErrorSignal {
            message_id: self.services.new_message_id(),
            ref_to_message_id: ref_to_message_id.clone(),
            timestamp: Utc::now(),
            errors: vec![detail],
        }));

        if let Some(row) = context.entity_id() {
            self.services
                .transact(move |repository| {
                    repository.update_in_message(row, |message| {
                        message.status = InStatus::Exception;
                    })
                })
                .await?;
        }
        store_signal(&self.services, &error, OutStatus::Sent).await?;
        warn!(
            ref_to_message_id = ref_to_message_id.as_deref().unwrap_or_default(),
            "Answering with an ebMS error."
        );
        Ok(StepResult::success(MessagingContext::as4(
            error,
            MessagingMode::Send,
        )))
    }
}

/// Stores a signal sent as a synchronous reply.
async fn store_signal(
    services: &Services,
    signal: &As4Message,
    status: OutStatus,
) -> Result<i64, Error> {
    let unit = signal
        .message_units
        .first()
        .ok_or_else(|| missing("signal"))?;
    let id = unit.message_id().to_owned();
    let ref_to_message_id = unit.ref_to_message_id().map(str::to_owned);
    let message_type = unit.message_type();
    let content_type = services.serializer.content_type().to_owned();
    let body = services.serializer.serialize(signal)?;
    let location = services.save_body(&id, body).await?;
    services
        .transact(move |repository| {
            let mut entity = OutMessage::new(id, message_type);
            entity.ebms_ref_to_message_id = ref_to_message_id;
            entity.content_type = content_type;
            entity.message_location = Some(location);
            entity.status = status;
            repository.insert_out_message(&mut entity)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support;

    use agent::{
        model::{Collaboration, UserMessage},
        pmode::{Delivery, MessageMatch, ReceivingProcessingMode},
    };

    use std::collections::BTreeMap;

    fn user_message(id: &str, service: &str) -> As4Message {
        As4Message::with_unit(MessageUnit::UserMessage(UserMessage {
            message_id: id.to_owned(),
            ref_to_message_id: None,
            timestamp: Utc::now(),
            mpc: "default".to_owned(),
            sender: None,
            receiver: None,
            collaboration: Collaboration {
                service: service.to_owned(),
                action: "create".to_owned(),
                ..Default::default()
            },
            payload_info: Vec::new(),
            properties: BTreeMap::new(),
        }))
    }

    fn orders() -> ReceivingProcessingMode {
        ReceivingProcessingMode {
            id: "orders".to_owned(),
            message_match: MessageMatch {
                service: Some("orders".to_owned()),
                action: None,
            },
            deliver: Delivery { is_enabled: true },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_user_message_is_stored_and_receipted() {
        let dir = tempfile::tempdir().unwrap();
        let services = test_support::services(dir.path(), vec![], vec![orders()]);

        let context = MessagingContext::as4(user_message("in-1", "orders"), MessagingMode::Receive);
        let saved = SaveReceivedMessageStep::new(services.clone())
            .execute(context)
            .await
            .unwrap();
        assert!(saved.succeeded() && saved.can_proceed());
        assert_eq!(saved.context().pmode_id(), Some("orders"));
        let row = saved.context().entity_id().unwrap();

        let answered = CreateReceiptStep::new(services.clone())
            .execute(saved.into_context())
            .await
            .unwrap();
        let reply = answered.context();
        assert_eq!(reply.mode(), MessagingMode::Send);
        let Some(MessageUnit::Receipt(receipt)) =
            reply.as4_message().and_then(|m| m.message_units.first())
        else {
            panic!("expected a receipt");
        };
        assert_eq!(receipt.ref_to_message_id, "in-1");

        let (stored, receipts) = services
            .transact(move |repository| {
                Ok((
                    repository.get_in_message(row)?.unwrap(),
                    repository.find_out_messages(&Query::referencing("in-1"))?,
                ))
            })
            .await
            .unwrap();
        assert_eq!(stored.operation, Operation::ToBeDelivered);
        assert_eq!(stored.status, InStatus::Received);
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].message_type, MessageType::Receipt);
    }

    #[tokio::test]
    async fn test_unmatched_user_message_gets_error() {
        let dir = tempfile::tempdir().unwrap();
        let services = test_support::services(dir.path(), vec![], vec![orders()]);

        let context =
            MessagingContext::as4(user_message("in-2", "invoices"), MessagingMode::Receive);
        let saved = SaveReceivedMessageStep::new(services.clone())
            .execute(context)
            .await
            .unwrap();
        assert!(!saved.succeeded());
        assert!(saved.context().exception().is_none());
        let row = saved.context().entity_id().unwrap();

        let answered = CreateAs4ErrorStep::new(services.clone())
            .execute(saved.into_context())
            .await
            .unwrap();
        let Some(MessageUnit::Error(error)) = answered
            .context()
            .as4_message()
            .and_then(|m| m.message_units.first())
        else {
            panic!("expected an error signal");
        };
        assert_eq!(error.errors[0].code, "EBMS:0010");
        assert_eq!(error.ref_to_message_id.as_deref(), Some("in-2"));

        let stored = services
            .transact(move |repository| repository.get_in_message(row))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, InStatus::Exception);
        assert_eq!(stored.operation, Operation::NotApplicable);
    }

    #[tokio::test]
    async fn test_receipt_completes_out_message() {
        let dir = tempfile::tempdir().unwrap();
        let services = test_support::services(dir.path(), vec![], vec![]);
        let mut pmode = SendingProcessingMode {
            id: "to-partner".to_owned(),
            ..Default::default()
        };
        pmode.receipt_handling.notify_message_producer = true;
        let stored_pmode = to_stored(&pmode).unwrap();
        let out = services
            .transact(move |repository| {
                let mut message = OutMessage::new("out-1", MessageType::UserMessage);
                message.status = OutStatus::Sent;
                message.pmode_id = Some("to-partner".to_owned());
                message.pmode = Some(stored_pmode);
                repository.insert_out_message(&mut message)
            })
            .await
            .unwrap();

        let receipt = As4Message::with_unit(MessageUnit::Receipt(Receipt {
            message_id: "receipt-1".to_owned(),
            ref_to_message_id: "out-1".to_owned(),
            timestamp: Utc::now(),
        }));
        let result = SaveReceivedMessageStep::new(services.clone())
            .execute(MessagingContext::as4(receipt, MessagingMode::Receive))
            .await
            .unwrap();
        assert!(result.succeeded() && !result.can_proceed());

        let (message, signals) = services
            .transact(move |repository| {
                Ok((
                    repository.get_out_message(out)?.unwrap(),
                    repository.find_in_messages(&Query::referencing("out-1"))?,
                ))
            })
            .await
            .unwrap();
        assert_eq!(message.status, OutStatus::Ack);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].operation, Operation::ToBeNotified);
        assert_eq!(signals[0].pmode_id.as_deref(), Some("to-partner"));
    }

    #[tokio::test]
    async fn test_receipt_step_ignores_signals() {
        let dir = tempfile::tempdir().unwrap();
        let services = test_support::services(dir.path(), vec![], vec![]);
        let context = MessagingContext::from_exception(
            Error::Functional("nothing".to_owned()),
            MessagingMode::Receive,
        );
        let result = CreateReceiptStep::new(services)
            .execute(context.clone())
            .await
            .unwrap();
        assert_eq!(result.into_context(), context);
    }
}
