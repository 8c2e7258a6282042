// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Built-in transformers
//!
//! One transformer per agent kind. Stored rows are turned back into messages by loading their
//! body from the body persister and their PMode from the stored form.
//!

use crate::services::Services;

use agent::{
    Error, MessagingContext, MessagingMode, ReceivedMessage, Settings, Transformer,
    model::{
        As4Message, DeliverMessageEnvelope, NotifyMessageEnvelope, NotifyStatus, SubmitMessage,
    },
    pmode::{ReceivingProcessingMode, SendingProcessingMode, from_stored},
};
use store::{InMessage, MessageType, Table};

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;

fn unexpected(transformer: &str, message: &ReceivedMessage) -> Error {
    Error::Transform(format!(
        "{} can not transform {}",
        transformer,
        message
            .table()
            .map(|table| table.to_string())
            .unwrap_or_else(|| "a stream".to_owned())
    ))
}

/// Reads the body a row points to.
async fn stored_body(services: &Services, location: Option<&str>) -> Result<Vec<u8>, Error> {
    let location = location
        .ok_or_else(|| Error::Transform("Stored message has no body location".to_owned()))?;
    services.load_body(location).await
}

/// Stored PMode of a row, falling back to the configured one with the same id.
fn stored_sending_pmode(
    services: &Services,
    stored: Option<&str>,
    id: Option<&str>,
) -> Option<SendingProcessingMode> {
    if let Some(stored) = stored {
        match from_stored(stored) {
            Ok(pmode) => return Some(pmode),
            Err(e) => warn!("Ignoring stored sending PMode: {}", e),
        }
    }
    id.and_then(|id| services.pmodes.sending(id).ok().cloned())
}

fn stored_receiving_pmode(stored: Option<&str>) -> Option<ReceivingProcessingMode> {
    stored.and_then(|stored| match from_stored(stored) {
        Ok(pmode) => Some(pmode),
        Err(e) => {
            warn!("Ignoring stored receiving PMode: {}", e);
            None
        }
    })
}

/// Submit JSON documents to [`SubmitMessage`]s.
///
/// `default_pmode` fills in submissions that do not name a sending PMode.
pub struct SubmitMessageTransformer {
    default_pmode: Option<String>,
}

impl SubmitMessageTransformer {
    pub fn new() -> Self {
        Self {
            default_pmode: None,
        }
    }
}

impl Default for SubmitMessageTransformer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transformer for SubmitMessageTransformer {
    fn configure(&mut self, properties: &Settings) -> Result<(), Error> {
        self.default_pmode = properties.get("default_pmode").cloned();
        Ok(())
    }

    async fn transform(
        &self,
        message: ReceivedMessage,
        _token: CancellationToken,
    ) -> Result<MessagingContext, Error> {
        let body = message
            .body()
            .ok_or_else(|| unexpected("submit_message", &message))?;
        let mut submit: SubmitMessage = serde_json::from_slice(body)
            .map_err(|e| Error::Transform(format!("Invalid submit message: {}", e)))?;
        if submit.pmode_id.is_empty() {
            submit.pmode_id = self.default_pmode.clone().ok_or_else(|| {
                Error::Transform("Submit message names no sending PMode".to_owned())
            })?;
        }
        Ok(MessagingContext::submit(submit))
    }
}

/// Received wire messages.
pub struct As4MessageTransformer {
    services: Services,
}

impl As4MessageTransformer {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Transformer for As4MessageTransformer {
    async fn transform(
        &self,
        message: ReceivedMessage,
        _token: CancellationToken,
    ) -> Result<MessagingContext, Error> {
        let ReceivedMessage::Stream { content_type, body } = &message else {
            return Err(unexpected("as4_message", &message));
        };
        let as4 = self.services.serializer.deserialize(body, content_type)?;
        Ok(MessagingContext::as4(as4, MessagingMode::Receive))
    }
}

/// Claimed out messages, ready to be sent.
pub struct OutMessageTransformer {
    services: Services,
}

impl OutMessageTransformer {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Transformer for OutMessageTransformer {
    async fn transform(
        &self,
        message: ReceivedMessage,
        _token: CancellationToken,
    ) -> Result<MessagingContext, Error> {
        let ReceivedMessage::OutMessage(entity) = &message else {
            return Err(unexpected("out_message", &message));
        };
        let body = stored_body(&self.services, entity.message_location.as_deref()).await?;
        let as4 = self
            .services
            .serializer
            .deserialize(&body, &entity.content_type)?;
        let pmode = stored_sending_pmode(
            &self.services,
            entity.pmode.as_deref(),
            entity.pmode_id.as_deref(),
        )
        .ok_or_else(|| {
            Error::Transform(format!(
                "Out message {} has no sending PMode",
                entity.ebms_message_id
            ))
        })?;

        Ok(MessagingContext::as4(as4, MessagingMode::Send)
            .with_sending_pmode(pmode)
            .with_entity_id(entity.id))
    }
}

/// Claimed in messages, ready to be delivered.
pub struct DeliverMessageTransformer {
    services: Services,
}

impl DeliverMessageTransformer {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Transformer for DeliverMessageTransformer {
    async fn transform(
        &self,
        message: ReceivedMessage,
        _token: CancellationToken,
    ) -> Result<MessagingContext, Error> {
        let ReceivedMessage::InMessage(entity) = &message else {
            return Err(unexpected("deliver_message", &message));
        };
        let body = stored_body(&self.services, entity.message_location.as_deref()).await?;
        let as4: As4Message = self
            .services
            .serializer
            .deserialize(&body, &entity.content_type)?;
        let user = as4
            .user_messages()
            .find(|user| user.message_id == entity.ebms_message_id)
            .ok_or_else(|| {
                Error::Transform(format!(
                    "{} holds no user message {}",
                    entity.message_location.as_deref().unwrap_or_default(),
                    entity.ebms_message_id
                ))
            })?;

        let envelope = DeliverMessageEnvelope {
            message_id: entity.ebms_message_id.clone(),
            in_message_id: entity.id,
            content_type: self.services.serializer.content_type().to_owned(),
            delivery_message: serde_json::to_vec(user)?,
            attachments: as4.attachments.clone(),
        };
        let mut context = MessagingContext::deliver(envelope).with_entity_id(entity.id);
        if let Some(pmode) = stored_receiving_pmode(entity.pmode.as_deref()) {
            context.set_receiving_pmode(pmode);
        }
        Ok(context)
    }
}

/// Claimed signals and exceptions, ready to be notified.
pub struct NotifyMessageTransformer {
    services: Services,
}

impl NotifyMessageTransformer {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn signal(&self, entity: &InMessage) -> Result<MessagingContext, Error> {
        let status = match entity.message_type {
            MessageType::Receipt => NotifyStatus::Delivered,
            MessageType::Error => NotifyStatus::Error,
            MessageType::UserMessage => {
                return Err(Error::Transform(format!(
                    "User message {} is delivered, not notified",
                    entity.ebms_message_id
                )));
            }
        };
        let envelope = NotifyMessageEnvelope {
            message_id: entity
                .ebms_ref_to_message_id
                .clone()
                .unwrap_or_else(|| entity.ebms_message_id.clone()),
            status,
            content_type: entity.content_type.clone(),
            notify_message: stored_body(&self.services, entity.message_location.as_deref())
                .await?,
            entity_table: Table::InMessages,
            entity_id: entity.id,
        };
        let mut context = MessagingContext::notify(envelope).with_entity_id(entity.id);
        if let Some(pmode) = stored_sending_pmode(
            &self.services,
            entity.pmode.as_deref(),
            entity.pmode_id.as_deref(),
        ) {
            context = context.with_sending_pmode(pmode);
        }
        Ok(context)
    }

    fn exception(
        &self,
        table: Table,
        id: i64,
        ref_to_message_id: Option<&str>,
        exception: &str,
    ) -> Result<MessagingContext, Error> {
        let envelope = NotifyMessageEnvelope {
            message_id: ref_to_message_id.unwrap_or_default().to_owned(),
            status: NotifyStatus::Exception,
            content_type: self.services.serializer.content_type().to_owned(),
            notify_message: serde_json::to_vec(&json!({
                "ref_to_message_id": ref_to_message_id,
                "exception": exception,
            }))?,
            entity_table: table,
            entity_id: id,
        };
        Ok(MessagingContext::notify(envelope).with_entity_id(id))
    }
}

#[async_trait]
impl Transformer for NotifyMessageTransformer {
    async fn transform(
        &self,
        message: ReceivedMessage,
        _token: CancellationToken,
    ) -> Result<MessagingContext, Error> {
        match &message {
            ReceivedMessage::InMessage(entity) => self.signal(entity).await,
            ReceivedMessage::InException(entity) => {
                let context = self.exception(
                    Table::InExceptions,
                    entity.id,
                    entity.ebms_ref_to_message_id.as_deref(),
                    &entity.exception,
                )?;
                Ok(match stored_receiving_pmode(entity.pmode.as_deref()) {
                    Some(pmode) => context.with_receiving_pmode(pmode),
                    None => context,
                })
            }
            ReceivedMessage::OutException(entity) => {
                let context = self.exception(
                    Table::OutExceptions,
                    entity.id,
                    entity.ebms_ref_to_message_id.as_deref(),
                    &entity.exception,
                )?;
                Ok(
                    match stored_sending_pmode(
                        &self.services,
                        entity.pmode.as_deref(),
                        entity.pmode_id.as_deref(),
                    ) {
                        Some(pmode) => context.with_sending_pmode(pmode),
                        None => context,
                    },
                )
            }
            _ => Err(unexpected("notify_message", &message)),
        }
    }
}

/// Claimed reception awareness records.
#[derive(Default)]
pub struct ReceptionAwarenessTransformer;

#[async_trait]
impl Transformer for ReceptionAwarenessTransformer {
    async fn transform(
        &self,
        message: ReceivedMessage,
        _token: CancellationToken,
    ) -> Result<MessagingContext, Error> {
        match message {
            ReceivedMessage::ReceptionAwareness(record) => {
                Ok(MessagingContext::reception_awareness(record))
            }
            other => Err(unexpected("reception_awareness", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support;

    use agent::model::{Collaboration, MessageUnit, Receipt, UserMessage};
    use agent::pmode::to_stored;
    use chrono::Utc;
    use store::{InException, OutMessage, ReceptionAwareness};

    use std::collections::BTreeMap;

    fn user_message(id: &str) -> As4Message {
        As4Message::with_unit(MessageUnit::UserMessage(UserMessage {
            message_id: id.to_owned(),
            ref_to_message_id: None,
            timestamp: Utc::now(),
            mpc: "default".to_owned(),
            sender: None,
            receiver: None,
            collaboration: Collaboration::default(),
            payload_info: Vec::new(),
            properties: BTreeMap::new(),
        }))
    }

    fn stream(body: &str) -> ReceivedMessage {
        ReceivedMessage::Stream {
            content_type: "application/json".to_owned(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_submit_message() {
        let mut transformer = SubmitMessageTransformer::new();
        let body = r#"{"collaboration":{"service":"orders","action":"create"},"pmode_id":""}"#;
        let token = CancellationToken::new();
        assert!(matches!(
            transformer.transform(stream(body), token.clone()).await,
            Err(Error::Transform(_))
        ));

        let mut settings = Settings::new();
        settings.insert("default_pmode".to_owned(), "to-partner".to_owned());
        transformer.configure(&settings).unwrap();
        let context = transformer.transform(stream(body), token.clone()).await.unwrap();
        assert_eq!(context.mode(), MessagingMode::Submit);
        assert_eq!(context.submit_message().unwrap().pmode_id, "to-partner");

        assert!(transformer.transform(stream("[]"), token).await.is_err());
    }

    #[tokio::test]
    async fn test_out_message_loads_body_and_pmode() {
        let dir = tempfile::tempdir().unwrap();
        let pmode = SendingProcessingMode {
            id: "to-partner".to_owned(),
            ..Default::default()
        };
        let services = test_support::services(dir.path(), vec![pmode.clone()], vec![]);
        let body = services.serializer.serialize(&user_message("out-1")).unwrap();
        let location = services.save_body("out-1", body).await.unwrap();

        let mut entity = OutMessage::new("out-1", MessageType::UserMessage);
        entity.id = 8;
        entity.content_type = "application/json".to_owned();
        entity.message_location = Some(location);
        entity.pmode_id = Some("to-partner".to_owned());

        let transformer = OutMessageTransformer::new(services.clone());
        let context = transformer
            .transform(ReceivedMessage::OutMessage(entity.clone()), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(context.mode(), MessagingMode::Send);
        assert_eq!(context.entity_id(), Some(8));
        assert_eq!(context.sending_pmode(), Some(&pmode));
        assert_eq!(context.ebms_message_id(), Some("out-1"));

        entity.message_location = None;
        assert!(transformer
            .transform(ReceivedMessage::OutMessage(entity), CancellationToken::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_notify_message() {
        let dir = tempfile::tempdir().unwrap();
        let services = test_support::services(dir.path(), vec![], vec![]);
        let receipt = As4Message::with_unit(MessageUnit::Receipt(Receipt {
            message_id: "receipt-1".to_owned(),
            ref_to_message_id: "out-1".to_owned(),
            timestamp: Utc::now(),
        }));
        let body = services.serializer.serialize(&receipt).unwrap();
        let location = services.save_body("receipt-1", body.clone()).await.unwrap();

        let mut signal = InMessage::new("receipt-1", MessageType::Receipt);
        signal.id = 2;
        signal.ebms_ref_to_message_id = Some("out-1".to_owned());
        signal.message_location = Some(location);
        signal.content_type = "application/json".to_owned();

        let transformer = NotifyMessageTransformer::new(services);
        let context = transformer
            .transform(ReceivedMessage::InMessage(signal), CancellationToken::new())
            .await
            .unwrap();
        let envelope = context.notify_message().unwrap();
        assert_eq!(envelope.status, NotifyStatus::Delivered);
        assert_eq!(envelope.message_id, "out-1");
        assert_eq!(envelope.notify_message, body);

        let mut exception = InException::new("Invalid message");
        exception.id = 5;
        exception.pmode = Some(
            to_stored(&ReceivingProcessingMode {
                id: "from-partner".to_owned(),
                ..Default::default()
            })
            .unwrap(),
        );
        let context = transformer
            .transform(ReceivedMessage::InException(exception), CancellationToken::new())
            .await
            .unwrap();
        let envelope = context.notify_message().unwrap();
        assert_eq!(envelope.status, NotifyStatus::Exception);
        assert_eq!(envelope.entity_table, Table::InExceptions);
        assert_eq!(context.pmode_id(), Some("from-partner"));

        let user = InMessage::new("user-1", MessageType::UserMessage);
        assert!(transformer
            .transform(ReceivedMessage::InMessage(user), CancellationToken::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_reception_awareness() {
        let transformer = ReceptionAwarenessTransformer;
        let mut record = ReceptionAwareness::new(4, "out-4");
        record.id = 1;
        let context = transformer
            .transform(ReceivedMessage::ReceptionAwareness(record), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(context.entity_id(), Some(1));
        assert!(matches!(
            transformer.transform(stream("{}"), CancellationToken::new()).await,
            Err(Error::Transform(_))
        ));
    }
}
