// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

use super::missing;
use crate::services::Services;

use agent::{Error, MessagingContext, Step, StepResult};
use store::{InStatus, Operation};

use async_trait::async_trait;
use tracing::info;

/// Hands a received user message to the deliverer and marks it delivered.
pub struct DeliverMessageStep {
    services: Services,
}

impl DeliverMessageStep {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for DeliverMessageStep {
    async fn execute(&self, context: MessagingContext) -> Result<StepResult, Error> {
        let envelope = context
            .deliver_message()
            .ok_or_else(|| missing("deliver message"))?;
        self.services.deliverer.deliver(envelope).await?;

        let row = envelope.in_message_id;
        self.services
            .transact(move |repository| {
                repository.update_in_message(row, |message| {
                    message.operation = Operation::Delivered;
                    message.status = InStatus::Delivered;
                })
            })
            .await?;
        info!(ebms_message_id = %envelope.message_id, "Message delivered.");
        Ok(StepResult::success(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support;

    use agent::model::DeliverMessageEnvelope;
    use store::{InMessage, MessageType};

    #[tokio::test]
    async fn test_delivers_and_marks_message() {
        let dir = tempfile::tempdir().unwrap();
        let services = test_support::services(dir.path(), vec![], vec![]);
        let row = services
            .transact(|repository| {
                let mut message = InMessage::new("in-1", MessageType::UserMessage);
                message.operation = Operation::Delivering;
                message.status = InStatus::Received;
                repository.insert_in_message(&mut message)
            })
            .await
            .unwrap();

        let envelope = DeliverMessageEnvelope {
            message_id: "in-1".to_owned(),
            in_message_id: row,
            content_type: "application/json".to_owned(),
            delivery_message: br#"{"message_id":"in-1"}"#.to_vec(),
            attachments: Vec::new(),
        };
        let result = DeliverMessageStep::new(services.clone())
            .execute(MessagingContext::deliver(envelope))
            .await
            .unwrap();
        assert!(result.succeeded());
        assert!(dir.path().join("deliver/in-1.json").exists());

        let message = services
            .transact(move |repository| repository.get_in_message(row))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.operation, Operation::Delivered);
        assert_eq!(message.status, InStatus::Delivered);
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_message() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("deliver"), b"not a folder").unwrap();
        let services = test_support::services(dir.path(), vec![], vec![]);

        let envelope = DeliverMessageEnvelope {
            message_id: "in-2".to_owned(),
            in_message_id: 1,
            content_type: "application/json".to_owned(),
            delivery_message: b"{}".to_vec(),
            attachments: Vec::new(),
        };
        let result = DeliverMessageStep::new(services)
            .execute(MessagingContext::deliver(envelope))
            .await;
        assert!(matches!(result, Err(Error::Functional(_))));
    }
}
