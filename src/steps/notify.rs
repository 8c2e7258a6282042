// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

use super::missing;
use crate::services::Services;

use agent::{Error, MessagingContext, Step, StepResult};
use store::{InException, InStatus, Operation, OutException, Table};

use async_trait::async_trait;
use tracing::info;

/// Hands a notification to the notifier and marks its row notified.
pub struct SendNotifyMessageStep {
    services: Services,
}

impl SendNotifyMessageStep {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for SendNotifyMessageStep {
    async fn execute(&self, context: MessagingContext) -> Result<StepResult, Error> {
        let envelope = context
            .notify_message()
            .ok_or_else(|| missing("notify message"))?;
        self.services.notifier.notify(envelope).await?;

        let (table, row) = (envelope.entity_table, envelope.entity_id);
        self.services
            .transact(move |repository| match table {
                Table::InMessages => repository
                    .update_in_message(row, |message| {
                        message.operation = Operation::Notified;
                        message.status = InStatus::Notified;
                    })
                    .map(|_| ()),
                Table::OutMessages => repository
                    .update_out_message(row, |message| {
                        message.operation = Operation::Notified;
                    })
                    .map(|_| ()),
                Table::InExceptions => repository
                    .update(row, |exception: &mut InException| {
                        exception.operation = Operation::Notified;
                    })
                    .map(|_| ()),
                Table::OutExceptions => repository
                    .update(row, |exception: &mut OutException| {
                        exception.operation = Operation::Notified;
                    })
                    .map(|_| ()),
                Table::ReceptionAwareness => Err(store::Error::InvalidValue(
                    "Reception awareness records are not notified".to_owned(),
                )),
            })
            .await?;
        info!(
            ebms_message_id = %envelope.message_id,
            status = ?envelope.status,
            "Notification sent."
        );
        Ok(StepResult::success(context))
    }
}
