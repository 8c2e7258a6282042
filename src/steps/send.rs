// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Send step
//!
//! Posts an out message to the push url of its sending PMode. A receipt or error returned in
//! the HTTP response is stored as an in message, which is how reception awareness learns about
//! synchronous answers.
//!
//! Under reception awareness every attempt is registered on the tracking record, and a failed
//! attempt leaves the out message `Undetermined` for the reception awareness agent to re-queue.
//! Without it a failed attempt is an error for the exception handler.
//!

use super::missing;
use crate::services::Services;

use agent::{
    Error, MessagingContext, Step, StepResult,
    model::{As4Message, MessageUnit},
    pmode::{SendingProcessingMode, to_stored},
};
use store::{
    InMessage, InStatus, Operation, OutStatus, Query, ReceptionAwareness,
};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, warn};

pub struct SendAs4MessageStep {
    services: Services,
}

impl SendAs4MessageStep {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Posts `body`, returning the signal the partner answered with, if any.
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Option<As4Message>, Error> {
        let serializer = &self.services.serializer;
        let response = self
            .services
            .client
            .post(url)
            .header(CONTENT_TYPE, serializer.content_type())
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Send(format!("{}: {}", url, e)))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let reply = response
            .bytes()
            .await
            .map_err(|e| Error::Send(format!("{}: {}", url, e)))?;
        if !status.is_success() {
            return Err(Error::Send(format!("{} answered {}", url, status)));
        }
        if reply.is_empty() {
            return Ok(None);
        }
        serializer
            .deserialize(&reply, &content_type)
            .map(Some)
            .map_err(|e| Error::Send(format!("Invalid reply from {}: {}", url, e)))
    }

    /// Records one send attempt on the reception awareness record of `entity_id`.
    async fn register_attempt(
        &self,
        entity_id: i64,
        ebms_message_id: &str,
        pmode: &SendingProcessingMode,
    ) -> Result<(), Error> {
        let ebms_message_id = ebms_message_id.to_owned();
        let config = pmode.reliability.reception_awareness.clone();
        self.services
            .transact(move |repository| {
                let now = Utc::now();
                let existing = repository
                    .find_reception_awareness(&Query::ebms_message_id(ebms_message_id.clone()))?
                    .into_iter()
                    .find(|record| record.internal_message_id == entity_id);
                match existing {
                    Some(mut record) => {
                        record.register_send_attempt(now);
                        repository.save(&mut record)
                    }
                    None => {
                        let mut record = ReceptionAwareness::new(entity_id, ebms_message_id);
                        record.total_retry_count = config.retry_count;
                        record.retry_interval = config.retry_interval;
                        record.register_send_attempt(now);
                        repository.insert_reception_awareness(&mut record).map(|_| ())
                    }
                }
            })
            .await
    }

    /// Marks the out message sent and stores the signal the partner answered with.
    async fn on_sent(
        &self,
        entity_id: i64,
        reply: Option<As4Message>,
        pmode: &SendingProcessingMode,
    ) -> Result<(), Error> {
        let signal = reply.filter(|reply| {
            if reply.is_signal() {
                true
            } else {
                warn!("Ignoring reply without signal message units");
                false
            }
        });

        let mut stored = None;
        if let Some(signal) = &signal {
            let id = signal.primary_message_id().unwrap_or_default().to_owned();
            let body = self.services.serializer.serialize(signal)?;
            stored = Some(self.services.save_body(&id, body).await?);
        }

        let content_type = self.services.serializer.content_type().to_owned();
        let stored_pmode = to_stored(pmode)?;
        let pmode = pmode.clone();
        self.services
            .transact(move |repository| {
                let status = match signal.as_ref().and_then(|s| s.message_units.first()) {
                    Some(MessageUnit::Receipt(_)) => OutStatus::Ack,
                    Some(MessageUnit::Error(_)) => OutStatus::Nack,
                    _ => OutStatus::Sent,
                };
                repository.update_out_message(entity_id, |message| {
                    message.operation = Operation::Sent;
                    message.status = status;
                })?;

                let Some(signal) = signal else {
                    return Ok(());
                };
                for unit in &signal.message_units {
                    let notify = match unit {
                        MessageUnit::Receipt(_) => pmode.receipt_handling.notify_message_producer,
                        MessageUnit::Error(_) => pmode.error_handling.notify_message_producer,
                        MessageUnit::UserMessage(_) => continue,
                    };
                    let mut entity = InMessage::new(unit.message_id(), unit.message_type());
                    entity.ebms_ref_to_message_id = unit.ref_to_message_id().map(str::to_owned);
                    entity.content_type = content_type.clone();
                    entity.pmode_id = Some(pmode.id.clone());
                    entity.pmode = Some(stored_pmode.clone());
                    entity.message_location = stored.clone();
                    entity.status = InStatus::Received;
                    entity.operation = if notify {
                        Operation::ToBeNotified
                    } else {
                        Operation::NotApplicable
                    };
                    repository.insert_in_message(&mut entity)?;
                }
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl Step for SendAs4MessageStep {
    async fn execute(&self, context: MessagingContext) -> Result<StepResult, Error> {
        let message = context
            .as4_message()
            .ok_or_else(|| missing("AS4 message"))?;
        let pmode = context
            .sending_pmode()
            .ok_or_else(|| missing("sending PMode"))?
            .clone();
        let entity_id = context.entity_id().ok_or_else(|| missing("out message"))?;
        let ebms_message_id = message
            .primary_message_id()
            .ok_or_else(|| missing("message id"))?
            .to_owned();
        let url = pmode.push_url()?.to_owned();
        let tracked = message.is_user_message() && pmode.reception_awareness_enabled();
        let body = self.services.serializer.serialize(message)?;

        debug!(ebms_message_id = %ebms_message_id, url = %url, "Sending message.");
        let sent = self.post(&url, body).await;
        if tracked {
            self.register_attempt(entity_id, &ebms_message_id, &pmode)
                .await?;
        }

        match sent {
            Ok(reply) => {
                self.on_sent(entity_id, reply, &pmode).await?;
                info!(ebms_message_id = %ebms_message_id, "Message sent.");
                Ok(StepResult::success(context))
            }
            Err(e) if tracked => {
                warn!(
                    ebms_message_id = %ebms_message_id,
                    "Send failed, waiting for reception awareness: {}", e
                );
                self.services
                    .transact(move |repository| {
                        repository.update_out_message(entity_id, |message| {
                            message.operation = Operation::Undetermined;
                        })
                    })
                    .await?;
                Ok(StepResult::failed(context.with_exception(e)))
            }
            Err(e) => Err(e),
        }
    }
}
