// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Reception awareness
//!
//! Decides, for one claimed record, between four outcomes checked in order:
//!
//! 1. An in message references the tracked message: the record is completed.
//! 2. The out message is still `Sending`: the record goes back to `Pending`, since the attempt
//!    in flight may still store a receipt.
//! 3. The retry budget is exhausted: the record is completed and the out message is
//!    deadlettered, with a `MissingReceipt` error stored for notification.
//! 4. The retry interval has elapsed: the out message is re-queued for the send agent.
//! 5. Otherwise the record goes back to `Pending` unchanged.
//!
//! The record, the answer lookup and the out message update share one transaction. After every
//! decision the step waits for the retry interval, which throttles the polling agent.
//!

use super::missing;
use crate::{serializer::MessageSerializer, services::Services};

use agent::{
    Error, MessagingContext, Step, StepResult,
    model::{As4Message, ErrorDetail, ErrorSignal, MessageUnit},
    pmode::{SendingProcessingMode, from_stored},
};
use store::{
    DatastoreRepository, InMessage, InStatus, MessageType, Operation, OutStatus, Query,
    ReceptionAwareness, body::MessageBodyStore,
};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Answered,
    Resend,
    Waiting,
    DeadLettered,
    /// The tracked out message no longer exists.
    Orphaned,
    AlreadyCompleted,
}

pub struct ReceptionAwarenessUpdateDatastoreStep {
    services: Services,
}

impl ReceptionAwarenessUpdateDatastoreStep {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Sleeps for `interval`, or until the engine stops.
    async fn wait(&self, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = self.services.shutdown.cancelled() => {}
        }
    }
}

#[async_trait]
impl Step for ReceptionAwarenessUpdateDatastoreStep {
    async fn execute(&self, context: MessagingContext) -> Result<StepResult, Error> {
        let record = context
            .reception_awareness_record()
            .ok_or_else(|| missing("reception awareness record"))?;
        let id = record.id;
        let ebms_message_id = record.ebms_message_id.clone();
        let interval = record.retry_interval().unwrap_or_else(|e| {
            warn!(ebms_message_id = %ebms_message_id, "Invalid retry interval: {}", e);
            Duration::ZERO
        });

        let error_id = self.services.new_message_id();
        let bodies = self.services.bodies.clone();
        let serializer = self.services.serializer.clone();
        let decided = self
            .services
            .transact(move |repository| {
                let mut record = repository.get_reception_awareness(id)?.ok_or_else(|| {
                    store::Error::EntryNotFound(format!("ReceptionAwareness/{}", id))
                })?;
                if record.is_completed() {
                    return Ok(Outcome::AlreadyCompleted);
                }

                let tracked = record.ebms_message_id.clone();
                let answered = repository.in_message_exists(
                    &Query::referencing(tracked.clone()),
                    |message| message.ebms_ref_to_message_id.as_deref() == Some(tracked.as_str()),
                )?;
                if answered {
                    record.mark_completed();
                    repository.save(&mut record)?;
                    return Ok(Outcome::Answered);
                }

                let out = record.internal_message_id;
                let operation = repository.get_out_message_data(out, |message| message.operation)?;
                let outcome = match operation {
                    // An attempt in flight may still store a synchronous answer.
                    Some(Operation::Sending) => Outcome::Waiting,
                    _ if record.is_exhausted() => {
                        record.mark_completed();
                        repository.save(&mut record)?;
                        deadletter(
                            repository,
                            &record,
                            error_id,
                            bodies.as_ref(),
                            serializer.as_ref(),
                        )?;
                        return Ok(Outcome::DeadLettered);
                    }
                    None => {
                        record.mark_completed();
                        repository.save(&mut record)?;
                        return Ok(Outcome::Orphaned);
                    }
                    Some(_) if record.is_retry_due(Utc::now()).unwrap_or(true) => {
                        repository.update_out_message(out, |message| {
                            message.operation = Operation::ToBeSent;
                        })?;
                        Outcome::Resend
                    }
                    Some(_) => Outcome::Waiting,
                };
                record.mark_pending();
                repository.save(&mut record)?;
                Ok(outcome)
            })
            .await;

        let result = match decided {
            Ok(outcome) => {
                match outcome {
                    Outcome::Answered => {
                        info!(ebms_message_id = %ebms_message_id, "Message answered.")
                    }
                    Outcome::Resend => {
                        info!(ebms_message_id = %ebms_message_id, "Message queued for resend.")
                    }
                    Outcome::DeadLettered => warn!(
                        ebms_message_id = %ebms_message_id,
                        "Retries exhausted, message deadlettered."
                    ),
                    Outcome::Orphaned => warn!(
                        ebms_message_id = %ebms_message_id,
                        "Tracked out message is gone, tracking completed."
                    ),
                    Outcome::Waiting | Outcome::AlreadyCompleted => {
                        debug!(ebms_message_id = %ebms_message_id, outcome = ?outcome, "Nothing to do.")
                    }
                }
                StepResult::success(context)
            }
            Err(e) => {
                error!(
                    ebms_message_id = %ebms_message_id,
                    "Reception awareness update failed: {}", e
                );
                let reset = self
                    .services
                    .transact(move |repository| {
                        repository
                            .update_reception_awareness(id, |record| {
                                record.mark_pending();
                            })
                            .map(|_| ())
                    })
                    .await;
                if let Err(reset) = reset {
                    warn!(ebms_message_id = %ebms_message_id, "Record not reset: {}", reset);
                }
                StepResult::failed(context.with_exception(e))
            }
        };

        self.wait(interval).await;
        Ok(result)
    }
}

/// Moves the tracked out message to its dead letter state and stores a `MissingReceipt` error
/// for it.
fn deadletter(
    repository: &mut DatastoreRepository<'_>,
    record: &ReceptionAwareness,
    error_id: String,
    bodies: &dyn MessageBodyStore,
    serializer: &dyn MessageSerializer,
) -> Result<(), store::Error> {
    let out = repository.get_out_message(record.internal_message_id)?;
    if let Some(out) = &out {
        repository.update_out_message(out.id, |message| {
            message.operation = Operation::DeadLettered;
            message.status = OutStatus::Exception;
        })?;
    }
    let notify = out
        .as_ref()
        .and_then(|message| message.pmode.as_deref())
        .and_then(|stored| from_stored::<SendingProcessingMode>(stored).ok())
        .is_some_and(|pmode| pmode.error_handling.notify_message_producer);

    let signal = As4Message::with_unit(MessageUnit::Error(ErrorSignal {
        message_id: error_id.clone(),
        ref_to_message_id: Some(record.ebms_message_id.clone()),
        timestamp: Utc::now(),
        errors: vec![ErrorDetail {
            code: "EBMS:0301".to_owned(),
            short_description: "MissingReceipt".to_owned(),
            detail: Some(format!(
                "No receipt after {} retries",
                record.current_retry_count
            )),
        }],
    }));
    let body = serializer
        .serialize(&signal)
        .map_err(|e| store::Error::Serialize(e.to_string()))?;
    let location = bodies.save(&error_id, &body)?;

    let mut entity = InMessage::new(error_id, MessageType::Error);
    entity.ebms_ref_to_message_id = Some(record.ebms_message_id.clone());
    entity.content_type = serializer.content_type().to_owned();
    entity.message_location = Some(location);
    entity.status = InStatus::Received;
    entity.operation = if notify {
        Operation::ToBeNotified
    } else {
        Operation::NotApplicable
    };
    if let Some(out) = out {
        entity.pmode_id = out.pmode_id;
        entity.pmode = out.pmode;
    }
    repository.insert_in_message(&mut entity)?;
    Ok(())
}
