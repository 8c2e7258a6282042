// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

use super::missing;
use crate::services::Services;

use agent::{
    Error, MessagingContext, Step, StepResult,
    model::{As4Message, Attachment, MessageUnit, PartInfo, UserMessage},
    pmode::to_stored,
};
use store::{MessageType, Operation, OutMessage, OutStatus, Query};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

/// ebMS default message partition channel.
pub const DEFAULT_MPC: &str =
    "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/defaultMPC";

/// Builds the user message for a submission, resolving its sending PMode and payloads.
pub struct CreateAs4MessageStep {
    services: Services,
}

impl CreateAs4MessageStep {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for CreateAs4MessageStep {
    async fn execute(&self, context: MessagingContext) -> Result<StepResult, Error> {
        let submit = context
            .submit_message()
            .ok_or_else(|| missing("submit message"))?
            .clone();
        let pmode = self.services.pmodes.sending(&submit.pmode_id)?.clone();

        let mut payload_info = Vec::with_capacity(submit.payloads.len());
        let mut attachments = Vec::with_capacity(submit.payloads.len());
        for payload in &submit.payloads {
            let content = self.services.payloads.retrieve(&payload.location).await?;
            payload_info.push(PartInfo {
                href: format!("cid:{}", payload.id),
                mime_type: payload.mime_type.clone(),
            });
            attachments.push(Attachment {
                id: payload.id.clone(),
                content_type: payload.mime_type.clone(),
                content,
            });
        }

        let message_id = submit
            .message_info
            .message_id
            .clone()
            .unwrap_or_else(|| self.services.new_message_id());
        let mpc = submit
            .message_info
            .mpc
            .clone()
            .or_else(|| pmode.mpc.clone())
            .unwrap_or_else(|| DEFAULT_MPC.to_owned());
        let user = UserMessage {
            message_id,
            ref_to_message_id: submit.message_info.ref_to_message_id.clone(),
            timestamp: Utc::now(),
            mpc,
            sender: None,
            receiver: None,
            collaboration: submit.collaboration.clone(),
            payload_info,
            properties: submit.properties.clone(),
        };
        debug!(ebms_message_id = %user.message_id, pmode = %pmode.id, "User message created.");

        let mut context = context.with_sending_pmode(pmode);
        context.set_as4_message(As4Message {
            message_units: vec![MessageUnit::UserMessage(user)],
            attachments,
        });
        Ok(StepResult::success(context))
    }
}

/// Persists the built message as an out message waiting to be sent.
pub struct StoreAs4MessageStep {
    services: Services,
}

impl StoreAs4MessageStep {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for StoreAs4MessageStep {
    async fn execute(&self, mut context: MessagingContext) -> Result<StepResult, Error> {
        let message = context
            .as4_message()
            .ok_or_else(|| missing("AS4 message"))?;
        let pmode = context
            .sending_pmode()
            .ok_or_else(|| missing("sending PMode"))?;
        let user = message
            .first_user_message()
            .ok_or_else(|| missing("user message"))?;

        let ebms_message_id = user.message_id.clone();
        let ref_to_message_id = user.ref_to_message_id.clone();
        let body = self.services.serializer.serialize(message)?;
        let content_type = self.services.serializer.content_type().to_owned();
        let stored_pmode = to_stored(pmode)?;
        let pmode_id = pmode.id.clone();
        let mep = pmode.mep;

        let location = self.services.save_body(&ebms_message_id, body).await?;
        let id = self
            .services
            .transact(move |repository| {
                if !repository
                    .find_out_messages(&Query::ebms_message_id(ebms_message_id.clone()))?
                    .is_empty()
                {
                    return Err(store::Error::InvalidValue(format!(
                        "Message {} was already submitted",
                        ebms_message_id
                    )));
                }
                let mut entity = OutMessage::new(ebms_message_id, MessageType::UserMessage);
                entity.ebms_ref_to_message_id = ref_to_message_id;
                entity.mep = mep;
                entity.content_type = content_type;
                entity.pmode_id = Some(pmode_id);
                entity.pmode = Some(stored_pmode);
                entity.operation = Operation::ToBeSent;
                entity.status = OutStatus::Created;
                entity.message_location = Some(location);
                repository.insert_out_message(&mut entity)
            })
            .await?;

        context.set_entity_id(id);
        Ok(StepResult::success(context))
    }
}
