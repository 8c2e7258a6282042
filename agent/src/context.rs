// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Messaging context
//!
//! The unit of work threaded through a pipeline. A context holds exactly one payload at a time,
//! selected by its constructor; steps replace the payload (or the whole context) as the message
//! moves along. Contexts are never persisted.
//!
//! | Mode | Payload |
//! |---|---|
//! | `Submit` | `SubmitMessage`, then the `As4Message` built from it |
//! | `Send`, `Receive` | `As4Message` |
//! | `Deliver` | `DeliverMessageEnvelope` |
//! | `Notify` | `NotifyMessageEnvelope` |
//! | `Unknown` | `ReceptionAwareness`, or nothing when the context only reports an exception |
//!

use crate::{
    Error,
    model::{As4Message, DeliverMessageEnvelope, NotifyMessageEnvelope, SubmitMessage},
    pmode::{ReceivingProcessingMode, SendingProcessingMode},
};

use store::ReceptionAwareness;

use std::fmt;

/// Role of the agent that produced a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessagingMode {
    Submit,
    Receive,
    Send,
    Notify,
    Deliver,
    #[default]
    Unknown,
}

impl fmt::Display for MessagingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessagingMode::Submit => "Submit",
            MessagingMode::Receive => "Receive",
            MessagingMode::Send => "Send",
            MessagingMode::Notify => "Notify",
            MessagingMode::Deliver => "Deliver",
            MessagingMode::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Payload {
    Empty,
    Submit(Box<SubmitMessage>),
    As4(Box<As4Message>),
    Deliver(Box<DeliverMessageEnvelope>),
    Notify(Box<NotifyMessageEnvelope>),
    ReceptionAwareness(Box<ReceptionAwareness>),
}

/// Message context.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagingContext {
    payload: Payload,
    mode: MessagingMode,
    exception: Option<Error>,
    sending_pmode: Option<SendingProcessingMode>,
    receiving_pmode: Option<ReceivingProcessingMode>,
    /// Row id of the stored entity this context works on.
    entity_id: Option<i64>,
}

impl MessagingContext {
    fn with_payload(payload: Payload, mode: MessagingMode) -> Self {
        Self {
            payload,
            mode,
            exception: None,
            sending_pmode: None,
            receiving_pmode: None,
            entity_id: None,
        }
    }

    pub fn submit(message: SubmitMessage) -> Self {
        Self::with_payload(Payload::Submit(Box::new(message)), MessagingMode::Submit)
    }

    /// A protocol message handled in `mode`.
    pub fn as4(message: As4Message, mode: MessagingMode) -> Self {
        Self::with_payload(Payload::As4(Box::new(message)), mode)
    }

    pub fn deliver(envelope: DeliverMessageEnvelope) -> Self {
        Self::with_payload(Payload::Deliver(Box::new(envelope)), MessagingMode::Deliver)
    }

    pub fn notify(envelope: NotifyMessageEnvelope) -> Self {
        Self::with_payload(Payload::Notify(Box::new(envelope)), MessagingMode::Notify)
    }

    /// Carries a claimed reception awareness record.
    pub fn reception_awareness(record: ReceptionAwareness) -> Self {
        let id = record.id;
        Self::with_payload(
            Payload::ReceptionAwareness(Box::new(record)),
            MessagingMode::Unknown,
        )
        .with_entity_id(id)
    }

    /// A context that only reports `error`.
    pub fn from_exception(error: Error, mode: MessagingMode) -> Self {
        Self::with_payload(Payload::Empty, mode).with_exception(error)
    }

    pub fn mode(&self) -> MessagingMode {
        self.mode
    }

    pub fn exception(&self) -> Option<&Error> {
        self.exception.as_ref()
    }

    pub fn with_exception(mut self, error: Error) -> Self {
        self.exception = Some(error);
        self
    }

    pub fn submit_message(&self) -> Option<&SubmitMessage> {
        match &self.payload {
            Payload::Submit(message) => Some(message),
            _ => None,
        }
    }

    pub fn as4_message(&self) -> Option<&As4Message> {
        match &self.payload {
            Payload::As4(message) => Some(message),
            _ => None,
        }
    }

    pub fn deliver_message(&self) -> Option<&DeliverMessageEnvelope> {
        match &self.payload {
            Payload::Deliver(envelope) => Some(envelope),
            _ => None,
        }
    }

    pub fn notify_message(&self) -> Option<&NotifyMessageEnvelope> {
        match &self.payload {
            Payload::Notify(envelope) => Some(envelope),
            _ => None,
        }
    }

    pub fn reception_awareness_record(&self) -> Option<&ReceptionAwareness> {
        match &self.payload {
            Payload::ReceptionAwareness(record) => Some(record),
            _ => None,
        }
    }

    /// Replaces the payload with `message`, keeping mode, PModes and entity.
    pub fn set_as4_message(&mut self, message: As4Message) {
        self.payload = Payload::As4(Box::new(message));
    }

    pub fn sending_pmode(&self) -> Option<&SendingProcessingMode> {
        self.sending_pmode.as_ref()
    }

    pub fn receiving_pmode(&self) -> Option<&ReceivingProcessingMode> {
        self.receiving_pmode.as_ref()
    }

    pub fn with_sending_pmode(mut self, pmode: SendingProcessingMode) -> Self {
        self.sending_pmode = Some(pmode);
        self
    }

    pub fn with_receiving_pmode(mut self, pmode: ReceivingProcessingMode) -> Self {
        self.receiving_pmode = Some(pmode);
        self
    }

    pub fn set_receiving_pmode(&mut self, pmode: ReceivingProcessingMode) {
        self.receiving_pmode = Some(pmode);
    }

    pub fn entity_id(&self) -> Option<i64> {
        self.entity_id
    }

    pub fn with_entity_id(mut self, id: i64) -> Self {
        self.entity_id = Some(id);
        self
    }

    pub fn set_entity_id(&mut self, id: i64) {
        self.entity_id = Some(id);
    }

    /// ebMS id of whatever the context carries.
    pub fn ebms_message_id(&self) -> Option<&str> {
        match &self.payload {
            Payload::Empty => None,
            Payload::Submit(message) => message.message_info.message_id.as_deref(),
            Payload::As4(message) => message.primary_message_id(),
            Payload::Deliver(envelope) => Some(&envelope.message_id),
            Payload::Notify(envelope) => Some(&envelope.message_id),
            Payload::ReceptionAwareness(record) => Some(&record.ebms_message_id),
        }
    }

    /// Id of the processing mode the context is handled under.
    pub fn pmode_id(&self) -> Option<&str> {
        self.sending_pmode
            .as_ref()
            .map(|pmode| pmode.id.as_str())
            .or_else(|| self.receiving_pmode.as_ref().map(|pmode| pmode.id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Collaboration, MessageInfo};

    use std::collections::BTreeMap;

    fn submit() -> SubmitMessage {
        SubmitMessage {
            message_info: MessageInfo {
                message_id: Some("submit-1".to_owned()),
                ..Default::default()
            },
            collaboration: Collaboration::default(),
            pmode_id: "send".to_owned(),
            payloads: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    #[test]
    fn test_single_payload() {
        let mut context = MessagingContext::submit(submit());
        assert_eq!(context.mode(), MessagingMode::Submit);
        assert!(context.submit_message().is_some());
        assert_eq!(context.ebms_message_id(), Some("submit-1"));

        context.set_as4_message(As4Message::default());
        assert!(context.submit_message().is_none());
        assert!(context.as4_message().is_some());
        assert_eq!(context.mode(), MessagingMode::Submit);
    }

    #[test]
    fn test_exception_context_has_no_payload() {
        let context = MessagingContext::from_exception(
            Error::Transform("bad input".to_owned()),
            MessagingMode::Receive,
        );
        assert!(context.exception().is_some());
        assert!(context.as4_message().is_none());
        assert!(context.ebms_message_id().is_none());
    }

    #[test]
    fn test_reception_awareness_payload() {
        let mut record = ReceptionAwareness::new(7, "out-7");
        record.id = 3;
        let context = MessagingContext::reception_awareness(record);
        assert_eq!(context.mode(), MessagingMode::Unknown);
        assert_eq!(context.entity_id(), Some(3));
        assert_eq!(
            context.reception_awareness_record().map(|r| r.internal_message_id),
            Some(7)
        );
    }
}
