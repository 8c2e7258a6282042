// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Canonical messages
//!
//! The payload variants a [`MessagingContext`](crate::MessagingContext) can carry. `As4Message`
//! is the canonical form of a protocol message; turning it into bytes on the wire is the job of
//! a serializer outside this crate.
//!

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use store::{MessageType, Table};

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
    pub role: String,
}

/// Business collaboration a user message belongs to.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Collaboration {
    pub service: String,
    pub action: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub agreement_ref: Option<String>,
}

/// Reference from a user message to one of its attachments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartInfo {
    pub href: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub message_id: String,
    #[serde(default)]
    pub ref_to_message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub mpc: String,
    #[serde(default)]
    pub sender: Option<Party>,
    #[serde(default)]
    pub receiver: Option<Party>,
    pub collaboration: Collaboration,
    #[serde(default)]
    pub payload_info: Vec<PartInfo>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub message_id: String,
    pub ref_to_message_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// ebMS error code, for example `EBMS:0301`.
    pub code: String,
    pub short_description: String,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSignal {
    pub message_id: String,
    #[serde(default)]
    pub ref_to_message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub errors: Vec<ErrorDetail>,
}

/// One ebMS message unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageUnit {
    UserMessage(UserMessage),
    Receipt(Receipt),
    Error(ErrorSignal),
}

impl MessageUnit {
    pub fn message_id(&self) -> &str {
        match self {
            MessageUnit::UserMessage(unit) => &unit.message_id,
            MessageUnit::Receipt(unit) => &unit.message_id,
            MessageUnit::Error(unit) => &unit.message_id,
        }
    }

    pub fn ref_to_message_id(&self) -> Option<&str> {
        match self {
            MessageUnit::UserMessage(unit) => unit.ref_to_message_id.as_deref(),
            MessageUnit::Receipt(unit) => Some(&unit.ref_to_message_id),
            MessageUnit::Error(unit) => unit.ref_to_message_id.as_deref(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            MessageUnit::UserMessage(_) => MessageType::UserMessage,
            MessageUnit::Receipt(_) => MessageType::Receipt,
            MessageUnit::Error(_) => MessageType::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Canonical AS4 protocol message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct As4Message {
    pub message_units: Vec<MessageUnit>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl As4Message {
    pub fn with_unit(unit: MessageUnit) -> Self {
        Self {
            message_units: vec![unit],
            attachments: Vec::new(),
        }
    }

    /// Id of the first message unit.
    pub fn primary_message_id(&self) -> Option<&str> {
        self.message_units.first().map(MessageUnit::message_id)
    }

    pub fn first_user_message(&self) -> Option<&UserMessage> {
        self.user_messages().next()
    }

    pub fn user_messages(&self) -> impl Iterator<Item = &UserMessage> {
        self.message_units.iter().filter_map(|unit| match unit {
            MessageUnit::UserMessage(user) => Some(user),
            _ => None,
        })
    }

    pub fn is_user_message(&self) -> bool {
        self.first_user_message().is_some()
    }

    pub fn is_signal(&self) -> bool {
        !self.message_units.is_empty() && !self.is_user_message()
    }

    pub fn is_empty(&self) -> bool {
        self.message_units.is_empty()
    }
}

/// A payload referenced by a submit message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitPayload {
    pub id: String,
    pub mime_type: String,
    /// Where the payload retriever finds the content.
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageInfo {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub ref_to_message_id: Option<String>,
    #[serde(default)]
    pub mpc: Option<String>,
}

/// Business message submitted for sending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitMessage {
    #[serde(default)]
    pub message_info: MessageInfo,
    pub collaboration: Collaboration,
    /// Id of the sending processing mode to apply.
    pub pmode_id: String,
    #[serde(default)]
    pub payloads: Vec<SubmitPayload>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Received user message handed over to a deliverer.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliverMessageEnvelope {
    pub message_id: String,
    /// Row id of the `InMessage` being delivered.
    pub in_message_id: i64,
    pub content_type: String,
    pub delivery_message: Vec<u8>,
    pub attachments: Vec<Attachment>,
}

/// What a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyStatus {
    Delivered,
    Error,
    Exception,
}

/// Notification handed over to a notifier.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyMessageEnvelope {
    /// Id of the message the notification refers to.
    pub message_id: String,
    pub status: NotifyStatus,
    pub content_type: String,
    pub notify_message: Vec<u8>,
    /// Row that requested the notification.
    pub entity_table: Table,
    pub entity_id: i64,
}
