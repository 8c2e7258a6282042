// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Message entities
//!
//! Durable records owned by the engine. Inbound and outbound messages share one record shape,
//! `MessageEntity<S>`, tagged by their direction-specific status type (`InStatus` or
//! `OutStatus`). Exceptions follow the same pattern with `ExceptionEntity<S>`, where the status
//! parameter only tags the owning direction.
//!
//! Pollers claim rows through [`MessageEntity::lock`]: the row's operation is flipped (for example
//! to `Sending`) inside the claiming transaction, so a second poller never sees it again under the
//! same filter.
//!

use crate::error::Error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::{fmt, marker::PhantomData, str::FromStr};

/// Declares a closed enum that round-trips through its variant names.
macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Variant name as stored in lookup columns and configuration.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant)),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $(stringify!($variant) => Ok(Self::$variant),)+
                    _ => Err(Error::InvalidValue(format!(
                        "'{}' is not a valid {}",
                        value,
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

named_enum! {
    /// What the engine still has to do with a row.
    #[derive(Default)]
    Operation {
        #[default]
        NotApplicable,
        ToBeProcessed,
        Processing,
        ToBeSent,
        Sending,
        Sent,
        ToBeDelivered,
        Delivering,
        Delivered,
        ToBeNotified,
        Notifying,
        Notified,
        DeadLettered,
        Undetermined,
    }
}

named_enum! {
    /// Status of a received message.
    #[derive(Default)]
    InStatus {
        #[default]
        NotApplicable,
        Received,
        Created,
        Delivered,
        Notified,
        Exception,
    }
}

named_enum! {
    /// Status of a message sent by this engine.
    #[derive(Default)]
    OutStatus {
        #[default]
        NotApplicable,
        Created,
        Sent,
        Ack,
        Nack,
        Exception,
    }
}

named_enum! {
    /// Kind of ebMS message unit held by a row.
    #[derive(Default)]
    MessageType {
        #[default]
        UserMessage,
        Receipt,
        Error,
    }
}

named_enum! {
    /// Message exchange pattern.
    #[derive(Default)]
    Mep {
        #[default]
        Push,
        Pull,
    }
}

/// Direction-specific status carried by a [`MessageEntity`].
pub trait MessageStatus:
    Copy
    + Default
    + fmt::Debug
    + fmt::Display
    + FromStr<Err = Error>
    + PartialEq
    + Send
    + Sync
    + 'static
{
}

impl MessageStatus for InStatus {}
impl MessageStatus for OutStatus {}

/// A message row. `S` selects the direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntity<S> {
    /// Row id assigned by the datastore.
    #[serde(skip)]
    pub id: i64,
    pub ebms_message_id: String,
    pub ebms_ref_to_message_id: Option<String>,
    pub message_type: MessageType,
    pub mep: Mep,
    pub content_type: String,
    pub pmode_id: Option<String>,
    /// Serialized processing mode the message was handled under.
    pub pmode: Option<String>,
    pub operation: Operation,
    pub status: S,
    /// Where the message body lives in the body persister.
    pub message_location: Option<String>,
    pub insertion_time: DateTime<Utc>,
    pub modification_time: DateTime<Utc>,
}

/// A message received by this engine.
pub type InMessage = MessageEntity<InStatus>;

/// A message created and sent by this engine.
pub type OutMessage = MessageEntity<OutStatus>;

impl<S: MessageStatus> MessageEntity<S> {
    /// Creates an unsaved row with default operation and status.
    pub fn new(ebms_message_id: impl Into<String>, message_type: MessageType) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            ebms_message_id: ebms_message_id.into(),
            ebms_ref_to_message_id: None,
            message_type,
            mep: Mep::default(),
            content_type: String::new(),
            pmode_id: None,
            pmode: None,
            operation: Operation::default(),
            status: S::default(),
            message_location: None,
            insertion_time: now,
            modification_time: now,
        }
    }

    /// Claims the row for `requested_operation`.
    ///
    /// The operation only changes when `requested_operation` names a defined operation other
    /// than `NotApplicable`; anything else leaves the row untouched. Returns whether the row
    /// changed.
    pub fn lock(&mut self, requested_operation: &str) -> bool {
        let changed = lock_operation(&mut self.operation, requested_operation);
        if changed {
            self.modification_time = Utc::now();
        }
        changed
    }

    /// Applies a status given by name. Unknown names leave the row untouched.
    pub fn lock_status(&mut self, requested_status: &str) -> bool {
        match requested_status.parse::<S>() {
            Ok(status) => {
                self.status = status;
                self.modification_time = Utc::now();
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_user_message(&self) -> bool {
        self.message_type == MessageType::UserMessage
    }
}

/// A failure recorded for later notification. `S` only tags the owning direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionEntity<S> {
    #[serde(skip)]
    pub id: i64,
    pub ebms_ref_to_message_id: Option<String>,
    /// Body of the message that failed, when no message id could be determined.
    pub message_location: Option<String>,
    pub exception: String,
    pub pmode_id: Option<String>,
    pub pmode: Option<String>,
    pub operation: Operation,
    pub insertion_time: DateTime<Utc>,
    pub modification_time: DateTime<Utc>,
    #[serde(skip)]
    direction: PhantomData<S>,
}

/// Failure while receiving or processing an inbound message.
pub type InException = ExceptionEntity<InStatus>;

/// Failure while processing or sending an outbound message.
pub type OutException = ExceptionEntity<OutStatus>;

impl<S: MessageStatus> ExceptionEntity<S> {
    pub fn new(exception: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            ebms_ref_to_message_id: None,
            message_location: None,
            exception: exception.into(),
            pmode_id: None,
            pmode: None,
            operation: Operation::default(),
            insertion_time: now,
            modification_time: now,
            direction: PhantomData,
        }
    }

    /// Same contract as [`MessageEntity::lock`].
    pub fn lock(&mut self, requested_operation: &str) -> bool {
        let changed = lock_operation(&mut self.operation, requested_operation);
        if changed {
            self.modification_time = Utc::now();
        }
        changed
    }
}

/// Moves `current` to the operation named by `requested`, unless it names none or `NotApplicable`.
fn lock_operation(current: &mut Operation, requested: &str) -> bool {
    match requested.parse::<Operation>() {
        Ok(operation) if operation != Operation::default() => {
            *current = operation;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_with_malformed_operation_keeps_operation() {
        let mut entity = InMessage::new("message-1", MessageType::UserMessage);
        entity.operation = Operation::Notified;

        assert!(!entity.lock("NotApplicable"));
        assert_eq!(entity.operation, Operation::Notified);

        assert!(!entity.lock("not-an-operation"));
        assert!(!entity.lock(""));
        assert!(!entity.lock("sending"));
        assert_eq!(entity.operation, Operation::Notified);
    }

    #[test]
    fn test_lock_with_valid_operation() {
        let mut entity = OutMessage::new("message-2", MessageType::UserMessage);
        assert_eq!(entity.operation, Operation::NotApplicable);

        assert!(entity.lock("Sending"));
        assert_eq!(entity.operation, Operation::Sending);
    }

    #[test]
    fn test_lock_status() {
        let mut entity = OutMessage::new("message-3", MessageType::UserMessage);
        assert!(entity.lock_status("Ack"));
        assert_eq!(entity.status, OutStatus::Ack);
        assert!(!entity.lock_status("Delivered"));
        assert_eq!(entity.status, OutStatus::Ack);
    }

    #[test]
    fn test_exception_lock() {
        let mut exception = OutException::new("boom");
        exception.operation = Operation::ToBeNotified;
        assert!(!exception.lock("NotApplicable"));
        assert!(exception.lock("Notifying"));
        assert_eq!(exception.operation, Operation::Notifying);
    }

    #[test]
    fn test_enum_names_round_trip() {
        for name in ["ToBeSent", "DeadLettered", "Undetermined"] {
            let operation: Operation = name.parse().unwrap();
            assert_eq!(operation.as_str(), name);
        }
        assert_eq!(Operation::default(), Operation::NotApplicable);
        assert!("Pull".parse::<Mep>().is_ok());
        assert!("Receipt".parse::<MessageType>().is_ok());
    }
}
