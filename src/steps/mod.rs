// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Built-in steps
//!
//! | Name | Agent | Effect |
//! |---|---|---|
//! | `create_as4_message` | submit | builds the user message from a submission |
//! | `store_as4_message` | submit | persists it as an out message to be sent |
//! | `send_as4_message` | send | posts it to the partner, records the reply |
//! | `save_received_message` | receive | persists a received message |
//! | `create_receipt` | receive | answers a user message with a receipt |
//! | `create_as4_error` | receive | answers a rejected message with an error |
//! | `deliver_message` | deliver | hands a user message to the deliverer |
//! | `send_notify_message` | notify | hands a notification to the notifier |
//! | `reception_awareness_update_datastore` | reception awareness | resend or deadletter |
//!

mod deliver;
mod notify;
mod receive;
mod reception;
mod send;
mod submit;

pub use deliver::DeliverMessageStep;
pub use notify::SendNotifyMessageStep;
pub use receive::{CreateAs4ErrorStep, CreateReceiptStep, SaveReceivedMessageStep};
pub use reception::ReceptionAwarenessUpdateDatastoreStep;
pub use send::SendAs4MessageStep;
pub use submit::{CreateAs4MessageStep, StoreAs4MessageStep};

use crate::services::Services;

use agent::{Error, Settings, Step, StepRegistry};

fn missing(what: &str) -> Error {
    Error::Step(format!("Context carries no {}", what))
}

/// Registers every built-in step under its name.
pub fn register(registry: &mut StepRegistry, services: &Services) {
    macro_rules! step {
        ($name:literal, $step:ident) => {{
            let services = services.clone();
            registry.register($name, move |_: &Settings| {
                Ok(Box::new($step::new(services.clone())) as Box<dyn Step>)
            });
        }};
    }

    step!("create_as4_message", CreateAs4MessageStep);
    step!("store_as4_message", StoreAs4MessageStep);
    step!("send_as4_message", SendAs4MessageStep);
    step!("save_received_message", SaveReceivedMessageStep);
    step!("create_receipt", CreateReceiptStep);
    step!("create_as4_error", CreateAs4ErrorStep);
    step!("deliver_message", DeliverMessageStep);
    step!("send_notify_message", SendNotifyMessageStep);
    step!("reception_awareness_update_datastore", ReceptionAwarenessUpdateDatastoreStep);
}
