// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # AS4 engine
//!
//! Built-in components of a store and forward AS4 messaging engine running on the [`agent`]
//! execution model: receivers, transformers, steps and exception handlers for submitting,
//! sending, receiving, delivering and notifying messages, plus the reception awareness agent
//! that resends or deadletters unanswered messages.
//!
//! [`Engine::from_settings`] assembles everything from one YAML document.
//!

pub mod engine;
pub mod handlers;
pub mod pmodes;
pub mod receivers;
pub mod serializer;
pub mod services;
pub mod settings;
pub mod sinks;
pub mod steps;
pub mod transformers;

pub use engine::{Engine, registry};
pub use pmodes::PModeStore;
pub use serializer::{JSON_CONTENT_TYPE, JsonSerializer, MessageSerializer};
pub use services::Services;
pub use settings::Settings;
