// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the agent engine.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// Invalid or incomplete configuration. Fatal for the component that reports it.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A received item could not be turned into a messaging context.
    #[error("Transformation error: {0}")]
    Transform(String),
    /// A step failed unexpectedly.
    #[error("Step error: {0}")]
    Step(String),
    /// Datastore or body persister failure.
    #[error("Store error: {0}")]
    Store(String),
    /// A receiver could not start or keep receiving.
    #[error("Receiver error: {0}")]
    Receiver(String),
    /// A message could not be transmitted.
    #[error("An error occurred while sending a message: {0}.")]
    Send(String),
    /// A message could not be encoded or decoded.
    #[error("Serialize error: {0}")]
    Serialize(String),
    /// Error that does not compromise the operation of the system.
    #[error("Error: {0}")]
    Functional(String),
}

impl From<store::Error> for Error {
    fn from(error: store::Error) -> Self {
        Error::Store(error.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialize(error.to_string())
    }
}
