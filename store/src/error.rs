// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Store Error Types
//!
//! Errors raised by the datastore, the typed repository and the message body persister.
//!
//! ## Error Categories
//!
//! ### Storage Infrastructure Errors
//! - **CreateStore**: the backend (tables, directories, connections) could not be initialized
//! - **Store**: a write, transaction or I/O operation failed
//!
//! ### Data Access Errors
//! - **Get**: a row could not be read from the backend
//! - **EntryNotFound**: a row addressed by id does not exist; callers commonly treat this as a
//!   business outcome rather than an infrastructure failure
//!
//! ### Data Format Errors
//! - **Serialize**: a row body could not be encoded or decoded
//! - **InvalidValue**: a stored or configured value (retry interval, enum name) is malformed
//!
//! All variants carry a `String` context so errors stay `Clone` and serializable, which lets the
//! agent layer store them inside a messaging context and persist them in exception rows.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the store crate.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq)]
pub enum Error {
    /// The backend could not be created or opened.
    #[error("Can't create store: {0}")]
    CreateStore(String),

    /// A read failed.
    #[error("Get error: {0}")]
    Get(String),

    /// The addressed row does not exist.
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// A write or transaction failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A row body could not be encoded or decoded.
    #[error("Serialize error: {0}")]
    Serialize(String),

    /// A value does not have the expected format.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl From<bincode::Error> for Error {
    fn from(error: bincode::Error) -> Self {
        Error::Serialize(error.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Store(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = Error::EntryNotFound("OutMessages/42".to_owned());
        assert_eq!(error.to_string(), "Entry not found: OutMessages/42");
        let error = Error::InvalidValue("retry interval 'abc'".to_owned());
        assert_eq!(error.to_string(), "Invalid value: retry interval 'abc'");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: Error = io.into();
        assert!(matches!(error, Error::Store(_)));
    }
}
