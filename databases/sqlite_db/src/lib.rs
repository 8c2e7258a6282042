// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # SQLite database module.
//!
//! This module contains the SQLite datastore backend implementation.
//!

mod sqlite;

pub use sqlite::SqliteDatastore;
