// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Built-in receivers.

mod datastore;
mod file;
mod http;

pub use datastore::{DatastoreSource, FilterField};
pub use file::DirectorySource;
pub use http::HttpReceiver;

use agent::{Error, Settings};

use std::{str::FromStr, time::Duration};

const DEFAULT_POLLING_INTERVAL_MS: u64 = 1000;

pub(crate) fn required<'a>(settings: &'a Settings, key: &str) -> Result<&'a str, Error> {
    settings
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::Configuration(format!("Missing receiver setting '{}'", key)))
}

pub(crate) fn optional<T: FromStr>(
    settings: &Settings,
    key: &str,
    default: T,
) -> Result<T, Error> {
    match settings.get(key) {
        Some(value) => value.parse().map_err(|_| {
            Error::Configuration(format!("Invalid receiver setting {}: '{}'", key, value))
        }),
        None => Ok(default),
    }
}

/// `polling_interval_ms`. Zero is rejected by the polling driver when it starts.
pub(crate) fn polling_interval(settings: &Settings) -> Result<Duration, Error> {
    optional(settings, "polling_interval_ms", DEFAULT_POLLING_INTERVAL_MS).map(Duration::from_millis)
}
