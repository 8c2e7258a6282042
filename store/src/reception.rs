// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Reception awareness record
//!
//! Tracks one outbound user message until an answer (receipt or error) is observed or its retry
//! budget is exhausted. The status only moves forward: once `Completed`, no operation on the
//! record changes it again.
//!

use crate::error::Error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::{fmt, str::FromStr, time::Duration};

/// Progress of a reception awareness record.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum ReceptionStatus {
    #[default]
    Pending,
    Busy,
    Completed,
}

impl ReceptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceptionStatus::Pending => "Pending",
            ReceptionStatus::Busy => "Busy",
            ReceptionStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for ReceptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceptionStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Pending" => Ok(ReceptionStatus::Pending),
            "Busy" => Ok(ReceptionStatus::Busy),
            "Completed" => Ok(ReceptionStatus::Completed),
            _ => Err(Error::InvalidValue(format!(
                "'{}' is not a valid ReceptionStatus",
                value
            ))),
        }
    }
}

/// Reliability state of one outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceptionAwareness {
    #[serde(skip)]
    pub id: i64,
    /// Row id of the tracked `OutMessage`.
    pub internal_message_id: i64,
    /// ebMS id of the tracked message.
    pub ebms_message_id: String,
    status: ReceptionStatus,
    pub current_retry_count: u32,
    pub total_retry_count: u32,
    /// Interval between send attempts, `hh:mm:ss` or `d:hh:mm:ss`.
    pub retry_interval: String,
    pub last_send_time: Option<DateTime<Utc>>,
}

impl ReceptionAwareness {
    /// Creates a pending record for the given outbound message.
    pub fn new(internal_message_id: i64, ebms_message_id: impl Into<String>) -> Self {
        Self {
            id: 0,
            internal_message_id,
            ebms_message_id: ebms_message_id.into(),
            status: ReceptionStatus::Pending,
            current_retry_count: 0,
            total_retry_count: 0,
            retry_interval: "00:00:00".to_owned(),
            last_send_time: None,
        }
    }

    pub fn status(&self) -> ReceptionStatus {
        self.status
    }

    pub fn is_completed(&self) -> bool {
        self.status == ReceptionStatus::Completed
    }

    /// True when no retry budget remains.
    pub fn is_exhausted(&self) -> bool {
        self.current_retry_count >= self.total_retry_count
    }

    /// Applies a status given by name.
    ///
    /// Unknown names are ignored, and a completed record is never changed. Returns whether the
    /// record changed.
    pub fn lock(&mut self, requested_status: &str) -> bool {
        if self.is_completed() {
            return false;
        }
        match requested_status.parse::<ReceptionStatus>() {
            Ok(status) => {
                self.status = status;
                true
            }
            Err(_) => false,
        }
    }

    pub fn mark_completed(&mut self) {
        self.status = ReceptionStatus::Completed;
    }

    /// Puts the record back in the polling queue. No-op once completed.
    pub fn mark_pending(&mut self) -> bool {
        self.lock(ReceptionStatus::Pending.as_str())
    }

    /// Parsed [`ReceptionAwareness::retry_interval`].
    pub fn retry_interval(&self) -> Result<Duration, Error> {
        parse_retry_interval(&self.retry_interval)
    }

    /// Registers a send attempt made at `at`. The first attempt keeps the counter at zero.
    pub fn register_send_attempt(&mut self, at: DateTime<Utc>) {
        if self.is_completed() {
            return;
        }
        if self.last_send_time.is_some() {
            self.current_retry_count += 1;
        }
        self.last_send_time = Some(at);
    }

    /// True when `now` is at or past the last send time plus the retry interval.
    /// A record that was never sent is always due.
    pub fn is_retry_due(&self, now: DateTime<Utc>) -> Result<bool, Error> {
        let Some(last) = self.last_send_time else {
            return Ok(true);
        };
        let interval = chrono::Duration::from_std(self.retry_interval()?)
            .map_err(|e| Error::InvalidValue(e.to_string()))?;
        Ok(now >= last + interval)
    }
}

/// Parses `hh:mm:ss` or `d:hh:mm:ss`; seconds may carry a fraction.
pub fn parse_retry_interval(value: &str) -> Result<Duration, Error> {
    let invalid =
        || Error::InvalidValue(format!("retry interval '{}'", value));

    let parts: Vec<&str> = value.trim().split(':').collect();
    let (days, hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => ("0", *h, *m, *s),
        [d, h, m, s] => (*d, *h, *m, *s),
        _ => return Err(invalid()),
    };

    let days: u64 = days.parse().map_err(|_| invalid())?;
    let hours: u64 = hours.parse().map_err(|_| invalid())?;
    let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
    let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 || !(0.0..60.0).contains(&seconds) {
        return Err(invalid());
    }

    let whole = days * 86_400 + hours * 3_600 + minutes * 60;
    Ok(Duration::from_secs(whole) + Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_pending() {
        let record = ReceptionAwareness::new(1, "message-1");
        assert_eq!(record.status(), ReceptionStatus::Pending);
        assert!(!record.is_completed());
        assert_eq!(record.current_retry_count, 0);
    }

    #[test]
    fn test_lock_ignores_unknown_status() {
        let mut record = ReceptionAwareness::new(1, "message-1");
        assert!(!record.lock("Running"));
        assert_eq!(record.status(), ReceptionStatus::Pending);
        assert!(record.lock("Busy"));
        assert_eq!(record.status(), ReceptionStatus::Busy);
    }

    #[test]
    fn test_completed_is_terminal() {
        let mut record = ReceptionAwareness::new(1, "message-1");
        record.mark_completed();
        assert!(!record.lock("Pending"));
        assert!(!record.mark_pending());
        record.register_send_attempt(Utc::now());
        assert!(record.is_completed());
        assert!(record.last_send_time.is_none());
    }

    #[test]
    fn test_register_send_attempt() {
        let mut record = ReceptionAwareness::new(1, "message-1");
        let first = Utc::now();
        record.register_send_attempt(first);
        assert_eq!(record.current_retry_count, 0);
        assert_eq!(record.last_send_time, Some(first));
        record.register_send_attempt(first);
        assert_eq!(record.current_retry_count, 1);
    }

    #[test]
    fn test_parse_retry_interval() {
        assert_eq!(
            parse_retry_interval("00:00:05:00").unwrap(),
            Duration::from_secs(300)
        );
        assert_eq!(parse_retry_interval("00:00:00").unwrap(), Duration::ZERO);
        assert_eq!(
            parse_retry_interval("1:02:03:04").unwrap(),
            Duration::from_secs(86_400 + 2 * 3_600 + 3 * 60 + 4)
        );
        assert_eq!(
            parse_retry_interval("00:00:01.5").unwrap(),
            Duration::from_millis(1_500)
        );
        assert!(parse_retry_interval("5 minutes").is_err());
        assert!(parse_retry_interval("00:61:00").is_err());
        assert!(parse_retry_interval("").is_err());
    }

    #[test]
    fn test_retry_due() {
        let now = Utc::now();
        let mut record = ReceptionAwareness::new(1, "message-1");
        assert!(record.is_retry_due(now).unwrap());

        record.retry_interval = "00:05:00".to_owned();
        record.last_send_time = Some(now - chrono::Duration::minutes(1));
        assert!(!record.is_retry_due(now).unwrap());

        record.last_send_time = Some(now - chrono::Duration::minutes(6));
        assert!(record.is_retry_due(now).unwrap());
    }
}
