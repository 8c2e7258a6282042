// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Processing modes
//!
//! A processing mode (PMode) tells the engine how one kind of exchange is routed, retried and
//! reported. Sending PModes are selected by id from a submit message; receiving PModes are matched
//! on the collaboration of an incoming user message.
//!

use crate::{Error, model::Collaboration};

use serde::{Deserialize, Serialize};
use store::Mep;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PushConfiguration {
    /// Endpoint the message is posted to.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceptionAwarenessConfig {
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub retry_count: u32,
    /// `hh:mm:ss` or `d:hh:mm:ss`.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: String,
}

fn default_retry_interval() -> String {
    "00:00:00".to_owned()
}

impl Default for ReceptionAwarenessConfig {
    fn default() -> Self {
        Self {
            is_enabled: false,
            retry_count: 0,
            retry_interval: default_retry_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reliability {
    #[serde(default)]
    pub reception_awareness: ReceptionAwarenessConfig,
}

/// Whether signals of one kind are reported to the business application.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NotifyHandling {
    #[serde(default)]
    pub notify_message_producer: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SendingProcessingMode {
    pub id: String,
    #[serde(default)]
    pub mep: Mep,
    #[serde(default)]
    pub mpc: Option<String>,
    #[serde(default)]
    pub push_configuration: Option<PushConfiguration>,
    #[serde(default)]
    pub reliability: Reliability,
    #[serde(default)]
    pub receipt_handling: NotifyHandling,
    #[serde(default)]
    pub error_handling: NotifyHandling,
    #[serde(default)]
    pub exception_handling: NotifyHandling,
}

impl SendingProcessingMode {
    pub fn reception_awareness_enabled(&self) -> bool {
        self.reliability.reception_awareness.is_enabled
    }

    /// Endpoint of a push exchange.
    pub fn push_url(&self) -> Result<&str, Error> {
        self.push_configuration
            .as_ref()
            .map(|push| push.url.as_str())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "Sending PMode {} has no push url",
                    self.id
                ))
            })
    }
}

/// Collaboration a receiving PMode accepts. Empty fields match anything.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageMatch {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Delivery {
    #[serde(default)]
    pub is_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReceivingProcessingMode {
    pub id: String,
    #[serde(default)]
    pub message_match: MessageMatch,
    #[serde(default)]
    pub deliver: Delivery,
    #[serde(default)]
    pub exception_handling: NotifyHandling,
}

impl ReceivingProcessingMode {
    /// True when `collaboration` satisfies the match of this PMode.
    pub fn matches(&self, collaboration: &Collaboration) -> bool {
        let field = |expected: &Option<String>, actual: &str| {
            expected.as_deref().map_or(true, |expected| expected == actual)
        };
        field(&self.message_match.service, &collaboration.service)
            && field(&self.message_match.action, &collaboration.action)
    }
}

/// Serialized form stored next to messages and exceptions.
pub fn to_stored<T: Serialize>(pmode: &T) -> Result<String, Error> {
    Ok(serde_json::to_string(pmode)?)
}

/// Reads a PMode back from its stored form.
pub fn from_stored<T: for<'de> Deserialize<'de>>(stored: &str) -> Result<T, Error> {
    Ok(serde_json::from_str(stored)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiving_match() {
        let pmode = ReceivingProcessingMode {
            id: "receive".to_owned(),
            message_match: MessageMatch {
                service: Some("orders".to_owned()),
                action: None,
            },
            ..Default::default()
        };
        let mut collaboration = Collaboration {
            service: "orders".to_owned(),
            action: "create".to_owned(),
            ..Default::default()
        };
        assert!(pmode.matches(&collaboration));
        collaboration.service = "invoices".to_owned();
        assert!(!pmode.matches(&collaboration));
    }

    #[test]
    fn test_push_url_required() {
        let mut pmode = SendingProcessingMode {
            id: "send".to_owned(),
            ..Default::default()
        };
        assert!(matches!(pmode.push_url(), Err(Error::Configuration(_))));
        pmode.push_configuration = Some(PushConfiguration {
            url: "http://localhost:8080/as4".to_owned(),
        });
        assert_eq!(pmode.push_url().unwrap(), "http://localhost:8080/as4");
    }

    #[test]
    fn test_stored_form() {
        let mut pmode = SendingProcessingMode {
            id: "send".to_owned(),
            ..Default::default()
        };
        pmode.reliability.reception_awareness.is_enabled = true;
        pmode.reliability.reception_awareness.retry_count = 3;
        let stored = to_stored(&pmode).unwrap();
        let loaded: SendingProcessingMode = from_stored(&stored).unwrap();
        assert_eq!(loaded, pmode);
        assert!(loaded.reception_awareness_enabled());
    }
}
