// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Engine settings
//!
//! The single configuration document of an engine, read from YAML.
//!
//! ```yaml
//! id: engine-a
//! database: { provider: sqlite, path: ./data/store }
//! message_bodies: { provider: file, path: ./data/bodies }
//! sending_pmodes:
//!   - id: to-partner
//!     push_configuration: { url: "http://partner:8080/as4" }
//!     reliability:
//!       reception_awareness: { is_enabled: true, retry_count: 3, retry_interval: "00:05:00" }
//! ```
//!
//! When `agents` is omitted the default agent set is configured.
//!

use agent::{
    AgentConfig, ComponentConfig, Error, StepConfiguration, StepEntry,
    pmode::{ReceivingProcessingMode, SendingProcessingMode},
};

use serde::{Deserialize, Serialize};

use std::{fs, path::Path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseProvider {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub provider: DatabaseProvider,
    /// Directory of the database file.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyProvider {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BodySettings {
    #[serde(default)]
    pub provider: BodyProvider,
    #[serde(default)]
    pub path: Option<String>,
}

/// Folders used by the built-in submit, deliver and notify agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderSettings {
    #[serde(default = "default_submit")]
    pub submit: String,
    #[serde(default = "default_deliver")]
    pub deliver: String,
    #[serde(default = "default_notify")]
    pub notify: String,
}

fn default_submit() -> String {
    "./messages/submit".to_owned()
}

fn default_deliver() -> String {
    "./messages/deliver".to_owned()
}

fn default_notify() -> String {
    "./messages/notify".to_owned()
}

impl Default for FolderSettings {
    fn default() -> Self {
        Self {
            submit: default_submit(),
            deliver: default_deliver(),
            notify: default_notify(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_address() -> String {
    "127.0.0.1:8081".to_owned()
}

fn default_path() -> String {
    "/as4".to_owned()
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            address: default_address(),
            path: default_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_id")]
    pub id: String,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub message_bodies: BodySettings,
    #[serde(default)]
    pub folders: FolderSettings,
    #[serde(default)]
    pub http: HttpSettings,
    /// Polling interval of the default agents.
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default)]
    pub sending_pmodes: Vec<SendingProcessingMode>,
    #[serde(default)]
    pub receiving_pmodes: Vec<ReceivingProcessingMode>,
    #[serde(default)]
    pub agents: Option<Vec<AgentConfig>>,
}

fn default_id() -> String {
    "as4-engine".to_owned()
}

fn default_polling_interval_ms() -> u64 {
    1000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            id: default_id(),
            database: DatabaseSettings::default(),
            message_bodies: BodySettings::default(),
            folders: FolderSettings::default(),
            http: HttpSettings::default(),
            polling_interval_ms: default_polling_interval_ms(),
            sending_pmodes: Vec::new(),
            receiving_pmodes: Vec::new(),
            agents: None,
        }
    }
}

impl Settings {
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::Configuration(format!("Invalid settings: {}", e)))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "Can not read settings {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&yaml)
    }

    /// Configured agents, or the default set.
    pub fn agent_configs(&self) -> Vec<AgentConfig> {
        match &self.agents {
            Some(agents) => agents.clone(),
            None => self.default_agents(),
        }
    }

    /// Submit, send, receive, deliver, notify and reception awareness agents.
    pub fn default_agents(&self) -> Vec<AgentConfig> {
        let interval = self.polling_interval_ms.to_string();
        let poll = |table: &str, field: &str, value: &str, update: &str| ComponentConfig {
            component_type: "datastore".to_owned(),
            settings: [
                ("table", table),
                ("field", field),
                ("value", value),
                ("update", update),
                ("polling_interval_ms", interval.as_str()),
            ]
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect(),
        };
        let component = |name: &str| ComponentConfig {
            component_type: name.to_owned(),
            settings: Default::default(),
        };
        let agent = |name: &str,
                     receiver: ComponentConfig,
                     transformer: &str,
                     handler: &str,
                     steps: StepConfiguration| AgentConfig {
            name: name.to_owned(),
            receiver,
            transformer: component(transformer),
            exception_handler: Some(handler.to_owned()),
            steps,
            conditional: None,
        };

        let mut submit = component("directory");
        submit.settings.insert("path".to_owned(), self.folders.submit.clone());
        submit
            .settings
            .insert("polling_interval_ms".to_owned(), interval.clone());

        let mut http = component("http");
        http.settings.insert("address".to_owned(), self.http.address.clone());
        http.settings.insert("path".to_owned(), self.http.path.clone());

        vec![
            agent(
                "submit",
                submit,
                "submit_message",
                "outbound",
                StepConfiguration::normal(vec![
                    StepEntry::new("create_as4_message"),
                    StepEntry::new("store_as4_message"),
                ]),
            ),
            agent(
                "send",
                poll("OutMessages", "Operation", "ToBeSent", "Sending"),
                "out_message",
                "outbound",
                StepConfiguration::normal(vec![StepEntry::new("send_as4_message")]),
            ),
            agent(
                "receive",
                http,
                "as4_message",
                "inbound",
                StepConfiguration::normal(vec![
                    StepEntry::new("save_received_message"),
                    StepEntry::new("create_receipt"),
                ])
                .with_error_pipeline(vec![StepEntry::new("create_as4_error")]),
            ),
            agent(
                "deliver",
                poll("InMessages", "Operation", "ToBeDelivered", "Delivering"),
                "deliver_message",
                "inbound",
                StepConfiguration::normal(vec![StepEntry::new("deliver_message")]),
            ),
            agent(
                "notify",
                poll("InMessages", "Operation", "ToBeNotified", "Notifying"),
                "notify_message",
                "inbound",
                StepConfiguration::normal(vec![StepEntry::new("send_notify_message")]),
            ),
            agent(
                "notify_in_exceptions",
                poll("InExceptions", "Operation", "ToBeNotified", "Notifying"),
                "notify_message",
                "log",
                StepConfiguration::normal(vec![StepEntry::new("send_notify_message")]),
            ),
            agent(
                "notify_out_exceptions",
                poll("OutExceptions", "Operation", "ToBeNotified", "Notifying"),
                "notify_message",
                "log",
                StepConfiguration::normal(vec![StepEntry::new("send_notify_message")]),
            ),
            agent(
                "reception_awareness",
                poll("ReceptionAwareness", "Status", "Pending", "Busy"),
                "reception_awareness",
                "log",
                StepConfiguration::normal(vec![StepEntry::new(
                    "reception_awareness_update_datastore",
                )]),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_yaml() {
        let settings = Settings::from_yaml(
            r#"
id: engine-a
database: { provider: sqlite, path: /tmp/store }
sending_pmodes:
  - id: to-partner
    push_configuration: { url: "http://localhost:9000/as4" }
    reliability:
      reception_awareness: { is_enabled: true, retry_count: 3, retry_interval: "00:00:10" }
agents:
  - name: send
    receiver:
      type: datastore
      settings: { table: OutMessages, field: Operation, value: ToBeSent, update: Sending }
    transformer: { type: out_message }
    steps:
      normal_pipeline:
        - type: send_as4_message
        - ~
"#,
        )
        .unwrap();

        assert_eq!(settings.database.provider, DatabaseProvider::Sqlite);
        assert_eq!(settings.message_bodies.provider, BodyProvider::Memory);
        assert_eq!(
            settings.sending_pmodes[0]
                .reliability
                .reception_awareness
                .retry_count,
            3
        );
        let agents = settings.agent_configs();
        assert_eq!(agents.len(), 1);
        let pipeline = agents[0].steps.normal_pipeline.as_ref().unwrap();
        assert_eq!(pipeline.len(), 2);
        assert!(pipeline[1].is_none());
    }

    #[test]
    fn test_default_agents() {
        let settings = Settings::default();
        let agents = settings.agent_configs();
        let names: Vec<&str> = agents.iter().map(|a| a.name.as_str()).collect();
        assert!(names.contains(&"submit"));
        assert!(names.contains(&"reception_awareness"));
        let receive = agents.iter().find(|a| a.name == "receive").unwrap();
        assert!(receive.steps.error_pipeline.is_some());
    }

    #[test]
    fn test_invalid_settings() {
        assert!(matches!(
            Settings::from_yaml("database: { provider: oracle }"),
            Err(Error::Configuration(_))
        ));
    }
}
