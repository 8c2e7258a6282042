// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Agent configuration
//!
//! Declarative description of an agent. Component names are resolved through a
//! [`ComponentRegistry`](crate::ComponentRegistry) when the agent is built.
//!
//! ```yaml
//! name: send
//! receiver:
//!   type: datastore
//!   settings: { table: OutMessages, field: Operation, value: ToBeSent, update: Sending }
//! transformer:
//!   type: out_message
//! exception_handler: outbound
//! steps:
//!   normal_pipeline:
//!     - type: send_as4_message
//! ```
//!

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

/// Free-form settings of a component.
pub type Settings = BTreeMap<String, String>;

/// A named component with its settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentConfig {
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub settings: Settings,
}

/// One pipeline entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepEntry {
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub settings: Settings,
}

impl StepEntry {
    pub fn new(step_type: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            settings: Settings::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}

/// Happy and unhappy path of an agent. Entries may be left empty (`~`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepConfiguration {
    #[serde(default)]
    pub normal_pipeline: Option<Vec<Option<StepEntry>>>,
    #[serde(default)]
    pub error_pipeline: Option<Vec<Option<StepEntry>>>,
}

impl StepConfiguration {
    pub fn normal(entries: Vec<StepEntry>) -> Self {
        Self {
            normal_pipeline: Some(entries.into_iter().map(Some).collect()),
            error_pipeline: None,
        }
    }

    pub fn with_error_pipeline(mut self, entries: Vec<StepEntry>) -> Self {
        self.error_pipeline = Some(entries.into_iter().map(Some).collect());
        self
    }
}

/// Complete pipeline entries: `None` when the list is missing or has a hole.
pub fn complete_entries(entries: &Option<Vec<Option<StepEntry>>>) -> Option<Vec<&StepEntry>> {
    entries.as_ref()?.iter().map(Option::as_ref).collect()
}

/// One branch pair of a conditional pipeline. `condition` names a condition registered in the
/// [`ComponentRegistry`](crate::ComponentRegistry); without one the else steps run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionalPipeline {
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub then_steps: Vec<StepEntry>,
    #[serde(default)]
    pub else_steps: Vec<StepEntry>,
}

/// Branching happy path with an optional branching unhappy path.
///
/// ```yaml
/// conditional:
///   happy_path:
///     condition: is_signal
///     then_steps: [{ type: save_received_message }]
///     else_steps: [{ type: save_received_message }, { type: create_receipt }]
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionalConfig {
    pub happy_path: ConditionalPipeline,
    #[serde(default)]
    pub unhappy_path: Option<ConditionalPipeline>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub receiver: ComponentConfig,
    pub transformer: ComponentConfig,
    /// Registered exception handler; the logging handler when unset.
    #[serde(default)]
    pub exception_handler: Option<String>,
    #[serde(default)]
    pub steps: StepConfiguration,
    /// Replaces `steps` when set.
    #[serde(default)]
    pub conditional: Option<ConditionalConfig>,
}
