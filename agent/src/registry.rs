// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Step registry
//!
//! Maps the step names used in configuration to factories, and builds step graphs from pipeline
//! entries.
//!

use crate::{
    Error,
    config::{Settings, StepEntry},
    pipeline::{CompositeStep, Condition, ConditionalStep},
    step::Step,
};

use std::{collections::HashMap, sync::Arc};

/// Builds a step from its settings.
pub type StepFactory =
    Arc<dyn Fn(&Settings) -> Result<Box<dyn Step>, Error> + Send + Sync>;

#[derive(Default, Clone)]
pub struct StepRegistry {
    factories: HashMap<String, StepFactory>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Settings) -> Result<Box<dyn Step>, Error> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, entry: &StepEntry) -> Result<Box<dyn Step>, Error> {
        let factory = self.factories.get(&entry.step_type).ok_or_else(|| {
            Error::Configuration(format!("Unknown step type '{}'", entry.step_type))
        })?;
        factory(&entry.settings)
    }
}

/// Step list of a conditional pipeline.
#[derive(Clone)]
pub struct ConditionalStepConfig {
    pub condition: Option<Condition>,
    pub then_steps: Vec<StepEntry>,
    pub else_steps: Vec<StepEntry>,
}

/// Builds step graphs from configuration.
#[derive(Clone)]
pub struct StepBuilder {
    registry: Arc<StepRegistry>,
}

impl StepBuilder {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self { registry }
    }

    pub fn build<'a, I>(&self, entries: I) -> Result<CompositeStep, Error>
    where
        I: IntoIterator<Item = &'a StepEntry>,
    {
        let steps = entries
            .into_iter()
            .map(|entry| self.registry.create(entry))
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(CompositeStep::new(steps))
    }

    pub fn build_conditional(
        &self,
        config: &ConditionalStepConfig,
    ) -> Result<ConditionalStep, Error> {
        Ok(ConditionalStep::new(
            config.condition.clone(),
            self.build(&config.then_steps)?,
            self.build(&config.else_steps)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessagingContext, StepResult};

    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Step for Noop {
        async fn execute(&self, context: MessagingContext) -> Result<StepResult, Error> {
            Ok(StepResult::success(context))
        }
    }

    #[test]
    fn test_build_from_entries() {
        let mut registry = StepRegistry::new();
        registry.register("noop", |_: &Settings| Ok(Box::new(Noop) as Box<dyn Step>));
        registry.register("strict", |settings: &Settings| {
            settings
                .get("mode")
                .map(|_| Box::new(Noop) as Box<dyn Step>)
                .ok_or_else(|| Error::Configuration("mode".to_owned()))
        });
        let builder = StepBuilder::new(Arc::new(registry));

        let entries = vec![StepEntry::new("noop"), StepEntry::new("noop")];
        assert_eq!(builder.build(&entries).unwrap().len(), 2);

        let unknown = vec![StepEntry::new("missing")];
        assert!(matches!(builder.build(&unknown), Err(Error::Configuration(_))));

        let invalid = vec![StepEntry::new("strict")];
        assert!(builder.build(&invalid).is_err());
        let valid = vec![StepEntry::new("strict").with_setting("mode", "x")];
        assert!(builder.build(&valid).is_ok());
    }
}
