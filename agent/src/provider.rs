// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Agent provider
//!
//! Resolves [`AgentConfig`]s into running [`Agent`]s. Receivers, transformers, exception
//! handlers and steps are looked up by name in a [`ComponentRegistry`] filled at startup.
//!

use crate::{
    Agent, Condition, Error, ExceptionHandler, LoggingExceptionHandler, MessagingContext,
    Receiver, Transformer,
    agent::Pipeline,
    config::{AgentConfig, ConditionalPipeline, Settings, complete_entries},
    registry::{ConditionalStepConfig, StepBuilder, StepRegistry},
};

use tracing::debug;

use std::{collections::HashMap, sync::Arc};

pub type ReceiverFactory =
    Arc<dyn Fn(&Settings) -> Result<Arc<dyn Receiver>, Error> + Send + Sync>;

pub type TransformerFactory = Arc<dyn Fn() -> Box<dyn Transformer> + Send + Sync>;

pub type ExceptionHandlerFactory = Arc<dyn Fn() -> Arc<dyn ExceptionHandler> + Send + Sync>;

/// Name of the handler used when an agent names none.
pub const DEFAULT_EXCEPTION_HANDLER: &str = "log";

/// Registration table for every component an agent configuration can name.
#[derive(Default, Clone)]
pub struct ComponentRegistry {
    receivers: HashMap<String, ReceiverFactory>,
    transformers: HashMap<String, TransformerFactory>,
    exception_handlers: HashMap<String, ExceptionHandlerFactory>,
    conditions: HashMap<String, Condition>,
    steps: StepRegistry,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_receiver<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Settings) -> Result<Arc<dyn Receiver>, Error> + Send + Sync + 'static,
    {
        self.receivers.insert(name.into(), Arc::new(factory));
    }

    pub fn register_transformer<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Transformer> + Send + Sync + 'static,
    {
        self.transformers.insert(name.into(), Arc::new(factory));
    }

    pub fn register_exception_handler<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn ExceptionHandler> + Send + Sync + 'static,
    {
        self.exception_handlers.insert(name.into(), Arc::new(factory));
    }

    /// Registers a predicate conditional pipelines can name.
    pub fn register_condition<F>(&mut self, name: impl Into<String>, condition: F)
    where
        F: Fn(&MessagingContext) -> bool + Send + Sync + 'static,
    {
        self.conditions.insert(name.into(), Arc::new(condition));
    }

    pub fn steps_mut(&mut self) -> &mut StepRegistry {
        &mut self.steps
    }

    pub fn steps(&self) -> &StepRegistry {
        &self.steps
    }

    fn receiver(&self, config: &AgentConfig) -> Result<Arc<dyn Receiver>, Error> {
        let name = &config.receiver.component_type;
        let factory = self.receivers.get(name).ok_or_else(|| {
            Error::Configuration(format!(
                "Agent {}: unknown receiver '{}'",
                config.name, name
            ))
        })?;
        factory(&config.receiver.settings)
    }

    fn transformer(&self, config: &AgentConfig) -> Result<Arc<dyn Transformer>, Error> {
        let name = &config.transformer.component_type;
        let factory = self.transformers.get(name).ok_or_else(|| {
            Error::Configuration(format!(
                "Agent {}: unknown transformer '{}'",
                config.name, name
            ))
        })?;
        let mut transformer = factory();
        transformer.configure(&config.transformer.settings)?;
        Ok(Arc::from(transformer))
    }

    fn exception_handler(
        &self,
        config: &AgentConfig,
    ) -> Result<Arc<dyn ExceptionHandler>, Error> {
        let name = config
            .exception_handler
            .as_deref()
            .unwrap_or(DEFAULT_EXCEPTION_HANDLER);
        match self.exception_handlers.get(name) {
            Some(factory) => Ok(factory()),
            None if name == DEFAULT_EXCEPTION_HANDLER => Ok(Arc::new(LoggingExceptionHandler)),
            None => Err(Error::Configuration(format!(
                "Agent {}: unknown exception handler '{}'",
                config.name, name
            ))),
        }
    }

    fn conditional(
        &self,
        config: &AgentConfig,
        pipeline: &ConditionalPipeline,
    ) -> Result<ConditionalStepConfig, Error> {
        let condition = match &pipeline.condition {
            Some(name) => Some(self.conditions.get(name).cloned().ok_or_else(|| {
                Error::Configuration(format!(
                    "Agent {}: unknown condition '{}'",
                    config.name, name
                ))
            })?),
            None => None,
        };
        Ok(ConditionalStepConfig {
            condition,
            then_steps: pipeline.then_steps.clone(),
            else_steps: pipeline.else_steps.clone(),
        })
    }

    fn pipeline(&self, config: &AgentConfig, builder: &StepBuilder) -> Result<Pipeline, Error> {
        let invalid = |e: Error| Error::Configuration(format!("Agent {}: {}", config.name, e));
        let Some(conditional) = &config.conditional else {
            for entries in [&config.steps.normal_pipeline, &config.steps.error_pipeline] {
                if let Some(entries) = complete_entries(entries) {
                    builder.build(entries).map_err(invalid)?;
                }
            }
            return Ok(Pipeline::Steps(config.steps.clone()));
        };

        let happy_path = self.conditional(config, &conditional.happy_path)?;
        builder.build_conditional(&happy_path).map_err(invalid)?;
        let unhappy_path = match &conditional.unhappy_path {
            Some(pipeline) => {
                let unhappy_path = self.conditional(config, pipeline)?;
                builder.build_conditional(&unhappy_path).map_err(invalid)?;
                Some(unhappy_path)
            }
            None => None,
        };
        Ok(Pipeline::Conditional {
            happy_path,
            unhappy_path,
        })
    }
}

/// Owns the configured agents.
#[derive(Default)]
pub struct AgentProvider {
    agents: Vec<Arc<Agent>>,
}

impl AgentProvider {
    /// Builds one agent per configuration.
    ///
    /// Every step of both pipelines is built once here, so unknown names, unknown conditions or
    /// invalid settings fail at startup instead of on the first message.
    pub fn from_config(
        configs: &[AgentConfig],
        registry: &ComponentRegistry,
    ) -> Result<Self, Error> {
        let builder = StepBuilder::new(Arc::new(registry.steps.clone()));
        let mut provider = Self::default();
        for config in configs {
            let pipeline = registry.pipeline(config, &builder)?;
            let agent = Agent::new(
                config.name.clone(),
                registry.receiver(config)?,
                registry.transformer(config)?,
                registry.exception_handler(config)?,
                pipeline,
                builder.clone(),
            );
            debug!("Agent {} configured.", config.name);
            provider.add_agent(agent);
        }
        Ok(provider)
    }

    pub fn add_agent(&mut self, agent: Agent) {
        self.agents.push(Arc::new(agent));
    }

    pub fn agents(&self) -> &[Arc<Agent>] {
        &self.agents
    }
}
