// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Agent engine
//!
//! Execution model of the messaging engine. Each [`Agent`] pairs a [`Receiver`] with a
//! [`Transformer`], a pipeline of [`Step`]s and an [`ExceptionHandler`]; the [`Kernel`] runs all
//! agents concurrently against one shared datastore.
//!
//! Agents are assembled from [`AgentConfig`] through a [`ComponentRegistry`] that maps component
//! names to factories, so every shared resource is handed to the components that need it when
//! they are built.
//!

mod agent;
pub mod config;
mod context;
mod error;
mod exception;
mod kernel;
pub mod model;
mod pipeline;
pub mod pmode;
pub mod polling;
mod provider;
mod receiver;
mod registry;
mod step;
mod transformer;

pub use agent::{Agent, Pipeline};
pub use config::{
    AgentConfig, ComponentConfig, ConditionalConfig, ConditionalPipeline, Settings,
    StepConfiguration, StepEntry,
};
pub use context::{MessagingContext, MessagingMode};
pub use error::Error;
pub use exception::{ExceptionHandler, LoggingExceptionHandler};
pub use kernel::Kernel;
pub use pipeline::{CompositeStep, Condition, ConditionalStep};
pub use polling::{PollingReceiver, PollingSource};
pub use provider::{AgentProvider, ComponentRegistry, DEFAULT_EXCEPTION_HANDLER};
pub use receiver::{MessageCallback, ReceivedMessage, Receiver};
pub use registry::{ConditionalStepConfig, StepBuilder, StepRegistry};
pub use step::{Step, StepResult};
pub use transformer::Transformer;
