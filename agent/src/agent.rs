// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Agent
//!
//! An agent binds one receiver, one transformer, a happy path, an optional unhappy path and an
//! exception handler. For every received item it runs:
//!
//! 1. **Transform** the raw item into a [`MessagingContext`]. A failure goes to
//!    [`ExceptionHandler::handle_transformation_exception`].
//! 2. **Execute** the happy path, starting from a successful result. A failure to build or run
//!    the steps goes to [`ExceptionHandler::handle_execution_exception`].
//! 3. **Recover** with the unhappy path, only when the happy path did not succeed, an unhappy path
//!    is configured and the context carries no exception yet. A failure here goes to
//!    [`ExceptionHandler::handle_error_exception`] and never re-enters a pipeline.
//!
//! [`Agent::on_received`] never fails, so one broken item cannot take down the receiver loop or
//! the other items of its batch.
//!

use crate::{
    Error, ExceptionHandler, MessageCallback, MessagingContext, ReceivedMessage, Receiver,
    StepResult, Transformer,
    config::{StepConfiguration, complete_entries},
    registry::{ConditionalStepConfig, StepBuilder},
    step::Step,
};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use std::sync::Arc;

/// Steps an agent runs.
#[derive(Clone)]
pub enum Pipeline {
    /// Declarative normal and error pipelines.
    Steps(StepConfiguration),
    /// Branching happy path with an optional branching unhappy path.
    Conditional {
        happy_path: ConditionalStepConfig,
        unhappy_path: Option<ConditionalStepConfig>,
    },
}

pub struct Agent {
    name: String,
    receiver: Arc<dyn Receiver>,
    transformer: Arc<dyn Transformer>,
    exception_handler: Arc<dyn ExceptionHandler>,
    pipeline: Pipeline,
    builder: StepBuilder,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        receiver: Arc<dyn Receiver>,
        transformer: Arc<dyn Transformer>,
        exception_handler: Arc<dyn ExceptionHandler>,
        pipeline: Pipeline,
        builder: StepBuilder,
    ) -> Self {
        Self {
            name: name.into(),
            receiver,
            transformer,
            exception_handler,
            pipeline,
            builder,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receives until `token` is cancelled.
    ///
    /// Cancelling `token` also asks the receiver to stop, so in-flight items finish while no new
    /// work is picked up.
    pub async fn start(self: Arc<Self>, token: CancellationToken) -> Result<(), Error> {
        info!(agent = %self.name, "Starting agent.");

        let finished = CancellationToken::new();
        let hook = {
            let receiver = self.receiver.clone();
            let token = token.clone();
            let finished = finished.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => receiver.stop_receiving().await,
                    _ = finished.cancelled() => {}
                }
            })
        };

        let agent = self.clone();
        let callback: MessageCallback =
            Arc::new(move |message: ReceivedMessage, token: CancellationToken| {
                let agent = agent.clone();
                async move { agent.on_received(message, token).await }.boxed()
            });

        let result = self.receiver.start_receiving(callback, token).await;
        finished.cancel();
        if let Err(e) = hook.await {
            warn!(agent = %self.name, "Cancellation hook failed: {}", e);
        }

        match &result {
            Ok(()) => info!(agent = %self.name, "Agent stopped."),
            Err(e) => error!(agent = %self.name, "Agent stopped with error: {}", e),
        }
        result
    }

    /// Processes one received item.
    pub async fn on_received(
        &self,
        message: ReceivedMessage,
        token: CancellationToken,
    ) -> MessagingContext {
        debug!(agent = %self.name, "Message received.");
        let context = match self.transformer.transform(message.clone(), token).await {
            Ok(context) => context,
            Err(e) => {
                return self
                    .exception_handler
                    .handle_transformation_exception(e, &message)
                    .await;
            }
        };

        if self.has_nothing_to_execute() {
            debug!(agent = %self.name, "Nothing to execute.");
            return context;
        }

        let result = match self.run_happy_path(context.clone()).await {
            Ok(result) => result,
            Err(e) => {
                return self
                    .exception_handler
                    .handle_execution_exception(e, context)
                    .await;
            }
        };

        if result.succeeded() || result.context().exception().is_some() {
            return result.into_context();
        }

        let Some(unhappy_path) = self.unhappy_path() else {
            return result.into_context();
        };

        debug!(agent = %self.name, "Running error pipeline.");
        let context = result.into_context();
        let outcome = match unhappy_path {
            Ok(steps) => steps.execute(context.clone()).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(result) => result.into_context(),
            Err(e) => {
                self.exception_handler
                    .handle_error_exception(e, context)
                    .await
            }
        }
    }

    /// True without a conditional happy path when the normal pipeline is missing or has a hole.
    fn has_nothing_to_execute(&self) -> bool {
        match &self.pipeline {
            Pipeline::Steps(steps) => complete_entries(&steps.normal_pipeline).is_none(),
            Pipeline::Conditional { .. } => false,
        }
    }

    async fn run_happy_path(&self, context: MessagingContext) -> Result<StepResult, Error> {
        let steps: Box<dyn Step> = match &self.pipeline {
            Pipeline::Steps(steps) => {
                let entries = complete_entries(&steps.normal_pipeline).ok_or_else(|| {
                    Error::Configuration("Normal pipeline is incomplete".to_owned())
                })?;
                Box::new(self.builder.build(entries)?)
            }
            Pipeline::Conditional { happy_path, .. } => {
                Box::new(self.builder.build_conditional(happy_path)?)
            }
        };
        steps.execute(context).await
    }

    fn unhappy_path(&self) -> Option<Result<Box<dyn Step>, Error>> {
        match &self.pipeline {
            Pipeline::Steps(steps) => complete_entries(&steps.error_pipeline).map(|entries| {
                self.builder
                    .build(entries)
                    .map(|step| Box::new(step) as Box<dyn Step>)
            }),
            Pipeline::Conditional { unhappy_path, .. } => {
                unhappy_path.as_ref().map(|config| {
                    self.builder
                        .build_conditional(config)
                        .map(|step| Box::new(step) as Box<dyn Step>)
                })
            }
        }
    }
}
