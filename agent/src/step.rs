// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Steps
//!
//! A step is one unit of pipeline work. Expected business failures are reported through
//! [`StepResult::failed`]; an `Err` is reserved for unexpected failures and is routed by the agent
//! to its exception handler.
//!

use crate::{Error, MessagingContext};

use async_trait::async_trait;

/// Outcome of a step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    context: MessagingContext,
    succeeded: bool,
    can_proceed: bool,
}

impl StepResult {
    pub fn success(context: MessagingContext) -> Self {
        Self {
            context,
            succeeded: true,
            can_proceed: true,
        }
    }

    /// A failure the agent may still follow with its error pipeline.
    pub fn failed(context: MessagingContext) -> Self {
        Self {
            context,
            succeeded: false,
            can_proceed: true,
        }
    }

    /// Ends the pipeline after this result, whatever its outcome.
    pub fn and_stop_execution(mut self) -> Self {
        self.can_proceed = false;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn can_proceed(&self) -> bool {
        self.can_proceed
    }

    pub fn context(&self) -> &MessagingContext {
        &self.context
    }

    pub fn into_context(self) -> MessagingContext {
        self.context
    }
}

/// Unit of pipeline work.
#[async_trait]
pub trait Step: Send + Sync {
    /// Executes the step on `context`.
    async fn execute(&self, context: MessagingContext) -> Result<StepResult, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessagingMode;

    #[test]
    fn test_result_flags() {
        let context = MessagingContext::from_exception(
            Error::Functional("x".to_owned()),
            MessagingMode::Unknown,
        );
        let success = StepResult::success(context.clone());
        assert!(success.succeeded() && success.can_proceed());

        let failed = StepResult::failed(context.clone());
        assert!(!failed.succeeded() && failed.can_proceed());

        let stopped = StepResult::success(context.clone()).and_stop_execution();
        assert!(stopped.succeeded() && !stopped.can_proceed());

        let stopped = StepResult::failed(context).and_stop_execution();
        assert!(!stopped.succeeded() && !stopped.can_proceed());
    }
}
