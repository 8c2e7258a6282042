// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Exception handlers
//!
//! The agent routes every error to exactly one of the three handler methods, depending on the
//! stage it happened in. Handlers always produce a context and never fail.
//!

use crate::{Error, MessagingContext, MessagingMode, ReceivedMessage};

use async_trait::async_trait;
use tracing::error;

#[async_trait]
pub trait ExceptionHandler: Send + Sync {
    /// The raw item could not be transformed.
    async fn handle_transformation_exception(
        &self,
        error: Error,
        message: &ReceivedMessage,
    ) -> MessagingContext;

    /// The happy path failed unexpectedly.
    async fn handle_execution_exception(
        &self,
        error: Error,
        context: MessagingContext,
    ) -> MessagingContext;

    /// The error pipeline failed unexpectedly.
    async fn handle_error_exception(
        &self,
        error: Error,
        context: MessagingContext,
    ) -> MessagingContext;
}

/// Logs the error and records it on the context.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExceptionHandler;

#[async_trait]
impl ExceptionHandler for LoggingExceptionHandler {
    async fn handle_transformation_exception(
        &self,
        error: Error,
        _message: &ReceivedMessage,
    ) -> MessagingContext {
        error!("Transformation failed: {}", error);
        MessagingContext::from_exception(error, MessagingMode::Unknown)
    }

    async fn handle_execution_exception(
        &self,
        error: Error,
        context: MessagingContext,
    ) -> MessagingContext {
        error!(
            mode = %context.mode(),
            "Execution failed for {}: {}",
            context.ebms_message_id().unwrap_or("unknown message"),
            error
        );
        context.with_exception(error)
    }

    async fn handle_error_exception(
        &self,
        error: Error,
        context: MessagingContext,
    ) -> MessagingContext {
        error!(
            mode = %context.mode(),
            "Error pipeline failed for {}: {}",
            context.ebms_message_id().unwrap_or("unknown message"),
            error
        );
        context.with_exception(error)
    }
}
