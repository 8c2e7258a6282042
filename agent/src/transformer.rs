// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Transformers
//!

use crate::{Error, MessagingContext, ReceivedMessage, config::Settings};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Turns a raw received item into a messaging context.
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Applies the configured settings before the first transformation.
    fn configure(&mut self, _properties: &Settings) -> Result<(), Error> {
        Ok(())
    }

    async fn transform(
        &self,
        message: ReceivedMessage,
        token: CancellationToken,
    ) -> Result<MessagingContext, Error>;
}
