// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Kernel
//!
//! Starts every agent on its own task once the datastore exists, and waits for all of them to
//! stop.
//!

use crate::{Agent, Error, provider::AgentProvider};

use backoff::{ExponentialBackoff, backoff::Backoff};
use futures::future::join_all;
use store::Datastore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use std::{sync::Arc, time::Duration};

pub struct Kernel {
    datastore: Arc<dyn Datastore>,
    agents: Vec<Arc<Agent>>,
    backoff: ExponentialBackoff,
}

impl Kernel {
    pub fn new(datastore: Arc<dyn Datastore>, provider: AgentProvider) -> Self {
        Self {
            datastore,
            agents: provider.agents().to_vec(),
            backoff: ExponentialBackoff {
                max_elapsed_time: Some(Duration::from_secs(30)),
                ..ExponentialBackoff::default()
            },
        }
    }

    /// Replaces the retry policy used while creating the datastore.
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs all agents until `token` is cancelled.
    ///
    /// Fails when the datastore can not be created. Agents that stop with an error are logged;
    /// the others keep running.
    pub async fn run(mut self, token: CancellationToken) -> Result<(), Error> {
        self.ensure_datastore().await?;

        if self.agents.is_empty() {
            warn!("No agents configured.");
        }

        let tasks = self.agents.iter().map(|agent| {
            let agent = agent.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let name = agent.name().to_owned();
                (name, agent.start(token).await)
            })
        });

        for result in join_all(tasks).await {
            match result {
                Ok((name, Ok(()))) => debug!(agent = %name, "Agent finished."),
                Ok((name, Err(e))) => error!(agent = %name, "Agent failed: {}", e),
                Err(e) => error!("Agent task failed: {}", e),
            }
        }

        info!("Kernel stopped.");
        Ok(())
    }

    async fn ensure_datastore(&mut self) -> Result<(), Error> {
        self.backoff.reset();
        loop {
            let datastore = self.datastore.clone();
            let created = tokio::task::spawn_blocking(move || datastore.ensure_created())
                .await
                .map_err(|e| Error::Store(format!("Datastore task failed: {}", e)))?;
            match created {
                Ok(()) => {
                    debug!("Datastore ready.");
                    return Ok(());
                }
                Err(e) => match self.backoff.next_backoff() {
                    Some(wait) => {
                        warn!("Can not create datastore, retrying in {:?}: {}", wait, e);
                        tokio::time::sleep(wait).await;
                    }
                    None => return Err(e.into()),
                },
            }
        }
    }
}
