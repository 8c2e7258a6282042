// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Polling driver
//!
//! The loop shared by every polling receiver. A [`PollingSource`] supplies batches; each item of
//! a batch runs on its own task, and the next poll only starts once the whole batch finished. An
//! empty batch puts the loop to sleep for the polling interval.
//!

use crate::{Error, MessageCallback, Receiver};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use std::{sync::Arc, time::Duration};

/// Source of work items for [`poll`].
#[async_trait]
pub trait PollingSource: Send + Sync + 'static {
    type Item: Clone + Send + 'static;

    /// Next batch of claimed items. An empty batch means idle.
    async fn get_batch(&self) -> Result<Vec<Self::Item>, Error>;

    /// Processes one item through the agent callback.
    async fn on_item(
        &self,
        item: Self::Item,
        callback: MessageCallback,
        token: CancellationToken,
    ) -> Result<(), Error>;

    /// Called for every item whose processing failed.
    async fn handle_error(&self, item: Self::Item, error: Error);
}

/// Runs the polling loop until `token` is cancelled.
///
/// A zero `interval` is rejected before the first poll.
pub async fn poll<S: PollingSource>(
    source: Arc<S>,
    interval: Duration,
    callback: MessageCallback,
    token: CancellationToken,
) -> Result<(), Error> {
    if interval.is_zero() {
        return Err(Error::Configuration(
            "Polling interval must be greater than zero".to_owned(),
        ));
    }

    while !token.is_cancelled() {
        let batch = match source.get_batch().await {
            Ok(batch) => batch,
            Err(e) => {
                error!("Can not get polling batch: {}", e);
                Vec::new()
            }
        };

        if batch.is_empty() {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            continue;
        }

        debug!("Polled {} items.", batch.len());
        let (items, tasks): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .map(|item| {
                let source = source.clone();
                let callback = callback.clone();
                let token = token.clone();
                let task_item = item.clone();
                let task = tokio::spawn(async move {
                    source.on_item(task_item, callback, token).await
                });
                (item, task)
            })
            .unzip();

        let results = join_all(tasks).await;
        for (item, result) in items.into_iter().zip(results) {
            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => Error::Receiver(format!("Polling task failed: {}", e)),
            };
            source.handle_error(item, error).await;
        }
    }

    debug!("Polling stopped.");
    Ok(())
}

/// A [`Receiver`] driving a [`PollingSource`].
pub struct PollingReceiver<S> {
    source: Arc<S>,
    interval: Duration,
    running: Mutex<Option<CancellationToken>>,
}

impl<S: PollingSource> PollingReceiver<S> {
    pub fn new(source: S, interval: Duration) -> Self {
        Self {
            source: Arc::new(source),
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[async_trait]
impl<S: PollingSource> Receiver for PollingReceiver<S> {
    async fn start_receiving(
        &self,
        on_message: MessageCallback,
        token: CancellationToken,
    ) -> Result<(), Error> {
        let run = token.child_token();
        *self.running.lock().await = Some(run.clone());
        poll(self.source.clone(), self.interval, on_message, run).await
    }

    async fn stop_receiving(&self) {
        if let Some(run) = self.running.lock().await.take() {
            run.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessagingContext, MessagingMode, ReceivedMessage};

    use futures::FutureExt;

    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves one batch of numbers, then stays idle.
    struct Numbers {
        batch: std::sync::Mutex<Option<Vec<u32>>>,
        polls: AtomicUsize,
        failed: std::sync::Mutex<Vec<u32>>,
    }

    impl Numbers {
        fn new(batch: Vec<u32>) -> Self {
            Self {
                batch: std::sync::Mutex::new(Some(batch)),
                polls: AtomicUsize::new(0),
                failed: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PollingSource for Numbers {
        type Item = u32;

        async fn get_batch(&self) -> Result<Vec<u32>, Error> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(self.batch.lock().unwrap().take().unwrap_or_default())
        }

        async fn on_item(
            &self,
            item: u32,
            callback: MessageCallback,
            token: CancellationToken,
        ) -> Result<(), Error> {
            if item == 0 {
                panic!("zero");
            }
            let message = ReceivedMessage::Stream {
                content_type: "text/plain".to_owned(),
                body: item.to_string().into_bytes(),
            };
            let context = callback(message, token).await;
            match context.exception() {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }

        async fn handle_error(&self, item: u32, _error: Error) {
            self.failed.lock().unwrap().push(item);
        }
    }

    fn counting_callback(seen: Arc<AtomicUsize>) -> MessageCallback {
        Arc::new(move |message: ReceivedMessage, _token: CancellationToken| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                if message.body() == Some(b"13".as_slice()) {
                    MessagingContext::from_exception(
                        Error::Functional("unlucky".to_owned()),
                        MessagingMode::Unknown,
                    )
                } else {
                    MessagingContext::as4(Default::default(), MessagingMode::Unknown)
                }
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_zero_interval_is_fatal() {
        let seen = Arc::new(AtomicUsize::new(0));
        let result = poll(
            Arc::new(Numbers::new(vec![1])),
            Duration::ZERO,
            counting_callback(seen.clone()),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(Error::Configuration(_))));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_items_and_failures() {
        let seen = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(Numbers::new(vec![1, 13, 0, 2]));
        let token = CancellationToken::new();

        let handle = tokio::spawn(poll(
            source.clone(),
            Duration::from_millis(10),
            counting_callback(seen.clone()),
            token.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 3);
        let mut failed = source.failed.lock().unwrap().clone();
        failed.sort();
        assert_eq!(failed, vec![0, 13]);
        assert!(source.polls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_loop_sleeps_for_interval() {
        let seen = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(Numbers::new(Vec::new()));
        let token = CancellationToken::new();

        let handle = tokio::spawn(poll(
            source.clone(),
            Duration::from_secs(10),
            counting_callback(seen),
            token.clone(),
        ));
        tokio::time::sleep(Duration::from_secs(35)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(source.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_stop_receiving_ends_the_loop() {
        let seen = Arc::new(AtomicUsize::new(0));
        let receiver = Arc::new(PollingReceiver::new(
            Numbers::new(Vec::new()),
            Duration::from_millis(10),
        ));
        let running = receiver.clone();
        let handle = tokio::spawn(async move {
            running
                .start_receiving(counting_callback(seen), CancellationToken::new())
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        receiver.stop_receiving().await;
        assert!(handle.await.unwrap().is_ok());
    }
}
