// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Directory poller
//!
//! Picks up `*.json` files dropped in a folder. A file is claimed by renaming it to
//! `*.processing`; once the agent is done it becomes `*.accepted`, or `*.exception` when the
//! agent reported a failure.
//!
//! A `*.processing` file found by the first poll was left behind by a stopped engine, so it is
//! renamed back to `*.json` and claimed again.
//!

use super::{polling_interval, required};
use crate::serializer::JSON_CONTENT_TYPE;

use agent::{
    Error, MessageCallback, PollingReceiver, PollingSource, ReceivedMessage, Settings,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

const PENDING_EXTENSION: &str = "json";
const PROCESSING_EXTENSION: &str = "processing";
const ACCEPTED_EXTENSION: &str = "accepted";
const EXCEPTION_EXTENSION: &str = "exception";

pub struct DirectorySource {
    folder: PathBuf,
    recovered: AtomicBool,
}

impl DirectorySource {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            recovered: AtomicBool::new(false),
        }
    }

    /// Returns the files of the folder with `extension`.
    async fn files_with(&self, extension: &str) -> Result<Vec<PathBuf>, Error> {
        let mut entries = tokio::fs::read_dir(&self.folder).await.map_err(|e| {
            Error::Receiver(format!("Can not read {}: {}", self.folder.display(), e))
        })?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Receiver(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(extension) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn recover_interrupted(&self) -> Result<(), Error> {
        for path in self.files_with(PROCESSING_EXTENSION).await? {
            warn!("Reclaiming interrupted {}", path.display());
            rename(&path, PENDING_EXTENSION).await?;
        }
        Ok(())
    }

    pub fn receiver(settings: &Settings) -> Result<PollingReceiver<DirectorySource>, Error> {
        let folder = required(settings, "path")?;
        let interval = polling_interval(settings)?;
        Ok(PollingReceiver::new(Self::new(folder), interval))
    }
}

async fn rename(from: &Path, extension: &str) -> Result<PathBuf, Error> {
    let to = from.with_extension(extension);
    tokio::fs::rename(from, &to).await.map_err(|e| {
        Error::Receiver(format!("Can not rename {}: {}", from.display(), e))
    })?;
    Ok(to)
}

#[async_trait]
impl PollingSource for DirectorySource {
    type Item = PathBuf;

    async fn get_batch(&self) -> Result<Vec<PathBuf>, Error> {
        tokio::fs::create_dir_all(&self.folder).await.map_err(|e| {
            Error::Receiver(format!("Can not create {}: {}", self.folder.display(), e))
        })?;

        if !self.recovered.swap(true, Ordering::SeqCst) {
            self.recover_interrupted().await?;
        }
        let pending = self.files_with(PENDING_EXTENSION).await?;

        let mut claimed = Vec::with_capacity(pending.len());
        for path in pending {
            match rename(&path, PROCESSING_EXTENSION).await {
                Ok(path) => claimed.push(path),
                // Another poller got there first.
                Err(e) => debug!("{}", e),
            }
        }
        Ok(claimed)
    }

    async fn on_item(
        &self,
        item: PathBuf,
        callback: MessageCallback,
        token: CancellationToken,
    ) -> Result<(), Error> {
        let body = tokio::fs::read(&item).await.map_err(|e| {
            Error::Receiver(format!("Can not read {}: {}", item.display(), e))
        })?;
        let message = ReceivedMessage::Stream {
            content_type: JSON_CONTENT_TYPE.to_owned(),
            body,
        };

        let context = callback(message, token).await;
        match context.exception() {
            Some(e) => {
                warn!("{} failed: {}", item.display(), e);
                rename(&item, EXCEPTION_EXTENSION).await?;
            }
            None => {
                rename(&item, ACCEPTED_EXTENSION).await?;
            }
        }
        Ok(())
    }

    async fn handle_error(&self, item: PathBuf, error: Error) {
        error!("Can not process {}: {}", item.display(), error);
        if let Err(e) = rename(&item, EXCEPTION_EXTENSION).await {
            error!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent::{MessagingContext, MessagingMode};

    use futures::FutureExt;

    use std::sync::Arc;

    fn failing() -> MessageCallback {
        Arc::new(|_message: ReceivedMessage, _token: CancellationToken| {
            async move {
                MessagingContext::from_exception(
                    Error::Transform("bad".to_owned()),
                    MessagingMode::Submit,
                )
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_claims_and_marks_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), b"bad").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), b"x").unwrap();
        let source = DirectorySource::new(dir.path());

        let batch = source.get_batch().await.unwrap();
        assert_eq!(batch, vec![dir.path().join("a.processing")]);
        assert!(source.get_batch().await.unwrap().is_empty());

        source
            .on_item(batch[0].clone(), failing(), CancellationToken::new())
            .await
            .unwrap();
        assert!(dir.path().join("a.exception").exists());
        assert!(dir.path().join("ignored.txt").exists());
    }

    #[tokio::test]
    async fn test_accepts_processed_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), b"{}").unwrap();
        let source = DirectorySource::new(dir.path());
        let accepting: MessageCallback =
            Arc::new(|_message: ReceivedMessage, _token: CancellationToken| {
                async move { MessagingContext::as4(Default::default(), MessagingMode::Submit) }
                    .boxed()
            });

        let batch = source.get_batch().await.unwrap();
        source
            .on_item(batch[0].clone(), accepting, CancellationToken::new())
            .await
            .unwrap();
        assert!(dir.path().join("b.accepted").exists());

        source
            .handle_error(dir.path().join("missing.processing"), Error::Receiver("x".to_owned()))
            .await;
    }

    #[tokio::test]
    async fn test_reclaims_interrupted_files_on_first_poll() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("c.processing"), b"{}").unwrap();
        let source = DirectorySource::new(dir.path());

        let batch = source.get_batch().await.unwrap();
        assert_eq!(batch, vec![dir.path().join("c.processing")]);

        // Files claimed later by this source are in flight, not interrupted.
        std::fs::write(dir.path().join("d.processing"), b"{}").unwrap();
        assert!(source.get_batch().await.unwrap().is_empty());
        assert!(dir.path().join("d.processing").exists());
    }

    #[test]
    fn test_path_required() {
        assert!(matches!(
            DirectorySource::receiver(&Settings::new()),
            Err(Error::Configuration(_))
        ));
    }
}
