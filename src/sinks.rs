// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Business application endpoints
//!
//! Where submitted payloads come from, and where delivered messages and notifications go. The
//! folder implementations write one JSON document per message.
//!

use agent::{
    Error,
    model::{DeliverMessageEnvelope, NotifyMessageEnvelope},
};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use std::path::{Path, PathBuf};

/// Loads the payloads a submit message references.
#[async_trait]
pub trait PayloadRetriever: Send + Sync {
    async fn retrieve(&self, location: &str) -> Result<Vec<u8>, Error>;
}

#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, envelope: &DeliverMessageEnvelope) -> Result<(), Error>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, envelope: &NotifyMessageEnvelope) -> Result<(), Error>;
}

/// Reads `file:///abs/path` locations, or plain paths relative to a root.
#[derive(Debug, Clone)]
pub struct FilePayloadRetriever {
    root: PathBuf,
}

impl FilePayloadRetriever {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PayloadRetriever for FilePayloadRetriever {
    async fn retrieve(&self, location: &str) -> Result<Vec<u8>, Error> {
        let path = match location.strip_prefix("file://") {
            Some(absolute) => PathBuf::from(absolute),
            None => self.root.join(location),
        };
        tokio::fs::read(&path).await.map_err(|e| {
            Error::Functional(format!("Can not retrieve payload {}: {}", location, e))
        })
    }
}

/// Keeps ids usable as file names.
pub(crate) fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

async fn write_document<T: Serialize>(
    folder: &Path,
    name: &str,
    document: &T,
) -> Result<PathBuf, Error> {
    tokio::fs::create_dir_all(folder)
        .await
        .map_err(|e| Error::Functional(format!("Can not create {}: {}", folder.display(), e)))?;
    let path = folder.join(format!("{}.json", file_stem(name)));
    let body = serde_json::to_vec_pretty(document)?;
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| Error::Functional(format!("Can not write {}: {}", path.display(), e)))?;
    debug!("Wrote {}", path.display());
    Ok(path)
}

#[derive(Serialize)]
struct DeliverDocument<'a> {
    message_id: &'a str,
    content_type: &'a str,
    message: serde_json::Value,
    attachments: Vec<&'a str>,
}

/// Writes delivered messages and their attachments to a folder.
#[derive(Debug, Clone)]
pub struct FolderDeliverer {
    folder: PathBuf,
}

impl FolderDeliverer {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }
}

#[async_trait]
impl Deliverer for FolderDeliverer {
    async fn deliver(&self, envelope: &DeliverMessageEnvelope) -> Result<(), Error> {
        let message = serde_json::from_slice(&envelope.delivery_message)?;
        let document = DeliverDocument {
            message_id: &envelope.message_id,
            content_type: &envelope.content_type,
            message,
            attachments: envelope.attachments.iter().map(|a| a.id.as_str()).collect(),
        };
        write_document(&self.folder, &envelope.message_id, &document).await?;

        for attachment in &envelope.attachments {
            let path = self.folder.join(format!(
                "{}.{}",
                file_stem(&envelope.message_id),
                file_stem(&attachment.id)
            ));
            tokio::fs::write(&path, &attachment.content).await.map_err(|e| {
                Error::Functional(format!("Can not write {}: {}", path.display(), e))
            })?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct NotifyDocument<'a> {
    message_id: &'a str,
    status: agent::model::NotifyStatus,
    content_type: &'a str,
    notification: serde_json::Value,
}

/// Writes notifications to a folder.
#[derive(Debug, Clone)]
pub struct FolderNotifier {
    folder: PathBuf,
}

impl FolderNotifier {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }
}

#[async_trait]
impl Notifier for FolderNotifier {
    async fn notify(&self, envelope: &NotifyMessageEnvelope) -> Result<(), Error> {
        let notification = serde_json::from_slice(&envelope.notify_message)?;
        let document = NotifyDocument {
            message_id: &envelope.message_id,
            status: envelope.status,
            content_type: &envelope.content_type,
            notification,
        };
        let name = format!("{}.{}", envelope.entity_table, envelope.entity_id);
        write_document(&self.folder, &name, &document).await?;
        Ok(())
    }
}
