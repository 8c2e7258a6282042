// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Engine services
//!
//! Everything the built-in components share, created once by the engine and handed to every
//! factory. Datastore and body persister calls are synchronous, so they run on the blocking
//! pool.
//!

use crate::{
    pmodes::PModeStore,
    serializer::MessageSerializer,
    sinks::{Deliverer, Notifier, PayloadRetriever},
};

use agent::Error;
use store::{Datastore, DatastoreExt, DatastoreRepository, body::MessageBodyStore};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use std::sync::Arc;

#[derive(Clone)]
pub struct Services {
    /// Engine id, used as the domain part of generated message ids.
    pub id: String,
    pub datastore: Arc<dyn Datastore>,
    pub bodies: Arc<dyn MessageBodyStore>,
    pub pmodes: Arc<PModeStore>,
    pub serializer: Arc<dyn MessageSerializer>,
    pub client: reqwest::Client,
    pub payloads: Arc<dyn PayloadRetriever>,
    pub deliverer: Arc<dyn Deliverer>,
    pub notifier: Arc<dyn Notifier>,
    /// Cancelled when the engine stops.
    pub shutdown: CancellationToken,
}

impl Services {
    /// New ebMS message id.
    pub fn new_message_id(&self) -> String {
        format!("{}@{}", Uuid::new_v4(), self.id)
    }

    /// Runs `work` in one datastore transaction.
    pub async fn transact<T, F>(&self, work: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&mut DatastoreRepository<'_>) -> Result<T, store::Error> + Send + 'static,
    {
        let datastore = self.datastore.clone();
        tokio::task::spawn_blocking(move || datastore.transact(work))
            .await
            .map_err(|e| Error::Store(format!("Transaction task failed: {}", e)))?
            .map_err(Error::from)
    }

    /// Stores a message body and returns its location.
    pub async fn save_body(&self, ebms_message_id: &str, body: Vec<u8>) -> Result<String, Error> {
        let bodies = self.bodies.clone();
        let id = ebms_message_id.to_owned();
        tokio::task::spawn_blocking(move || bodies.save(&id, &body))
            .await
            .map_err(|e| Error::Store(format!("Body task failed: {}", e)))?
            .map_err(Error::from)
    }

    pub async fn load_body(&self, location: &str) -> Result<Vec<u8>, Error> {
        let bodies = self.bodies.clone();
        let location = location.to_owned();
        tokio::task::spawn_blocking(move || bodies.load(&location))
            .await
            .map_err(|e| Error::Store(format!("Body task failed: {}", e)))?
            .map_err(Error::from)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::{
        serializer::JsonSerializer,
        sinks::{FilePayloadRetriever, FolderDeliverer, FolderNotifier},
    };
    use agent::pmode::{ReceivingProcessingMode, SendingProcessingMode};
    use store::{body::MemoryBodyStore, memory::MemoryDatastore};

    use std::path::Path;

    /// Memory backed services writing sink output below `dir`.
    pub fn services(
        dir: &Path,
        sending: Vec<SendingProcessingMode>,
        receiving: Vec<ReceivingProcessingMode>,
    ) -> Services {
        let datastore = MemoryDatastore::new();
        datastore.ensure_created().unwrap();
        Services {
            id: "test-engine".to_owned(),
            datastore: Arc::new(datastore),
            bodies: Arc::new(MemoryBodyStore::default()),
            pmodes: Arc::new(PModeStore::new(sending, receiving).unwrap()),
            serializer: Arc::new(JsonSerializer),
            client: reqwest::Client::new(),
            payloads: Arc::new(FilePayloadRetriever::new(dir)),
            deliverer: Arc::new(FolderDeliverer::new(dir.join("deliver"))),
            notifier: Arc::new(FolderNotifier::new(dir.join("notify"))),
            shutdown: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::{MessageType, OutMessage};

    #[tokio::test]
    async fn test_transact_and_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let services = test_support::services(dir.path(), vec![], vec![]);

        let id = services.new_message_id();
        assert!(id.ends_with("@test-engine"));

        let ebms_id = id.clone();
        let row = services
            .transact(move |repository| {
                let mut message = OutMessage::new(ebms_id, MessageType::UserMessage);
                repository.insert_out_message(&mut message)
            })
            .await
            .unwrap();
        assert!(row > 0);

        let location = services.save_body(&id, b"body".to_vec()).await.unwrap();
        assert_eq!(services.load_body(&location).await.unwrap(), b"body");
        assert!(services.load_body("memory://missing").await.is_err());
    }
}
