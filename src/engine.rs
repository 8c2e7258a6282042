// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Engine
//!
//! Composition root. Builds the shared [`Services`] from [`Settings`], registers every built-in
//! component under its configuration name and hands the configured agents to the kernel.
//!
//! | Kind | Names |
//! |---|---|
//! | Receivers | `datastore`, `directory`, `http` |
//! | Transformers | `submit_message`, `as4_message`, `out_message`, `deliver_message`, `notify_message`, `reception_awareness` |
//! | Exception handlers | `log`, `outbound`, `inbound` |
//! | Conditions | `is_signal`, `is_user_message` |
//! | Steps | see [`crate::steps`] |
//!

use crate::{
    handlers::{InboundExceptionHandler, OutboundExceptionHandler},
    pmodes::PModeStore,
    receivers::{DatastoreSource, DirectorySource, HttpReceiver},
    serializer::JsonSerializer,
    services::Services,
    settings::{BodyProvider, DatabaseProvider, Settings},
    sinks::{FilePayloadRetriever, FolderDeliverer, FolderNotifier},
    steps,
    transformers::{
        As4MessageTransformer, DeliverMessageTransformer, NotifyMessageTransformer,
        OutMessageTransformer, ReceptionAwarenessTransformer, SubmitMessageTransformer,
    },
};

use agent::{
    AgentProvider, ComponentRegistry, Error, ExceptionHandler, Kernel, LoggingExceptionHandler,
    MessagingContext, Receiver, Transformer,
};
use sqlite_db::SqliteDatastore;
use store::{
    Datastore,
    body::{FileBodyStore, MemoryBodyStore, MessageBodyStore},
    memory::MemoryDatastore,
};

use tokio_util::sync::CancellationToken;
use tracing::info;

use std::sync::Arc;

const DEFAULT_DATABASE_PATH: &str = "./data";
const DEFAULT_BODIES_PATH: &str = "./data/bodies";

pub struct Engine {
    services: Services,
    provider: AgentProvider,
}

impl Engine {
    /// Builds an engine with the backends named in `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, Error> {
        let datastore: Arc<dyn Datastore> = match settings.database.provider {
            DatabaseProvider::Memory => Arc::new(MemoryDatastore::new()),
            DatabaseProvider::Sqlite => Arc::new(SqliteDatastore::new(
                settings
                    .database
                    .path
                    .as_deref()
                    .unwrap_or(DEFAULT_DATABASE_PATH),
            )?),
        };
        let bodies: Arc<dyn MessageBodyStore> = match settings.message_bodies.provider {
            BodyProvider::Memory => Arc::new(MemoryBodyStore::default()),
            BodyProvider::File => Arc::new(FileBodyStore::new(
                settings
                    .message_bodies
                    .path
                    .as_deref()
                    .unwrap_or(DEFAULT_BODIES_PATH),
            )?),
        };

        let services = Services {
            id: settings.id.clone(),
            datastore,
            bodies,
            pmodes: Arc::new(PModeStore::new(
                settings.sending_pmodes.clone(),
                settings.receiving_pmodes.clone(),
            )?),
            serializer: Arc::new(JsonSerializer),
            client: reqwest::Client::new(),
            payloads: Arc::new(FilePayloadRetriever::new(&settings.folders.submit)),
            deliverer: Arc::new(FolderDeliverer::new(&settings.folders.deliver)),
            notifier: Arc::new(FolderNotifier::new(&settings.folders.notify)),
            shutdown: CancellationToken::new(),
        };
        Self::with_services(services, settings)
    }

    /// Builds an engine over already created services.
    pub fn with_services(services: Services, settings: &Settings) -> Result<Self, Error> {
        let registry = registry(&services);
        let provider = AgentProvider::from_config(&settings.agent_configs(), &registry)?;
        info!(
            engine = %services.id,
            agents = provider.agents().len(),
            "Engine configured."
        );
        Ok(Self { services, provider })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Runs every agent until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) -> Result<(), Error> {
        let shutdown = self.services.shutdown.clone();
        let linked = token.clone();
        let link = tokio::spawn(async move {
            linked.cancelled().await;
            shutdown.cancel();
        });

        let result = Kernel::new(self.services.datastore.clone(), self.provider)
            .run(token)
            .await;
        self.services.shutdown.cancel();
        link.abort();
        result
    }
}

/// Every built-in component, bound to `services`.
pub fn registry(services: &Services) -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();

    let shared = services.clone();
    registry.register_receiver("datastore", move |settings| {
        Ok(Arc::new(DatastoreSource::receiver(shared.clone(), settings)?) as Arc<dyn Receiver>)
    });
    registry.register_receiver("directory", |settings| {
        Ok(Arc::new(DirectorySource::receiver(settings)?) as Arc<dyn Receiver>)
    });
    let serializer = services.serializer.clone();
    registry.register_receiver("http", move |settings| {
        Ok(Arc::new(HttpReceiver::from_settings(settings, serializer.clone())?)
            as Arc<dyn Receiver>)
    });

    macro_rules! transformer {
        ($name:literal, $transformer:ident) => {{
            let services = services.clone();
            registry.register_transformer($name, move || {
                Box::new($transformer::new(services.clone())) as Box<dyn Transformer>
            });
        }};
    }
    registry.register_transformer("submit_message", || {
        Box::new(SubmitMessageTransformer::new()) as Box<dyn Transformer>
    });
    transformer!("as4_message", As4MessageTransformer);
    transformer!("out_message", OutMessageTransformer);
    transformer!("deliver_message", DeliverMessageTransformer);
    transformer!("notify_message", NotifyMessageTransformer);
    registry.register_transformer("reception_awareness", || {
        Box::new(ReceptionAwarenessTransformer) as Box<dyn Transformer>
    });

    registry.register_exception_handler("log", || {
        Arc::new(LoggingExceptionHandler) as Arc<dyn ExceptionHandler>
    });
    let shared = services.clone();
    registry.register_exception_handler("outbound", move || {
        Arc::new(OutboundExceptionHandler::new(shared.clone())) as Arc<dyn ExceptionHandler>
    });
    let shared = services.clone();
    registry.register_exception_handler("inbound", move || {
        Arc::new(InboundExceptionHandler::new(shared.clone())) as Arc<dyn ExceptionHandler>
    });

    registry.register_condition("is_signal", |context: &MessagingContext| {
        context.as4_message().is_some_and(|message| message.is_signal())
    });
    registry.register_condition("is_user_message", |context: &MessagingContext| {
        context
            .as4_message()
            .is_some_and(|message| message.is_user_message())
    });

    steps::register(registry.steps_mut(), services);
    registry
}
