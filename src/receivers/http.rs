// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # HTTP receiver
//!
//! Accepts AS4 messages posted by partners. The agent result decides the reply:
//!
//! | Agent result | Reply |
//! |---|---|
//! | `Send` context holding a signal | `200` with the serialized signal |
//! | exception from the transformer | `400` |
//! | any other exception | `500` |
//! | anything else | `202` |
//!

use super::required;
use crate::serializer::MessageSerializer;

use agent::{
    Error, MessageCallback, MessagingContext, MessagingMode, ReceivedMessage, Receiver, Settings,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::post,
};
use tokio::{net::TcpListener, sync::Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use std::sync::Arc;

#[derive(Clone)]
struct ReceiveState {
    callback: MessageCallback,
    serializer: Arc<dyn MessageSerializer>,
    token: CancellationToken,
}

pub struct HttpReceiver {
    address: String,
    path: String,
    serializer: Arc<dyn MessageSerializer>,
    running: Mutex<Option<CancellationToken>>,
}

impl HttpReceiver {
    pub fn new(
        address: impl Into<String>,
        path: impl Into<String>,
        serializer: Arc<dyn MessageSerializer>,
    ) -> Self {
        Self {
            address: address.into(),
            path: path.into(),
            serializer,
            running: Mutex::new(None),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        serializer: Arc<dyn MessageSerializer>,
    ) -> Result<Self, Error> {
        let address = required(settings, "address")?;
        let path = settings.get("path").map(String::as_str).unwrap_or("/as4");
        if !path.starts_with('/') {
            return Err(Error::Configuration(format!(
                "HTTP receiver path '{}' must start with '/'",
                path
            )));
        }
        Ok(Self::new(address, path, serializer))
    }

    /// Routes `POST path` into `callback`.
    pub fn router(
        path: &str,
        callback: MessageCallback,
        serializer: Arc<dyn MessageSerializer>,
        token: CancellationToken,
    ) -> Router {
        Router::new()
            .route(path, post(receive))
            .with_state(ReceiveState {
                callback,
                serializer,
                token,
            })
    }
}

async fn receive(
    State(state): State<ReceiveState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let message = ReceivedMessage::Stream {
        content_type,
        body: body.to_vec(),
    };
    let context = (state.callback)(message, state.token.clone()).await;
    reply(&context, state.serializer.as_ref())
}

fn reply(context: &MessagingContext, serializer: &dyn MessageSerializer) -> Response {
    if let (MessagingMode::Send, Some(signal)) = (context.mode(), context.as4_message()) {
        return match serializer.serialize(signal) {
            Ok(body) => (
                StatusCode::OK,
                [(CONTENT_TYPE, serializer.content_type().to_owned())],
                body,
            )
                .into_response(),
            Err(e) => {
                error!("Can not serialize reply: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        };
    }
    match context.exception() {
        Some(e @ Error::Transform(_)) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Some(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

#[async_trait]
impl Receiver for HttpReceiver {
    async fn start_receiving(
        &self,
        on_message: MessageCallback,
        token: CancellationToken,
    ) -> Result<(), Error> {
        let listener = TcpListener::bind(&self.address).await.map_err(|e| {
            Error::Receiver(format!("Can not listen on {}: {}", self.address, e))
        })?;
        let run = token.child_token();
        *self.running.lock().await = Some(run.clone());

        let app = Self::router(&self.path, on_message, self.serializer.clone(), token);
        info!("Receiving AS4 messages on http://{}{}", self.address, self.path);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { run.cancelled().await })
            .await
            .map_err(|e| Error::Receiver(format!("HTTP receiver failed: {}", e)))
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
    use crate::serializer::{JSON_CONTENT_TYPE, JsonSerializer};

    use agent::model::{As4Message, MessageUnit, Receipt};
    use axum::{body::Body, http::Request};
    use chrono::Utc;
    use futures::FutureExt;
    use tower::ServiceExt;

    fn receipt() -> As4Message {
        As4Message::with_unit(MessageUnit::Receipt(Receipt {
            message_id: "receipt-1".to_owned(),
            ref_to_message_id: "user-1".to_owned(),
            timestamp: Utc::now(),
        }))
    }

    fn router(reply: MessagingContext) -> Router {
        let callback: MessageCallback =
            Arc::new(move |_message: ReceivedMessage, _token: CancellationToken| {
                let reply = reply.clone();
                async move { reply }.boxed()
            });
        HttpReceiver::router(
            "/as4",
            callback,
            Arc::new(JsonSerializer),
            CancellationToken::new(),
        )
    }

    fn post(body: &'static str) -> Request<Body> {
        Request::post("/as4")
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_replies_with_signal() {
        let app = router(MessagingContext::as4(receipt(), MessagingMode::Send));
        let response = app.oneshot(post("{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let signal = JsonSerializer.deserialize(&body, JSON_CONTENT_TYPE).unwrap();
        assert_eq!(signal, receipt());
    }

    #[tokio::test]
    async fn test_status_codes() {
        let accepted = router(MessagingContext::as4(receipt(), MessagingMode::Receive));
        let response = accepted.oneshot(post("{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let rejected = router(MessagingContext::from_exception(
            Error::Transform("no units".to_owned()),
            MessagingMode::Unknown,
        ));
        let response = rejected.oneshot(post("{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let failed = router(MessagingContext::from_exception(
            Error::Store("down".to_owned()),
            MessagingMode::Receive,
        ));
        let response = failed.oneshot(post("{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let other = router(MessagingContext::as4(receipt(), MessagingMode::Send));
        let response = other
            .oneshot(Request::get("/as4").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_settings() {
        let serializer: Arc<dyn MessageSerializer> = Arc::new(JsonSerializer);
        let mut settings = Settings::new();
        assert!(HttpReceiver::from_settings(&settings, serializer.clone()).is_err());
        settings.insert("address".to_owned(), "127.0.0.1:0".to_owned());
        settings.insert("path".to_owned(), "as4".to_owned());
        assert!(HttpReceiver::from_settings(&settings, serializer.clone()).is_err());
        settings.insert("path".to_owned(), "/inbox".to_owned());
        assert!(HttpReceiver::from_settings(&settings, serializer).is_ok());
    }
}
