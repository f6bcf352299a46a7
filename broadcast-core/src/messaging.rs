//! Outbound one-way messages.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::instrument;

use crate::{
    error::BroadcastError,
    http::{build_client, describe, send_for_body},
};

const LINE_API_BASE: &str = "https://api.line.me";

#[async_trait]
pub trait MessagingGateway: Send + Sync + Debug {
    async fn send(&self, user_id: &str, text: &str) -> Result<(), BroadcastError>;
}

#[derive(Debug, Serialize)]
struct TextMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    to: &'a str,
    messages: [TextMessage<'a>; 1],
}

/// LINE Messaging API push client.
#[derive(Clone)]
pub struct LineMessagingClient {
    channel_access_token: String,
    http: Client,
    base_url: String,
}

impl Debug for LineMessagingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineMessagingClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl LineMessagingClient {
    pub fn new(channel_access_token: String, timeout: Duration) -> reqwest::Result<Self> {
        Self::with_base_url(channel_access_token, timeout, LINE_API_BASE)
    }

    pub fn with_base_url(
        channel_access_token: String,
        timeout: Duration,
        base_url: &str,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            channel_access_token,
            http: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MessagingGateway for LineMessagingClient {
    #[instrument(skip(self, text), level = "debug")]
    async fn send(&self, user_id: &str, text: &str) -> Result<(), BroadcastError> {
        let url = format!("{}/v2/bot/message/push", self.base_url);
        let body = PushRequest { to: user_id, messages: [TextMessage { kind: "text", text }] };

        let request = self.http.post(url).bearer_auth(&self.channel_access_token).json(&body);

        send_for_body(request, "LINE push message")
            .await
            .map(|_| ())
            .map_err(|e| BroadcastError::Delivery(describe(e)))
    }
}
