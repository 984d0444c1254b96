use std::time::Duration;

use async_trait::async_trait;
use herald_contracts::HtmlMessage;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::backend::{BackendError, ChatBackend};

const CLIENT_API: &str = "_matrix/client/v3";
const MESSAGE_EVENT: &str = "m.room.message";

#[derive(Debug, Deserialize)]
struct JoinedRooms {
    joined_rooms: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    event_id: String,
}

/// Matrix client-server API over HTTP with a bearer access token.
pub struct MatrixClient {
    base_url: String,
    access_token: String,
    timeout: Duration,
    client: Client,
}

impl MatrixClient {
    pub fn new(
        homeserver_url: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: homeserver_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            timeout,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{CLIENT_API}/{path}", self.base_url)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(self.timeout)
                } else {
                    BackendError::Transport(e.to_string())
                }
            })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for MatrixClient {
    async fn joined_rooms(&self) -> Result<Vec<String>, BackendError> {
        let response = self
            .execute(self.client.get(self.url("joined_rooms")))
            .await?;
        let rooms: JoinedRooms = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(rooms.joined_rooms)
    }

    async fn join_room(&self, room: &str) -> Result<(), BackendError> {
        let path = format!("join/{}", urlencoding::encode(room));
        self.execute(self.client.post(self.url(&path)).json(&json!({})))
            .await?;
        Ok(())
    }

    async fn send_message(&self, room: &str, message: &HtmlMessage) -> Result<(), BackendError> {
        let txn_id = uuid::Uuid::new_v4();
        let path = format!(
            "rooms/{}/send/{MESSAGE_EVENT}/{txn_id}",
            urlencoding::encode(room)
        );
        let response = self
            .execute(self.client.put(self.url(&path)).json(message))
            .await?;
        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        debug!(room, event_id = %sent.event_id, "message accepted by homeserver");
        Ok(())
    }
}
