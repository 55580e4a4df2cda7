//! # Management Stats Client
//!
//! Read-only queue depth reporting via the RabbitMQ management API. Used for
//! consolidated status reporting; the caller falls back to passive declares
//! through [`BrokerClient::queue_depth`](crate::messaging::BrokerClient)
//! when the management endpoint is unreachable or unauthenticated.

use serde::{Deserialize, Serialize};

use crate::config::ManagementConfig;
use crate::messaging::MessagingError;

/// Queue info as reported by `GET /api/queues`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedQueue {
    pub name: String,
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub messages_ready: u64,
    #[serde(default)]
    pub messages_unacknowledged: u64,
}

/// Basic-authenticated client for the broker's management API.
#[derive(Debug, Clone)]
pub struct ManagementClient {
    base_url: String,
    username: String,
    password: String,
    http: reqwest::Client,
}

impl ManagementClient {
    pub fn new(config: &ManagementConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            http: reqwest::Client::new(),
        }
    }

    /// List queues whose names start with `prefix`.
    ///
    /// The management API has no server-side name filter worth relying on
    /// across versions, so filtering happens client-side.
    pub async fn list_queues(&self, prefix: &str) -> Result<Vec<ManagedQueue>, MessagingError> {
        let url = format!("{}/api/queues", self.base_url);

        let response = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| MessagingError::management(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MessagingError::management(format!(
                "management API returned {}",
                response.status()
            )));
        }

        let queues: Vec<ManagedQueue> = response
            .json()
            .await
            .map_err(|e| MessagingError::management(format!("decode failed: {e}")))?;

        Ok(filter_by_prefix(queues, prefix))
    }
}

fn filter_by_prefix(queues: Vec<ManagedQueue>, prefix: &str) -> Vec<ManagedQueue> {
    queues
        .into_iter()
        .filter(|queue| queue.name.starts_with(prefix))
        .collect()
}
