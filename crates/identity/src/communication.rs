//! Client half of the messaging relay.
//!
//! The relay authenticates a connection by a signed login credential and then
//! forwards credentials between logged-in DIDs. This module only drives a
//! [`RelayTransport`]; the socket implementation lives with the platform.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use veritas_core::{ErrorCode, RelayConfig};

use crate::credential::Credential;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Not connected to the relay")]
    NotConnected,

    #[error("Relay did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The relay acknowledged the request with a failure
    #[error("Relay rejected the request: {0}")]
    Rejected(String),

    #[error("Relay transport error: {0}")]
    Transport(String),
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::Timeout { .. } => ErrorCode::CommunicationTimeout,
            RelayError::NotConnected | RelayError::Transport(_) => {
                ErrorCode::CommunicationNotConnected
            }
            RelayError::Rejected(_) => ErrorCode::InvalidData,
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Events understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayEvent {
    Login,
    Message,
}

impl RelayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::Login => "v1/login/did",
            RelayEvent::Message => "v1/message/relay/request",
        }
    }
}

/// Socket-level operations the client needs.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn connect(&self) -> RelayResult<()>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Sends `jwt` under `event` and waits for the relay's acknowledgement.
    /// A negative acknowledgement is [`RelayError::Rejected`].
    async fn emit(&self, event: RelayEvent, jwt: &str) -> RelayResult<()>;
}

/// Callback for inbound relayed credentials, given the raw JWT.
pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Relay client: login, send, and inbound message fan-out.
pub struct Communication {
    transport: Arc<dyn RelayTransport>,
    login_timeout: Duration,
    logged_in_did: RwLock<Option<String>>,
    subscribers: RwLock<HashMap<u64, MessageCallback>>,
    next_subscriber_id: AtomicU64,
}

impl Communication {
    pub fn new(transport: Arc<dyn RelayTransport>, config: &RelayConfig) -> Self {
        Self {
            transport,
            login_timeout: Duration::from_millis(config.login_timeout_ms),
            logged_in_did: RwLock::new(None),
            subscribers: RwLock::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Authenticates the connection as the credential's sender.
    ///
    /// Connecting and the login acknowledgement share one timeout.
    pub async fn login(&self, credential: &Credential) -> RelayResult<()> {
        let timeout_ms = self.login_timeout.as_millis() as u64;
        tokio::time::timeout(self.login_timeout, async {
            if !self.transport.is_connected() {
                self.transport.connect().await.map_err(|e| {
                    warn!(error = %e, "relay connect failed");
                    RelayError::NotConnected
                })?;
            }
            self.transport
                .emit(RelayEvent::Login, credential.jwt())
                .await
        })
        .await
        .map_err(|_| RelayError::Timeout { timeout_ms })??;

        info!(did = %credential.sender(), "logged in to relay");
        *self.logged_in_did.write().await = Some(credential.sender().to_string());
        Ok(())
    }

    /// Relays a credential to its recipient.
    pub async fn send_message(&self, credential: &Credential) -> RelayResult<()> {
        if !self.transport.is_connected() {
            return Err(RelayError::NotConnected);
        }
        self.transport
            .emit(RelayEvent::Message, credential.jwt())
            .await?;
        debug!(jti = %credential.id(), "message relayed");
        Ok(())
    }

    pub async fn subscribe_message(&self, callback: MessageCallback) -> u64 {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().await.insert(id, callback);
        id
    }

    /// Returns whether `id` was subscribed.
    pub async fn unsubscribe_message(&self, id: u64) -> bool {
        self.subscribers.write().await.remove(&id).is_some()
    }

    /// Hands one inbound JWT to every subscriber, once each.
    pub async fn deliver(&self, jwt: &str) {
        let callbacks: Vec<MessageCallback> =
            self.subscribers.read().await.values().cloned().collect();
        debug!(subscribers = callbacks.len(), "delivering relayed message");
        for callback in callbacks {
            callback(jwt);
        }
    }

    pub async fn logged_in_did(&self) -> Option<String> {
        self.logged_in_did.read().await.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Disconnects and forgets subscribers and login state.
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
        self.subscribers.write().await.clear();
        *self.logged_in_did.write().await = None;
    }
}
