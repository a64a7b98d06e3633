use std::time::Duration;

use tokio::sync::OnceCell;
use tonic::transport::{Channel, Endpoint};

use crate::error::{BridgeError, Result};

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Connection configuration for establishing a gRPC channel.
///
/// Channels are plain-text HTTP/2. Credential selection beyond
/// insecure is an extension point layered on top of this type, not
/// implemented here.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum time to wait for the connection to be established.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

/// A handle to a connection target, shared by every stub produced from
/// it.
///
/// The underlying channel is established on first use and reused for
/// all subsequent calls; it lives as long as the longest-holding stub.
#[derive(Debug)]
pub struct ClientChannel {
    target: String,
    config: ClientConfig,
    channel: OnceCell<Channel>,
}

impl ClientChannel {
    /// Create a channel handle for a `host:port` target.
    pub fn new(target: impl Into<String>) -> Self {
        Self::with_config(target, ClientConfig::default())
    }

    pub fn with_config(target: impl Into<String>, config: ClientConfig) -> Self {
        ClientChannel {
            target: target.into(),
            config,
            channel: OnceCell::new(),
        }
    }

    /// The `host:port` string this handle connects to.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The established channel, connecting on first use.
    pub(crate) async fn channel(&self) -> Result<Channel> {
        let channel = self
            .channel
            .get_or_try_init(|| async {
                let uri = format!("http://{}", self.target);
                let endpoint: Endpoint = Channel::from_shared(uri)
                    .map_err(|e| {
                        BridgeError::Config(format!("invalid target '{}': {e}", self.target))
                    })?
                    .connect_timeout(self.config.connect_timeout);

                endpoint.connect().await.map_err(|e| BridgeError::Connect {
                    target: self.target.clone(),
                    message: e.to_string(),
                })
            })
            .await?;
        Ok(channel.clone())
    }
}
