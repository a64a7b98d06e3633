use std::time::Duration;

use bytes::Bytes;
use http::uri::PathAndQuery;
use tonic::client::Grpc;
use tonic::metadata::MetadataMap;

use crate::codec::RawCodec;
use crate::connection::ClientChannel;
use crate::error::{BridgeError, Result};

/// Default per-call deadline.
pub const DEFAULT_CALL_DEADLINE: Duration = Duration::from_secs(15);

/// Per-call options: metadata to send and the call deadline.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Ordered metadata pairs sent with the request.
    pub metadata: MetadataMap,

    /// Per-call deadline; [`DEFAULT_CALL_DEADLINE`] when unset.
    pub deadline: Option<Duration>,
}

impl CallOptions {
    pub fn with_metadata(metadata: MetadataMap) -> Self {
        CallOptions {
            metadata,
            deadline: None,
        }
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Execute one unary RPC end to end.
///
/// Sends `request_bytes` to `full_path` over the shared channel and
/// waits for the complete exchange under the call deadline. The
/// returned bytes may be empty: that is a successful OK reply with no
/// message, and the caller decides what the default value looks like.
///
/// Failure surface:
/// - [`BridgeError::Config`] for a malformed method path;
/// - [`BridgeError::Connect`] when the channel cannot be established;
/// - [`BridgeError::CallStart`] when the runtime rejects the call
///   before sending;
/// - [`BridgeError::Rpc`] for a non-OK status (code and details
///   intact, whether produced by the peer or by the transport);
/// - [`BridgeError::DeadlineExceeded`] when the deadline elapses
///   first; dropping the in-flight exchange resets the HTTP/2 stream,
///   which the server observes as a cancellation.
pub async fn unary_call(
    channel: &ClientChannel,
    full_path: &str,
    request_bytes: impl Into<Bytes>,
    options: CallOptions,
) -> Result<Bytes> {
    if !full_path.starts_with('/') {
        return Err(BridgeError::Config(format!(
            "method path must start with '/': '{full_path}'"
        )));
    }
    let path: PathAndQuery = full_path
        .parse()
        .map_err(|e| BridgeError::Config(format!("invalid method path '{full_path}': {e}")))?;

    let deadline = options.deadline.unwrap_or(DEFAULT_CALL_DEADLINE);

    let mut grpc = Grpc::new(channel.channel().await?);
    grpc.ready()
        .await
        .map_err(|e| BridgeError::CallStart(e.to_string()))?;

    let mut request = tonic::Request::new(request_bytes.into());
    *request.metadata_mut() = options.metadata;
    // Propagate the deadline to the peer as grpc-timeout; enforcement
    // stays local.
    request.set_timeout(deadline);

    tracing::debug!(path = full_path, ?deadline, "starting unary call");

    let exchange = grpc.unary(request, path, RawCodec);
    match tokio::time::timeout(deadline, exchange).await {
        Ok(Ok(response)) => Ok(response.into_inner()),
        Ok(Err(status)) => Err(BridgeError::Rpc(status)),
        Err(_) => Err(BridgeError::DeadlineExceeded { after: deadline }),
    }
}
