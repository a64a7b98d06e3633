use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};
use tonic::metadata::MetadataMap;

use crate::codec::ProtoCodec;
use crate::error::BridgeError;
use crate::parser::MethodRecord;

/// Per-call context handed to a handler: the call details and the
/// request metadata of the call being served.
#[derive(Debug, Clone)]
pub struct CallContext {
    method: String,
    metadata: MetadataMap,
    deadline: Option<Duration>,
    peer: Option<SocketAddr>,
}

impl CallContext {
    pub(crate) fn new(
        method: String,
        metadata: MetadataMap,
        peer: Option<SocketAddr>,
    ) -> CallContext {
        let deadline = parse_grpc_timeout(&metadata);
        CallContext {
            method,
            metadata,
            deadline,
            peer,
        }
    }

    /// The full method path of this call (`/pkg.Service/Method`).
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request metadata sent by the client.
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// The client's deadline for this call, when it sent one.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// The peer address of the connection carrying this call.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// Parse a wire `grpc-timeout` value (`<amount><unit>`, unit one of
/// `H M S m u n`).
fn parse_grpc_timeout(metadata: &MetadataMap) -> Option<Duration> {
    let value = metadata.get("grpc-timeout")?.to_str().ok()?;
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    match unit {
        "H" => Some(Duration::from_secs(amount.checked_mul(3600)?)),
        "M" => Some(Duration::from_secs(amount.checked_mul(60)?)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

/// An error raised by a host handler.
///
/// The message crosses the wire as the details of an INTERNAL status;
/// nothing else about the failure leaves the server.
#[derive(Debug)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> HandlerError {
        HandlerError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::new(message)
    }
}

impl From<BridgeError> for HandlerError {
    fn from(err: BridgeError) -> Self {
        HandlerError::new(err.to_string())
    }
}

/// A host-supplied method implementation: request bytes in, response
/// bytes out.
///
/// Handlers are shared by the server for its whole run and must not
/// assume anything about the previous call; the dispatch layer
/// guarantees only one call is in flight at a time.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &CallContext,
        request: &[u8],
    ) -> std::result::Result<Vec<u8>, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> MethodHandler for FnHandler<F>
where
    F: Fn(&CallContext, &[u8]) -> std::result::Result<Vec<u8>, HandlerError> + Send + Sync,
{
    async fn handle(
        &self,
        ctx: &CallContext,
        request: &[u8],
    ) -> std::result::Result<Vec<u8>, HandlerError> {
        (self.0)(ctx, request)
    }
}

/// Wrap a plain closure over request/response bytes as a handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn MethodHandler>
where
    F: Fn(&CallContext, &[u8]) -> std::result::Result<Vec<u8>, HandlerError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHandler(f))
}

/// A handler wrapper that encapsulates codec work for one method: the
/// wrapped function sees decoded request values and returns response
/// values, and the wrapper owns the method's descriptors and codec.
pub struct MessageHandler<F> {
    request: MessageDescriptor,
    response: MessageDescriptor,
    codec: Arc<dyn ProtoCodec>,
    f: F,
}

impl<F> MessageHandler<F>
where
    F: Fn(&CallContext, DynamicMessage) -> std::result::Result<DynamicMessage, HandlerError>
        + Send
        + Sync,
{
    pub fn new(record: &MethodRecord, codec: Arc<dyn ProtoCodec>, f: F) -> MessageHandler<F> {
        MessageHandler {
            request: record.request.clone(),
            response: record.response.clone(),
            codec,
            f,
        }
    }
}

#[async_trait]
impl<F> MethodHandler for MessageHandler<F>
where
    F: Fn(&CallContext, DynamicMessage) -> std::result::Result<DynamicMessage, HandlerError>
        + Send
        + Sync,
{
    async fn handle(
        &self,
        ctx: &CallContext,
        request: &[u8],
    ) -> std::result::Result<Vec<u8>, HandlerError> {
        let request = self.codec.decode(&self.request, request)?;
        let response = (self.f)(ctx, request)?;
        if response.descriptor() != self.response {
            return Err(HandlerError::new(format!(
                "handler returned a {} value, expected {}",
                response.descriptor().full_name(),
                self.response.full_name()
            )));
        }
        Ok(self.codec.encode(&response)?)
    }
}
