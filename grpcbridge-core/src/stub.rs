use std::collections::BTreeMap;
use std::sync::Arc;

use prost_reflect::{DynamicMessage, ReflectMessage};
use tonic::metadata::MetadataMap;

use crate::client::{unary_call, CallOptions};
use crate::codec::{self, ProtoCodec, ReflectCodec};
use crate::connection::ClientChannel;
use crate::error::{BridgeError, Result};
use crate::parser::{MethodRecord, MethodTable};

/// Callable stubs for every method in a table, keyed by simple rpc
/// name, all sharing one channel.
pub struct StubSet {
    stubs: BTreeMap<String, MethodStub>,
}

impl StubSet {
    /// Build stubs for every method in the table, using the default
    /// codec.
    pub fn new(table: &MethodTable, channel: Arc<ClientChannel>) -> StubSet {
        Self::with_codec(table, channel, Arc::new(ReflectCodec))
    }

    pub fn with_codec(
        table: &MethodTable,
        channel: Arc<ClientChannel>,
        codec: Arc<dyn ProtoCodec>,
    ) -> StubSet {
        let stubs = table
            .iter()
            .map(|record| {
                (
                    record.simple_name.clone(),
                    MethodStub {
                        record: record.clone(),
                        channel: channel.clone(),
                        codec: codec.clone(),
                    },
                )
            })
            .collect();
        StubSet { stubs }
    }

    /// Look up a stub by simple rpc name (what host code types).
    pub fn get(&self, simple_name: &str) -> Option<&MethodStub> {
        self.stubs.get(simple_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MethodStub> {
        self.stubs.values()
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }
}

/// A callable stub for one unary method.
pub struct MethodStub {
    record: MethodRecord,
    channel: Arc<ClientChannel>,
    codec: Arc<dyn ProtoCodec>,
}

impl MethodStub {
    pub fn record(&self) -> &MethodRecord {
        &self.record
    }

    /// Construct a request value for this method from a JSON field bag.
    pub fn build(&self, json: &str) -> Result<DynamicMessage> {
        codec::message_from_json(&self.record.request, json)
    }

    /// Invoke the method with the given request message and metadata,
    /// under the default deadline.
    pub async fn call(
        &self,
        message: DynamicMessage,
        metadata: MetadataMap,
    ) -> Result<DynamicMessage> {
        self.call_with(message, CallOptions::with_metadata(metadata))
            .await
    }

    /// Invoke the method with full per-call options.
    ///
    /// The request message's descriptor must be identical to the
    /// method's request descriptor; a mismatch fails before any bytes
    /// go on the wire. An empty OK reply decodes to the default
    /// instance of the response type.
    pub async fn call_with(
        &self,
        message: DynamicMessage,
        options: CallOptions,
    ) -> Result<DynamicMessage> {
        if !self.record.is_unary() {
            return Err(BridgeError::Config(format!(
                "method '{}' is streaming; only unary calls are supported",
                self.record.simple_name
            )));
        }
        if message.descriptor() != self.record.request {
            return Err(BridgeError::WrongRequestType {
                expected: self.record.request.full_name().to_string(),
                actual: message.descriptor().full_name().to_string(),
            });
        }

        let request_bytes = self.codec.encode(&message)?;
        let response_bytes =
            unary_call(&self.channel, &self.record.full_path, request_bytes, options).await?;

        if response_bytes.is_empty() {
            return Ok(DynamicMessage::new(self.record.response.clone()));
        }
        self.codec.decode(&self.record.response, &response_bytes)
    }
}
