use bytes::{Buf, BufMut, Bytes};
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::codec::{BufferSettings, Codec, Decoder, Encoder};
use tonic::Status;

use crate::error::{BridgeError, Result};

/// Translation between language-native message values and payload
/// bytes.
///
/// The call cores on both sides speak raw bytes; stubs and handler
/// wrappers use a `ProtoCodec` at the boundary. The crate ships
/// [`ReflectCodec`]; hosts with their own protobuf runtime can supply
/// a different implementation.
pub trait ProtoCodec: Send + Sync {
    /// Serialize a message value to protobuf wire bytes.
    fn encode(&self, message: &DynamicMessage) -> Result<Vec<u8>>;

    /// Deserialize wire bytes into a value of the given message type.
    /// Empty input produces the default instance.
    fn decode(&self, descriptor: &MessageDescriptor, bytes: &[u8]) -> Result<DynamicMessage>;
}

/// The default codec, backed by prost-reflect dynamic messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReflectCodec;

impl ProtoCodec for ReflectCodec {
    fn encode(&self, message: &DynamicMessage) -> Result<Vec<u8>> {
        Ok(message.encode_to_vec())
    }

    fn decode(&self, descriptor: &MessageDescriptor, bytes: &[u8]) -> Result<DynamicMessage> {
        DynamicMessage::decode(descriptor.clone(), bytes)
            .map_err(|e| BridgeError::Proto(format!("failed to decode message: {e}")))
    }
}

/// Build a message value of the given type from a JSON field bag.
pub fn message_from_json(descriptor: &MessageDescriptor, json: &str) -> Result<DynamicMessage> {
    let mut deserializer = serde_json::Deserializer::from_str(json);
    let message = DynamicMessage::deserialize(descriptor.clone(), &mut deserializer)
        .map_err(|e| BridgeError::Proto(format!("failed to build message from JSON: {e}")))?;
    deserializer
        .end()
        .map_err(|e| BridgeError::Proto(format!("trailing JSON input: {e}")))?;
    Ok(message)
}

/// Render a message value as a JSON string.
pub fn message_to_json(message: &DynamicMessage) -> Result<String> {
    serde_json::to_string(message)
        .map_err(|e| BridgeError::Proto(format!("failed to render message as JSON: {e}")))
}

/// A gRPC codec that moves raw message bytes in both directions.
///
/// Both the client call core and the server dispatch are byte-level:
/// descriptor-aware encoding and decoding happen only in stubs and
/// handler wrappers, so the wire seam stays ignorant of message types.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = RawEncoder;
    type Decoder = RawDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        RawEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawDecoder
    }
}

/// Writes already-encoded message bytes into the outgoing frame.
#[derive(Debug)]
pub struct RawEncoder;

impl Encoder for RawEncoder {
    type Item = Bytes;
    type Error = Status;

    fn encode(
        &mut self,
        item: Self::Item,
        dst: &mut tonic::codec::EncodeBuf<'_>,
    ) -> std::result::Result<(), Self::Error> {
        dst.put_slice(&item);
        Ok(())
    }

    fn buffer_settings(&self) -> BufferSettings {
        BufferSettings::default()
    }
}

/// Copies an incoming frame out as message bytes.
#[derive(Debug)]
pub struct RawDecoder;

impl Decoder for RawDecoder {
    type Item = Bytes;
    type Error = Status;

    fn decode(
        &mut self,
        src: &mut tonic::codec::DecodeBuf<'_>,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        let len = src.remaining();
        Ok(Some(src.copy_to_bytes(len)))
    }

    fn buffer_settings(&self) -> BufferSettings {
        BufferSettings::default()
    }
}
