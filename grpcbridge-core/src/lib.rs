//! Embed a gRPC unary client and server behind runtime-parsed
//! protobuf service descriptors.
//!
//! A `.proto` file parses into a [`MethodTable`]; on the client side
//! the table plus a [`ClientChannel`] yields callable stubs
//! ([`StubSet`]), and on the server side the table binds host handlers
//! into a [`DispatchTable`] served by [`GrpcServer`]. Message
//! encoding/decoding goes through the [`ProtoCodec`] seam, backed by
//! prost-reflect dynamic messages by default.
//!
//! ```no_run
//! use std::sync::Arc;
//! use grpcbridge_core::{
//!     ClientChannel, DispatchTable, GrpcServer, MethodTable, ServerConfig, StubSet,
//! };
//!
//! # async fn demo() -> grpcbridge_core::Result<()> {
//! let table = MethodTable::from_proto_file("helloworld.proto")?;
//!
//! let mut dispatch = DispatchTable::new();
//! dispatch.register_unary(table.get("SayHello").unwrap(), |_ctx, request| {
//!     // inspect `request`, build a reply of the response type
//! #    let _ = request;
//! #    unimplemented!()
//! })?;
//! let server = GrpcServer::new(dispatch, ServerConfig::default());
//! let handle = server.spawn();
//!
//! let channel = Arc::new(ClientChannel::new("127.0.0.1:50051"));
//! let stubs = StubSet::new(&table, channel);
//! let stub = stubs.get("SayHello").unwrap();
//! let reply = stub
//!     .call(stub.build(r#"{"name": "World"}"#)?, Default::default())
//!     .await?;
//! # let _ = reply;
//! handle.interrupt();
//! handle.join().await
//! # }
//! ```

mod client;
mod codec;
mod connection;
mod descriptor;
mod dispatch;
mod error;
mod handler;
mod hooks;
mod metadata;
mod parser;
mod server;
mod stub;

pub use client::{unary_call, CallOptions, DEFAULT_CALL_DEADLINE};
pub use codec::{message_from_json, message_to_json, ProtoCodec, RawCodec, ReflectCodec};
pub use connection::{ClientChannel, ClientConfig};
pub use descriptor::{compile_proto_file, resolve_message};
pub use dispatch::DispatchTable;
pub use error::{BridgeError, Result};
pub use handler::{handler_fn, CallContext, HandlerError, MessageHandler, MethodHandler};
pub use hooks::{HookResult, NoopHooks, ServerHooks};
pub use metadata::{metadata_from_flat, metadata_from_pairs, metadata_to_string};
pub use parser::{MethodRecord, MethodTable};
pub use server::{GrpcServer, ServerConfig, ServerHandle, ServerStats, StatsSnapshot};
pub use stub::{MethodStub, StubSet};

// Re-exported so hosts can name the message and metadata types in
// their own signatures without importing the underlying crates.
pub use prost_reflect::{DynamicMessage, MessageDescriptor, Value};
pub use tonic::metadata::MetadataMap;
pub use tonic::{Code, Status};
