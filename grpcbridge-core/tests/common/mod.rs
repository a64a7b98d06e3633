// Shared helpers for the end-to-end tests: a greeter proto fixture, a
// standard handler set, and hooks that surface the ephemeral port.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use prost_reflect::Value;
use tokio::sync::oneshot;

use grpcbridge_core::{
    handler_fn, CallContext, DispatchTable, DynamicMessage, GrpcServer, HandlerError, HookResult,
    MethodHandler, MethodTable, ServerConfig, ServerHandle, ServerHooks,
};

pub const GREETER_PROTO: &str = r#"
syntax = "proto3";

package helloworld;

message HelloRequest {
  string name = 1;
}

message HelloReply {
  string message = 1;
}

service Greeter {
  // Replies with a greeting for the request's name.
  rpc SayHello (HelloRequest) returns (HelloReply);
  // Always fails with an application error.
  rpc Boom (HelloRequest) returns (HelloReply);
  // Takes a full second before replying.
  rpc Sleepy (HelloRequest) returns (HelloReply);
  // Replies with the value of the x-trace request metadata key.
  rpc Echo (HelloRequest) returns (HelloReply);
  // Replies OK with no message bytes at all.
  rpc Quiet (HelloRequest) returns (HelloReply);
}
"#;

/// Write the greeter proto into a temp dir and parse it.
pub fn greeter_table() -> (tempfile::TempDir, MethodTable) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("helloworld.proto");
    std::fs::write(&path, GREETER_PROTO).expect("write proto fixture");
    let table = MethodTable::from_proto_file(&path).expect("parse greeter proto");
    (dir, table)
}

struct SleepyHandler;

#[async_trait]
impl MethodHandler for SleepyHandler {
    async fn handle(
        &self,
        _ctx: &CallContext,
        _request: &[u8],
    ) -> Result<Vec<u8>, HandlerError> {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        Ok(Vec::new())
    }
}

fn reply_with(table: &MethodTable, message: String) -> Result<DynamicMessage, HandlerError> {
    let desc = table
        .get("SayHello")
        .expect("SayHello present")
        .response
        .clone();
    let mut reply = DynamicMessage::new(desc);
    reply.set_field_by_name("message", Value::String(message));
    Ok(reply)
}

/// The standard handler set used by most tests.
pub fn greeter_dispatch(table: &MethodTable) -> DispatchTable {
    let mut dispatch = DispatchTable::new();

    let reply_table = table.clone();
    dispatch
        .register_unary(table.get("SayHello").unwrap(), move |_ctx, request| {
            let name = request
                .get_field_by_name("name")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            reply_with(&reply_table, format!("Hello, {name}"))
        })
        .unwrap();

    dispatch
        .register_unary(table.get("Boom").unwrap(), |_ctx, _request| {
            Err(HandlerError::new("boom goes the handler"))
        })
        .unwrap();

    dispatch
        .register(
            table.get("Sleepy").unwrap().full_path.clone(),
            Arc::new(SleepyHandler),
        )
        .unwrap();

    let echo_table = table.clone();
    dispatch
        .register_unary(table.get("Echo").unwrap(), move |ctx, _request| {
            let trace = ctx
                .metadata()
                .get("x-trace")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("(missing)")
                .to_string();
            reply_with(&echo_table, trace)
        })
        .unwrap();

    dispatch
        .register(
            table.get("Quiet").unwrap().full_path.clone(),
            handler_fn(|_ctx, _request| Ok(Vec::new())),
        )
        .unwrap();

    dispatch
}

/// Hooks that deliver the bound port to the test, once.
pub struct PortHook {
    tx: Mutex<Option<oneshot::Sender<u16>>>,
}

impl PortHook {
    pub fn new() -> (Arc<PortHook>, oneshot::Receiver<u16>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(PortHook {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }
}

impl ServerHooks for PortHook {
    fn on_bind(&self, port: u16) -> HookResult {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(port);
        }
        Ok(())
    }
}

/// Hooks that record every lifecycle boundary in order.
#[derive(Default)]
pub struct RecordingHooks {
    pub events: Mutex<Vec<String>>,
    pub port: Mutex<Option<u16>>,
}

impl RecordingHooks {
    fn record(&self, event: &str) -> HookResult {
        self.events.lock().unwrap().push(event.to_string());
        Ok(())
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ServerHooks for RecordingHooks {
    fn on_server_create(&self) -> HookResult {
        self.record("server_create")
    }
    fn on_queue_create(&self) -> HookResult {
        self.record("queue_create")
    }
    fn on_bind(&self, port: u16) -> HookResult {
        *self.port.lock().unwrap() = Some(port);
        self.record("bind")
    }
    fn on_server_start(&self) -> HookResult {
        self.record("server_start")
    }
    fn on_run(&self) -> HookResult {
        self.record("run")
    }
    fn on_shutdown(&self) -> HookResult {
        self.record("shutdown")
    }
    fn on_stopped(&self) -> HookResult {
        self.record("stopped")
    }
    fn on_exit(&self) -> HookResult {
        self.record("exit")
    }
}

/// Spawn a greeter server on an ephemeral port and wait for the bind
/// hook to surface the port.
pub async fn start_greeter_server(table: &MethodTable) -> (ServerHandle, u16) {
    let dispatch = greeter_dispatch(table);
    let (hooks, port_rx) = PortHook::new();
    let server = GrpcServer::new(
        dispatch,
        ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            run_for: None,
        },
    )
    .with_hooks(hooks);

    let handle = server.spawn();
    let port = port_rx.await.expect("bind hook delivers the port");
    (handle, port)
}
