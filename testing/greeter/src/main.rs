use std::sync::Arc;

use clap::Parser;
use tracing::info;

use grpcbridge_core::{
    message_to_json, ClientChannel, DispatchTable, DynamicMessage, GrpcServer, MetadataMap,
    MethodTable, ServerConfig, ServerHooks, StubSet, Value,
};

const GREETER_PROTO: &str = r#"
syntax = "proto3";

package helloworld;

message HelloRequest {
  string name = 1;
}

message HelloReply {
  string message = 1;
}

service Greeter {
  rpc SayHello (HelloRequest) returns (HelloReply);
}
"#;

#[derive(Parser, Debug)]
#[command(
    name = "greeter",
    about = "Demo: parse a proto, serve it, and call it over loopback"
)]
struct Cli {
    /// Port to listen on (0 for ephemeral)
    #[arg(short = 'p', long = "port", default_value_t = 0)]
    port: u16,

    /// Name to greet
    #[arg(short = 'n', long = "name", default_value = "World")]
    name: String,

    /// Path to a .proto file (defaults to a built-in greeter)
    #[arg(long = "proto")]
    proto: Option<std::path::PathBuf>,

    /// Keep serving after the demo call until Ctrl-C
    #[arg(long = "serve")]
    serve: bool,
}

/// Logs lifecycle boundaries and delivers the bound port, once.
struct DemoHooks(std::sync::Mutex<Option<tokio::sync::oneshot::Sender<u16>>>);

impl ServerHooks for DemoHooks {
    fn on_bind(&self, port: u16) -> grpcbridge_core::HookResult {
        info!(port, "server bound");
        if let Some(tx) = self.0.lock().unwrap().take() {
            let _ = tx.send(port);
        }
        Ok(())
    }

    fn on_shutdown(&self) -> grpcbridge_core::HookResult {
        info!("server shutting down");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    // Materialize the built-in proto when none was given.
    let tmp = tempfile::tempdir()?;
    let proto_path = match &cli.proto {
        Some(path) => path.clone(),
        None => {
            let path = tmp.path().join("helloworld.proto");
            std::fs::write(&path, GREETER_PROTO)?;
            path
        }
    };

    let table = MethodTable::from_proto_file(&proto_path)?;
    info!(methods = table.len(), proto = %proto_path.display(), "parsed method table");
    for record in table.iter() {
        info!(
            name = %record.simple_name,
            path = %record.full_path,
            request = record.request.full_name(),
            response = record.response.full_name(),
            "method"
        );
    }

    let hello = table
        .get("SayHello")
        .ok_or("proto must define a SayHello rpc")?;

    let mut dispatch = DispatchTable::new();
    let reply_desc = hello.response.clone();
    dispatch.register_unary(hello, move |ctx, request| {
        let name = request
            .get_field_by_name("name")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        info!(method = ctx.method(), name = %name, "handling call");
        let mut reply = DynamicMessage::new(reply_desc.clone());
        reply.set_field_by_name("message", Value::String(format!("Hello, {name}")));
        Ok(reply)
    })?;

    // The bind hook is how the ephemeral port reaches us.
    let (port_tx, port_rx) = tokio::sync::oneshot::channel();
    let server = GrpcServer::new(
        dispatch,
        ServerConfig {
            bind_address: format!("127.0.0.1:{}", cli.port),
            run_for: None,
        },
    )
    .with_hooks(Arc::new(DemoHooks(std::sync::Mutex::new(Some(port_tx)))));

    let handle = server.spawn();
    let port = port_rx.await?;
    info!(port, "serving");

    let channel = Arc::new(ClientChannel::new(format!("127.0.0.1:{port}")));
    let stubs = StubSet::new(&table, channel);
    let stub = stubs.get("SayHello").unwrap();

    let request = stub.build(&format!(r#"{{"name": "{}"}}"#, cli.name))?;
    let reply = stub.call(request, MetadataMap::new()).await?;
    println!("{}", message_to_json(&reply)?);

    if cli.serve {
        info!("press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
    }

    handle.interrupt();
    handle.join().await?;
    Ok(())
}
