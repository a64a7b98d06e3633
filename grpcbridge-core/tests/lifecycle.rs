// Server lifecycle: hook ordering, ephemeral ports, wall-clock
// lifetimes, and cancellation visibility.

mod common;

use std::sync::Arc;
use std::time::Duration;

use grpcbridge_core::{
    BridgeError, CallOptions, ClientChannel, GrpcServer, MetadataMap, ServerConfig, StubSet,
};

#[tokio::test(flavor = "multi_thread")]
async fn hooks_fire_in_lifecycle_order() {
    let (_dir, table) = common::greeter_table();
    let dispatch = common::greeter_dispatch(&table);
    let hooks = Arc::new(common::RecordingHooks::default());

    let server = GrpcServer::new(
        dispatch,
        ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            run_for: Some(Duration::from_millis(300)),
        },
    )
    .with_hooks(hooks.clone());

    server.run().await.unwrap();

    assert_eq!(
        hooks.event_names(),
        vec![
            "server_create",
            "queue_create",
            "bind",
            "server_start",
            "run",
            "shutdown",
            "stopped",
            "exit",
        ]
    );

    let port = hooks.port.lock().unwrap().expect("bind hook saw a port");
    assert!(port > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn exit_hook_fires_on_bind_failure() {
    let (_dir, table) = common::greeter_table();
    let dispatch = common::greeter_dispatch(&table);
    let hooks = Arc::new(common::RecordingHooks::default());

    // TEST-NET-3 is never a local interface, so bind fails; run()
    // must error and still fire on_exit.
    let server = GrpcServer::new(
        dispatch,
        ServerConfig {
            bind_address: "203.0.113.7:1".to_string(),
            run_for: None,
        },
    )
    .with_hooks(hooks.clone());

    let err = server.run().await.unwrap_err();
    assert!(matches!(err, BridgeError::Bind { .. }));

    let events = hooks.event_names();
    assert_eq!(events.last().map(String::as_str), Some("exit"));
    assert!(!events.contains(&"bind".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn ephemeral_port_reaches_a_second_client() {
    let (_dir, table) = common::greeter_table();
    let (handle, port) = common::start_greeter_server(&table).await;
    assert!(port > 0);

    // Two independently constructed clients against the hook-surfaced
    // port.
    for _ in 0..2 {
        let channel = Arc::new(ClientChannel::new(format!("localhost:{port}")));
        let stubs = StubSet::new(&table, channel);
        let stub = stubs.get("SayHello").unwrap();
        let reply = stub
            .call(stub.build(r#"{"name": "World"}"#).unwrap(), MetadataMap::new())
            .await
            .unwrap();
        assert_eq!(
            reply
                .get_field_by_name("message")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            "Hello, World"
        );
    }

    handle.interrupt();
    handle.join().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn run_for_bounds_an_idle_server() {
    let (_dir, table) = common::greeter_table();
    let dispatch = common::greeter_dispatch(&table);

    let server = GrpcServer::new(
        dispatch,
        ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            run_for: Some(Duration::from_millis(200)),
        },
    );

    let started = std::time::Instant::now();
    server.run().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn cooperative_interrupt_stops_the_loop() {
    let (_dir, table) = common::greeter_table();
    let dispatch = common::greeter_dispatch(&table);
    let server = GrpcServer::new(
        dispatch,
        ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            run_for: None,
        },
    );

    let token = server.shutdown_token();
    let run = tokio::spawn(server.run());
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn client_deadline_cancels_and_server_observes_it() {
    let (_dir, table) = common::greeter_table();
    let (handle, port) = common::start_greeter_server(&table).await;

    let channel = Arc::new(ClientChannel::new(format!("127.0.0.1:{port}")));
    let stubs = StubSet::new(&table, channel);

    // The handler sleeps a full second; the call gives up after 200 ms.
    let sleepy = stubs.get("Sleepy").unwrap();
    let started = std::time::Instant::now();
    let err = sleepy
        .call_with(
            sleepy.build("{}").unwrap(),
            CallOptions::default().deadline(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::DeadlineExceeded { .. }));
    assert!(started.elapsed() < Duration::from_secs(1));

    // The abandoned call surfaces as a cancellation server-side once
    // the stream reset lands.
    let mut observed = false;
    for _ in 0..40 {
        if handle.stats().snapshot().cancelled >= 1 {
            observed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(observed, "server never recorded the cancellation");

    // And the next call is unaffected.
    let hello = stubs.get("SayHello").unwrap();
    let reply = hello
        .call(hello.build(r#"{"name": "after"}"#).unwrap(), MetadataMap::new())
        .await
        .unwrap();
    assert_eq!(
        reply
            .get_field_by_name("message")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default(),
        "Hello, after"
    );

    handle.interrupt();
    handle.join().await.unwrap();
}
