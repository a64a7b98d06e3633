use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use hyper::server::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tonic::server::UnaryService;
use tonic::Status;

use crate::codec::RawCodec;
use crate::dispatch::DispatchTable;
use crate::error::{BridgeError, Result};
use crate::handler::{CallContext, MethodHandler};
use crate::hooks::{HookResult, NoopHooks, ServerHooks};

/// How long shutdown waits for an in-flight call before cancelling
/// whatever remains.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port` to listen on; port 0 asks the OS for an ephemeral
    /// port, surfaced through the `bind` hook.
    pub bind_address: String,

    /// Wall-clock lifetime of the run; `None` (or zero) means run
    /// until interrupted.
    pub run_for: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: "127.0.0.1:50051".to_string(),
            run_for: None,
        }
    }
}

/// Per-run call counters.
///
/// `cancelled` counts calls whose context was torn down before a
/// status was written back, which is how a client abandoning its call
/// (deadline, reset) shows up on the server side.
#[derive(Debug, Default)]
pub struct ServerStats {
    started: AtomicU64,
    completed: AtomicU64,
    handler_errors: AtomicU64,
    cancelled: AtomicU64,
}

impl ServerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub started: u64,
    pub completed: u64,
    pub handler_errors: u64,
    pub cancelled: u64,
}

struct ServerShared {
    dispatch: DispatchTable,
    // Serializes handler execution: one call in flight at a time.
    call_lock: tokio::sync::Mutex<()>,
    stats: Arc<ServerStats>,
}

/// A single-listener gRPC server dispatching unary calls to host
/// handlers.
///
/// The dispatch table is frozen at construction. `run()` drives the
/// whole lifecycle and fires [`ServerHooks`] at each boundary; the
/// cooperative interrupt token ends the run from outside, and
/// `run_for` bounds it in wall-clock time.
pub struct GrpcServer {
    shared: Arc<ServerShared>,
    config: ServerConfig,
    hooks: Arc<dyn ServerHooks>,
    interrupt: CancellationToken,
}

impl GrpcServer {
    pub fn new(dispatch: DispatchTable, config: ServerConfig) -> GrpcServer {
        GrpcServer {
            shared: Arc::new(ServerShared {
                dispatch,
                call_lock: tokio::sync::Mutex::new(()),
                stats: Arc::new(ServerStats::default()),
            }),
            config,
            hooks: Arc::new(NoopHooks),
            interrupt: CancellationToken::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ServerHooks>) -> GrpcServer {
        self.hooks = hooks;
        self
    }

    /// Token for the cooperative interrupt; cancelling it makes the
    /// loop exit at its next iteration.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.shared.stats.clone()
    }

    /// Run the server until interrupted or until `run_for` elapses.
    ///
    /// Hooks fire in lifecycle order; `on_exit` fires on every path
    /// out of this function, error paths included.
    pub async fn run(self) -> Result<()> {
        let hooks = self.hooks.clone();
        let result = self.run_inner().await;
        fire(hooks.as_ref(), "exit", |h| h.on_exit());
        result
    }

    /// Spawn the server onto the current runtime and return a handle
    /// for interrupting and joining it. The chosen port still travels
    /// through the `bind` hook.
    pub fn spawn(self) -> ServerHandle {
        let token = self.interrupt.clone();
        let stats = self.shared.stats.clone();
        let join = tokio::spawn(self.run());
        ServerHandle { token, stats, join }
    }

    async fn run_inner(self) -> Result<()> {
        let GrpcServer {
            shared,
            config,
            hooks,
            interrupt,
        } = self;

        fire(hooks.as_ref(), "server_create", |h| h.on_server_create());

        let mut connections: JoinSet<()> = JoinSet::new();
        fire(hooks.as_ref(), "queue_create", |h| h.on_queue_create());

        let listener = TcpListener::bind(&config.bind_address).await.map_err(|source| {
            BridgeError::Bind {
                address: config.bind_address.clone(),
                source,
            }
        })?;
        let local_addr = listener.local_addr().map_err(|source| BridgeError::Bind {
            address: config.bind_address.clone(),
            source,
        })?;
        fire(hooks.as_ref(), "bind", |h| h.on_bind(local_addr.port()));
        tracing::info!(address = %local_addr, methods = shared.dispatch.len(), "server bound");

        fire(hooks.as_ref(), "server_start", |h| h.on_server_start());

        let run_deadline = config
            .run_for
            .filter(|d| !d.is_zero())
            .map(|d| tokio::time::Instant::now() + d);

        fire(hooks.as_ref(), "run", |h| h.on_run());

        let mut accept_failures = 0u32;
        let outcome: Result<()> = loop {
            tokio::select! {
                _ = interrupt.cancelled() => {
                    tracing::info!("interrupt received, shutting down");
                    break Ok(());
                }
                _ = sleep_until_opt(run_deadline), if run_deadline.is_some() => {
                    tracing::info!("run duration elapsed, shutting down");
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        accept_failures = 0;
                        let service = TowerToHyperService::new(DispatchService {
                            shared: shared.clone(),
                            peer: Some(peer),
                        });
                        connections.spawn(async move {
                            let connection = http2::Builder::new(TokioExecutor::new())
                                .serve_connection(TokioIo::new(stream), service);
                            if let Err(error) = connection.await {
                                tracing::debug!(%peer, %error, "connection ended with error");
                            }
                        });
                    }
                    Err(error) => {
                        accept_failures += 1;
                        tracing::warn!(%error, "accept failed");
                        if accept_failures >= 2 {
                            break Err(BridgeError::Transport(format!(
                                "accept failed repeatedly: {error}"
                            )));
                        }
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        fire(hooks.as_ref(), "shutdown", |h| h.on_shutdown());
        drop(listener);

        // Let the in-flight call finish, then cancel whatever remains.
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, shared.call_lock.lock()).await;
        connections.shutdown().await;

        fire(hooks.as_ref(), "stopped", |h| h.on_stopped());
        outcome
    }
}

/// A handle to a spawned server.
pub struct ServerHandle {
    token: CancellationToken,
    stats: Arc<ServerStats>,
    join: tokio::task::JoinHandle<Result<()>>,
}

impl ServerHandle {
    /// Request a cooperative shutdown.
    pub fn interrupt(&self) {
        self.token.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Wait for the server to exit and return its outcome.
    pub async fn join(self) -> Result<()> {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(error) => Err(BridgeError::Transport(format!(
                "server task failed: {error}"
            ))),
        }
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

fn fire(hooks: &dyn ServerHooks, name: &str, invoke: impl FnOnce(&dyn ServerHooks) -> HookResult) {
    if let Err(error) = invoke(hooks) {
        tracing::warn!(hook = name, %error, "lifecycle hook failed");
    }
}

/// Tower service routing one HTTP/2 request to the dispatch table.
///
/// Everything, known method or not, goes through the gRPC unary path
/// so that statuses (including UNIMPLEMENTED) reach the client with
/// proper framing and trailers.
#[derive(Clone)]
struct DispatchService {
    shared: Arc<ServerShared>,
    peer: Option<SocketAddr>,
}

impl tower::Service<http::Request<hyper::body::Incoming>> for DispatchService {
    type Response = http::Response<tonic::body::Body>;
    type Error = std::convert::Infallible;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<hyper::body::Incoming>) -> Self::Future {
        let shared = self.shared.clone();
        let peer = self.peer;
        Box::pin(async move {
            let path = request.uri().path().to_string();
            let handler = shared.dispatch.resolve(&path);
            let mut grpc = tonic::server::Grpc::new(RawCodec);
            let call = CallService {
                shared,
                handler,
                path,
                peer,
            };
            Ok(grpc.unary(call, request).await)
        })
    }
}

/// One unary exchange: resolve, serialize, invoke, respond.
struct CallService {
    shared: Arc<ServerShared>,
    handler: Option<Arc<dyn MethodHandler>>,
    path: String,
    peer: Option<SocketAddr>,
}

impl UnaryService<Bytes> for CallService {
    type Response = Bytes;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<tonic::Response<Bytes>, Status>> + Send>>;

    fn call(&mut self, request: tonic::Request<Bytes>) -> Self::Future {
        let shared = self.shared.clone();
        let handler = self.handler.take();
        let path = std::mem::take(&mut self.path);
        let peer = self.peer;
        Box::pin(async move {
            let Some(handler) = handler else {
                tracing::debug!(path = %path, "no handler registered");
                return Err(Status::unimplemented(format!(
                    "Method not implemented or not found: {path}"
                )));
            };

            // One call in flight at a time; the guard below records a
            // cancellation if this future is dropped before a status
            // is produced.
            let _serialized = shared.call_lock.lock().await;
            shared.stats.started.fetch_add(1, Ordering::Relaxed);
            let guard = CallGuard {
                stats: shared.stats.clone(),
                finished: false,
            };

            let (metadata, _extensions, payload) = request.into_parts();
            let ctx = CallContext::new(path, metadata, peer);
            tracing::debug!(method = %ctx.method(), bytes = payload.len(), "dispatching call");

            match handler.handle(&ctx, &payload).await {
                Ok(response) => {
                    guard.finish();
                    Ok(tonic::Response::new(Bytes::from(response)))
                }
                Err(error) => {
                    shared.stats.handler_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(method = %ctx.method(), %error, "handler failed");
                    guard.finish();
                    Err(Status::internal(error.message().to_string()))
                }
            }
        })
    }
}

/// Ties off a call's server-side state: dropping it without `finish`
/// means the exchange was abandoned (client cancelled or the stream
/// was reset) and counts as a cancellation.
struct CallGuard {
    stats: Arc<ServerStats>,
    finished: bool,
}

impl CallGuard {
    fn finish(mut self) {
        self.finished = true;
        self.stats.completed.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("call abandoned before a status was written");
        }
    }
}
