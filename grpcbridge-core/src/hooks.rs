/// Outcome of a lifecycle hook. A failing hook is logged at warn level
/// and never aborts the server loop.
pub type HookResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Host callbacks invoked at the server's lifecycle boundaries, in
/// this order:
///
/// `server_create < queue_create < bind < server_start < run <
/// shutdown < stopped < exit`
///
/// `on_bind` carries the chosen listen port and is the contractual
/// channel for discovering an ephemeral port; it always completes
/// before the server can accept a call. `on_exit` fires on scope exit
/// unconditionally, error paths included.
///
/// Every method defaults to a no-op, so implementors override only the
/// boundaries they care about.
pub trait ServerHooks: Send + Sync {
    /// After the server object is assembled.
    fn on_server_create(&self) -> HookResult {
        Ok(())
    }

    /// After the event machinery (connection set, interrupt plumbing)
    /// is created.
    fn on_queue_create(&self) -> HookResult {
        Ok(())
    }

    /// After the listen socket is bound, before serving starts.
    fn on_bind(&self, _port: u16) -> HookResult {
        Ok(())
    }

    /// After the acceptor is armed.
    fn on_server_start(&self) -> HookResult {
        Ok(())
    }

    /// Immediately before entering the accept loop.
    fn on_run(&self) -> HookResult {
        Ok(())
    }

    /// As soon as an exit condition is detected.
    fn on_shutdown(&self) -> HookResult {
        Ok(())
    }

    /// After all connections are torn down.
    fn on_stopped(&self) -> HookResult {
        Ok(())
    }

    /// Unconditionally on scope exit.
    fn on_exit(&self) -> HookResult {
        Ok(())
    }
}

/// The default hook set: every boundary is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl ServerHooks for NoopHooks {}
