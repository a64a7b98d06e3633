use std::fmt;

/// All error types produced by the grpcbridge library.
///
/// Variants group into the failure kinds callers care about:
/// configuration problems (bad proto input, bad method bindings),
/// transport problems (connect, bind, call start), protocol failures
/// (a non-OK status from the peer), and deadline expiry.
#[derive(Debug)]
pub enum BridgeError {
    /// The `.proto` file could not be read.
    FileNotFound {
        path: String,
        source: std::io::Error,
    },

    /// The protobuf compiler rejected the `.proto` file.
    Compile(String),

    /// Malformed `service`/`rpc` syntax in a `.proto` file.
    Parse {
        reason: String,
        rpc_name: Option<String>,
    },

    /// A message type referenced by an rpc could not be resolved
    /// after compilation.
    DescriptorMissing { fq_name: String },

    /// A request message's descriptor does not match the method's
    /// request descriptor.
    WrongRequestType { expected: String, actual: String },

    /// Invalid configuration at setup time (bad address, odd metadata
    /// list, duplicate dispatch registration, streaming method bound
    /// to a unary seam, and so on).
    Config(String),

    /// The channel to the target could not be established.
    Connect { target: String, message: String },

    /// The gRPC runtime rejected the call before anything was sent.
    CallStart(String),

    /// The server could not bind its listen address.
    Bind {
        address: String,
        source: std::io::Error,
    },

    /// A transport-level failure outside an RPC exchange.
    Transport(String),

    /// The peer answered with a non-OK gRPC status.
    Rpc(tonic::Status),

    /// The per-call deadline elapsed before the exchange completed.
    /// The in-flight call is cancelled on the wire.
    DeadlineExceeded { after: std::time::Duration },

    /// A protobuf encoding/decoding error.
    Proto(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::FileNotFound { path, source } => {
                write!(f, "cannot read proto file '{path}': {source}")
            }
            BridgeError::Compile(msg) => write!(f, "proto compilation failed: {msg}"),
            BridgeError::Parse { reason, rpc_name } => match rpc_name {
                Some(rpc) => write!(f, "malformed service definition (rpc {rpc}): {reason}"),
                None => write!(f, "malformed service definition: {reason}"),
            },
            BridgeError::DescriptorMissing { fq_name } => {
                write!(f, "message type not found after compilation: {fq_name}")
            }
            BridgeError::WrongRequestType { expected, actual } => {
                write!(f, "wrong request type: expected {expected}, got {actual}")
            }
            BridgeError::Config(msg) => write!(f, "invalid configuration: {msg}"),
            BridgeError::Connect { target, message } => {
                write!(f, "failed to connect to {target}: {message}")
            }
            BridgeError::CallStart(msg) => write!(f, "call could not be started: {msg}"),
            BridgeError::Bind { address, source } => {
                write!(f, "failed to bind {address}: {source}")
            }
            BridgeError::Transport(msg) => write!(f, "transport error: {msg}"),
            BridgeError::Rpc(status) => {
                write!(f, "gRPC error: {} - {}", status.code(), status.message())
            }
            BridgeError::DeadlineExceeded { after } => {
                write!(f, "call deadline of {after:?} exceeded")
            }
            BridgeError::Proto(msg) => write!(f, "proto error: {msg}"),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::FileNotFound { source, .. } => Some(source),
            BridgeError::Bind { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<tonic::Status> for BridgeError {
    fn from(status: tonic::Status) -> Self {
        BridgeError::Rpc(status)
    }
}

impl BridgeError {
    /// The gRPC status carried by this error, if it is a protocol failure.
    pub fn status(&self) -> Option<&tonic::Status> {
        match self {
            BridgeError::Rpc(status) => Some(status),
            _ => None,
        }
    }

    /// Whether this error was detected before any bytes went on the wire.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BridgeError::FileNotFound { .. }
                | BridgeError::Compile(_)
                | BridgeError::Parse { .. }
                | BridgeError::DescriptorMissing { .. }
                | BridgeError::WrongRequestType { .. }
                | BridgeError::Config(_)
        )
    }
}

/// Convenience type alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BridgeError>;
