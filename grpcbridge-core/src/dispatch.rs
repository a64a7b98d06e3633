use std::collections::HashMap;
use std::sync::Arc;

use prost_reflect::DynamicMessage;

use crate::codec::{ProtoCodec, ReflectCodec};
use crate::error::{BridgeError, Result};
use crate::handler::{CallContext, HandlerError, MessageHandler, MethodHandler};
use crate::parser::{MethodRecord, MethodTable};

/// The server's routing table: full method path to handler.
///
/// Built before the server starts and frozen once handed to it; the
/// wire-level method string resolves in O(1). Handlers are shared, not
/// owned, and must outlive the server's run.
#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl DispatchTable {
    pub fn new() -> DispatchTable {
        DispatchTable::default()
    }

    /// Register a handler under a full method path
    /// (`/pkg.Service/Method`). Registering the same path twice is a
    /// configuration error.
    pub fn register(
        &mut self,
        full_path: impl Into<String>,
        handler: Arc<dyn MethodHandler>,
    ) -> Result<()> {
        let full_path = full_path.into();
        if !full_path.starts_with('/') {
            return Err(BridgeError::Config(format!(
                "method path must start with '/': '{full_path}'"
            )));
        }
        if self.handlers.contains_key(&full_path) {
            return Err(BridgeError::Config(format!(
                "handler already registered for '{full_path}'"
            )));
        }
        self.handlers.insert(full_path, handler);
        Ok(())
    }

    /// Register a message-level handler for a unary method from the
    /// table, wrapping it with the default codec.
    pub fn register_unary<F>(&mut self, record: &MethodRecord, f: F) -> Result<()>
    where
        F: Fn(&CallContext, DynamicMessage) -> std::result::Result<DynamicMessage, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.register_unary_with(record, Arc::new(ReflectCodec), f)
    }

    pub fn register_unary_with<F>(
        &mut self,
        record: &MethodRecord,
        codec: Arc<dyn ProtoCodec>,
        f: F,
    ) -> Result<()>
    where
        F: Fn(&CallContext, DynamicMessage) -> std::result::Result<DynamicMessage, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        if !record.is_unary() {
            return Err(BridgeError::Config(format!(
                "method '{}' is streaming; only unary dispatch is supported",
                record.simple_name
            )));
        }
        self.register(
            record.full_path.clone(),
            Arc::new(MessageHandler::new(record, codec, f)),
        )
    }

    /// Bind one handler per method in the table by simple name.
    /// Methods without a binding are left unregistered and resolve to
    /// UNIMPLEMENTED at call time.
    pub fn bind_table(
        &mut self,
        table: &MethodTable,
        mut bindings: HashMap<String, Arc<dyn MethodHandler>>,
    ) -> Result<()> {
        for record in table.iter() {
            if let Some(handler) = bindings.remove(&record.simple_name) {
                self.register(record.full_path.clone(), handler)?;
            }
        }
        if let Some(orphan) = bindings.keys().next() {
            return Err(BridgeError::Config(format!(
                "no method named '{orphan}' in the table"
            )));
        }
        Ok(())
    }

    /// Resolve the handler for a wire-level method path.
    pub fn resolve(&self, full_path: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.get(full_path).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    #[test]
    fn register_and_resolve() {
        let mut table = DispatchTable::new();
        table
            .register("/s.Svc/Go", handler_fn(|_ctx, req| Ok(req.to_vec())))
            .unwrap();
        assert!(table.resolve("/s.Svc/Go").is_some());
        assert!(table.resolve("/s.Svc/Stop").is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn duplicate_registration_is_configuration_error() {
        let mut table = DispatchTable::new();
        table
            .register("/s.Svc/Go", handler_fn(|_ctx, req| Ok(req.to_vec())))
            .unwrap();
        let err = table
            .register("/s.Svc/Go", handler_fn(|_ctx, _req| Ok(vec![])))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn path_must_be_slash_led() {
        let mut table = DispatchTable::new();
        let err = table
            .register("s.Svc/Go", handler_fn(|_ctx, req| Ok(req.to_vec())))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn bind_table_rejects_unknown_names() {
        let table = {
            let fds = prost_types::FileDescriptorSet {
                file: vec![prost_types::FileDescriptorProto {
                    name: Some("test.proto".into()),
                    package: Some("s".into()),
                    message_type: vec![
                        prost_types::DescriptorProto {
                            name: Some("A".into()),
                            ..Default::default()
                        },
                        prost_types::DescriptorProto {
                            name: Some("B".into()),
                            ..Default::default()
                        },
                    ],
                    syntax: Some("proto3".into()),
                    ..Default::default()
                }],
            };
            let pool = prost_reflect::DescriptorPool::from_file_descriptor_set(fds).unwrap();
            MethodTable::parse("package s; service Svc { rpc Go (A) returns (B); }", pool)
                .unwrap()
        };

        let mut dispatch = DispatchTable::new();
        let mut bindings: HashMap<String, Arc<dyn MethodHandler>> = HashMap::new();
        bindings.insert("Nope".into(), handler_fn(|_ctx, req| Ok(req.to_vec())));
        let err = dispatch.bind_table(&table, bindings).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }
}
