use std::path::Path;

use prost_reflect::{DescriptorPool, MessageDescriptor};

use crate::error::{BridgeError, Result};

/// Compile a `.proto` file into a descriptor pool.
///
/// This is the first of the parser's two passes: the protobuf compiler
/// resolves every message type in the file (and its imports) so the
/// service-parse pass can look descriptors up by fully-qualified name.
///
/// The file's parent directory and the current directory serve as
/// import paths.
pub fn compile_proto_file(path: impl AsRef<Path>) -> Result<DescriptorPool> {
    let path = path.as_ref();

    let mut includes: Vec<String> = Vec::new();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            includes.push(parent.display().to_string());
        }
    }
    includes.push(".".to_string());

    let fds = protox::compile([path], &includes)
        .map_err(|e| BridgeError::Compile(e.to_string()))?;

    DescriptorPool::from_file_descriptor_set(fds)
        .map_err(|e| BridgeError::Compile(format!("failed to build descriptor pool: {e}")))
}

/// Resolve a message descriptor referenced from an rpc clause.
///
/// Lookup order: the package-qualified name first, then the type name
/// exactly as written. The fallback tolerates both rpc clauses that
/// already spell a dotted name and pools where a type was registered
/// without package qualification.
pub fn resolve_message(
    pool: &DescriptorPool,
    package: &str,
    type_name: &str,
) -> Result<MessageDescriptor> {
    let fq_name = if package.is_empty() {
        type_name.to_string()
    } else {
        format!("{package}.{type_name}")
    };

    if let Some(desc) = pool.get_message_by_name(&fq_name) {
        return Ok(desc);
    }
    if !package.is_empty() {
        if let Some(desc) = pool.get_message_by_name(type_name) {
            return Ok(desc);
        }
    }

    Err(BridgeError::DescriptorMissing { fq_name })
}
