use std::collections::BTreeMap;
use std::path::Path;

use prost_reflect::{DescriptorPool, MessageDescriptor};

use crate::descriptor;
use crate::error::{BridgeError, Result};

/// One unary RPC parsed out of a `service` block.
///
/// `full_path` is the wire-level method string
/// (`/<pkg>.<service>/<name>`, or `/<service>/<name>` for an empty
/// package) and is unique within a [`MethodTable`]. The streaming
/// flags are surfaced as parsed; dispatch and stubs only accept
/// methods where both are false.
#[derive(Debug, Clone)]
pub struct MethodRecord {
    pub simple_name: String,
    pub full_path: String,
    pub request: MessageDescriptor,
    pub response: MessageDescriptor,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

impl MethodRecord {
    /// Whether this method can be bound to the unary client/server seams.
    pub fn is_unary(&self) -> bool {
        !self.client_streaming && !self.server_streaming
    }
}

/// The method table built from a `.proto` file: every rpc of every
/// service block, keyed by simple rpc name (what host code invokes).
///
/// Immutable after construction. The descriptor pool that resolved the
/// request/response types travels with the table so callers can build
/// message values from it.
#[derive(Debug, Clone)]
pub struct MethodTable {
    methods: BTreeMap<String, MethodRecord>,
    pool: DescriptorPool,
}

impl MethodTable {
    /// Parse a `.proto` file into a method table.
    ///
    /// Two passes: the protobuf compiler first resolves all message
    /// types, then a small recursive-descent scan over the file text
    /// extracts `package`, `service`, and `rpc` declarations.
    pub fn from_proto_file(path: impl AsRef<Path>) -> Result<MethodTable> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| BridgeError::FileNotFound {
            path: path.display().to_string(),
            source,
        })?;
        let pool = descriptor::compile_proto_file(path)?;
        Self::parse(&text, pool)
    }

    /// Parse proto source text against an already-built descriptor pool.
    pub fn parse(text: &str, pool: DescriptorPool) -> Result<MethodTable> {
        let tokens = tokenize(text);
        let mut cursor = Cursor {
            tokens: &tokens,
            pos: 0,
        };

        let mut methods: BTreeMap<String, MethodRecord> = BTreeMap::new();
        let mut package = String::new();
        let mut depth: usize = 0;

        while let Some(token) = cursor.next() {
            match token {
                "package" if depth == 0 => {
                    let name = cursor.ident("expected package name")?.to_string();
                    cursor.expect(";", "after package name")?;
                    // Forward scan: services already parsed keep the
                    // package that was in effect when they appeared.
                    package = name;
                }
                "service" if depth == 0 => {
                    parse_service(&mut cursor, &package, &pool, &mut methods)?;
                }
                "{" => depth += 1,
                "}" => depth = depth.saturating_sub(1),
                _ => {}
            }
        }

        Ok(MethodTable { methods, pool })
    }

    /// Look up a method by simple rpc name.
    pub fn get(&self, simple_name: &str) -> Option<&MethodRecord> {
        self.methods.get(simple_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MethodRecord> {
        self.methods.values()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// The descriptor pool the table's message types live in.
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }
}

/// Split proto source into whitespace-separated tokens, with
/// `{ } ( ) ;` as standalone tokens and `//` line comments dropped.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for line in text.lines() {
        let line = match line.find("//") {
            Some(idx) => &line[..idx],
            None => line,
        };
        let mut current = String::new();
        for ch in line.chars() {
            match ch {
                '{' | '}' | '(' | ')' | ';' => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                    tokens.push(ch.to_string());
                }
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
    }
    tokens
}

struct Cursor<'a> {
    tokens: &'a [String],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next(&mut self) -> Option<&'a str> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token.as_str())
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    /// Consume the next token, requiring it to equal `expected`.
    fn expect(&mut self, expected: &str, context: &str) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(parse_error(
                format!("expected '{expected}' {context}, found '{token}'"),
                None,
            )),
            None => Err(parse_error(
                format!("expected '{expected}' {context}, found end of file"),
                None,
            )),
        }
    }

    /// Consume the next token, requiring it to be a name rather than a
    /// delimiter.
    fn ident(&mut self, context: &str) -> Result<&'a str> {
        match self.next() {
            Some(token) if !is_delimiter(token) => Ok(token),
            Some(token) => Err(parse_error(format!("{context}, found '{token}'"), None)),
            None => Err(parse_error(format!("{context}, found end of file"), None)),
        }
    }

    /// Skip a brace-balanced block. The opening `{` must already be
    /// consumed.
    fn skip_block(&mut self, context: &str) -> Result<()> {
        let mut depth: usize = 1;
        while depth > 0 {
            match self.next() {
                Some("{") => depth += 1,
                Some("}") => depth -= 1,
                Some(_) => {}
                None => {
                    return Err(parse_error(
                        format!("unterminated block {context}"),
                        None,
                    ))
                }
            }
        }
        Ok(())
    }

    /// Skip tokens up to and including the next `;`.
    fn skip_statement(&mut self, context: &str) -> Result<()> {
        loop {
            match self.next() {
                Some(";") => return Ok(()),
                Some(_) => {}
                None => {
                    return Err(parse_error(
                        format!("unterminated statement {context}"),
                        None,
                    ))
                }
            }
        }
    }
}

fn is_delimiter(token: &str) -> bool {
    matches!(token, "{" | "}" | "(" | ")" | ";")
}

fn parse_error(reason: String, rpc_name: Option<&str>) -> BridgeError {
    BridgeError::Parse {
        reason,
        rpc_name: rpc_name.map(str::to_string),
    }
}

/// Attach the rpc name to a parse error raised while inside its clause.
fn with_rpc(err: BridgeError, rpc_name: &str) -> BridgeError {
    match err {
        BridgeError::Parse { reason, .. } => BridgeError::Parse {
            reason,
            rpc_name: Some(rpc_name.to_string()),
        },
        other => other,
    }
}

fn parse_service(
    cursor: &mut Cursor<'_>,
    package: &str,
    pool: &DescriptorPool,
    methods: &mut BTreeMap<String, MethodRecord>,
) -> Result<()> {
    let service_name = cursor.ident("expected service name")?.to_string();
    cursor.expect("{", "after service name")?;

    loop {
        match cursor.next() {
            Some("}") => return Ok(()),
            Some("rpc") => {
                let record = parse_rpc(cursor, package, &service_name, pool)?;
                if methods.contains_key(&record.simple_name) {
                    return Err(parse_error(
                        format!(
                            "duplicate rpc name '{}' (simple names must be unique across services)",
                            record.simple_name
                        ),
                        Some(&record.simple_name),
                    ));
                }
                methods.insert(record.simple_name.clone(), record);
            }
            Some("option") => {
                cursor.skip_statement(&format!("in service {service_name} option"))?;
            }
            Some("{") => {
                cursor.skip_block(&format!("in service {service_name}"))?;
            }
            Some(_) => {}
            None => {
                return Err(parse_error(
                    format!("unterminated service block '{service_name}'"),
                    None,
                ))
            }
        }
    }
}

fn parse_rpc(
    cursor: &mut Cursor<'_>,
    package: &str,
    service_name: &str,
    pool: &DescriptorPool,
) -> Result<MethodRecord> {
    let rpc_name = cursor.ident("expected rpc name")?.to_string();
    let fail = |reason: String| parse_error(reason, Some(&rpc_name));

    cursor
        .expect("(", "after rpc name")
        .map_err(|e| with_rpc(e, &rpc_name))?;
    let (request_type, client_streaming) = parse_type_clause(cursor, &rpc_name)?;

    match cursor.next() {
        Some("returns") => {}
        Some(token) => return Err(fail(format!("expected 'returns', found '{token}'"))),
        None => return Err(fail("expected 'returns', found end of file".into())),
    }

    cursor
        .expect("(", "after 'returns'")
        .map_err(|e| with_rpc(e, &rpc_name))?;
    let (response_type, server_streaming) = parse_type_clause(cursor, &rpc_name)?;

    // An rpc ends with either a `;` or a brace-balanced option block.
    match cursor.next() {
        Some(";") => {}
        Some("{") => cursor.skip_block(&format!("after rpc {rpc_name}"))?,
        Some(token) => return Err(fail(format!("expected ';' or '{{', found '{token}'"))),
        None => return Err(fail("expected ';' or '{', found end of file".into())),
    }

    let request = descriptor::resolve_message(pool, package, &request_type)?;
    let response = descriptor::resolve_message(pool, package, &response_type)?;

    let full_path = if package.is_empty() {
        format!("/{service_name}/{rpc_name}")
    } else {
        format!("/{package}.{service_name}/{rpc_name}")
    };

    Ok(MethodRecord {
        simple_name: rpc_name,
        full_path,
        request,
        response,
        client_streaming,
        server_streaming,
    })
}

/// Parse `[stream] <Type> )` inside an rpc's parenthesized group,
/// consuming the closing paren. Returns the type name and whether the
/// `stream` keyword was present.
fn parse_type_clause(cursor: &mut Cursor<'_>, rpc_name: &str) -> Result<(String, bool)> {
    let mut streaming = false;
    if cursor.peek() == Some("stream") {
        let _ = cursor.next();
        streaming = true;
    }
    let type_name = cursor
        .ident("expected message type name")
        .map_err(|e| with_rpc(e, rpc_name))?
        .to_string();
    cursor
        .expect(")", "after message type")
        .map_err(|e| with_rpc(e, rpc_name))?;
    Ok((type_name, streaming))
}
