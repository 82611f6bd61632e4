//! JSON-RPC session with the switch database server
//!
//! The session is an explicitly owned value: opened by the caller at startup
//! and dropped at shutdown. A closed connection is reported as
//! [`Error::Disconnected`] and never re-established here.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::io::{BufReader, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, trace};

/// Request/response exchange with the database server
pub trait Channel: Send {
    /// Issue `method` with `params` and wait for the matching reply's result
    fn call(&mut self, method: &str, params: Value) -> Result<Value>;
}

/// Where the database server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(Error::ConfigValidation("empty unix socket path".into()));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            if !addr.contains(':') {
                return Err(Error::ConfigValidation(format!(
                    "tcp endpoint '{}' needs HOST:PORT",
                    addr
                )));
            }
            return Ok(Endpoint::Tcp(addr.to_string()));
        }
        Err(Error::ConfigValidation(format!(
            "unrecognized endpoint '{}' (expected unix:PATH or tcp:HOST:PORT)",
            s
        )))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

/// Open a session to `endpoint`
pub fn connect(endpoint: &Endpoint) -> Result<Box<dyn Channel>> {
    debug!(%endpoint, "connecting to switch database");
    match endpoint {
        Endpoint::Unix(path) => {
            let stream = UnixStream::connect(path)?;
            let reader = stream.try_clone()?;
            Ok(Box::new(JsonRpc::new(reader, stream)))
        }
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str())?;
            let reader = stream.try_clone()?;
            Ok(Box::new(JsonRpc::new(reader, stream)))
        }
    }
}

/// Incoming message: either a reply to one of our requests or a server request
#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Value,
}

/// JSON-RPC 1.0 over a byte stream
pub struct JsonRpc<R, W> {
    reader: BufReader<R>,
    writer: W,
    next_id: u64,
}

impl<R: Read, W: Write> JsonRpc<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            next_id: 0,
        }
    }

    fn send(&mut self, message: &Value) -> Result<()> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Message> {
        let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
        match Message::deserialize(&mut de) {
            Ok(message) => Ok(message),
            Err(e) if e.is_eof() => Err(Error::Disconnected),
            Err(e) => Err(e.into()),
        }
    }
}

impl<R: Read + Send, W: Write + Send> Channel for JsonRpc<R, W> {
    fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(&json!({"method": method, "params": params, "id": id}))?;

        loop {
            let message = self.receive()?;

            if let Some(request) = message.method.as_deref() {
                // Server keepalive; anything else is a notification we do not monitor
                if request == "echo" {
                    trace!("answering echo");
                    self.send(&json!({"id": message.id, "result": message.params, "error": null}))?;
                }
                continue;
            }

            if message.id != json!(id) {
                trace!(id = %message.id, "discarding stale reply");
                continue;
            }

            if !message.error.is_null() {
                return Err(Error::Protocol(format!("{} failed: {}", method, message.error)));
            }
            return Ok(message.result.unwrap_or(Value::Null));
        }
    }
}
