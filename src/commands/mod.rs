//! JSON command surface.
//!
//! Requests are single JSON objects: `{ "command": "<name>", "arguments":
//! [ { "<key>": "<value>" }, ... ] }`. The dispatcher routes each command to
//! the worker that claims its name — console-bound commands are serviced by
//! the driver thread between LPS cycles, data-plane commands by the data
//! handler thread — and relays the worker's response envelope.

pub mod console;
pub mod data;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

/// How long the ingress waits for a worker before giving up on a command
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// A parsed command on its way to a worker
pub struct CommandData {
    pub name: String,
    pub arguments: Vec<(String, String)>,
    pub(crate) response_tx: Sender<Value>,
}

impl CommandData {
    pub fn argument(&self, key: &str) -> Option<&str> {
        self.arguments
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Hand the response back to the waiting ingress
    pub fn respond(self, response: Value) {
        let _ = self.response_tx.send(response);
    }
}

/// Success envelope: `{"response": name, "result": "success", "data": ...}`
pub fn success(name: &str, data: Option<Value>) -> Value {
    match data {
        Some(data) => json!({ "response": name, "result": "success", "data": data }),
        None => json!({ "response": name, "result": "success" }),
    }
}

/// Failure envelope with a short user-visible error string
pub fn failure(name: &str, error: &str) -> Value {
    json!({ "response": name, "result": "failure", "data": { "error": error } })
}

/// Sending half of a worker queue. Tracks the number of undelivered
/// commands so the LPS loop can yield when work is waiting.
#[derive(Clone)]
pub struct CommandQueue {
    tx: Sender<CommandData>,
    pending: Arc<AtomicUsize>,
}

/// Receiving half of a worker queue
pub struct CommandReceiver {
    rx: Receiver<CommandData>,
    pending: Arc<AtomicUsize>,
}

pub fn command_queue() -> (CommandQueue, CommandReceiver) {
    let (tx, rx) = mpsc::channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        CommandQueue {
            tx,
            pending: pending.clone(),
        },
        CommandReceiver { rx, pending },
    )
}

impl CommandQueue {
    pub(crate) fn send(&self, command: CommandData) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(command).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Whether undelivered commands are waiting, checked from the LPS loop
    pub fn has_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }
}

impl CommandReceiver {
    pub fn try_next(&self) -> Option<CommandData> {
        let command = self.rx.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(command)
    }

    pub fn next_timeout(&self, timeout: Duration) -> Option<CommandData> {
        match self.rx.recv_timeout(timeout) {
            Ok(command) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Some(command)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Routes parsed commands to the worker queues and waits for the response
pub struct CommandDispatcher {
    console_queue: CommandQueue,
    data_queue: CommandQueue,
}

impl CommandDispatcher {
    pub fn new(console_queue: CommandQueue, data_queue: CommandQueue) -> Self {
        Self {
            console_queue,
            data_queue,
        }
    }

    pub fn console_queue(&self) -> &CommandQueue {
        &self.console_queue
    }

    /// Handle one JSON request and produce one JSON response
    pub fn dispatch(&self, request: &str) -> Value {
        let (name, arguments) = match parse_request(request) {
            Ok(parsed) => parsed,
            Err(error) => return failure("parse-error", &error),
        };
        debug!(command = %name, "dispatching command");

        let queue = if console::HANDLED.contains(&name.as_str()) {
            &self.console_queue
        } else if data::HANDLED.contains(&name.as_str()) {
            &self.data_queue
        } else {
            warn!(command = %name, "unrecognized command");
            return failure(&name, "unrecognized");
        };

        let (response_tx, response_rx) = mpsc::channel();
        let command = CommandData {
            name: name.clone(),
            arguments,
            response_tx,
        };
        if !queue.send(command) {
            return failure(&name, "command handler unavailable");
        }

        match response_rx.recv_timeout(RESPONSE_TIMEOUT) {
            Ok(response) => response,
            Err(_) => failure(&name, "command timed out"),
        }
    }
}

/// Parse the fixed request shape. Unknown argument keys are kept; the
/// handlers ignore what they do not use.
fn parse_request(request: &str) -> std::result::Result<(String, Vec<(String, String)>), String> {
    let value: Value =
        serde_json::from_str(request).map_err(|_| "malformed JSON request".to_string())?;
    let name = value
        .get("command")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing command name".to_string())?
        .to_string();

    let mut arguments = Vec::new();
    if let Some(args) = value.get("arguments").and_then(Value::as_array) {
        for arg in args {
            let Some(object) = arg.as_object() else {
                continue;
            };
            for (key, val) in object {
                let text = match val {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                arguments.push((key.clone(), text));
            }
        }
    }
    Ok((name, arguments))
}
