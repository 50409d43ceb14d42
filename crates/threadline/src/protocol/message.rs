//! Wire envelope and call options

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::serde_duration::duration_millis;

/// Request sent to a worker context.
///
/// Exactly one of `method` or `property` names the target; `args` only
/// applies to `method`. An envelope with neither only names the module, which
/// is how a persistent worker is seeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    pub filename: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
}

/// What an envelope asks the worker to do
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageTarget<'a> {
    /// Invoke an exported function
    Method { name: &'a str, args: &'a [Value] },
    /// Read an exported value
    Property(&'a str),
    /// Load the module only
    Load,
}

impl WorkerMessage {
    /// Envelope that only names the module
    pub fn load(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            method: None,
            property: None,
            args: None,
        }
    }

    /// Envelope invoking `method` with `args`
    pub fn method(filename: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: Some(method.into()),
            args: Some(args),
            ..Self::load(filename)
        }
    }

    /// Envelope reading `property`
    pub fn property(filename: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            property: Some(property.into()),
            ..Self::load(filename)
        }
    }

    pub fn target(&self) -> MessageTarget<'_> {
        match (&self.method, &self.property) {
            (Some(name), _) => MessageTarget::Method {
                name: name.as_str(),
                args: self.args.as_deref().unwrap_or(&[]),
            },
            (None, Some(name)) => MessageTarget::Property(name.as_str()),
            (None, None) => MessageTarget::Load,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Error raised by the remote export itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{name}: {message}")]
pub struct RemoteError {
    pub name: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for RemoteError {
    fn from(err: anyhow::Error) -> Self {
        Self::new("Error", format!("{err:#}"))
    }
}

/// Reply sent back by a worker context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerResponse {
    Ok { value: Value },
    Err { error: RemoteError },
}

impl WorkerResponse {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl From<Result<Value, RemoteError>> for WorkerResponse {
    fn from(result: Result<Value, RemoteError>) -> Self {
        match result {
            Ok(value) => Self::Ok { value },
            Err(error) => Self::Err { error },
        }
    }
}

/// Per-call options
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use threadline::protocol::MessageOptions;
///
/// let options = MessageOptions::default()
///     .with_timeout(Duration::from_secs(5))
///     .with_terminate(false);
/// assert!(!options.should_terminate(false));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageOptions {
    /// Time allowed for the response; zero disables the timeout
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    /// Destroy the transport after a successful response.
    /// Unset means "unless the transport is persistent".
    #[serde(default)]
    pub terminate: Option<bool>,

    /// Proxy member name that terminates a persistent transport
    pub terminate_key: String,

    /// Resolve with the full response envelope instead of its value
    #[serde(default)]
    pub return_event: bool,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            terminate: None,
            terminate_key: "terminate".to_string(),
            return_event: false,
        }
    }
}

impl MessageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disable the response timeout
    pub fn without_timeout(mut self) -> Self {
        self.timeout = Duration::ZERO;
        self
    }

    pub fn with_terminate(mut self, terminate: bool) -> Self {
        self.terminate = Some(terminate);
        self
    }

    pub fn with_terminate_key(mut self, key: impl Into<String>) -> Self {
        self.terminate_key = key.into();
        self
    }

    pub fn with_return_event(mut self, return_event: bool) -> Self {
        self.return_event = return_event;
        self
    }

    /// Effective timeout, `None` when disabled
    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    pub fn should_terminate(&self, persistent: bool) -> bool {
        self.terminate.unwrap_or(!persistent)
    }
}
