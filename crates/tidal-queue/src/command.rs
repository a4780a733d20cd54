//! Commands and their typed parameters
//!
//! A [`Command`] is what travels through the queue and over the wire: a
//! name, a JSON parameter object, the resource it targets and the envelope
//! that moves the local store around it.
//!
//! Parameters are stored as raw JSON so that commands persisted by an older
//! build stay dispatchable. Typed access goes through [`CommandParams`], and
//! a [`CommandRegistry`] validates that every enqueued command has a known
//! name and decodable parameters.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tidal_core::{Envelope, Key};
use uuid::Uuid;

/// JSON object holding a command's parameters
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Unique identifier of a command, sent as the request id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub Uuid);

impl CommandId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a command only fetches or also changes server state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Read,
    Write,
}

/// Whether a queued command survives a restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistPolicy {
    /// Written to storage until settled
    #[default]
    Durable,
    /// Dropped on restart
    Transient,
}

/// A unit of work sent to the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: CommandId,
    /// Position in the queue, assigned on enqueue
    #[serde(default)]
    pub seq: u64,
    pub kind: CommandKind,
    pub name: String,
    #[serde(default)]
    pub params: Params,
    /// Resource whose commands are dispatched in order
    pub resource: Key,
    #[serde(default)]
    pub envelope: Envelope,
    #[serde(default)]
    pub persist: PersistPolicy,
    /// May be in flight alongside other parallel-safe commands on its resource
    #[serde(default)]
    pub parallel_safe: bool,
}

impl Command {
    /// Create a command with a fresh id
    ///
    /// Reads default to transient, writes to durable.
    pub fn new(kind: CommandKind, name: impl Into<String>, resource: Key) -> Self {
        let persist = match kind {
            CommandKind::Read => PersistPolicy::Transient,
            CommandKind::Write => PersistPolicy::Durable,
        };
        Self {
            id: CommandId::new(),
            seq: 0,
            kind,
            name: name.into(),
            params: Params::new(),
            resource,
            envelope: Envelope::new(),
            persist,
            parallel_safe: false,
        }
    }

    /// Create a read command
    pub fn read(name: impl Into<String>, resource: Key) -> Self {
        Self::new(CommandKind::Read, name, resource)
    }

    /// Create a write command
    pub fn write(name: impl Into<String>, resource: Key) -> Self {
        Self::new(CommandKind::Write, name, resource)
    }

    /// Build a command from typed parameters
    pub fn from_params<P: CommandParams>(params: &P) -> Result<Self> {
        let resource = params.resource()?;
        let encoded = serde_json::to_value(params).map_err(|e| Error::InvalidParams {
            name: P::NAME.to_string(),
            reason: e.to_string(),
        })?;
        let serde_json::Value::Object(params) = encoded else {
            return Err(Error::InvalidParams {
                name: P::NAME.to_string(),
                reason: "params must serialize to a JSON object".to_string(),
            });
        };
        Ok(Self::new(P::KIND, P::NAME, resource).with_params(params))
    }

    /// Decode the parameters as `P`
    pub fn params_as<P: CommandParams>(&self) -> Result<P> {
        if self.name != P::NAME {
            return Err(Error::InvalidParams {
                name: self.name.clone(),
                reason: format!("expected command '{}'", P::NAME),
            });
        }
        decode_params::<P>(&self.name, &self.params)
    }

    /// Replace all parameters
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Set one parameter
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Attach the envelope
    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.envelope = envelope;
        self
    }

    /// Override the persistence policy
    pub fn with_persist(mut self, persist: PersistPolicy) -> Self {
        self.persist = persist;
        self
    }

    /// Allow this command to overlap other parallel-safe commands
    pub fn parallel_safe(mut self) -> Self {
        self.parallel_safe = true;
        self
    }

    pub fn is_read(&self) -> bool {
        self.kind == CommandKind::Read
    }

    pub fn is_durable(&self) -> bool {
        self.persist == PersistPolicy::Durable
    }

    /// Look up one parameter
    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.params.get(name)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} ({})", self.name, self.seq, self.resource)
    }
}

/// Typed parameters of one command name
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use tidal_core::Key;
/// use tidal_queue::{Command, CommandKind, CommandParams};
///
/// #[derive(Serialize, Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// struct AddComment {
///     report_id: u64,
///     text: String,
/// }
///
/// impl CommandParams for AddComment {
///     const NAME: &'static str = "AddComment";
///     const KIND: CommandKind = CommandKind::Write;
///
///     fn resource(&self) -> tidal_core::Result<Key> {
///         Key::new(format!("report_{}", self.report_id))
///     }
/// }
///
/// let cmd = Command::from_params(&AddComment { report_id: 7, text: "hi".into() }).unwrap();
/// assert_eq!(cmd.resource.as_str(), "report_7");
/// assert_eq!(cmd.params_as::<AddComment>().unwrap().text, "hi");
/// ```
pub trait CommandParams: Serialize + DeserializeOwned {
    /// Wire name of the command
    const NAME: &'static str;
    /// Read or write
    const KIND: CommandKind;

    /// Resource whose queue this command joins
    fn resource(&self) -> tidal_core::Result<Key>;
}

fn decode_params<P: DeserializeOwned>(name: &str, params: &Params) -> Result<P> {
    serde_json::from_value(serde_json::Value::Object(params.clone())).map_err(|e| {
        Error::InvalidParams {
            name: name.to_string(),
            reason: e.to_string(),
        }
    })
}

type Validator = fn(&str, &Params) -> Result<()>;

#[derive(Clone, Copy)]
struct Registration {
    kind: CommandKind,
    validate: Validator,
}

/// The set of command names the application may enqueue
///
/// An empty registry accepts everything. Once one command is registered,
/// unknown names and undecodable parameters are rejected.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Registration>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the parameter type of one command
    pub fn register<P: CommandParams>(&mut self) -> &mut Self {
        fn validate<P: CommandParams>(name: &str, params: &Params) -> Result<()> {
            decode_params::<P>(name, params).map(|_| ())
        }
        self.commands.insert(
            P::NAME.to_string(),
            Registration {
                kind: P::KIND,
                validate: validate::<P>,
            },
        );
        self
    }

    /// Builder-style [`register`](Self::register)
    pub fn with<P: CommandParams>(mut self) -> Self {
        self.register::<P>();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Check that `command` may be enqueued
    pub fn validate(&self, command: &Command) -> Result<()> {
        if self.commands.is_empty() {
            return Ok(());
        }
        let registration = self
            .commands
            .get(&command.name)
            .ok_or_else(|| Error::UnknownCommand(command.name.clone()))?;
        if registration.kind != command.kind {
            return Err(Error::InvalidParams {
                name: command.name.clone(),
                reason: format!("registered as {:?}, got {:?}", registration.kind, command.kind),
            });
        }
        (registration.validate)(&command.name, &command.params)
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.commands.keys().collect();
        names.sort();
        f.debug_struct("CommandRegistry").field("commands", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct OpenReport {
        report_id: u64,
    }

    impl CommandParams for OpenReport {
        const NAME: &'static str = "OpenReport";
        const KIND: CommandKind = CommandKind::Read;

        fn resource(&self) -> tidal_core::Result<Key> {
            Key::new(format!("report_{}", self.report_id))
        }
    }

    #[test]
    fn test_from_params() {
        let cmd = Command::from_params(&OpenReport { report_id: 3 }).unwrap();
        assert_eq!(cmd.name, "OpenReport");
        assert!(cmd.is_read());
        assert!(!cmd.is_durable());
        assert_eq!(cmd.param("reportId"), Some(&serde_json::json!(3)));
        assert_eq!(cmd.params_as::<OpenReport>().unwrap(), OpenReport { report_id: 3 });
    }

    #[test]
    fn test_params_as_wrong_name() {
        let cmd = Command::read("OpenChat", Key::new("chat_1").unwrap());
        assert!(matches!(
            cmd.params_as::<OpenReport>(),
            Err(Error::InvalidParams { .. })
        ));
    }

    #[test]
    fn test_registry() {
        let registry = CommandRegistry::new().with::<OpenReport>();
        let resource = Key::new("report_1").unwrap();

        let good = Command::read("OpenReport", resource.clone()).with_param("reportId", 1);
        assert!(registry.validate(&good).is_ok());

        let unknown = Command::read("OpenChat", resource.clone());
        assert!(matches!(
            registry.validate(&unknown),
            Err(Error::UnknownCommand(name)) if name == "OpenChat"
        ));

        let bad = Command::read("OpenReport", resource.clone()).with_param("reportId", "x");
        assert!(matches!(registry.validate(&bad), Err(Error::InvalidParams { .. })));

        let wrong_kind = Command::write("OpenReport", resource).with_param("reportId", 1);
        assert!(registry.validate(&wrong_kind).is_err());
    }

    #[test]
    fn test_empty_registry_accepts_all() {
        let registry = CommandRegistry::new();
        let cmd = Command::write("Anything", Key::new("x").unwrap());
        assert!(registry.validate(&cmd).is_ok());
    }

    #[test]
    fn test_command_serialization() {
        let cmd = Command::write("AddComment", Key::new("report_1").unwrap())
            .with_param("text", "hello")
            .parallel_safe();
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["name"], "AddComment");
        assert_eq!(json["kind"], "write");
        assert_eq!(json["parallelSafe"], true);

        let back: Command = serde_json::from_value(json).unwrap();
        assert_eq!(back, cmd);
    }
}
