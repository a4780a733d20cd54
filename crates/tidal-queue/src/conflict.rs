//! Conflict resolution between an incoming command and the queue
//!
//! Before a command joins the queue, the resolver inspects what is already
//! queued or in flight and decides how the two relate:
//!
//! - **Append**: no conflict, queue it normally
//! - **Replace**: a queued command is made obsolete by the incoming one
//! - **MergeInto**: the incoming command is folded into a queued one
//! - **Drop**: an equivalent command already exists, attach to it
//! - **Annihilate**: the incoming command cancels an unsent one
//!
//! # Policy Selection
//!
//! Policies are registered against a name pattern: an exact command name,
//! a prefix ending in `*` (`Open*`) or the catch-all `*`. For an incoming
//! command the most specific pattern wins: exact beats prefix, a longer
//! prefix beats a shorter one and `*` comes last. Reads that match no
//! pattern fall back to read coalescing. Registering two policies for the
//! same pattern is rejected by [`ResolverBuilder::build`].

use crate::{Command, CommandId, CommandKind, Error, Params, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A queued command as seen by a policy
#[derive(Debug, Clone, Copy)]
pub struct Queued<'a> {
    pub command: &'a Command,
    /// Already sent, so it can only be attached to, not changed
    pub in_flight: bool,
}

/// What to do with an incoming command
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Queue it behind everything else
    Append,
    /// Remove the queued command and queue the incoming one instead
    Replace(CommandId),
    /// Fold the incoming command into the queued one, with new parameters
    MergeInto { target: CommandId, params: Params },
    /// Discard the incoming command; its caller waits on `0` instead
    Drop(CommandId),
    /// Remove the queued command and discard the incoming one
    Annihilate(CommandId),
}

impl Resolution {
    /// The queued command this resolution acts on
    pub fn target(&self) -> Option<CommandId> {
        match self {
            Resolution::Append => None,
            Resolution::Replace(id)
            | Resolution::Drop(id)
            | Resolution::Annihilate(id)
            | Resolution::MergeInto { target: id, .. } => Some(*id),
        }
    }

    /// Whether the target must still be waiting to be sent
    pub fn requires_queued_target(&self) -> bool {
        !matches!(self, Resolution::Append | Resolution::Drop(_))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Append => write!(f, "append"),
            Resolution::Replace(id) => write!(f, "replace {}", id),
            Resolution::MergeInto { target, .. } => write!(f, "merge into {}", target),
            Resolution::Drop(id) => write!(f, "drop onto {}", id),
            Resolution::Annihilate(id) => write!(f, "annihilate {}", id),
        }
    }
}

/// Decides how an incoming command relates to the queue
pub trait ConflictPolicy: Send + Sync {
    /// `queued` is in queue order, oldest first
    fn resolve(&self, queued: &[Queued<'_>], incoming: &Command) -> Resolution;
}

fn same_params(a: &Command, b: &Command, fields: &[String]) -> bool {
    fields.iter().all(|f| a.param(f) == b.param(f))
}

/// An identical read (same name, resource and parameters) that is queued or
/// in flight absorbs the incoming one
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadCoalescing;

impl ConflictPolicy for ReadCoalescing {
    fn resolve(&self, queued: &[Queued<'_>], incoming: &Command) -> Resolution {
        queued
            .iter()
            .find(|q| {
                q.command.kind == CommandKind::Read
                    && q.command.name == incoming.name
                    && q.command.resource == incoming.resource
                    && q.command.params == incoming.params
            })
            .map(|q| Resolution::Drop(q.command.id))
            .unwrap_or(Resolution::Append)
    }
}

/// An edit of an object whose create has not been sent yet is folded into
/// the create
///
/// Register it for the edit command's name. Create and edit are matched on
/// `match_on` parameters; every other parameter of the edit overwrites the
/// create's.
#[derive(Debug, Clone)]
pub struct EditSupersedesCreate {
    pub create: String,
    pub match_on: Vec<String>,
}

impl EditSupersedesCreate {
    pub fn new(create: impl Into<String>, match_on: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            create: create.into(),
            match_on: match_on.into_iter().map(Into::into).collect(),
        }
    }
}

impl ConflictPolicy for EditSupersedesCreate {
    fn resolve(&self, queued: &[Queued<'_>], incoming: &Command) -> Resolution {
        let Some(create) = queued.iter().rev().find(|q| {
            !q.in_flight
                && q.command.name == self.create
                && q.command.resource == incoming.resource
                && same_params(q.command, incoming, &self.match_on)
        }) else {
            return Resolution::Append;
        };

        let mut params = create.command.params.clone();
        for (name, value) in &incoming.params {
            if !self.match_on.contains(name) {
                params.insert(name.clone(), value.clone());
            }
        }
        Resolution::MergeInto {
            target: create.command.id,
            params,
        }
    }
}

/// A newer command of the same name replaces an unsent older one
///
/// Commands match when their resources are equal and, if `match_on` is not
/// empty, those parameters are equal too.
#[derive(Debug, Clone, Default)]
pub struct LatestWins {
    pub match_on: Vec<String>,
}

impl LatestWins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matching(match_on: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            match_on: match_on.into_iter().map(Into::into).collect(),
        }
    }
}

impl ConflictPolicy for LatestWins {
    fn resolve(&self, queued: &[Queued<'_>], incoming: &Command) -> Resolution {
        queued
            .iter()
            .rev()
            .find(|q| {
                !q.in_flight
                    && q.command.name == incoming.name
                    && q.command.resource == incoming.resource
                    && same_params(q.command, incoming, &self.match_on)
            })
            .map(|q| Resolution::Replace(q.command.id))
            .unwrap_or(Resolution::Append)
    }
}

/// Deleting an object whose create has not been sent removes both
///
/// Register it for the delete command's name.
#[derive(Debug, Clone)]
pub struct DeleteCancelsCreate {
    pub create: String,
    pub match_on: Vec<String>,
}

impl DeleteCancelsCreate {
    pub fn new(create: impl Into<String>, match_on: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            create: create.into(),
            match_on: match_on.into_iter().map(Into::into).collect(),
        }
    }
}

impl ConflictPolicy for DeleteCancelsCreate {
    fn resolve(&self, queued: &[Queued<'_>], incoming: &Command) -> Resolution {
        queued
            .iter()
            .rev()
            .find(|q| {
                !q.in_flight
                    && q.command.name == self.create
                    && q.command.resource == incoming.resource
                    && same_params(q.command, incoming, &self.match_on)
            })
            .map(|q| Resolution::Annihilate(q.command.id))
            .unwrap_or(Resolution::Append)
    }
}

/// Which command names a policy applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NamePattern {
    Exact(String),
    Prefix(String),
    Any,
}

impl NamePattern {
    /// `*` is any name, `Foo*` a prefix, anything else exact
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            NamePattern::Any
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            NamePattern::Prefix(prefix.to_string())
        } else {
            NamePattern::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Exact(exact) => exact == name,
            NamePattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
            NamePattern::Any => true,
        }
    }

    /// Higher is more specific
    fn rank(&self) -> (u8, usize) {
        match self {
            NamePattern::Exact(_) => (2, 0),
            NamePattern::Prefix(prefix) => (1, prefix.len()),
            NamePattern::Any => (0, 0),
        }
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamePattern::Exact(name) => f.write_str(name),
            NamePattern::Prefix(prefix) => write!(f, "{}*", prefix),
            NamePattern::Any => f.write_str("*"),
        }
    }
}

/// Collects policy registrations
pub struct ResolverBuilder {
    policies: Vec<(NamePattern, Arc<dyn ConflictPolicy>)>,
    coalesce_reads: bool,
}

impl ResolverBuilder {
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
            coalesce_reads: true,
        }
    }

    /// Register `policy` for commands whose name matches `pattern`
    pub fn register(mut self, pattern: &str, policy: impl ConflictPolicy + 'static) -> Self {
        self.policies.push((NamePattern::parse(pattern), Arc::new(policy)));
        self
    }

    /// Turn the fallback read coalescing on or off
    pub fn coalesce_reads(mut self, enabled: bool) -> Self {
        self.coalesce_reads = enabled;
        self
    }

    pub fn build(self) -> Result<ConflictResolver> {
        let mut seen = HashSet::new();
        for (pattern, _) in &self.policies {
            if !seen.insert(pattern) {
                return Err(Error::AmbiguousPolicy(pattern.to_string()));
            }
        }
        Ok(ConflictResolver {
            policies: self.policies,
            coalesce_reads: self.coalesce_reads,
        })
    }
}

impl Default for ResolverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Picks and runs the policy for each incoming command
#[derive(Clone)]
pub struct ConflictResolver {
    policies: Vec<(NamePattern, Arc<dyn ConflictPolicy>)>,
    coalesce_reads: bool,
}

impl ConflictResolver {
    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::new()
    }

    /// Pattern that would handle `name`, if any
    pub fn pattern_for(&self, name: &str) -> Option<&NamePattern> {
        self.select(name).map(|(pattern, _)| pattern)
    }

    fn select(&self, name: &str) -> Option<&(NamePattern, Arc<dyn ConflictPolicy>)> {
        self.policies
            .iter()
            .filter(|(pattern, _)| pattern.matches(name))
            .max_by_key(|(pattern, _)| pattern.rank())
    }

    pub fn resolve(&self, queued: &[Queued<'_>], incoming: &Command) -> Resolution {
        if let Some((_, policy)) = self.select(&incoming.name) {
            return policy.resolve(queued, incoming);
        }
        if self.coalesce_reads && incoming.is_read() {
            return ReadCoalescing.resolve(queued, incoming);
        }
        Resolution::Append
    }
}

impl Default for ConflictResolver {
    /// Only read coalescing
    fn default() -> Self {
        Self {
            policies: Vec::new(),
            coalesce_reads: true,
        }
    }
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patterns: Vec<String> = self.policies.iter().map(|(p, _)| p.to_string()).collect();
        f.debug_struct("ConflictResolver")
            .field("patterns", &patterns)
            .field("coalesce_reads", &self.coalesce_reads)
            .finish()
    }
}
