//! Read-only context providers injected into the engine
//!
//! Instead of reaching for process-wide globals ("are we online?", "which
//! report is on screen?", "what time is it?"), the engine is handed a
//! [`ContextProviders`] bundle at construction. Tests supply fakes.

use crate::time::{Clock, SystemClock};
use crate::Key;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reports whether the remote service is believed reachable
pub trait NetworkStatus: Send + Sync {
    /// True when commands may be sent
    fn is_online(&self) -> bool;
}

/// Reports which resources are currently displayed to the user
pub trait FocusProvider: Send + Sync {
    /// True when `resource` is on screen
    fn is_focused(&self, resource: &Key) -> bool;
}

/// Network status flipped by hand
#[derive(Debug)]
pub struct ManualNetwork {
    online: AtomicBool,
}

impl ManualNetwork {
    /// Create with an initial state
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Change the reported state
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for ManualNetwork {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkStatus for ManualNetwork {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Set of focused resources maintained by the caller
#[derive(Debug, Default)]
pub struct FocusSet {
    focused: RwLock<HashSet<Key>>,
}

impl FocusSet {
    /// Create an empty focus set
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a resource as displayed
    pub fn focus(&self, resource: Key) {
        self.focused.write().insert(resource);
    }

    /// Mark a resource as no longer displayed
    pub fn blur(&self, resource: &Key) {
        self.focused.write().remove(resource);
    }
}

impl FocusProvider for FocusSet {
    fn is_focused(&self, resource: &Key) -> bool {
        self.focused.read().contains(resource)
    }
}

/// The providers the engine reads from
#[derive(Clone)]
pub struct ContextProviders {
    pub network: Arc<dyn NetworkStatus>,
    pub focus: Arc<dyn FocusProvider>,
    pub clock: Arc<dyn Clock>,
}

impl ContextProviders {
    /// Replace the network provider
    pub fn with_network(mut self, network: Arc<dyn NetworkStatus>) -> Self {
        self.network = network;
        self
    }

    /// Replace the focus provider
    pub fn with_focus(mut self, focus: Arc<dyn FocusProvider>) -> Self {
        self.focus = focus;
        self
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for ContextProviders {
    /// Always online, nothing focused, system time
    fn default() -> Self {
        Self {
            network: Arc::new(ManualNetwork::default()),
            focus: Arc::new(FocusSet::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

impl fmt::Debug for ContextProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextProviders")
            .field("online", &self.network.is_online())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_network() {
        let network = ManualNetwork::new(false);
        assert!(!network.is_online());
        network.set_online(true);
        assert!(network.is_online());
    }

    #[test]
    fn test_focus_set() {
        let focus = FocusSet::new();
        let report = Key::new("report_1").unwrap();

        assert!(!focus.is_focused(&report));
        focus.focus(report.clone());
        assert!(focus.is_focused(&report));
        focus.blur(&report);
        assert!(!focus.is_focused(&report));
    }

    #[test]
    fn test_default_providers() {
        let providers = ContextProviders::default();
        assert!(providers.network.is_online());
        assert!(!providers.focus.is_focused(&Key::new("report_1").unwrap()));
    }
}
