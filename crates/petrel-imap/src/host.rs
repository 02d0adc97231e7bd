//! Shared per-host session state.
//!
//! Namespaces, trash discovery, the in-progress-discovery gate, cached
//! capability flags, and the remembered password are per-server, not
//! per-connection. Everything lives behind one coarse mutex keyed by
//! server key; callers go through typed accessors only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::{Capability, CapabilitySet, Namespace, NamespaceKind};

/// Per-host shared state.
#[derive(Debug, Default)]
struct HostState {
    personal: Vec<Namespace>,
    other_users: Vec<Namespace>,
    public: Vec<Namespace>,
    namespaces_fetched: bool,
    password: Option<String>,
    password_verified: bool,
    trash_discovered: bool,
    discovery_in_progress: bool,
    discovery_done: bool,
    capabilities: CapabilitySet,
}

/// Registry of per-host session state, shared across connections.
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    inner: Arc<Mutex<HashMap<String, HostState>>>,
}

impl HostRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, key: &str, f: impl FnOnce(&mut HostState) -> T) -> T {
        let mut map = lock(&self.inner);
        f(map.entry(key.to_string()).or_default())
    }

    /// Stores the namespaces the server reported.
    pub fn set_namespaces(
        &self,
        key: &str,
        personal: Vec<Namespace>,
        other_users: Vec<Namespace>,
        public: Vec<Namespace>,
    ) {
        self.with(key, |state| {
            state.personal = personal;
            state.other_users = other_users;
            state.public = public;
            state.namespaces_fetched = true;
        });
    }

    /// Returns true if NAMESPACE results are already cached.
    #[must_use]
    pub fn namespaces_fetched(&self, key: &str) -> bool {
        self.with(key, |state| state.namespaces_fetched)
    }

    /// All namespaces, personal first. Falls back to a bare personal
    /// namespace when the server never reported any.
    #[must_use]
    pub fn namespaces(&self, key: &str) -> Vec<Namespace> {
        self.with(key, |state| {
            let mut all = Vec::new();
            all.extend(state.personal.iter().cloned());
            all.extend(state.other_users.iter().cloned());
            all.extend(state.public.iter().cloned());
            if all.is_empty() {
                all.push(Namespace::default_personal());
            }
            all
        })
    }

    /// The default namespace of a kind: the first entry.
    #[must_use]
    pub fn default_namespace(&self, key: &str, kind: NamespaceKind) -> Option<Namespace> {
        self.with(key, |state| match kind {
            NamespaceKind::Personal | NamespaceKind::Unknown => state.personal.first().cloned(),
            NamespaceKind::OtherUsers => state.other_users.first().cloned(),
            NamespaceKind::Public => state.public.first().cloned(),
        })
    }

    /// Remembers the password after a successful logon.
    pub fn set_password(&self, key: &str, password: &str) {
        self.with(key, |state| {
            state.password = Some(password.to_string());
            state.password_verified = true;
        });
    }

    /// Returns the remembered password, if any.
    #[must_use]
    pub fn password(&self, key: &str) -> Option<String> {
        self.with(key, |state| state.password.clone())
    }

    /// Forgets the remembered password (wrong-password recovery).
    pub fn forget_password(&self, key: &str) {
        self.with(key, |state| {
            state.password = None;
            state.password_verified = false;
        });
    }

    /// Returns true if a password has been verified this session.
    #[must_use]
    pub fn password_verified(&self, key: &str) -> bool {
        self.with(key, |state| state.password_verified)
    }

    /// Marks the trash folder as discovered.
    pub fn set_trash_discovered(&self, key: &str) {
        self.with(key, |state| state.trash_discovered = true);
    }

    /// Returns true if a trash folder has been seen.
    #[must_use]
    pub fn trash_discovered(&self, key: &str) -> bool {
        self.with(key, |state| state.trash_discovered)
    }

    /// Attempts to begin folder discovery. Returns false if another
    /// connection already runs (or ran) it this session.
    pub fn begin_discovery(&self, key: &str) -> bool {
        self.with(key, |state| {
            if state.discovery_in_progress || state.discovery_done {
                false
            } else {
                state.discovery_in_progress = true;
                true
            }
        })
    }

    /// Marks discovery as finished.
    pub fn finish_discovery(&self, key: &str) {
        self.with(key, |state| {
            state.discovery_in_progress = false;
            state.discovery_done = true;
        });
    }

    /// Caches the latest capability set for the host.
    pub fn set_capabilities(&self, key: &str, caps: &CapabilitySet) {
        self.with(key, |state| state.capabilities = caps.clone());
    }

    /// Returns true if the cached capability set has the capability.
    #[must_use]
    pub fn has_capability(&self, key: &str, cap: &Capability) -> bool {
        self.with(key, |state| state.capabilities.has(cap))
    }
}

/// Locks the map, recovering from poisoning: host state stays usable
/// even if a worker panicked while holding the lock.
fn lock(
    inner: &Arc<Mutex<HashMap<String, HostState>>>,
) -> MutexGuard<'_, HashMap<String, HostState>> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
