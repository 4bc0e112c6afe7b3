//! Storage backend capabilities

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The physical storage backends a cache tier can be built on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Process memory; always available, lost on restart
    Memory,
    /// Byte-quota store scoped to the running session
    SessionDurable,
    /// Byte-quota store that survives restarts
    LocalDurable,
    /// Large binary payload store
    BinaryStore,
    /// HTTP cache owned by a service worker, reachable by message only
    ServiceWorkerCache,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::SessionDurable => "session",
            BackendKind::LocalDurable => "local",
            BackendKind::BinaryStore => "binary_store",
            BackendKind::ServiceWorkerCache => "service_worker_cache",
        }
    }

    /// Whether the backend's contents disappear with the process
    pub fn is_volatile(&self) -> bool {
        matches!(self, BackendKind::Memory | BackendKind::SessionDurable)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of backends that passed their availability probe
///
/// Probing happens once when a cache service is initialized; call sites
/// consult this set instead of re-checking the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    available: BTreeSet<BackendKind>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of probing `kind`
    pub fn record(&mut self, kind: BackendKind, available: bool) {
        if available {
            self.available.insert(kind);
        } else {
            self.available.remove(&kind);
        }
    }

    pub fn has(&self, kind: BackendKind) -> bool {
        self.available.contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = BackendKind> + '_ {
        self.available.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }
}
