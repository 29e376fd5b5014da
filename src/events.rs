//! Typed event channels shared across owners.
//!
//! Each state-machine owner (C2, C5, C7, C9) emits events through a narrow
//! enum rather than a callback; the pool fans supervisor events in, the
//! router subscribes to catalog and toolset events.

use crate::discovery::ToolDiff;

/// Lifecycle events emitted by a single connection supervisor (C2).
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting { attempt: u32 },
    Failed { detail: String },
    Error { detail: String },
    /// A downstream-pushed `notifications/tools/list_changed`.
    ToolsListChanged,
}

/// A supervisor event tagged with the server it came from, as fanned in by
/// the connection pool (C3).
#[derive(Debug, Clone)]
pub struct PoolEvent {
    pub server_name: String,
    pub event: LifecycleEvent,
}

/// Emitted by the discovery engine (C5) whenever a server's catalog is
/// (re)computed.
#[derive(Debug, Clone)]
pub struct ToolsChangedEvent {
    pub server_name: String,
    pub diff: ToolDiff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolsetChangeType {
    Activated,
    Updated,
    Deactivated,
}

/// Emitted by the toolset manager (C7) on activation, reconciliation, or
/// deactivation of the current toolset.
#[derive(Debug, Clone)]
pub struct ToolsetChangedEvent {
    pub previous_toolset: Option<String>,
    pub new_toolset: Option<String>,
    pub change_type: ToolsetChangeType,
}
