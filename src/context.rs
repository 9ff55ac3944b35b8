//! Per-process identity shared by everything that logs.

use std::fmt;

use uuid::Uuid;

const INSTANCE_ID_LEN: usize = 5;

/// Immutable context created once at startup.
///
/// Cloned into the listener, every connection task and the forwarder so log
/// lines from concurrent handlers can be correlated to one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceContext {
    instance_id: String,
}

impl InstanceContext {
    /// Creates a context with a fresh random instance id.
    pub fn new() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self {
            instance_id: simple[..INSTANCE_ID_LEN].to_string(),
        }
    }

    pub fn with_id(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Root span carrying the instance id; entered by the listener.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("instance", id = %self.instance_id)
    }
}

impl Default for InstanceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.instance_id)
    }
}
