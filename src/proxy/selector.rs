//! Address selection policy.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;

/// How one address is picked from a resolution result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Always the first resolved address
    #[default]
    First,
    /// Rotate through the resolved addresses across requests
    RoundRobin,
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(SelectionPolicy::First),
            "round_robin" | "round-robin" | "roundrobin" => Ok(SelectionPolicy::RoundRobin),
            other => Err(format!("unknown selection policy {other:?}")),
        }
    }
}

/// Picks one address per request.
///
/// The rotation counter is shared by every connection task, so the
/// round-robin position advances atomically across concurrent requests.
#[derive(Debug, Default)]
pub struct Selector {
    policy: SelectionPolicy,
    counter: AtomicUsize,
}

impl Selector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Returns `None` only for an empty address list.
    pub fn select<'a>(&self, addresses: &'a [String]) -> Option<&'a str> {
        if addresses.is_empty() {
            return None;
        }

        let index = match self.policy {
            SelectionPolicy::First => 0,
            SelectionPolicy::RoundRobin => {
                self.counter.fetch_add(1, Ordering::Relaxed) % addresses.len()
            }
        };

        Some(addresses[index].as_str())
    }
}
