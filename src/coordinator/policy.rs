//! Deadlock-avoidance policies.
//!
//! Both policies take resources in ascending index order, which alone rules
//! out a circular wait: any cycle of agents each waiting on the next would
//! need some agent to wait for a lower index while holding a higher one.
//! They differ in how a busy resource is handled.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use super::agent::ResourceId;

/// How an agent acquires its required resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Block on each resource in ascending order, queuing FIFO behind the
    /// current holder.
    #[default]
    GlobalOrder,
    /// Try each resource in ascending order without blocking; on a busy
    /// resource release everything held, sleep a randomized exponential
    /// delay and start over.
    Backoff,
}

impl PolicyKind {
    /// The order in which an agent needing `required` takes its resources:
    /// ascending and without duplicates, for both policies.
    #[must_use]
    pub fn acquisition_order(self, required: &[ResourceId]) -> Vec<ResourceId> {
        let mut order = required.to_vec();
        order.sort_unstable();
        order.dedup();
        order
    }

    /// Returns true if a failed attempt gives up everything it holds.
    #[must_use]
    pub const fn releases_on_conflict(self) -> bool {
        matches!(self, Self::Backoff)
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GlobalOrder => write!(f, "global_order"),
            Self::Backoff => write!(f, "backoff"),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "global_order" => Ok(Self::GlobalOrder),
            "backoff" => Ok(Self::Backoff),
            other => Err(format!("unknown policy {other:?}")),
        }
    }
}
