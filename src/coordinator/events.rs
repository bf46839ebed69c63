//! Diagnostics and termination events delivered to callbacks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::agent::{AgentId, AgentPhase, ResourceId};

/// A liveness diagnostic. Never an error: the coordinator keeps running and
/// the gate restores progress for the affected agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FairnessEvent {
    /// An agent was overtaken `overtaken` times by later arrivals; later
    /// overlapping arrivals are now held back until it succeeds.
    BoundReached {
        /// The overtaken agent.
        agent: AgentId,
        /// Overtakes so far in this episode.
        overtaken: u32,
        /// The configured fairness bound.
        bound: u32,
    },
    /// An acquisition took longer than the starvation threshold.
    LongWait {
        /// The slow agent.
        agent: AgentId,
        /// How long the acquisition took.
        waited: Duration,
        /// The configured threshold.
        threshold: Duration,
    },
}

impl FairnessEvent {
    /// The agent the event is about.
    #[must_use]
    pub fn agent(&self) -> AgentId {
        match self {
            Self::BoundReached { agent, .. } | Self::LongWait { agent, .. } => *agent,
        }
    }
}

impl fmt::Display for FairnessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BoundReached {
                agent,
                overtaken,
                bound,
            } => write!(f, "{agent} overtaken {overtaken} times (bound {bound})"),
            Self::LongWait {
                agent,
                waited,
                threshold,
            } => write!(
                f,
                "{agent} waited {waited:?} to acquire (threshold {threshold:?})"
            ),
        }
    }
}

/// Reported to `on_terminate` callbacks after a terminated agent's
/// resources have been released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationEvent {
    /// The terminated agent.
    pub agent: AgentId,
    /// Phase the agent was in when terminated.
    pub phase: AgentPhase,
    /// Resources released on the agent's behalf.
    pub released: Vec<ResourceId>,
}

pub(super) type FairnessCallback = Arc<dyn Fn(&FairnessEvent) + Send + Sync>;
pub(super) type TerminationCallback = Arc<dyn Fn(&TerminationEvent) + Send + Sync>;
