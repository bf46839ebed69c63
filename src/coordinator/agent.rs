//! Agent and resource identifiers, and the per-agent record.

use std::fmt;
use std::time::Instant;

use crate::cx::Cx;

/// Identifies an agent registered with a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentId(usize);

impl AgentId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the registration index of the agent.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

/// Identifies one of a coordinator's exclusive resources by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(usize);

impl ResourceId {
    /// Creates a resource id for `index`.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the resource index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for ResourceId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

/// Where an agent is in its acquire/hold/release cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AgentPhase {
    /// Holds nothing and is not acquiring.
    #[default]
    Idle,
    /// Acquiring its required resources; may hold some of them.
    AcquiringAll,
    /// Holds every required resource.
    Holding,
    /// Giving its resources back.
    ReleasingAll,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::AcquiringAll => write!(f, "AcquiringAll"),
            Self::Holding => write!(f, "Holding"),
            Self::ReleasingAll => write!(f, "ReleasingAll"),
        }
    }
}

#[derive(Debug)]
pub(super) struct AgentRecord {
    /// Required subset in acquisition order.
    pub(super) required: Vec<ResourceId>,
    pub(super) phase: AgentPhase,
    /// Arrival ticket of the current acquisition episode.
    pub(super) ticket: u64,
    /// Later arrivals with an overlapping subset that finished acquiring
    /// first during the current episode.
    pub(super) overtaken: u32,
    /// Set once `overtaken` reaches the fairness bound.
    pub(super) starving: bool,
    pub(super) held: Vec<ResourceId>,
    /// Cancelled by `terminate` to interrupt an in-progress acquisition.
    pub(super) episode: Option<Cx>,
    pub(super) terminate_requested: bool,
    pub(super) started: Option<Instant>,
}

impl AgentRecord {
    pub(super) fn new(required: Vec<ResourceId>) -> Self {
        Self {
            required,
            phase: AgentPhase::Idle,
            ticket: 0,
            overtaken: 0,
            starving: false,
            held: Vec::new(),
            episode: None,
            terminate_requested: false,
            started: None,
        }
    }

    /// True if the two required subsets share a resource. Both are sorted.
    pub(super) fn overlaps(&self, other: &Self) -> bool {
        let (mut a, mut b) = (self.required.iter(), other.required.iter());
        let (mut x, mut y) = (a.next(), b.next());
        while let (Some(l), Some(r)) = (x, y) {
            match l.cmp(r) {
                std::cmp::Ordering::Less => x = a.next(),
                std::cmp::Ordering::Greater => y = b.next(),
                std::cmp::Ordering::Equal => return true,
            }
        }
        false
    }

    pub(super) fn reset_episode(&mut self) {
        self.phase = AgentPhase::Idle;
        self.overtaken = 0;
        self.starving = false;
        self.episode = None;
        self.terminate_requested = false;
        self.started = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ids: &[usize]) -> AgentRecord {
        AgentRecord::new(ids.iter().copied().map(ResourceId::new).collect())
    }

    #[test]
    fn overlap_uses_sorted_merge() {
        assert!(record(&[0, 2, 4]).overlaps(&record(&[1, 4])));
        assert!(!record(&[0, 2]).overlaps(&record(&[1, 3])));
        assert!(!record(&[]).overlaps(&record(&[0])));
    }

    #[test]
    fn ids_display() {
        assert_eq!(AgentId::new(3).to_string(), "agent#3");
        assert_eq!(ResourceId::from(1).to_string(), "resource#1");
        assert_eq!(AgentPhase::AcquiringAll.to_string(), "AcquiringAll");
    }
}
