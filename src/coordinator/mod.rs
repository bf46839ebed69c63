//! Resource-set coordination (generalized dining philosophers).
//!
//! A [`ResourceSetCoordinator`] owns `M` mutually exclusive resources, each
//! a one-permit [`Semaphore`]. Agents register the fixed subset of resources
//! they need, then repeatedly acquire all of it, work, and release it.
//!
//! # Agent Lifecycle
//!
//! ```text
//! Idle -> AcquiringAll -> Holding -> ReleasingAll -> Idle
//! ```
//!
//! A failed acquisition (timeout, cancellation, close, termination) releases
//! whatever was partially acquired and returns the agent to `Idle`.
//!
//! # Deadlock Freedom
//!
//! Every policy takes resources in ascending index order (see
//! [`PolicyKind::acquisition_order`]), so no cycle of agents each holding a
//! resource the next one waits for can form.
//!
//! # Fairness
//!
//! Each acquisition episode gets an arrival ticket. When an agent finishes
//! acquiring, every earlier-ticket agent with an overlapping subset that is
//! still acquiring counts one overtake. An agent overtaken `fairness_bound`
//! times raises a [`FairnessEvent`] and holds back later overlapping
//! arrivals at an admission gate until it succeeds. Agents already past the
//! gate may still finish first, so an agent is overtaken at most
//! `fairness_bound + agents - 2` times per episode.
//!
//! # Example
//!
//! ```
//! use turnstile::coordinator::{PolicyKind, ResourceSetCoordinator};
//!
//! let table = ResourceSetCoordinator::new(3, PolicyKind::GlobalOrder)?;
//! let left = table.register([0usize, 1])?;
//! let right = table.register([1usize, 2])?;
//!
//! {
//!     let _meal = table.hold(left)?;
//!     assert!(table.try_acquire_all(right).is_err());
//! }
//! table.acquire_all(right)?;
//! table.release_all(right)?;
//! # Ok::<(), turnstile::Error>(())
//! ```

mod agent;
mod backoff;
mod events;
mod policy;

pub use agent::{AgentId, AgentPhase, ResourceId};
pub use events::{FairnessEvent, TerminationEvent};
pub use policy::PolicyKind;

use parking_lot::Mutex as ParkingMutex;
use smallvec::SmallVec;
use std::time::{Duration, Instant};

use self::agent::AgentRecord;
use self::backoff::Backoff;
use self::events::{FairnessCallback, TerminationCallback};
use crate::config::{BackoffConfig, CoordinatorConfig};
use crate::cx::Cx;
use crate::error::{Error, ErrorKind, Result};
use crate::sync::Semaphore;
use crate::sync::wait_queue::{self, WaitQueue, Wake, Woken};

type Events = SmallVec<[FairnessEvent; 2]>;

/// Snapshot of coordinator counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinatorStats {
    /// Registered agents.
    pub agents: usize,
    /// Agents currently holding their resources.
    pub holding: usize,
    /// Agents currently acquiring.
    pub acquiring: usize,
    /// Episodes ended by `release_all`.
    pub completed_episodes: u64,
    /// Agents terminated while acquiring or holding.
    pub terminations: u64,
    /// Largest overtake count any agent reached in one episode.
    pub max_overtaken: u32,
    /// Fairness diagnostics raised.
    pub fairness_events: u64,
}

#[derive(Debug)]
struct CoordinatorState {
    holders: Vec<Option<AgentId>>,
    agents: Vec<AgentRecord>,
    next_ticket: u64,
    closed: bool,
    /// Agents held back by a starving earlier arrival.
    gate: WaitQueue,
    stats: CoordinatorStats,
}

impl CoordinatorState {
    fn record(&self, agent: AgentId) -> Result<&AgentRecord> {
        self.agents
            .get(agent.index())
            .ok_or_else(|| unknown_agent(agent))
    }

    fn record_mut(&mut self, agent: AgentId) -> Result<&mut AgentRecord> {
        self.agents
            .get_mut(agent.index())
            .ok_or_else(|| unknown_agent(agent))
    }

    /// True if an earlier overlapping arrival has hit the fairness bound.
    fn gated(&self, agent: AgentId) -> bool {
        let me = &self.agents[agent.index()];
        self.agents.iter().enumerate().any(|(index, other)| {
            index != agent.index()
                && other.phase == AgentPhase::AcquiringAll
                && other.starving
                && other.ticket < me.ticket
                && other.overlaps(me)
        })
    }

    /// Credits an overtake to every earlier overlapping agent still
    /// acquiring, returning bound-reached diagnostics.
    fn record_overtakes(&mut self, winner: AgentId, bound: u32) -> Events {
        let mut events = Events::new();
        let (ticket, required) = {
            let me = &self.agents[winner.index()];
            (me.ticket, me.required.clone())
        };
        let candidate = AgentRecord::new(required);
        for (index, other) in self.agents.iter_mut().enumerate() {
            if index == winner.index()
                || other.phase != AgentPhase::AcquiringAll
                || other.ticket > ticket
                || !other.overlaps(&candidate)
            {
                continue;
            }
            other.overtaken = other.overtaken.saturating_add(1);
            self.stats.max_overtaken = self.stats.max_overtaken.max(other.overtaken);
            if other.overtaken >= bound && !other.starving {
                other.starving = true;
                events.push(FairnessEvent::BoundReached {
                    agent: AgentId::new(index),
                    overtaken: other.overtaken,
                    bound,
                });
            }
        }
        events
    }

    /// Releases every resource the agent holds in the bookkeeping and
    /// returns them; the caller returns the semaphore permits after
    /// dropping the lock.
    fn take_held(&mut self, agent: AgentId) -> Vec<ResourceId> {
        let held = std::mem::take(&mut self.agents[agent.index()].held);
        for resource in &held {
            self.holders[resource.index()] = None;
        }
        held
    }

    fn count_phase(&self, phase: AgentPhase) -> usize {
        self.agents.iter().filter(|a| a.phase == phase).count()
    }
}

/// Coordinates agents that each need a fixed subset of exclusive resources.
pub struct ResourceSetCoordinator {
    resources: Vec<Semaphore>,
    policy: PolicyKind,
    fairness_bound: u32,
    starvation_threshold: Option<Duration>,
    backoff: BackoffConfig,
    state: ParkingMutex<CoordinatorState>,
    fairness_callbacks: ParkingMutex<Vec<FairnessCallback>>,
    termination_callbacks: ParkingMutex<Vec<TerminationCallback>>,
}

impl std::fmt::Debug for ResourceSetCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSetCoordinator")
            .field("resources", &self.resources.len())
            .field("policy", &self.policy)
            .field("fairness_bound", &self.fairness_bound)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl ResourceSetCoordinator {
    /// Creates a coordinator over `resource_count` resources.
    ///
    /// # Errors
    ///
    /// `InvalidCapacity` if `resource_count` is zero.
    pub fn new(resource_count: usize, policy: PolicyKind) -> Result<Self> {
        if resource_count == 0 {
            return Err(Error::invalid_capacity("resource count", resource_count));
        }
        let resources = (0..resource_count)
            .map(|_| Semaphore::new(1))
            .collect::<Result<Vec<_>>>()?;
        let defaults = CoordinatorConfig::default();
        Ok(Self {
            resources,
            policy,
            fairness_bound: defaults.fairness_bound,
            starvation_threshold: defaults.starvation_threshold,
            backoff: defaults.backoff,
            state: ParkingMutex::new(CoordinatorState {
                holders: vec![None; resource_count],
                agents: Vec::new(),
                next_ticket: 0,
                closed: false,
                gate: WaitQueue::new(),
                stats: CoordinatorStats::default(),
            }),
            fairness_callbacks: ParkingMutex::new(Vec::new()),
            termination_callbacks: ParkingMutex::new(Vec::new()),
        })
    }

    /// Creates a coordinator from its configuration section.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the section fails validation.
    pub fn with_config(config: &CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.resources, config.policy)?
            .with_fairness_bound(config.fairness_bound)?
            .with_starvation_threshold(config.starvation_threshold)
            .with_backoff(config.backoff))
    }

    /// Sets how many overtakes an agent tolerates before later overlapping
    /// arrivals are held back.
    ///
    /// # Errors
    ///
    /// `InvalidCapacity` if `bound` is zero.
    pub fn with_fairness_bound(mut self, bound: u32) -> Result<Self> {
        if bound == 0 {
            return Err(Error::invalid_capacity("fairness bound", 0));
        }
        self.fairness_bound = bound;
        Ok(self)
    }

    /// Sets the acquisition time after which a long-wait diagnostic fires.
    #[must_use]
    pub fn with_starvation_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.starvation_threshold = threshold;
        self
    }

    /// Sets the retry delays used by [`PolicyKind::Backoff`].
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Registers a callback for fairness diagnostics.
    pub fn on_fairness_event(&self, callback: impl Fn(&FairnessEvent) + Send + Sync + 'static) {
        self.fairness_callbacks
            .lock()
            .push(std::sync::Arc::new(callback));
    }

    /// Registers a cleanup callback run after a terminated agent's
    /// resources are released.
    pub fn on_terminate(&self, callback: impl Fn(&TerminationEvent) + Send + Sync + 'static) {
        self.termination_callbacks
            .lock()
            .push(std::sync::Arc::new(callback));
    }

    /// Registers an agent needing `resources`. Duplicates are ignored.
    ///
    /// # Errors
    ///
    /// `UnknownResource` if an index is out of range.
    pub fn register<I, R>(&self, resources: I) -> Result<AgentId>
    where
        I: IntoIterator<Item = R>,
        R: Into<ResourceId>,
    {
        let required: Vec<ResourceId> = resources.into_iter().map(Into::into).collect();
        if let Some(bad) = required.iter().find(|r| r.index() >= self.resources.len()) {
            return Err(Error::new(ErrorKind::UnknownResource).with_message(format!(
                "{bad} is out of range for {} resources",
                self.resources.len()
            )));
        }
        let required = self.policy.acquisition_order(&required);
        let mut state = self.state.lock();
        let agent = AgentId::new(state.agents.len());
        tracing::debug!(%agent, resources = ?required, "agent registered");
        state.agents.push(AgentRecord::new(required));
        state.stats.agents = state.agents.len();
        Ok(agent)
    }

    /// Blocks until `agent` holds every resource it registered.
    ///
    /// # Errors
    ///
    /// `UnknownAgent`; `WouldDeadlock` if the agent is not idle; `Closed`;
    /// `Cancelled` if the agent is terminated while acquiring.
    pub fn acquire_all(&self, agent: AgentId) -> Result<()> {
        self.acquire_all_inner(agent, None, None)
    }

    /// Like [`acquire_all`](Self::acquire_all), giving up after `timeout`.
    /// Nothing stays held on failure.
    ///
    /// # Errors
    ///
    /// As [`acquire_all`](Self::acquire_all), plus `TimedOut`.
    pub fn acquire_all_timeout(&self, agent: AgentId, timeout: Duration) -> Result<()> {
        self.acquire_all_inner(agent, Instant::now().checked_add(timeout), None)
    }

    /// Like [`acquire_all`](Self::acquire_all) under a cancellation context.
    ///
    /// # Errors
    ///
    /// As [`acquire_all`](Self::acquire_all), plus `Cancelled` and
    /// `TimedOut` from `cx`.
    pub fn acquire_all_with(&self, agent: AgentId, cx: &Cx) -> Result<()> {
        self.acquire_all_inner(agent, None, Some(cx))
    }

    /// Acquires everything only if all of it is free right now.
    ///
    /// # Errors
    ///
    /// `WouldBlock` if any resource is busy or contended.
    pub fn try_acquire_all(&self, agent: AgentId) -> Result<()> {
        self.acquire_all_inner(agent, Some(Instant::now()), None)
            .map_err(|err| {
                if err.is_timeout() {
                    Error::would_block()
                } else {
                    err
                }
            })
    }

    /// Acquires everything and returns a guard that releases on drop.
    ///
    /// # Errors
    ///
    /// As [`acquire_all`](Self::acquire_all).
    pub fn hold(&self, agent: AgentId) -> Result<HoldGuard<'_>> {
        self.acquire_all(agent)?;
        Ok(HoldGuard {
            coordinator: self,
            agent,
        })
    }

    /// Releases every resource `agent` holds.
    ///
    /// # Errors
    ///
    /// `UnknownAgent`; `NotOwned` if the agent is not holding.
    pub fn release_all(&self, agent: AgentId) -> Result<()> {
        let held = {
            let mut state = self.state.lock();
            let record = state.record_mut(agent)?;
            if record.phase != AgentPhase::Holding {
                let phase = record.phase;
                drop(state);
                tracing::warn!(%agent, %phase, "release_all by agent that is not holding");
                return Err(Error::not_owned("resource set")
                    .with_message(format!("{agent} is {phase}, not Holding")));
            }
            record.phase = AgentPhase::ReleasingAll;
            state.take_held(agent)
        };
        self.return_permits(&held);
        let mut state = self.state.lock();
        state.agents[agent.index()].reset_episode();
        state.stats.completed_episodes += 1;
        drop(state);
        tracing::debug!(%agent, released = held.len(), "episode finished");
        Ok(())
    }

    /// Interrupts `agent`: an in-progress acquisition fails with
    /// `Cancelled`, a holding episode ends. Resources are released and
    /// `on_terminate` callbacks run. Returns false if there was nothing to
    /// interrupt.
    ///
    /// # Errors
    ///
    /// `UnknownAgent`.
    pub fn terminate(&self, agent: AgentId) -> Result<bool> {
        let mut state = self.state.lock();
        let record = state.record_mut(agent)?;
        match record.phase {
            AgentPhase::Idle | AgentPhase::ReleasingAll => Ok(false),
            AgentPhase::AcquiringAll => {
                record.terminate_requested = true;
                let episode = record.episode.clone();
                drop(state);
                tracing::debug!(%agent, "terminating acquiring agent");
                if let Some(episode) = episode {
                    episode.cancel();
                }
                Ok(true)
            }
            AgentPhase::Holding => {
                record.phase = AgentPhase::ReleasingAll;
                let held = state.take_held(agent);
                drop(state);
                self.return_permits(&held);
                let mut state = self.state.lock();
                state.agents[agent.index()].reset_episode();
                state.stats.terminations += 1;
                drop(state);
                self.emit_termination(&TerminationEvent {
                    agent,
                    phase: AgentPhase::Holding,
                    released: held,
                });
                Ok(true)
            }
        }
    }

    /// Closes the coordinator. Blocked and future acquisitions fail with
    /// `Closed`; holders can still release.
    pub fn close(&self) {
        let woken = {
            let mut state = self.state.lock();
            state.closed = true;
            state.gate.close_all()
        };
        for resource in &self.resources {
            resource.close();
        }
        wait_queue::wake_all(woken);
        tracing::debug!("coordinator closed");
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Returns the agent's current phase.
    ///
    /// # Errors
    ///
    /// `UnknownAgent`.
    pub fn phase(&self, agent: AgentId) -> Result<AgentPhase> {
        Ok(self.state.lock().record(agent)?.phase)
    }

    /// Returns the agent's required subset in acquisition order.
    ///
    /// # Errors
    ///
    /// `UnknownAgent`.
    pub fn required(&self, agent: AgentId) -> Result<Vec<ResourceId>> {
        Ok(self.state.lock().record(agent)?.required.clone())
    }

    /// Returns the agent's overtake count in its current episode.
    ///
    /// # Errors
    ///
    /// `UnknownAgent`.
    pub fn overtaken(&self, agent: AgentId) -> Result<u32> {
        Ok(self.state.lock().record(agent)?.overtaken)
    }

    /// Returns the agent currently holding `resource`, if any.
    ///
    /// # Errors
    ///
    /// `UnknownResource`.
    pub fn holder(&self, resource: impl Into<ResourceId>) -> Result<Option<AgentId>> {
        let resource = resource.into();
        self.state
            .lock()
            .holders
            .get(resource.index())
            .copied()
            .ok_or_else(|| {
                Error::new(ErrorKind::UnknownResource).with_message(resource.to_string())
            })
    }

    /// Number of resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// The acquisition policy.
    #[must_use]
    pub fn policy(&self) -> PolicyKind {
        self.policy
    }

    /// The configured fairness bound.
    #[must_use]
    pub fn fairness_bound(&self) -> u32 {
        self.fairness_bound
    }

    /// Returns a snapshot of the coordinator's counters.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        let state = self.state.lock();
        CoordinatorStats {
            holding: state.count_phase(AgentPhase::Holding),
            acquiring: state.count_phase(AgentPhase::AcquiringAll),
            ..state.stats
        }
    }

    fn acquire_all_inner(
        &self,
        agent: AgentId,
        deadline: Option<Instant>,
        cx: Option<&Cx>,
    ) -> Result<()> {
        let episode = self.begin_episode(agent, cx)?;
        let outcome = self
            .pass_gate(agent, deadline, &episode)
            .and_then(|()| match self.policy {
                PolicyKind::GlobalOrder => self.acquire_in_order(agent, deadline, &episode),
                PolicyKind::Backoff => self.acquire_with_backoff(agent, deadline, &episode),
            });
        match outcome {
            Ok(()) => self.finish_acquire(agent),
            Err(err) => Err(self.abort_episode(agent, err)),
        }
    }

    fn begin_episode(&self, agent: AgentId, cx: Option<&Cx>) -> Result<Cx> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::closed());
        }
        let ticket = state.next_ticket;
        let record = state.record_mut(agent)?;
        if record.phase != AgentPhase::Idle {
            return Err(Error::new(ErrorKind::WouldDeadlock)
                .with_message(format!("{agent} is already {}", record.phase)));
        }
        let episode = cx.map_or_else(Cx::new, Cx::child);
        record.phase = AgentPhase::AcquiringAll;
        record.ticket = ticket;
        record.overtaken = 0;
        record.starving = false;
        record.episode = Some(episode.clone());
        record.started = Some(Instant::now());
        state.next_ticket += 1;
        tracing::trace!(%agent, ticket, "acquisition started");
        Ok(episode)
    }

    /// Waits while an earlier starving overlapping agent is acquiring.
    fn pass_gate(&self, agent: AgentId, deadline: Option<Instant>, episode: &Cx) -> Result<()> {
        loop {
            let waiter = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(Error::closed());
                }
                episode.checkpoint()?;
                if !state.gated(agent) {
                    return Ok(());
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return Err(Error::timed_out());
                }
                state.gate.push(0)
            };
            tracing::trace!(%agent, "held at fairness gate");
            match wait_queue::park(&waiter, deadline, Some(episode)) {
                Wake::Granted => {}
                Wake::Closed => return Err(Error::closed()),
                wake => {
                    self.state.lock().gate.remove(waiter.id());
                    return Err(wake.into_error());
                }
            }
        }
    }

    fn acquire_in_order(&self, agent: AgentId, deadline: Option<Instant>, episode: &Cx) -> Result<()> {
        let required = self.state.lock().agents[agent.index()].required.clone();
        for resource in required {
            self.resources[resource.index()].acquire_inner(1, deadline, Some(episode))?;
            self.note_held(agent, resource);
        }
        Ok(())
    }

    fn acquire_with_backoff(
        &self,
        agent: AgentId,
        deadline: Option<Instant>,
        episode: &Cx,
    ) -> Result<()> {
        let required = self.state.lock().agents[agent.index()].required.clone();
        let mut backoff = Backoff::new(self.backoff);
        'attempt: loop {
            episode.checkpoint()?;
            for &resource in &required {
                match self.resources[resource.index()].try_acquire() {
                    Ok(permit) => {
                        permit.forget();
                        self.note_held(agent, resource);
                    }
                    Err(err) if err.kind() == ErrorKind::WouldBlock => {
                        let held = self.state.lock().take_held(agent);
                        self.return_permits(&held);
                        tracing::trace!(
                            %agent,
                            %resource,
                            attempts = backoff.attempts(),
                            "resource busy, backing off"
                        );
                        backoff.wait(deadline, episode)?;
                        continue 'attempt;
                    }
                    Err(err) => return Err(err),
                }
            }
            return Ok(());
        }
    }

    fn note_held(&self, agent: AgentId, resource: ResourceId) {
        let mut state = self.state.lock();
        state.holders[resource.index()] = Some(agent);
        state.agents[agent.index()].held.push(resource);
    }

    fn finish_acquire(&self, agent: AgentId) -> Result<()> {
        let (events, woken) = {
            let mut state = self.state.lock();
            if state.agents[agent.index()].terminate_requested {
                drop(state);
                return Err(self.abort_episode(
                    agent,
                    Error::cancelled().with_message(format!("{agent} terminated")),
                ));
            }
            let bound = self.fairness_bound;
            let mut events = state.record_overtakes(agent, bound);
            let record = &mut state.agents[agent.index()];
            let waited = record.started.map(|s| s.elapsed()).unwrap_or_default();
            record.phase = AgentPhase::Holding;
            record.starving = false;
            record.episode = None;
            if let Some(threshold) = self.starvation_threshold {
                if waited > threshold {
                    events.push(FairnessEvent::LongWait {
                        agent,
                        waited,
                        threshold,
                    });
                }
            }
            state.stats.fairness_events += events.len() as u64;
            (events, state.gate.grant_all())
        };
        wait_queue::wake_all(woken);
        tracing::trace!(%agent, "acquired all resources");
        self.emit_fairness(&events);
        Ok(())
    }

    /// Gives back partial holdings after a failed acquisition. Returns the
    /// error to report.
    fn abort_episode(&self, agent: AgentId, err: Error) -> Error {
        let (held, terminated, woken): (_, _, Woken) = {
            let mut state = self.state.lock();
            let Some(record) = state.agents.get(agent.index()) else {
                return err;
            };
            // Rejected before the episode began (unknown, busy or closed).
            if record.phase != AgentPhase::AcquiringAll {
                return err;
            }
            let terminated = record.terminate_requested;
            let held = state.take_held(agent);
            state.agents[agent.index()].reset_episode();
            if terminated {
                state.stats.terminations += 1;
            }
            (held, terminated, state.gate.grant_all())
        };
        self.return_permits(&held);
        wait_queue::wake_all(woken);
        tracing::debug!(%agent, released = held.len(), error = %err, "acquisition abandoned");
        if terminated {
            self.emit_termination(&TerminationEvent {
                agent,
                phase: AgentPhase::AcquiringAll,
                released: held,
            });
            return Error::cancelled().with_message(format!("{agent} terminated"));
        }
        err
    }

    fn return_permits(&self, held: &[ResourceId]) {
        for resource in held {
            let returned = self.resources[resource.index()].up();
            debug_assert!(returned.is_ok(), "held resources have an outstanding permit");
        }
    }

    fn emit_fairness(&self, events: &[FairnessEvent]) {
        if events.is_empty() {
            return;
        }
        let callbacks = self.fairness_callbacks.lock().clone();
        for event in events {
            tracing::warn!(agent = %event.agent(), %event, "fairness diagnostic");
            for callback in &callbacks {
                callback(event);
            }
        }
    }

    fn emit_termination(&self, event: &TerminationEvent) {
        tracing::debug!(
            agent = %event.agent,
            phase = %event.phase,
            released = event.released.len(),
            "agent terminated"
        );
        let callbacks = self.termination_callbacks.lock().clone();
        for callback in &callbacks {
            callback(event);
        }
    }
}

fn unknown_agent(agent: AgentId) -> Error {
    Error::new(ErrorKind::UnknownAgent).with_message(format!("{agent} is not registered"))
}

/// A holding episode, ended by drop.
#[derive(Debug)]
#[must_use = "resources are released as soon as the guard is dropped"]
pub struct HoldGuard<'a> {
    coordinator: &'a ResourceSetCoordinator,
    agent: AgentId,
}

impl HoldGuard<'_> {
    /// The holding agent.
    #[must_use]
    pub fn agent(&self) -> AgentId {
        self.agent
    }
}

impl Drop for HoldGuard<'_> {
    fn drop(&mut self) {
        // Already released if the agent was terminated while holding.
        if let Err(err) = self.coordinator.release_all(self.agent) {
            tracing::debug!(agent = %self.agent, error = %err, "hold guard found nothing to release");
        }
    }
}
