//! Failover detection state machine.
//!
//! Follows one monitored master from the moment it is reported down,
//! through the monitor tier moving the master address, until the new
//! master takes writes and the old node rejoins as its replica.
//!
//! The machine is pure: it is fed one [`Observation`] per poll together
//! with the elapsed time, and it never sleeps or talks to the network
//! itself. Each non-terminal state has a budget of polls; running out
//! of it moves the machine on (see [`FailoverStateMachine::step`]).

use std::fmt;
use std::time::Duration;

use crate::evaluate::quorum_satisfied;
use crate::topology::ClusterSnapshot;
use crate::types::{Address, LinkStatus};

/// Where a failover currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailoverState {
    Monitoring,
    SuspectedDown,
    FailoverInProgress,
    NewMasterElected,
    Stable,
    QuorumLost,
    TimedOut,
}

impl FailoverState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FailoverState::Stable | FailoverState::QuorumLost | FailoverState::TimedOut
        )
    }
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailoverState::Monitoring => "Monitoring",
            FailoverState::SuspectedDown => "SuspectedDown",
            FailoverState::FailoverInProgress => "FailoverInProgress",
            FailoverState::NewMasterElected => "NewMasterElected",
            FailoverState::Stable => "Stable",
            FailoverState::QuorumLost => "QuorumLost",
            FailoverState::TimedOut => "TimedOut",
        };
        f.write_str(s)
    }
}

/// One entry in the transition log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: FailoverState,
    pub to: FailoverState,
    /// Elapsed time since the scenario started.
    pub at: Duration,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}→{} @ {:.1}s",
            self.from,
            self.to,
            self.at.as_secs_f64()
        )
    }
}

/// Everything learned in one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub snapshot: ClusterSnapshot,
    /// What the monitor tier currently resolves the master name to.
    pub resolved_master: Option<Address>,
    /// Whether the resolved master reported the master role and took a
    /// test write. `None` when no probe was made this poll.
    pub write_accepted: Option<bool>,
}

impl Observation {
    pub fn new(snapshot: ClusterSnapshot, resolved_master: Option<Address>) -> Self {
        Self {
            snapshot,
            resolved_master,
            write_accepted: None,
        }
    }
}

/// Drives [`FailoverState`] from polled observations.
#[derive(Debug, Clone)]
pub struct FailoverStateMachine {
    state: FailoverState,
    original_master: Address,
    new_master: Option<Address>,
    polls_in_state: u32,
    max_polls_per_state: u32,
    log: Vec<Transition>,
}

impl FailoverStateMachine {
    /// `original_master` is the address the monitor tier resolved before
    /// the fault. A budget of zero is treated as one poll.
    pub fn new(original_master: Address, max_polls_per_state: u32) -> Self {
        Self {
            state: FailoverState::Monitoring,
            original_master,
            new_master: None,
            polls_in_state: 0,
            max_polls_per_state: max_polls_per_state.max(1),
            log: Vec::new(),
        }
    }

    pub fn state(&self) -> FailoverState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn original_master(&self) -> &Address {
        &self.original_master
    }

    /// The address the master moved to, once a move has been seen.
    pub fn new_master(&self) -> Option<&Address> {
        self.new_master.as_ref()
    }

    /// Every transition so far, oldest first.
    pub fn transitions(&self) -> &[Transition] {
        &self.log
    }

    /// Feeds one observation. Returns the state afterwards.
    ///
    /// Losing quorum ends the run from any non-terminal state. Otherwise
    /// at most one forward step is taken per poll, except that a master
    /// move already visible while still `Monitoring` is logged as both
    /// the suspicion and the failover. Terminal states ignore input.
    pub fn step(&mut self, obs: &Observation, now: Duration) -> FailoverState {
        if self.is_terminal() {
            return self.state;
        }

        if !quorum_satisfied(&obs.snapshot).passed() {
            self.transition(FailoverState::QuorumLost, now);
            return self.state;
        }

        let moved = self.moved_to(obs);
        match self.state {
            FailoverState::Monitoring => {
                if let Some(addr) = moved {
                    self.transition(FailoverState::SuspectedDown, now);
                    self.new_master = Some(addr);
                    self.transition(FailoverState::FailoverInProgress, now);
                } else if obs.snapshot.master_down() {
                    self.transition(FailoverState::SuspectedDown, now);
                } else {
                    self.spend(FailoverState::TimedOut, now);
                }
            }
            FailoverState::SuspectedDown => {
                if let Some(addr) = moved {
                    self.new_master = Some(addr);
                    self.transition(FailoverState::FailoverInProgress, now);
                } else {
                    self.spend(FailoverState::TimedOut, now);
                }
            }
            FailoverState::FailoverInProgress => {
                // the monitor tier may retarget before settling
                if let Some(addr) = moved {
                    self.new_master = Some(addr);
                }
                if obs.write_accepted == Some(true) {
                    self.transition(FailoverState::NewMasterElected, now);
                } else {
                    self.spend(FailoverState::TimedOut, now);
                }
            }
            FailoverState::NewMasterElected => {
                if self.old_master_rejoined(&obs.snapshot) {
                    self.transition(FailoverState::Stable, now);
                } else {
                    self.spend(FailoverState::Stable, now);
                }
            }
            FailoverState::Stable | FailoverState::QuorumLost | FailoverState::TimedOut => {}
        }
        self.state
    }

    /// Ends the run with `TimedOut` once the scenario deadline passes.
    pub fn expire(&mut self, now: Duration) {
        if !self.is_terminal() {
            self.transition(FailoverState::TimedOut, now);
        }
    }

    fn moved_to(&self, obs: &Observation) -> Option<Address> {
        obs.resolved_master
            .as_ref()
            .filter(|addr| **addr != self.original_master)
            .cloned()
    }

    /// The old master shows up as a replica with its link up. When the
    /// record names its upstream it must be the new master.
    fn old_master_rejoined(&self, snapshot: &ClusterSnapshot) -> bool {
        let Some(rec) = snapshot.replica(&self.original_master) else {
            return false;
        };
        let upstream_ok = match (&rec.upstream, &self.new_master) {
            (Some(up), Some(new)) => up == new,
            _ => true,
        };
        rec.link_status == Some(LinkStatus::Up) && upstream_ok
    }

    /// Uses one poll of the current state's budget, moving to
    /// `on_exhausted` when it runs out.
    fn spend(&mut self, on_exhausted: FailoverState, now: Duration) {
        self.polls_in_state += 1;
        if self.polls_in_state >= self.max_polls_per_state {
            self.transition(on_exhausted, now);
        }
    }

    fn transition(&mut self, to: FailoverState, now: Duration) {
        tracing::debug!(from = %self.state, to = %to, at = ?now, "failover transition");
        self.log.push(Transition {
            from: self.state,
            to,
            at: now,
        });
        self.state = to;
        self.polls_in_state = 0;
    }
}
