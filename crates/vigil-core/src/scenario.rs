//! Scenario orchestration.
//!
//! A [`Scenario`] bundles a fault, a way of watching the cluster react,
//! a verdict predicate and a restore action. The [`Orchestrator`] runs
//! them in order: baseline, fault, watch, verify, restore. Restore runs
//! exactly once on every path out of [`Orchestrator::run`], including
//! errors and operator interrupts.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::client::{Clock, ProcessControl, RestartPolicy};
use crate::config::{ClusterConfig, Timing};
use crate::error::{Phase, ScenarioError};
use crate::evaluate::{overall_health, Check};
use crate::failover::{Observation, Transition};
use crate::observer::Observer;
use crate::report::{ScenarioResult, Verdict};

/// What a scenario's watch phase saw.
#[derive(Debug, Clone)]
pub struct WatchOutcome {
    /// The last observation made.
    pub observation: Observation,
    /// State machine transitions, empty for scenarios that only poll.
    pub transitions: Vec<Transition>,
}

impl WatchOutcome {
    pub fn polled(observation: Observation) -> Self {
        Self {
            observation,
            transitions: Vec::new(),
        }
    }
}

/// Handles a scenario uses to act on and observe the cluster.
pub struct Context<'a> {
    pub observer: &'a mut Observer,
    pub control: &'a dyn ProcessControl,
    pub clock: &'a dyn Clock,
    pub timing: Timing,
    started: Duration,
}

impl<'a> Context<'a> {
    pub fn new(observer: &'a mut Observer, control: &'a dyn ProcessControl, clock: &'a dyn Clock) -> Self {
        let timing = observer.config().timing.clone();
        let started = clock.now();
        Self {
            observer,
            control,
            clock,
            timing,
            started,
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        self.observer.config()
    }

    /// Time since the scenario started.
    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.started)
    }

    pub fn past_deadline(&self) -> bool {
        self.elapsed() >= self.timing.scenario_timeout()
    }

    pub async fn capture(&mut self, phase: Phase) -> Result<Observation, ScenarioError> {
        let now = self.elapsed();
        self.observer
            .capture(now)
            .await
            .map_err(|e| ScenarioError::decode(phase, e))
    }

    pub async fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration).await;
    }

    pub async fn stop(&self, phase: Phase, id: &str) -> Result<(), ScenarioError> {
        info!(node = id, "stopping");
        self.control
            .stop(id)
            .await
            .map_err(|e| ScenarioError::control(phase, id, e))
    }

    pub async fn start(&self, phase: Phase, id: &str) -> Result<(), ScenarioError> {
        info!(node = id, "starting");
        self.control
            .start(id)
            .await
            .map_err(|e| ScenarioError::control(phase, id, e))
    }

    pub async fn is_running(&self, phase: Phase, id: &str) -> Result<bool, ScenarioError> {
        self.control
            .is_running(id)
            .await
            .map_err(|e| ScenarioError::control(phase, id, e))
    }

    pub async fn set_restart_policy(
        &self,
        phase: Phase,
        id: &str,
        policy: RestartPolicy,
    ) -> Result<(), ScenarioError> {
        self.control
            .set_restart_policy(id, policy)
            .await
            .map_err(|e| ScenarioError::control(phase, id, e))
    }

    /// Polls until `done` holds, the per-state poll budget is spent, or
    /// the scenario deadline passes. Returns the last observation either
    /// way; the scenario's verify decides what it means.
    pub async fn poll_until<F>(&mut self, mut done: F) -> Result<Observation, ScenarioError>
    where
        F: FnMut(&Observation) -> bool,
    {
        let mut last = None;
        for _ in 0..self.timing.max_polls_per_state.max(1) {
            if last.is_some() && self.past_deadline() {
                break;
            }
            let obs = self.capture(Phase::Watch).await?;
            if done(&obs) {
                return Ok(obs);
            }
            last = Some(obs);
            self.sleep(self.timing.poll_interval()).await;
        }
        last.ok_or_else(|| ScenarioError::other(Phase::Watch, "no observation made"))
    }
}

/// A named fault scenario.
#[async_trait(?Send)]
pub trait Scenario {
    fn name(&self) -> &str;

    /// Whether the cluster must be healthy before the fault. Scenarios
    /// meant to repair a cluster opt out.
    fn requires_healthy_baseline(&self) -> bool {
        true
    }

    /// The health condition the baseline must meet.
    fn baseline_check(&self, baseline: &Observation, config: &ClusterConfig) -> Check {
        overall_health(
            &baseline.snapshot,
            config.expected_replicas,
            config.expected_monitors,
        )
    }

    /// Injects the fault. Called at most once per run.
    async fn inject(
        &mut self,
        ctx: &mut Context<'_>,
        baseline: Option<&Observation>,
    ) -> Result<(), ScenarioError>;

    /// Observes the cluster until the scenario can be judged.
    async fn watch(&mut self, ctx: &mut Context<'_>) -> Result<WatchOutcome, ScenarioError>;

    /// Judges the final observation and transition log.
    fn verify(&self, outcome: &WatchOutcome) -> Result<(), String>;

    /// Undoes the fault. Called exactly once per run.
    async fn restore(&mut self, ctx: &mut Context<'_>) -> Result<(), ScenarioError>;

    /// Transitions recorded so far. Read when the watch phase ends in an
    /// error or interrupt, so a partial log still reaches the result.
    fn transitions(&self) -> Vec<Transition> {
        Vec::new()
    }
}

/// Runs scenarios against one cluster.
pub struct Orchestrator<'a> {
    observer: &'a mut Observer,
    control: &'a dyn ProcessControl,
    clock: &'a dyn Clock,
    interrupt: watch::Receiver<bool>,
}

impl<'a> Orchestrator<'a> {
    /// `interrupt` flips to `true` when the operator asks to stop.
    pub fn new(
        observer: &'a mut Observer,
        control: &'a dyn ProcessControl,
        clock: &'a dyn Clock,
        interrupt: watch::Receiver<bool>,
    ) -> Self {
        Self {
            observer,
            control,
            clock,
            interrupt,
        }
    }

    pub fn interrupted(&self) -> bool {
        *self.interrupt.borrow()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock
    }

    pub async fn run(&mut self, scenario: &mut dyn Scenario) -> ScenarioResult {
        let name = scenario.name().to_string();
        let mut interrupt = self.interrupt.clone();
        let mut ctx = Context::new(self.observer, self.control, self.clock);
        info!(scenario = %name, "scenario starting");

        let mut baseline = None;
        let mut skipped = None;
        let mut outcome: Result<WatchOutcome, ScenarioError> =
            Err(ScenarioError::other(Phase::Baseline, "not started"));

        match guarded(&mut interrupt, ctx.capture(Phase::Baseline)).await {
            Ok(obs) => baseline = Some(obs),
            Err(ScenarioError::Interrupted) => outcome = Err(ScenarioError::Interrupted),
            Err(e) if scenario.requires_healthy_baseline() => {
                skipped = Some(format!("baseline unavailable: {e}"));
            }
            Err(e) => warn!(scenario = %name, error = %e, "baseline capture failed"),
        }

        if scenario.requires_healthy_baseline() {
            if let Some(obs) = &baseline {
                let check = scenario.baseline_check(obs, ctx.config());
                if !check.passed() {
                    skipped = Some(format!("baseline unhealthy: {check}"));
                }
            }
        }

        let interrupted_early = matches!(outcome, Err(ScenarioError::Interrupted));
        if skipped.is_none() && !interrupted_early {
            info!(scenario = %name, "injecting fault");
            outcome = match guarded(&mut interrupt, scenario.inject(&mut ctx, baseline.as_ref())).await {
                Ok(()) => {
                    info!(scenario = %name, "watching");
                    guarded(&mut interrupt, scenario.watch(&mut ctx)).await
                }
                Err(e) => Err(e),
            };
        }

        let (verdict, mut reason, transitions) = match (&skipped, &outcome) {
            (Some(why), _) => {
                warn!(scenario = %name, reason = %why, "precondition failed, fault not injected");
                (Verdict::Skipped, Some(why.clone()), Vec::new())
            }
            (None, Ok(watched)) => match scenario.verify(watched) {
                Ok(()) => (Verdict::Passed, None, watched.transitions.clone()),
                Err(why) => (Verdict::Failed, Some(why), watched.transitions.clone()),
            },
            (None, Err(e)) => (Verdict::Failed, Some(e.to_string()), scenario.transitions()),
        };

        // never raced against the interrupt
        info!(scenario = %name, "restoring");
        let restored = match scenario.restore(&mut ctx).await {
            Ok(()) => true,
            Err(e) => {
                warn!(scenario = %name, error = %e, "restore failed");
                let msg = format!("restore failed: {e}");
                reason = Some(match reason {
                    Some(r) => format!("{r}; {msg}"),
                    None => msg,
                });
                false
            }
        };

        let verdict = if !restored && verdict == Verdict::Passed {
            Verdict::Failed
        } else {
            verdict
        };

        let elapsed = ctx.elapsed();
        info!(scenario = %name, verdict = %verdict, elapsed = ?elapsed, "scenario finished");
        ScenarioResult {
            name,
            transitions,
            verdict,
            reason,
            restored,
            elapsed,
        }
    }
}

/// Races `fut` against the operator interrupt.
async fn guarded<T, F>(interrupt: &mut watch::Receiver<bool>, fut: F) -> Result<T, ScenarioError>
where
    F: Future<Output = Result<T, ScenarioError>>,
{
    tokio::select! {
        biased;

        _ = wait_for_interrupt(interrupt) => Err(ScenarioError::Interrupted),
        res = fut => res,
    }
}

/// Resolves once the flag is set. Never resolves if the sender is gone.
async fn wait_for_interrupt(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
