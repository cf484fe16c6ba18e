//! Built-in fault scenarios.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::client::{RestartPolicy, WriteOutcome};
use crate::config::ClusterConfig;
use crate::error::{Phase, ScenarioError};
use crate::evaluate::quorum_satisfied;
use crate::failover::{FailoverState, FailoverStateMachine, Observation, Transition};
use crate::observer::PROBE_KEY;
use crate::scenario::{Context, Scenario, WatchOutcome};
use crate::types::{Address, Role};

/// Scenarios run by `all`, in order.
pub const ALL: &[&str] = &["monitor", "failover", "partition", "recovery", "stress"];

/// Every scenario name accepted by [`by_name`].
pub const NAMES: &[&str] = &["monitor", "failover", "partition", "sentinel", "recovery", "stress"];

const STRESS_WRITES: usize = 10;
const STRESS_SPACING: Duration = Duration::from_millis(500);
const STRESS_PASS_PERCENT: usize = 80;

/// Builds a scenario by name.
pub fn by_name(name: &str) -> Option<Box<dyn Scenario>> {
    let scenario: Box<dyn Scenario> = match name {
        "monitor" => Box::new(Replication::default()),
        "failover" => Box::new(MasterFailover::default()),
        "partition" => Box::new(MonitorOutage::partition()),
        "sentinel" => Box::new(MonitorOutage::sentinel()),
        "recovery" => Box::new(Recovery::default()),
        "stress" => Box::new(Stress::default()),
        _ => return None,
    };
    Some(scenario)
}

async fn write(
    ctx: &mut Context<'_>,
    phase: Phase,
    id: &str,
    key: &str,
    value: &str,
) -> Result<(), ScenarioError> {
    let client = ctx
        .observer
        .client(id)
        .ok_or_else(|| ScenarioError::other(phase, format!("unknown node '{id}'")))?;
    match client
        .set(key, value)
        .await
        .map_err(|e| ScenarioError::client(phase, e))?
    {
        WriteOutcome::Accepted => Ok(()),
        WriteOutcome::ReadOnlyRejected => Err(ScenarioError::other(
            phase,
            format!("{id} rejected write to '{key}': read-only"),
        )),
    }
}

async fn read(
    ctx: &mut Context<'_>,
    phase: Phase,
    id: &str,
    key: &str,
) -> Result<Option<String>, ScenarioError> {
    let client = ctx
        .observer
        .client(id)
        .ok_or_else(|| ScenarioError::other(phase, format!("unknown node '{id}'")))?;
    client
        .get(key)
        .await
        .map_err(|e| ScenarioError::client(phase, e))
}

async fn current_master(ctx: &mut Context<'_>, phase: Phase) -> Result<String, ScenarioError> {
    ctx.observer
        .current_master_id()
        .await
        .ok_or_else(|| ScenarioError::other(phase, "no master configured"))
}

/// Removes test keys from the acting master. Failures are logged and
/// otherwise ignored; leftover keys never fail a run.
async fn cleanup(ctx: &mut Context<'_>, keys: &[&str]) {
    let Some(master) = ctx.observer.current_master_id().await else {
        return;
    };
    let Some(client) = ctx.observer.client(&master) else {
        return;
    };
    match client.del(keys).await {
        Ok(removed) => debug!(node = %master, removed, "test keys removed"),
        Err(e) => warn!(node = %master, error = %e, "test key cleanup failed"),
    }
}

fn replicas_of(ctx: &Context<'_>, master_id: &str) -> Vec<String> {
    ctx.observer
        .data_ids()
        .into_iter()
        .filter(|id| id != master_id)
        .collect()
}

/// Writes a payload to the master and waits for every replica to serve
/// it back.
#[derive(Debug, Default)]
pub struct Replication {
    payload: String,
    missing: Vec<String>,
}

const MONITOR_KEY: &str = "monitor_test";

#[async_trait(?Send)]
impl Scenario for Replication {
    fn name(&self) -> &str {
        "monitor"
    }

    async fn inject(
        &mut self,
        ctx: &mut Context<'_>,
        _baseline: Option<&Observation>,
    ) -> Result<(), ScenarioError> {
        let master = current_master(ctx, Phase::Fault).await?;
        self.payload = format!(
            r#"{{"test":"sentinel_monitoring","at_ms":{},"nonce":{}}}"#,
            ctx.clock.now().as_millis(),
            rand::rng().random_range(0..u32::MAX)
        );
        write(ctx, Phase::Fault, &master, MONITOR_KEY, &self.payload).await?;
        self.missing = replicas_of(ctx, &master);
        Ok(())
    }

    async fn watch(&mut self, ctx: &mut Context<'_>) -> Result<WatchOutcome, ScenarioError> {
        for _ in 0..ctx.timing.max_polls_per_state {
            let mut still_missing = Vec::new();
            for id in std::mem::take(&mut self.missing) {
                match read(ctx, Phase::Watch, &id, MONITOR_KEY).await {
                    Ok(Some(v)) if v == self.payload => {}
                    Ok(_) => still_missing.push(id),
                    Err(e) => {
                        warn!(node = %id, error = %e, "replica read failed");
                        still_missing.push(id);
                    }
                }
            }
            self.missing = still_missing;
            if self.missing.is_empty() || ctx.past_deadline() {
                break;
            }
            ctx.sleep(ctx.timing.poll_interval()).await;
        }
        let observation = ctx.capture(Phase::Watch).await?;
        Ok(WatchOutcome::polled(observation))
    }

    fn verify(&self, _outcome: &WatchOutcome) -> Result<(), String> {
        if self.missing.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "payload not replicated to {}",
                self.missing.join(", ")
            ))
        }
    }

    async fn restore(&mut self, ctx: &mut Context<'_>) -> Result<(), ScenarioError> {
        cleanup(ctx, &[MONITOR_KEY]).await;
        Ok(())
    }
}

/// Stops the master's container and follows the failover through the
/// state machine.
#[derive(Debug, Default)]
pub struct MasterFailover {
    target: Option<String>,
    original: Option<Address>,
    candidates: Vec<Address>,
    machine: Option<FailoverStateMachine>,
    /// The target was started again once a new master took writes.
    restarted: bool,
}

const FAILOVER_KEY: &str = "failover_test";

#[async_trait(?Send)]
impl Scenario for MasterFailover {
    fn name(&self) -> &str {
        "failover"
    }

    async fn inject(
        &mut self,
        ctx: &mut Context<'_>,
        baseline: Option<&Observation>,
    ) -> Result<(), ScenarioError> {
        let original = baseline
            .and_then(|b| {
                b.resolved_master
                    .clone()
                    .or_else(|| b.snapshot.master_address().cloned())
            })
            .ok_or_else(|| ScenarioError::other(Phase::Fault, "master address unknown"))?;

        let config = ctx.config();
        let target = config
            .data_node_announced_as(&original)
            .or_else(|| config.master())
            .map(|n| n.id.clone())
            .ok_or_else(|| ScenarioError::other(Phase::Fault, "no master configured"))?;
        self.candidates = config
            .nodes
            .iter()
            .filter(|n| n.role != Role::Monitor && n.id != target)
            .map(|n| n.announced().clone())
            .collect();
        self.original = Some(original.clone());
        self.target = Some(target.clone());

        write(ctx, Phase::Fault, &target, FAILOVER_KEY, "Before failure").await?;

        // keep the runtime from restarting the master under us
        ctx.set_restart_policy(Phase::Fault, &target, RestartPolicy::No)
            .await?;
        ctx.stop(Phase::Fault, &target).await?;
        info!(node = %target, address = %original, "master stopped");
        Ok(())
    }

    async fn watch(&mut self, ctx: &mut Context<'_>) -> Result<WatchOutcome, ScenarioError> {
        let original = self
            .original
            .clone()
            .ok_or_else(|| ScenarioError::other(Phase::Watch, "fault was not injected"))?;
        let machine = self.machine.insert(FailoverStateMachine::new(
            original.clone(),
            ctx.timing.max_polls_per_state,
        ));
        let mut last = None;

        loop {
            let now = ctx.elapsed();
            if now >= ctx.timing.scenario_timeout() {
                machine.expire(now);
                break;
            }

            let mut obs = ctx.capture(Phase::Watch).await?;
            if machine.state() == FailoverState::FailoverInProgress {
                let target = obs
                    .resolved_master
                    .clone()
                    .filter(|a| *a != original)
                    .or_else(|| machine.new_master().cloned());
                if let Some(target) = target {
                    obs.write_accepted = Some(ctx.observer.write_probe(&target).await);
                }
            }

            let before = machine.state();
            let state = machine.step(&obs, now);
            last = Some(obs);
            if state.is_terminal() {
                break;
            }

            // the old master can only rejoin as a replica once it runs again
            if state == FailoverState::NewMasterElected && before != state {
                if let Some(target) = &self.target {
                    ctx.set_restart_policy(Phase::Watch, target, RestartPolicy::UnlessStopped)
                        .await?;
                    ctx.start(Phase::Watch, target).await?;
                    self.restarted = true;
                    info!(node = %target, "old master restarted");
                }
            }
            ctx.sleep(ctx.timing.poll_interval()).await;
        }

        let observation = match last {
            Some(obs) => obs,
            None => ctx.capture(Phase::Watch).await?,
        };
        Ok(WatchOutcome {
            observation,
            transitions: machine.transitions().to_vec(),
        })
    }

    fn verify(&self, outcome: &WatchOutcome) -> Result<(), String> {
        let terminal = outcome.transitions.last().map(|t| t.to);
        if terminal != Some(FailoverState::Stable) {
            let state = terminal.map_or_else(|| "Monitoring".to_string(), |s| s.to_string());
            return Err(format!("failover ended in {state}, expected Stable"));
        }
        match &outcome.observation.resolved_master {
            Some(addr) if self.candidates.contains(addr) => Ok(()),
            Some(addr) => Err(format!("new master {addr} is not a configured replica")),
            None => Err("monitors resolve no master after failover".into()),
        }
    }

    async fn restore(&mut self, ctx: &mut Context<'_>) -> Result<(), ScenarioError> {
        let target = match &self.target {
            Some(t) => t.clone(),
            None => match ctx.config().master() {
                Some(m) => m.id.clone(),
                None => return Ok(()),
            },
        };
        if !(self.restarted && ctx.is_running(Phase::Restore, &target).await?) {
            ctx.set_restart_policy(Phase::Restore, &target, RestartPolicy::UnlessStopped)
                .await?;
            ctx.start(Phase::Restore, &target).await?;
        }
        cleanup(ctx, &[FAILOVER_KEY, PROBE_KEY]).await;
        Ok(())
    }

    fn transitions(&self) -> Vec<Transition> {
        self.machine
            .as_ref()
            .map(|m| m.transitions().to_vec())
            .unwrap_or_default()
    }
}

/// Which property a monitor outage must preserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutageCheck {
    /// The remaining monitors still reach quorum.
    Quorum,
    /// The remaining monitors still watch the master.
    Monitoring,
}

const PARTITION_KEY: &str = "partition_test";

/// Stops one monitor and checks that the rest carry on.
#[derive(Debug)]
pub struct MonitorOutage {
    name: &'static str,
    index: usize,
    check: OutageCheck,
    stopped: Option<(String, Address)>,
}

impl MonitorOutage {
    /// First monitor down; quorum must hold.
    pub fn partition() -> Self {
        Self {
            name: "partition",
            index: 0,
            check: OutageCheck::Quorum,
            stopped: None,
        }
    }

    /// Second monitor down; monitoring must continue.
    pub fn sentinel() -> Self {
        Self {
            name: "sentinel",
            index: 1,
            check: OutageCheck::Monitoring,
            stopped: None,
        }
    }

    fn judge(&self, obs: &Observation) -> Result<(), String> {
        let stopped = self.stopped.as_ref().map(|(_, addr)| addr);
        let remaining: Vec<_> = obs
            .snapshot
            .monitor_status
            .iter()
            .filter(|m| Some(&m.address) != stopped)
            .collect();
        if remaining.is_empty() {
            return Err("no monitors left to observe".into());
        }
        let down: Vec<String> = remaining
            .iter()
            .filter(|m| !m.reachable)
            .map(|m| m.address.to_string())
            .collect();
        if !down.is_empty() {
            return Err(format!("remaining monitors unreachable: {}", down.join(", ")));
        }

        match self.check {
            OutageCheck::Quorum => {
                let quorum = quorum_satisfied(&obs.snapshot);
                if !quorum.passed() {
                    return Err(quorum.to_string());
                }
                if obs.snapshot.master.is_none() {
                    return Err("remaining monitors report no master".into());
                }
            }
            OutageCheck::Monitoring => {
                let silent: Vec<String> = remaining
                    .iter()
                    .filter(|m| m.masters_reported == 0)
                    .map(|m| m.address.to_string())
                    .collect();
                if !silent.is_empty() {
                    return Err(format!("monitors report no masters: {}", silent.join(", ")));
                }
            }
        }
        Ok(())
    }

    fn monitor_id(&self, config: &ClusterConfig) -> Option<(String, Address)> {
        config
            .nodes_with(Role::Monitor)
            .nth(self.index)
            .map(|n| (n.id.clone(), n.addr.clone()))
    }
}

#[async_trait(?Send)]
impl Scenario for MonitorOutage {
    fn name(&self) -> &str {
        self.name
    }

    async fn inject(
        &mut self,
        ctx: &mut Context<'_>,
        _baseline: Option<&Observation>,
    ) -> Result<(), ScenarioError> {
        let (id, addr) = self.monitor_id(ctx.config()).ok_or_else(|| {
            ScenarioError::other(
                Phase::Fault,
                format!("no monitor #{} configured", self.index + 1),
            )
        })?;
        if self.check == OutageCheck::Quorum {
            let master = current_master(ctx, Phase::Fault).await?;
            write(ctx, Phase::Fault, &master, PARTITION_KEY, "Before partition").await?;
        }
        self.stopped = Some((id.clone(), addr));
        ctx.stop(Phase::Fault, &id).await
    }

    async fn watch(&mut self, ctx: &mut Context<'_>) -> Result<WatchOutcome, ScenarioError> {
        // peers need time to flag the stopped monitor
        ctx.sleep(ctx.timing.settle()).await;
        let observation = ctx.poll_until(|obs| self.judge(obs).is_ok()).await?;
        Ok(WatchOutcome::polled(observation))
    }

    fn verify(&self, outcome: &WatchOutcome) -> Result<(), String> {
        self.judge(&outcome.observation)
    }

    async fn restore(&mut self, ctx: &mut Context<'_>) -> Result<(), ScenarioError> {
        let id = match &self.stopped {
            Some((id, _)) => id.clone(),
            None => match self.monitor_id(ctx.config()) {
                Some((id, _)) => id,
                None => return Ok(()),
            },
        };
        ctx.start(Phase::Restore, &id).await?;
        if self.check == OutageCheck::Quorum {
            cleanup(ctx, &[PARTITION_KEY]).await;
        }
        Ok(())
    }
}

/// Starts whatever is stopped and waits for the cluster to come back.
#[derive(Debug, Default)]
pub struct Recovery {
    restarted: Vec<String>,
    expected_replicas: usize,
    expected_monitors: usize,
}

impl Recovery {
    fn recovered(&self, obs: &Observation) -> Result<(), String> {
        let snap = &obs.snapshot;
        if snap.master.is_none() {
            return Err("no master discovered".into());
        }
        if snap.replicas.len() < self.expected_replicas {
            return Err(format!(
                "{} of {} replicas visible",
                snap.replicas.len(),
                self.expected_replicas
            ));
        }
        let monitors = snap.reachable_monitors();
        if monitors < self.expected_monitors {
            return Err(format!(
                "{monitors} of {} monitors responding",
                self.expected_monitors
            ));
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl Scenario for Recovery {
    fn name(&self) -> &str {
        "recovery"
    }

    fn requires_healthy_baseline(&self) -> bool {
        false
    }

    async fn inject(
        &mut self,
        ctx: &mut Context<'_>,
        _baseline: Option<&Observation>,
    ) -> Result<(), ScenarioError> {
        let config = ctx.config();
        self.expected_replicas = config.expected_replicas;
        self.expected_monitors = config.expected_monitors;
        let ids: Vec<String> = config.nodes.iter().map(|n| n.id.clone()).collect();
        for id in ids {
            if !ctx.is_running(Phase::Fault, &id).await? {
                ctx.start(Phase::Fault, &id).await?;
                info!(node = %id, "restarted");
                self.restarted.push(id);
            }
        }
        Ok(())
    }

    async fn watch(&mut self, ctx: &mut Context<'_>) -> Result<WatchOutcome, ScenarioError> {
        let observation = ctx.poll_until(|obs| self.recovered(obs).is_ok()).await?;
        Ok(WatchOutcome::polled(observation))
    }

    fn verify(&self, outcome: &WatchOutcome) -> Result<(), String> {
        self.recovered(&outcome.observation)
    }

    async fn restore(&mut self, _ctx: &mut Context<'_>) -> Result<(), ScenarioError> {
        Ok(())
    }
}

/// A burst of writes to the master, read back from every replica.
#[derive(Debug, Default)]
pub struct Stress {
    writes: Vec<(String, String)>,
    replicated: usize,
}

#[async_trait(?Send)]
impl Scenario for Stress {
    fn name(&self) -> &str {
        "stress"
    }

    async fn inject(
        &mut self,
        ctx: &mut Context<'_>,
        _baseline: Option<&Observation>,
    ) -> Result<(), ScenarioError> {
        let master = current_master(ctx, Phase::Fault).await?;
        self.writes.clear();
        let run: u32 = rand::rng().random_range(0..u32::MAX);
        for i in 0..STRESS_WRITES {
            let key = format!("stress_test_{i}");
            let value = format!("Stress test data {i} - run {run:08x}");
            write(ctx, Phase::Fault, &master, &key, &value).await?;
            self.writes.push((key, value));
            ctx.sleep(STRESS_SPACING).await;
        }
        Ok(())
    }

    async fn watch(&mut self, ctx: &mut Context<'_>) -> Result<WatchOutcome, ScenarioError> {
        ctx.sleep(ctx.timing.settle()).await;
        let master = current_master(ctx, Phase::Watch).await?;
        let replicas = replicas_of(ctx, &master);

        self.replicated = 0;
        for (key, expected) in self.writes.clone() {
            let mut everywhere = true;
            for id in &replicas {
                match read(ctx, Phase::Watch, id, &key).await {
                    Ok(got) if got.as_deref() == Some(expected.as_str()) => {}
                    Ok(_) => everywhere = false,
                    Err(e) => {
                        debug!(node = %id, key = %key, error = %e, "stress read failed");
                        everywhere = false;
                    }
                }
            }
            if everywhere {
                self.replicated += 1;
            }
        }
        info!(
            replicated = self.replicated,
            total = self.writes.len(),
            "stress writes read back"
        );
        let observation = ctx.capture(Phase::Watch).await?;
        Ok(WatchOutcome::polled(observation))
    }

    fn verify(&self, _outcome: &WatchOutcome) -> Result<(), String> {
        let total = self.writes.len();
        if total == 0 {
            return Err("no writes made".into());
        }
        if self.replicated * 100 >= total * STRESS_PASS_PERCENT {
            Ok(())
        } else {
            Err(format!(
                "{}/{total} writes replicated ({:.1}%), need {STRESS_PASS_PERCENT}%",
                self.replicated,
                self.replicated as f64 * 100.0 / total as f64
            ))
        }
    }

    async fn restore(&mut self, ctx: &mut Context<'_>) -> Result<(), ScenarioError> {
        if !self.writes.is_empty() {
            let keys: Vec<&str> = self.writes.iter().map(|(k, _)| k.as_str()).collect();
            cleanup(ctx, &keys).await;
        }
        Ok(())
    }
}
