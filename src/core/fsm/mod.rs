// src/core/fsm/mod.rs

//! The per-group finite state machine.
//!
//! `compute_transitions` is a pure function over a snapshot of one group's
//! nodes: it classifies the group, decides the next goal state for each
//! node, and returns the planned assignments without touching the store.
//! `proceed_group_state` snapshots, computes, and applies under the
//! caller-held group lock, so transitions stay linearizable per group.
//!
//! Each invocation performs at most one round of transitions; progress is
//! made on every incoming heartbeat, never by looping internally.

pub mod election;

use crate::config::MonitorConfig;
use crate::core::errors::StewardError;
use crate::core::monitor::Monitor;
use crate::core::state::node::Node;
use crate::core::state::replication_state::ReplicationState;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything a transition decision may depend on besides the group itself.
#[derive(Debug, Clone)]
pub struct FsmContext {
    pub config: Arc<MonitorConfig>,
    pub now: DateTime<Utc>,
    /// Time since monitor boot, for the startup grace period.
    pub uptime: Duration,
}

/// One planned goal-state assignment.
#[derive(Debug, Clone)]
pub struct Transition {
    pub node_id: i64,
    pub new_goal: ReplicationState,
    pub description: String,
}

/// The outcome of one FSM round.
#[derive(Debug, Clone, Default)]
pub struct FsmPlan {
    pub transitions: Vec<Transition>,
    /// Set when a failover election picked its winner this round; consumes
    /// any pending targeted-promotion request.
    pub election_resolved: bool,
}

impl FsmPlan {
    /// Plans a goal change for `node`. Re-assigning the current goal is a
    /// no-op so stable states do not generate event noise; a later rule
    /// assigning the same node overrides an earlier one.
    pub fn assign(&mut self, node: &Node, new_goal: ReplicationState, description: impl Into<String>) {
        if node.goal_state == new_goal {
            return;
        }
        self.transitions.retain(|t| t.node_id != node.node_id);
        self.transitions.push(Transition {
            node_id: node.node_id,
            new_goal,
            description: description.into(),
        });
    }

    /// The goal `node` will have once this plan is applied.
    pub fn planned_goal(&self, node: &Node) -> ReplicationState {
        self.transitions
            .iter()
            .find(|t| t.node_id == node.node_id)
            .map(|t| t.new_goal)
            .unwrap_or(node.goal_state)
    }
}

pub(crate) fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Computes the next round of goal-state assignments for one group.
pub fn compute_transitions(nodes: &[Node], ctx: &FsmContext) -> Result<FsmPlan, StewardError> {
    let mut plan = FsmPlan::default();
    if nodes.is_empty() {
        return Ok(plan);
    }

    if election::in_progress(nodes) {
        election::proceed(nodes, ctx, &mut plan)?;
    } else {
        steady_state(nodes, ctx, &mut plan)?;
    }

    enforce_invariants(nodes, &plan)?;
    Ok(plan)
}

/// Transition rules outside of a failover election.
fn steady_state(nodes: &[Node], ctx: &FsmContext, plan: &mut FsmPlan) -> Result<(), StewardError> {
    use ReplicationState::*;

    if nodes.len() == 1 {
        let node = &nodes[0];
        if !node.goal_state.is_in_maintenance()
            && node.goal_state != Dropped
            && node.goal_state != Single
        {
            plan.assign(
                node,
                Single,
                "this node is the only one left in the group; assigning single",
            );
        }
        return Ok(());
    }

    let Some(primary) = nodes.iter().find(|n| n.goal_state.can_take_writes()) else {
        // No writable node and no election underway. Start one when a
        // candidate exists at all, otherwise wait for the operator.
        let has_candidate = nodes.iter().any(|n| {
            n.candidate_priority > 0 && !n.goal_state.is_in_maintenance() && n.goal_state != Dropped
        });
        if has_candidate {
            election::start_election(nodes, None, "no writable node left in the group", plan);
        }
        return Ok(());
    };

    let standbys: Vec<&Node> = nodes
        .iter()
        .filter(|n| n.node_id != primary.node_id)
        .collect();

    if primary_failed(primary, &standbys, ctx) {
        election::start_election(nodes, Some(primary), "the primary is unhealthy", plan);
        return Ok(());
    }

    let healthy_secondary = standbys.iter().any(|s| {
        s.goal_state == Secondary
            && s.reported_state == Secondary
            && s.health != crate::core::state::node::NodeHealth::Bad
    });
    let joining = standbys.iter().any(|s| s.goal_state == WaitStandby);
    let pending_maintenance = standbys.iter().any(|s| s.goal_state == WaitMaintenance);

    for s in &standbys {
        match s.goal_state {
            WaitStandby => {
                if primary.reported_state.is_in_wait_or_join() {
                    plan.assign(s, Catchingup, "the primary is ready; start catching up");
                }
            }
            Catchingup => {
                if s.reported_state == Catchingup
                    && s.reported_pg_is_running
                    && s.reported_lsn > 0
                    && s.reported_tli >= primary.reported_tli
                {
                    plan.assign(s, Secondary, "standby has caught up with the primary");
                }
            }
            ReportLsn => {
                // Left over from an election that resolved without this node.
                if s.reported_lsn < primary.reported_lsn {
                    plan.assign(
                        s,
                        FastForward,
                        "the election is over; fast forward to the new primary",
                    );
                } else {
                    plan.assign(s, Catchingup, "the election is over; rejoin the new primary");
                }
            }
            FastForward => {
                if s.reported_state == FastForward {
                    plan.assign(
                        s,
                        Catchingup,
                        "fast forward complete; catching up with the new primary",
                    );
                }
            }
            Demoted | DemoteTimeout => {
                if matches!(s.reported_state, Demoted | DemoteTimeout)
                    && primary.reported_state.can_take_writes()
                {
                    plan.assign(s, Catchingup, "rejoining as a standby of the new primary");
                }
            }
            WaitMaintenance => {
                if primary.reported_state.is_in_wait_or_join() {
                    plan.assign(
                        s,
                        Maintenance,
                        "the primary no longer waits for this standby; proceed to maintenance",
                    );
                }
            }
            _ => {}
        }
    }

    match primary.goal_state {
        Single => {
            if joining && primary.reported_state == Single {
                let goal = if nodes.len() == 2 { WaitPrimary } else { JoinPrimary };
                plan.assign(primary, goal, "a new standby joined; preparing to accept it");
            }
        }
        WaitPrimary | JoinPrimary => {
            if primary.reported_state.is_in_wait_or_join()
                && healthy_secondary
                && !joining
                && !pending_maintenance
            {
                plan.assign(
                    primary,
                    Primary,
                    "a standby is in sync; enabling synchronous replication",
                );
            }
        }
        Primary => {
            if !healthy_secondary {
                plan.assign(
                    primary,
                    WaitPrimary,
                    "no healthy standby left; relaxing synchronous replication",
                );
            } else if joining && primary.reported_state == Primary {
                plan.assign(
                    primary,
                    JoinPrimary,
                    "a new standby joined; preparing to accept it",
                );
            }
        }
        ApplySettings => {
            if primary.reported_state == ApplySettings {
                let goal = if healthy_secondary { Primary } else { WaitPrimary };
                plan.assign(primary, goal, "replication settings applied");
            }
        }
        _ => {}
    }

    Ok(())
}

/// Whether the primary qualifies for automatic failover.
fn primary_failed(primary: &Node, standbys: &[&Node], ctx: &FsmContext) -> bool {
    use crate::core::state::node::NodeHealth;
    use ReplicationState::*;

    if ctx.uptime < ctx.config.startup_grace_period {
        return false;
    }
    if primary.health != NodeHealth::Bad {
        return false;
    }
    let unhealthy_after = chrono_duration(ctx.config.node_considered_unhealthy_timeout);
    if ctx.now - primary.health_changed_at < unhealthy_after {
        return false;
    }
    if ctx.now - primary.last_report_at < unhealthy_after {
        return false;
    }
    standbys.iter().any(|s| {
        s.candidate_priority > 0 && s.health != NodeHealth::Bad && s.goal_state == Secondary
    })
}

/// A transition round must never plan two writable nodes, nor two nodes in
/// wait_standby. A violation is an internal bug; the whole round aborts and
/// the group is left unchanged.
fn enforce_invariants(nodes: &[Node], plan: &FsmPlan) -> Result<(), StewardError> {
    let mut writable = 0usize;
    let mut wait_standby = 0usize;
    for node in nodes {
        let goal = plan.planned_goal(node);
        if goal.can_take_writes() {
            writable += 1;
        }
        if goal == ReplicationState::WaitStandby {
            wait_standby += 1;
        }
    }
    if writable > 1 {
        return Err(StewardError::Internal(format!(
            "transition round would leave {writable} writable nodes in group {}/{}",
            nodes[0].formation_id, nodes[0].group_id
        )));
    }
    if wait_standby > 1 {
        return Err(StewardError::Internal(format!(
            "transition round would leave {wait_standby} nodes in wait_standby in group {}/{}",
            nodes[0].formation_id, nodes[0].group_id
        )));
    }
    Ok(())
}

/// Snapshots the group, computes one round of transitions, and applies it.
///
/// Callers must hold the exclusive group lock (and at least a shared
/// formation lock); this function never takes locks itself.
pub fn proceed_group_state(
    monitor: &Monitor,
    formation_id: &str,
    group_id: i32,
) -> Result<(), StewardError> {
    monitor.store.formation(formation_id)?;
    let nodes = monitor.store.group_nodes(formation_id, group_id);
    let ctx = FsmContext {
        config: monitor.config(),
        now: Utc::now(),
        uptime: monitor.started_at.elapsed(),
    };
    let plan = compute_transitions(&nodes, &ctx)?;
    apply_plan(monitor, &ctx, formation_id, group_id, plan)
}

/// Writes the planned assignments back to the store and publishes one event
/// per transition.
pub(crate) fn apply_plan(
    monitor: &Monitor,
    ctx: &FsmContext,
    formation_id: &str,
    group_id: i32,
    plan: FsmPlan,
) -> Result<(), StewardError> {
    for t in &plan.transitions {
        let updated = monitor.store.with_node_mut(t.node_id, |n| {
            n.goal_state = t.new_goal;
            n.state_changed_at = ctx.now;
        });
        if !updated {
            continue;
        }
        if let Some(node) = monitor.store.node(t.node_id) {
            info!(
                "{}/{}: node {} assigned {} ({})",
                formation_id, group_id, node.name, t.new_goal, t.description
            );
            monitor.publish(&node, &t.description);
        }
    }
    if plan.election_resolved {
        for node in monitor.store.group_nodes(formation_id, group_id) {
            if node.promotion_requested {
                monitor
                    .store
                    .with_node_mut(node.node_id, |n| n.promotion_requested = false);
            }
        }
    }
    Ok(())
}
