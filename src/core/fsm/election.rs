// src/core/fsm/election.rs

//! The report-lsn failover election.
//!
//! An election runs in two phases. In the gathering phase every surviving
//! peer is assigned `report_lsn` and the monitor waits for their heartbeats
//! to persist a current log position. Once every eligible peer has reported
//! (or the election timeout elapses), the winner is the reporter with the
//! highest (timeline, lsn) pair among those with a non-zero candidate
//! priority; zero-priority nodes still report, serving as quorum witnesses
//! for the log position. The promotion phase then walks the winner through
//! prepare_promotion, stop_replication, and wait_primary while the former
//! primary is demoted and lagging peers are routed to fast_forward.

use super::{FsmContext, FsmPlan, chrono_duration};
use crate::core::errors::StewardError;
use crate::core::state::node::{Node, NodeHealth, format_lsn};
use crate::core::state::replication_state::ReplicationState;
use std::cmp::Reverse;
use tracing::warn;

/// Whether any node of the group is inside the failover machinery.
pub(crate) fn in_progress(nodes: &[Node]) -> bool {
    nodes.iter().any(|n| {
        n.goal_state.is_being_promoted()
            || n.goal_state == ReplicationState::ReportLsn
            || n.goal_state == ReplicationState::Draining
    })
}

/// Plans the start of an election: the current primary (when present)
/// drains, every non-maintenance peer reports its log position.
pub(crate) fn start_election(
    nodes: &[Node],
    primary: Option<&Node>,
    reason: &str,
    plan: &mut FsmPlan,
) {
    if let Some(p) = primary {
        plan.assign(
            p,
            ReplicationState::Draining,
            format!("failover: {reason}; stop accepting writes"),
        );
    }
    for node in nodes {
        if primary.is_some_and(|p| p.node_id == node.node_id) {
            continue;
        }
        if node.goal_state.is_in_maintenance() || node.goal_state == ReplicationState::Dropped {
            continue;
        }
        plan.assign(
            node,
            ReplicationState::ReportLsn,
            format!("failover: {reason}; report the current log position"),
        );
    }
}

/// Advances an election that is already underway by one round.
pub(crate) fn proceed(
    nodes: &[Node],
    ctx: &FsmContext,
    plan: &mut FsmPlan,
) -> Result<(), StewardError> {
    use ReplicationState::*;

    let old_primary = nodes
        .iter()
        .find(|n| matches!(n.goal_state, Draining | PrepareMaintenance));

    if let Some(winner) = nodes.iter().find(|n| n.goal_state.is_being_promoted()) {
        proceed_promotion(nodes, winner, old_primary, ctx, plan);
        return Ok(());
    }

    let eligible: Vec<&Node> = nodes
        .iter()
        .filter(|n| n.goal_state == ReportLsn)
        .collect();
    if eligible.is_empty() {
        // Only the draining primary is left; nobody to promote.
        if let Some(old) = old_primary {
            restore_primary(old, "no failover candidates left", plan);
        }
        return Ok(());
    }

    let all_reported = eligible.iter().all(|n| n.reported_state == ReportLsn);
    let started_at = eligible
        .iter()
        .map(|n| n.state_changed_at)
        .max()
        .expect("eligible is non-empty");
    let timed_out = ctx.now - started_at > chrono_duration(ctx.config.election_timeout);

    if !all_reported && !timed_out {
        return Ok(());
    }

    let reporters: Vec<&Node> = eligible
        .iter()
        .copied()
        .filter(|n| n.reported_state == ReportLsn)
        .collect();
    let unhealthy_after = chrono_duration(ctx.config.node_considered_unhealthy_timeout);
    let candidates: Vec<&Node> = reporters
        .iter()
        .copied()
        .filter(|n| n.candidate_priority > 0)
        .filter(|n| n.health != NodeHealth::Bad || ctx.now - n.last_report_at < unhealthy_after)
        .collect();

    if candidates.is_empty() {
        if timed_out {
            if let Some(old) = old_primary {
                restore_primary(old, "no healthy candidate reported in time", plan);
            }
            for node in &reporters {
                plan.assign(node, Catchingup, "failover aborted; resume replication");
            }
        }
        return Ok(());
    }

    let winner = candidates
        .iter()
        .copied()
        .max_by_key(|n| {
            (
                n.reported_tli,
                n.reported_lsn,
                n.health.rank(),
                Reverse(n.node_id),
            )
        })
        .expect("candidates is non-empty");

    if let Some(requested) = eligible
        .iter()
        .find(|n| n.promotion_requested && n.node_id != winner.node_id)
    {
        warn!(
            "targeted promotion of node {} outranked by node {} at (tli {}, lsn {}); promoting the safe winner",
            requested.name,
            winner.name,
            winner.reported_tli,
            format_lsn(winner.reported_lsn)
        );
    }

    plan.assign(
        winner,
        PreparePromotion,
        format!(
            "elected as the failover winner (tli {}, lsn {})",
            winner.reported_tli,
            format_lsn(winner.reported_lsn)
        ),
    );
    for loser in &eligible {
        if loser.node_id == winner.node_id || loser.reported_state != ReportLsn {
            continue;
        }
        if loser.reported_lsn < winner.reported_lsn {
            plan.assign(
                loser,
                FastForward,
                "behind the election winner; fast forward before rejoining",
            );
        } else {
            plan.assign(loser, Catchingup, "the election is over; rejoin as a standby");
        }
    }
    plan.election_resolved = true;
    Ok(())
}

/// Walks the election winner through its promotion sequence and demotes the
/// former primary once the winner has cut its replication link.
fn proceed_promotion(
    nodes: &[Node],
    winner: &Node,
    old_primary: Option<&Node>,
    ctx: &FsmContext,
    plan: &mut FsmPlan,
) {
    use ReplicationState::*;

    // A winner that dies mid-promotion would wedge the group; restart the
    // election without it.
    let unhealthy_after = chrono_duration(ctx.config.node_considered_unhealthy_timeout);
    if winner.health == NodeHealth::Bad
        && ctx.now - winner.health_changed_at > unhealthy_after
        && ctx.now - winner.last_report_at > unhealthy_after
    {
        warn!(
            "promotion candidate {} stopped responding; restarting the election",
            winner.name
        );
        for node in nodes {
            if old_primary.is_some_and(|p| p.node_id == node.node_id)
                || node.goal_state.is_in_maintenance()
                || node.goal_state == Dropped
            {
                continue;
            }
            plan.assign(
                node,
                ReportLsn,
                "the promotion candidate failed; report the current log position",
            );
        }
        return;
    }

    match winner.goal_state {
        PreparePromotion => {
            if winner.reported_state == PreparePromotion {
                plan.assign(winner, StopReplication, "stop replication and take over");
            }
        }
        StopReplication => {
            if winner.reported_state == StopReplication
                || winner.reported_state.can_take_writes()
            {
                plan.assign(winner, WaitPrimary, "promoting to primary");
                if let Some(old) = old_primary {
                    if old.goal_state == PrepareMaintenance {
                        plan.assign(
                            old,
                            WaitMaintenance,
                            "handed off to the new primary; proceed to maintenance",
                        );
                    } else if matches!(old.reported_state, Draining | Demoted | DemoteTimeout) {
                        plan.assign(old, Demoted, "a new primary has taken over");
                    } else {
                        plan.assign(
                            old,
                            DemoteTimeout,
                            "never confirmed draining; forcing demotion",
                        );
                    }
                }
            }
        }
        _ => {}
    }
}

/// Aborts the election, putting the previous primary back in charge. It is
/// restored to wait_primary rather than primary so the usual convergence
/// rules re-establish synchronous replication only once a standby is back
/// in sync.
fn restore_primary(old_primary: &Node, reason: &str, plan: &mut FsmPlan) {
    plan.assign(
        old_primary,
        ReplicationState::WaitPrimary,
        format!("failover aborted: {reason}; restoring the primary"),
    );
}
