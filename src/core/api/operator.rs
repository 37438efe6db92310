// src/core/api/operator.rs

//! Operator-facing operations: failover, targeted promotion, maintenance,
//! settings changes, and node removal. Each one validates its
//! preconditions under the formation and group locks, writes the new goal
//! states, and lets the group state machine carry the group from there.

use crate::core::errors::StewardError;
use crate::core::fsm::{self, FsmContext, FsmPlan, election};
use crate::core::monitor::Monitor;
use crate::core::state::node::Node;
use crate::core::state::replication_state::ReplicationState;
use chrono::Utc;

fn fsm_context(monitor: &Monitor) -> FsmContext {
    FsmContext {
        config: monitor.config(),
        now: Utc::now(),
        uptime: monitor.started_at.elapsed(),
    }
}

impl Monitor {
    fn resolve_node(
        &self,
        node_id: Option<i64>,
        host: Option<&str>,
        port: Option<u16>,
    ) -> Result<Node, StewardError> {
        if let Some(id) = node_id
            && id > 0
        {
            return self
                .store
                .node(id)
                .ok_or_else(|| StewardError::InvalidRequest(format!("node {id} is not registered")));
        }
        if let (Some(host), Some(port)) = (host, port) {
            let id = self
                .store
                .node_id_by_host_port(host, port)
                .ok_or_else(|| StewardError::NotRegistered(host.to_string(), port))?;
            return self
                .store
                .node(id)
                .ok_or_else(|| StewardError::NotRegistered(host.to_string(), port));
        }
        Err(StewardError::InvalidRequest(
            "a node id or a host and port are required".to_string(),
        ))
    }

    /// Starts a failover election for the group: the primary drains while
    /// every surviving peer reports its log position.
    pub async fn perform_failover(
        &self,
        formation_id: &str,
        group_id: i32,
    ) -> Result<(), StewardError> {
        let _formation_guard = self.store.lock_formation_shared(formation_id).await;
        let _group_guard = self.store.lock_group(formation_id, group_id).await;
        self.store.formation(formation_id)?;

        let nodes = self.store.group_nodes(formation_id, group_id);
        if nodes.is_empty() {
            return Err(StewardError::PreconditionFailed(format!(
                "group {group_id} of formation \"{formation_id}\" has no nodes"
            )));
        }
        if nodes.len() < 2 {
            return Err(StewardError::PreconditionFailed(
                "cannot fail over a group with a single node".to_string(),
            ));
        }
        if election::in_progress(&nodes) {
            return Err(StewardError::PreconditionFailed(
                "a failover is already in progress".to_string(),
            ));
        }

        let primary = nodes.iter().find(|n| n.goal_state.can_take_writes());
        let has_candidate = nodes.iter().any(|n| {
            primary.is_none_or(|p| p.node_id != n.node_id)
                && n.candidate_priority > 0
                && n.health != crate::core::state::node::NodeHealth::Bad
                && !n.goal_state.is_in_maintenance()
                && n.goal_state != ReplicationState::Dropped
        });
        if !has_candidate {
            return Err(StewardError::PreconditionFailed(
                "no standby is eligible for promotion".to_string(),
            ));
        }

        let mut plan = FsmPlan::default();
        election::start_election(&nodes, primary, "an operator requested a failover", &mut plan);
        let ctx = fsm_context(self);
        fsm::apply_plan(self, &ctx, formation_id, group_id, plan)
    }

    /// A failover targeted at one node by name. The target must be
    /// promotion-eligible and close enough to the primary's log position;
    /// the election itself still guarantees no committed write is lost.
    pub async fn perform_promotion(
        &self,
        formation_id: &str,
        node_name: &str,
    ) -> Result<bool, StewardError> {
        let _formation_guard = self.store.lock_formation_shared(formation_id).await;
        self.store.formation(formation_id)?;
        let target = self
            .store
            .node_by_name(formation_id, node_name)
            .ok_or_else(|| {
                StewardError::InvalidRequest(format!(
                    "formation \"{formation_id}\" has no node named \"{node_name}\""
                ))
            })?;
        let _group_guard = self.store.lock_group(formation_id, target.group_id).await;

        // Re-read under the group lock.
        let nodes = self.store.group_nodes(formation_id, target.group_id);
        let target = nodes
            .iter()
            .find(|n| n.node_id == target.node_id)
            .ok_or(StewardError::NodeRemoved(target.node_id))?;

        if target.goal_state.can_take_writes() {
            return Ok(false);
        }
        if target.candidate_priority == 0 {
            return Err(StewardError::PreconditionFailed(format!(
                "node \"{node_name}\" has candidate priority 0 and can never be promoted"
            )));
        }
        if election::in_progress(&nodes) {
            return Err(StewardError::PreconditionFailed(
                "a failover is already in progress".to_string(),
            ));
        }

        let primary = nodes.iter().find(|n| n.goal_state.can_take_writes());
        if let Some(p) = primary {
            let lag = p.reported_lsn.saturating_sub(target.reported_lsn);
            let max_lag = self.config().promotion_max_lag;
            if lag > max_lag {
                return Err(StewardError::PreconditionFailed(format!(
                    "node \"{node_name}\" is {lag} bytes behind the primary (limit {max_lag})"
                )));
            }
        }

        self.store
            .with_node_mut(target.node_id, |n| n.promotion_requested = true);

        let mut plan = FsmPlan::default();
        election::start_election(
            &nodes,
            primary,
            &format!("an operator requested promotion of node \"{node_name}\""),
            &mut plan,
        );
        let ctx = fsm_context(self);
        fsm::apply_plan(self, &ctx, formation_id, target.group_id, plan)?;
        Ok(true)
    }

    /// Takes a node offline for operator intervention. Taking the primary
    /// down first hands its role to a standby through a regular election.
    pub async fn start_maintenance(&self, node_id: i64) -> Result<bool, StewardError> {
        let node = self.resolve_node(Some(node_id), None, None)?;
        let _formation_guard = self.store.lock_formation_shared(&node.formation_id).await;
        let _group_guard = self
            .store
            .lock_group(&node.formation_id, node.group_id)
            .await;

        let nodes = self.store.group_nodes(&node.formation_id, node.group_id);
        let node = nodes
            .iter()
            .find(|n| n.node_id == node_id)
            .ok_or(StewardError::NodeRemoved(node_id))?;

        if node.goal_state.is_in_maintenance() {
            return Ok(false);
        }
        if nodes.len() < 2 {
            return Err(StewardError::PreconditionFailed(
                "cannot start maintenance in a group with a single node".to_string(),
            ));
        }
        if election::in_progress(&nodes) {
            return Err(StewardError::PreconditionFailed(
                "a failover is already in progress".to_string(),
            ));
        }

        let mut plan = FsmPlan::default();
        if node.goal_state.can_take_writes() {
            let has_candidate = nodes.iter().any(|n| {
                n.node_id != node.node_id
                    && n.candidate_priority > 0
                    && n.health != crate::core::state::node::NodeHealth::Bad
                    && !n.goal_state.is_in_maintenance()
                    && n.goal_state != ReplicationState::Dropped
            });
            if !has_candidate {
                return Err(StewardError::PreconditionFailed(
                    "no standby could take over from the primary".to_string(),
                ));
            }
            plan.assign(
                node,
                ReplicationState::PrepareMaintenance,
                "maintenance requested; hand the primary role to a standby",
            );
            for peer in &nodes {
                if peer.node_id == node.node_id
                    || peer.goal_state.is_in_maintenance()
                    || peer.goal_state == ReplicationState::Dropped
                {
                    continue;
                }
                plan.assign(
                    peer,
                    ReplicationState::ReportLsn,
                    "the primary is leaving for maintenance; report the current log position",
                );
            }
        } else {
            let primary = nodes
                .iter()
                .find(|n| n.goal_state.can_take_writes())
                .ok_or_else(|| {
                    StewardError::PreconditionFailed(
                        "the group has no writable node to coordinate maintenance".to_string(),
                    )
                })?;
            plan.assign(
                node,
                ReplicationState::WaitMaintenance,
                "maintenance requested; waiting for the primary to adjust",
            );
            let primary_goal = if nodes.len() == 2 {
                ReplicationState::WaitPrimary
            } else {
                ReplicationState::JoinPrimary
            };
            plan.assign(
                primary,
                primary_goal,
                "a standby is leaving for maintenance; adjusting replication",
            );
        }

        let ctx = fsm_context(self);
        fsm::apply_plan(self, &ctx, &node.formation_id, node.group_id, plan)?;
        Ok(true)
    }

    /// Brings a node back from maintenance; it rejoins as a catching-up
    /// standby and the usual convergence rules take over.
    pub async fn stop_maintenance(&self, node_id: i64) -> Result<bool, StewardError> {
        let node = self.resolve_node(Some(node_id), None, None)?;
        let _formation_guard = self.store.lock_formation_shared(&node.formation_id).await;
        let _group_guard = self
            .store
            .lock_group(&node.formation_id, node.group_id)
            .await;

        let nodes = self.store.group_nodes(&node.formation_id, node.group_id);
        let node = nodes
            .iter()
            .find(|n| n.node_id == node_id)
            .ok_or(StewardError::NodeRemoved(node_id))?;

        if !node.goal_state.is_in_maintenance() {
            return Err(StewardError::PreconditionFailed(format!(
                "node \"{}\" is not in maintenance",
                node.name
            )));
        }
        if election::in_progress(&nodes) {
            return Err(StewardError::PreconditionFailed(
                "a failover is in progress; retry once it settles".to_string(),
            ));
        }

        let mut plan = FsmPlan::default();
        plan.assign(
            node,
            ReplicationState::Catchingup,
            "maintenance is over; rejoin replication",
        );
        let ctx = fsm_context(self);
        fsm::apply_plan(self, &ctx, &node.formation_id, node.group_id, plan)?;
        fsm::proceed_group_state(self, &node.formation_id, node.group_id)?;
        Ok(true)
    }

    /// Changes a node's candidate priority. A group of two or more members
    /// must keep at least two promotion candidates.
    pub async fn set_node_candidate_priority(
        &self,
        node_id: i64,
        host: Option<&str>,
        port: Option<u16>,
        value: i32,
    ) -> Result<bool, StewardError> {
        if !(0..=100).contains(&value) {
            return Err(StewardError::InvalidRequest(format!(
                "candidate priority {value} is out of range 0..100"
            )));
        }
        let node = self.resolve_node((node_id > 0).then_some(node_id), host, port)?;
        let _formation_guard = self.store.lock_formation_shared(&node.formation_id).await;
        let _group_guard = self
            .store
            .lock_group(&node.formation_id, node.group_id)
            .await;

        let nodes = self.store.group_nodes(&node.formation_id, node.group_id);
        let before = nodes.iter().filter(|n| n.candidate_priority > 0).count();
        let after = nodes
            .iter()
            .filter(|n| {
                let priority = if n.node_id == node.node_id {
                    value
                } else {
                    n.candidate_priority
                };
                priority > 0
            })
            .count();
        if nodes.len() >= 2 && after < 2 && after < before {
            return Err(StewardError::PreconditionFailed(
                "a group of two or more nodes needs at least two failover candidates".to_string(),
            ));
        }

        self.store
            .with_node_mut(node.node_id, |n| n.candidate_priority = value);
        if let Some(updated) = self.store.node(node.node_id) {
            self.publish(&updated, &format!("candidate priority set to {value}"));
        }
        self.apply_settings_on_primary(&node.formation_id, node.group_id)?;
        Ok(true)
    }

    /// Changes a node's participation in the durable-write quorum. The
    /// formation must keep `number_sync_standbys + 1` quorum participants.
    pub async fn set_node_replication_quorum(
        &self,
        node_id: i64,
        host: Option<&str>,
        port: Option<u16>,
        value: bool,
    ) -> Result<bool, StewardError> {
        let node = self.resolve_node((node_id > 0).then_some(node_id), host, port)?;
        let _formation_guard = self.store.lock_formation_shared(&node.formation_id).await;
        let _group_guard = self
            .store
            .lock_group(&node.formation_id, node.group_id)
            .await;

        if !value {
            let formation = self.store.formation(&node.formation_id)?;
            let nodes = self.store.group_nodes(&node.formation_id, node.group_id);
            let participants_after = nodes
                .iter()
                .filter(|n| {
                    let quorum = if n.node_id == node.node_id {
                        false
                    } else {
                        n.replication_quorum
                    };
                    quorum && n.candidate_priority > 0
                })
                .count();
            let required = formation.number_sync_standbys as usize + 1;
            if participants_after < required {
                return Err(StewardError::PreconditionFailed(format!(
                    "the group needs {required} quorum participants and would keep only {participants_after}"
                )));
            }
        }

        self.store
            .with_node_mut(node.node_id, |n| n.replication_quorum = value);
        if let Some(updated) = self.store.node(node.node_id) {
            self.publish(&updated, &format!("replication quorum set to {value}"));
        }
        self.apply_settings_on_primary(&node.formation_id, node.group_id)?;
        Ok(true)
    }

    /// Routes the primary through apply_settings so the new
    /// synchronous-replication string is installed atomically.
    fn apply_settings_on_primary(
        &self,
        formation_id: &str,
        group_id: i32,
    ) -> Result<(), StewardError> {
        let nodes = self.store.group_nodes(formation_id, group_id);
        let Some(primary) = nodes
            .iter()
            .find(|n| n.goal_state == ReplicationState::Primary)
        else {
            return Ok(());
        };
        let mut plan = FsmPlan::default();
        plan.assign(
            primary,
            ReplicationState::ApplySettings,
            "replication settings changed; applying the new configuration",
        );
        let ctx = fsm_context(self);
        fsm::apply_plan(self, &ctx, formation_id, group_id, plan)
    }

    /// Unregisters a node. Removing the current primary first drives every
    /// surviving peer into the report-lsn election, then deletes the row;
    /// the election proceeds with the standby set alone.
    pub async fn remove_node(
        &self,
        node_id: Option<i64>,
        host: Option<&str>,
        port: Option<u16>,
        force: bool,
    ) -> Result<bool, StewardError> {
        let node = self.resolve_node(node_id, host, port)?;
        let _formation_guard = self
            .store
            .lock_formation_exclusive(&node.formation_id)
            .await;
        let _group_guard = self
            .store
            .lock_group(&node.formation_id, node.group_id)
            .await;

        let nodes = self.store.group_nodes(&node.formation_id, node.group_id);
        let node = nodes
            .iter()
            .find(|n| n.node_id == node.node_id)
            .ok_or(StewardError::NodeRemoved(node.node_id))?
            .clone();
        let peers: Vec<&Node> = nodes
            .iter()
            .filter(|n| n.node_id != node.node_id)
            .collect();

        if node.goal_state.can_take_writes() && !peers.is_empty() {
            let candidates: Vec<&&Node> = peers
                .iter()
                .filter(|n| {
                    n.candidate_priority > 0
                        && n.health != crate::core::state::node::NodeHealth::Bad
                        && !n.goal_state.is_in_maintenance()
                        && n.goal_state != ReplicationState::Dropped
                })
                .collect();
            if candidates.is_empty() && !force {
                return Err(StewardError::PreconditionFailed(
                    "removing the primary would leave no failover candidate; use force to proceed"
                        .to_string(),
                ));
            }
            let mut plan = FsmPlan::default();
            for peer in &peers {
                if peer.goal_state.is_in_maintenance()
                    || peer.goal_state == ReplicationState::Dropped
                {
                    continue;
                }
                plan.assign(
                    peer,
                    ReplicationState::ReportLsn,
                    "the primary is being removed; report the current log position",
                );
            }
            let ctx = fsm_context(self);
            fsm::apply_plan(self, &ctx, &node.formation_id, node.group_id, plan)?;
        }

        self.publish(&node, "node removed from the monitor");
        self.store.remove_node(node.node_id);
        fsm::proceed_group_state(self, &node.formation_id, node.group_id)?;
        Ok(true)
    }
}
