// src/core/api/node_active.rs

//! The periodic heartbeat every keeper sends. Validates the caller's
//! identity, persists the observed tuple, drives the group state machine,
//! and returns the node's current assignment.

use crate::core::api::{NodeActiveRequest, NodeAssignment};
use crate::core::errors::StewardError;
use crate::core::fsm;
use crate::core::monitor::Monitor;
use crate::core::state::node::format_lsn;
use crate::core::state::replication_state::ReplicationState;
use chrono::Utc;
use tracing::debug;

impl Monitor {
    /// Handles one heartbeat. Any error aborts the whole call without
    /// partial updates; the keeper retries and the next heartbeat recomputes
    /// from persisted state.
    pub async fn node_active(
        &self,
        req: &NodeActiveRequest,
    ) -> Result<NodeAssignment, StewardError> {
        let node_id = self
            .store
            .node_id_by_host_port(&req.host, req.port)
            .ok_or_else(|| StewardError::NotRegistered(req.host.clone(), req.port))?;
        let node = self
            .store
            .node(node_id)
            .ok_or_else(|| StewardError::NotRegistered(req.host.clone(), req.port))?;

        if node.formation_id != req.formation_id {
            return Err(StewardError::WrongFormation {
                requested: req.formation_id.clone(),
                actual: node.formation_id.clone(),
            });
        }
        if req.node_id > 0 && req.node_id != node.node_id {
            return Err(StewardError::NodeRemoved(req.node_id));
        }

        let _formation_guard = self.store.lock_formation_shared(&req.formation_id).await;

        let reported = ReplicationState::parse_lenient(&req.current_state);

        // The log position may only move forward within a timeline.
        if req.reported_tli < node.reported_tli {
            return Err(StewardError::InvalidStateTransition(format!(
                "node {} reported timeline {} behind the recorded timeline {}",
                node.name, req.reported_tli, node.reported_tli
            )));
        }
        let effective_lsn = if req.reported_tli == node.reported_tli
            && req.reported_lsn < node.reported_lsn
        {
            debug!(
                "node {} reported lsn {} behind recorded {}; keeping the recorded position",
                node.name,
                format_lsn(req.reported_lsn),
                format_lsn(node.reported_lsn)
            );
            node.reported_lsn
        } else {
            req.reported_lsn
        };

        let state_changed = reported != node.reported_state;
        let now = Utc::now();
        self.store.with_node_mut(node_id, |n| {
            n.reported_state = reported;
            n.reported_pg_is_running = req.pg_is_running;
            n.reported_tli = req.reported_tli;
            n.reported_lsn = effective_lsn;
            n.reported_sync_state = req.sync_state.clone();
            n.last_report_at = now;
        });

        if state_changed
            && let Some(updated) = self.store.node(node_id)
        {
            self.publish(
                &updated,
                &format!("node reports state {reported} (goal {})", updated.goal_state),
            );
        }

        let _group_guard = self
            .store
            .lock_group(&node.formation_id, node.group_id)
            .await;
        fsm::proceed_group_state(self, &node.formation_id, node.group_id)?;

        let node = self
            .store
            .node(node_id)
            .ok_or(StewardError::NodeRemoved(node_id))?;
        Ok(NodeAssignment::from(&node))
    }
}
