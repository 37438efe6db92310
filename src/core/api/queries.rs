// src/core/api/queries.rs

//! Read-only views over the monitor's state. None of these take locks: the
//! node table is authoritative and a racing transition simply shows up in
//! the next read.

use crate::core::errors::StewardError;
use crate::core::monitor::Monitor;
use crate::core::state::event::StateEvent;
use crate::core::state::node::Node;
use crate::core::state::replication_state::ReplicationState;
use crate::core::sync_standbys;
use serde::Serialize;

/// Monitor identity and counters, served by the `status` operation.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub run_id: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub formations: usize,
    pub nodes: usize,
}

impl Monitor {
    /// All nodes of a formation, optionally restricted to one group,
    /// ordered by (group, node id).
    pub fn get_nodes(
        &self,
        formation_id: &str,
        group_id: Option<i32>,
    ) -> Result<Vec<Node>, StewardError> {
        self.store.formation(formation_id)?;
        let nodes = match group_id {
            Some(group) => self.store.group_nodes(formation_id, group),
            None => self.store.formation_nodes(formation_id),
        };
        Ok(nodes)
    }

    /// The writable node of a group. Errors when no node currently holds a
    /// writable goal.
    pub fn get_primary(&self, formation_id: &str, group_id: i32) -> Result<Node, StewardError> {
        self.store.formation(formation_id)?;
        self.store
            .group_nodes(formation_id, group_id)
            .into_iter()
            .find(|n| n.goal_state.can_take_writes())
            .ok_or_else(|| {
                StewardError::PreconditionFailed(format!(
                    "group {group_id} of formation \"{formation_id}\" has no writable node"
                ))
            })
    }

    /// The peers of a node, optionally filtered by their reported state.
    pub fn get_other_nodes(
        &self,
        node_id: i64,
        state: Option<ReplicationState>,
    ) -> Result<Vec<Node>, StewardError> {
        let node = self
            .store
            .node(node_id)
            .ok_or_else(|| StewardError::InvalidRequest(format!("node {node_id} is not registered")))?;
        let peers = self
            .store
            .group_nodes(&node.formation_id, node.group_id)
            .into_iter()
            .filter(|n| n.node_id != node_id)
            .filter(|n| state.is_none_or(|s| n.reported_state == s))
            .collect();
        Ok(peers)
    }

    /// The formation's current state vector; the `current_state` view.
    pub fn current_state(
        &self,
        formation_id: &str,
        group_id: Option<i32>,
    ) -> Result<Vec<Node>, StewardError> {
        self.get_nodes(formation_id, group_id)
    }

    /// The most recent events, newest first.
    pub fn last_events(
        &self,
        formation_id: Option<&str>,
        group_id: Option<i32>,
        count: usize,
    ) -> Vec<StateEvent> {
        self.store.last_events(formation_id, group_id, count)
    }

    /// The synchronous-replication string the group's primary must install.
    /// `None` means the group does not exist (or has no nodes at all).
    pub fn synchronous_standby_names(
        &self,
        formation_id: &str,
        group_id: i32,
    ) -> Result<Option<String>, StewardError> {
        let formation = self.store.formation(formation_id)?;
        let nodes = self.store.group_nodes(formation_id, group_id);
        Ok(sync_standbys::synchronous_standby_names(&formation, &nodes))
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            run_id: self.run_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            formations: self.store.formation_count(),
            nodes: self.store.node_count(),
        }
    }
}
