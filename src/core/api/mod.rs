// src/core/api/mod.rs

//! The monitor's protocol surface: the keeper-facing registration and
//! node-active handlers, the operator commands, and the read-only queries.
//! Each handler follows the same locking discipline: shared formation lock
//! for heartbeats, exclusive formation lock for membership changes, and an
//! exclusive group lock around every transition decision.

pub mod node_active;
pub mod operator;
pub mod queries;
pub mod register;

use crate::core::state::formation::NodeKind;
use crate::core::state::node::Node;
use crate::core::state::replication_state::ReplicationState;
use serde::{Deserialize, Serialize};

/// The record handed back to a keeper from registration and every
/// node-active call: the identity the monitor assigned plus the goal the
/// keeper must now converge on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAssignment {
    pub node_id: i64,
    pub group_id: i32,
    pub name: String,
    pub goal_state: ReplicationState,
    pub candidate_priority: i32,
    pub replication_quorum: bool,
}

impl From<&Node> for NodeAssignment {
    fn from(node: &Node) -> Self {
        Self {
            node_id: node.node_id,
            group_id: node.group_id,
            name: node.name.clone(),
            goal_state: node.goal_state,
            candidate_priority: node.candidate_priority,
            replication_quorum: node.replication_quorum,
        }
    }
}

/// Parameters of `register_node`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    pub formation_id: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub system_identifier: Option<u64>,
    #[serde(default)]
    pub group_id: Option<i32>,
    #[serde(default)]
    pub node_id: Option<i64>,
    /// The caller's current state token; must equal the assigned role or
    /// `init`.
    #[serde(default)]
    pub initial_state: Option<String>,
    #[serde(default)]
    pub node_kind: NodeKind,
    #[serde(default = "default_candidate_priority")]
    pub candidate_priority: i32,
    #[serde(default = "default_replication_quorum")]
    pub replication_quorum: bool,
    #[serde(default)]
    pub node_cluster: Option<String>,
}

fn default_candidate_priority() -> i32 {
    100
}

fn default_replication_quorum() -> bool {
    true
}

/// Parameters of the periodic `node_active` heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeActiveRequest {
    pub formation_id: String,
    pub host: String,
    pub port: u16,
    /// 0 is the sentinel for "not assigned yet".
    #[serde(default)]
    pub node_id: i64,
    #[serde(default)]
    pub group_id: i32,
    /// Reported state token; unknown tokens map to the `unknown` sentinel.
    pub current_state: String,
    #[serde(default)]
    pub pg_is_running: bool,
    #[serde(default = "default_tli")]
    pub reported_tli: u32,
    #[serde(default)]
    pub reported_lsn: u64,
    #[serde(default)]
    pub sync_state: String,
}

fn default_tli() -> u32 {
    1
}
