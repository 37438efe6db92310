// src/core/state/node.rs

//! The per-node record owned by the monitor. Keepers only ever propose
//! updates to their own row through the node-active protocol; every other
//! field is written by the monitor alone.

use crate::core::state::formation::NodeKind;
use crate::core::state::replication_state::ReplicationState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Liveness verdict maintained by the health-check worker.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    #[default]
    Unknown,
    Good,
    Bad,
}

impl NodeHealth {
    /// Ordering used to break election ties: a node the prober can reach
    /// beats one it cannot.
    pub fn rank(self) -> u8 {
        match self {
            NodeHealth::Good => 2,
            NodeHealth::Unknown => 1,
            NodeHealth::Bad => 0,
        }
    }
}

/// A managed replica, as the monitor tracks it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Stable, monotonic, assigned by the monitor.
    pub node_id: i64,
    pub formation_id: String,
    pub group_id: i32,
    /// Unique within the formation.
    pub name: String,
    /// `(host, port)` is unique system-wide.
    pub host: String,
    pub port: u16,
    /// Unique within a group once known; null while the node initializes.
    pub system_identifier: Option<u64>,
    /// What the monitor wants this node to become.
    pub goal_state: ReplicationState,
    /// What the keeper last observed.
    pub reported_state: ReplicationState,
    pub reported_pg_is_running: bool,
    /// Replication timeline, increments on promotion.
    pub reported_tli: u32,
    /// Byte offset in the replication log, non-decreasing per timeline.
    pub reported_lsn: u64,
    /// The keeper's view of its sync status (`sync`, `quorum`, `async`, ...).
    pub reported_sync_state: String,
    /// 0..=100; zero disables promotion eligibility.
    pub candidate_priority: i32,
    /// Whether the node participates in the durable-write quorum.
    pub replication_quorum: bool,
    pub node_kind: NodeKind,
    /// Free-form cluster tag.
    pub node_cluster: String,
    pub health: NodeHealth,
    pub health_changed_at: DateTime<Utc>,
    pub last_report_at: DateTime<Utc>,
    /// When `goal_state` last changed.
    pub state_changed_at: DateTime<Utc>,
    /// Set by a targeted promotion; consumed when the election resolves.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub promotion_requested: bool,
}

impl Node {
    /// A node is stable when the keeper has reached the assigned state.
    pub fn is_stable(&self) -> bool {
        self.reported_state == self.goal_state
    }

    /// The stable token naming this node inside the synchronous-replication
    /// string.
    pub fn sync_standby_token(&self) -> String {
        format!("steward_standby_{}", self.node_id)
    }
}

/// Renders a log position in the conventional `hi/lo` hexadecimal form.
pub fn format_lsn(lsn: u64) -> String {
    format!("{:X}/{:X}", lsn >> 32, lsn & 0xffff_ffff)
}
