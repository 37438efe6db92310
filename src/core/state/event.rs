// src/core/state/event.rs

//! Append-only record of state transitions. Every user-visible decision the
//! monitor takes lands here with enough detail to diagnose it later.

use crate::core::state::replication_state::ReplicationState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the event log, binding a node's observed and assigned state
/// at the moment of a transition or report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEvent {
    pub event_id: u64,
    pub event_time: DateTime<Utc>,
    pub formation_id: String,
    pub node_id: i64,
    pub group_id: i32,
    pub node_name: String,
    pub reported_state: ReplicationState,
    pub goal_state: ReplicationState,
    pub reported_tli: u32,
    pub reported_lsn: u64,
    pub description: String,
}
