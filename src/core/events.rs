// src/core/events.rs

//! The notification bus. Two named channels leave the monitor: `log`
//! carries human-readable messages, `state` carries structured state-change
//! records. Both are broadcast channels: emission never blocks the caller,
//! and a subscriber that lags or disconnects re-reads the node table, which
//! stays authoritative.

use crate::core::state::node::{Node, NodeHealth};
use crate::core::state::replication_state::ReplicationState;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender};

/// Capacity of each notification channel. Large enough that a slow
/// subscriber survives a burst of transitions without losing messages.
const NOTIFICATION_BUS_CAPACITY: usize = 4096;

/// One structured message on the `state` channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateNotification {
    pub formation_id: String,
    pub group_id: i32,
    pub node_id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub reported_state: ReplicationState,
    pub goal_state: ReplicationState,
    pub health: NodeHealth,
}

impl From<&Node> for StateNotification {
    fn from(node: &Node) -> Self {
        Self {
            formation_id: node.formation_id.clone(),
            group_id: node.group_id,
            node_id: node.node_id,
            name: node.name.clone(),
            host: node.host.clone(),
            port: node.port,
            reported_state: node.reported_state,
            goal_state: node.goal_state,
            health: node.health,
        }
    }
}

/// The central distribution hub for monitor notifications.
#[derive(Debug)]
pub struct EventBus {
    log_sender: Sender<String>,
    state_sender: Sender<StateNotification>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (log_sender, _) = broadcast::channel(NOTIFICATION_BUS_CAPACITY);
        let (state_sender, _) = broadcast::channel(NOTIFICATION_BUS_CAPACITY);
        Self {
            log_sender,
            state_sender,
        }
    }

    pub fn subscribe_log(&self) -> Receiver<String> {
        self.log_sender.subscribe()
    }

    pub fn subscribe_state(&self) -> Receiver<StateNotification> {
        self.state_sender.subscribe()
    }

    /// Publishes a human-readable message. A send error only means nobody is
    /// listening, which is fine.
    pub fn publish_log(&self, message: String) {
        let _ = self.log_sender.send(message);
    }

    pub fn publish_state(&self, notification: StateNotification) {
        let _ = self.state_sender.send(notification);
    }
}
