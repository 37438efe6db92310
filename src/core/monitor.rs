// src/core/monitor.rs

//! The `Monitor` aggregate: configuration snapshot, metadata store, and
//! notification bus. Protocol handlers, operator commands, and background
//! workers all hang off this struct.

use crate::config::MonitorConfig;
use crate::core::errors::StewardError;
use crate::core::events::{EventBus, StateNotification};
use crate::core::state::node::Node;
use crate::core::state::store::MetadataStore;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Debug)]
pub struct Monitor {
    /// Read-mostly configuration snapshot; hot-reloaded by swapping the Arc.
    config: RwLock<Arc<MonitorConfig>>,
    pub store: MetadataStore,
    pub events: EventBus,
    /// Unique 40-character hexadecimal id of this monitor instance.
    pub run_id: String,
    pub started_at: Instant,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Result<Arc<Self>, StewardError> {
        let mut runid_bytes = [0u8; 20];
        getrandom::fill(&mut runid_bytes)
            .map_err(|e| StewardError::Internal(format!("failed to generate run id: {e}")))?;
        let run_id = hex::encode(runid_bytes);

        Ok(Arc::new(Self {
            config: RwLock::new(Arc::new(config)),
            store: MetadataStore::new(),
            events: EventBus::new(),
            run_id,
            started_at: Instant::now(),
        }))
    }

    /// The current configuration snapshot.
    pub fn config(&self) -> Arc<MonitorConfig> {
        self.config.read().clone()
    }

    /// Atomically replaces the configuration snapshot.
    pub fn swap_config(&self, new: MonitorConfig) {
        *self.config.write() = Arc::new(new);
        info!("monitor configuration reloaded");
    }

    /// Records a user-visible decision: one event-log row plus a message on
    /// each notification channel.
    pub(crate) fn publish(&self, node: &Node, description: &str) {
        self.store.append_event(node, description);
        self.events.publish_log(format!(
            "{}/{}: node {} ({}:{}): {}",
            node.formation_id, node.group_id, node.name, node.host, node.port, description
        ));
        self.events.publish_state(StateNotification::from(node));
    }
}
