// src/core/tasks/health_check.rs

//! The health-check worker: a single background task probing every
//! registered node for liveness and feeding the verdicts into the group
//! state machine, where they gate automatic failover.

use crate::core::fsm;
use crate::core::monitor::Monitor;
use crate::core::state::node::{Node, NodeHealth};
use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, info, warn};

/// The liveness probe seam. The default implementation opens a TCP
/// connection to the node; tests substitute their own.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, host: &str, port: u16) -> bool;
}

/// Probes by establishing (and immediately dropping) a TCP connection.
#[derive(Debug, Default)]
pub struct TcpHealthProbe;

#[async_trait]
impl HealthProbe for TcpHealthProbe {
    async fn probe(&self, host: &str, port: u16) -> bool {
        TcpStream::connect((host, port)).await.is_ok()
    }
}

pub struct HealthCheckWorker {
    monitor: Arc<Monitor>,
    probe: Arc<dyn HealthProbe>,
}

impl HealthCheckWorker {
    pub fn new(monitor: Arc<Monitor>, probe: Arc<dyn HealthProbe>) -> Self {
        Self { monitor, probe }
    }

    /// The main loop. Runs until the process shuts down.
    pub async fn run(self) {
        let period = self.monitor.config().health_check_period;
        info!("health-check worker started (period {:?})", period);
        let mut rng = SmallRng::from_entropy();
        let mut timer = time::interval(period);
        loop {
            timer.tick().await;
            self.check_all_nodes(&mut rng).await;
        }
    }

    /// One probe round over every registered node. Probes are staggered
    /// with a small jitter so a large formation does not hit the network in
    /// lockstep.
    pub async fn check_all_nodes(&self, rng: &mut SmallRng) {
        let config = self.monitor.config();
        for node in self.monitor.store.all_nodes() {
            let jitter = Duration::from_millis(rng.gen_range(0..100));
            time::sleep(jitter).await;

            let alive = self.probe_with_retries(&node, &config).await;
            let verdict = if alive {
                NodeHealth::Good
            } else {
                NodeHealth::Bad
            };
            if verdict != node.health {
                self.apply_verdict(&node, verdict).await;
            }
        }
    }

    async fn probe_with_retries(&self, node: &Node, config: &crate::config::MonitorConfig) -> bool {
        for attempt in 0..=config.health_check_retries {
            let probe = self.probe.probe(&node.host, node.port);
            match time::timeout(config.health_check_timeout, probe).await {
                Ok(true) => return true,
                Ok(false) | Err(_) => {
                    debug!(
                        "probe of node {} ({}:{}) failed (attempt {}/{})",
                        node.name,
                        node.host,
                        node.port,
                        attempt + 1,
                        config.health_check_retries + 1
                    );
                    if attempt < config.health_check_retries {
                        time::sleep(config.health_check_retry_delay).await;
                    }
                }
            }
        }
        false
    }

    /// Records a changed verdict and lets the group state machine react to
    /// it under the usual locks.
    async fn apply_verdict(&self, node: &Node, verdict: NodeHealth) {
        let now = chrono::Utc::now();
        let updated = self.monitor.store.with_node_mut(node.node_id, |n| {
            n.health = verdict;
            n.health_changed_at = now;
        });
        if !updated {
            return;
        }
        if let Some(updated_node) = self.monitor.store.node(node.node_id) {
            info!(
                "node {} ({}:{}) is now {}",
                node.name, node.host, node.port, verdict
            );
            self.monitor
                .publish(&updated_node, &format!("health check verdict: {verdict}"));
        }

        let _formation_guard = self
            .monitor
            .store
            .lock_formation_shared(&node.formation_id)
            .await;
        let _group_guard = self
            .monitor
            .store
            .lock_group(&node.formation_id, node.group_id)
            .await;
        if let Err(e) = fsm::proceed_group_state(&self.monitor, &node.formation_id, node.group_id) {
            warn!(
                "state machine round after a health verdict for {}/{} failed: {}",
                node.formation_id, node.group_id, e
            );
        }
    }
}
