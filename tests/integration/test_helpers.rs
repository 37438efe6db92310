// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

use std::sync::Arc;
use steward::config::MonitorConfig;
use steward::core::Monitor;
use steward::core::StewardError;
use steward::core::api::{NodeActiveRequest, NodeAssignment, RegisterNodeRequest};
use steward::core::state::formation::{FormationKind, NodeKind};
use steward::core::state::node::Node;
use tracing_subscriber::EnvFilter;

/// Formation id shared by most tests.
pub const FORMATION: &str = "main";
/// Every test node uses this port; hosts differ.
pub const PGPORT: u16 = 5432;

/// TestContext provides a monitor instance plus keeper-side helpers.
pub struct TestContext {
    pub monitor: Arc<Monitor>,
}

impl TestContext {
    /// Creates a monitor with the default configuration and one empty
    /// `pgsql` formation named `main` (number_sync_standbys = 0, secondaries
    /// expected).
    pub async fn new() -> Self {
        Self::with_config(MonitorConfig::default()).await
    }

    pub async fn with_config(config: MonitorConfig) -> Self {
        // Initialize tracing (ignore error if already initialized).
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("warn"))
            .with_test_writer()
            .try_init();

        let monitor = Monitor::new(config).expect("failed to build the monitor");
        monitor
            .create_formation(FORMATION, FormationKind::Pgsql, "postgres", true, 0)
            .await
            .expect("failed to create the test formation");
        Self { monitor }
    }

    /// Registers a standalone node at `host`:5432 with default settings.
    pub async fn register(&self, host: &str) -> Result<NodeAssignment, StewardError> {
        self.monitor
            .register_node(&RegisterNodeRequest {
                formation_id: FORMATION.to_string(),
                host: host.to_string(),
                port: PGPORT,
                dbname: "postgres".to_string(),
                name: None,
                system_identifier: Some(7_343_349_058_381_236_279),
                group_id: None,
                node_id: None,
                initial_state: None,
                node_kind: NodeKind::Standalone,
                candidate_priority: 100,
                replication_quorum: true,
                node_cluster: None,
            })
            .await
    }

    /// Sends one keeper heartbeat for the node at `host`.
    pub async fn report(
        &self,
        host: &str,
        state: &str,
        tli: u32,
        lsn: u64,
    ) -> Result<NodeAssignment, StewardError> {
        self.monitor
            .node_active(&NodeActiveRequest {
                formation_id: FORMATION.to_string(),
                host: host.to_string(),
                port: PGPORT,
                node_id: 0,
                group_id: 0,
                current_state: state.to_string(),
                pg_is_running: true,
                reported_tli: tli,
                reported_lsn: lsn,
                sync_state: "sync".to_string(),
            })
            .await
    }

    /// The node record for `host`, straight from the store.
    pub fn node(&self, host: &str) -> Node {
        let id = self
            .monitor
            .store
            .node_id_by_host_port(host, PGPORT)
            .expect("node is registered");
        self.monitor.store.node(id).expect("node exists")
    }

    /// Registers two nodes and walks them to the stable (primary,
    /// secondary) pair, both at the given log position.
    pub async fn stable_pair(&self, lsn: u64) {
        self.register("h1").await.unwrap();
        self.report("h1", "single", 1, lsn).await.unwrap();
        self.register("h2").await.unwrap();
        self.report("h1", "wait_primary", 1, lsn).await.unwrap();
        self.report("h2", "catchingup", 1, lsn).await.unwrap();
        self.report("h2", "secondary", 1, lsn).await.unwrap();
        self.report("h1", "primary", 1, lsn).await.unwrap();
    }

    /// Extends a stable pair into the stable three-node group.
    pub async fn stable_trio(&self, lsn: u64) {
        self.stable_pair(lsn).await;
        self.register("h3").await.unwrap();
        self.report("h1", "join_primary", 1, lsn).await.unwrap();
        self.report("h3", "catchingup", 1, lsn).await.unwrap();
        self.report("h3", "secondary", 1, lsn).await.unwrap();
        self.report("h1", "primary", 1, lsn).await.unwrap();
    }
}
