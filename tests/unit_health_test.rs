// tests/unit_health_test.rs

//! The health-check worker, probing through a mock instead of TCP.

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use steward::config::MonitorConfig;
use steward::core::Monitor;
use steward::core::api::RegisterNodeRequest;
use steward::core::state::formation::{FormationKind, NodeKind};
use steward::core::state::node::NodeHealth;
use steward::core::tasks::health_check::{HealthCheckWorker, HealthProbe};

/// A probe whose answer the test controls.
struct MockProbe {
    alive: AtomicBool,
}

impl MockProbe {
    fn new(alive: bool) -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(alive),
        })
    }
}

#[async_trait]
impl HealthProbe for MockProbe {
    async fn probe(&self, _host: &str, _port: u16) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

fn test_config() -> MonitorConfig {
    MonitorConfig {
        health_check_retries: 0,
        health_check_retry_delay: Duration::from_millis(1),
        health_check_timeout: Duration::from_millis(200),
        ..MonitorConfig::default()
    }
}

async fn setup() -> Arc<Monitor> {
    let monitor = Monitor::new(test_config()).unwrap();
    monitor
        .create_formation("main", FormationKind::Pgsql, "postgres", true, 0)
        .await
        .unwrap();
    monitor
        .register_node(&RegisterNodeRequest {
            formation_id: "main".to_string(),
            host: "h1".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            name: None,
            system_identifier: None,
            group_id: None,
            node_id: None,
            initial_state: None,
            node_kind: NodeKind::Standalone,
            candidate_priority: 100,
            replication_quorum: true,
            node_cluster: None,
        })
        .await
        .unwrap();
    monitor
}

#[tokio::test]
async fn test_failed_probe_marks_the_node_bad() {
    let monitor = setup().await;
    let worker = HealthCheckWorker::new(monitor.clone(), MockProbe::new(false));
    let mut rng = SmallRng::seed_from_u64(7);

    assert_eq!(monitor.store.node(1).unwrap().health, NodeHealth::Unknown);
    worker.check_all_nodes(&mut rng).await;
    assert_eq!(monitor.store.node(1).unwrap().health, NodeHealth::Bad);
}

#[tokio::test]
async fn test_one_success_restores_good_health() {
    let monitor = setup().await;
    let probe = MockProbe::new(false);
    let worker = HealthCheckWorker::new(monitor.clone(), probe.clone());
    let mut rng = SmallRng::seed_from_u64(7);

    worker.check_all_nodes(&mut rng).await;
    assert_eq!(monitor.store.node(1).unwrap().health, NodeHealth::Bad);

    probe.alive.store(true, Ordering::SeqCst);
    worker.check_all_nodes(&mut rng).await;
    assert_eq!(monitor.store.node(1).unwrap().health, NodeHealth::Good);
}

#[tokio::test]
async fn test_verdict_changes_are_published() {
    let monitor = setup().await;
    let worker = HealthCheckWorker::new(monitor.clone(), MockProbe::new(false));
    let mut rng = SmallRng::seed_from_u64(7);
    let mut state_rx = monitor.events.subscribe_state();

    worker.check_all_nodes(&mut rng).await;

    let mut saw_bad = false;
    while let Ok(notification) = state_rx.try_recv() {
        if notification.node_id == 1 && notification.health == NodeHealth::Bad {
            saw_bad = true;
        }
    }
    assert!(saw_bad, "expected a bad-health notification");

    let events = monitor.last_events(Some("main"), None, 10);
    assert!(
        events
            .iter()
            .any(|e| e.description.contains("health check verdict")),
        "expected a health event, got: {:?}",
        events
    );
}

#[tokio::test]
async fn test_stable_verdicts_stay_quiet() {
    let monitor = setup().await;
    let worker = HealthCheckWorker::new(monitor.clone(), MockProbe::new(true));
    let mut rng = SmallRng::seed_from_u64(7);

    worker.check_all_nodes(&mut rng).await;
    let events_after_first = monitor.last_events(Some("main"), None, 100).len();

    // A second identical round records nothing new.
    worker.check_all_nodes(&mut rng).await;
    assert_eq!(
        monitor.last_events(Some("main"), None, 100).len(),
        events_after_first
    );
}
