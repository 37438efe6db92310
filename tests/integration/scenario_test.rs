// tests/integration/scenario_test.rs

//! End-to-end scenarios: the monitor driven exactly the way a fleet of
//! keepers and an operator would drive it.

use crate::integration::test_helpers::{FORMATION, PGPORT, TestContext};
use steward::core::ReplicationState;

#[tokio::test]
async fn test_single_node_init() {
    let ctx = TestContext::new().await;

    let assigned = ctx.register("h1").await.unwrap();
    assert_eq!(assigned.node_id, 1);
    assert_eq!(assigned.group_id, 0);
    assert_eq!(assigned.goal_state, ReplicationState::Single);
    assert_eq!(assigned.candidate_priority, 100);
    assert!(assigned.replication_quorum);

    let assigned = ctx.report("h1", "single", 1, 0x100_0000).await.unwrap();
    assert_eq!(assigned.goal_state, ReplicationState::Single);
}

#[tokio::test]
async fn test_add_standby_reaches_primary() {
    let ctx = TestContext::new().await;

    ctx.register("h1").await.unwrap();
    ctx.report("h1", "single", 1, 0x100_0000).await.unwrap();

    let standby = ctx.register("h2").await.unwrap();
    assert_eq!(standby.node_id, 2);
    assert_eq!(standby.goal_state, ReplicationState::WaitStandby);

    // The primary's next heartbeat carries its new goal.
    let primary = ctx.report("h1", "single", 1, 0x100_0000).await.unwrap();
    assert_eq!(primary.goal_state, ReplicationState::WaitPrimary);

    ctx.report("h1", "wait_primary", 1, 0x100_0000).await.unwrap();
    let standby = ctx.report("h2", "wait_standby", 1, 0).await.unwrap();
    assert_eq!(standby.goal_state, ReplicationState::Catchingup);

    let standby = ctx.report("h2", "catchingup", 1, 0x100_0000).await.unwrap();
    assert_eq!(standby.goal_state, ReplicationState::Secondary);

    ctx.report("h2", "secondary", 1, 0x100_0000).await.unwrap();
    let primary = ctx.report("h1", "wait_primary", 1, 0x100_0000).await.unwrap();
    assert_eq!(primary.goal_state, ReplicationState::Primary);
}

#[tokio::test]
async fn test_planned_failover() {
    let ctx = TestContext::new().await;
    ctx.stable_pair(0x200_0000).await;

    assert_eq!(
        ctx.monitor
            .synchronous_standby_names(FORMATION, 0)
            .unwrap()
            .unwrap(),
        "*"
    );

    ctx.monitor.perform_failover(FORMATION, 0).await.unwrap();

    // Synchronous replication is off for the duration of the gap.
    assert_eq!(
        ctx.monitor
            .synchronous_standby_names(FORMATION, 0)
            .unwrap()
            .unwrap(),
        ""
    );

    let old = ctx.report("h1", "primary", 1, 0x200_0000).await.unwrap();
    assert_eq!(old.goal_state, ReplicationState::Draining);

    let new = ctx.report("h2", "report_lsn", 1, 0x200_0000).await.unwrap();
    assert_eq!(new.goal_state, ReplicationState::PreparePromotion);

    ctx.report("h1", "draining", 1, 0x200_0000).await.unwrap();
    let new = ctx
        .report("h2", "prepare_promotion", 1, 0x200_0000)
        .await
        .unwrap();
    assert_eq!(new.goal_state, ReplicationState::StopReplication);

    let new = ctx
        .report("h2", "stop_replication", 1, 0x200_0000)
        .await
        .unwrap();
    assert_eq!(new.goal_state, ReplicationState::WaitPrimary);
    assert_eq!(ctx.node("h1").goal_state, ReplicationState::Demoted);

    // The demoted node rejoins as a standby and the pair converges again.
    ctx.report("h2", "wait_primary", 2, 0x200_0000).await.unwrap();
    let old = ctx.report("h1", "demoted", 1, 0x200_0000).await.unwrap();
    assert_eq!(old.goal_state, ReplicationState::Catchingup);
    ctx.report("h1", "catchingup", 2, 0x200_0000).await.unwrap();
    ctx.report("h1", "secondary", 2, 0x200_0000).await.unwrap();
    let new = ctx.report("h2", "wait_primary", 2, 0x200_0000).await.unwrap();
    assert_eq!(new.goal_state, ReplicationState::Primary);

    assert_eq!(
        ctx.monitor
            .synchronous_standby_names(FORMATION, 0)
            .unwrap()
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_three_node_election_by_lsn() {
    let ctx = TestContext::new().await;
    ctx.stable_trio(90).await;

    // Push the log positions apart: h2 is at 100, h3 lags at 95.
    ctx.report("h2", "secondary", 1, 100).await.unwrap();
    ctx.report("h3", "secondary", 1, 95).await.unwrap();

    ctx.monitor
        .remove_node(None, Some("h1"), Some(PGPORT), false)
        .await
        .unwrap();
    assert!(ctx.monitor.store.node_id_by_host_port("h1", PGPORT).is_none());

    // Every survivor reports its position before the winner is picked.
    let b = ctx.report("h2", "report_lsn", 1, 100).await.unwrap();
    assert_eq!(b.goal_state, ReplicationState::ReportLsn);
    ctx.report("h3", "report_lsn", 1, 95).await.unwrap();

    assert_eq!(
        ctx.node("h2").goal_state,
        ReplicationState::PreparePromotion
    );
    assert_eq!(ctx.node("h3").goal_state, ReplicationState::FastForward);
}

#[tokio::test]
async fn test_quorum_lockout() {
    let ctx = TestContext::new().await;
    ctx.stable_trio(0x100_0000).await;

    // The third registration raised number_sync_standbys to 1.
    let formation = ctx.monitor.store.formation(FORMATION).unwrap();
    assert_eq!(formation.number_sync_standbys, 1);

    // Two quorum participants remain: allowed.
    ctx.monitor
        .set_node_replication_quorum(3, None, None, false)
        .await
        .unwrap();

    // One participant would remain: rejected.
    let err = ctx
        .monitor
        .set_node_replication_quorum(2, None, None, false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "precondition-failed");
}

#[tokio::test]
async fn test_concurrent_join_rejected() {
    let ctx = TestContext::new().await;

    ctx.register("h1").await.unwrap();
    ctx.report("h1", "single", 1, 0x100_0000).await.unwrap();
    ctx.register("h2").await.unwrap();

    // h1 is in wait_primary, h2 still in wait_standby: the group is busy.
    let err = ctx.register("h3").await.unwrap_err();
    assert_eq!(err.code(), "busy-retry");

    // The node record was not created.
    assert!(ctx.monitor.store.node_id_by_host_port("h3", PGPORT).is_none());
    assert_eq!(ctx.monitor.get_nodes(FORMATION, None).unwrap().len(), 2);
}

#[tokio::test]
async fn test_maintenance_round_trip() {
    let ctx = TestContext::new().await;
    ctx.stable_pair(0x300_0000).await;

    let before: Vec<(i64, ReplicationState)> = ctx
        .monitor
        .get_nodes(FORMATION, Some(0))
        .unwrap()
        .iter()
        .map(|n| (n.node_id, n.goal_state))
        .collect();

    assert!(ctx.monitor.start_maintenance(2).await.unwrap());
    assert_eq!(ctx.node("h2").goal_state, ReplicationState::WaitMaintenance);
    assert_eq!(ctx.node("h1").goal_state, ReplicationState::WaitPrimary);

    ctx.report("h1", "wait_primary", 1, 0x300_0000).await.unwrap();
    let standby = ctx
        .report("h2", "wait_maintenance", 1, 0x300_0000)
        .await
        .unwrap();
    assert_eq!(standby.goal_state, ReplicationState::Maintenance);
    ctx.report("h2", "maintenance", 1, 0x300_0000).await.unwrap();

    assert!(ctx.monitor.stop_maintenance(2).await.unwrap());
    ctx.report("h2", "catchingup", 1, 0x300_0000).await.unwrap();
    ctx.report("h2", "secondary", 1, 0x300_0000).await.unwrap();
    ctx.report("h1", "wait_primary", 1, 0x300_0000).await.unwrap();

    let after: Vec<(i64, ReplicationState)> = ctx
        .monitor
        .get_nodes(FORMATION, Some(0))
        .unwrap()
        .iter()
        .map(|n| (n.node_id, n.goal_state))
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_remove_last_node_empties_the_group() {
    let ctx = TestContext::new().await;
    ctx.register("h1").await.unwrap();
    ctx.report("h1", "single", 1, 0x100_0000).await.unwrap();

    assert!(
        ctx.monitor
            .remove_node(Some(1), None, None, false)
            .await
            .unwrap()
    );
    assert!(ctx.monitor.get_nodes(FORMATION, Some(0)).unwrap().is_empty());

    // The formation is empty again and can be dropped.
    ctx.monitor.drop_formation(FORMATION).await.unwrap();
    assert!(!ctx.monitor.store.formation_exists(FORMATION));
}

#[tokio::test]
async fn test_state_notifications_are_published() {
    let ctx = TestContext::new().await;
    let mut state_rx = ctx.monitor.events.subscribe_state();

    ctx.register("h1").await.unwrap();

    let notification = state_rx.recv().await.unwrap();
    assert_eq!(notification.formation_id, FORMATION);
    assert_eq!(notification.node_id, 1);
    assert_eq!(notification.goal_state, ReplicationState::Single);
}
