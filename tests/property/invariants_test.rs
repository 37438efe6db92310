// tests/property/invariants_test.rs

//! Invariants of the group state machine and the sync-standby-names
//! builder over generated group vectors.

use chrono::Utc;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use steward::config::MonitorConfig;
use steward::core::ReplicationState;
use steward::core::fsm::{FsmContext, compute_transitions};
use steward::core::state::formation::{Formation, FormationKind, NodeKind};
use steward::core::state::node::{Node, NodeHealth};
use steward::core::sync_standbys::synchronous_standby_names;

fn make_node(
    node_id: i64,
    goal: ReplicationState,
    reported: ReplicationState,
    lsn: u64,
    priority: i32,
    quorum: bool,
    health: NodeHealth,
) -> Node {
    let now = Utc::now();
    Node {
        node_id,
        formation_id: "main".to_string(),
        group_id: 0,
        name: format!("node_{node_id}"),
        host: format!("h{node_id}"),
        port: 5432,
        system_identifier: Some(1),
        goal_state: goal,
        reported_state: reported,
        reported_pg_is_running: true,
        reported_tli: 1,
        reported_lsn: lsn,
        reported_sync_state: "sync".to_string(),
        candidate_priority: priority,
        replication_quorum: quorum,
        node_kind: NodeKind::Standalone,
        node_cluster: "default".to_string(),
        health,
        health_changed_at: now,
        last_report_at: now,
        state_changed_at: now,
        promotion_requested: false,
    }
}

fn ctx() -> FsmContext {
    FsmContext {
        config: Arc::new(MonitorConfig::default()),
        now: Utc::now(),
        uptime: Duration::from_secs(3600),
    }
}

fn writable_goals() -> Vec<ReplicationState> {
    vec![
        ReplicationState::Single,
        ReplicationState::WaitPrimary,
        ReplicationState::Primary,
        ReplicationState::JoinPrimary,
        ReplicationState::ApplySettings,
        ReplicationState::PrepareMaintenance,
    ]
}

/// Standby goals that appear outside a failover election.
fn steady_standby_goals() -> Vec<ReplicationState> {
    vec![
        ReplicationState::Catchingup,
        ReplicationState::Secondary,
        ReplicationState::Demoted,
        ReplicationState::DemoteTimeout,
        ReplicationState::WaitMaintenance,
        ReplicationState::Maintenance,
        ReplicationState::Dropped,
    ]
}

fn any_state() -> Vec<ReplicationState> {
    use strum::IntoEnumIterator;
    ReplicationState::iter().collect()
}

fn healths() -> Vec<NodeHealth> {
    vec![NodeHealth::Unknown, NodeHealth::Good, NodeHealth::Bad]
}

fn count_planned(
    nodes: &[Node],
    plan: &steward::core::fsm::FsmPlan,
    pred: impl Fn(ReplicationState) -> bool,
) -> usize {
    nodes.iter().filter(|n| pred(plan.planned_goal(n))).count()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    /// P1/P2: a steady-state round never plans a second writable node nor a
    /// second wait_standby.
    #[test]
    fn test_steady_rounds_preserve_the_writable_invariants(
        has_primary in any::<bool>(),
        primary_goal in prop::sample::select(writable_goals()),
        primary_reported in prop::sample::select(any_state()),
        has_wait_standby in any::<bool>(),
        standbys in prop::collection::vec(
            (
                prop::sample::select(steady_standby_goals()),
                prop::sample::select(any_state()),
                0u64..1_000_000,
                0i32..=100,
                any::<bool>(),
                prop::sample::select(healths()),
            ),
            0..5,
        ),
    ) {
        let mut nodes = Vec::new();
        let mut id = 1i64;
        if has_primary {
            nodes.push(make_node(
                id, primary_goal, primary_reported, 500_000, 100, true, NodeHealth::Good,
            ));
            id += 1;
        }
        if has_wait_standby {
            nodes.push(make_node(
                id,
                ReplicationState::WaitStandby,
                ReplicationState::Init,
                0,
                100,
                true,
                NodeHealth::Unknown,
            ));
            id += 1;
        }
        for (goal, reported, lsn, priority, quorum, health) in standbys {
            nodes.push(make_node(id, goal, reported, lsn, priority, quorum, health));
            id += 1;
        }
        prop_assume!(!nodes.is_empty());

        let plan = compute_transitions(&nodes, &ctx()).unwrap();

        let writable = count_planned(&nodes, &plan, |s| s.can_take_writes());
        let wait_standby =
            count_planned(&nodes, &plan, |s| s == ReplicationState::WaitStandby);
        prop_assert!(writable <= 1, "planned {writable} writable nodes");
        prop_assert!(wait_standby <= 1, "planned {wait_standby} wait_standby nodes");
    }

    /// P3-shaped: an election round promotes at most one node, and when it
    /// promotes, the winner's log position is the best among the eligible
    /// reporters.
    #[test]
    fn test_elections_promote_at_most_one_winner(
        with_old_primary in any::<bool>(),
        old_goal in prop::sample::select(vec![
            ReplicationState::Draining,
            ReplicationState::PrepareMaintenance,
        ]),
        reporters in prop::collection::vec(
            (
                any::<bool>(),
                1u32..4,
                0u64..1_000_000,
                0i32..=100,
                prop::sample::select(healths()),
            ),
            1..6,
        ),
    ) {
        let mut nodes = Vec::new();
        let mut id = 1i64;
        if with_old_primary {
            nodes.push(make_node(id, old_goal, old_goal, 900_000, 100, true, NodeHealth::Bad));
            id += 1;
        }
        for (has_reported, tli, lsn, priority, health) in &reporters {
            let reported = if *has_reported {
                ReplicationState::ReportLsn
            } else {
                ReplicationState::Secondary
            };
            let mut node = make_node(
                id, ReplicationState::ReportLsn, reported, *lsn, *priority, true, *health,
            );
            node.reported_tli = *tli;
            nodes.push(node);
            id += 1;
        }

        let plan = compute_transitions(&nodes, &ctx()).unwrap();

        let promoted: Vec<&Node> = nodes
            .iter()
            .filter(|n| plan.planned_goal(n) == ReplicationState::PreparePromotion)
            .collect();
        prop_assert!(promoted.len() <= 1);

        let writable = count_planned(&nodes, &plan, |s| s.can_take_writes());
        prop_assert!(writable <= 1);

        let all_reported = reporters.iter().all(|(r, ..)| *r);
        let best = nodes
            .iter()
            .filter(|n| {
                n.goal_state == ReplicationState::ReportLsn
                    && n.reported_state == ReplicationState::ReportLsn
                    && n.candidate_priority > 0
            })
            .map(|n| (n.reported_tli, n.reported_lsn))
            .max();
        match (all_reported, best) {
            (true, Some(best)) => {
                prop_assert_eq!(promoted.len(), 1);
                let winner = promoted[0];
                prop_assert_eq!((winner.reported_tli, winner.reported_lsn), best);
                prop_assert!(winner.candidate_priority > 0);
            }
            _ => {}
        }
    }

    /// P5: the sync-standby string never mentions a node that is out of the
    /// quorum or has priority zero, and k never exceeds the mentioned set.
    #[test]
    fn test_sync_standby_names_only_mention_participants(
        number_sync_standbys in 0u32..5,
        standbys in prop::collection::vec(
            (
                0i32..=100,
                any::<bool>(),
                prop::sample::select(any_state()),
            ),
            2..6,
        ),
    ) {
        let formation = Formation {
            id: "main".to_string(),
            kind: FormationKind::Pgsql,
            dbname: "postgres".to_string(),
            opt_secondary: true,
            number_sync_standbys,
        };
        let mut nodes = vec![make_node(
            1,
            ReplicationState::Primary,
            ReplicationState::Primary,
            500_000,
            100,
            true,
            NodeHealth::Good,
        )];
        for (i, (priority, quorum, reported)) in standbys.iter().enumerate() {
            nodes.push(make_node(
                i as i64 + 2,
                ReplicationState::Secondary,
                *reported,
                400_000,
                *priority,
                *quorum,
                NodeHealth::Good,
            ));
        }

        let names = synchronous_standby_names(&formation, &nodes).unwrap();
        if let Some(rest) = names
            .strip_prefix("ANY ")
            .or_else(|| names.strip_prefix("FIRST "))
        {
            let (k, list) = rest.split_once(" (").unwrap();
            let k: usize = k.parse().unwrap();
            let tokens: Vec<&str> = list
                .trim_end_matches(')')
                .split(", ")
                .collect();
            prop_assert!(k >= 1);
            prop_assert!(k <= tokens.len());
            for token in tokens {
                let node_id: i64 = token
                    .strip_prefix("steward_standby_")
                    .unwrap()
                    .parse()
                    .unwrap();
                let node = nodes.iter().find(|n| n.node_id == node_id).unwrap();
                prop_assert!(node.replication_quorum);
                prop_assert!(node.candidate_priority > 0);
            }
        }
    }
}
