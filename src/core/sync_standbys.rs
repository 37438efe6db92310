// src/core/sync_standbys.rs

//! Builds the formation-level synchronous-replication configuration string
//! the primary installs to enforce the durable-write quorum.

use crate::core::state::formation::Formation;
use crate::core::state::node::Node;
use crate::core::state::replication_state::ReplicationState;

/// Computes `synchronous_standby_names` for one group.
///
/// Returns `None` for an empty group, and `Some("")` whenever synchronous
/// replication must be off: a single node, no writable node, or no quorum
/// participant among the standbys.
///
/// With exactly two nodes the peer is referenced with the `*` wildcard, but
/// only once it has actually reached `secondary` and participates in the
/// quorum. With three or more nodes the standbys with
/// `replication_quorum` and a non-zero candidate priority are listed by
/// their stable token: `ANY k (...)` when all share one priority, otherwise
/// `FIRST k (...)` in descending priority order.
pub fn synchronous_standby_names(formation: &Formation, nodes: &[Node]) -> Option<String> {
    if nodes.is_empty() {
        return None;
    }
    if nodes.len() == 1 {
        return Some(String::new());
    }

    let Some(primary) = nodes.iter().find(|n| n.goal_state.can_take_writes()) else {
        return Some(String::new());
    };

    let standbys: Vec<&Node> = nodes
        .iter()
        .filter(|n| n.node_id != primary.node_id)
        .collect();

    if nodes.len() == 2 {
        let peer = standbys[0];
        if peer.reported_state == ReplicationState::Secondary && peer.replication_quorum {
            return Some("*".to_string());
        }
        return Some(String::new());
    }

    let mut participants: Vec<&Node> = standbys
        .iter()
        .copied()
        .filter(|n| n.replication_quorum && n.candidate_priority > 0)
        .collect();
    if participants.is_empty() {
        return Some(String::new());
    }

    // k never exceeds the number of listed standbys, or the primary could
    // wait on acknowledgements that cannot arrive.
    let number_sync_standbys = formation
        .number_sync_standbys
        .max(1)
        .min(participants.len() as u32);
    let all_same_priority = participants
        .iter()
        .all(|n| n.candidate_priority == participants[0].candidate_priority);

    let names = if all_same_priority {
        participants.sort_by_key(|n| n.node_id);
        let tokens: Vec<String> = participants.iter().map(|n| n.sync_standby_token()).collect();
        format!("ANY {} ({})", number_sync_standbys, tokens.join(", "))
    } else {
        participants.sort_by_key(|n| (std::cmp::Reverse(n.candidate_priority), n.node_id));
        let tokens: Vec<String> = participants.iter().map(|n| n.sync_standby_token()).collect();
        format!("FIRST {} ({})", number_sync_standbys, tokens.join(", "))
    };
    Some(names)
}
