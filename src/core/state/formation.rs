// src/core/state/formation.rs

//! Formations: named administrative units of replicating nodes, and the
//! kind-specific policy for placing a newly registered node into a group.

use crate::core::errors::StewardError;
use crate::core::state::node::Node;
use crate::core::state::replication_state::ReplicationState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};

/// The formation flavor. Group assignment policy differs between the two:
/// a `pgsql` formation keeps every node in group 0, while a `citus`
/// formation reserves group 0 for the coordinator and spreads workers over
/// groups 1 and up.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FormationKind {
    #[default]
    Pgsql,
    Citus,
}

/// What a registering node claims to be.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Standalone,
    Coordinator,
    Worker,
}

impl NodeKind {
    /// The formation kind this node kind belongs to.
    pub fn formation_kind(self) -> FormationKind {
        match self {
            NodeKind::Standalone => FormationKind::Pgsql,
            NodeKind::Coordinator | NodeKind::Worker => FormationKind::Citus,
        }
    }
}

/// A named administrative unit of replicating nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formation {
    pub id: String,
    pub kind: FormationKind,
    pub dbname: String,
    /// Whether secondaries are expected to join this formation.
    pub opt_secondary: bool,
    /// Feeds `k` in the synchronous-replication string.
    pub number_sync_standbys: u32,
}

impl FormationKind {
    /// Picks the group and initial role for a registering node, given the
    /// current occupancy of every group in the formation.
    ///
    /// The one-new-standby-at-a-time rule is enforced here for explicit
    /// placements; the worker scan simply skips groups that cannot accept a
    /// standby right now, since a fresh group number is always available.
    pub fn assign_group(
        &self,
        formation_id: &str,
        node_kind: NodeKind,
        census: &BTreeMap<i32, Vec<Node>>,
        opt_secondary: bool,
    ) -> Result<(i32, ReplicationState), StewardError> {
        match (self, node_kind) {
            (FormationKind::Pgsql, NodeKind::Standalone)
            | (FormationKind::Citus, NodeKind::Coordinator) => {
                let role = match census.get(&0) {
                    None => ReplicationState::Single,
                    Some(nodes) => standby_slot(formation_id, 0, nodes, opt_secondary)?,
                };
                Ok((0, role))
            }
            (FormationKind::Citus, NodeKind::Worker) => {
                let max_group = census.keys().max().copied().unwrap_or(0);
                for group in 1..=max_group + 1 {
                    match census.get(&group) {
                        None => return Ok((group, ReplicationState::Single)),
                        Some(nodes) if nodes.len() == 1 => {
                            if let Ok(role) =
                                standby_slot(formation_id, group, nodes, opt_secondary)
                            {
                                return Ok((group, role));
                            }
                        }
                        Some(_) => {}
                    }
                }
                Err(StewardError::Internal(format!(
                    "no group available for a worker in formation \"{formation_id}\""
                )))
            }
            (kind, node_kind) => Err(StewardError::InvalidRequest(format!(
                "a {node_kind} node cannot join a {kind} formation"
            ))),
        }
    }

    /// Validates an explicitly requested group for the registering node.
    pub fn check_desired_group(
        &self,
        formation_id: &str,
        node_kind: NodeKind,
        group: i32,
        census: &BTreeMap<i32, Vec<Node>>,
        opt_secondary: bool,
    ) -> Result<ReplicationState, StewardError> {
        let group_is_legal = match (self, node_kind) {
            (FormationKind::Pgsql, NodeKind::Standalone) => group == 0,
            (FormationKind::Citus, NodeKind::Coordinator) => group == 0,
            (FormationKind::Citus, NodeKind::Worker) => group >= 1,
            _ => false,
        };
        if !group_is_legal {
            return Err(StewardError::InvalidRequest(format!(
                "a {node_kind} node cannot use group {group} in {self} formation \"{formation_id}\""
            )));
        }
        match census.get(&group) {
            None => Ok(ReplicationState::Single),
            Some(nodes) => standby_slot(formation_id, group, nodes, opt_secondary),
        }
    }
}

/// Decides whether a non-empty group can take one more standby right now.
///
/// Rejections are transient (`busy-retry`) when another standby is still
/// being attached, and permanent (`group-full`) when the formation does not
/// expect secondaries at all.
fn standby_slot(
    formation_id: &str,
    group: i32,
    nodes: &[Node],
    opt_secondary: bool,
) -> Result<ReplicationState, StewardError> {
    if !opt_secondary {
        return Err(StewardError::GroupFull {
            formation: formation_id.to_string(),
            group,
        });
    }
    if nodes
        .iter()
        .any(|n| n.goal_state == ReplicationState::WaitStandby)
    {
        return Err(StewardError::BusyRetry(format!(
            "a standby is already joining group {group} of formation \"{formation_id}\""
        )));
    }
    if nodes
        .iter()
        .any(|n| n.goal_state.is_in_wait_or_join())
    {
        return Err(StewardError::BusyRetry(format!(
            "the primary of group {group} of formation \"{formation_id}\" is already accepting a standby"
        )));
    }
    Ok(ReplicationState::WaitStandby)
}
