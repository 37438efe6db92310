// src/core/state/replication_state.rs

//! The closed enumeration of roles a managed node can hold, together with
//! the predicates the group state machine is written in terms of.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// A node's role as tracked by the monitor. Every member has a canonical
/// lowercase token (`wait_primary`, `catchingup`, ...) used on the wire and
/// in the event log.
///
/// Two fields of every node carry this type: `reported_state` is what the
/// keeper last observed on the node, `goal_state` is what the monitor wants
/// the node to become. A node is stable when the two agree.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReplicationState {
    /// Just registered, no action taken yet.
    Init,
    /// Sole writable node of its group.
    Single,
    /// Writable but without a live standby; synchronous replication relaxed.
    WaitPrimary,
    /// Writable with at least one healthy standby in sync position.
    Primary,
    /// Writable while a new standby is being added.
    JoinPrimary,
    /// Writable while a changed quorum/priority setting is applied.
    ApplySettings,
    /// Writable, about to hand off to a standby for maintenance.
    PrepareMaintenance,
    /// No longer accepts writes; waiting for standbys to drain the log.
    Draining,
    /// Former primary that never confirmed draining; forced demotion.
    DemoteTimeout,
    /// Former primary, fully stopped.
    Demoted,
    /// Newly joining standby, awaiting primary acknowledgement.
    WaitStandby,
    /// Standby streaming but not yet caught up.
    Catchingup,
    /// Standby caught up, eligible for promotion.
    Secondary,
    /// Standby elected for promotion, preparing.
    PreparePromotion,
    /// Promoted standby cutting its replication link.
    StopReplication,
    /// Being attached as an additional standby.
    JoinSecondary,
    /// Participating in a failover election by reporting its log position.
    ReportLsn,
    /// Lagging secondary being caught up to the election winner.
    FastForward,
    /// Heading into maintenance, waiting for the primary to adjust.
    WaitMaintenance,
    /// Deliberately offline for operator intervention.
    Maintenance,
    /// Tombstone.
    Dropped,
    /// Sentinel for unparseable input.
    Unknown,
}

impl ReplicationState {
    /// Parses a canonical token, mapping anything unrecognized to the
    /// `unknown` sentinel instead of failing the call.
    pub fn parse_lenient(token: &str) -> Self {
        token.parse().unwrap_or(ReplicationState::Unknown)
    }

    /// States in which the node accepts writes.
    pub fn can_take_writes(self) -> bool {
        matches!(
            self,
            ReplicationState::Single
                | ReplicationState::WaitPrimary
                | ReplicationState::Primary
                | ReplicationState::JoinPrimary
                | ReplicationState::ApplySettings
                | ReplicationState::PrepareMaintenance
        )
    }

    /// `can_take_writes` plus the states a primary passes through while it
    /// is being demoted.
    pub fn is_writable_or_demoted(self) -> bool {
        self.can_take_writes()
            || matches!(
                self,
                ReplicationState::Draining
                    | ReplicationState::DemoteTimeout
                    | ReplicationState::Demoted
            )
    }

    /// A primary waiting on a standby to join or re-join.
    pub fn is_in_wait_or_join(self) -> bool {
        matches!(
            self,
            ReplicationState::WaitPrimary | ReplicationState::JoinPrimary
        )
    }

    /// Any of the maintenance-related states.
    pub fn is_in_maintenance(self) -> bool {
        matches!(
            self,
            ReplicationState::WaitMaintenance
                | ReplicationState::Maintenance
                | ReplicationState::PrepareMaintenance
        )
    }

    /// The election winner's promotion sequence.
    pub fn is_being_promoted(self) -> bool {
        matches!(
            self,
            ReplicationState::PreparePromotion | ReplicationState::StopReplication
        )
    }

    /// Any state that only exists while a failover election is underway.
    pub fn is_in_election(self) -> bool {
        self.is_being_promoted()
            || matches!(
                self,
                ReplicationState::ReportLsn | ReplicationState::FastForward
            )
    }
}
