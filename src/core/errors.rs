// src/core/errors.rs

//! Defines the primary error type for the monitor.

use std::num::ParseIntError;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the monitor.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
///
/// The variants follow the monitor's error taxonomy: input errors and
/// precondition failures are returned to the caller without touching any
/// state, `BusyRetry` signals a transient conflict the caller should retry,
/// and `Internal` marks invariant violations that abort the in-flight call.
#[derive(Error, Debug)]
pub enum StewardError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("node {0}:{1} is not registered")]
    NotRegistered(String, u16),

    #[error("node belongs to formation \"{actual}\", not \"{requested}\"")]
    WrongFormation { requested: String, actual: String },

    #[error("node id {0} has been removed from the monitor")]
    NodeRemoved(i64),

    #[error("formation \"{0}\" does not exist")]
    FormationNotFound(String),

    #[error("group {group} of formation \"{formation}\" cannot accept another node")]
    GroupFull { formation: String, group: i32 },

    #[error("{0}; retry shortly")]
    BusyRetry(String),

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal Monitor Error: {0}")]
    Internal(String),
}

impl StewardError {
    /// The stable wire token for this error kind, used by protocol callers to
    /// distinguish failure classes without parsing messages.
    pub fn code(&self) -> &'static str {
        match self {
            StewardError::Io(_) => "internal",
            StewardError::NotRegistered(_, _) => "not-registered",
            StewardError::WrongFormation { .. } => "wrong-formation",
            StewardError::NodeRemoved(_) => "removed",
            StewardError::FormationNotFound(_) => "invalid-input",
            StewardError::GroupFull { .. } => "group-full",
            StewardError::BusyRetry(_) => "busy-retry",
            StewardError::InvalidStateTransition(_) => "invalid-state-transition",
            StewardError::PreconditionFailed(_) => "precondition-failed",
            StewardError::InvalidRequest(_) => "invalid-input",
            StewardError::Internal(_) => "internal",
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for StewardError {
    fn clone(&self) -> Self {
        match self {
            StewardError::Io(e) => StewardError::Io(Arc::clone(e)),
            StewardError::NotRegistered(h, p) => StewardError::NotRegistered(h.clone(), *p),
            StewardError::WrongFormation { requested, actual } => StewardError::WrongFormation {
                requested: requested.clone(),
                actual: actual.clone(),
            },
            StewardError::NodeRemoved(id) => StewardError::NodeRemoved(*id),
            StewardError::FormationNotFound(f) => StewardError::FormationNotFound(f.clone()),
            StewardError::GroupFull { formation, group } => StewardError::GroupFull {
                formation: formation.clone(),
                group: *group,
            },
            StewardError::BusyRetry(s) => StewardError::BusyRetry(s.clone()),
            StewardError::InvalidStateTransition(s) => {
                StewardError::InvalidStateTransition(s.clone())
            }
            StewardError::PreconditionFailed(s) => StewardError::PreconditionFailed(s.clone()),
            StewardError::InvalidRequest(s) => StewardError::InvalidRequest(s.clone()),
            StewardError::Internal(s) => StewardError::Internal(s.clone()),
        }
    }
}

impl PartialEq for StewardError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StewardError::Io(e1), StewardError::Io(e2)) => e1.to_string() == e2.to_string(),
            (StewardError::NotRegistered(h1, p1), StewardError::NotRegistered(h2, p2)) => {
                h1 == h2 && p1 == p2
            }
            (
                StewardError::WrongFormation {
                    requested: r1,
                    actual: a1,
                },
                StewardError::WrongFormation {
                    requested: r2,
                    actual: a2,
                },
            ) => r1 == r2 && a1 == a2,
            (StewardError::NodeRemoved(n1), StewardError::NodeRemoved(n2)) => n1 == n2,
            (StewardError::FormationNotFound(f1), StewardError::FormationNotFound(f2)) => f1 == f2,
            (
                StewardError::GroupFull {
                    formation: f1,
                    group: g1,
                },
                StewardError::GroupFull {
                    formation: f2,
                    group: g2,
                },
            ) => f1 == f2 && g1 == g2,
            (StewardError::BusyRetry(s1), StewardError::BusyRetry(s2)) => s1 == s2,
            (
                StewardError::InvalidStateTransition(s1),
                StewardError::InvalidStateTransition(s2),
            ) => s1 == s2,
            (StewardError::PreconditionFailed(s1), StewardError::PreconditionFailed(s2)) => {
                s1 == s2
            }
            (StewardError::InvalidRequest(s1), StewardError::InvalidRequest(s2)) => s1 == s2,
            (StewardError::Internal(s1), StewardError::Internal(s2)) => s1 == s2,
            _ => false,
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for StewardError {
    fn from(e: std::io::Error) -> Self {
        StewardError::Io(Arc::new(e))
    }
}

impl From<ParseIntError> for StewardError {
    fn from(_: ParseIntError) -> Self {
        StewardError::InvalidRequest("value is not an integer or out of range".to_string())
    }
}

impl From<serde_json::Error> for StewardError {
    fn from(e: serde_json::Error) -> Self {
        StewardError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}
