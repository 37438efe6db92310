// src/core/state/store.rs

//! The metadata store: the single point of coordination between protocol
//! handlers, operator commands, and the health-check worker.
//!
//! Formations and nodes live in concurrent maps; the event log is an
//! append-only vector. The advisory locks of the original design are
//! emulated with per-formation reader-writer locks (tag class 10) and
//! per-group mutexes (tag class 11), acquired as owned guards so a handler
//! can hold them across await points.

use crate::core::errors::StewardError;
use crate::core::state::event::StateEvent;
use crate::core::state::formation::Formation;
use crate::core::state::node::Node;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tokio::sync::{OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard};

/// Advisory-lock tag class for formation-scoped locks.
pub const FORMATION_LOCK_CLASS: u32 = 10;
/// Advisory-lock tag class for group-scoped locks.
pub const GROUP_LOCK_CLASS: u32 = 11;

#[derive(Debug, Default)]
pub struct MetadataStore {
    formations: DashMap<String, Formation>,
    nodes: DashMap<i64, Node>,
    by_host_port: DashMap<(String, u16), i64>,
    node_id_seq: AtomicI64,
    event_id_seq: AtomicU64,
    events: RwLock<Vec<StateEvent>>,
    formation_locks: DashMap<String, Arc<tokio::sync::RwLock<()>>>,
    group_locks: DashMap<(String, i32), Arc<tokio::sync::Mutex<()>>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self {
            node_id_seq: AtomicI64::new(1),
            event_id_seq: AtomicU64::new(1),
            ..Default::default()
        }
    }

    // --- Formations ---

    /// Creates a formation, or returns the existing record unchanged when
    /// the identifier is already taken (creation is idempotent).
    pub fn create_formation(&self, formation: Formation) -> Formation {
        self.formations
            .entry(formation.id.clone())
            .or_insert(formation)
            .clone()
    }

    pub fn formation(&self, id: &str) -> Result<Formation, StewardError> {
        self.formations
            .get(id)
            .map(|f| f.clone())
            .ok_or_else(|| StewardError::FormationNotFound(id.to_string()))
    }

    pub fn formation_exists(&self, id: &str) -> bool {
        self.formations.contains_key(id)
    }

    pub fn update_formation(&self, formation: &Formation) {
        self.formations
            .insert(formation.id.clone(), formation.clone());
    }

    pub fn remove_formation(&self, id: &str) -> Option<Formation> {
        self.formations.remove(id).map(|(_, f)| f)
    }

    // --- Nodes ---

    pub fn next_node_id(&self) -> i64 {
        self.node_id_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Reserves a caller-requested node id, keeping the sequence ahead of it.
    pub fn claim_node_id(&self, desired: i64) -> Result<i64, StewardError> {
        if desired <= 0 {
            return Err(StewardError::InvalidRequest(format!(
                "node id {desired} is out of range"
            )));
        }
        if self.nodes.contains_key(&desired) {
            return Err(StewardError::InvalidRequest(format!(
                "node id {desired} is already in use"
            )));
        }
        self.node_id_seq.fetch_max(desired + 1, Ordering::SeqCst);
        Ok(desired)
    }

    pub fn insert_node(&self, node: Node) {
        self.by_host_port
            .insert((node.host.clone(), node.port), node.node_id);
        self.nodes.insert(node.node_id, node);
    }

    pub fn node(&self, node_id: i64) -> Option<Node> {
        self.nodes.get(&node_id).map(|n| n.clone())
    }

    pub fn node_id_by_host_port(&self, host: &str, port: u16) -> Option<i64> {
        self.by_host_port
            .get(&(host.to_string(), port))
            .map(|id| *id)
    }

    pub fn node_by_name(&self, formation_id: &str, name: &str) -> Option<Node> {
        self.nodes
            .iter()
            .find(|n| n.formation_id == formation_id && n.name == name)
            .map(|n| n.clone())
    }

    /// Applies a closure to the node record in place. Returns false when the
    /// node no longer exists.
    pub fn with_node_mut(&self, node_id: i64, f: impl FnOnce(&mut Node)) -> bool {
        match self.nodes.get_mut(&node_id) {
            Some(mut node) => {
                f(&mut node);
                true
            }
            None => false,
        }
    }

    pub fn remove_node(&self, node_id: i64) -> Option<Node> {
        let (_, node) = self.nodes.remove(&node_id)?;
        self.by_host_port.remove(&(node.host.clone(), node.port));
        Some(node)
    }

    /// All nodes of one group, ordered by node id.
    pub fn group_nodes(&self, formation_id: &str, group_id: i32) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| n.formation_id == formation_id && n.group_id == group_id)
            .map(|n| n.clone())
            .collect();
        nodes.sort_by_key(|n| n.node_id);
        nodes
    }

    /// All nodes of one formation, ordered by (group, node id).
    pub fn formation_nodes(&self, formation_id: &str) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| n.formation_id == formation_id)
            .map(|n| n.clone())
            .collect();
        nodes.sort_by_key(|n| (n.group_id, n.node_id));
        nodes
    }

    pub fn formation_node_count(&self, formation_id: &str) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.formation_id == formation_id)
            .count()
    }

    /// Group occupancy of a formation, for the registration policy.
    pub fn group_census(&self, formation_id: &str) -> BTreeMap<i32, Vec<Node>> {
        let mut census: BTreeMap<i32, Vec<Node>> = BTreeMap::new();
        for node in self.formation_nodes(formation_id) {
            census.entry(node.group_id).or_default().push(node);
        }
        census
    }

    pub fn all_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.iter().map(|n| n.clone()).collect();
        nodes.sort_by_key(|n| n.node_id);
        nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn formation_count(&self) -> usize {
        self.formations.len()
    }

    // --- Event log ---

    /// Appends an event snapshotting the node's current report and goal.
    pub fn append_event(&self, node: &Node, description: &str) -> StateEvent {
        let event = StateEvent {
            event_id: self.event_id_seq.fetch_add(1, Ordering::SeqCst),
            event_time: Utc::now(),
            formation_id: node.formation_id.clone(),
            node_id: node.node_id,
            group_id: node.group_id,
            node_name: node.name.clone(),
            reported_state: node.reported_state,
            goal_state: node.goal_state,
            reported_tli: node.reported_tli,
            reported_lsn: node.reported_lsn,
            description: description.to_string(),
        };
        self.events.write().push(event.clone());
        event
    }

    /// The most recent events, newest first, optionally scoped to a
    /// formation or a group.
    pub fn last_events(
        &self,
        formation_id: Option<&str>,
        group_id: Option<i32>,
        count: usize,
    ) -> Vec<StateEvent> {
        let events = self.events.read();
        events
            .iter()
            .rev()
            .filter(|e| formation_id.is_none_or(|f| e.formation_id == f))
            .filter(|e| group_id.is_none_or(|g| e.group_id == g))
            .take(count)
            .cloned()
            .collect()
    }

    // --- Advisory locks ---

    fn formation_lock(&self, formation_id: &str) -> Arc<tokio::sync::RwLock<()>> {
        self.formation_locks
            .entry(formation_id.to_string())
            .or_default()
            .clone()
    }

    fn group_lock(&self, formation_id: &str, group_id: i32) -> Arc<tokio::sync::Mutex<()>> {
        self.group_locks
            .entry((formation_id.to_string(), group_id))
            .or_default()
            .clone()
    }

    /// Shared formation lock, held by heartbeats while they read peers.
    pub async fn lock_formation_shared(&self, formation_id: &str) -> OwnedRwLockReadGuard<()> {
        self.formation_lock(formation_id).read_owned().await
    }

    /// Exclusive formation lock, held by membership changes.
    pub async fn lock_formation_exclusive(&self, formation_id: &str) -> OwnedRwLockWriteGuard<()> {
        self.formation_lock(formation_id).write_owned().await
    }

    /// Exclusive group lock; serializes every transition decision of the
    /// group. Always acquired after the formation lock, never before.
    pub async fn lock_group(&self, formation_id: &str, group_id: i32) -> OwnedMutexGuard<()> {
        self.group_lock(formation_id, group_id).lock_owned().await
    }
}
