// src/core/api/register.rs

//! Formation management and node registration: the joining policy that
//! picks a group and an initial role for every new node.

use crate::core::api::{NodeAssignment, RegisterNodeRequest};
use crate::core::errors::StewardError;
use crate::core::fsm;
use crate::core::monitor::Monitor;
use crate::core::state::formation::{Formation, FormationKind};
use crate::core::state::node::{Node, NodeHealth};
use crate::core::state::replication_state::ReplicationState;
use chrono::Utc;
use tracing::info;

impl Monitor {
    /// Creates a formation. Idempotent: an existing formation with the same
    /// id is returned unchanged.
    pub async fn create_formation(
        &self,
        id: &str,
        kind: FormationKind,
        dbname: &str,
        opt_secondary: bool,
        number_sync_standbys: u32,
    ) -> Result<Formation, StewardError> {
        if id.is_empty() {
            return Err(StewardError::InvalidRequest(
                "formation id must not be empty".to_string(),
            ));
        }
        let _guard = self.store.lock_formation_exclusive(id).await;
        let formation = self.store.create_formation(Formation {
            id: id.to_string(),
            kind,
            dbname: dbname.to_string(),
            opt_secondary,
            number_sync_standbys,
        });
        info!("formation \"{}\" ready ({})", formation.id, formation.kind);
        Ok(formation)
    }

    /// Destroys a formation. Rejected while any node is still registered.
    pub async fn drop_formation(&self, id: &str) -> Result<(), StewardError> {
        let _guard = self.store.lock_formation_exclusive(id).await;
        self.store.formation(id)?;
        if self.store.formation_node_count(id) > 0 {
            return Err(StewardError::PreconditionFailed(format!(
                "formation \"{id}\" still has registered nodes"
            )));
        }
        self.store.remove_formation(id);
        info!("formation \"{}\" dropped", id);
        Ok(())
    }

    /// Registers a node with the monitor and assigns it a group and an
    /// initial role. A transient `busy-retry` is returned while another
    /// standby is still being attached to the chosen group; nothing is
    /// created in that case.
    pub async fn register_node(
        &self,
        req: &RegisterNodeRequest,
    ) -> Result<NodeAssignment, StewardError> {
        if !(0..=100).contains(&req.candidate_priority) {
            return Err(StewardError::InvalidRequest(format!(
                "candidate priority {} is out of range 0..100",
                req.candidate_priority
            )));
        }

        let _guard = self.store.lock_formation_exclusive(&req.formation_id).await;
        let mut formation = self.store.formation(&req.formation_id)?;

        // The first node of a formation may repurpose its kind.
        let caller_kind = req.node_kind.formation_kind();
        if formation.kind != caller_kind {
            if self.store.formation_node_count(&formation.id) == 0 {
                formation.kind = caller_kind;
                self.store.update_formation(&formation);
                info!(
                    "formation \"{}\" switched to kind {} for its first node",
                    formation.id, formation.kind
                );
            } else {
                return Err(StewardError::InvalidRequest(format!(
                    "a {} node cannot join {} formation \"{}\"",
                    req.node_kind, formation.kind, formation.id
                )));
            }
        }

        if self.store.node_id_by_host_port(&req.host, req.port).is_some() {
            return Err(StewardError::InvalidRequest(format!(
                "{}:{} is already registered",
                req.host, req.port
            )));
        }

        let census = self.store.group_census(&formation.id);
        let (group_id, initial_role) = match req.group_id {
            Some(group) => {
                let role = formation.kind.check_desired_group(
                    &formation.id,
                    req.node_kind,
                    group,
                    &census,
                    formation.opt_secondary,
                )?;
                (group, role)
            }
            None => formation.kind.assign_group(
                &formation.id,
                req.node_kind,
                &census,
                formation.opt_secondary,
            )?,
        };

        // System identifiers must agree inside a group once known.
        if let (Some(sysid), Some(group_nodes)) = (req.system_identifier, census.get(&group_id))
            && let Some(peer) = group_nodes
                .iter()
                .find(|n| n.system_identifier.is_some_and(|s| s != sysid))
        {
            return Err(StewardError::InvalidRequest(format!(
                "system identifier {sysid} does not match node {} in group {group_id}",
                peer.name
            )));
        }

        if let Some(state) = req.initial_state.as_deref() {
            let state = ReplicationState::parse_lenient(state);
            if state != ReplicationState::Init && state != initial_role {
                return Err(StewardError::InvalidRequest(format!(
                    "cannot register a node in state {state} when the assigned role is {initial_role}"
                )));
            }
        }

        let node_id = match req.node_id {
            Some(desired) => self.store.claim_node_id(desired)?,
            None => self.store.next_node_id(),
        };
        let name = req
            .name
            .clone()
            .unwrap_or_else(|| format!("node_{node_id}"));
        if self.store.node_by_name(&formation.id, &name).is_some() {
            return Err(StewardError::InvalidRequest(format!(
                "node name \"{name}\" is already in use in formation \"{}\"",
                formation.id
            )));
        }

        let now = Utc::now();
        let node = Node {
            node_id,
            formation_id: formation.id.clone(),
            group_id,
            name,
            host: req.host.clone(),
            port: req.port,
            system_identifier: req.system_identifier,
            goal_state: initial_role,
            reported_state: ReplicationState::Init,
            reported_pg_is_running: false,
            reported_tli: 1,
            reported_lsn: 0,
            reported_sync_state: String::new(),
            candidate_priority: req.candidate_priority,
            replication_quorum: req.replication_quorum,
            node_kind: req.node_kind,
            node_cluster: req.node_cluster.clone().unwrap_or_else(|| "default".to_string()),
            health: NodeHealth::Unknown,
            health_changed_at: now,
            last_report_at: now,
            state_changed_at: now,
            promotion_requested: false,
        };
        self.store.insert_node(node.clone());
        self.publish(
            &node,
            &format!(
                "node registered in group {group_id} with initial role {initial_role}"
            ),
        );

        // A third node turns the formation into a durable multi-standby
        // quorum.
        if self.store.formation_node_count(&formation.id) == 3
            && formation.number_sync_standbys == 0
        {
            formation.number_sync_standbys = 1;
            self.store.update_formation(&formation);
            self.events.publish_log(format!(
                "formation \"{}\": number_sync_standbys raised to 1 with the third node",
                formation.id
            ));
            info!(
                "formation \"{}\": number_sync_standbys raised to 1",
                formation.id
            );
        }

        let _group_guard = self.store.lock_group(&formation.id, group_id).await;
        fsm::proceed_group_state(self, &formation.id, group_id)?;

        let node = self
            .store
            .node(node_id)
            .ok_or(StewardError::NodeRemoved(node_id))?;
        Ok(NodeAssignment::from(&node))
    }
}
