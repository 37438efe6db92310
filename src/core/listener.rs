// src/core/listener.rs

//! The TCP listener carrying the monitor's protocol surface. Requests and
//! responses are newline-delimited JSON: each request is a tagged object
//! (`{"op": "node_active", ...}`), each response either `{"ok": ...}` or
//! `{"err": {"code": ..., "message": ...}}`. A connection can switch to
//! streaming the `log` and `state` notification channels with the `listen`
//! operation.

use crate::core::api::{NodeActiveRequest, RegisterNodeRequest};
use crate::core::errors::StewardError;
use crate::core::monitor::Monitor;
use crate::core::state::formation::FormationKind;
use crate::core::state::replication_state::ReplicationState;
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

/// Requests are small; a line longer than this is a protocol error.
const MAX_LINE_LENGTH: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    CreateFormation {
        id: String,
        #[serde(default)]
        kind: FormationKind,
        #[serde(default = "default_dbname")]
        dbname: String,
        #[serde(default = "default_true")]
        opt_secondary: bool,
        #[serde(default)]
        number_sync_standbys: u32,
    },
    DropFormation {
        id: String,
    },
    RegisterNode {
        #[serde(flatten)]
        req: RegisterNodeRequest,
    },
    NodeActive {
        #[serde(flatten)]
        req: NodeActiveRequest,
    },
    GetNodes {
        formation_id: String,
        #[serde(default)]
        group_id: Option<i32>,
    },
    GetPrimary {
        formation_id: String,
        #[serde(default)]
        group_id: i32,
    },
    GetOtherNodes {
        node_id: i64,
        #[serde(default)]
        current_state: Option<String>,
    },
    RemoveNode {
        #[serde(default)]
        node_id: Option<i64>,
        #[serde(default)]
        host: Option<String>,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        force: bool,
    },
    PerformFailover {
        formation_id: String,
        #[serde(default)]
        group_id: i32,
    },
    PerformPromotion {
        formation_id: String,
        node_name: String,
    },
    StartMaintenance {
        node_id: i64,
    },
    StopMaintenance {
        node_id: i64,
    },
    SetCandidatePriority {
        #[serde(default)]
        node_id: i64,
        #[serde(default)]
        host: Option<String>,
        #[serde(default)]
        port: Option<u16>,
        value: i32,
    },
    SetReplicationQuorum {
        #[serde(default)]
        node_id: i64,
        #[serde(default)]
        host: Option<String>,
        #[serde(default)]
        port: Option<u16>,
        value: bool,
    },
    SynchronousStandbyNames {
        formation_id: String,
        #[serde(default)]
        group_id: i32,
    },
    CurrentState {
        formation_id: String,
        #[serde(default)]
        group_id: Option<i32>,
    },
    LastEvents {
        #[serde(default)]
        formation_id: Option<String>,
        #[serde(default)]
        group_id: Option<i32>,
        #[serde(default = "default_event_count")]
        count: usize,
    },
    Status,
    Listen,
}

fn default_dbname() -> String {
    "postgres".to_string()
}

fn default_true() -> bool {
    true
}

fn default_event_count() -> usize {
    10
}

/// Binds the listener and accepts connections until the process shuts down.
pub async fn run_listener(monitor: Arc<Monitor>) -> Result<()> {
    let config = monitor.config();
    let listener = TcpListener::bind(format!("{}:{}", config.host, config.port)).await?;
    info!("monitor listening on {}:{}", config.host, config.port);

    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let monitor = monitor.clone();
                tokio::spawn(async move {
                    debug!("accepted connection from {}", addr);
                    if let Err(e) = handle_connection(socket, monitor).await {
                        warn!("error handling connection from {}: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                warn!("failed to accept connection: {}", e);
            }
        }
    }
}

/// Handles a single client connection, one JSON request per line.
async fn handle_connection(socket: TcpStream, monitor: Arc<Monitor>) -> Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(line) = framed.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                let response = json!({
                    "err": { "code": "invalid-input", "message": format!("malformed request: {e}") }
                });
                framed.send(response.to_string()).await?;
                continue;
            }
        };

        if matches!(request, Request::Listen) {
            framed.send(json!({ "ok": "listening" }).to_string()).await?;
            return stream_notifications(framed, monitor).await;
        }

        let response = match dispatch(&monitor, request).await {
            Ok(value) => json!({ "ok": value }),
            Err(e) => json!({
                "err": { "code": e.code(), "message": e.to_string() }
            }),
        };
        framed.send(response.to_string()).await?;
    }
    Ok(())
}

/// Routes one request to the matching monitor operation.
async fn dispatch(monitor: &Arc<Monitor>, request: Request) -> Result<Value, StewardError> {
    match request {
        Request::CreateFormation {
            id,
            kind,
            dbname,
            opt_secondary,
            number_sync_standbys,
        } => {
            let formation = monitor
                .create_formation(&id, kind, &dbname, opt_secondary, number_sync_standbys)
                .await?;
            Ok(serde_json::to_value(formation)?)
        }
        Request::DropFormation { id } => {
            monitor.drop_formation(&id).await?;
            Ok(Value::Bool(true))
        }
        Request::RegisterNode { req } => {
            let assignment = monitor.register_node(&req).await?;
            Ok(serde_json::to_value(assignment)?)
        }
        Request::NodeActive { req } => {
            let assignment = monitor.node_active(&req).await?;
            Ok(serde_json::to_value(assignment)?)
        }
        Request::GetNodes {
            formation_id,
            group_id,
        } => Ok(serde_json::to_value(
            monitor.get_nodes(&formation_id, group_id)?,
        )?),
        Request::GetPrimary {
            formation_id,
            group_id,
        } => Ok(serde_json::to_value(
            monitor.get_primary(&formation_id, group_id)?,
        )?),
        Request::GetOtherNodes {
            node_id,
            current_state,
        } => {
            let state = current_state
                .as_deref()
                .map(ReplicationState::parse_lenient);
            Ok(serde_json::to_value(
                monitor.get_other_nodes(node_id, state)?,
            )?)
        }
        Request::RemoveNode {
            node_id,
            host,
            port,
            force,
        } => Ok(Value::Bool(
            monitor
                .remove_node(node_id, host.as_deref(), port, force)
                .await?,
        )),
        Request::PerformFailover {
            formation_id,
            group_id,
        } => {
            monitor.perform_failover(&formation_id, group_id).await?;
            Ok(Value::Bool(true))
        }
        Request::PerformPromotion {
            formation_id,
            node_name,
        } => Ok(Value::Bool(
            monitor.perform_promotion(&formation_id, &node_name).await?,
        )),
        Request::StartMaintenance { node_id } => {
            Ok(Value::Bool(monitor.start_maintenance(node_id).await?))
        }
        Request::StopMaintenance { node_id } => {
            Ok(Value::Bool(monitor.stop_maintenance(node_id).await?))
        }
        Request::SetCandidatePriority {
            node_id,
            host,
            port,
            value,
        } => Ok(Value::Bool(
            monitor
                .set_node_candidate_priority(node_id, host.as_deref(), port, value)
                .await?,
        )),
        Request::SetReplicationQuorum {
            node_id,
            host,
            port,
            value,
        } => Ok(Value::Bool(
            monitor
                .set_node_replication_quorum(node_id, host.as_deref(), port, value)
                .await?,
        )),
        Request::SynchronousStandbyNames {
            formation_id,
            group_id,
        } => Ok(serde_json::to_value(
            monitor.synchronous_standby_names(&formation_id, group_id)?,
        )?),
        Request::CurrentState {
            formation_id,
            group_id,
        } => Ok(serde_json::to_value(
            monitor.current_state(&formation_id, group_id)?,
        )?),
        Request::LastEvents {
            formation_id,
            group_id,
            count,
        } => Ok(serde_json::to_value(monitor.last_events(
            formation_id.as_deref(),
            group_id,
            count,
        ))?),
        Request::Status => Ok(serde_json::to_value(monitor.status())?),
        Request::Listen => unreachable!("listen is handled by the connection loop"),
    }
}

/// Forwards the notification channels to the client until it disconnects.
async fn stream_notifications(
    mut framed: Framed<TcpStream, LinesCodec>,
    monitor: Arc<Monitor>,
) -> Result<()> {
    let state_stream =
        BroadcastStream::new(monitor.events.subscribe_state()).filter_map(|r| async move {
            let notification = r.ok()?;
            serde_json::to_string(&json!({ "channel": "state", "message": notification })).ok()
        });
    let log_stream =
        BroadcastStream::new(monitor.events.subscribe_log()).filter_map(|r| async move {
            let message = r.ok()?;
            Some(json!({ "channel": "log", "message": message }).to_string())
        });
    let mut merged = Box::pin(futures::stream::select(state_stream, log_stream));

    loop {
        tokio::select! {
            line = merged.next() => {
                match line {
                    Some(line) => framed.send(line).await?,
                    None => break,
                }
            }
            incoming = framed.next() => {
                if incoming.is_none() {
                    break;
                }
            }
        }
    }
    Ok(())
}
