use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::connections::{ConnectionSnapshot, ConnectionStatus};
use crate::registry::PersonaConfig;
use crate::router::UsageTotals;
use crate::security::SecretAudit;

/// `GET /api/guardians`
pub async fn guardians(State(state): State<AppState>) -> Json<Vec<PersonaConfig>> {
    Json(state.personas.all().cloned().collect())
}

#[derive(Debug, Default, Deserialize)]
pub struct HealthQuery {
    /// Probe every connection before answering.
    #[serde(default)]
    pub probe: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// `ok` when every established connection is healthy, else `degraded`.
    pub status: &'static str,
    pub monitor_running: bool,
    pub unhealthy: usize,
    pub connections: Vec<ConnectionSnapshot>,
    pub secrets: Vec<SecretAudit>,
}

/// `GET /api/health[?probe=true]`
pub async fn health(
    State(state): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> Json<HealthStatus> {
    let connections = if query.probe {
        state.connections.check_health().await.connections
    } else {
        state.connections.snapshot()
    };
    let unhealthy = connections
        .iter()
        .filter(|c| c.status == ConnectionStatus::Error)
        .count();

    Json(HealthStatus {
        status: if unhealthy == 0 { "ok" } else { "degraded" },
        monitor_running: state.connections.health_monitor_running(),
        unhealthy,
        connections,
        secrets: state.secrets.audit(),
    })
}

/// `GET /api/usage`
pub async fn usage(State(state): State<AppState>) -> Json<UsageTotals> {
    Json(state.router.usage().snapshot())
}
