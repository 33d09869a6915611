use std::time::Instant;

use axum::{extract::State, Json};
use serde::Serialize;

use super::AdminState;
use crate::admission::AdmissionStats;
use crate::net::connection::ConnectionState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub open_connections: u64,
    pub pending_connections: usize,
}

#[derive(Serialize)]
pub struct PendingConnection {
    pub id: u64,
    pub state: ConnectionState,
    pub age_ms: u64,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        open_connections: state.tracker.open_count(),
        pending_connections: state.controller.registry().size(),
    })
}

pub async fn get_admission(State(state): State<AdminState>) -> Json<AdmissionStats> {
    Json(state.controller.stats())
}

/// Upper bound on records returned by `/admin/connections`.
pub const MAX_LISTED_CONNECTIONS: usize = 1000;

/// Pending connections, oldest first, at most [`MAX_LISTED_CONNECTIONS`].
pub async fn get_connections(State(state): State<AdminState>) -> Json<Vec<PendingConnection>> {
    let now = Instant::now();
    let records = state.controller.registry().oldest(MAX_LISTED_CONNECTIONS, None);

    Json(
        records
            .into_iter()
            .map(|r| PendingConnection {
                id: r.id.as_u64(),
                state: r.state,
                age_ms: now.saturating_duration_since(r.accepted_at).as_millis() as u64,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::admin::{setup_admin_router, AdminState};
    use crate::admission::monitor::ManualMonitor;
    use crate::admission::registry::SocketHandle;
    use crate::admission::AdmissionController;
    use crate::config::AdmissionConfig;
    use crate::net::connection::ConnectionTracker;

    struct NullSocket;

    impl SocketHandle for NullSocket {
        fn close(&self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn state() -> AdminState {
        AdminState {
            controller: Arc::new(AdmissionController::new(
                AdmissionConfig::default(),
                Arc::new(ManualMonitor::new(0, 100)),
            )),
            tracker: ConnectionTracker::new(),
            api_key: Arc::from("secret"),
        }
    }

    async fn get(state: AdminState, path: &str, key: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().uri(path);
        if let Some(key) = key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        let response = setup_admin_router(state)
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_key() {
        let (status, _) = get(state(), "/admin/status", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = get(state(), "/admin/status", Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lists_pending_connections_oldest_first() {
        let state = state();
        let first = state.controller.admit(Arc::new(NullSocket)).unwrap();
        let second = state.controller.admit(Arc::new(NullSocket)).unwrap();

        let (status, json) = get(state, "/admin/connections", Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<u64> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![first.as_u64(), second.as_u64()]);
        assert_eq!(json[0]["state"], "registered");
    }

    #[tokio::test]
    async fn connection_listing_is_capped() {
        let state = state();
        let first = state.controller.admit(Arc::new(NullSocket)).unwrap();
        for _ in 0..super::MAX_LISTED_CONNECTIONS + 4 {
            state.controller.admit(Arc::new(NullSocket)).unwrap();
        }

        let (status, json) = get(state.clone(), "/admin/connections", Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
        let listed = json.as_array().unwrap();
        assert_eq!(listed.len(), super::MAX_LISTED_CONNECTIONS);
        assert_eq!(listed[0]["id"].as_u64(), Some(first.as_u64()));
        assert_eq!(state.controller.registry().size(), super::MAX_LISTED_CONNECTIONS + 5);
    }

    #[tokio::test]
    async fn admission_stats_report_registry_size() {
        let state = state();
        state.controller.admit(Arc::new(NullSocket)).unwrap();

        let (status, json) = get(state, "/admin/admission", Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["registry_size"], 1);
        assert_eq!(json["enabled"], true);
    }
}
