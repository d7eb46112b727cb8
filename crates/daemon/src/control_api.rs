//! Control API: the per-network internal HTTP server, bound to the
//! network's own mesh IP, that peers use to fetch this node's host file and
//! the full node list.
//!
//! Routes are a small `axum::Router` over a shared [`ControlApiState`] — the
//! same `State`-extractor, `Json`-response style the rest of this codebase's
//! web layer uses, just without the auth/session machinery that layer needs
//! for browser clients.

use crate::peer::PeerRequest;
use crate::store::Store;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use meshd_common::model::NodesResponse;
use meshd_common::subnet::parse_ipv4_cidr;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

pub struct ControlApiState {
    pub network: String,
    pub store: Store,
    pub peer_tx: mpsc::Sender<PeerRequest>,
    pub control_port: u16,
}

pub fn router(state: Arc<ControlApiState>) -> Router {
    Router::new()
        .route("/", get(self_host_handler))
        .route("/rpc/nodes", get(nodes_handler))
        .route("/rpc/watch", post(watch_handler))
        .route("/rpc/forget", post(forget_handler))
        .with_state(state)
}

/// `GET /` — the self host file, as plain text, for peers to fetch.
async fn self_host_handler(State(state): State<Arc<ControlApiState>>) -> impl IntoResponse {
    let net = state.store.get(&state.network);
    let config = match net.read_config().await {
        Ok(c) => c,
        Err(e) => {
            warn!(%e, "control API: failed to read config for self host lookup");
            return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
        }
    };
    match net.read_host(&config.name).await {
        Ok(Some(host)) => (
            StatusCode::OK,
            meshd_common::codec::encode_host(&host),
        ),
        Ok(None) => (StatusCode::INTERNAL_SERVER_ERROR, String::new()),
        Err(e) => {
            warn!(%e, "control API: failed to read self host file");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

/// `GET /rpc/nodes` — every host file currently on disk for this network.
async fn nodes_handler(State(state): State<Arc<ControlApiState>>) -> impl IntoResponse {
    let net = state.store.get(&state.network);
    match net.list_hosts().await {
        Ok(hosts) => {
            let nodes = hosts.iter().map(Into::into).collect();
            (StatusCode::OK, Json(NodesResponse { nodes })).into_response()
        }
        Err(e) => {
            warn!(%e, "control API: failed to list hosts");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct WatchRequest {
    /// Legacy field name; interpreted as `host` or `host:port` of the peer
    /// to start fetching, not a node name (see DESIGN.md).
    node: String,
    subnet: String,
}

/// `POST /rpc/watch` — validate `subnet`, then enqueue an add-peer request
/// for `node`'s address.
async fn watch_handler(
    State(state): State<Arc<ControlApiState>>,
    Json(req): Json<WatchRequest>,
) -> impl IntoResponse {
    if parse_ipv4_cidr(&req.subnet).is_err() {
        return StatusCode::BAD_REQUEST;
    }
    let Some(addr) = resolve_peer_address(&req.node, state.control_port) else {
        return StatusCode::BAD_REQUEST;
    };
    if state.peer_tx.send(PeerRequest::Add(addr)).await.is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct ForgetRequest {
    node: String,
}

/// `POST /rpc/forget` — enqueue a remove-peer request for `node`'s address.
async fn forget_handler(
    State(state): State<Arc<ControlApiState>>,
    Json(req): Json<ForgetRequest>,
) -> impl IntoResponse {
    let Some(addr) = resolve_peer_address(&req.node, state.control_port) else {
        return StatusCode::BAD_REQUEST;
    };
    if state.peer_tx.send(PeerRequest::Remove(addr)).await.is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::NO_CONTENT
}

fn resolve_peer_address(node: &str, default_port: u16) -> Option<SocketAddr> {
    if let Ok(addr) = node.parse::<SocketAddr>() {
        return Some(addr);
    }
    node.parse::<IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, default_port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn state_with_network() -> (Arc<ControlApiState>, mpsc::Receiver<PeerRequest>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path().to_path_buf(), std::path::PathBuf::from("/bin/true"));
        store.configure("office", "10.1.0.0/16").await.unwrap();
        let (tx, rx) = mpsc::channel(8);
        let state = Arc::new(ControlApiState {
            network: "office".to_string(),
            store,
            peer_tx: tx,
            control_port: 1655,
        });
        (state, rx, tmp)
    }

    #[tokio::test]
    async fn root_returns_self_host_text() {
        let (state, _rx, _tmp) = state_with_network().await;
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn nodes_returns_json_list() {
        let (state, _rx, _tmp) = state_with_network().await;
        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/rpc/nodes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn watch_rejects_bad_subnet() {
        let (state, _rx, _tmp) = state_with_network().await;
        let app = router(state);
        let body = serde_json::json!({"node": "10.1.0.9:1655", "subnet": "not-a-cidr"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/rpc/watch")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn watch_accepts_and_enqueues() {
        let (state, mut rx, _tmp) = state_with_network().await;
        let app = router(state);
        let body = serde_json::json!({"node": "10.1.0.9:1655", "subnet": "10.1.0.0/16"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/rpc/watch")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(matches!(rx.recv().await, Some(PeerRequest::Add(_))));
    }
}
