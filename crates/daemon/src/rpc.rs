//! RPC Façade: a hand-rolled JSON-RPC 2.0 dispatcher over HTTP POST and a
//! WebSocket, the only externally-specified transport this crate ships
//! (SPEC_FULL.md §4.I) — no general-purpose JSON-RPC crate is vendored.
//!
//! Authorization: loopback callers are trusted unless the daemon runs
//! headless, in which case (or for any non-loopback caller) a `token` query
//! parameter must match the contents of the configured majordomo key file.

use crate::config::SecurityConfig;
use crate::majordomo;
use crate::pool::Pool;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use meshd_common::model::{Config, Network, Node, Peer, PeerInfo, Sharing, Upgrade};
use meshd_common::{Error, Result, RpcError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

pub struct RpcState {
    pub pool: Arc<Pool>,
    pub http: reqwest::Client,
    pub security: SecurityConfig,
    /// Host/IP this daemon advertises in links it mints via `Majordomo`.
    pub advertise_host: String,
}

pub fn router(state: Arc<RpcState>) -> Router {
    Router::new()
        .route("/", post(http_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn err(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(error),
            id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthQuery {
    token: Option<String>,
}

async fn authorize(state: &RpcState, addr: SocketAddr, token: Option<&str>) -> bool {
    if addr.ip().is_loopback() && !state.security.headless {
        return true;
    }
    let Some(path) = &state.security.majordomo_key_path else {
        return false;
    };
    let Some(token) = token else {
        return false;
    };
    match tokio::fs::read_to_string(path).await {
        Ok(expected) => expected.trim() == token.trim(),
        Err(e) => {
            warn!(%e, "failed to read majordomo key file for RPC auth");
            false
        }
    }
}

async fn http_handler(
    State(state): State<Arc<RpcState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(auth): Query<AuthQuery>,
    Json(req): Json<RpcRequest>,
) -> impl IntoResponse {
    if !authorize(&state, addr, auth.token.as_deref()).await {
        return (
            StatusCode::UNAUTHORIZED,
            Json(RpcResponse::err(
                req.id,
                RpcError {
                    code: -32100,
                    message: "unauthorized".to_string(),
                },
            )),
        )
            .into_response();
    }
    let response = dispatch(&state, req).await;
    (StatusCode::OK, Json(response)).into_response()
}

async fn ws_handler(
    State(state): State<Arc<RpcState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(auth): Query<AuthQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !authorize(&state, addr, auth.token.as_deref()).await {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| ws_loop(socket, state))
}

async fn ws_loop(mut socket: WebSocket, state: Arc<RpcState>) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let response = match serde_json::from_str::<RpcRequest>(&text) {
            Ok(req) => dispatch(&state, req).await,
            Err(e) => RpcResponse::err(
                Value::Null,
                RpcError {
                    code: -32700,
                    message: format!("parse error: {e}"),
                },
            ),
        };
        let Ok(payload) = serde_json::to_string(&response) else { break };
        if socket.send(Message::Text(payload)).await.is_err() {
            break;
        }
    }
}

async fn dispatch(state: &RpcState, req: RpcRequest) -> RpcResponse {
    let id = req.id.clone();
    match handle(state, &req.method, req.params).await {
        Ok(value) => RpcResponse::ok(id, value),
        Err(e) => RpcResponse::err(id, e.into()),
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(Error::from)
}

#[derive(Deserialize)]
struct NameParams {
    name: String,
}

#[derive(Deserialize)]
struct CreateParams {
    name: String,
    subnet: String,
}

#[derive(Deserialize)]
struct PeerParams {
    name: String,
    node: String,
}

#[derive(Deserialize)]
struct UpgradeParams {
    name: String,
    update: Upgrade,
}

#[derive(Deserialize)]
struct MajordomoParams {
    name: String,
    lifetime: u64,
}

#[derive(Deserialize)]
struct JoinParams {
    url: String,
    #[serde(default)]
    start: bool,
}

async fn handle(state: &RpcState, method: &str, params: Value) -> Result<Value> {
    match method {
        "Networks" => Ok(serde_json::to_value(networks(state).await?)?),
        "Network" => {
            let p: NameParams = parse(params)?;
            Ok(serde_json::to_value(network(state, &p.name).await?)?)
        }
        "Create" => {
            let p: CreateParams = parse(params)?;
            state.pool.create(&p.name, &p.subnet).await?;
            Ok(serde_json::to_value(network(state, &p.name).await?)?)
        }
        "Remove" => {
            let p: NameParams = parse(params)?;
            state.pool.remove(&p.name).await?;
            Ok(Value::Bool(true))
        }
        "Start" => {
            let p: NameParams = parse(params)?;
            let sup = state.pool.get(&p.name).await?;
            let config = state.pool.store().get(&p.name).read_config().await?;
            sup.start(format!("{}/{}", config.ip, config.mask)).await?;
            Ok(Value::Null)
        }
        "Stop" => {
            let p: NameParams = parse(params)?;
            let sup = state.pool.get(&p.name).await?;
            sup.stop().await;
            Ok(Value::Null)
        }
        "Peers" => {
            let p: NameParams = parse(params)?;
            Ok(serde_json::to_value(peers(state, &p.name).await?)?)
        }
        "Peer" => {
            let p: PeerParams = parse(params)?;
            Ok(serde_json::to_value(peer(state, &p.name, &p.node).await?)?)
        }
        "Import" => {
            let sharing: Sharing = parse(params)?;
            import(state, &sharing).await?;
            Ok(Value::Bool(true))
        }
        "Share" => {
            let p: NameParams = parse(params)?;
            Ok(serde_json::to_value(share(state, &p.name).await?)?)
        }
        "Node" => {
            let p: NameParams = parse(params)?;
            Ok(serde_json::to_value(self_node(state, &p.name).await?)?)
        }
        "Upgrade" => {
            let p: UpgradeParams = parse(params)?;
            let host = state.pool.store().upgrade(&p.name, p.update).await?;
            Ok(serde_json::to_value(Node::from(&host))?)
        }
        "Majordomo" => {
            let p: MajordomoParams = parse(params)?;
            let link = majordomo::mint(&state.pool, &p.name, p.lifetime, &state.advertise_host).await?;
            Ok(Value::String(link))
        }
        "Join" => {
            let p: JoinParams = parse(params)?;
            let sharing = majordomo::join(&state.pool, &state.http, &p.url, p.start).await?;
            Ok(serde_json::to_value(sharing)?)
        }
        other => Err(Error::InvalidConfig(format!("unknown RPC method {other}"))),
    }
}

async fn networks(state: &RpcState) -> Result<Vec<Network>> {
    let mut out = Vec::new();
    for sup in state.pool.nets().await {
        let config = state
            .pool
            .store()
            .get(sup.name())
            .read_config()
            .await
            .ok()
            .map(|c| Config::from(&c));
        out.push(Network {
            name: sup.name().to_string(),
            running: sup.is_running(),
            config,
        });
    }
    Ok(out)
}

async fn network(state: &RpcState, name: &str) -> Result<Network> {
    let sup = state.pool.get(name).await?;
    let config = state.pool.store().get(name).read_config().await.ok().map(|c| Config::from(&c));
    Ok(Network {
        name: sup.name().to_string(),
        running: sup.is_running(),
        config,
    })
}

async fn peers(state: &RpcState, name: &str) -> Result<Vec<PeerInfo>> {
    let sup = state.pool.get(name).await?;
    Ok(sup
        .peers()
        .await
        .into_iter()
        .map(|p| {
            let node = p.node.clone();
            let peer_name = node
                .as_ref()
                .map(|n| n.name.clone())
                .unwrap_or_else(|| p.address.to_string());
            PeerInfo {
                name: peer_name,
                online: p.fetched,
                status: Some(Peer {
                    node: node.as_ref().map(|n| n.name.clone()).unwrap_or_default(),
                    subnet: node.as_ref().map(|n| n.subnet.clone()).unwrap_or_default(),
                    fetched: p.fetched,
                }),
                config: node,
            }
        })
        .collect())
}

async fn peer(state: &RpcState, name: &str, node: &str) -> Result<PeerInfo> {
    peers(state, name)
        .await?
        .into_iter()
        .find(|p| p.name == node)
        .ok_or_else(|| Error::NotDefined(node.to_string()))
}

async fn import(state: &RpcState, sharing: &Sharing) -> Result<()> {
    state.pool.create(&sharing.name, &sharing.subnet).await?;
    for node in &sharing.nodes {
        majordomo::import_node(&state.pool, &sharing.name, node).await?;
    }
    Ok(())
}

async fn share(state: &RpcState, name: &str) -> Result<Sharing> {
    let net = state.pool.store().get(name);
    let config = net.read_config().await?;
    let self_host = net
        .read_host(&config.name)
        .await?
        .ok_or_else(|| Error::Internal(format!("missing self host file for {}", config.name)))?;
    let nodes: Vec<Node> = net.list_hosts().await?.iter().map(Into::into).collect();
    Ok(Sharing {
        name: name.to_string(),
        subnet: self_host.subnet,
        nodes,
    })
}

async fn self_node(state: &RpcState, name: &str) -> Result<Node> {
    let net = state.pool.store().get(name);
    let config = net.read_config().await?;
    let self_host = net
        .read_host(&config.name)
        .await?
        .ok_or_else(|| Error::Internal(format!("missing self host file for {}", config.name)))?;
    Ok((&self_host).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Bus;
    use crate::store::Store;
    use axum::body::Body;
    use axum::http::Request;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_state() -> (Arc<RpcState>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path().to_path_buf(), PathBuf::from("/bin/true"));
        store.init().await.unwrap();
        let pool = Pool::new(
            store,
            Bus::new(),
            PathBuf::from("/bin/true"),
            crate::config::DaemonConfig::default(),
        )
        .await
        .unwrap();
        let state = Arc::new(RpcState {
            pool,
            http: reqwest::Client::new(),
            security: SecurityConfig::default(),
            advertise_host: "127.0.0.1".to_string(),
        });
        (state, tmp)
    }

    /// Build a POST request with `ConnectInfo` pre-inserted as an extension,
    /// the same way `axum::serve`'s connect-info layer would for a real
    /// loopback caller — avoids spinning up a real listener just to test
    /// the dispatcher.
    fn request(body: Value) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5000))));
        req
    }

    #[tokio::test]
    async fn create_then_networks_round_trips() {
        let (state, _tmp) = test_state().await;
        let app = router(state);

        let create = request(serde_json::json!({
            "jsonrpc": "2.0", "method": "Create",
            "params": {"name": "office", "subnet": "10.1.0.0/16"}, "id": 1
        }));
        let response = app.clone().oneshot(create).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let list = request(serde_json::json!({
            "jsonrpc": "2.0", "method": "Networks", "params": {}, "id": 2
        }));
        let response = app.oneshot(list).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["result"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_method_is_reported_as_rpc_error() {
        let (state, _tmp) = test_state().await;
        let app = router(state);
        let req = request(serde_json::json!({
            "jsonrpc": "2.0", "method": "Bogus", "params": {}, "id": 7
        }));
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert!(parsed.get("error").is_some());
    }

    #[tokio::test]
    async fn non_loopback_without_token_is_unauthorized() {
        let (state, _tmp) = test_state().await;
        let app = router(state);
        let mut req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"jsonrpc": "2.0", "method": "Networks", "params": {}, "id": 1})
                    .to_string(),
            ))
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 9], 5000))));
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
