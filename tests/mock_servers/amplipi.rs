//! Mock AmpliPi controller
//!
//! Serves `GET /api/` from an in-memory status document, applies zone and
//! source patches to it, and records every write for inspection.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// One write request as received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub method: Method,
    pub path: String,
    pub body: Value,
}

struct MockState {
    status: Value,
    writes: Vec<RecordedWrite>,
    failing: bool,
}

type Shared = Arc<RwLock<MockState>>;

/// Mock AmpliPi server
pub struct MockAmpliPi {
    addr: SocketAddr,
    state: Shared,
    handle: JoinHandle<()>,
}

/// Two sources, three zones, one group.
///
/// Source 0 plays stream 1000 into zones 1 and 2 and group 5; zone 3 listens
/// to the idle source 1.
pub fn default_status() -> Value {
    json!({
        "sources": [
            {"id": 0, "name": "Input 1", "input": "stream=1000",
             "info": {"name": "Groove Salad - internetradio", "state": "playing",
                      "artist": "Somafm", "track": "Downtempo",
                      "img_url": "/static/imgs/internet_radio.png",
                      "supported_cmds": ["play", "pause"]}},
            {"id": 1, "name": "Input 2", "input": "", "info": {"state": "stopped"}}
        ],
        "zones": [
            {"id": 1, "name": "Kitchen", "source_id": 0, "mute": false, "vol": -40, "vol_f": 0.5,
             "vol_min": -80, "vol_max": 0, "disabled": false},
            {"id": 2, "name": "Dining", "source_id": 0, "mute": false, "vol": -20, "vol_f": 0.75,
             "vol_min": -80, "vol_max": 0, "disabled": false},
            {"id": 3, "name": "Patio", "source_id": 1, "mute": true, "vol": -80, "vol_f": 0.0,
             "vol_min": -80, "vol_max": 0, "disabled": false}
        ],
        "groups": [
            {"id": 5, "name": "Downstairs", "source_id": 0, "zones": [1, 2], "mute": false,
             "vol_delta": -30, "vol_f": 0.625}
        ],
        "streams": [
            {"id": 1000, "name": "Groove Salad", "type": "internetradio"},
            {"id": 1001, "name": "Living Room Pandora", "type": "pandora"}
        ],
        "info": {"version": "0.4.1"}
    })
}

impl MockAmpliPi {
    /// Start a mock controller on a random port
    pub async fn start() -> Self {
        Self::start_with(default_status()).await
    }

    pub async fn start_with(status: Value) -> Self {
        let state = Arc::new(RwLock::new(MockState {
            status,
            writes: Vec::new(),
            failing: false,
        }));

        let app = Router::new()
            .route("/api", get(handle_status))
            .route("/api/", get(handle_status))
            .route("/api/zones", patch(handle_zones))
            .route("/api/zones/{id}", patch(handle_zone))
            .route("/api/sources/{id}", patch(handle_source))
            .route("/api/groups/{id}", patch(handle_record))
            .route("/api/streams/{id}/{cmd}", post(handle_record))
            .route("/api/announce", post(handle_record))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// API root as the client expects it, e.g. `http://127.0.0.1:1234/api`
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Make every request answer 503 (or recover)
    pub async fn set_failing(&self, failing: bool) {
        self.state.write().await.failing = failing;
    }

    pub async fn writes(&self) -> Vec<RecordedWrite> {
        self.state.read().await.writes.clone()
    }

    /// Rename a zone behind the bridge's back
    pub async fn rename_zone(&self, zone_id: u64, name: &str) {
        let mut state = self.state.write().await;
        if let Some(zone) = find_mut(&mut state.status, "zones", zone_id) {
            zone["name"] = json!(name);
        }
    }

    /// Stop the mock server
    pub fn stop(self) {
        self.handle.abort();
    }
}

fn find_mut<'a>(status: &'a mut Value, collection: &str, id: u64) -> Option<&'a mut Value> {
    status[collection]
        .as_array_mut()?
        .iter_mut()
        .find(|item| item["id"].as_u64() == Some(id))
}

/// Apply a zone update the way the controller does: `vol_f` and `vol` stay
/// consistent over the zone's own range.
fn apply_zone_update(zone: &mut Value, update: &Value) {
    let Some(fields) = update.as_object() else {
        return;
    };
    let min = zone["vol_min"].as_f64().unwrap_or(-80.0);
    let max = zone["vol_max"].as_f64().unwrap_or(0.0);
    for (key, value) in fields {
        match key.as_str() {
            "vol_f" => {
                let level = value.as_f64().unwrap_or(0.0);
                zone["vol_f"] = json!(level);
                zone["vol"] = json!(min + level * (max - min));
            }
            "vol" => {
                let db = value.as_f64().unwrap_or(min);
                zone["vol"] = json!(db);
                zone["vol_f"] = json!((db - min) / (max - min));
            }
            _ => zone[key.as_str()] = value.clone(),
        }
    }
}

async fn record(state: &Shared, method: Method, path: String, body: &Bytes) -> Option<Response> {
    let mut state = state.write().await;
    if state.failing {
        return Some(StatusCode::SERVICE_UNAVAILABLE.into_response());
    }
    let body = serde_json::from_slice(body).unwrap_or(Value::Null);
    state.writes.push(RecordedWrite { method, path, body });
    None
}

async fn handle_status(State(state): State<Shared>) -> Response {
    let state = state.read().await;
    if state.failing {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(state.status.clone()).into_response()
}

async fn handle_zones(State(state): State<Shared>, body: Bytes) -> Response {
    if let Some(failure) = record(&state, Method::PATCH, "/api/zones".to_string(), &body).await {
        return failure;
    }
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let mut targets: Vec<u64> = request["zones"]
        .as_array()
        .map(|ids| ids.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default();

    let mut guard = state.write().await;
    if let Some(groups) = request["groups"].as_array() {
        for group_id in groups.iter().filter_map(Value::as_u64) {
            if let Some(group) = find_mut(&mut guard.status, "groups", group_id) {
                if let Some(members) = group["zones"].as_array() {
                    targets.extend(members.iter().filter_map(Value::as_u64));
                }
            }
        }
    }
    for zone_id in targets {
        if let Some(zone) = find_mut(&mut guard.status, "zones", zone_id) {
            apply_zone_update(zone, &request["update"]);
        }
    }
    Json(guard.status.clone()).into_response()
}

async fn handle_zone(State(state): State<Shared>, Path(id): Path<u64>, body: Bytes) -> Response {
    let path = format!("/api/zones/{}", id);
    if let Some(failure) = record(&state, Method::PATCH, path, &body).await {
        return failure;
    }
    let update: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let mut guard = state.write().await;
    match find_mut(&mut guard.status, "zones", id) {
        Some(zone) => {
            apply_zone_update(zone, &update);
            Json(guard.status.clone()).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_source(
    State(state): State<Shared>,
    Path(id): Path<u64>,
    body: Bytes,
) -> Response {
    let path = format!("/api/sources/{}", id);
    if let Some(failure) = record(&state, Method::PATCH, path, &body).await {
        return failure;
    }
    let update: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let mut guard = state.write().await;
    match find_mut(&mut guard.status, "sources", id) {
        Some(source) => {
            if let Some(input) = update.get("input") {
                source["input"] = input.clone();
            }
            Json(guard.status.clone()).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_record(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    if let Some(failure) = record(&state, method, uri.path().to_string(), &body).await {
        return failure;
    }
    let status = state.read().await.status.clone();
    Json(status).into_response()
}
