use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::canvas::{Canvas, Feature};
use crate::channel::{Channel, ChannelController};
use crate::codec::ClientResponse;

pub const API_PORT: u16 = 7777;

/// Everything the read-only API can see: the live canvases and the
/// channel registry. Handlers snapshot per request; nothing here
/// mutates the pipeline.
pub struct ApiState {
    pub canvases: Vec<Arc<Canvas>>,
    pub controller: Arc<ChannelController>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeatureView {
    host_name: String,
    friendly_name: String,
    port: u16,
    width: u32,
    height: u32,
    offset_x: u32,
    offset_y: u32,
    reversed: bool,
    channel: u16,
    red_green_swap: bool,
    client_buffer_count: u32,
    time_offset: f64,
    bytes_per_second: u64,
    is_connected: bool,
    queue_depth: usize,
    queue_max_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_client_response: Option<ClientResponse>,
}

impl FeatureView {
    fn new(feature: &Feature, channel: Option<&Arc<Channel>>) -> Self {
        Self {
            host_name: feature.host_name().to_string(),
            friendly_name: channel
                .map(|c| c.friendly_name().to_string())
                .unwrap_or_default(),
            port: feature.port(),
            width: feature.width(),
            height: feature.height(),
            offset_x: feature.offset_x(),
            offset_y: feature.offset_y(),
            reversed: feature.reversed(),
            channel: feature.channel(),
            red_green_swap: feature.red_green_swap(),
            client_buffer_count: feature.client_buffer_count(),
            time_offset: feature.time_offset(),
            bytes_per_second: channel.map(|c| c.bytes_per_second() as u64).unwrap_or(0),
            is_connected: channel.map(|c| c.is_connected()).unwrap_or(false),
            queue_depth: channel.map(|c| c.queue_depth()).unwrap_or(0),
            queue_max_size: channel.map(|c| c.queue_max_size()).unwrap_or(0),
            last_client_response: channel.and_then(|c| c.last_client_response()),
        }
    }
}

#[derive(Serialize)]
struct CanvasView {
    width: u32,
    height: u32,
    name: String,
    fps: u32,
    features: Vec<FeatureView>,
    id: u32,
}

impl CanvasView {
    fn new(canvas: &Canvas, controller: &ChannelController) -> Self {
        let features = canvas
            .features()
            .iter()
            .map(|feature| {
                let channel = controller.find_channel_by_host(feature.host_name());
                FeatureView::new(feature, channel.as_ref())
            })
            .collect();

        Self {
            width: canvas.width(),
            height: canvas.height(),
            name: canvas.name().to_string(),
            fps: canvas.fps(),
            features,
            id: canvas.id(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SocketView {
    host_name: String,
    friendly_name: String,
    is_connected: bool,
    reconnect_count: u32,
    queue_depth: usize,
    queue_max_size: usize,
    bytes_per_second: u64,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<ClientResponse>,
    feature_id: u32,
    canvas_id: u32,
}

impl SocketView {
    fn new(channel: &Channel, feature_id: u32, canvas_id: u32) -> Self {
        Self {
            host_name: channel.host_name().to_string(),
            friendly_name: channel.friendly_name().to_string(),
            is_connected: channel.is_connected(),
            reconnect_count: channel.reconnect_count(),
            queue_depth: channel.queue_depth(),
            queue_max_size: channel.queue_max_size(),
            bytes_per_second: channel.bytes_per_second() as u64,
            port: channel.port(),
            stats: channel.last_client_response(),
            feature_id,
            canvas_id,
        }
    }
}

// Every response carries the JSON content type and the open CORS
// header the dashboard relies on.
fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    let body = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    (
        status,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response()
}

async fn list_canvases(State(state): State<Arc<ApiState>>) -> Response {
    let views: Vec<CanvasView> = state
        .canvases
        .iter()
        .map(|canvas| CanvasView::new(canvas, &state.controller))
        .collect();
    json_response(StatusCode::OK, &views)
}

async fn get_canvas(State(state): State<Arc<ApiState>>, Path(id): Path<u32>) -> Response {
    match state.canvases.iter().find(|canvas| canvas.id() == id) {
        Some(canvas) => json_response(StatusCode::OK, &CanvasView::new(canvas, &state.controller)),
        None => json_response(StatusCode::NOT_FOUND, &json!({"error": "Canvas not found"})),
    }
}

// Sockets are listed per (canvas, feature) pair, carrying enough
// context to trace a socket back to the feature that feeds it.
async fn list_sockets(State(state): State<Arc<ApiState>>) -> Response {
    let mut views = Vec::new();
    for canvas in &state.canvases {
        for feature in canvas.features() {
            if let Some(channel) = state.controller.find_channel_by_host(feature.host_name()) {
                views.push(SocketView::new(&channel, feature.id(), canvas.id()));
            }
        }
    }
    json_response(StatusCode::OK, &views)
}

async fn get_socket(State(state): State<Arc<ApiState>>, Path(id): Path<u32>) -> Response {
    for canvas in &state.canvases {
        for feature in canvas.features() {
            let Some(channel) = state.controller.find_channel_by_host(feature.host_name()) else {
                continue;
            };
            if channel.id() == id {
                return json_response(
                    StatusCode::OK,
                    &SocketView::new(&channel, feature.id(), canvas.id()),
                );
            }
        }
    }
    json_response(StatusCode::NOT_FOUND, &json!({"error": "Socket not found"}))
}

async fn unknown_request() -> Response {
    json_response(StatusCode::BAD_REQUEST, &json!({"error": "Unknown Request"}))
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/canvases", get(list_canvases))
        .route("/api/canvases/:id", get(get_canvas))
        .route("/api/sockets", get(list_sockets))
        .route("/api/sockets/:id", get(get_socket))
        .fallback(unknown_request)
        .with_state(state)
}

/// Binds and serves the read API until `shutdown` flips.
pub async fn serve(
    state: Arc<ApiState>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind API listener on {addr}"))?;
    info!(%addr, "API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("API server failed")?;

    Ok(())
}
