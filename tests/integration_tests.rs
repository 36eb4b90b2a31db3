use anyhow::Result;
use bytes::{Buf, Bytes};
use flate2::read::ZlibDecoder;
use http_body_util::BodyExt;
use ledcast::server::{self, ApiState};
use ledcast::{
    codec, Canvas, Channel, ChannelConfig, ChannelController, ClientResponse, Feature, LedEffect,
    Rgb24,
};
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time;
use tower::util::ServiceExt;

// Short-fuse channel settings so reconnect tests finish quickly.
fn test_config() -> ChannelConfig {
    ChannelConfig {
        queue_max_size: 16,
        connect_timeout: Duration::from_millis(500),
        idle_timeout: Duration::from_secs(5),
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(200),
        shutdown_grace: Duration::from_millis(500),
    }
}

fn sample_telemetry() -> ClientResponse {
    ClientResponse {
        size: codec::CLIENT_RESPONSE_SIZE as u32,
        sequence: 9,
        flash_version: 7,
        current_clock: 100.0,
        oldest_packet: 98.5,
        newest_packet: 99.5,
        brightness: 0.5,
        wifi_signal: -55.0,
        buffer_size: 180,
        buffer_pos: 3,
        fps_drawing: 30,
        watts: 12,
    }
}

async fn poll_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn channel_delivers_frames_in_fifo_order() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let channel = Arc::new(Channel::new(1, "127.0.0.1", "stub", port, test_config()));

    // Frames enqueued before the link is up survive until it connects.
    let mut expected = Vec::new();
    for i in 0u8..3 {
        let frame = codec::build_frame(0, &[Rgb24::new(i, i, i); 4], false, false, i as f64);
        let compressed = channel.compress_frame(&frame)?;
        expected.extend_from_slice(&compressed);
        assert!(channel.enqueue_frame(compressed));
    }

    channel.clone().open().await;
    let (mut socket, _) = listener.accept().await?;

    let mut received = vec![0u8; expected.len()];
    socket.read_exact(&mut received).await?;
    assert_eq!(received, expected);

    assert!(poll_until(|| channel.queue_depth() == 0).await);
    assert!(channel.is_connected());
    channel.close().await;
    Ok(())
}

#[tokio::test]
async fn channel_ingests_both_telemetry_layouts() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let channel = Arc::new(Channel::new(1, "127.0.0.1", "stub", port, test_config()));
    channel.clone().open().await;
    let (mut socket, _) = listener.accept().await?;

    let telemetry = sample_telemetry();
    socket
        .write_all(&codec::serialize_client_response(&telemetry, false))
        .await?;
    assert!(poll_until(|| channel.last_client_response() == Some(telemetry)).await);

    // Legacy firmware reports widen with a zeroed sequence counter.
    let mut newer = sample_telemetry();
    newer.watts = 21;
    socket
        .write_all(&codec::serialize_client_response(&newer, true))
        .await?;
    newer.sequence = 0;
    assert!(poll_until(|| channel.last_client_response() == Some(newer)).await);

    channel.close().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_host_backs_off_and_counts_retries() -> Result<()> {
    // Grab a port that nothing listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.port()
    };

    let channel = Arc::new(Channel::new(1, "127.0.0.1", "stub", port, test_config()));
    channel.clone().open().await;

    assert!(poll_until(|| channel.reconnect_count() >= 3).await);
    assert!(!channel.is_connected());

    channel.close().await;
    Ok(())
}

struct SolidEffect {
    color: Rgb24,
}

impl LedEffect for SolidEffect {
    fn name(&self) -> &str {
        "Solid"
    }

    fn start(&mut self, _canvas: &Canvas) {}

    fn update(&mut self, canvas: &Canvas, _delta: Duration) {
        canvas.surface().write().unwrap().fill(self.color);
    }
}

#[tokio::test]
async fn render_loop_streams_effect_output_to_the_controller() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let controller = Arc::new(ChannelController::new());
    controller.add_channel(Arc::new(Channel::new(
        1,
        "127.0.0.1",
        "stub",
        port,
        test_config(),
    )))?;

    let mut canvas = Canvas::new(0, "strip", 2, 1);
    canvas.add_feature(Feature::new(
        0, "127.0.0.1", port, 2, 1, 0, 0, 5, false, false, 8, 0.0,
    ));
    let canvas = Arc::new(canvas);
    canvas.effects().add_effect(Arc::new(Mutex::new(SolidEffect {
        color: Rgb24::new(200, 100, 50),
    })));

    controller.start_all().await;
    canvas
        .effects()
        .clone()
        .start(canvas.clone(), controller.clone())
        .await;

    let (mut socket, _) = listener.accept().await?;

    // Accumulate until the first zlib stream (the first frame)
    // inflates cleanly; a single read may split it.
    let mut wire = Vec::new();
    let mut frame = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await?;
        assert!(n > 0, "socket closed before a full frame arrived");
        wire.extend_from_slice(&chunk[..n]);
        frame.clear();
        if ZlibDecoder::new(&wire[..]).read_to_end(&mut frame).is_ok() {
            break;
        }
    }

    let mut header = &frame[..];
    assert_eq!(header.get_u16_le(), codec::FRAME_COMMAND_PIXEL_DATA);
    assert_eq!(header.get_u16_le(), 5);
    assert_eq!(header.get_u32_le(), 2);
    let _secs = header.get_u64_le();
    let _micros = header.get_u64_le();
    assert_eq!(header, &[200, 100, 50, 200, 100, 50]);

    canvas.effects().stop().await;
    assert!(!canvas.effects().is_running());
    controller.stop_all().await;
    Ok(())
}

#[tokio::test]
async fn unknown_feature_host_stops_the_render_loop() -> Result<()> {
    let controller = Arc::new(ChannelController::new());

    let mut canvas = Canvas::new(0, "orphan", 1, 1);
    canvas.add_feature(Feature::new(
        0,
        "missing.local",
        49152,
        1,
        1,
        0,
        0,
        0,
        false,
        false,
        8,
        0.0,
    ));
    let canvas = Arc::new(canvas);

    canvas
        .effects()
        .clone()
        .start(canvas.clone(), controller.clone())
        .await;
    assert!(poll_until(|| !canvas.effects().is_running()).await);

    canvas.effects().stop().await;
    Ok(())
}

// API fixtures: two canvases, one wired channel with queued state.
fn api_state() -> Arc<ApiState> {
    let controller = Arc::new(ChannelController::new());
    let channel = Arc::new(Channel::new(
        7,
        "shelf.local",
        "Shelf Strip",
        49152,
        test_config(),
    ));
    channel.enqueue_frame(Bytes::from_static(b"pending"));
    controller.add_channel(channel).unwrap();

    let mut shelf = Canvas::new(0, "shelf", 64, 8);
    shelf.add_feature(Feature::new(
        0,
        "shelf.local",
        49152,
        64,
        8,
        0,
        0,
        0,
        false,
        false,
        8,
        0.0,
    ));
    let desk = Canvas::new(1, "desk", 32, 8);

    Arc::new(ApiState {
        canvases: vec![Arc::new(shelf), Arc::new(desk)],
        controller,
    })
}

async fn get(state: Arc<ApiState>, uri: &str) -> (axum::http::StatusCode, String, Option<String>) {
    let response = server::router(state)
        .oneshot(
            axum::http::Request::builder()
                .uri(uri)
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let cors = response
        .headers()
        .get("access-control-allow-origin")
        .map(|v| v.to_str().unwrap().to_string());
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body.to_vec()).unwrap(), cors)
}

#[tokio::test]
async fn api_lists_canvases_with_ids() {
    let (status, body, cors) = get(api_state(), "/api/canvases").await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(cors.as_deref(), Some("*"));

    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let canvases = parsed.as_array().unwrap();
    assert_eq!(canvases.len(), 2);
    assert_eq!(canvases[0]["id"], 0);
    assert_eq!(canvases[0]["name"], "shelf");
    assert_eq!(canvases[0]["features"][0]["hostName"], "shelf.local");
    assert_eq!(canvases[0]["features"][0]["queueDepth"], 1);
    assert_eq!(canvases[1]["features"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn api_missing_canvas_is_404_with_cors() {
    let (status, body, cors) = get(api_state(), "/api/canvases/999").await;
    assert_eq!(status, axum::http::StatusCode::NOT_FOUND);
    assert_eq!(body, r#"{"error":"Canvas not found"}"#);
    assert_eq!(cors.as_deref(), Some("*"));
}

#[tokio::test]
async fn api_sockets_carry_feature_and_canvas_context() {
    let (status, body, _) = get(api_state(), "/api/sockets").await;
    assert_eq!(status, axum::http::StatusCode::OK);

    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let sockets = parsed.as_array().unwrap();
    assert_eq!(sockets.len(), 1);
    assert_eq!(sockets[0]["hostName"], "shelf.local");
    assert_eq!(sockets[0]["friendlyName"], "Shelf Strip");
    assert_eq!(sockets[0]["featureId"], 0);
    assert_eq!(sockets[0]["canvasId"], 0);

    let (status, body, _) = get(api_state(), "/api/sockets/7").await;
    assert_eq!(status, axum::http::StatusCode::OK);
    let socket: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(socket["port"], 49152);

    let (status, body, _) = get(api_state(), "/api/sockets/99").await;
    assert_eq!(status, axum::http::StatusCode::NOT_FOUND);
    assert_eq!(body, r#"{"error":"Socket not found"}"#);
}

#[tokio::test]
async fn api_unknown_route_is_400() {
    let (status, body, cors) = get(api_state(), "/api/nonsense").await;
    assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(body, r#"{"error":"Unknown Request"}"#);
    assert_eq!(cors.as_deref(), Some("*"));
}
