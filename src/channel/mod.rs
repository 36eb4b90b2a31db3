mod config;
mod controller;
mod queue;

pub use config::ChannelConfig;
pub use controller::ChannelController;
pub use queue::FrameQueue;

use bytes::Bytes;
use std::cmp;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;
use tracing::{debug, info, warn};

use crate::codec::{self, ClientResponse, CLIENT_RESPONSE_SIZE};
use crate::error::CodecError;

// Weight of the newest one-second window in the byte-rate average.
const BYTES_EWMA_ALPHA: f64 = 0.2;
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Doubles the reconnect delay up to the cap.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    cmp::min(current * 2, max)
}

/// A durable link to one remote LED controller.
///
/// Owns the TCP socket, a bounded outbound frame queue, and the
/// background tasks that drain the queue and ingest telemetry. The
/// connection task reconnects forever with exponential backoff until
/// `close` is called; frames enqueued while the link is down stay
/// queued, since the controller schedules them by their timestamps.
pub struct Channel {
    id: u32,
    host_name: String,
    friendly_name: String,
    port: u16,
    config: ChannelConfig,
    queue: FrameQueue,
    connected: AtomicBool,
    reconnect_count: AtomicU32,
    // f64 bit pattern of the EWMA byte rate.
    bytes_per_second: AtomicU64,
    last_response: RwLock<Option<ClientResponse>>,
    shutdown: watch::Sender<bool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Channel {
    pub fn new(
        id: u32,
        host_name: impl Into<String>,
        friendly_name: impl Into<String>,
        port: u16,
        config: ChannelConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let queue_max_size = config.queue_max_size;
        Self {
            id,
            host_name: host_name.into(),
            friendly_name: friendly_name.into(),
            port,
            config,
            queue: FrameQueue::new(queue_max_size),
            connected: AtomicBool::new(false),
            reconnect_count: AtomicU32::new(0),
            bytes_per_second: AtomicU64::new(0f64.to_bits()),
            last_response: RwLock::new(None),
            shutdown,
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn queue_max_size(&self) -> usize {
        self.queue.capacity()
    }

    pub fn bytes_per_second(&self) -> f64 {
        f64::from_bits(self.bytes_per_second.load(Ordering::Relaxed))
    }

    /// Most recent telemetry parsed off the link, if any has arrived.
    pub fn last_client_response(&self) -> Option<ClientResponse> {
        *self.last_response.read().unwrap()
    }

    /// Deflates an encoded frame for transmission.
    pub fn compress_frame(&self, frame: &[u8]) -> Result<Bytes, CodecError> {
        codec::compress(frame).map(Bytes::from)
    }

    /// Queues a compressed frame for the sender. Never blocks; returns
    /// false when the queue is full and the frame was dropped.
    pub fn enqueue_frame(&self, frame: Bytes) -> bool {
        self.queue.push(frame)
    }

    /// Starts the connection task. Idempotent while the task is alive.
    pub async fn open(self: Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let _ = self.shutdown.send(false);
        let channel = Arc::clone(&self);
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(channel.run(shutdown)));
        debug!(host = %self.host_name, "channel opened");
    }

    /// Signals shutdown and joins the connection task, aborting it if
    /// it overstays the grace period. Idempotent.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);

        let handle = self.task.lock().await.take();
        if let Some(mut handle) = handle {
            if time::timeout(self.config.shutdown_grace, &mut handle)
                .await
                .is_err()
            {
                warn!(host = %self.host_name, "channel task overstayed shutdown, aborting");
                handle.abort();
            }
        }
        self.connected.store(false, Ordering::Release);
        debug!(host = %self.host_name, "channel closed");
    }

    // Connection task: connect, serve, back off, repeat.
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = self.config.initial_backoff;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let attempt = time::timeout(
                self.config.connect_timeout,
                TcpStream::connect((self.host_name.as_str(), self.port)),
            )
            .await;

            match attempt {
                Ok(Ok(stream)) => {
                    info!(host = %self.host_name, port = self.port, "connected");
                    backoff = self.config.initial_backoff;
                    self.connected.store(true, Ordering::Release);
                    Arc::clone(&self).serve(stream, &mut shutdown).await;
                    self.connected.store(false, Ordering::Release);
                    debug!(host = %self.host_name, "link lost");
                }
                Ok(Err(err)) => {
                    debug!(host = %self.host_name, error = %err, "connect failed");
                }
                Err(_) => {
                    debug!(host = %self.host_name, "connect timed out");
                }
            }

            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = time::sleep(backoff) => {}
                _ = shutdown.changed() => break,
            }
            backoff = next_backoff(backoff, self.config.max_backoff);
            self.reconnect_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Runs the sender and receiver over one live socket until either
    // fails or shutdown is signalled. The queue survives the socket.
    async fn serve(self: Arc<Self>, stream: TcpStream, shutdown: &mut watch::Receiver<bool>) {
        let (reader, writer) = stream.into_split();

        let mut tasks = JoinSet::new();
        {
            let channel = Arc::clone(&self);
            tasks.spawn(async move { channel.sender_loop(writer).await });
        }
        {
            let channel = Arc::clone(&self);
            tasks.spawn(async move { channel.receiver_loop(reader).await });
        }

        tokio::select! {
            _ = tasks.join_next() => {}
            _ = shutdown.changed() => {}
        }
        tasks.shutdown().await;
    }

    async fn sender_loop(self: Arc<Self>, mut writer: OwnedWriteHalf) {
        let mut window_start = Instant::now();
        let mut window_bytes = 0u64;

        loop {
            let frame = match self.queue.pop() {
                Some(frame) => frame,
                None => {
                    self.queue.ready().await;
                    continue;
                }
            };

            if let Err(err) = writer.write_all(&frame).await {
                debug!(host = %self.host_name, error = %err, "frame write failed");
                break;
            }
            window_bytes += frame.len() as u64;

            let elapsed = window_start.elapsed();
            if elapsed >= RATE_WINDOW {
                let instant_rate = window_bytes as f64 / elapsed.as_secs_f64();
                let previous = f64::from_bits(self.bytes_per_second.load(Ordering::Relaxed));
                let averaged =
                    BYTES_EWMA_ALPHA * instant_rate + (1.0 - BYTES_EWMA_ALPHA) * previous;
                self.bytes_per_second
                    .store(averaged.to_bits(), Ordering::Relaxed);
                window_start = Instant::now();
                window_bytes = 0;
            }
        }
    }

    async fn receiver_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        // Telemetry messages are small; anything larger than one
        // current-format response per read is unexpected.
        let mut buf = [0u8; CLIENT_RESPONSE_SIZE * 2];

        loop {
            let n = match time::timeout(self.config.idle_timeout, reader.read(&mut buf)).await {
                Err(_) => {
                    warn!(host = %self.host_name, "telemetry idle timeout");
                    break;
                }
                Ok(Err(err)) => {
                    debug!(host = %self.host_name, error = %err, "telemetry read failed");
                    break;
                }
                Ok(Ok(0)) => {
                    debug!(host = %self.host_name, "peer closed the link");
                    break;
                }
                Ok(Ok(n)) => n,
            };

            match codec::parse_client_response(&buf[..n]) {
                Ok(response) => {
                    *self.last_response.write().unwrap() = Some(response);
                }
                Err(err) => {
                    debug!(host = %self.host_name, error = %err, "discarding malformed telemetry");
                }
            }
        }
    }
}
