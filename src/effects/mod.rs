use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::canvas::Canvas;
use crate::channel::ChannelController;
use crate::error::{ChannelError, EffectsError};

// ~30 FPS cadence. Not a hard real-time promise; measured FPS is
// reported through the canvas.
const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const FPS_WINDOW: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Lifecycle contract for a visual effect.
///
/// Implementations mutate the canvas surface over time; the render
/// loop is the only caller, so updates never race each other.
pub trait LedEffect: Send {
    fn name(&self) -> &str;

    /// Called when this effect becomes current.
    fn start(&mut self, canvas: &Canvas);

    /// Advances the effect by `delta` and draws onto the canvas.
    fn update(&mut self, canvas: &Canvas, delta: Duration);
}

pub type SharedEffect = Arc<Mutex<dyn LedEffect>>;

#[derive(Default)]
struct EffectList {
    effects: Vec<SharedEffect>,
    current: Option<usize>,
}

/// Owns the effect list, the current selection, and the render task
/// that drives frames from the canvas out to the channels.
pub struct EffectsManager {
    list: Mutex<EffectList>,
    running: AtomicBool,
    fps: AtomicU32,
    dropped_frames: AtomicU64,
    shutdown: watch::Sender<bool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Default for EffectsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectsManager {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            list: Mutex::new(EffectList::default()),
            running: AtomicBool::new(false),
            fps: AtomicU32::new(0),
            dropped_frames: AtomicU64::new(0),
            shutdown,
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Appends an effect; the first one added becomes current.
    pub fn add_effect(&self, effect: SharedEffect) {
        let mut list = self.list.lock().unwrap();
        list.effects.push(effect);
        if list.current.is_none() {
            list.current = Some(0);
        }
    }

    /// Removes the first list entry that is the same effect instance.
    /// The current index shifts left when an earlier (or the current)
    /// entry goes away, and clears when nothing remains. Returns
    /// whether anything was removed.
    pub fn remove_effect(&self, effect: &SharedEffect) -> bool {
        let mut list = self.list.lock().unwrap();
        let Some(index) = list
            .effects
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, effect))
        else {
            return false;
        };

        list.effects.remove(index);
        if let Some(current) = list.current {
            if index <= current {
                list.current = if current > 0 { Some(current - 1) } else { None };
            }
        }
        if list.effects.is_empty() {
            list.current = None;
        }
        true
    }

    /// Selects an effect by index and starts it against the canvas.
    pub fn set_current(&self, index: usize, canvas: &Canvas) -> Result<(), EffectsError> {
        let effect = {
            let mut list = self.list.lock().unwrap();
            if index >= list.effects.len() {
                return Err(EffectsError::OutOfRange(index));
            }
            list.current = Some(index);
            list.effects[index].clone()
        };

        effect.lock().unwrap().start(canvas);
        Ok(())
    }

    pub fn next_effect(&self) {
        let mut list = self.list.lock().unwrap();
        if list.effects.is_empty() {
            return;
        }
        list.current = Some(match list.current {
            Some(current) => (current + 1) % list.effects.len(),
            None => 0,
        });
    }

    pub fn previous_effect(&self) {
        let mut list = self.list.lock().unwrap();
        if list.effects.is_empty() {
            return;
        }
        list.current = Some(match list.current {
            Some(0) | None => list.effects.len() - 1,
            Some(current) => current - 1,
        });
    }

    pub fn current_effect_name(&self) -> String {
        let list = self.list.lock().unwrap();
        match list.current {
            Some(index) => list.effects[index].lock().unwrap().name().to_string(),
            None => "No Effect Selected".to_string(),
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        self.list.lock().unwrap().current
    }

    pub fn effect_count(&self) -> usize {
        self.list.lock().unwrap().effects.len()
    }

    pub fn clear_effects(&self) {
        let mut list = self.list.lock().unwrap();
        list.effects.clear();
        list.current = None;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Render FPS achieved over the last one-second window.
    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Relaxed)
    }

    /// Frames refused by full channel queues since start.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Spawns the render task. Idempotent while running.
    pub async fn start(self: Arc<Self>, canvas: Arc<Canvas>, controller: Arc<ChannelController>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.shutdown.send(false);
        let manager = Arc::clone(&self);
        let shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(manager.render_loop(canvas, controller, shutdown));
        *self.task.lock().await = Some(handle);
    }

    /// Interrupts the render task and joins it before returning.
    /// Idempotent.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);

        let handle = self.task.lock().await.take();
        if let Some(mut handle) = handle {
            if time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                warn!("render task overstayed shutdown, aborting");
                handle.abort();
            }
        }
        self.running.store(false, Ordering::Release);
    }

    // The render task: the single writer to effect state and the only
    // producer into the channel queues, so nothing here needs a lock
    // beyond the queue's own.
    async fn render_loop(
        self: Arc<Self>,
        canvas: Arc<Canvas>,
        controller: Arc<ChannelController>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(canvas = %canvas.name(), "render loop started");
        let mut last_time = Instant::now();
        let mut window_start = Instant::now();
        let mut frames_in_window = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = Instant::now();
            let delta = now - last_time;
            last_time = now;

            let effect = {
                let list = self.list.lock().unwrap();
                list.current.map(|index| list.effects[index].clone())
            };
            if let Some(effect) = effect {
                effect.lock().unwrap().update(&canvas, delta);
            }

            if let Err(err) = self.push_frames(&canvas, &controller) {
                error!(error = %err, "render loop stopping");
                break;
            }

            frames_in_window += 1;
            if window_start.elapsed() >= FPS_WINDOW {
                self.fps.store(frames_in_window, Ordering::Relaxed);
                frames_in_window = 0;
                window_start = Instant::now();
            }

            tokio::select! {
                _ = time::sleep(FRAME_INTERVAL) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.running.store(false, Ordering::Release);
        info!(canvas = %canvas.name(), "render loop stopped");
    }

    // One tick's worth of frames, in feature order. A feature whose
    // host has no channel is a wiring error and fatal to the loop; a
    // full queue just counts the drop and moves on.
    fn push_frames(
        &self,
        canvas: &Canvas,
        controller: &ChannelController,
    ) -> Result<(), ChannelError> {
        let timestamp = unix_now();
        let surface = canvas.surface().read().unwrap();

        for feature in canvas.features() {
            let Some(channel) = controller.find_channel_by_host(feature.host_name()) else {
                return Err(ChannelError::NotFound(feature.host_name().to_string()));
            };

            let frame = feature.frame_data(&surface, timestamp);
            match channel.compress_frame(&frame) {
                Ok(compressed) => {
                    if !channel.enqueue_frame(compressed) {
                        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                        debug!(host = %feature.host_name(), "queue full, frame dropped");
                    }
                }
                Err(err) => {
                    warn!(host = %feature.host_name(), error = %err, "frame compression failed");
                }
            }
        }

        Ok(())
    }
}

/// Wall-clock seconds since the Unix epoch; the controllers compare
/// frame stamps against their own wall clocks.
fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
