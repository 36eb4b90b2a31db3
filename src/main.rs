use anyhow::Result;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ledcast::server::{self, ApiState, API_PORT};
use ledcast::{Canvas, Channel, ChannelConfig, ChannelController, Feature, LedEffect, Rgb24};

// Demo topology: one 64x8 canvas mirrored onto a single shelf-mounted
// controller. Edit to match the installation; persistent configuration
// is out of scope.
const CANVAS_WIDTH: u32 = 64;
const CANVAS_HEIGHT: u32 = 8;
const CONTROLLER_HOST: &str = "192.168.8.161";
const CONTROLLER_PORT: u16 = 49152;

/// Sweeps a color wheel across the whole canvas.
struct ColorCycleEffect {
    phase: f64,
}

impl ColorCycleEffect {
    fn new() -> Self {
        Self { phase: 0.0 }
    }

    // Maps a wheel position in [0, 1) onto the RGB ramp.
    fn wheel(position: f64) -> Rgb24 {
        let scaled = (position.fract() * 3.0 * 255.0) as u32;
        let (segment, ramp) = (scaled / 255, (scaled % 255) as u8);
        match segment {
            0 => Rgb24::new(255 - ramp, ramp, 0),
            1 => Rgb24::new(0, 255 - ramp, ramp),
            _ => Rgb24::new(ramp, 0, 255 - ramp),
        }
    }
}

impl LedEffect for ColorCycleEffect {
    fn name(&self) -> &str {
        "Color Cycle"
    }

    fn start(&mut self, canvas: &Canvas) {
        self.phase = 0.0;
        canvas.surface().write().unwrap().fill(Rgb24::BLACK);
    }

    fn update(&mut self, canvas: &Canvas, delta: Duration) {
        self.phase = (self.phase + delta.as_secs_f64() / 10.0).fract();

        let mut surface = canvas.surface().write().unwrap();
        let width = surface.width();
        for x in 0..width {
            let color = Self::wheel(self.phase + x as f64 / width as f64);
            for y in 0..surface.height() {
                surface.set_pixel(x, y, color);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Starting ledcast...");

    let controller = Arc::new(ChannelController::new());
    controller.add_channel(Arc::new(Channel::new(
        1,
        CONTROLLER_HOST,
        "Shelf Strip",
        CONTROLLER_PORT,
        ChannelConfig::default(),
    )))?;

    let mut canvas = Canvas::new(0, "Shelf", CANVAS_WIDTH, CANVAS_HEIGHT);
    canvas.add_feature(Feature::new(
        0,
        CONTROLLER_HOST,
        CONTROLLER_PORT,
        CANVAS_WIDTH,
        CANVAS_HEIGHT,
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
        .add_effect(Arc::new(Mutex::new(ColorCycleEffect::new())));

    controller.start_all().await;
    canvas
        .effects()
        .clone()
        .start(canvas.clone(), controller.clone())
        .await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(ApiState {
        canvases: vec![canvas.clone()],
        controller: controller.clone(),
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], API_PORT));
    let mut api = tokio::spawn(server::serve(state, addr, shutdown_rx));

    tokio::select! {
        // The API task only returns early on failure (e.g. the port is
        // taken); surface that as a nonzero exit.
        result = &mut api => {
            canvas.effects().stop().await;
            controller.stop_all().await;
            result??;
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, exiting...");
            let _ = shutdown_tx.send(true);
            canvas.effects().stop().await;
            controller.stop_all().await;
            api.await??;
            Ok(())
        }
    }
}
