use bytes::Bytes;

use crate::canvas::GraphicsSurface;
use crate::codec;

/// A rectangular window into a canvas, bound to one controller channel.
///
/// Carries no pixel storage of its own; it names its channel by host
/// and produces an encoded wire frame from the owning surface on
/// demand. The region is clipped against the surface, so pixels that
/// fall outside read as black.
#[derive(Debug, Clone)]
pub struct Feature {
    id: u32,
    host_name: String,
    port: u16,
    width: u32,
    height: u32,
    offset_x: u32,
    offset_y: u32,
    channel: u16,
    reversed: bool,
    red_green_swap: bool,
    client_buffer_count: u32,
    time_offset: f64,
}

impl Feature {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        host_name: impl Into<String>,
        port: u16,
        width: u32,
        height: u32,
        offset_x: u32,
        offset_y: u32,
        channel: u16,
        reversed: bool,
        red_green_swap: bool,
        client_buffer_count: u32,
        time_offset: f64,
    ) -> Self {
        Self {
            id,
            host_name: host_name.into(),
            port,
            width,
            height,
            offset_x,
            offset_y,
            channel,
            reversed,
            red_green_swap,
            client_buffer_count,
            time_offset,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn offset_x(&self) -> u32 {
        self.offset_x
    }

    pub fn offset_y(&self) -> u32 {
        self.offset_y
    }

    pub fn channel(&self) -> u16 {
        self.channel
    }

    pub fn reversed(&self) -> bool {
        self.reversed
    }

    pub fn red_green_swap(&self) -> bool {
        self.red_green_swap
    }

    pub fn client_buffer_count(&self) -> u32 {
        self.client_buffer_count
    }

    pub fn time_offset(&self) -> f64 {
        self.time_offset
    }

    /// Snapshots this feature's region of the surface row-major and
    /// encodes it as an uncompressed wire frame stamped
    /// `now + time_offset`. Compression happens in the channel so its
    /// throughput stats see real wire sizes.
    pub fn frame_data(&self, surface: &GraphicsSurface, now: f64) -> Bytes {
        let mut pixels = Vec::with_capacity((self.width as usize) * (self.height as usize));
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push(surface.get_pixel(self.offset_x + x, self.offset_y + y));
            }
        }

        codec::build_frame(
            self.channel,
            &pixels,
            self.reversed,
            self.red_green_swap,
            now + self.time_offset,
        )
    }
}
