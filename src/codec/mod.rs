use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Serialize;
use std::io::Write;

use crate::canvas::Rgb24;
use crate::error::CodecError;

// Wire constants shared with the controller firmware. All multi-byte
// fields on the wire are little-endian.
pub const FRAME_COMMAND_PIXEL_DATA: u16 = 0x0003;
pub const FRAME_HEADER_SIZE: usize = 24;

/// Current telemetry layout: u32 size, u64 sequence, u32 flashVersion,
/// five f64 stats, four u32 counters.
pub const CLIENT_RESPONSE_SIZE: usize = 72;
/// Older firmware omits the sequence counter.
pub const LEGACY_CLIENT_RESPONSE_SIZE: usize = 64;

/// Telemetry report a controller sends back after receiving a frame.
///
/// Parsed from either wire layout; `size` is always normalized to the
/// current layout so downstream consumers see one shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientResponse {
    #[serde(rename = "responseSize")]
    pub size: u32,
    #[serde(rename = "sequenceNumber")]
    pub sequence: u64,
    pub flash_version: u32,
    pub current_clock: f64,
    pub oldest_packet: f64,
    pub newest_packet: f64,
    pub brightness: f64,
    pub wifi_signal: f64,
    pub buffer_size: u32,
    pub buffer_pos: u32,
    pub fps_drawing: u32,
    pub watts: u32,
}

/// Flattens pixels into the byte order a controller channel expects:
/// exactly `3 * pixels.len()` bytes, G,R,B when `red_green_swap`,
/// last-to-first when `reversed`.
pub fn pixels_to_bytes(pixels: &[Rgb24], reversed: bool, red_green_swap: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(pixels.len() * 3);

    let mut push = |pixel: &Rgb24| {
        if red_green_swap {
            buf.put_u8(pixel.g);
            buf.put_u8(pixel.r);
        } else {
            buf.put_u8(pixel.r);
            buf.put_u8(pixel.g);
        }
        buf.put_u8(pixel.b);
    };

    if reversed {
        for pixel in pixels.iter().rev() {
            push(pixel);
        }
    } else {
        for pixel in pixels {
            push(pixel);
        }
    }

    buf.freeze()
}

/// Builds one uncompressed wire frame: command, channel, pixel count,
/// wall-clock timestamp split into whole seconds and microseconds, then
/// the pixel payload.
///
/// `timestamp` is seconds since the Unix epoch (offsets already
/// applied). Splitting goes through integer microseconds so whole
/// seconds encode exactly.
pub fn build_frame(
    channel: u16,
    pixels: &[Rgb24],
    reversed: bool,
    red_green_swap: bool,
    timestamp: f64,
) -> Bytes {
    let total_micros = (timestamp.max(0.0) * 1_000_000.0).round() as u64;

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + pixels.len() * 3);
    buf.put_u16_le(FRAME_COMMAND_PIXEL_DATA);
    buf.put_u16_le(channel);
    buf.put_u32_le(pixels.len() as u32);
    buf.put_u64_le(total_micros / 1_000_000);
    buf.put_u64_le(total_micros % 1_000_000);
    buf.extend_from_slice(&pixels_to_bytes(pixels, reversed, red_green_swap));
    buf.freeze()
}

/// Deflates a frame with zlib at maximum compression.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).map_err(CodecError::Compression)?;
    encoder.finish().map_err(CodecError::Compression)
}

/// Parses an inbound telemetry message, recognized by length.
///
/// The legacy layout is widened into the current one with
/// `sequence = 0`. Each field is read little-endian one at a time, so
/// the host's own endianness never enters into it.
pub fn parse_client_response(data: &[u8]) -> Result<ClientResponse, CodecError> {
    let legacy = match data.len() {
        CLIENT_RESPONSE_SIZE => false,
        LEGACY_CLIENT_RESPONSE_SIZE => true,
        n => return Err(CodecError::BadResponseSize(n)),
    };

    let mut buf = data;
    let _wire_size = buf.get_u32_le();
    let sequence = if legacy { 0 } else { buf.get_u64_le() };

    Ok(ClientResponse {
        size: CLIENT_RESPONSE_SIZE as u32,
        sequence,
        flash_version: buf.get_u32_le(),
        current_clock: buf.get_f64_le(),
        oldest_packet: buf.get_f64_le(),
        newest_packet: buf.get_f64_le(),
        brightness: buf.get_f64_le(),
        wifi_signal: buf.get_f64_le(),
        buffer_size: buf.get_u32_le(),
        buffer_pos: buf.get_u32_le(),
        fps_drawing: buf.get_u32_le(),
        watts: buf.get_u32_le(),
    })
}

/// Serializes a telemetry report back to wire bytes, in either layout.
/// The inverse of [`parse_client_response`]; controller simulators and
/// tests use this to produce what firmware would send.
pub fn serialize_client_response(response: &ClientResponse, legacy: bool) -> Bytes {
    let size = if legacy {
        LEGACY_CLIENT_RESPONSE_SIZE
    } else {
        CLIENT_RESPONSE_SIZE
    };

    let mut buf = BytesMut::with_capacity(size);
    buf.put_u32_le(size as u32);
    if !legacy {
        buf.put_u64_le(response.sequence);
    }
    buf.put_u32_le(response.flash_version);
    buf.put_f64_le(response.current_clock);
    buf.put_f64_le(response.oldest_packet);
    buf.put_f64_le(response.newest_packet);
    buf.put_f64_le(response.brightness);
    buf.put_f64_le(response.wifi_signal);
    buf.put_u32_le(response.buffer_size);
    buf.put_u32_le(response.buffer_pos);
    buf.put_u32_le(response.fps_drawing);
    buf.put_u32_le(response.watts);
    buf.freeze()
}
