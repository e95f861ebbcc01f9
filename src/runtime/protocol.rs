//! Wire format of the pixel protocol.
//!
//! Every command is an 8-byte header whose first byte is the opcode.
//! Multi-byte integers are little-endian.
//!
//! ```text
//! P x:u16 y:u16 r g b          set pixel                 -> (nothing)
//! G x:u16 y:u16 pad pad pad    get pixel                 -> r g b inside
//! p x:u16 y:u16 w h wh         receive rectangle         <- w*h x (r g b pad)
//! f x:u16 y:u16 w h wh         fill rectangle            <- 1 x (r g b pad)
//! g x:u16 y:u16 w h wh         send rectangle            -> w*h x (r g b inside)
//! I pad x 7                    info                      -> width height cap cap (u32 each)
//! ```
//!
//! Rectangle extents are 12 bits: bytes 5 and 6 carry the low 8 bits of
//! width and height, the low nibble of byte 7 the high bits of width and
//! the high nibble of byte 7 the high bits of height.

use crate::canvas::Color;
use crate::runtime::rect::RectIter;
use bytes::{Buf, BufMut};

/// Size of every top-level command.
pub const COMMAND_LEN: usize = 8;
/// Size of one pixel payload, in either direction.
pub const PIXEL_LEN: usize = 4;
/// Size of the `I` response.
pub const INFO_LEN: usize = 16;

/// Top-level command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    SetPixel,
    GetPixel,
    ReceiveRect,
    FillRect,
    SendRect,
    Info,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'P' => Some(Opcode::SetPixel),
            b'G' => Some(Opcode::GetPixel),
            b'p' => Some(Opcode::ReceiveRect),
            b'f' => Some(Opcode::FillRect),
            b'g' => Some(Opcode::SendRect),
            b'I' => Some(Opcode::Info),
            _ => None,
        }
    }
}

/// x and y from bytes 1..5 of a header.
pub fn decode_point(header: &[u8; COMMAND_LEN]) -> (u32, u32) {
    let mut buf = &header[1..5];
    let x = buf.get_u16_le();
    let y = buf.get_u16_le();
    (u32::from(x), u32::from(y))
}

/// Coordinate and color of a `P` command.
pub fn decode_set_pixel(header: &[u8; COMMAND_LEN]) -> (u32, u32, Color) {
    let (x, y) = decode_point(header);
    (x, y, Color::new(header[5], header[6], header[7]))
}

/// Rectangle of a `p`, `f` or `g` command.
pub fn decode_rect(header: &[u8; COMMAND_LEN]) -> RectIter {
    let (x, y) = decode_point(header);
    let packed = u32::from(header[7]);
    let width = u32::from(header[5]) | ((packed & 0x0f) << 8);
    let height = u32::from(header[6]) | ((packed & 0xf0) << 4);
    RectIter::new(x, y, width, height)
}

/// Color of a rectangle pixel payload; the fourth byte is padding.
pub fn decode_color(payload: &[u8; PIXEL_LEN]) -> Color {
    Color::new(payload[0], payload[1], payload[2])
}

/// Encode a pixel query result. Outside the canvas reads as black with the
/// inside flag cleared.
pub fn encode_pixel(out: &mut [u8], pixel: Option<Color>) {
    let color = pixel.unwrap_or_default();
    let mut out = &mut out[..PIXEL_LEN];
    out.put_u8(color.r);
    out.put_u8(color.g);
    out.put_u8(color.b);
    out.put_u8(u8::from(pixel.is_some()));
}

/// Encode the `I` response. Inbound and outbound buffers share one
/// capacity, which is sent twice.
pub fn encode_info(out: &mut [u8], width: u32, height: u32, buffer_capacity: u32) {
    let mut out = &mut out[..INFO_LEN];
    out.put_u32_le(width);
    out.put_u32_le(height);
    out.put_u32_le(buffer_capacity);
    out.put_u32_le(buffer_capacity);
}
