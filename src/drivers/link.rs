//! CRC-framed serial telemetry link
//! ===========================================================
//!
//! Frame: `[0xAA, 0x55, len, seq, kind, payload[len], crc_lo, crc_hi]`
//! - `len` is the payload length, at most 252 bytes
//! - `seq` increments per frame and wraps
//! - CRC-16/CCITT-FALSE covers header and payload

use crc16::{State, CCITT_FALSE};
use embedded_io_async::Write;
use heapless::Vec;

use super::Transport;

pub const HEADER: [u8; 2] = [0xAA, 0x55];
pub const HEADER_LEN: usize = 5;
pub const MAX_PAYLOAD: usize = 252;
pub const FRAME: usize = HEADER_LEN + MAX_PAYLOAD + 2;

/// Frame kind carried in byte 4.
pub const KIND_MEASUREMENT: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    #[error("payload of {0} bytes exceeds a frame")]
    PayloadTooLarge(usize),
    #[error("serial write failed")]
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    #[error("bad frame header")]
    BadHeader,
    #[error("frame truncated")]
    Truncated,
    #[error("CRC mismatch: computed {computed:#06x}, received {received:#06x}")]
    BadChecksum { computed: u16, received: u16 },
}

/// A validated frame borrowed from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub seq: u8,
    pub kind: u8,
    pub payload: &'a [u8],
}

pub fn encode_frame(seq: u8, kind: u8, payload: &[u8]) -> Result<Vec<u8, FRAME>, LinkError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(LinkError::PayloadTooLarge(payload.len()));
    }
    let mut out: Vec<u8, FRAME> = Vec::new();
    // capacity checked above
    let _ = out.extend_from_slice(&HEADER);
    let _ = out.extend_from_slice(&[payload.len() as u8, seq, kind]);
    let _ = out.extend_from_slice(payload);
    let crc = State::<CCITT_FALSE>::calculate(&out).to_le_bytes();
    let _ = out.extend_from_slice(&crc);
    Ok(out)
}

pub fn decode_frame(buf: &[u8]) -> Result<Frame<'_>, FrameError> {
    if buf.len() < HEADER_LEN + 2 {
        return Err(FrameError::Truncated);
    }
    if buf[0..2] != HEADER {
        return Err(FrameError::BadHeader);
    }
    let len = buf[2] as usize;
    if len > MAX_PAYLOAD {
        return Err(FrameError::BadHeader);
    }
    let crc_pos = HEADER_LEN + len;
    if buf.len() < crc_pos + 2 {
        return Err(FrameError::Truncated);
    }
    let received = u16::from_le_bytes([buf[crc_pos], buf[crc_pos + 1]]);
    let computed = State::<CCITT_FALSE>::calculate(&buf[..crc_pos]);
    if computed != received {
        return Err(FrameError::BadChecksum { computed, received });
    }
    Ok(Frame {
        seq: buf[3],
        kind: buf[4],
        payload: &buf[HEADER_LEN..crc_pos],
    })
}

/// Sends each payload as one measurement frame over a byte sink.
pub struct FramedLink<W> {
    tx: W,
    seq: u8,
}

impl<W: Write> FramedLink<W> {
    pub fn new(tx: W) -> Self {
        Self { tx, seq: 0 }
    }

    pub fn into_inner(self) -> W {
        self.tx
    }
}

impl<W: Write> Transport for FramedLink<W> {
    async fn send(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let frame = encode_frame(self.seq, KIND_MEASUREMENT, payload)?;
        self.seq = self.seq.wrapping_add(1);
        self.tx.write_all(&frame).await.map_err(|_| LinkError::Io)?;
        self.tx.flush().await.map_err(|_| LinkError::Io)
    }
}
