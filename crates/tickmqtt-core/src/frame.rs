//! Cutting a received byte stream into single-packet frames.

use std::ops::Range;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::packet::FixedHeader;

/// Result of scanning an accumulated receive buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameSplit {
    /// Byte ranges of complete packets, in stream order.
    pub frames: Vec<Range<usize>>,
    /// Offset of the first byte not belonging to a complete packet.
    pub consumed: usize,
}

impl FrameSplit {
    /// Bytes after `consumed` that must be carried over to the next read.
    pub fn leftover(&self, buf_len: usize) -> usize {
        buf_len - self.consumed
    }
}

/// Find every complete packet at the front of `buf`.
///
/// Stops at the first packet whose fixed header or body is not fully present.
/// Fails if a fixed header is invalid or a packet exceeds `max_packet_size`.
pub fn split_frames(buf: &[u8], max_packet_size: Option<u32>) -> Result<FrameSplit> {
    let mut split = FrameSplit::default();

    while split.consumed < buf.len() {
        let Some((header, _)) = FixedHeader::parse(&buf[split.consumed..])? else {
            break;
        };
        let packet_len = header.packet_len();
        if let Some(max) = max_packet_size {
            if packet_len > max as usize {
                return Err(ProtocolError::PacketTooLarge {
                    size: packet_len,
                    max: max as usize,
                });
            }
        }
        if buf.len() - split.consumed < packet_len {
            break;
        }
        split.frames.push(split.consumed..split.consumed + packet_len);
        split.consumed += packet_len;
    }

    Ok(split)
}

/// Remove every complete packet from the front of `buf`, leaving any partial
/// tail in place for the next read.
pub fn drain_frames(buf: &mut BytesMut, max_packet_size: Option<u32>) -> Result<Vec<Bytes>> {
    let split = split_frames(buf, max_packet_size)?;
    let mut consumed = buf.split_to(split.consumed).freeze();
    let mut frames = Vec::with_capacity(split.frames.len());
    let mut offset = 0;
    for range in split.frames {
        frames.push(consumed.split_to(range.end - offset));
        offset = range.end;
    }
    debug_assert!(!consumed.has_remaining());
    Ok(frames)
}
