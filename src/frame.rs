// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Binary wire format: header layout, fragmentation, and frame types.

use crate::error::{Error, Result};

/// Fixed header size in bytes: 2 (size) + 1 (version/type) + 8 (uid) + 1
/// (frame index) + 1 (total frames).
pub const HEADER_SIZE: usize = 13;

/// Maximum UDP payload size this protocol will ever construct.
pub const MAX_FRAME_SIZE: usize = 512;

/// Maximum frames per message: the frame index/total-frames fields are
/// 8-bit, so at most 255 frames can be addressed.
pub const MAX_FRAMES: usize = 255;

/// Body capacity of a non-start frame.
pub const CONTINUATION_BODY_CAP: usize = MAX_FRAME_SIZE - HEADER_SIZE;

/// The only protocol version this crate speaks.
pub const PROTOCOL_VERSION: u8 = 1;

const TYPE_MASK: u8 = 0x0F;

/// Frame type, encoded in the low nibble of the version/type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// First (and possibly only) frame of a message; carries the topic.
    Start = 1,
    /// A non-first frame of a multi-frame message.
    Continuation = 2,
    /// Subscriber request for a missing frame, by UID and index.
    FrameRequest = 3,
    /// Publisher's retransmitted answer to a `FrameRequest`.
    FrameResponse = 4,
    /// Publisher notice that a UID is no longer cached.
    MessageDropped = 5,
}

impl FrameType {
    fn from_nibble(n: u8) -> Result<Self> {
        match n {
            1 => Ok(Self::Start),
            2 => Ok(Self::Continuation),
            3 => Ok(Self::FrameRequest),
            4 => Ok(Self::FrameResponse),
            5 => Ok(Self::MessageDropped),
            other => Err(Error::MalformedFrame(format!(
                "unknown frame type nibble {other}"
            ))),
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Protocol version nibble as received (not enforced on receive path).
    pub version: u8,
    /// Frame type.
    pub frame_type: FrameType,
    /// 64-bit message UID.
    pub uid: u64,
    /// This frame's index among `total`.
    pub index: u8,
    /// Total frames in the message this frame belongs to.
    pub total: u8,
    /// Topic, present only when `frame_type` was `Start` on the wire.
    pub topic: Option<String>,
    /// Body bytes (empty for control frames).
    pub body: Vec<u8>,
}

/// Parse a received datagram into a [`Frame`].
///
/// Fails with [`Error::MalformedFrame`] if the buffer is shorter than the
/// declared size, if a start frame's topic length overruns the buffer, or if
/// the topic bytes are not valid UTF-8.
pub fn parse(buf: &[u8]) -> Result<Frame> {
    if buf.len() < HEADER_SIZE {
        return Err(Error::MalformedFrame(format!(
            "buffer of {} bytes shorter than header size {}",
            buf.len(),
            HEADER_SIZE
        )));
    }

    let size = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if buf.len() < size {
        return Err(Error::MalformedFrame(format!(
            "buffer of {} bytes shorter than declared size {}",
            buf.len(),
            size
        )));
    }

    let vt = buf[2];
    let version = vt >> 4;
    let frame_type = FrameType::from_nibble(vt & TYPE_MASK)?;
    let uid = u64::from_be_bytes(buf[3..11].try_into().expect("8-byte slice"));
    let index = buf[11];
    let total = buf[12];

    let (topic, body_start) = if frame_type == FrameType::Start {
        let topic_len = *buf
            .get(HEADER_SIZE)
            .ok_or_else(|| Error::MalformedFrame("missing topic length byte".into()))?
            as usize;
        let topic_start = HEADER_SIZE + 1;
        let topic_end = topic_start + topic_len;
        if buf.len() < topic_end {
            return Err(Error::MalformedFrame(
                "topic length overruns buffer".into(),
            ));
        }
        let topic = std::str::from_utf8(&buf[topic_start..topic_end])
            .map_err(|e| Error::MalformedFrame(format!("topic is not valid UTF-8: {e}")))?
            .to_string();
        (Some(topic), topic_end)
    } else {
        (None, HEADER_SIZE)
    };

    Ok(Frame {
        version,
        frame_type,
        uid,
        index,
        total,
        topic,
        body: buf[body_start..].to_vec(),
    })
}

fn write_header(buf: &mut Vec<u8>, size: u16, frame_type: FrameType, uid: u64, index: u8, total: u8) {
    buf.extend_from_slice(&size.to_be_bytes());
    buf.push((PROTOCOL_VERSION << 4) | (frame_type as u8));
    buf.extend_from_slice(&uid.to_be_bytes());
    buf.push(index);
    buf.push(total);
}

fn pack_start_frame(uid: u64, total: u8, topic: &[u8], body: &[u8]) -> Vec<u8> {
    let size = HEADER_SIZE + 1 + topic.len() + body.len();
    let mut buf = Vec::with_capacity(size);
    write_header(&mut buf, size as u16, FrameType::Start, uid, 0, total);
    buf.push(topic.len() as u8);
    buf.extend_from_slice(topic);
    buf.extend_from_slice(body);
    buf
}

fn pack_continuation_frame(uid: u64, index: u8, total: u8, body: &[u8]) -> Vec<u8> {
    let size = HEADER_SIZE + body.len();
    let mut buf = Vec::with_capacity(size);
    write_header(&mut buf, size as u16, FrameType::Continuation, uid, index, total);
    buf.extend_from_slice(body);
    buf
}

/// Pack a message into an ordered sequence of wire-ready frames.
///
/// Fails with [`Error::MessageTooLarge`] if the body would require more than
/// 255 frames.
pub fn pack(uid: u64, topic: &str, body: &[u8]) -> Result<Vec<Vec<u8>>> {
    let topic_bytes = topic.as_bytes();
    let first_cap = (MAX_FRAME_SIZE as isize) - (HEADER_SIZE as isize) - 1 - (topic_bytes.len() as isize);
    if first_cap < 0 {
        return Err(Error::MessageTooLarge { frames: usize::MAX });
    }
    let first_cap = first_cap as usize;

    if body.len() <= first_cap {
        return Ok(vec![pack_start_frame(uid, 1, topic_bytes, body)]);
    }

    let remaining = body.len() - first_cap;
    let extra_frames = remaining.div_ceil(CONTINUATION_BODY_CAP);
    let total = 1 + extra_frames;
    if total > MAX_FRAMES {
        return Err(Error::MessageTooLarge { frames: total });
    }
    let total_u8 = total as u8;

    let mut frames = Vec::with_capacity(total);
    frames.push(pack_start_frame(uid, total_u8, topic_bytes, &body[..first_cap]));

    let mut start = first_cap;
    for index in 1..total {
        let end = (start + CONTINUATION_BODY_CAP).min(body.len());
        frames.push(pack_continuation_frame(uid, index as u8, total_u8, &body[start..end]));
        start = end;
    }

    Ok(frames)
}

/// Rewrite every frame's type nibble in place to `FrameResponse`, so cached
/// copies are ready to answer retransmission requests without re-packing.
/// The topic bytes embedded in the first frame's payload are left untouched;
/// they are only re-interpreted as a topic by a receiver if the wire type
/// happens to be `Start` again, which a `FrameResponse` frame never is.
pub fn retarget(frames: &mut [Vec<u8>]) {
    for frame in frames {
        if frame.len() > 2 {
            frame[2] = (PROTOCOL_VERSION << 4) | (FrameType::FrameResponse as u8);
        }
    }
}

/// Pack a zero-body frame request for a missing frame.
pub fn pack_request(uid: u64, index: u8, total: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE);
    write_header(&mut buf, HEADER_SIZE as u16, FrameType::FrameRequest, uid, index, total);
    buf
}

/// Pack a zero-body drop notification.
pub fn pack_drop(uid: u64, index: u8, total: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE);
    write_header(&mut buf, HEADER_SIZE as u16, FrameType::MessageDropped, uid, index, total);
    buf
}
