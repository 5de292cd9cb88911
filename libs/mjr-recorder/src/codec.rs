//! Encoding of the MJR stream.
//!
//! A stream is laid out as:
//!
//! ```ignore
//! | "MJR00001" | info len (u16 BE) | info JSON | Frame | Frame | ...
//! ```
//!
//! and every frame as:
//!
//! ```ignore
//! | "MEETECHO" | len (u16 BE) | [timestamp (i64 BE), data only] | payload |
//! ```
//!
//! Nothing here decodes or inspects payloads; the post-processing tool owns that side.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use zerocopy::{
    Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::{BigEndian, U16},
};

use crate::Error;

/// Stream preamble, also carries the format version.
pub const HEADER: &[u8; 8] = b"MJR00001";
/// Magic preceding every frame.
pub const FRAME_HEADER: &[u8; 8] = b"MEETECHO";

const TIMESTAMP_LEN: usize = size_of::<i64>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
    Data,
}

impl MediaKind {
    /// Classifies a codec name, ignoring case. Unknown codecs yield `None`.
    pub fn from_codec(codec: &str) -> Option<Self> {
        match codec.to_ascii_lowercase().as_str() {
            "vp8" | "vp9" | "h264" => Some(MediaKind::Video),
            "opus" | "g711" | "pcmu" | "pcma" | "g722" => Some(MediaKind::Audio),
            "text" => Some(MediaKind::Data),
            _ => None,
        }
    }

    /// Single letter tag used in the info block.
    pub fn tag(self) -> &'static str {
        match self {
            MediaKind::Audio => "a",
            MediaKind::Video => "v",
            MediaKind::Data => "d",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Data => write!(f, "data"),
        }
    }
}

/// The one-time metadata record written before the first frame.
///
/// Field order is part of the format: `t`, `c`, `s`, `u`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Info<'a> {
    #[serde(rename = "t")]
    pub kind: &'a str,
    #[serde(rename = "c")]
    pub codec: &'a str,
    #[serde(rename = "s")]
    pub created_at: i64,
    #[serde(rename = "u")]
    pub first_frame_at: i64,
}

impl<'a> Info<'a> {
    pub fn new(kind: MediaKind, codec: &'a str, created_at: i64, first_frame_at: i64) -> Self {
        Self {
            kind: kind.tag(),
            codec,
            created_at,
            first_frame_at,
        }
    }
}

#[derive(IntoBytes, Immutable, KnownLayout, Unaligned, Debug, Clone, Copy)]
#[repr(C)]
pub struct FrameHeader {
    pub magic: [u8; 8],
    pub len: U16<BigEndian>,
}

impl FrameHeader {
    pub fn new(len: u16) -> Self {
        Self {
            magic: *FRAME_HEADER,
            len: U16::new(len),
        }
    }
}

/// Value of the frame length field for a payload of `payload_len` bytes.
pub fn frame_len(kind: MediaKind, payload_len: usize) -> Result<u16, Error> {
    if payload_len == 0 {
        return Err(Error::InvalidPayload("empty frame"));
    }
    let len = match kind {
        MediaKind::Data => payload_len.checked_add(TIMESTAMP_LEN),
        MediaKind::Audio | MediaKind::Video => Some(payload_len),
    };
    len.and_then(|len| u16::try_from(len).ok())
        .ok_or(Error::InvalidPayload("frame exceeds the 16 bit length field"))
}

/// Appends the length-prefixed info block to `buf`.
///
/// The JSON is compact (`{"t":"a",...}`). Older recordings used `": "` and
/// `", "` separators; readers parse the block as JSON so both are accepted.
pub fn encode_info(buf: &mut Vec<u8>, info: &Info<'_>) -> Result<(), Error> {
    let text = serde_json::to_vec(info)?;
    let len = u16::try_from(text.len()).map_err(|_| Error::InfoTooLarge(text.len()))?;
    buf.extend_from_slice(U16::<BigEndian>::new(len).as_bytes());
    buf.extend_from_slice(&text);
    Ok(())
}

/// Appends one frame envelope plus payload to `buf`. `timestamp` is only
/// emitted for data streams.
pub fn encode_frame(
    buf: &mut Vec<u8>,
    kind: MediaKind,
    payload: &[u8],
    timestamp: i64,
) -> Result<(), Error> {
    let len = frame_len(kind, payload.len())?;
    buf.extend_from_slice(FrameHeader::new(len).as_bytes());
    if kind == MediaKind::Data {
        buf.extend_from_slice(&timestamp.to_be_bytes());
    }
    buf.extend_from_slice(payload);
    Ok(())
}

/// Wall clock time in microseconds since the Unix epoch.
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}
