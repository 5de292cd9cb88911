#![allow(dead_code)]

use serde_json::Value;

/// A decoded MJR stream, enough to check framing in tests.
#[derive(Debug)]
pub struct Stream {
    pub info: Value,
    pub frames: Vec<Frame>,
}

#[derive(Debug, PartialEq)]
pub struct Frame {
    pub len: u16,
    pub timestamp: Option<i64>,
    pub payload: Vec<u8>,
}

/// Parses a stream starting at the `MJR00001` preamble.
pub fn parse(bytes: &[u8]) -> Stream {
    assert_eq!(&bytes[..8], b"MJR00001", "missing preamble");
    parse_body(&bytes[8..])
}

/// Parses everything after the preamble.
pub fn parse_body(bytes: &[u8]) -> Stream {
    let info_len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let info: Value = serde_json::from_slice(&bytes[2..2 + info_len]).expect("info is not json");
    let has_timestamp = info["t"] == "d";
    let mut rest = &bytes[2 + info_len..];
    let mut frames = vec![];
    while !rest.is_empty() {
        assert_eq!(&rest[..8], b"MEETECHO", "missing frame header");
        let len = u16::from_be_bytes([rest[8], rest[9]]);
        let body = &rest[10..10 + len as usize];
        let (timestamp, payload) = if has_timestamp {
            let (ts, payload) = body.split_at(8);
            (Some(i64::from_be_bytes(ts.try_into().unwrap())), payload)
        } else {
            (None, body)
        };
        frames.push(Frame {
            len,
            timestamp,
            payload: payload.to_vec(),
        });
        rest = &rest[10 + len as usize..];
    }
    Stream { info, frames }
}
