//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Length-prefixed framing helpers
//!
//! A frame is a 4-byte big-endian body length followed by the body. The
//! reactor never frames anything itself; these helpers exist for receive
//! callbacks that speak this convention.
//!
//! # Example
//!
//! ```
//! use ioport_server::framing::{consume_frames, encode_frame};
//!
//! let mut wire = encode_frame(b"hello").to_vec();
//! wire.extend_from_slice(&encode_frame(b"world")[..3]);
//!
//! let mut bodies = Vec::new();
//! let consumed = consume_frames(&wire, |body| bodies.push(body.to_vec()));
//! assert_eq!(consumed, 9);
//! assert_eq!(bodies, vec![b"hello".to_vec()]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Size of the length prefix
pub const FRAME_HEADER_LEN: usize = 4;

/// Total length of the first frame in `buf`, header included
///
/// Returns `None` until the whole frame has arrived.
pub fn frame_length(buf: &[u8]) -> Option<usize> {
    let header: [u8; FRAME_HEADER_LEN] = buf.get(..FRAME_HEADER_LEN)?.try_into().ok()?;
    let total = FRAME_HEADER_LEN.checked_add(u32::from_be_bytes(header) as usize)?;
    (buf.len() >= total).then_some(total)
}

/// Prefix `body` with its length
///
/// # Panics
///
/// Panics if `body` is longer than `u32::MAX` bytes.
pub fn encode_frame(body: &[u8]) -> Bytes {
    let len = u32::try_from(body.len()).expect("frame body exceeds u32::MAX bytes");
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.put_u32(len);
    frame.put_slice(body);
    frame.freeze()
}

/// Call `f` with the body of every complete frame at the front of `buf`
///
/// Returns the number of bytes covered by those frames, which is what a
/// receive callback should report as consumed.
pub fn consume_frames<F>(buf: &[u8], mut f: F) -> usize
where
    F: FnMut(&[u8]),
{
    let mut consumed = 0;
    while let Some(total) = frame_length(&buf[consumed..]) {
        f(&buf[consumed + FRAME_HEADER_LEN..consumed + total]);
        consumed += total;
    }
    consumed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_length() {
        assert_eq!(frame_length(b""), None);
        assert_eq!(frame_length(&[0, 0]), None);
        assert_eq!(frame_length(&[0, 0, 0, 3, b'a', b'b']), None);
        assert_eq!(frame_length(&[0, 0, 0, 3, b'a', b'b', b'c', b'd']), Some(7));
        assert_eq!(frame_length(&[0, 0, 0, 0]), Some(4));
    }

    #[test]
    fn test_encode_frame() {
        let frame = encode_frame(b"abc");
        assert_eq!(&frame[..], &[0, 0, 0, 3, b'a', b'b', b'c']);
        assert_eq!(frame_length(&frame), Some(frame.len()));
    }

    #[test]
    fn test_consume_frames_stops_at_partial() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_frame(b"one"));
        wire.extend_from_slice(&encode_frame(b""));
        wire.extend_from_slice(&encode_frame(b"three"));
        let complete = wire.len();
        wire.extend_from_slice(&[0, 0, 1]);

        let mut bodies = Vec::new();
        let consumed = consume_frames(&wire, |body| bodies.push(body.to_vec()));
        assert_eq!(consumed, complete);
        assert_eq!(bodies, vec![b"one".to_vec(), Vec::new(), b"three".to_vec()]);
    }

    #[test]
    fn test_huge_length_never_completes() {
        assert_eq!(frame_length(&[0xff, 0xff, 0xff, 0xff, 1, 2, 3]), None);
        assert_eq!(consume_frames(&[0xff, 0xff, 0xff, 0xff], |_| {}), 0);
    }
}
