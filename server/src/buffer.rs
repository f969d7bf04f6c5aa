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

//! Per-connection buffering state machines
//!
//! [`RecvAccumulator`] reassembles byte streams the application has only
//! partially consumed, and [`SendQueue`] drains outgoing submissions as a
//! sequence of bounded writes in submission order. Neither type does any
//! I/O or locking; [`Connection`](crate::Connection) wraps each in its own
//! lock and posts the operations they ask for.

use crate::{ConnectionError, ConnectionResult};
use bytes::Bytes;
use std::collections::VecDeque;

/// Received bytes not yet consumed by the application
///
/// The accumulator is capped. A delivery that would push the backlog past
/// the cap fails with [`ConnectionError::AccumulatorOverflow`], as does a
/// callback that consumes nothing from a backlog already at the cap.
#[derive(Debug)]
pub struct RecvAccumulator {
    buffer: Vec<u8>,
    limit: usize,
}

impl RecvAccumulator {
    /// Create an empty accumulator with the given cap
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
        }
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Configured cap
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Buffered bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop all buffered bytes and release the allocation
    pub fn reset(&mut self) {
        self.buffer = Vec::new();
    }

    /// Deliver newly received bytes to `consume`
    ///
    /// `consume` is handed the largest contiguous run of unprocessed bytes
    /// and returns how many leading bytes it fully handled. Returns the
    /// number of bytes consumed by this delivery.
    pub fn feed<F>(&mut self, data: &[u8], consume: F) -> ConnectionResult<usize>
    where
        F: FnOnce(&[u8]) -> usize,
    {
        if self.buffer.is_empty() {
            let consumed = consume(data).min(data.len());
            let rest = &data[consumed..];
            if rest.len() > self.limit {
                return Err(self.overflow(rest.len()));
            }
            self.buffer.extend_from_slice(rest);
            return Ok(consumed);
        }

        let size = self.buffer.len() + data.len();
        if size > self.limit {
            return Err(self.overflow(size));
        }
        self.buffer.extend_from_slice(data);

        let total = self.buffer.len();
        let consumed = consume(&self.buffer).min(total);
        if consumed == total {
            self.buffer.clear();
        } else if consumed > 0 {
            self.buffer.drain(..consumed);
        } else if total >= self.limit {
            return Err(self.overflow(total));
        }
        Ok(consumed)
    }

    fn overflow(&mut self, buffered: usize) -> ConnectionError {
        self.reset();
        ConnectionError::AccumulatorOverflow {
            buffered,
            limit: self.limit,
        }
    }
}

/// Outgoing submissions drained one bounded chunk at a time
///
/// At most one chunk is in flight. While it is, new submissions wait whole
/// in the pending queue; the active submission is always fully drained
/// before the next pending one starts, so bytes reach the wire in exactly
/// the order they were submitted.
#[derive(Debug)]
pub struct SendQueue {
    chunk_size: usize,
    active: Bytes,
    pending: VecDeque<Bytes>,
    in_flight: bool,
}

impl SendQueue {
    /// Create an idle queue writing at most `chunk_size` bytes per send
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            active: Bytes::new(),
            pending: VecDeque::new(),
            in_flight: false,
        }
    }

    /// Submit bytes for transmission
    ///
    /// Returns the chunk to post now, or `None` if a send is already in
    /// flight (the submission is queued) or the submission is empty.
    pub fn submit(&mut self, data: Bytes) -> Option<Bytes> {
        if data.is_empty() {
            return None;
        }
        if self.in_flight {
            self.pending.push_back(data);
            return None;
        }
        self.active = data;
        self.next_chunk()
    }

    /// Record completion of the in-flight chunk
    ///
    /// Returns the next chunk to post, or `None` when everything submitted
    /// has been written.
    pub fn complete(&mut self) -> Option<Bytes> {
        self.in_flight = false;
        if self.active.is_empty() {
            match self.pending.pop_front() {
                Some(next) => self.active = next,
                None => return None,
            }
        }
        self.next_chunk()
    }

    /// Check if a chunk is in flight
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Check if nothing is in flight or waiting
    pub fn is_idle(&self) -> bool {
        !self.in_flight && self.active.is_empty() && self.pending.is_empty()
    }

    /// Bytes not yet handed to a send (active remainder plus pending queue)
    pub fn queued_bytes(&self) -> usize {
        self.active.len() + self.pending.iter().map(Bytes::len).sum::<usize>()
    }

    /// Number of whole submissions waiting behind the active one
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop everything, including the in-flight marker
    pub fn clear(&mut self) {
        self.active = Bytes::new();
        self.pending.clear();
        self.in_flight = false;
    }

    fn next_chunk(&mut self) -> Option<Bytes> {
        if self.active.is_empty() {
            return None;
        }
        let n = self.chunk_size.min(self.active.len());
        self.in_flight = true;
        Some(self.active.split_to(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_message_accumulates_until_complete() {
        let mut acc = RecvAccumulator::new(32767);
        let complete = |bytes: &[u8]| if bytes.len() >= 4 { 4 } else { 0 };

        assert_eq!(acc.feed(b"AB", complete).unwrap(), 0);
        assert_eq!(acc.as_slice(), b"AB");

        assert_eq!(acc.feed(b"CD", complete).unwrap(), 4);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_unconsumed_bytes_grow_accumulator() {
        let mut acc = RecvAccumulator::new(32767);
        let mut seen = Vec::new();

        acc.feed(b"AB", |bytes| {
            seen.push(bytes.to_vec());
            0
        })
        .unwrap();
        assert_eq!(acc.as_slice(), b"AB");

        acc.feed(b"CD", |bytes| {
            seen.push(bytes.to_vec());
            0
        })
        .unwrap();
        assert_eq!(acc.as_slice(), b"ABCD");

        acc.feed(b"", |bytes| {
            seen.push(bytes.to_vec());
            4
        })
        .unwrap();
        assert!(acc.is_empty());
        assert_eq!(seen, vec![b"AB".to_vec(), b"ABCD".to_vec(), b"ABCD".to_vec()]);
    }

    #[test]
    fn test_partial_consumption_compacts_tail() {
        let mut acc = RecvAccumulator::new(32767);
        acc.feed(b"abc", |_| 0).unwrap();

        let consumed = acc.feed(b"defgh", |bytes| {
            assert_eq!(bytes, b"abcdefgh");
            5
        });
        assert_eq!(consumed.unwrap(), 5);
        assert_eq!(acc.as_slice(), b"fgh");
    }

    #[test]
    fn test_direct_delivery_keeps_remainder() {
        let mut acc = RecvAccumulator::new(32767);
        let consumed = acc.feed(b"hello world", |bytes| bytes.len() - 3).unwrap();
        assert_eq!(consumed, 8);
        assert_eq!(acc.as_slice(), b"rld");
    }

    #[test]
    fn test_consumed_count_is_clamped() {
        let mut acc = RecvAccumulator::new(32767);
        assert_eq!(acc.feed(b"xyz", |_| 100).unwrap(), 3);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_overflow_on_append() {
        let mut acc = RecvAccumulator::new(8);
        acc.feed(b"12345", |_| 0).unwrap();

        let err = acc.feed(b"6789", |_| 0).unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::AccumulatorOverflow {
                buffered: 9,
                limit: 8
            }
        ));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_overflow_when_full_and_nothing_consumed() {
        let mut acc = RecvAccumulator::new(8);
        acc.feed(b"1234", |_| 0).unwrap();

        let err = acc.feed(b"5678", |_| 0).unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::AccumulatorOverflow { buffered: 8, .. }
        ));
    }

    #[test]
    fn test_full_accumulator_survives_if_consumed() {
        let mut acc = RecvAccumulator::new(8);
        acc.feed(b"1234", |_| 0).unwrap();
        assert_eq!(acc.feed(b"5678", |_| 2).unwrap(), 2);
        assert_eq!(acc.as_slice(), b"345678");
    }

    #[test]
    fn test_send_small_submission_posts_once() {
        let mut queue = SendQueue::new(4096);
        let chunk = queue.submit(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(&chunk[..], b"hello");
        assert!(queue.is_in_flight());

        assert!(queue.complete().is_none());
        assert!(queue.is_idle());
    }

    #[test]
    fn test_send_large_submission_is_chunked() {
        let mut queue = SendQueue::new(4);
        let first = queue.submit(Bytes::from_static(b"0123456789")).unwrap();
        assert_eq!(&first[..], b"0123");
        assert_eq!(queue.queued_bytes(), 6);

        assert_eq!(&queue.complete().unwrap()[..], b"4567");
        assert_eq!(&queue.complete().unwrap()[..], b"89");
        assert!(queue.complete().is_none());
    }

    #[test]
    fn test_send_queues_while_in_flight() {
        let mut queue = SendQueue::new(4);
        assert!(queue.submit(Bytes::from_static(b"abcdef")).is_some());
        assert!(queue.submit(Bytes::from_static(b"XY")).is_none());
        assert!(queue.submit(Bytes::from_static(b"Z")).is_none());
        assert_eq!(queue.pending_len(), 2);

        let mut wire = b"abcd".to_vec();
        while let Some(chunk) = queue.complete() {
            wire.extend_from_slice(&chunk);
        }
        assert_eq!(wire, b"abcdefXYZ");
        assert!(queue.is_idle());
    }

    #[test]
    fn test_send_empty_submission() {
        let mut queue = SendQueue::new(4);
        assert!(queue.submit(Bytes::new()).is_none());
        assert!(!queue.is_in_flight());

        queue.submit(Bytes::from_static(b"a")).unwrap();
        assert!(queue.submit(Bytes::new()).is_none());
        assert_eq!(queue.pending_len(), 0);
    }
}
