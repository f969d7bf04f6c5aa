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

//! Property tests for the receive accumulator and send queue

use bytes::Bytes;
use ioport_server::framing::{consume_frames, encode_frame};
use ioport_server::{ConnectionError, RecvAccumulator, SendQueue};
use proptest::prelude::*;

fn arb_submissions() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..20)
}

/// Split `data` at the given cut points (taken modulo its length)
fn split_at_cuts(data: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut points: Vec<usize> = cuts
        .iter()
        .map(|cut| if data.is_empty() { 0 } else { cut % data.len() })
        .collect();
    points.push(0);
    points.push(data.len());
    points.sort_unstable();
    points.dedup();
    points
        .windows(2)
        .map(|w| data[w[0]..w[1]].to_vec())
        .collect()
}

proptest! {
    /// Bytes leave the queue in submission order, in chunks no larger than the bound,
    /// no matter how submissions interleave with completions.
    #[test]
    fn send_queue_preserves_order(
        submissions in arb_submissions(),
        chunk_size in 1usize..64,
        completions_between in prop::collection::vec(0usize..3, 20),
    ) {
        let mut queue = SendQueue::new(chunk_size);
        let mut wire = Vec::new();
        let mut in_flight: Option<Bytes> = None;

        for (i, submission) in submissions.iter().enumerate() {
            if let Some(chunk) = queue.submit(Bytes::copy_from_slice(submission)) {
                prop_assert!(in_flight.is_none(), "second send posted while one in flight");
                in_flight = Some(chunk);
            }
            for _ in 0..completions_between[i % completions_between.len()] {
                if let Some(chunk) = in_flight.take() {
                    prop_assert!(chunk.len() <= chunk_size);
                    wire.extend_from_slice(&chunk);
                    in_flight = queue.complete();
                }
            }
        }
        while let Some(chunk) = in_flight.take() {
            prop_assert!(chunk.len() <= chunk_size);
            wire.extend_from_slice(&chunk);
            in_flight = queue.complete();
        }

        prop_assert_eq!(wire, submissions.concat());
        prop_assert!(queue.is_idle());
    }

    /// A framed stream cut at arbitrary points yields exactly the original frames.
    #[test]
    fn accumulator_reassembles_frames(
        bodies in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 1..10),
        cuts in prop::collection::vec(any::<usize>(), 0..30),
    ) {
        let stream: Vec<u8> = bodies.iter().flat_map(|body| encode_frame(body).to_vec()).collect();
        let mut acc = RecvAccumulator::new(32767);
        let mut received = Vec::new();

        for piece in split_at_cuts(&stream, &cuts) {
            acc.feed(&piece, |data| consume_frames(data, |body| received.push(body.to_vec())))
                .unwrap();
        }

        prop_assert_eq!(received, bodies);
        prop_assert!(acc.is_empty());
    }

    /// The accumulator never holds more than its limit; exceeding it is an overflow.
    #[test]
    fn accumulator_respects_limit(
        pieces in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..50), 1..40),
        limit in 16usize..256,
    ) {
        let mut acc = RecvAccumulator::new(limit);
        for piece in pieces {
            match acc.feed(&piece, |_| 0) {
                Ok(_) => prop_assert!(acc.len() <= limit),
                Err(err) => {
                    let overflowed = matches!(err, ConnectionError::AccumulatorOverflow { .. });
                    prop_assert!(overflowed);
                    prop_assert!(acc.is_empty());
                    break;
                }
            }
        }
    }
}
