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

//! Benchmarks for per-connection buffering and the connection registry

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ioport_server::framing::{consume_frames, encode_frame};
use ioport_server::{ConnectionRegistry, RecvAccumulator, SendQueue, ServerMetrics, SocketPool};
use std::hint::black_box;
use std::sync::Arc;

fn framed_stream(frames: usize, body_len: usize) -> Vec<u8> {
    let body = vec![0x42u8; body_len];
    (0..frames).flat_map(|_| encode_frame(&body).to_vec()).collect()
}

fn bench_recv_accumulator(c: &mut Criterion) {
    let mut group = c.benchmark_group("recv_accumulator");

    for piece in [64usize, 512, 4096] {
        let stream = framed_stream(64, 100);
        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::new("framed", piece), &piece, |b, &piece| {
            b.iter(|| {
                let mut acc = RecvAccumulator::new(32767);
                let mut frames = 0usize;
                for chunk in stream.chunks(piece) {
                    acc.feed(chunk, |data| consume_frames(data, |_| frames += 1))
                        .unwrap();
                }
                black_box(frames)
            })
        });
    }

    group.finish();
}

fn bench_send_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_queue");

    for size in [1024usize, 65536, 1 << 20] {
        let payload = Bytes::from(vec![0u8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("drain", size), &payload, |b, payload| {
            b.iter(|| {
                let mut queue = SendQueue::new(4096);
                let mut sent = 0usize;
                let mut next = queue.submit(payload.clone());
                while let Some(chunk) = next {
                    sent += chunk.len();
                    next = queue.complete();
                }
                black_box(sent)
            })
        });
    }

    group.bench_function("queued_behind_in_flight", |b| {
        let small = Bytes::from_static(b"0123456789abcdef");
        b.iter(|| {
            let mut queue = SendQueue::new(4096);
            let mut next = queue.submit(small.clone());
            for _ in 0..32 {
                black_box(queue.submit(small.clone()));
            }
            while let Some(chunk) = next {
                black_box(chunk);
                next = queue.complete();
            }
        })
    });

    group.finish();
}

fn bench_registry_and_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_and_pool");

    group.bench_function("registry_reserve_fill_remove", |b| {
        let registry = ConnectionRegistry::<u64>::new();
        b.iter(|| {
            let handle = registry.reserve().unwrap();
            registry.fill(handle, 7).unwrap();
            black_box(registry.remove(handle))
        })
    });

    group.bench_function("pool_acquire_release", |b| {
        let pool = SocketPool::new(128, 4096, Arc::new(ServerMetrics::new()));
        b.iter(|| {
            let socket = pool.acquire();
            black_box(pool.release(socket))
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_recv_accumulator,
    bench_send_queue,
    bench_registry_and_pool
);
criterion_main!(benches);
