//! Delivery Performance Benchmarks
//!
//! Measures the engine-side cost of moving entries from a read result to a
//! subscriber.
//!
//! ## Benchmarks
//!
//! ### 1. Pull + Consume (`bench_pull_consume`)
//! - One full cycle against the in-memory operator: read, offer, flush, drain
//! - Tests different batch sizes (10, 100, 1000 entries)
//!
//! ### 2. Merged vs Generic (`bench_strategies`)
//! - Same subscriptions served by one merged read or one read each
//! - Tests different stream counts (4, 16, 64)
//!
//! ## Running
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench -p streamtap-client --bench delivery_bench
//!
//! # Run specific benchmark
//! cargo bench -p streamtap-client --bench delivery_bench pull_consume
//! ```

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::FutureExt;
use std::sync::Arc;
use streamtap_client::task::{GenericPullTask, MergedPullTask, PullTask};
use streamtap_client::{Flow, MemoryStreamOperator, Subscription};
use streamtap_core::{ReadOptions, StreamOffset};
use tokio_util::sync::CancellationToken;

fn fill(store: &MemoryStreamOperator, stream: &str, entries: usize) {
    let batch = (0..entries)
        .map(|n| vec![(Bytes::from("n"), Bytes::from(n.to_string()))])
        .collect();
    store.append_batch(stream, batch);
}

fn drain(flow: &mut Flow) -> usize {
    let mut received = 0;
    while let Some(Some(Ok(entry))) = flow.next_entry().now_or_never() {
        black_box(entry);
        received += 1;
    }
    received
}

/// Register one ready subscription per stream directly with `task`.
fn subscribe_all(
    task: &dyn PullTask,
    streams: &[String],
    options: ReadOptions,
) -> Vec<Flow> {
    streams
        .iter()
        .zip(1u64..)
        .map(|(stream, id)| {
            let (subscription, flow) =
                Subscription::new(id, StreamOffset::beginning(stream.as_str()), options, None);
            task.add(subscription).unwrap();
            flow.request(u64::MAX);
            flow
        })
        .collect()
}

fn bench_pull_consume(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("pull_consume");

    for batch_size in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &size| {
                let store = Arc::new(MemoryStreamOperator::new());
                fill(&store, "orders", size);
                let options = ReadOptions::new(size as i64, None, false).unwrap();

                b.to_async(&runtime).iter(|| {
                    let store = Arc::clone(&store);
                    async move {
                        let task = GenericPullTask::new(store, CancellationToken::new());
                        let mut flows = subscribe_all(&task, &["orders".to_string()], options);
                        task.pull().await;
                        task.consume();
                        black_box(drain(&mut flows[0]))
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_strategies(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("strategies");

    for stream_count in [4usize, 16, 64] {
        let store = Arc::new(MemoryStreamOperator::new());
        let streams: Vec<String> = (0..stream_count).map(|i| format!("stream-{}", i)).collect();
        for stream in &streams {
            fill(&store, stream, 10);
        }
        let options = ReadOptions::new(10, None, false).unwrap();
        group.throughput(Throughput::Elements((stream_count * 10) as u64));

        group.bench_with_input(
            BenchmarkId::new("merged", stream_count),
            &streams,
            |b, streams| {
                b.to_async(&runtime).iter(|| {
                    let store = Arc::clone(&store);
                    async move {
                        let task = MergedPullTask::new(store, options, CancellationToken::new());
                        let mut flows = subscribe_all(&task, streams, options);
                        task.pull().await;
                        task.consume();
                        black_box(flows.iter_mut().map(drain).sum::<usize>())
                    }
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("generic", stream_count),
            &streams,
            |b, streams| {
                b.to_async(&runtime).iter(|| {
                    let store = Arc::clone(&store);
                    async move {
                        let task = GenericPullTask::new(store, CancellationToken::new());
                        let mut flows = subscribe_all(&task, streams, options);
                        task.pull().await;
                        task.consume();
                        black_box(flows.iter_mut().map(drain).sum::<usize>())
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_pull_consume, bench_strategies);
criterion_main!(benches);
