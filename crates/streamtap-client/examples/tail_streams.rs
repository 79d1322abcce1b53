//! Tail Streams Example
//!
//! Tails two streams through one merged container while a background
//! producer appends to them, then shuts down and prints the delivery metrics.
//!
//! Run with:
//! ```bash
//! RUST_LOG=streamtap_client=debug cargo run --package streamtap-client --example tail_streams
//! ```

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use streamtap_client::{ContainerStrategy, MemoryStreamOperator, StreamContainer};
use streamtap_core::{ReadOptions, StreamOffset};
use tracing_subscriber::EnvFilter;

const ENTRIES_PER_STREAM: usize = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    streamtap_observability::init();

    println!("\n🎯 StreamTap Tail Example");
    println!("=========================\n");

    let store = Arc::new(MemoryStreamOperator::new());
    let options = ReadOptions::new(10, Some(200), false)?;

    let container = StreamContainer::builder()
        .operator(store.clone())
        .strategy(ContainerStrategy::Merged(options))
        .pull_interval(Duration::from_millis(20))
        .shutdown_timeout(Duration::from_secs(1))
        .build()?;
    println!("🚀 Container started ({:?})\n", container.strategy());

    let mut tails = Vec::new();
    for stream in ["orders", "payments"] {
        let mut flow = container.subscribe(StreamOffset::latest(stream), options)?;
        flow.request(5);

        tails.push(tokio::spawn(async move {
            let mut seen = 0;
            while let Some(entry) = flow.next().await {
                let entry = entry?;
                let amount = entry
                    .field("amount")
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .unwrap_or_default();
                println!("   📨 {:<8} {} amount={}", entry.stream, entry.id, amount);

                seen += 1;
                if seen == ENTRIES_PER_STREAM {
                    break;
                }
                flow.request(1);
            }
            anyhow::Ok(seen)
        }));
    }

    let producer = tokio::spawn({
        let store = Arc::clone(&store);
        async move {
            // let both subscriptions reach their first blocking read
            tokio::time::sleep(Duration::from_millis(50)).await;
            for n in 0..ENTRIES_PER_STREAM {
                store.append("orders", [("amount", (n * 10).to_string())]);
                store.append("payments", [("amount", (n * 7).to_string())]);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    });

    producer.await?;
    for tail in tails {
        match tokio::time::timeout(Duration::from_secs(5), tail).await {
            Ok(joined) => println!("\n   ✅ Tail finished after {} entries", joined??),
            Err(_) => println!("\n   ⚠️  Tail did not finish in time"),
        }
    }

    container.shutdown().await;
    println!("\n🛑 Container {:?}\n", container.state());

    println!("📊 Metrics");
    for line in streamtap_observability::exporter::encode_metrics()?
        .lines()
        .filter(|line| line.starts_with("streamtap_entries"))
    {
        println!("   {}", line);
    }

    Ok(())
}
