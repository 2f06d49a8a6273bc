//! End-to-end throughput benchmark for Relay.
//!
//! Every client sends text frames as fast as it can and counts the
//! broadcasts it receives, with real network I/O against a running server.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8420/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("Relay end-to-end throughput benchmark");
    println!("Make sure the server is running: cargo run --release --bin relay");
    println!();

    run_broadcast_benchmark(num_clients).await;
}

async fn run_broadcast_benchmark(num_clients: usize) {
    println!("Broadcast benchmark: {} clients", num_clients);
    println!("  Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let sent = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let sent = Arc::clone(&sent);
        let received = Arc::clone(&received);
        let barrier = Arc::clone(&barrier);

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(client_id, sent, received, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    barrier.wait().await;
    println!("All {} clients connected", num_clients);

    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    sent.store(0, Ordering::SeqCst);
    received.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let total_sent = sent.load(Ordering::SeqCst);
    let total_received = received.load(Ordering::SeqCst);
    let expected = total_sent * num_clients as u64;

    println!();
    println!("Results");
    println!("  Clients:          {:>12}", num_clients);
    println!("  Duration:         {:>12.2}s", elapsed);
    println!("  Frames sent:      {:>12}", total_sent);
    println!("  Frames received:  {:>12}", total_received);
    println!("  Send rate:        {:>12.0} msg/s", total_sent as f64 / elapsed);
    println!("  Delivery rate:    {:>12.0} msg/s", total_received as f64 / elapsed);
    if expected > 0 {
        println!(
            "  Delivered:        {:>12.1}%",
            total_received as f64 * 100.0 / expected as f64
        );
    }

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let url = format!("{}?id=bench-{}", SERVER_URL, client_id);
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    barrier.wait().await;

    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            if let Ok(Message::Text(_)) = result {
                received.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    let frame = Message::Text("x".repeat(64));
    loop {
        if sender.send(frame.clone()).await.is_err() {
            break;
        }
        sent.fetch_add(1, Ordering::Relaxed);
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
