// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ingest pipeline example.
//!
//! Demonstrates:
//! 1. Two typed producers with their own processors
//!    - API request telemetry: drops on a full queue, never stalls the caller
//!    - Audit events: blocks on a full queue, never loses an accepted item
//! 2. A flaky sink behind retry and a circuit breaker
//! 3. Graceful drain on shutdown
//! 4. Displaying the metrics the engine recorded
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=info cargo run --example ingest_pipeline
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use tracing_subscriber::EnvFilter;

use ingest_engine::{
    BatchConfig, BatchProcessor, CircuitBreaker, FacadeMetrics, MemorySink, ResilienceConfig,
    ResilientSink, Sink, SinkError,
};

#[derive(Debug, Clone)]
struct ApiRequest {
    workspace_id: String,
    path: String,
    status: u16,
    latency_ms: u64,
}

#[derive(Debug, Clone)]
struct AuditEvent {
    actor: String,
    action: String,
}

/// Columnar store stand-in: every third call fails with a transient error.
struct FlakyWarehouse<T> {
    calls: AtomicU64,
    store: MemorySink<T>,
}

impl<T: Clone + Send + Sync> FlakyWarehouse<T> {
    fn new(name: &str) -> Self {
        Self {
            calls: AtomicU64::new(0),
            store: MemorySink::new(name),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> Sink<T> for FlakyWarehouse<T> {
    fn name(&self) -> &str {
        self.store.name()
    }

    async fn deliver(&self, batch: &[T]) -> Result<(), SinkError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(5)).await;
        if call % 3 == 0 {
            return Err(SinkError::Unavailable("503 from warehouse".into()));
        }
        self.store.deliver(batch).await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures everything the engine records)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           ingest-engine: Pipeline Example                     ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Sinks: one breaker shared by both item types writing to the warehouse
    // ─────────────────────────────────────────────────────────────────────────
    let resilience = ResilienceConfig {
        initial_backoff_ms: 10,
        max_backoff_ms: 100,
        ..Default::default()
    };
    resilience.validate()?;
    let breaker = Arc::new(CircuitBreaker::new("warehouse", resilience.circuit()));

    let requests_sink = Arc::new(ResilientSink::with_breaker(
        FlakyWarehouse::<ApiRequest>::new("warehouse"),
        Arc::clone(&breaker),
        resilience.retry(),
    ));
    let audit_sink = Arc::new(ResilientSink::with_breaker(
        FlakyWarehouse::<AuditEvent>::new("warehouse"),
        Arc::clone(&breaker),
        resilience.retry(),
    ));

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Processors: one per item type, each with its own policy
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Starting processors...");
    let requests: BatchProcessor<ApiRequest> = BatchProcessor::new(
        BatchConfig {
            batch_size: 50,
            buffer_capacity: 500,
            flush_interval_ms: 200,
            consumers: 2,
            drop_on_full: true,
            ..BatchConfig::named("api_requests")
        },
        requests_sink.clone(),
        Arc::new(FacadeMetrics),
    )?;
    let audit: BatchProcessor<AuditEvent> = BatchProcessor::new(
        BatchConfig {
            batch_size: 20,
            buffer_capacity: 40,
            flush_interval_ms: 500,
            drop_on_full: false,
            ..BatchConfig::named("audit_events")
        },
        audit_sink.clone(),
        Arc::new(FacadeMetrics),
    )?;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Produce
    // ─────────────────────────────────────────────────────────────────────────
    println!("🚀 Producing 2000 API requests and 100 audit events...");
    for i in 0..2000u64 {
        requests
            .enqueue(ApiRequest {
                workspace_id: format!("ws_{}", i % 7),
                path: "/v1/keys.verifyKey".to_string(),
                status: if i % 50 == 0 { 500 } else { 200 },
                latency_ms: 3 + i % 40,
            })
            .await;

        if i % 20 == 0 {
            audit
                .enqueue(AuditEvent {
                    actor: format!("user_{}", i % 3),
                    action: "key.create".to_string(),
                })
                .await;
        }
        if i % 100 == 0 {
            tokio::task::yield_now().await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Drain and report
    // ─────────────────────────────────────────────────────────────────────────
    println!("🛑 Draining...");
    requests.drain().await;
    audit.drain().await;

    let stored = requests_sink.inner().store.items();
    let errors = stored.iter().filter(|r| r.status >= 500).count();
    let avg_latency = stored.iter().map(|r| r.latency_ms).sum::<u64>() as f64 / stored.len().max(1) as f64;
    let workspaces: std::collections::HashSet<_> = stored.iter().map(|r| r.workspace_id.as_str()).collect();
    println!("\n📊 Delivered:");
    println!(
        "   api_requests: {} items ({} errors, {} workspaces, avg {:.1}ms, path {})",
        stored.len(),
        errors,
        workspaces.len(),
        avg_latency,
        stored.first().map(|r| r.path.as_str()).unwrap_or("-"),
    );
    let audit_items = audit_sink.inner().store.items();
    let actors: std::collections::HashSet<_> = audit_items.iter().map(|e| e.actor.as_str()).collect();
    println!(
        "   audit_events: {} items from {} actors (first action: {})",
        audit_items.len(),
        actors.len(),
        audit_items.first().map(|e| e.action.as_str()).unwrap_or("-"),
    );
    println!(
        "   breaker '{}': state={} calls={} failures={} rejections={}",
        breaker.name(),
        breaker.state(),
        breaker.calls_total(),
        breaker.failures(),
        breaker.rejections(),
    );

    println!("\n📈 Metrics:");
    dump_metrics(&snapshotter);

    println!("\n✅ Done");
    Ok(())
}

/// Dump all captured metrics grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, label_str, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    histograms.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }

    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {}{} = {:.2}", name, labels, value);
        }
    }

    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, labels, count, sum) in &histograms {
            let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
            println!("   │  └─ {}{} count={} avg={:.4}", name, labels, count, avg);
        }
    }

    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
