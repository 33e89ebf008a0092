use std::time::{Duration, Instant};

use metrics_exporter_spectatord::{
    buckets::{self, PercentileBuckets},
    Writer as _, WriterBuilder,
};
use rand::Rng;
use tracing::info;

fn main() {
    tracing_subscriber::fmt::init();

    let writer = WriterBuilder::default()
        .with_location("udp://127.0.0.1:1234")
        .expect("failed to parse location")
        .with_buffer_size(60 * 1024)
        .with_flush_interval(Duration::from_secs(1))
        .build()
        .expect("failed to build spectatord writer");

    let latencies = PercentileBuckets::new();
    let mut rng = rand::rng();
    let started = Instant::now();
    let mut last_report = Instant::now();

    // Pretend to serve requests for a while, reporting latency both as a timer and as percentile buckets.
    while started.elapsed() < Duration::from_secs(30) {
        let latency_nanos = rng.random_range(1_000_000..250_000_000_i64);
        let status = if rng.random_bool(0.95) { "200" } else { "500" };

        writer.write(&format!("c:server.numRequests,status={}:1", status));
        writer.write(&format!("t:server.requestLatency:{}", latency_nanos as f64 / 1e9));

        let bucket = buckets::bucket_tag_value('T', buckets::bucket_index(latency_nanos));
        writer.write(&format!("c:server.requestLatencyPct,percentile={}:1", bucket));
        latencies.record(latency_nanos);

        if last_report.elapsed() >= Duration::from_secs(1) {
            let pcts = latencies.percentiles(&[50.0, 99.0]);
            let mean = latencies.total_amount() as f64 / latencies.count().max(1) as f64;
            let variance = latencies.total_of_squares() / latencies.count().max(1) as f64 - mean * mean;
            info!(
                count = latencies.count(),
                p50_ms = pcts[0] / 1e6,
                p99_ms = pcts[1] / 1e6,
                max_ms = latencies.max() as f64 / 1e6,
                stddev_ms = variance.max(0.0).sqrt() / 1e6,
                "Request latency over the last second."
            );
            latencies.reset();
            last_report = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(10));
    }

    writer.close().expect("failed to close writer");
}
