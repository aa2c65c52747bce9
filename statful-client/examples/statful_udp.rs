use std::time::{Duration, Instant};

use rand::Rng as _;
use statful_client::{Aggregation, ClientConfiguration, MetricKind, StatfulClient, Tags, TransportKind};

fn main() {
    tracing_subscriber::fmt::init();

    let mut config = ClientConfiguration::new("demo");
    config.namespace = "udp".to_string();
    config.app = Some("statful-demo".to_string());
    config.tags = Tags::from([("host", "localhost")]);
    config.transport.kind = TransportKind::Udp;
    config.transport.host = "localhost".to_string();

    let client = StatfulClient::new(config).expect("failed to build Statful client");

    let mut rng = rand::rng();
    let started = Instant::now();

    // Pretend to do some work for a while, reporting on every iteration.
    while started.elapsed() < Duration::from_secs(30) {
        let work_start = Instant::now();
        std::thread::sleep(Duration::from_millis(rng.random_range(5..50)));
        let elapsed_ms = work_start.elapsed().as_millis() as u64;

        client.timer("work_duration", elapsed_ms).expect("valid metric");
        client.counter("work_iterations").expect("valid metric");
        client.gauge("queue_depth", rng.random_range(0..100)).expect("valid metric");

        if rng.random_bool(0.1) {
            client
                .sender(MetricKind::Counter, "unlucky_iterations", 1)
                .with_tag("reason", "random")
                .with_aggregations([Aggregation::Sum])
                .send()
                .expect("valid metric");
        }
    }

    println!("{:?}", client.telemetry());
}
