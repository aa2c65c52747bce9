use std::time::Duration;

use statful_client::{Aggregation, AggregationFreq, ClientConfiguration, Metric, StatfulClient};

fn main() {
    tracing_subscriber::fmt::init();

    let token = std::env::var("STATFUL_API_TOKEN").expect("STATFUL_API_TOKEN must be set");

    let mut config = ClientConfiguration::new("demo");
    config.namespace = "http".to_string();
    config.flush_interval = Duration::from_secs(1);
    config.transport.token = Some(token);

    let client = StatfulClient::new(config).expect("failed to build Statful client");

    for i in 0..20u32 {
        client.counter("requests").expect("valid metric");
        client.gauge("temperature", 20.0 + f64::from(i) / 10.0).expect("valid metric");

        // Values aggregated locally go straight to the aggregated endpoint.
        client
            .aggregated_put(Metric::new("p99_latency", 120 + i), Aggregation::P99, AggregationFreq::Freq60)
            .expect("valid metric");

        std::thread::sleep(Duration::from_millis(250));
    }

    client.shutdown();
    println!("{:?}", client.telemetry());
}
