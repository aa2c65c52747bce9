use std::{io, net::UdpSocket, time::Duration};

use statful_client::{
    Aggregation, AggregationFreq, ClientConfiguration, Metric, StatfulClient, TransportConfiguration, TransportKind,
    UdpTransport,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::TRACE).try_init();
}

fn collector(read_timeout: Duration) -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("failed to bind collector socket");
    socket.set_read_timeout(Some(read_timeout)).expect("failed to set read timeout");
    let port = socket.local_addr().expect("collector has no local address").port();
    (socket, port)
}

fn transport(port: u16) -> TransportConfiguration {
    TransportConfiguration {
        kind: TransportKind::Udp,
        host: "127.0.0.1".to_owned(),
        port: Some(port),
        ..Default::default()
    }
}

fn config(port: u16, flush_size: usize) -> ClientConfiguration {
    let mut config = ClientConfiguration::new("app");
    config.namespace = "web".to_owned();
    config.flush_size = flush_size;
    config.flush_interval = Duration::ZERO;
    config.transport = transport(port);
    config
}

fn recv(socket: &UdpSocket) -> io::Result<String> {
    let mut buf = [0u8; 2048];
    let len = socket.recv(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

#[test]
fn full_buffer_is_sent_as_one_datagram() {
    init_tracing();
    let (collector, port) = collector(Duration::from_secs(5));

    let client = StatfulClient::new(config(port, 2)).expect("client should build");
    client
        .put(
            Metric::new("requests", 42)
                .with_tag("unit", "ms")
                .with_aggregation(Aggregation::Avg)
                .with_timestamp(100),
        )
        .unwrap();
    client.put(Metric::new("errors", 1).with_timestamp(101)).unwrap();

    let datagram = recv(&collector).expect("collector should receive a datagram");
    assert_eq!(datagram, "app.web.requests,unit=ms 42 100 avg,10\napp.web.errors 1 101");

    let telemetry = client.telemetry();
    assert_eq!(telemetry.batches_sent, 1);
    assert_eq!(telemetry.lines_sent, 2);
    assert_eq!(telemetry.bytes_sent, datagram.len() as u64);
}

#[test]
fn shutdown_flushes_buffered_lines() {
    init_tracing();
    let (collector, port) = collector(Duration::from_secs(5));

    let client = StatfulClient::new(config(port, 10)).expect("client should build");
    client.sender(statful_client::MetricKind::Counter, "logins", 1).with_timestamp(100).send().unwrap();
    client.shutdown();

    let datagram = recv(&collector).expect("collector should receive a datagram");
    assert_eq!(datagram, "app.web.logins 1 100 count,sum,10");
}

#[test]
fn periodic_flush_sends_without_reaching_flush_size() {
    init_tracing();
    let (collector, port) = collector(Duration::from_secs(5));

    let mut config = config(port, 10);
    config.flush_interval = Duration::from_millis(100);
    let client = StatfulClient::new(config).expect("client should build");
    client.put(Metric::new("heartbeat", 1).with_timestamp(100)).unwrap();

    let datagram = recv(&collector).expect("periodic flush should send a datagram");
    assert_eq!(datagram, "app.web.heartbeat 1 100");
}

#[test]
fn aggregated_metrics_are_dropped_over_udp() {
    init_tracing();
    let (collector, port) = collector(Duration::from_millis(200));

    let client = StatfulClient::new(config(port, 1)).expect("client should build");
    client
        .aggregated_put(Metric::new("latency", 5).with_timestamp(100), Aggregation::Avg, AggregationFreq::Freq10)
        .unwrap();

    let telemetry = client.telemetry();
    assert_eq!(telemetry.batches_failed, 1);
    assert_eq!(telemetry.lines_dropped, 1);
    assert!(recv(&collector).is_err());
}

#[test]
fn transport_connects_lazily() {
    let (collector, port) = collector(Duration::from_secs(5));

    let transport = UdpTransport::new(&transport(port));
    assert!(!transport.is_connected());

    statful_client::Transport::send(&transport, "app.web.m 1 100").unwrap();
    assert!(transport.is_connected());
    assert_eq!(recv(&collector).unwrap(), "app.web.m 1 100");

    let result = statful_client::Transport::send_aggregated(
        &transport,
        "app.web.m 1 100",
        Aggregation::Avg,
        AggregationFreq::Freq10,
    );
    assert!(result.is_err_and(|e| e.is_unsupported()));
}
