use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use http_body_util::{BodyExt, Collected, Full};
use hyper::{
    body::Bytes,
    header::{HeaderValue, CONTENT_TYPE},
    Method, Request, Uri,
};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioTimer},
};
use parking_lot::RwLock;
use tokio::runtime::{self, Runtime};
use tracing::{debug, trace};

use super::{Transport, TransportError};
use crate::{
    config::{BuildError, TransportConfiguration},
    model::{Aggregation, AggregationFreq},
};

const TOKEN_HEADER: &str = "M-Api-Token";
const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const RESULT_GRACE: Duration = Duration::from_millis(500);

type HttpsClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Returns the path that metrics aggregated with the given aggregation and frequency are sent to.
pub fn aggregated_path(aggregation: Aggregation, frequency: AggregationFreq) -> String {
    format!("/tel/v2.0/metrics/aggregation/{}/frequency/{}", aggregation.as_str(), frequency.as_secs())
}

/// Sends batches to the collector with HTTP `PUT` requests over pooled connections.
///
/// Requests are driven by a private Tokio runtime, and `send` blocks the calling thread until the request completes or
/// times out. The calling thread never enters the runtime, so the transport can be used, and dropped, from within an
/// asynchronous context, at the cost of blocking that context's thread for the duration of the request.
pub struct HttpTransport {
    client: HttpsClient,
    runtime: RwLock<Option<Runtime>>,
    base_url: String,
    metrics_uri: Uri,
    token: Option<HeaderValue>,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Creates an HTTP transport for the given configuration.
    ///
    /// # Errors
    ///
    /// If the API token is not a valid header value, the collector URL is invalid, the native root certificates
    /// cannot be loaded, or the runtime cannot be created, an error is returned.
    pub fn new(config: &TransportConfiguration) -> Result<Self, BuildError> {
        let token = config
            .token
            .as_deref()
            .map(|token| {
                let mut header = HeaderValue::from_str(token).map_err(|_| BuildError::InvalidToken)?;
                header.set_sensitive(true);
                Ok(header)
            })
            .transpose()?;

        let base_url = config.base_url();
        let metrics_uri = parse_uri(&format!("{base_url}{}", config.api_version.metrics_path()))
            .map_err(|reason| BuildError::InvalidConfiguration { reason })?;

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(config.connect_timeout));

        // Plaintext collectors never need the native root certificates, which may not even be present.
        let tls = hyper_rustls::HttpsConnectorBuilder::new();
        let tls = if config.secure {
            tls.with_native_roots().map_err(BuildError::Http)?
        } else {
            tls.with_tls_config(
                rustls::ClientConfig::builder()
                    .with_root_certificates(rustls::RootCertStore::empty())
                    .with_no_client_auth(),
            )
        };
        let https = tls
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client: HttpsClient = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.pool_size)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_timer(TokioTimer::new())
            .build(https);

        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("statful-client-http")
            .enable_all()
            .build()
            .map_err(BuildError::Http)?;

        Ok(HttpTransport {
            client,
            runtime: RwLock::new(Some(runtime)),
            base_url,
            metrics_uri,
            token,
            request_timeout: config.socket_timeout,
        })
    }

    fn put(&self, uri: Uri, batch: &str) -> Result<(), TransportError> {
        let mut builder = Request::builder().method(Method::PUT).uri(uri).header(CONTENT_TYPE, CONTENT_TYPE_TEXT);
        if let Some(token) = &self.token {
            builder = builder.header(TOKEN_HEADER, token.clone());
        }
        let req = builder.body(Full::from(batch.to_owned())).map_err(|e| TransportError::Request(e.to_string()))?;

        // The request is driven by the private runtime, never by the calling thread, which may itself be a runtime
        // worker.
        let (result_tx, result_rx) = bounded(1);
        {
            let runtime = self.runtime.read();
            let runtime = runtime.as_ref().ok_or(TransportError::ShutDown)?;
            let client = self.client.clone();
            let request_timeout = self.request_timeout;
            runtime.spawn(async move {
                let _ = result_tx.send(request(client, req, request_timeout).await);
            });
        }

        match result_rx.recv_timeout(self.request_timeout + RESULT_GRACE) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout(self.request_timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::ShutDown),
        }
    }
}

async fn request(client: HttpsClient, req: Request<Full<Bytes>>, timeout: Duration) -> Result<(), TransportError> {
    let response = tokio::time::timeout(timeout, client.request(req))
        .await
        .map_err(|_| TransportError::Timeout(timeout))??;

    let status = response.status();
    if status.is_success() {
        trace!(status = status.as_u16(), "Batch accepted by collector.");
        return Ok(());
    }

    let body = response
        .into_body()
        .collect()
        .await
        .map(Collected::to_bytes)
        .map_err(|_| ())
        .and_then(|b| String::from_utf8(b[..].to_vec()).map_err(|_| ()))
        .unwrap_or_else(|()| String::from("<failed to read response body>"));
    Err(TransportError::Status { status: status.as_u16(), body })
}

impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn send(&self, batch: &str) -> Result<(), TransportError> {
        self.put(self.metrics_uri.clone(), batch)
    }

    fn send_aggregated(
        &self,
        batch: &str,
        aggregation: Aggregation,
        frequency: AggregationFreq,
    ) -> Result<(), TransportError> {
        let uri = parse_uri(&format!("{}{}", self.base_url, aggregated_path(aggregation, frequency)))
            .map_err(TransportError::Request)?;
        self.put(uri, batch)
    }

    fn shutdown(&self) {
        if let Some(runtime) = self.runtime.write().take() {
            debug!("Shutting down HTTP transport.");
            runtime.shutdown_background();
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn parse_uri(uri: &str) -> Result<Uri, String> {
    uri.parse::<Uri>().map_err(|e| format!("invalid collector URL '{uri}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::{aggregated_path, HttpTransport};
    use crate::{
        config::{BuildError, TransportConfiguration},
        model::{Aggregation, AggregationFreq},
        transport::{Transport, TransportError},
    };

    #[test]
    fn aggregated_paths() {
        assert_eq!(
            aggregated_path(Aggregation::Avg, AggregationFreq::Freq10),
            "/tel/v2.0/metrics/aggregation/avg/frequency/10"
        );
        assert_eq!(
            aggregated_path(Aggregation::P99, AggregationFreq::Freq300),
            "/tel/v2.0/metrics/aggregation/p99/frequency/300"
        );
    }

    #[test]
    fn invalid_token_is_rejected() {
        let config = TransportConfiguration { token: Some("bad\ntoken".to_owned()), ..Default::default() };
        assert!(matches!(HttpTransport::new(&config), Err(BuildError::InvalidToken)));
    }

    #[test]
    fn sends_after_shutdown_fail() {
        let config = TransportConfiguration {
            host: "127.0.0.1".to_owned(),
            port: Some(9),
            secure: false,
            ..Default::default()
        };
        let transport = HttpTransport::new(&config).expect("transport should build");

        transport.shutdown();
        transport.shutdown();
        assert!(matches!(transport.send("a 1 1"), Err(TransportError::ShutDown)));
    }

    #[test]
    fn usable_and_droppable_inside_async_context() {
        let config = TransportConfiguration {
            host: "127.0.0.1".to_owned(),
            port: Some(9),
            secure: false,
            ..Default::default()
        };
        let transport = HttpTransport::new(&config).expect("transport should build");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap_or_else(|e| panic!("Failed to create test runtime: {:?}", e));

        runtime.block_on(async move {
            // Nothing listens on the discard port, so the request fails, but it must fail with an error.
            assert!(transport.send("a 1 1").is_err());
            drop(transport);
        });
    }
}
