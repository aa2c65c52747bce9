use std::{io, time::Duration};

use thiserror::Error;

use crate::model::{Aggregation, AggregationFreq};

#[cfg(feature = "http")]
pub(crate) mod http;
#[cfg(feature = "http")]
pub use self::http::{aggregated_path, HttpTransport};

pub(crate) mod udp;
pub use self::udp::UdpTransport;

/// Errors that could occur while delivering a batch.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The collector address could not be resolved.
    #[error("failed to resolve collector address '{addr}': {source}")]
    Resolve {
        /// Address that failed to resolve.
        addr: String,
        /// Underlying resolution error.
        #[source]
        source: io::Error,
    },

    /// An I/O error occurred while writing to the socket.
    #[error("I/O error while sending batch: {0}")]
    Io(#[from] io::Error),

    /// The transport cannot deliver pre-aggregated metrics.
    #[error("aggregated metrics are not supported by the {transport} transport")]
    Unsupported {
        /// Transport identifier.
        transport: &'static str,
    },

    /// The transport has been shut down.
    #[error("transport has been shut down")]
    ShutDown,

    /// The HTTP request could not be built.
    #[error("failed to build request: {0}")]
    Request(String),

    /// The HTTP request failed before a response was received.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] hyper_util::client::legacy::Error),

    /// The HTTP request did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The collector responded with a non-success status.
    #[error("collector responded with status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

impl TransportError {
    /// Returns `true` if the error signals a capability mismatch rather than a delivery failure.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, TransportError::Unsupported { .. })
    }
}

/// Delivers encoded batches to the collector.
///
/// A batch is one or more encoded lines, separated by newlines. Implementations own their connection state and must
/// tolerate concurrent calls from multiple threads.
pub trait Transport: Send + Sync {
    /// Returns a short identifier for the transport, such as `udp`.
    fn name(&self) -> &'static str;

    /// Sends a batch of lines.
    ///
    /// # Errors
    ///
    /// If the batch could not be delivered, an error is returned and the batch is lost.
    fn send(&self, batch: &str) -> Result<(), TransportError>;

    /// Sends a batch of lines that were aggregated with the given aggregation and frequency.
    ///
    /// # Errors
    ///
    /// If the transport cannot deliver pre-aggregated metrics, [`TransportError::Unsupported`] is returned. Otherwise,
    /// if the batch could not be delivered, an error is returned and the batch is lost.
    fn send_aggregated(
        &self,
        batch: &str,
        aggregation: Aggregation,
        frequency: AggregationFreq,
    ) -> Result<(), TransportError>;

    /// Releases all resources held by the transport.
    ///
    /// Calling this more than once has no further effect. Sends after shutdown fail with [`TransportError::ShutDown`].
    fn shutdown(&self);
}
