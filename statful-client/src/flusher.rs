use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use tracing::{debug, trace};

use crate::{buffer::BufferingEngine, config::BuildError};

/// Intervals shorter than this disable periodic flushing.
pub(crate) const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Background thread that flushes the buffering engine at a fixed interval.
pub(crate) struct Flusher {
    shutdown_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl Flusher {
    /// Spawns the flush thread.
    ///
    /// Returns `Ok(None)` without spawning anything if the interval is below the minimum.
    pub fn spawn(engine: Arc<BufferingEngine>, interval: Duration) -> Result<Option<Self>, BuildError> {
        if interval < MIN_FLUSH_INTERVAL {
            debug!(?interval, "Flush interval below minimum, periodic flushing disabled.");
            return Ok(None);
        }

        let (shutdown_tx, shutdown_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("statful-client-flusher".to_string())
            .spawn(move || run(&engine, interval, &shutdown_rx))
            .map_err(BuildError::Backend)?;

        Ok(Some(Flusher { shutdown_tx, handle }))
    }

    /// Stops the flush thread and waits for it to exit.
    pub fn stop(self) {
        // The thread also exits if the channel is disconnected, so a failed send is fine.
        let _ = self.shutdown_tx.send(());
        if self.handle.join().is_err() {
            debug!("Flush thread panicked before shutdown.");
        }
    }
}

fn run(engine: &BufferingEngine, interval: Duration, shutdown_rx: &Receiver<()>) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(ticker) -> _ => {
                trace!("Running periodic flush.");
                engine.flush();
            },
            recv(shutdown_rx) -> _ => break,
        }
    }
    debug!("Flush thread stopped.");
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::Flusher;
    use crate::{
        buffer::BufferingEngine,
        telemetry::Telemetry,
        test_util::MockTransport,
    };

    #[test]
    fn short_interval_disables_flushing() {
        let mut transport = MockTransport::new();
        transport.expect_send().never();

        let engine = Arc::new(BufferingEngine::new(10, false, Arc::new(transport), Arc::new(Telemetry::new("test"))));
        let flusher = Flusher::spawn(engine, Duration::from_millis(99)).unwrap();
        assert!(flusher.is_none());
    }

    #[test]
    fn periodic_flush_sends_buffered_lines() {
        let (sent_tx, sent_rx) = crossbeam_channel::unbounded();

        let mut transport = MockTransport::new();
        transport.expect_send().returning(move |batch| {
            let _ = sent_tx.send(batch.to_owned());
            Ok(())
        });

        let engine = Arc::new(BufferingEngine::new(10, false, Arc::new(transport), Arc::new(Telemetry::new("test"))));
        engine.enqueue("app.ns.m 1 100".to_owned());

        let flusher = Flusher::spawn(Arc::clone(&engine), Duration::from_millis(100)).unwrap().unwrap();
        let batch = sent_rx.recv_timeout(Duration::from_secs(5)).expect("periodic flush should send the batch");
        assert_eq!(batch, "app.ns.m 1 100");

        flusher.stop();
    }
}
