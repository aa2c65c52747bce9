use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs as _, UdpSocket},
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{Transport, TransportError};
use crate::{
    config::TransportConfiguration,
    model::{Aggregation, AggregationFreq},
};

/// Opens sockets to the collector.
pub(crate) trait Connector: Send + Sync {
    type Socket: Datagram;

    fn connect(&self) -> Result<Self::Socket, TransportError>;
}

/// A connected socket that sends whole datagrams.
pub(crate) trait Datagram: Send {
    fn send(&self, buf: &[u8]) -> io::Result<usize>;
}

impl Datagram for UdpSocket {
    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, buf)
    }
}

/// Opens UDP sockets connected to the configured collector.
pub(crate) struct UdpConnector {
    host: String,
    port: u16,
    write_timeout: Duration,
}

impl UdpConnector {
    fn resolve(&self) -> Result<Vec<SocketAddr>, TransportError> {
        let resolve_error = |source| TransportError::Resolve { addr: format!("{}:{}", self.host, self.port), source };

        let addrs = (self.host.as_str(), self.port).to_socket_addrs().map_err(resolve_error)?.collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(resolve_error(io::Error::new(io::ErrorKind::NotFound, "no addresses found")));
        }
        Ok(addrs)
    }
}

impl Connector for UdpConnector {
    type Socket = UdpSocket;

    fn connect(&self) -> Result<UdpSocket, TransportError> {
        let addrs = self.resolve()?;
        let socket = if addrs[0].is_ipv4() {
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?
        } else {
            UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?
        };
        socket.connect(&addrs[..])?;

        // A zero timeout is rejected by the OS, so treat it as "no timeout".
        let write_timeout = Some(self.write_timeout).filter(|timeout| !timeout.is_zero());
        socket.set_write_timeout(write_timeout)?;

        debug!(remote_addr = ?socket.peer_addr().ok(), "Opened UDP socket.");
        Ok(socket)
    }
}

enum SocketState<S> {
    // Intermediate state during send attempts.
    Inconsistent,

    // No socket is open. One will be opened on the next send.
    Closed,

    // Socket is open and ready to send.
    Open(S),

    // Transport was shut down and will not reopen.
    ShutDown,
}

impl<S: Datagram> SocketState<S> {
    fn try_send<C>(&mut self, connector: &C, payload: &[u8]) -> Result<usize, TransportError>
    where
        C: Connector<Socket = S>,
    {
        loop {
            let old_state = std::mem::replace(self, SocketState::Inconsistent);
            match old_state {
                SocketState::Inconsistent => unreachable!("transitioned _from_ inconsistent state"),
                SocketState::ShutDown => {
                    *self = SocketState::ShutDown;
                    return Err(TransportError::ShutDown);
                }
                SocketState::Closed => match connector.connect() {
                    Ok(socket) => *self = SocketState::Open(socket),
                    Err(e) => {
                        *self = SocketState::Closed;
                        return Err(e);
                    }
                },
                SocketState::Open(socket) => {
                    let result = socket.send(payload);
                    *self = if result.is_ok() { SocketState::Open(socket) } else { SocketState::Closed };

                    return result.map_err(TransportError::from);
                }
            }
        }
    }
}

/// A socket that is reopened after failures and retries every send once.
pub(crate) struct RetryingSocket<C: Connector> {
    connector: C,
    state: Mutex<SocketState<C::Socket>>,
}

impl<C: Connector> RetryingSocket<C> {
    pub fn new(connector: C) -> Self {
        RetryingSocket { connector, state: Mutex::new(SocketState::Closed) }
    }

    /// Sends the payload as a single datagram.
    ///
    /// If the first attempt fails, the socket is reopened and the send is retried exactly once. If the retry also
    /// fails, the socket is left closed and the payload is dropped.
    pub fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        match state.try_send(&self.connector, payload) {
            Ok(sent) => {
                trace!(bytes = sent, "Sent datagram.");
                Ok(())
            }
            Err(TransportError::ShutDown) => Err(TransportError::ShutDown),
            Err(e) => {
                debug!(error = %e, "Failed to send datagram, retrying once.");
                state.try_send(&self.connector, payload).map(|_| ())
            }
        }
    }

    pub fn shutdown(&self) {
        *self.state.lock() = SocketState::ShutDown;
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), SocketState::Open(_))
    }
}

/// Sends batches to the collector over UDP, one datagram per batch.
///
/// The socket is opened lazily on the first send, so an unreachable or unresolvable collector never prevents the
/// client from being built.
pub struct UdpTransport {
    socket: RetryingSocket<UdpConnector>,
}

impl UdpTransport {
    /// Creates a UDP transport for the given configuration.
    pub fn new(config: &TransportConfiguration) -> Self {
        let connector = UdpConnector {
            host: config.host.clone(),
            port: config.udp_port(),
            write_timeout: config.socket_timeout,
        };

        UdpTransport { socket: RetryingSocket::new(connector) }
    }

    /// Returns `true` if the socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.socket.is_open()
    }
}

impl Transport for UdpTransport {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn send(&self, batch: &str) -> Result<(), TransportError> {
        self.socket.send(batch.as_bytes())
    }

    fn send_aggregated(&self, _: &str, _: Aggregation, _: AggregationFreq) -> Result<(), TransportError> {
        Err(TransportError::Unsupported { transport: self.name() })
    }

    fn shutdown(&self) {
        self.socket.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use parking_lot::Mutex;

    use super::{Connector, Datagram, RetryingSocket};
    use crate::transport::TransportError;

    // Shared script of send outcomes: `true` delivers, `false` fails. Once exhausted, every send succeeds.
    #[derive(Clone, Default)]
    struct Script {
        outcomes: Arc<Mutex<Vec<bool>>>,
        delivered: Arc<Mutex<Vec<Vec<u8>>>>,
        opened: Arc<AtomicUsize>,
    }

    impl Script {
        fn new(outcomes: &[bool]) -> Self {
            let script = Script::default();
            script.outcomes.lock().extend(outcomes.iter().rev());
            script
        }

        fn delivered(&self) -> usize {
            self.delivered.lock().len()
        }

        fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }
    }

    struct ScriptedSocket(Script);

    impl Datagram for ScriptedSocket {
        fn send(&self, buf: &[u8]) -> io::Result<usize> {
            if self.0.outcomes.lock().pop().unwrap_or(true) {
                self.0.delivered.lock().push(buf.to_vec());
                Ok(buf.len())
            } else {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "scripted failure"))
            }
        }
    }

    struct ScriptedConnector(Script);

    impl Connector for ScriptedConnector {
        type Socket = ScriptedSocket;

        fn connect(&self) -> Result<ScriptedSocket, TransportError> {
            self.0.opened.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedSocket(self.0.clone()))
        }
    }

    #[test]
    fn opens_lazily_and_reuses_socket() {
        let script = Script::new(&[]);
        let socket = RetryingSocket::new(ScriptedConnector(script.clone()));
        assert!(!socket.is_open());
        assert_eq!(script.opened(), 0);

        socket.send(b"a 1 1").unwrap();
        socket.send(b"b 1 1").unwrap();
        assert!(socket.is_open());
        assert_eq!(script.opened(), 1);
        assert_eq!(script.delivered(), 2);
    }

    #[test]
    fn single_failure_is_retried() {
        let script = Script::new(&[false, true]);
        let socket = RetryingSocket::new(ScriptedConnector(script.clone()));

        socket.send(b"a 1 1").unwrap();
        assert_eq!(script.delivered(), 1);
        // One open for the first attempt, one to recreate the socket for the retry.
        assert_eq!(script.opened(), 2);
        assert!(socket.is_open());
    }

    #[test]
    fn second_failure_drops_and_closes() {
        let script = Script::new(&[false, false]);
        let socket = RetryingSocket::new(ScriptedConnector(script.clone()));

        let result = socket.send(b"a 1 1");
        assert!(matches!(result, Err(TransportError::Io(_))));
        assert_eq!(script.delivered(), 0);
        assert!(!socket.is_open());

        // The next send reopens the socket.
        socket.send(b"b 1 1").unwrap();
        assert_eq!(script.delivered(), 1);
        assert_eq!(script.opened(), 3);
        assert!(socket.is_open());
    }

    #[test]
    fn connect_failure_is_retried() {
        struct FlakyConnector {
            attempts: AtomicUsize,
            script: Script,
        }

        impl Connector for FlakyConnector {
            type Socket = ScriptedSocket;

            fn connect(&self) -> Result<ScriptedSocket, TransportError> {
                if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TransportError::Resolve {
                        addr: "nowhere:2013".to_owned(),
                        source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
                    })
                } else {
                    Ok(ScriptedSocket(self.script.clone()))
                }
            }
        }

        let script = Script::new(&[]);
        let socket = RetryingSocket::new(FlakyConnector { attempts: AtomicUsize::new(0), script: script.clone() });
        socket.send(b"a 1 1").unwrap();
        assert_eq!(script.delivered(), 1);
    }

    #[test]
    fn shutdown_is_terminal() {
        let script = Script::new(&[]);
        let socket = RetryingSocket::new(ScriptedConnector(script.clone()));
        socket.send(b"a 1 1").unwrap();

        socket.shutdown();
        socket.shutdown();
        assert!(!socket.is_open());
        assert!(matches!(socket.send(b"b 1 1"), Err(TransportError::ShutDown)));
        assert_eq!(script.delivered(), 1);
        assert_eq!(script.opened(), 1);
    }
}
