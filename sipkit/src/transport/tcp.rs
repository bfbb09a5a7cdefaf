//! SIP TCP transport.
//!
//! Stream semantics: messages are length-framed through Content-Length,
//! reads are bounded by [`MAX_MSG_SIZE`](super::MAX_MSG_SIZE), writes are
//! serialized per connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::message::TransportType;
use crate::transport::decoder::{StreamDecoder, StreamFrame};
use crate::transport::{Factory, Packet, SipTransport, Transport, TransportEvent, TransportTx};

struct Inner {
    writer: Mutex<OwnedWriteHalf>,
    local: SocketAddr,
    peer: SocketAddr,
    open: AtomicBool,
}

/// One established TCP connection.
#[derive(Clone)]
pub struct TcpConnection(Arc<Inner>);

impl TcpConnection {
    /// Dials the peer and starts the connection read pump.
    pub async fn connect(addr: SocketAddr, sender: TransportTx) -> Result<Transport> {
        let stream = TcpStream::connect(addr).await?;
        Self::spawn(stream, sender)
    }

    /// Adopts an accepted stream and starts its read pump.
    pub(crate) fn spawn(stream: TcpStream, sender: TransportTx) -> Result<Transport> {
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let connection = TcpConnection(Arc::new(Inner {
            writer: Mutex::new(write_half),
            local,
            peer,
            open: AtomicBool::new(true),
        }));
        let transport = Transport::new(connection.clone());

        let pump = transport.clone();
        tokio::spawn(async move {
            let mut framed = FramedRead::new(read_half, StreamDecoder::new());

            while let Some(frame) = framed.next().await {
                let event = match frame {
                    Ok(StreamFrame::Message(payload)) => TransportEvent::Packet {
                        transport: pump.clone(),
                        packet: Packet::new(payload, peer),
                    },
                    Ok(StreamFrame::Oversized(head)) => TransportEvent::Oversized {
                        transport: pump.clone(),
                        packet: Packet::new(head, peer),
                    },
                    Err(err) => {
                        warn!("dropping TCP connection from {peer}: {err}");
                        break;
                    }
                };
                if sender.send(event).await.is_err() {
                    break;
                }
            }
            pump.close();
            let _ = sender.send(TransportEvent::Closed(pump.key())).await;
        });

        Ok(transport)
    }
}

#[async_trait::async_trait]
impl SipTransport for TcpConnection {
    async fn send(&self, buf: &[u8], _addr: SocketAddr) -> Result<usize> {
        if !self.0.open.load(Ordering::Acquire) {
            return Err(Error::TransportClosed);
        }

        let mut writer = self.0.writer.lock().await;
        match writer.write_all(buf).await {
            Ok(()) => Ok(buf.len()),
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::NotConnected | std::io::ErrorKind::BrokenPipe
                ) =>
            {
                self.0.open.store(false, Ordering::Release);
                Err(Error::TransportClosed)
            }
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                Err(Error::TransportTemporary(err))
            }
            Err(err) => Err(Error::Io(err)),
        }
    }

    fn protocol(&self) -> TransportType {
        TransportType::Tcp
    }

    fn local_addr(&self) -> SocketAddr {
        self.0.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.0.peer)
    }

    fn is_open(&self) -> bool {
        self.0.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.0.open.store(false, Ordering::Release);
    }
}

/// The listening side of the TCP transport.
pub struct TcpServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TcpServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        Ok(Self { listener, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accepts connections forever, announcing each to the transport
    /// layer.
    pub fn serve(self, sender: TransportTx) {
        debug!("SIP TCP transport listening on {}", self.addr);

        tokio::spawn(async move {
            let mut incoming = TcpListenerStream::new(self.listener);

            while let Some(stream) = incoming.next().await {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!("TCP accept failed: {err}");
                        continue;
                    }
                };
                match TcpConnection::spawn(stream, sender.clone()) {
                    Ok(transport) => {
                        if sender.send(TransportEvent::Created(transport)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!("TCP connection setup failed: {err}"),
                }
            }
        });
    }
}

/// Dials new TCP connections for destinations with no live connection.
pub struct TcpFactory {
    sender: TransportTx,
}

impl TcpFactory {
    pub fn new(sender: TransportTx) -> Self {
        Self { sender }
    }
}

#[async_trait::async_trait]
impl Factory for TcpFactory {
    async fn create(&self, addr: SocketAddr) -> Result<Transport> {
        TcpConnection::connect(addr, self.sender.clone()).await
    }

    fn protocol(&self) -> TransportType {
        TransportType::Tcp
    }
}
