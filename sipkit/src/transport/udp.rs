//! SIP UDP transport.
//!
//! Datagram semantics: one message per packet, no SIP-layer
//! fragmentation. Sends larger than the configured MTU are refused; the
//! caller has to pick a congestion-safe transport instead.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::TransportType;
use crate::transport::{Packet, SipTransport, Transport, TransportEvent, TransportTx};

/// Default maximum datagram payload.
pub const DEFAULT_MTU: usize = 65_535;

struct Inner {
    sock: UdpSocket,
    addr: SocketAddr,
    local_name: String,
    mtu: usize,
}

/// UDP transport implementation.
#[derive(Clone)]
pub struct UdpTransport(Arc<Inner>);

impl UdpTransport {
    /// Binds a UDP transport to the given address.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Self::bind_with_mtu(addr, DEFAULT_MTU).await
    }

    /// Binds with an explicit MTU bound for outbound messages.
    pub async fn bind_with_mtu<A: ToSocketAddrs>(addr: A, mtu: usize) -> Result<Self> {
        let sock = UdpSocket::bind(addr).await?;
        let addr = sock.local_addr()?;
        let local_name = crate::local_name_for(&addr);

        Ok(Self(Arc::new(Inner {
            sock,
            addr,
            local_name,
            mtu,
        })))
    }

    /// Starts the read pump, feeding packets into the transport layer.
    pub fn serve(self, sender: TransportTx) -> Transport {
        let transport = Transport::new(self.clone());
        let pump = transport.clone();

        debug!("SIP UDP transport listening on {}", self.0.local_name);
        tokio::spawn(async move {
            if let Err(err) = Self::recv_loop(self, pump, sender).await {
                debug!("UDP read pump ended: {err}");
            }
        });
        transport
    }

    async fn recv_loop(self, transport: Transport, sender: TransportTx) -> Result<()> {
        let mut buf = vec![0u8; DEFAULT_MTU];

        loop {
            let (len, addr) = self.0.sock.recv_from(&mut buf).await?;
            let payload = Bytes::copy_from_slice(&buf[..len]);
            let packet = Packet::new(payload, addr);

            sender
                .send(TransportEvent::Packet {
                    transport: transport.clone(),
                    packet,
                })
                .await
                .map_err(|_| Error::ChannelClosed)?;
        }
    }
}

#[async_trait::async_trait]
impl SipTransport for UdpTransport {
    async fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        if buf.len() > self.0.mtu {
            return Err(Error::InvalidArgument(format!(
                "datagram of {} bytes exceeds the {} byte MTU",
                buf.len(),
                self.0.mtu
            )));
        }
        match self.0.sock.send_to(buf, addr).await {
            Ok(sent) => Ok(sent),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                Err(Error::TransportTemporary(err))
            }
            Err(err) => Err(Error::Io(err)),
        }
    }

    fn protocol(&self) -> TransportType {
        TransportType::Udp
    }

    fn local_addr(&self) -> SocketAddr {
        self.0.addr
    }

    fn local_name(&self) -> std::borrow::Cow<'_, str> {
        std::borrow::Cow::Borrowed(&self.0.local_name)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    const MSG_TEST: &[u8] = b"REGISTER sip:registrar.biloxi.com SIP/2.0\r\n\
        Via: SIP/2.0/UDP bobspc.biloxi.com:5060;branch=z9hG4bKnashds7\r\n\
        Max-Forwards: 70\r\n\
        To: Bob <sip:bob@biloxi.com>\r\n\
        From: Bob <sip:bob@biloxi.com>;tag=456248\r\n\
        Call-ID: 843817637684230@998sdasdh09\r\n\
        CSeq: 1826 REGISTER\r\n\
        Contact: <sip:bob@192.0.2.4>\r\n\
        Content-Length: 0\r\n\r\n";

    #[tokio::test]
    async fn test_recv_msg() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (tx, mut rx) = mpsc::channel(1);

        let udp = UdpTransport::bind(addr).await.unwrap();
        let udp_addr = udp.local_addr();
        let client = UdpSocket::bind(addr).await.unwrap();

        udp.serve(tx);
        client.send_to(MSG_TEST, udp_addr).await.unwrap();

        let TransportEvent::Packet { packet, .. } = rx.recv().await.unwrap() else {
            unreachable!();
        };

        assert_eq!(&packet.payload[..], MSG_TEST);
        assert_eq!(packet.addr, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_send_msg() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let udp = UdpTransport::bind(addr).await.unwrap();
        let client = UdpSocket::bind(addr).await.unwrap();

        udp.send(MSG_TEST, client.local_addr().unwrap()).await.unwrap();

        let mut buf = [0; MSG_TEST.len()];
        let len = client.recv(&mut buf).await.unwrap();

        assert_eq!(&buf[..len], MSG_TEST);
    }

    #[tokio::test]
    async fn test_send_over_mtu_is_refused() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let udp = UdpTransport::bind_with_mtu(addr, 128).await.unwrap();

        let oversized = vec![b'x'; 129];
        let err = udp.send(&oversized, "127.0.0.1:5060".parse().unwrap()).await;

        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }
}
