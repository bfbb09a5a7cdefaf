use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::message::{SipMessage, TransportType};
use crate::parser::Parser;
use crate::transport::{SipTransport, Transport};

/// A mock transport recording everything sent through it.
#[derive(Clone)]
pub struct MockTransport {
    sent: Arc<Mutex<Vec<(Vec<u8>, SocketAddr)>>>,
    addr: SocketAddr,
    tp_type: TransportType,
    /// When set, the nth send (1-based) fails fatally.
    fail_at: Arc<Mutex<Option<usize>>>,
}

impl MockTransport {
    pub fn with_transport_type(tp_type: TransportType) -> Self {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self {
            sent: Default::default(),
            addr: SocketAddr::new(ip, tp_type.default_port()),
            tp_type,
            fail_at: Default::default(),
        }
    }

    pub fn new_udp() -> Self {
        Self::with_transport_type(TransportType::Udp)
    }

    pub fn new_tcp() -> Self {
        Self::with_transport_type(TransportType::Tcp)
    }

    pub fn into_transport(self) -> Transport {
        Transport::new(self)
    }

    pub fn fail_at(&self, n: usize) {
        *self.fail_at.lock().unwrap() = Some(n);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last_sent(&self) -> Option<(Vec<u8>, SocketAddr)> {
        self.sent.lock().unwrap().last().cloned()
    }

    pub fn last_buffer(&self) -> Option<Vec<u8>> {
        self.last_sent().map(|(buf, _)| buf)
    }

    pub fn last_message(&self) -> Option<SipMessage> {
        self.last_buffer().map(|buf| Parser::parse(&buf).unwrap())
    }

    pub fn nth_message(&self, n: usize) -> Option<SipMessage> {
        let guard = self.sent.lock().unwrap();
        guard.get(n).map(|(buf, _)| Parser::parse(buf).unwrap())
    }

    fn push(&self, buf: &[u8], addr: SocketAddr) -> usize {
        let mut guard = self.sent.lock().unwrap();
        guard.push((buf.to_vec(), addr));
        guard.len()
    }
}

#[async_trait::async_trait]
impl SipTransport for MockTransport {
    async fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        let count = self.push(buf, addr);

        if *self.fail_at.lock().unwrap() == Some(count) {
            return Err(Error::Io(std::io::Error::other("simulated failure")));
        }
        Ok(buf.len())
    }

    fn protocol(&self) -> TransportType {
        self.tp_type
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}
