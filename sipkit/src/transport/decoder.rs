use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::headers::{ContentLength, SipHeaderParse};
use crate::transport::MAX_MSG_SIZE;

/// One frame lifted off a stream transport.
pub(crate) enum StreamFrame {
    /// A complete message: head plus body.
    Message(Bytes),
    /// The head of a message whose declared body exceeds the read bound;
    /// the rest of the connection state is unusable.
    Oversized(Bytes),
}

/// Splits a byte stream into SIP messages, framed by Content-Length.
///
/// Keepalive CRLF sequences between messages are consumed silently.
pub(crate) struct StreamDecoder {
    max_msg_size: usize,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            max_msg_size: MAX_MSG_SIZE,
        }
    }

    #[cfg(test)]
    pub fn with_max_msg_size(max_msg_size: usize) -> Self {
        Self { max_msg_size }
    }
}

impl Decoder for StreamDecoder {
    type Error = io::Error;
    type Item = StreamFrame;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Absorb leading keepalives (CRLF and double-CRLF pings).
        while src.starts_with(b"\r\n") {
            src.advance(2);
        }
        if src.is_empty() {
            return Ok(None);
        }

        let Some(head_end) = find_subslice(src, b"\n\r\n") else {
            if src.len() > self.max_msg_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "message head exceeds read bound",
                ));
            }
            return Ok(None);
        };
        let body_start = head_end + 3;

        let mut content_length = None;
        for line in src[..body_start].split(|&b| b == b'\n') {
            let mut split = line.splitn(2, |&c| c == b':');
            let Some(name) = split.next() else {
                continue;
            };
            if ContentLength::matches_name(String::from_utf8_lossy(name).trim()) {
                let Some(value) = split.next() else {
                    continue;
                };
                if let Ok(parsed) = String::from_utf8_lossy(value).trim().parse::<usize>() {
                    content_length = Some(parsed);
                }
            }
        }

        let Some(body_len) = content_length else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "stream message without Content-Length",
            ));
        };

        if body_start + body_len > self.max_msg_size {
            let head = src.split_to(body_start).freeze();
            src.clear();
            return Ok(Some(StreamFrame::Oversized(head)));
        }

        let frame_len = body_start + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        Ok(Some(StreamFrame::Message(src.split_to(frame_len).freeze())))
    }
}

fn find_subslice(src: &[u8], needle: &[u8]) -> Option<usize> {
    src.windows(needle.len()).position(|w| w == needle)
}
