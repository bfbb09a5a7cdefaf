//! SIP wire parser, RFC 3261 §25.
//!
//! Transforms raw bytes into a [`SipMessage`]. Keepalive frames never
//! reach the parser; the transports absorb them first.

use sipkit_util::{
    util::{is_host, is_newline, is_space, is_token, is_uri_param, is_user},
    Scanner,
};

use crate::error::{Result, SipParseError};
use crate::headers::{Header, Headers};
use crate::message::{
    Host, HostPort, NameAddr, Params, ProtocolInfo, Request, RequestLine, Response, Scheme,
    SipMessage, SipMethod, StatusLine, Uri,
};

/// SIP message parser.
pub struct Parser;

impl Parser {
    /// Parses one complete message from `src`.
    pub fn parse(src: &[u8]) -> Result<SipMessage> {
        Self::parse_ext(src, true)
    }

    /// Parses the start line and headers only, ignoring any body bytes.
    ///
    /// Used where the body never arrived, e.g. to answer an over-sized
    /// stream message with 413.
    pub fn parse_head(src: &[u8]) -> Result<SipMessage> {
        Self::parse_ext(src, false)
    }

    fn parse_ext(src: &[u8], with_body: bool) -> Result<SipMessage> {
        let scanner = &mut Scanner::new(src);

        if scanner.starts_with(b"SIP/") {
            Ok(SipMessage::Response(Self::parse_response(scanner, with_body)?))
        } else {
            Ok(SipMessage::Request(Self::parse_request(scanner, with_body)?))
        }
    }

    fn parse_request(scanner: &mut Scanner, with_body: bool) -> Result<Request> {
        let method = scanner.read_str_while(is_token)?;
        if method.is_empty() {
            return Err(SipParseError::new("missing request method").into());
        }
        let method = SipMethod::from_token(method);
        scanner.must_read(b' ')?;
        let uri = parse_uri(scanner)?;
        scanner.must_read(b' ')?;
        let proto = parse_protocol(scanner, is_newline)?;
        read_crlf(scanner)?;

        let headers = Self::parse_headers(scanner)?;
        read_crlf(scanner)?;
        let body = if with_body {
            Self::parse_body(scanner, &headers)?
        } else {
            Vec::new()
        };

        Ok(Request {
            req_line: RequestLine { method, uri },
            proto,
            headers,
            body,
        })
    }

    fn parse_response(scanner: &mut Scanner, with_body: bool) -> Result<Response> {
        let proto = parse_protocol(scanner, |b| b == b' ')?;
        scanner.must_read(b' ')?;
        let code: u16 = scanner.read_num()?;
        scanner.read_while(is_space);
        let reason = scanner.read_str_while(|b| !is_newline(b))?.to_string();
        read_crlf(scanner)?;

        let headers = Self::parse_headers(scanner)?;
        read_crlf(scanner)?;
        let body = if with_body {
            Self::parse_body(scanner, &headers)?
        } else {
            Vec::new()
        };

        Ok(Response {
            proto,
            status_line: StatusLine {
                code: code.into(),
                reason,
            },
            headers,
            body,
        })
    }

    fn parse_headers(scanner: &mut Scanner) -> Result<Headers> {
        let mut headers = Headers::new();

        while !scanner.is_eof() && !scanner.starts_with(b"\r\n") && !scanner.starts_with(b"\n") {
            let name = scanner.read_str_while(is_token)?.to_string();
            if name.is_empty() {
                return Err(SipParseError::new("empty header name").into());
            }
            scanner.read_while(is_space);
            scanner.must_read(b':')?;
            let value = Self::read_folded_value(scanner)?;

            if Header::takes_list_values(&name) {
                for element in split_list_elements(&value) {
                    headers.push(Header::parse_named(&name, element)?);
                }
            } else {
                headers.push(Header::parse_named(&name, value.trim())?);
            }
        }
        Ok(headers)
    }

    /// Reads a header value including folded continuation lines, which are
    /// normalized to a single space.
    fn read_folded_value(scanner: &mut Scanner) -> Result<String> {
        let mut value = String::new();

        loop {
            scanner.read_while(is_space);
            value.push_str(scanner.read_str_while(|b| !is_newline(b))?.trim_end());
            read_crlf(scanner)?;
            if scanner.cur_is_some_and(is_space) {
                value.push(' ');
                continue;
            }
            return Ok(value);
        }
    }

    fn parse_body(scanner: &mut Scanner, headers: &Headers) -> Result<Vec<u8>> {
        let rest = scanner.remaining();

        match headers.content_length() {
            Some(content_length) => {
                let declared = content_length.octets() as usize;
                if declared > rest.len() {
                    return Err(SipParseError::new("body shorter than Content-Length").into());
                }
                Ok(rest[..declared].to_vec())
            }
            // Datagram boundary: everything left is the body.
            None => Ok(rest.to_vec()),
        }
    }
}

fn read_crlf(scanner: &mut Scanner) -> Result<()> {
    if scanner.starts_with(b"\r\n") {
        scanner.bump_n(2);
        Ok(())
    } else if scanner.cur_is_some_and(|b| b == b'\n') {
        scanner.bump_n(1);
        Ok(())
    } else if scanner.is_eof() {
        Ok(())
    } else {
        Err(SipParseError::new("expected end of line").into())
    }
}

/// Splits a comma-joined list header value at top level, ignoring commas
/// inside quotes or angle brackets.
fn split_list_elements(value: &str) -> impl Iterator<Item = &str> {
    let mut elements = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0usize;

    for (idx, b) in value.bytes().enumerate() {
        match b {
            b'"' => quoted = !quoted,
            b'<' if !quoted => depth += 1,
            b'>' if !quoted => depth = depth.saturating_sub(1),
            b',' if !quoted && depth == 0 => {
                elements.push(value[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    elements.push(value[start..].trim());
    elements.into_iter().filter(|e| !e.is_empty())
}

fn parse_protocol<F>(scanner: &mut Scanner, stop: F) -> Result<ProtocolInfo>
where
    F: Fn(u8) -> bool,
{
    let name = scanner.read_str_while(|b| b != b'/' && !is_newline(b))?.to_string();
    scanner.must_read(b'/')?;
    let version = scanner.read_str_while(|b| !stop(b) && !is_newline(b))?.to_string();

    if name.is_empty() || version.is_empty() {
        return Err(SipParseError::new("malformed protocol version").into());
    }
    Ok(ProtocolInfo { name, version })
}

pub(crate) fn parse_host_port(scanner: &mut Scanner) -> Result<HostPort> {
    let host = if scanner.cur_is_some_and(|b| b == b'[') {
        scanner.must_read(b'[')?;
        let addr = scanner.read_str_while(|b| b != b']')?;
        let ip = addr
            .parse()
            .map_err(|_| SipParseError::new("invalid IPv6 reference"))?;
        scanner.must_read(b']')?;
        Host::Ip(std::net::IpAddr::V6(ip))
    } else {
        Host::from_token(scanner.read_str_while(is_host)?)
    };

    let port = if scanner.consume_if(|b| b == b':').is_some() {
        Some(scanner.read_num()?)
    } else {
        None
    };

    Ok(HostPort { host, port })
}

/// Parses a full URI including its `;` parameters and `?` headers.
pub(crate) fn parse_uri(scanner: &mut Scanner) -> Result<Uri> {
    parse_uri_ext(scanner, true)
}

/// Parses a URI; `with_params` is false for a bare addr-spec inside a
/// header, where trailing `;` parameters belong to the header.
pub(crate) fn parse_uri_ext(scanner: &mut Scanner, with_params: bool) -> Result<Uri> {
    let scheme = Scheme::from_token(scanner.read_str_while(|b| is_token(b) && b != b':')?);
    scanner.must_read(b':')?;

    let mut uri = Uri {
        scheme,
        ..Default::default()
    };

    // The userinfo part exists iff an '@' precedes the host terminator.
    let has_user = scanner
        .remaining()
        .iter()
        .take_while(|&&b| !matches!(b, b'>' | b' ' | b'\r' | b'\n' | b';' | b'?' | b','))
        .any(|&b| b == b'@');

    if has_user {
        let user = scanner.read_str_while(|b| is_user(b) && b != b':' && b != b'@')?;
        uri.user = Some(user.to_string());
        if scanner.consume_if(|b| b == b':').is_some() {
            let password = scanner.read_str_while(|b| is_user(b) && b != b'@')?;
            uri.password = Some(password.to_string());
        }
        scanner.must_read(b'@')?;
    }

    uri.host_port = parse_host_port(scanner)?;

    if with_params {
        while scanner.cur_is_some_and(|b| b == b';') {
            scanner.bump_n(1);
            let name = scanner.read_str_while(|b| is_uri_param(b) && b != b'=')?.to_string();
            let value = if scanner.consume_if(|b| b == b'=').is_some() {
                Some(scanner.read_str_while(is_uri_param)?)
            } else {
                None
            };
            uri.params.push(&name, value);
        }
        if scanner.cur_is_some_and(|b| b == b'?') {
            loop {
                scanner.bump_n(1);
                let name = scanner.read_str_while(|b| is_uri_param(b) && b != b'=')?.to_string();
                scanner.must_read(b'=')?;
                let value = scanner.read_str_while(is_uri_param)?;
                uri.headers.push(&name, Some(value));
                if !scanner.cur_is_some_and(|b| b == b'&') {
                    break;
                }
            }
        }
    }

    Ok(uri)
}

/// Parses a `name-addr` or bare `addr-spec`.
pub(crate) fn parse_name_addr(scanner: &mut Scanner) -> Result<NameAddr> {
    scanner.read_while(is_space);

    let line_end = scanner
        .remaining()
        .iter()
        .position(|&b| is_newline(b))
        .unwrap_or(scanner.remaining().len());
    let angle = scanner.remaining()[..line_end].iter().position(|&b| b == b'<');

    match angle {
        Some(pos) => {
            let display = std::str::from_utf8(&scanner.remaining()[..pos])
                .map_err(|_| SipParseError::new("invalid utf-8 in display name"))?
                .trim()
                .to_string();
            scanner.bump_n(pos + 1);
            let uri = parse_uri_ext(scanner, true)?;
            scanner.must_read(b'>')?;

            Ok(NameAddr {
                display: (!display.is_empty()).then_some(display),
                uri,
            })
        }
        None => Ok(NameAddr {
            display: None,
            uri: parse_uri_ext(scanner, false)?,
        }),
    }
}

/// Parses trailing `;name=value` header parameters.
pub(crate) fn parse_header_params(scanner: &mut Scanner) -> Result<Params> {
    let mut params = Params::new();

    loop {
        scanner.read_while(is_space);
        if !scanner.cur_is_some_and(|b| b == b';') {
            return Ok(params);
        }
        scanner.bump_n(1);
        scanner.read_while(is_space);
        let name = scanner.read_str_while(is_token)?.to_string();
        if name.is_empty() {
            return Err(SipParseError::new("empty parameter name").into());
        }
        let value = if scanner.consume_if(|b| b == b'=').is_some() {
            if scanner.cur_is_some_and(|b| b == b'"') {
                scanner.bump_n(1);
                let quoted = scanner.read_str_while(|b| b != b'"')?;
                scanner.must_read(b'"')?;
                Some(format!("\"{quoted}\""))
            } else {
                Some(scanner.read_str_while(is_param_value)?.to_string())
            }
        } else {
            None
        };
        params.push(&name, value.as_deref());
    }
}

fn is_param_value(b: u8) -> bool {
    !matches!(
        b,
        b';' | b',' | b'\r' | b'\n' | b' ' | b'\t' | b'>' | b'?' | b'"' | b'('
    )
}
