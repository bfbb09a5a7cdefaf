//! SIP header types.
//!
//! [`Headers`] is an ordered multimap over [`Header`] occurrences: order
//! across distinct names is free, order within one name is significant
//! (Via and Route hops).

mod call_id;
mod contact;
mod content_length;
mod content_type;
mod cseq;
mod expires;
mod from;
mod header;
mod max_forwards;
mod retry_after;
mod route;
mod timestamp;
mod to;
mod via;

pub use call_id::CallId;
pub use contact::Contact;
pub use content_length::ContentLength;
pub use content_type::ContentType;
pub use cseq::CSeq;
pub use expires::Expires;
pub use from::From;
pub use header::*;
pub use max_forwards::MaxForwards;
pub use retry_after::RetryAfter;
pub use route::Route;
pub use timestamp::Timestamp;
pub use to::To;
pub use via::Via;

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};
use sipkit_util::Scanner;

use crate::error::Result;

/// The tag parameter carried by [`From`] and [`To`] headers.
pub(crate) const TAG_PARAM: &str = "tag";

/// Render order for the well-known headers; everything else follows in
/// insertion order.
const RENDER_ORDER: [&str; 9] = [
    Via::NAME,
    From::NAME,
    To::NAME,
    CallId::NAME,
    CSeq::NAME,
    Contact::NAME,
    MaxForwards::NAME,
    ContentType::NAME,
    ContentLength::NAME,
];

/// Parsing contract for a typed SIP header value.
pub trait SipHeaderParse: Sized {
    /// The canonical header name (e.g. `"Contact"`).
    const NAME: &'static str;
    /// The RFC 3261 §20 compact form, when one exists.
    const SHORT_NAME: Option<&'static str> = None;

    /// Checks whether a wire name identifies this header.
    fn matches_name(name: &str) -> bool {
        name.eq_ignore_ascii_case(Self::NAME)
            || Self::SHORT_NAME.is_some_and(|short| name.eq_ignore_ascii_case(short))
    }

    /// Parses the header value from the scanner.
    fn parse(scanner: &mut Scanner) -> Result<Self>;

    /// Parses the header value from a raw byte slice.
    fn from_bytes(src: &[u8]) -> Result<Self> {
        Self::parse(&mut Scanner::new(src))
    }
}

macro_rules! typed_accessor {
    ($(#[$doc:meta])* $fn_name:ident, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $fn_name(&self) -> Option<&$ty> {
            self.0.iter().find_map(|h| match h {
                Header::$variant(value) => Some(value),
                _ => None,
            })
        }
    };
}

/// An ordered collection of SIP headers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Appends a new occurrence. Prior occurrences of the same name are
    /// left untouched.
    #[inline]
    pub fn push(&mut self, header: Header) {
        self.0.push(header);
    }

    /// Replaces every occurrence of the given headers' name with `values`,
    /// keeping the position of the first occurrence when the name was
    /// already present.
    ///
    /// All `values` must answer to `name`; the store itself stays
    /// polymorphic and does not verify this.
    pub fn set(&mut self, name: &str, values: Vec<Header>) {
        let first = self.0.iter().position(|h| h.is_named(name));
        self.0.retain(|h| !h.is_named(name));

        let at = first.unwrap_or(self.0.len()).min(self.0.len());
        for (offset, header) in values.into_iter().enumerate() {
            self.0.insert(at + offset, header);
        }
    }

    /// Replaces all occurrences of `header`'s name with this single value.
    pub fn set_header(&mut self, header: Header) {
        self.set(&header.name().to_string(), vec![header]);
    }

    /// All occurrences answering to `name`, in insertion order.
    pub fn get<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Header> {
        self.0.iter().filter(move |h| h.is_named(name))
    }

    /// Removes every occurrence of `name`, returning how many were
    /// dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|h| !h.is_named(name));
        before - self.0.len()
    }

    typed_accessor!(
        /// The first `Via` occurrence.
        via, Via, Via
    );
    typed_accessor!(
        /// The first `From` occurrence. Named to keep clear of the
        /// `From` conversion impls on this type.
        from_header, From, From
    );
    typed_accessor!(
        /// The first `To` occurrence.
        to, To, To
    );
    typed_accessor!(
        /// The first `Call-ID` occurrence.
        call_id, CallId, CallId
    );
    typed_accessor!(
        /// The first `CSeq` occurrence.
        cseq, CSeq, CSeq
    );
    typed_accessor!(
        /// The first `Contact` occurrence.
        contact, Contact, Contact
    );
    typed_accessor!(
        /// The first `Max-Forwards` occurrence.
        max_forwards, MaxForwards, MaxForwards
    );
    typed_accessor!(
        /// The first `Content-Length` occurrence.
        content_length, ContentLength, ContentLength
    );
    typed_accessor!(
        /// The first `Content-Type` occurrence.
        content_type, ContentType, ContentType
    );
    typed_accessor!(
        /// The first `Route` occurrence.
        route, Route, Route
    );
    typed_accessor!(
        /// The first `Timestamp` occurrence.
        timestamp, Timestamp, Timestamp
    );

    /// Mutable access to the first `To` occurrence.
    pub fn to_mut(&mut self) -> Option<&mut To> {
        self.0.iter_mut().find_map(|h| match h {
            Header::To(to) => Some(to),
            _ => None,
        })
    }

    /// Mutable access to the first `Via` occurrence.
    pub fn via_mut(&mut self) -> Option<&mut Via> {
        self.0.iter_mut().find_map(|h| match h {
            Header::Via(via) => Some(via),
            _ => None,
        })
    }

    /// The top Via hop, if any.
    pub fn first_via(&self) -> Option<&Via> {
        self.via()
    }

    /// Removes and returns the top Via hop.
    pub fn pop_first_via(&mut self) -> Option<Via> {
        let idx = self.0.iter().position(|h| matches!(h, Header::Via(_)))?;
        match self.0.remove(idx) {
            Header::Via(via) => Some(via),
            _ => unreachable!(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, Header> {
        self.0.iter_mut()
    }

    pub fn find_map<'a, T, F>(&'a self, f: F) -> Option<&'a T>
    where
        F: Fn(&'a Header) -> Option<&'a T>,
    {
        self.0.iter().find_map(f)
    }

    pub fn append(&mut self, other: &mut Self) {
        self.0.append(&mut other.0);
    }

    pub fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = Header>,
    {
        self.0.extend(iter);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Writes the headers in deterministic order: the RFC 3261 mandatory
    /// set first, then everything else in insertion order. Each occurrence
    /// becomes one `Name: value CRLF` line; `compact` switches to short
    /// names where RFC 3261 §20 defines them.
    pub fn write_wire<W: Write>(&self, w: &mut W, compact: bool) -> fmt::Result {
        let in_priority = |h: &Header| RENDER_ORDER.iter().any(|n| h.is_named(n));

        for name in RENDER_ORDER {
            for header in self.get(name) {
                Self::write_line(w, header, compact)?;
            }
        }
        for header in self.0.iter().filter(|h| !in_priority(h)) {
            Self::write_line(w, header, compact)?;
        }
        Ok(())
    }

    fn write_line<W: Write>(w: &mut W, header: &Header, compact: bool) -> fmt::Result {
        if compact {
            write!(w, "{header:#}\r\n")
        } else {
            write!(w, "{header}\r\n")
        }
    }
}

/// Canonical equality: grouped per canonical name, order preserved within
/// each name, insertion order across names ignored.
impl PartialEq for Headers {
    fn eq(&self, other: &Self) -> bool {
        use itertools::Itertools;

        if self.0.len() != other.0.len() {
            return false;
        }
        let names: Vec<&str> = self
            .0
            .iter()
            .map(|h| canonical_name(h.name()))
            .unique_by(|n| n.to_ascii_lowercase())
            .collect();

        for &name in &names {
            if !self.get(name).eq(other.get(name)) {
                return false;
            }
        }
        // A name present only on the other side survives the length check
        // when one of ours occurs more often there; mirror the walk.
        other
            .0
            .iter()
            .all(|h| names.iter().any(|n| name_matches(n, h.name())))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_wire(f, false)
    }
}

impl<const N: usize> std::convert::From<[Header; N]> for Headers {
    fn from(array: [Header; N]) -> Self {
        array.into_iter().collect()
    }
}

impl FromIterator<Header> for Headers {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        Headers(iter.into_iter().collect())
    }
}

impl std::convert::From<Vec<Header>> for Headers {
    fn from(headers: Vec<Header>) -> Self {
        Self(headers)
    }
}
