use std::fmt;

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};
use sipkit_util::Scanner;

use crate::error::Result;
use crate::headers::{
    CSeq, CallId, Contact, ContentLength, ContentType, Expires, From, MaxForwards, RetryAfter,
    Route, SipHeaderParse, Timestamp, To, Via,
};

/// Compact forms, RFC 3261 §20. The list is deliberately partial: headers
/// like CSeq and Max-Forwards have no compact form.
const COMPACT_FORMS: [(&str, &str); 14] = [
    ("Via", "v"),
    ("From", "f"),
    ("To", "t"),
    ("Call-ID", "i"),
    ("Contact", "m"),
    ("Content-Type", "c"),
    ("Content-Length", "l"),
    ("Subject", "s"),
    ("Supported", "k"),
    ("Content-Encoding", "e"),
    ("Event", "o"),
    ("Refer-To", "r"),
    ("Referred-By", "b"),
    ("Allow-Events", "u"),
];

/// Maps a wire header name, long or compact, to its canonical form.
///
/// Unknown names are returned unchanged.
pub fn canonical_name(name: &str) -> &str {
    for (long, compact) in COMPACT_FORMS {
        if name.eq_ignore_ascii_case(long) || name.eq_ignore_ascii_case(compact) {
            return long;
        }
    }
    name
}

/// The compact form of a canonical name, when RFC 3261 §20 defines one.
pub fn compact_form(name: &str) -> Option<&'static str> {
    COMPACT_FORMS
        .iter()
        .find(|(long, _)| name.eq_ignore_ascii_case(long))
        .map(|(_, compact)| *compact)
}

/// `true` when two wire names identify the same header.
pub fn name_matches(a: &str, b: &str) -> bool {
    canonical_name(a).eq_ignore_ascii_case(canonical_name(b))
}

/// A single header occurrence.
///
/// Headers the stack interprets get a typed variant; everything else is
/// preserved verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, EnumAsInner, Serialize, Deserialize)]
pub enum Header {
    Via(Via),
    From(From),
    To(To),
    CallId(CallId),
    CSeq(CSeq),
    Contact(Contact),
    MaxForwards(MaxForwards),
    ContentLength(ContentLength),
    ContentType(ContentType),
    Route(Route),
    Expires(Expires),
    Timestamp(Timestamp),
    RetryAfter(RetryAfter),
    Other { name: String, value: String },
}

impl Header {
    /// The canonical name of this occurrence.
    pub fn name(&self) -> &str {
        match self {
            Header::Via(_) => Via::NAME,
            Header::From(_) => From::NAME,
            Header::To(_) => To::NAME,
            Header::CallId(_) => CallId::NAME,
            Header::CSeq(_) => CSeq::NAME,
            Header::Contact(_) => Contact::NAME,
            Header::MaxForwards(_) => MaxForwards::NAME,
            Header::ContentLength(_) => ContentLength::NAME,
            Header::ContentType(_) => ContentType::NAME,
            Header::Route(_) => Route::NAME,
            Header::Expires(_) => Expires::NAME,
            Header::Timestamp(_) => Timestamp::NAME,
            Header::RetryAfter(_) => RetryAfter::NAME,
            Header::Other { name, .. } => name,
        }
    }

    /// `true` when this occurrence answers to `name` (long or compact,
    /// case-insensitive).
    pub fn is_named(&self, name: &str) -> bool {
        name_matches(self.name(), name)
    }

    /// Parses a header value under the given wire name. Unknown names are
    /// kept verbatim.
    pub fn parse_named(name: &str, value: &str) -> Result<Header> {
        let canonical = canonical_name(name);
        let scanner = &mut Scanner::new(value.as_bytes());

        let header = if canonical.eq_ignore_ascii_case(Via::NAME) {
            Header::Via(Via::parse(scanner)?)
        } else if canonical.eq_ignore_ascii_case(From::NAME) {
            Header::From(From::parse(scanner)?)
        } else if canonical.eq_ignore_ascii_case(To::NAME) {
            Header::To(To::parse(scanner)?)
        } else if canonical.eq_ignore_ascii_case(CallId::NAME) {
            Header::CallId(CallId::parse(scanner)?)
        } else if canonical.eq_ignore_ascii_case(CSeq::NAME) {
            Header::CSeq(CSeq::parse(scanner)?)
        } else if canonical.eq_ignore_ascii_case(Contact::NAME) {
            Header::Contact(Contact::parse(scanner)?)
        } else if canonical.eq_ignore_ascii_case(MaxForwards::NAME) {
            Header::MaxForwards(MaxForwards::parse(scanner)?)
        } else if canonical.eq_ignore_ascii_case(ContentLength::NAME) {
            Header::ContentLength(ContentLength::parse(scanner)?)
        } else if canonical.eq_ignore_ascii_case(ContentType::NAME) {
            Header::ContentType(ContentType::parse(scanner)?)
        } else if canonical.eq_ignore_ascii_case(Route::NAME) {
            Header::Route(Route::parse(scanner)?)
        } else if canonical.eq_ignore_ascii_case(Expires::NAME) {
            Header::Expires(Expires::parse(scanner)?)
        } else if canonical.eq_ignore_ascii_case(Timestamp::NAME) {
            Header::Timestamp(Timestamp::parse(scanner)?)
        } else if canonical.eq_ignore_ascii_case(RetryAfter::NAME) {
            Header::RetryAfter(RetryAfter::parse(scanner)?)
        } else {
            Header::Other {
                name: name.to_string(),
                value: value.to_string(),
            }
        };

        Ok(header)
    }

    /// `true` for headers whose wire form may comma-join several values in
    /// one occurrence.
    pub fn takes_list_values(name: &str) -> bool {
        const LIST_VALUED: [&str; 4] = [Via::NAME, Route::NAME, Contact::NAME, "Record-Route"];
        let canonical = canonical_name(name);

        LIST_VALUED.iter().any(|n| canonical.eq_ignore_ascii_case(n))
    }

    fn write_value(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Header::Via(h) => write!(f, "{h}"),
            Header::From(h) => write!(f, "{h}"),
            Header::To(h) => write!(f, "{h}"),
            Header::CallId(h) => write!(f, "{h}"),
            Header::CSeq(h) => write!(f, "{h}"),
            Header::Contact(h) => write!(f, "{h}"),
            Header::MaxForwards(h) => write!(f, "{h}"),
            Header::ContentLength(h) => write!(f, "{h}"),
            Header::ContentType(h) => write!(f, "{h}"),
            Header::Route(h) => write!(f, "{h}"),
            Header::Expires(h) => write!(f, "{h}"),
            Header::Timestamp(h) => write!(f, "{h}"),
            Header::RetryAfter(h) => write!(f, "{h}"),
            Header::Other { value, .. } => f.write_str(value),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            // `{:#}` emits the compact name when one exists.
            match compact_form(self.name()) {
                Some(compact) => write!(f, "{compact}: ")?,
                None => write!(f, "{}: ", self.name())?,
            }
        } else {
            write!(f, "{}: ", self.name())?;
        }
        self.write_value(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name_resolves_compact_forms() {
        assert_eq!(canonical_name("v"), "Via");
        assert_eq!(canonical_name("I"), "Call-ID");
        assert_eq!(canonical_name("call-id"), "Call-ID");
        assert_eq!(canonical_name("X-Custom"), "X-Custom");
    }

    #[test]
    fn test_cseq_has_no_compact_form() {
        assert_eq!(compact_form("CSeq"), None);
        assert_eq!(compact_form("Max-Forwards"), None);
        assert_eq!(compact_form("Via"), Some("v"));
    }

    #[test]
    fn test_unknown_header_is_kept_verbatim() {
        let header = Header::parse_named("X-Custom", "some opaque value").unwrap();
        assert_eq!(header.to_string(), "X-Custom: some opaque value");
    }

    #[test]
    fn test_compact_rendering() {
        let header = Header::parse_named("Via", "SIP/2.0/UDP a.example.com;branch=z9hG4bK1").unwrap();
        assert_eq!(
            format!("{header:#}"),
            "v: SIP/2.0/UDP a.example.com;branch=z9hG4bK1"
        );

        let header = Header::parse_named("CSeq", "1 INVITE").unwrap();
        assert_eq!(format!("{header:#}"), "CSeq: 1 INVITE");
    }
}
