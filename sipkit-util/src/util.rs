#[inline(always)]
pub fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

#[inline(always)]
pub fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t')
}

#[inline(always)]
pub fn is_newline(c: u8) -> bool {
    matches!(c, b'\r' | b'\n')
}

#[inline(always)]
pub fn is_alphabetic(c: u8) -> bool {
    c.is_ascii_alphabetic()
}

/// token chars per RFC 3261 §25.1.
#[inline(always)]
pub fn is_token(c: u8) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            b'-' | b'.' | b'!' | b'%' | b'*' | b'_' | b'+' | b'`' | b'\'' | b'~'
        )
}

/// Chars allowed in a host name label.
#[inline(always)]
pub fn is_host(c: u8) -> bool {
    c.is_ascii_alphanumeric() | matches!(c, b'.' | b'-')
}

/// Chars allowed in the user part of a SIP URI.
#[inline(always)]
pub fn is_user(c: u8) -> bool {
    is_token(c) || matches!(c, b'&' | b'=' | b'$' | b',' | b';' | b'?' | b'/')
}

/// Chars allowed in URI parameter names and values.
#[inline(always)]
pub fn is_uri_param(c: u8) -> bool {
    is_token(c) || matches!(c, b'[' | b']' | b'/' | b':' | b'&' | b'+' | b'$')
}

#[inline(always)]
pub fn not_comma_or_newline(c: u8) -> bool {
    !matches!(c, b',' | b'\r' | b'\n')
}
