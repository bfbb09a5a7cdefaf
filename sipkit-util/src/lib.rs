use std::str;

pub mod util;

type Result<T> = std::result::Result<T, Error>;

/// Current reading position inside a source buffer.
#[derive(Debug, Clone, Copy)]
pub struct Position {
    line: usize,
    col: usize,
}

impl Position {
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn col(&self) -> usize {
        self.col
    }
}

/// Reads a byte slice while keeping track of line and column.
#[derive(Debug)]
pub struct Scanner<'a> {
    /// The input bytes slice to be read.
    src: &'a [u8],
    /// Current position.
    pos: Position,
    /// Current index.
    idx: usize,
}

impl<'a> Scanner<'a> {
    /// Create a `Scanner` from a byte slice.
    ///
    /// The `line` and `col` always start from 1.
    pub const fn new(src: &'a [u8]) -> Self {
        Scanner {
            src,
            pos: Position { line: 1, col: 1 },
            idx: 0,
        }
    }

    pub fn position(&self) -> &Position {
        &self.pos
    }

    /// Returns `true` if all bytes were read.
    #[inline(always)]
    pub fn is_eof(&self) -> bool {
        self.idx >= self.src.len()
    }

    /// Get the next byte without advancing.
    #[inline]
    pub fn peek(&self) -> Option<&u8> {
        self.src.get(self.idx)
    }

    /// Moves to the next byte n times.
    pub fn bump_n(&mut self, n: usize) {
        for _ in 0..n {
            self.next();
        }
    }

    /// Same as [`Scanner::peek`] but returns a `Result` instead of an
    /// `Option`.
    #[inline]
    pub fn lookahead(&self) -> Result<&u8> {
        self.peek().ok_or_else(|| self.error::<u8>(ErrorKind::Eof).unwrap_err())
    }

    #[inline]
    pub fn starts_with(&self, pat: &[u8]) -> bool {
        self.src.get(self.idx..).is_some_and(|rem| rem.starts_with(pat))
    }

    /// `read_while()` calls the `func` closure for each byte in the slice
    /// and advances while the closure returns `true`.
    ///
    /// # Returns
    ///
    /// The slice of bytes from the starting position to the position where
    /// the closure `func` returned `false` or the end of the slice.
    #[inline(always)]
    pub fn read_while<F>(&mut self, func: F) -> &'a [u8]
    where
        F: Fn(u8) -> bool,
    {
        let start = self.idx;
        let src = self.src;
        let len = src.len();

        while self.idx < len && func(src[self.idx]) {
            self.bump(src[self.idx]);
        }

        &src[start..self.idx]
    }

    /// Checks whether the upcoming bytes match the given slice, consuming
    /// them on success.
    pub fn matches_slice(&mut self, slice: &[u8]) -> Result<()> {
        if self.starts_with(slice) {
            self.bump_n(slice.len());
            Ok(())
        } else {
            self.error(ErrorKind::Tag)
        }
    }

    /// Read the next byte if it equals `b`.
    ///
    /// # Errors
    ///
    /// Returns an error if the byte differs from `b` or the slice reached
    /// the end.
    pub fn must_read(&mut self, b: u8) -> Result<()> {
        let Some(&n) = self.peek() else {
            return self.error(ErrorKind::Eof);
        };
        if b != n {
            return self.error(ErrorKind::Char { expected: b, found: n });
        }
        self.next();
        Ok(())
    }

    pub fn take_until(&mut self, byte: u8) -> &'a [u8] {
        self.read_while(|b| b != byte)
    }

    /// Same as [`Scanner::read_while`] but returns the bytes as a string
    /// slice.
    #[inline]
    pub fn read_str_while<F>(&mut self, func: F) -> Result<&'a str>
    where
        F: Fn(u8) -> bool,
    {
        let bytes = self.read_while(&func);

        match str::from_utf8(bytes) {
            Ok(s) => Ok(s),
            Err(_) => self.error(ErrorKind::Utf8),
        }
    }

    /// Read a number from the slice.
    ///
    /// This method reads until an invalid digit is found.
    pub fn read_num<N>(&mut self) -> Result<N>
    where
        N: lexical_core::FromLexical,
    {
        match lexical_core::parse_partial::<N>(self.as_ref()) {
            Ok((value, read)) if read > 0 => {
                self.bump_n(read);
                Ok(value)
            }
            _ => self.error(ErrorKind::Num),
        }
    }

    /// Call the `func` closure for the next byte and consume it if the
    /// closure returns `true`.
    ///
    /// # Returns
    ///
    /// The byte read.
    #[inline(always)]
    pub fn consume_if<F>(&mut self, func: F) -> Option<u8>
    where
        F: FnOnce(u8) -> bool,
    {
        match self.peek() {
            Some(&matched) if func(matched) => {
                self.bump(matched);
                Some(matched)
            }
            _ => None,
        }
    }

    #[inline(always)]
    fn bump(&mut self, byte: u8) {
        if byte == b'\n' {
            self.pos.col = 1;
            self.pos.line += 1;
        } else {
            self.pos.col += 1;
        }
        self.idx += 1;
    }

    pub fn cur_is_some_and<F>(&self, func: F) -> bool
    where
        F: FnOnce(u8) -> bool,
    {
        self.peek().is_some_and(|&b| func(b))
    }

    #[inline]
    pub fn remaining(&self) -> &'a [u8] {
        &self.src[self.idx..]
    }

    fn error<T>(&self, kind: ErrorKind) -> Result<T> {
        Err(Error {
            kind,
            line: self.pos.line,
            col: self.pos.col,
        })
    }
}

/// Errors that can occur while reading the source.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    /// End of input reached.
    Eof,
    Char {
        expected: u8,
        found: u8,
    },
    Num,
    Tag,
    Utf8,
}

#[derive(Debug, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub line: usize,
    pub col: usize,
}

impl<'a> AsRef<[u8]> for Scanner<'a> {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.src[self.idx..]
    }
}

impl Iterator for Scanner<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<Self::Item> {
        self.src.get(self.idx).copied().inspect(|&byte| self.bump(byte))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_num() {
        let mut scanner = Scanner::new("12345".as_bytes());
        assert_eq!(scanner.read_num(), Ok(12345));

        let mut scanner = Scanner::new("NaN".as_bytes());
        assert!(scanner.read_num::<u32>().is_err());
        assert_eq!(scanner.as_ref(), b"NaN");

        let mut scanner = Scanner::new("9123Test".as_bytes());
        assert_eq!(scanner.read_num(), Ok(9123));
        assert_eq!(scanner.as_ref(), b"Test");
    }

    #[test]
    fn test_lookahead() {
        let mut scanner = Scanner::new("Hi".as_bytes());

        assert_eq!(scanner.lookahead(), Ok(&b'H'));
        scanner.next();
        assert_eq!(scanner.lookahead(), Ok(&b'i'));

        scanner.read_while(|_| true);

        assert!(scanner.lookahead().is_err());
    }

    #[test]
    fn test_take_until() {
        let mut scanner = Scanner::new("branch=z9hG4bK77;ttl=1".as_bytes());

        assert_eq!(scanner.take_until(b'='), b"branch");
        scanner.must_read(b'=').unwrap();
        assert_eq!(scanner.take_until(b';'), b"z9hG4bK77");
    }

    #[test]
    fn test_position_tracking() {
        let mut scanner = Scanner::new("ab\ncd".as_bytes());
        scanner.bump_n(3);

        assert_eq!(scanner.position().line(), 2);
        assert_eq!(scanner.position().col(), 1);
    }
}
