//! SQL statement splitter
//!
//! Divides a multi-statement SQL text into individually executable
//! statements in one left-to-right scan. Semicolons inside quoted strings,
//! quoted identifiers, dollar-quoted bodies and comments are not boundaries.
//! Comments are dropped from the output.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State<'a> {
    Normal,
    SingleQuote { escapes: bool },
    DoubleQuote,
    Backtick,
    DollarQuote(&'a str),
    LineComment,
    BlockComment,
}

/// Lazy iterator over the statements of one SQL text.
///
/// Each item is trimmed and non-empty. The scan resumes where the previous
/// statement ended, so the iterator cannot be restarted.
#[derive(Debug, Clone)]
pub struct SqlSplitter<'a> {
    input: &'a str,
    pos: usize,
    backslash_escapes: bool,
}

impl<'a> SqlSplitter<'a> {
    /// Splitter for PostgreSQL text: backslashes are literal except in
    /// `E'...'` strings.
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            backslash_escapes: false,
        }
    }

    /// Treats a backslash inside quoted strings as an escape (MySQL).
    pub fn with_backslash_escapes(mut self, enabled: bool) -> Self {
        self.backslash_escapes = enabled;
        self
    }

    /// Dollar-quote delimiter starting at `start`, if any: `$$` or `$tag$`
    /// where the tag is an identifier that does not start with a digit. A `$`
    /// continuing an identifier never opens one.
    fn dollar_delimiter(&self, start: usize) -> Option<&'a str> {
        let bytes = self.input.as_bytes();
        if start > 0 && (bytes[start - 1].is_ascii_alphanumeric() || bytes[start - 1] == b'_') {
            return None;
        }
        let mut end = start + 1;
        while end < bytes.len() {
            let b = bytes[end];
            if b == b'$' {
                return Some(&self.input[start..=end]);
            }
            let valid = if end == start + 1 {
                b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
            } else {
                b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
            };
            if !valid {
                return None;
            }
            end += 1;
        }
        None
    }

    /// Whether the quote at `quote_pos` opens a PostgreSQL escape string.
    fn is_escape_string(&self, quote_pos: usize) -> bool {
        let bytes = self.input.as_bytes();
        if quote_pos == 0 || !matches!(bytes[quote_pos - 1], b'E' | b'e') {
            return false;
        }
        quote_pos < 2 || !(bytes[quote_pos - 2].is_ascii_alphanumeric() || bytes[quote_pos - 2] == b'_')
    }

    fn finish(buffer: &[u8]) -> Option<String> {
        let statement = String::from_utf8_lossy(buffer).trim().to_string();
        if statement.is_empty() {
            None
        } else {
            Some(statement)
        }
    }
}

impl<'a> Iterator for SqlSplitter<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let bytes = self.input.as_bytes();
        let mut buffer: Vec<u8> = Vec::new();
        let mut state = State::Normal;

        while self.pos < bytes.len() {
            let b = bytes[self.pos];
            let next = bytes.get(self.pos + 1).copied();

            match state {
                State::Normal => match b {
                    b';' => {
                        self.pos += 1;
                        if let Some(statement) = Self::finish(&buffer) {
                            return Some(statement);
                        }
                        buffer.clear();
                        continue;
                    }
                    b'\'' => {
                        let escapes = self.backslash_escapes || self.is_escape_string(self.pos);
                        state = State::SingleQuote { escapes };
                    }
                    b'"' => state = State::DoubleQuote,
                    b'`' => state = State::Backtick,
                    b'-' if next == Some(b'-') => {
                        state = State::LineComment;
                        self.pos += 2;
                        continue;
                    }
                    b'/' if next == Some(b'*') => {
                        state = State::BlockComment;
                        buffer.push(b' ');
                        self.pos += 2;
                        continue;
                    }
                    b'$' => {
                        if let Some(delimiter) = self.dollar_delimiter(self.pos) {
                            buffer.extend_from_slice(delimiter.as_bytes());
                            self.pos += delimiter.len();
                            state = State::DollarQuote(delimiter);
                            continue;
                        }
                    }
                    _ => {}
                },
                State::SingleQuote { escapes } => {
                    if escapes && b == b'\\' && next.is_some() {
                        buffer.extend_from_slice(&bytes[self.pos..self.pos + 2]);
                        self.pos += 2;
                        continue;
                    }
                    if b == b'\'' {
                        state = State::Normal;
                    }
                }
                State::DoubleQuote => {
                    if self.backslash_escapes && b == b'\\' && next.is_some() {
                        buffer.extend_from_slice(&bytes[self.pos..self.pos + 2]);
                        self.pos += 2;
                        continue;
                    }
                    if b == b'"' {
                        state = State::Normal;
                    }
                }
                State::Backtick => {
                    if b == b'`' {
                        state = State::Normal;
                    }
                }
                State::DollarQuote(delimiter) => {
                    if bytes[self.pos..].starts_with(delimiter.as_bytes()) {
                        buffer.extend_from_slice(delimiter.as_bytes());
                        self.pos += delimiter.len();
                        state = State::Normal;
                        continue;
                    }
                }
                State::LineComment => {
                    if b == b'\n' {
                        state = State::Normal;
                    } else {
                        self.pos += 1;
                        continue;
                    }
                }
                State::BlockComment => {
                    if b == b'*' && next == Some(b'/') {
                        state = State::Normal;
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                    }
                    continue;
                }
            }

            buffer.push(b);
            self.pos += 1;
        }

        Self::finish(&buffer)
    }
}
