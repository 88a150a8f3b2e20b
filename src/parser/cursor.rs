use super::tokenizer::{Position, Span};

/// Error raised when the cursor cannot make progress (advancing past the end
/// of input, or a malformed escape sequence in escaped mode).
#[derive(Debug, Clone)]
pub struct CursorError {
    pub msg: String,
    pub pos: Position,
}

/// Cursor state copied by value; cloning a cursor never aliases live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorState {
    pub peek: Option<char>,
    pub offset: usize,
    pub line: usize,
    pub col: usize,
}

impl CursorState {
    fn position(&self) -> Position {
        Position { offset: self.offset, line: self.line, col: self.col }
    }
}

/// Cursor over raw source text.
#[derive(Debug, Clone)]
pub struct PlainCursor<'a> {
    input: &'a str,
    end: usize,
    state: CursorState,
}

impl<'a> PlainCursor<'a> {
    pub fn new(input: &'a str, start_offset: usize, start_line: usize, start_col: usize, end: usize) -> Self {
        let mut state = CursorState { peek: None, offset: start_offset, line: start_line, col: start_col };
        update_peek(input, end, &mut state);
        Self { input, end, state }
    }

    pub fn peek(&self) -> Option<char> {
        self.state.peek
    }

    pub fn advance(&mut self) -> Result<(), CursorError> {
        advance_state(self.input, self.end, &mut self.state)
    }

    pub fn position(&self) -> Position {
        self.state.position()
    }

    pub fn offset(&self) -> usize {
        self.state.offset
    }

    pub fn chars_left(&self) -> usize {
        self.end.saturating_sub(self.state.offset)
    }

    pub fn diff(&self, other: &PlainCursor<'a>) -> usize {
        self.state.offset.saturating_sub(other.state.offset)
    }

    pub fn chars(&self, start_offset: usize) -> &'a str {
        &self.input[start_offset..self.state.offset]
    }

    /// Span from `start` to the current position. When `leading_trivia` is
    /// non-empty the span's `start` is walked forward over those characters
    /// while `full_start` keeps the original position.
    pub fn span(&self, start: &PlainCursor<'a>, leading_trivia: &[char]) -> Span {
        let full_start = start.state.position();
        let mut tight = start.state;
        if !leading_trivia.is_empty() {
            while self.state.offset > tight.offset {
                match tight.peek {
                    Some(c) if leading_trivia.contains(&c) => {
                        if advance_state(self.input, self.end, &mut tight).is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        }
        Span { start: tight.position(), end: self.state.position(), full_start }
    }
}

fn char_at(input: &str, offset: usize) -> Option<char> {
    input.get(offset..).and_then(|s| s.chars().next())
}

fn update_peek(input: &str, end: usize, state: &mut CursorState) {
    state.peek = if state.offset >= end { None } else { char_at(input, state.offset) };
}

/// One step forward. `\r\n` counts as a single newline consumed in one
/// advance; a bare `\r` moves the offset without touching line or column.
fn advance_state(input: &str, end: usize, state: &mut CursorState) -> Result<(), CursorError> {
    if state.offset >= end {
        return Err(CursorError { msg: "Unexpected character \"EOF\"".to_string(), pos: state.position() });
    }
    match char_at(input, state.offset) {
        Some('\n') => {
            state.line += 1;
            state.col = 0;
            state.offset += 1;
        }
        Some('\r') => {
            if state.offset + 1 < end && input.as_bytes().get(state.offset + 1) == Some(&b'\n') {
                state.line += 1;
                state.col = 0;
                state.offset += 2;
            } else {
                state.offset += 1;
            }
        }
        Some(c) => {
            state.col += 1;
            state.offset += c.len_utf8();
        }
        None => {
            state.offset += 1;
        }
    }
    update_peek(input, end, state);
    Ok(())
}

/// Cursor that transparently decodes backslash escape sequences.
///
/// `state` is the committed position with the decoded character in `peek`;
/// `internal` looks ahead to the end of the escape sequence so that a
/// subsequent advance lands after it. Raw (undecoded) slices come from the
/// internal offsets.
#[derive(Debug, Clone)]
pub struct EscapedCursor<'a> {
    base: PlainCursor<'a>,
    internal: CursorState,
}

impl<'a> EscapedCursor<'a> {
    pub fn new(
        input: &'a str,
        start_offset: usize,
        start_line: usize,
        start_col: usize,
        end: usize,
    ) -> Result<Self, CursorError> {
        let base = PlainCursor::new(input, start_offset, start_line, start_col, end);
        let internal = base.state;
        let mut cursor = Self { base, internal };
        cursor.process_escape_sequence()?;
        Ok(cursor)
    }

    pub fn peek(&self) -> Option<char> {
        self.base.state.peek
    }

    pub fn advance(&mut self) -> Result<(), CursorError> {
        self.base.state = self.internal;
        self.base.advance()?;
        self.internal = self.base.state;
        self.process_escape_sequence()
    }

    pub fn position(&self) -> Position {
        self.base.position()
    }

    pub fn raw_offset(&self) -> usize {
        self.internal.offset
    }

    pub fn chars_left(&self) -> usize {
        self.base.chars_left()
    }

    pub fn plain(&self) -> &PlainCursor<'a> {
        &self.base
    }

    fn advance_internal(&mut self) -> Result<(), CursorError> {
        advance_state(self.base.input, self.base.end, &mut self.internal)
    }

    fn process_escape_sequence(&mut self) -> Result<(), CursorError> {
        if self.internal.peek != Some('\\') {
            return Ok(());
        }
        self.internal = self.base.state;
        self.advance_internal()?;

        match self.internal.peek {
            Some('n') => self.base.state.peek = Some('\n'),
            Some('r') => self.base.state.peek = Some('\r'),
            Some('v') => self.base.state.peek = Some('\u{b}'),
            Some('t') => self.base.state.peek = Some('\t'),
            Some('b') => self.base.state.peek = Some('\u{8}'),
            Some('f') => self.base.state.peek = Some('\u{c}'),
            Some('u') => {
                self.advance_internal()?;
                if self.internal.peek == Some('{') {
                    // Variable length, e.g. `\u{1F6C8}`
                    self.advance_internal()?;
                    let digit_start = self.internal.offset;
                    while self.internal.peek != Some('}') {
                        self.advance_internal()?;
                    }
                    self.base.state.peek = Some(self.decode_hex(digit_start, self.internal.offset)?);
                } else {
                    // Fixed length, e.g. `ሴ`
                    let digit_start = self.internal.offset;
                    self.advance_internal()?;
                    self.advance_internal()?;
                    self.advance_internal()?;
                    self.base.state.peek = Some(self.decode_hex(digit_start, digit_start + 4)?);
                }
            }
            Some('x') => {
                self.advance_internal()?;
                let digit_start = self.internal.offset;
                self.advance_internal()?;
                self.base.state.peek = Some(self.decode_hex(digit_start, digit_start + 2)?);
            }
            Some(c) if c.is_digit(8) => {
                // Octal sequence, up to three digits; the internal cursor is
                // left on the last digit so the next advance moves past it.
                let mut code_point: u32 = 0;
                let mut length = 0;
                let mut previous = self.internal;
                while let Some(d) = self.internal.peek.and_then(|c| c.to_digit(8)) {
                    if length >= 3 {
                        break;
                    }
                    previous = self.internal;
                    code_point = code_point * 8 + d;
                    self.advance_internal()?;
                    length += 1;
                }
                self.base.state.peek = char::from_u32(code_point);
                self.internal = previous;
            }
            Some(c) if c == '\n' || c == '\r' => {
                // Line continuation: the backslash and the newline vanish.
                self.advance_internal()?;
                self.base.state = self.internal;
            }
            other => {
                // Escaped normal character.
                self.base.state.peek = other;
            }
        }
        Ok(())
    }

    fn decode_hex(&self, start: usize, end: usize) -> Result<char, CursorError> {
        let invalid = || CursorError {
            msg: "Invalid hexadecimal escape sequence".to_string(),
            pos: self.base.position(),
        };
        let hex = self.base.input.get(start..end).ok_or_else(invalid)?;
        let mut code_point: u32 = 0;
        for c in hex.chars() {
            let digit = c.to_digit(16).ok_or_else(invalid)?;
            code_point = code_point * 16 + digit;
        }
        char::from_u32(code_point).ok_or_else(invalid)
    }
}

/// The cursor handed to the tokenizer; plain by default, escape-decoding
/// when the source is an escaped string literal.
#[derive(Debug, Clone)]
pub enum CharCursor<'a> {
    Plain(PlainCursor<'a>),
    Escaped(EscapedCursor<'a>),
}

impl<'a> CharCursor<'a> {
    pub fn peek(&self) -> Option<char> {
        match self {
            CharCursor::Plain(c) => c.peek(),
            CharCursor::Escaped(c) => c.peek(),
        }
    }

    pub fn advance(&mut self) -> Result<(), CursorError> {
        match self {
            CharCursor::Plain(c) => c.advance(),
            CharCursor::Escaped(c) => c.advance(),
        }
    }

    pub fn position(&self) -> Position {
        match self {
            CharCursor::Plain(c) => c.position(),
            CharCursor::Escaped(c) => c.position(),
        }
    }

    pub fn chars_left(&self) -> usize {
        match self {
            CharCursor::Plain(c) => c.chars_left(),
            CharCursor::Escaped(c) => c.chars_left(),
        }
    }

    pub fn diff(&self, other: &CharCursor<'a>) -> usize {
        self.plain().diff(other.plain())
    }

    /// Source text between `start` and this cursor. In escaped mode the
    /// slice comes from the internal lookahead offsets, so a decoded escape
    /// at `start` contributes only its tail, not the full raw sequence.
    pub fn chars(&self, start: &CharCursor<'a>) -> &'a str {
        match (self, start) {
            (CharCursor::Escaped(c), CharCursor::Escaped(s)) => c.plain().input.get(s.raw_offset()..c.raw_offset()).unwrap_or(""),
            _ => self.plain().chars(start.plain().offset()),
        }
    }

    pub fn span(&self, start: &CharCursor<'a>, leading_trivia: &[char]) -> Span {
        self.plain().span(start.plain(), leading_trivia)
    }

    fn plain(&self) -> &PlainCursor<'a> {
        match self {
            CharCursor::Plain(c) => c,
            CharCursor::Escaped(c) => c.plain(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(input: &str) -> PlainCursor<'_> {
        PlainCursor::new(input, 0, 0, 0, input.len())
    }

    fn escaped(input: &str) -> EscapedCursor<'_> {
        EscapedCursor::new(input, 0, 0, 0, input.len()).unwrap()
    }

    fn drain(mut cursor: EscapedCursor<'_>) -> String {
        let mut out = String::new();
        while let Some(c) = cursor.peek() {
            out.push(c);
            cursor.advance().unwrap();
        }
        out
    }

    #[test]
    fn peek_and_advance() {
        let mut c = plain("ab");
        assert_eq!(c.peek(), Some('a'));
        c.advance().unwrap();
        assert_eq!(c.peek(), Some('b'));
        c.advance().unwrap();
        assert_eq!(c.peek(), None);
        assert!(c.advance().is_err());
    }

    #[test]
    fn crlf_is_one_newline() {
        let mut c = plain("a\r\nb");
        c.advance().unwrap();
        assert_eq!(c.position().line, 0);
        c.advance().unwrap();
        let pos = c.position();
        assert_eq!((pos.line, pos.col, pos.offset), (1, 0, 3));
        assert_eq!(c.peek(), Some('b'));
    }

    #[test]
    fn bare_cr_keeps_line_and_column() {
        let mut c = plain("a\rb");
        c.advance().unwrap();
        c.advance().unwrap();
        let pos = c.position();
        assert_eq!((pos.line, pos.col), (0, 1));
    }

    #[test]
    fn multibyte_advances_by_char() {
        let mut c = plain("é!");
        assert_eq!(c.peek(), Some('é'));
        c.advance().unwrap();
        let pos = c.position();
        assert_eq!((pos.offset, pos.col), (2, 1));
        assert_eq!(c.peek(), Some('!'));
    }

    #[test]
    fn clone_is_independent() {
        let mut c = plain("abc");
        let saved = c.clone();
        c.advance().unwrap();
        c.advance().unwrap();
        assert_eq!(saved.peek(), Some('a'));
        assert_eq!(c.diff(&saved), 2);
    }

    #[test]
    fn span_with_leading_trivia() {
        let mut c = plain("  x");
        let start = c.clone();
        for _ in 0..3 {
            c.advance().unwrap();
        }
        let span = c.span(&start, &[' ']);
        assert_eq!(span.full_start.offset, 0);
        assert_eq!(span.start.offset, 2);
        assert_eq!(span.end.offset, 3);
    }

    #[test]
    fn decodes_control_escapes() {
        assert_eq!(drain(escaped(r"a\nb\tc")), "a\nb\tc");
    }

    #[test]
    fn decodes_hex_and_unicode_escapes() {
        assert_eq!(drain(escaped(r"\x41B\u{1F6C8}")), "AB\u{1F6C8}");
    }

    #[test]
    fn decodes_octal_escapes() {
        assert_eq!(drain(escaped(r"\101\60")), "A0");
    }

    #[test]
    fn line_continuation_is_removed() {
        assert_eq!(drain(escaped("a\\\nb")), "ab");
    }

    #[test]
    fn escaped_normal_char_passes_through() {
        assert_eq!(drain(escaped(r"\q")), "q");
    }

    #[test]
    fn invalid_hex_escape_errors() {
        // A leading invalid escape fails construction; the tokenizer falls
        // back to an empty stream in that case.
        assert!(EscapedCursor::new(r"\xZZ", 0, 0, 0, 4).is_err());

        // Mid-stream, the advance that reaches the escape reports it.
        let mut c = escaped(r"a\xZZ");
        assert_eq!(c.peek(), Some('a'));
        assert!(c.advance().is_err());
    }

    #[test]
    fn raw_chars_come_from_internal_offsets() {
        let input = r"\n";
        let start = CharCursor::Escaped(escaped(input));
        let mut c = start.clone();
        c.advance().unwrap();
        // `start` already looks ahead past the backslash, so the slice
        // begins inside the escape sequence.
        assert_eq!(c.chars(&start), "n");
    }
}
