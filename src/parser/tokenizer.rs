//! Character-level tokenizer for component templates.
//!
//! Produces a flat stream of spanned tokens covering markup, interpolation,
//! ICU expansion forms, control blocks, `@let` declarations and selectorless
//! components. Malformed input never aborts tokenization: errors are recorded
//! and the tokenizer re-synchronizes so the tree builder always receives a
//! complete stream terminated by an EOF token.

use serde::Serialize;

use super::cursor::{CharCursor, EscapedCursor, PlainCursor};
use crate::error::{ErrorKind, ParseError};
use crate::tags::{TagContentType, TagDefinitionResolver};
use crate::TokenizeOptions;

/// Position in source text. Offsets are byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub offset: usize,
    /// Line number (0-indexed)
    pub line: usize,
    /// Column number (0-indexed, in characters)
    pub col: usize,
}

/// Range in source text. `start` may sit past `full_start` when leading
/// trivia characters were skipped; `full_start` always points at the first
/// character that belongs to the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
    pub full_start: Position,
}

pub const INTERPOLATION_START: &str = "{{";
pub const INTERPOLATION_END: &str = "}}";

/// Block names recognized when block tokenization is enabled. Anything else
/// after an `@` stays plain text.
pub const SUPPORTED_BLOCKS: &[&str] = &[
    "@if",
    "@else",
    "@for",
    "@switch",
    "@case",
    "@default",
    "@empty",
    "@defer",
    "@placeholder",
    "@loading",
    "@error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    TagOpenStart,
    TagOpenEnd,
    TagOpenEndVoid,
    TagClose,
    IncompleteTagOpen,
    Text,
    EscapableRawText,
    RawText,
    Interpolation,
    EncodedEntity,
    CommentStart,
    CommentEnd,
    CdataStart,
    CdataEnd,
    AttrName,
    AttrQuote,
    AttrValueText,
    AttrValueInterpolation,
    DocType,
    ExpansionFormStart,
    ExpansionCaseValue,
    ExpansionCaseExpStart,
    ExpansionCaseExpEnd,
    ExpansionFormEnd,
    BlockOpenStart,
    BlockOpenEnd,
    BlockClose,
    BlockParameter,
    IncompleteBlockOpen,
    LetStart,
    LetValue,
    LetEnd,
    IncompleteLet,
    ComponentOpenStart,
    ComponentOpenEnd,
    ComponentOpenEndVoid,
    ComponentClose,
    IncompleteComponentOpen,
    DirectiveName,
    DirectiveOpen,
    DirectiveClose,
    Eof,
}

/// A single token. `parts` carries the kind-specific payload, e.g.
/// `[prefix, name]` for tag opens and `[decoded, encoded]` for entities.
///
/// Token is a struct rather than an enum-with-fields because the recovery
/// paths rewrite an already emitted open token into its incomplete variant
/// in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub parts: Vec<String>,
    pub span: Span,
}

/// Everything the tokenizer produced, errors included.
#[derive(Debug, Serialize)]
pub struct TokenizeResult {
    pub tokens: Vec<Token>,
    pub errors: Vec<ParseError>,
    /// ICU expansion-form conditions whose text would change under
    /// carriage-return normalization, collected when normalization is off.
    pub non_normalized_icu_expressions: Vec<Token>,
}

const UNEXPECTED_EOF: &str = "Unexpected character \"EOF\"";

const UNESCAPED_BRACE_HINT: &str =
    " (Do you have an unescaped \"{\" in your template? Use \"{{ '{' }}\") to escape it.)";

fn unexpected_char_msg(peek: Option<char>) -> String {
    match peek {
        Some(c) => format!("Unexpected character \"{c}\""),
        None => UNEXPECTED_EOF.to_string(),
    }
}

/// Internal control-flow error. `Cursor` marks a failed character-level
/// expectation at a saved cursor; `Parse` carries a fully built diagnostic.
enum LexError<'a> {
    Cursor { msg: String, at: CharCursor<'a> },
    Parse(Box<ParseError>),
}

impl LexError<'_> {
    fn is_eof(&self) -> bool {
        let msg = match self {
            LexError::Cursor { msg, .. } => msg.as_str(),
            LexError::Parse(e) => e.message.as_str(),
        };
        msg == UNEXPECTED_EOF
    }
}

type LexResult<'a, T = ()> = Result<T, LexError<'a>>;

/// Where a text run ends, depending on what encloses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextEndMode {
    /// Top-level text; ends at tags, blocks, ICU boundaries or EOF.
    Text,
    /// Quoted attribute value; ends at the quote character.
    Quote(char),
    /// Unquoted attribute value; ends where an attribute name would.
    UnquotedAttr,
}

/// End marker for a raw-text region.
enum RawTextEnd {
    Str(&'static str),
    TagClose(String),
}

/// Result of consuming an opening tag, used to decide whether the element
/// content must be consumed as raw text.
struct TagInfo {
    prefix: String,
    name: String,
    closing_tag_name: String,
    self_closing: bool,
}

pub struct Tokenizer<'a> {
    cursor: CharCursor<'a>,
    tokenize_icu: bool,
    tokenize_blocks: bool,
    tokenize_let: bool,
    selectorless_enabled: bool,
    preserve_line_endings: bool,
    i18n_normalize_line_endings_in_icus: bool,
    leading_trivia: Vec<char>,
    get_tag_definition: TagDefinitionResolver,
    current_token_start: Option<CharCursor<'a>>,
    current_token_kind: Option<TokenKind>,
    expansion_case_stack: Vec<TokenKind>,
    open_directive_count: usize,
    in_interpolation: bool,
    tokens: Vec<Token>,
    errors: Vec<ParseError>,
    non_normalized_icu_expressions: Vec<Token>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(
        source: &'a str,
        get_tag_definition: TagDefinitionResolver,
        options: &TokenizeOptions,
    ) -> Self {
        let (start_offset, start_line, start_col, end) = match &options.range {
            Some(range) => (range.start_pos, range.start_line, range.start_col, range.end_pos),
            None => (0, 0, 0, source.len()),
        };
        let mut errors = Vec::new();
        let cursor = if options.escaped_string {
            match EscapedCursor::new(source, start_offset, start_line, start_col, end) {
                Ok(c) => CharCursor::Escaped(c),
                Err(e) => {
                    let pos = e.pos;
                    errors.push(ParseError::new(
                        ErrorKind::UnexpectedCharacter,
                        e.msg,
                        Span { start: pos, end: pos, full_start: pos },
                    ));
                    // The very first escape sequence is malformed; give up on
                    // the input and emit just the EOF token.
                    CharCursor::Plain(PlainCursor::new(source, end, start_line, start_col, end))
                }
            }
        } else {
            CharCursor::Plain(PlainCursor::new(source, start_offset, start_line, start_col, end))
        };
        Self {
            cursor,
            tokenize_icu: options.tokenize_expansion_forms,
            tokenize_blocks: options.tokenize_blocks,
            tokenize_let: options.tokenize_let,
            selectorless_enabled: options.selectorless_enabled,
            preserve_line_endings: options.preserve_line_endings,
            i18n_normalize_line_endings_in_icus: options.i18n_normalize_line_endings_in_icus,
            leading_trivia: options.leading_trivia_chars.clone(),
            get_tag_definition,
            current_token_start: None,
            current_token_kind: None,
            expansion_case_stack: Vec::new(),
            open_directive_count: 0,
            in_interpolation: false,
            tokens: Vec::new(),
            errors,
            non_normalized_icu_expressions: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> TokenizeResult {
        while self.cursor.peek().is_some() {
            let checkpoint = self.cursor.clone();
            if let Err(e) = self.tokenize_step() {
                self.handle_error(e);
                // Make sure the loop cannot stall on the offending character.
                if self.cursor.diff(&checkpoint) == 0
                    && self.cursor.peek().is_some()
                    && self.cursor.advance().is_err()
                {
                    break;
                }
            }
        }
        self.begin_token_here(TokenKind::Eof);
        self.end_token(Vec::new());
        TokenizeResult {
            tokens: self.tokens,
            errors: self.errors,
            non_normalized_icu_expressions: self.non_normalized_icu_expressions,
        }
    }

    fn tokenize_step(&mut self) -> LexResult<'a> {
        let start = self.cursor.clone();
        if self.attempt_char('<')? {
            if self.attempt_char('!')? {
                if self.attempt_char('[')? {
                    self.consume_cdata(start)
                } else if self.attempt_char('-')? {
                    self.consume_comment(start)
                } else {
                    self.consume_doc_type(start)
                }
            } else if self.attempt_char('/')? {
                self.consume_tag_close(start)
            } else {
                match self.consume_tag_open(start)? {
                    Some(info) if !info.self_closing => self.consume_tag_content(&info),
                    _ => Ok(()),
                }
            }
        } else if self.tokenize_let
            && self.cursor.peek() == Some('@')
            && !self.in_interpolation
            && self.is_let_start()
        {
            self.consume_let_declaration(start)
        } else {
            // ICU boundaries take precedence over blocks so that `}` inside
            // an expansion case closes the case rather than a block.
            let mut handled = false;
            if self.tokenize_icu && !self.in_interpolation {
                handled = self.tokenize_expansion_form()?;
            }
            if !handled {
                if self.tokenize_blocks && self.is_block_start() {
                    self.consume_block_start(start)?;
                } else if self.tokenize_blocks
                    && !self.in_interpolation
                    && !self.is_in_expansion_case()
                    && !self.is_in_expansion_form()
                    && self.attempt_char('}')?
                {
                    self.begin_token(TokenKind::BlockClose, start);
                    self.end_token(Vec::new());
                } else {
                    self.consume_with_interpolation(
                        TokenKind::Text,
                        TokenKind::Interpolation,
                        TextEndMode::Text,
                    )?;
                }
            }
            Ok(())
        }
    }

    fn handle_error(&mut self, error: LexError<'a>) {
        let mut error = match error {
            LexError::Cursor { msg, at } => {
                let span = self.cursor.span(&at, &self.leading_trivia);
                ParseError::new(ErrorKind::UnexpectedCharacter, msg, span)
            }
            LexError::Parse(e) => *e,
        };
        if self.is_in_expansion_form() {
            error.message.push_str(UNESCAPED_BRACE_HINT);
        }
        self.current_token_start = None;
        self.current_token_kind = None;
        self.errors.push(error);
    }

    // --- token construction ---

    fn begin_token(&mut self, kind: TokenKind, start: CharCursor<'a>) {
        self.current_token_start = Some(start);
        self.current_token_kind = Some(kind);
    }

    fn begin_token_here(&mut self, kind: TokenKind) {
        let start = self.cursor.clone();
        self.begin_token(kind, start);
    }

    fn end_token(&mut self, parts: Vec<String>) -> usize {
        let end = self.cursor.clone();
        self.end_token_at(parts, &end)
    }

    fn end_token_at(&mut self, parts: Vec<String>, end: &CharCursor<'a>) -> usize {
        let start = self.current_token_start.take().unwrap_or_else(|| end.clone());
        let kind = self.current_token_kind.take().unwrap_or(TokenKind::Text);
        let span = end.span(&start, &self.leading_trivia);
        self.tokens.push(Token { kind, parts, span });
        self.tokens.len() - 1
    }

    // --- cursor helpers ---

    fn advance(&mut self) -> LexResult<'a> {
        let at = self.cursor.clone();
        self.cursor.advance().map_err(|e| LexError::Cursor { msg: e.msg, at })
    }

    fn read_char(&mut self) -> LexResult<'a, char> {
        match self.cursor.peek() {
            Some(c) => {
                self.advance()?;
                Ok(c)
            }
            None => {
                let at = self.cursor.clone();
                Err(LexError::Cursor { msg: unexpected_char_msg(None), at })
            }
        }
    }

    /// Reads one character into `parts`. The cursor consumes a `\r\n` pair
    /// in a single advance with `peek` only ever showing the `\r`, so the
    /// `\n` has to be recovered from the consumed source slice.
    fn read_char_into(&mut self, parts: &mut String) -> LexResult<'a> {
        let before = self.cursor.clone();
        let c = self.read_char()?;
        parts.push(c);
        if c == '\r' && self.cursor.chars(&before) == "\r\n" {
            parts.push('\n');
        }
        Ok(())
    }

    fn attempt_char(&mut self, c: char) -> LexResult<'a, bool> {
        if self.cursor.peek() == Some(c) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn attempt_char_case_insensitive(&mut self, c: char) -> LexResult<'a, bool> {
        match self.cursor.peek() {
            Some(p) if p.to_ascii_lowercase() == c.to_ascii_lowercase() => {
                self.advance()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn require_char(&mut self, c: char) -> LexResult<'a> {
        let at = self.cursor.clone();
        if !self.attempt_char(c)? {
            return Err(LexError::Cursor { msg: unexpected_char_msg(self.cursor.peek()), at });
        }
        Ok(())
    }

    fn attempt_str(&mut self, s: &str) -> LexResult<'a, bool> {
        if self.cursor.chars_left() < s.len() {
            return Ok(false);
        }
        let initial = self.cursor.clone();
        for c in s.chars() {
            if !self.attempt_char(c)? {
                self.cursor = initial;
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn attempt_str_case_insensitive(&mut self, s: &str) -> LexResult<'a, bool> {
        for c in s.chars() {
            if !self.attempt_char_case_insensitive(c)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn require_str(&mut self, s: &str) -> LexResult<'a> {
        let at = self.cursor.clone();
        if !self.attempt_str(s)? {
            return Err(LexError::Cursor { msg: unexpected_char_msg(self.cursor.peek()), at });
        }
        Ok(())
    }

    fn attempt_until_fn(&mut self, mut stop: impl FnMut(Option<char>) -> bool) -> LexResult<'a> {
        while !stop(self.cursor.peek()) {
            self.advance()?;
        }
        Ok(())
    }

    fn require_until_fn(
        &mut self,
        stop: impl FnMut(Option<char>) -> bool,
        min: usize,
    ) -> LexResult<'a> {
        let start = self.cursor.clone();
        self.attempt_until_fn(stop)?;
        if self.cursor.diff(&start) < min {
            return Err(LexError::Cursor {
                msg: unexpected_char_msg(self.cursor.peek()),
                at: start,
            });
        }
        Ok(())
    }

    fn attempt_until_char(&mut self, c: char) -> LexResult<'a> {
        while self.cursor.peek() != Some(c) {
            self.advance()?;
        }
        Ok(())
    }

    fn peek_str(&self, s: &str) -> bool {
        let mut probe = self.cursor.clone();
        for (i, c) in s.chars().enumerate() {
            if i > 0 && probe.advance().is_err() {
                return false;
            }
            if probe.peek() != Some(c) {
                return false;
            }
        }
        true
    }

    fn process_carriage_returns(&self, content: &str) -> String {
        if self.preserve_line_endings {
            return content.to_string();
        }
        content.replace("\r\n", "\n").replace('\r', "\n")
    }

    // --- comments, CDATA, doctype ---

    fn consume_cdata(&mut self, start: CharCursor<'a>) -> LexResult<'a> {
        self.begin_token(TokenKind::CdataStart, start);
        self.require_str("CDATA[")?;
        self.end_token(Vec::new());
        self.consume_raw_text(false, RawTextEnd::Str("]]>"))?;
        self.begin_token_here(TokenKind::CdataEnd);
        self.require_str("]]>")?;
        self.end_token(Vec::new());
        Ok(())
    }

    fn consume_comment(&mut self, start: CharCursor<'a>) -> LexResult<'a> {
        let result = self.consume_comment_inner(start);
        if result.is_err() {
            // Re-synchronize past the malformed comment before reporting.
            while let Some(c) = self.cursor.peek() {
                if self.peek_str("-->") {
                    for _ in 0..3 {
                        let _ = self.cursor.advance();
                    }
                    break;
                }
                if self.cursor.advance().is_err() || c == '>' {
                    break;
                }
            }
        }
        result
    }

    fn consume_comment_inner(&mut self, start: CharCursor<'a>) -> LexResult<'a> {
        self.begin_token(TokenKind::CommentStart, start);
        self.require_char('-')?;
        self.end_token(Vec::new());
        self.consume_raw_text(false, RawTextEnd::Str("-->"))?;
        self.begin_token_here(TokenKind::CommentEnd);
        self.require_str("-->")?;
        self.end_token(Vec::new());
        Ok(())
    }

    fn consume_doc_type(&mut self, start: CharCursor<'a>) -> LexResult<'a> {
        self.begin_token(TokenKind::DocType, start);
        let content_start = self.cursor.clone();
        self.attempt_until_char('>')?;
        let content = self.cursor.chars(&content_start).to_string();
        self.advance()?;
        self.end_token(vec![content]);
        Ok(())
    }

    // --- raw text ---

    fn consume_raw_text(&mut self, consume_entities: bool, end: RawTextEnd) -> LexResult<'a> {
        let kind = if consume_entities { TokenKind::EscapableRawText } else { TokenKind::RawText };
        self.begin_token_here(kind);
        let mut parts = String::new();
        loop {
            let marker_start = self.cursor.clone();
            let found = self.attempt_raw_text_end(&end)?;
            self.cursor = marker_start;
            if found {
                break;
            }
            if consume_entities && self.cursor.peek() == Some('&') {
                let text = self.process_carriage_returns(&parts);
                self.end_token(vec![text]);
                parts.clear();
                self.consume_entity(TokenKind::EscapableRawText)?;
                self.begin_token_here(TokenKind::EscapableRawText);
            } else {
                self.read_char_into(&mut parts)?;
            }
        }
        let text = self.process_carriage_returns(&parts);
        self.end_token(vec![text]);
        Ok(())
    }

    fn attempt_raw_text_end(&mut self, end: &RawTextEnd) -> LexResult<'a, bool> {
        match end {
            RawTextEnd::Str(s) => self.attempt_str(s),
            RawTextEnd::TagClose(name) => {
                if !self.attempt_char('<')? || !self.attempt_char('/')? {
                    return Ok(false);
                }
                self.attempt_until_fn(is_not_whitespace)?;
                if !self.attempt_str_case_insensitive(name)? {
                    return Ok(false);
                }
                self.attempt_until_fn(is_not_whitespace)?;
                self.attempt_char('>')
            }
        }
    }

    /// Consumes `<script>`/`<title>`-class element content up to the
    /// matching close tag, then the close tag itself.
    fn consume_raw_text_with_tag_close(
        &mut self,
        closing_tag_name: &str,
        consume_entities: bool,
    ) -> LexResult<'a> {
        self.consume_raw_text(consume_entities, RawTextEnd::TagClose(closing_tag_name.to_string()))?;
        let (kind, parts) = {
            let open = self
                .tokens
                .iter()
                .rev()
                .find(|t| matches!(t.kind, TokenKind::TagOpenStart | TokenKind::ComponentOpenStart));
            match open {
                Some(t) if t.kind == TokenKind::ComponentOpenStart => {
                    (TokenKind::ComponentClose, t.parts.clone())
                }
                Some(t) => (TokenKind::TagClose, t.parts.clone()),
                None => {
                    (TokenKind::TagClose, vec![String::new(), closing_tag_name.to_string()])
                }
            }
        };
        self.begin_token_here(kind);
        self.require_until_fn(|p| p == Some('>'), 3)?;
        self.advance()?;
        self.end_token(parts);
        Ok(())
    }

    fn consume_tag_content(&mut self, info: &TagInfo) -> LexResult<'a> {
        let prefix = if info.prefix.is_empty() { None } else { Some(info.prefix.as_str()) };
        let definition = (self.get_tag_definition)(&info.name);
        match definition.get_content_type(prefix) {
            TagContentType::RawText => {
                self.consume_raw_text_with_tag_close(&info.closing_tag_name, false)
            }
            TagContentType::EscapableRawText => {
                self.consume_raw_text_with_tag_close(&info.closing_tag_name, true)
            }
            TagContentType::ParsableData => Ok(()),
        }
    }

    // --- entities ---

    fn consume_entity(&mut self, text_kind: TokenKind) -> LexResult<'a> {
        self.begin_token_here(TokenKind::EncodedEntity);
        let start = self.cursor.clone();
        self.advance()?; // `&`
        if self.attempt_char('#')? {
            let is_hex = self.attempt_char('x')? || self.attempt_char('X')?;
            let code_start = self.cursor.clone();
            self.attempt_until_fn(is_digit_entity_end)?;
            if self.cursor.peek() != Some(';') {
                // Include the offending character in the reported entity text.
                self.advance()?;
                let reference_type = if is_hex { "hexadecimal" } else { "decimal" };
                let entity = self.cursor.chars(&start).to_string();
                let here = self.cursor.clone();
                let span = here.span(&here, &self.leading_trivia);
                return Err(LexError::Parse(Box::new(ParseError::new(
                    ErrorKind::InvalidEntity,
                    format!(
                        "Unable to parse entity \"{entity}\" - {reference_type} character reference entities must end with \";\""
                    ),
                    span,
                ))));
            }
            let str_num = self.cursor.chars(&code_start).to_string();
            self.advance()?; // `;`
            let radix = if is_hex { 16 } else { 10 };
            match u32::from_str_radix(&str_num, radix).ok().and_then(char::from_u32) {
                Some(decoded) => {
                    let encoded = self.cursor.chars(&start).to_string();
                    self.end_token(vec![decoded.to_string(), encoded]);
                }
                None => {
                    let entity = self.cursor.chars(&start).to_string();
                    let span = self.cursor.span(&start, &self.leading_trivia);
                    return Err(LexError::Parse(Box::new(ParseError::new(
                        ErrorKind::InvalidEntity,
                        format!("Unknown entity \"{entity}\" - invalid code point"),
                        span,
                    ))));
                }
            }
        } else {
            let name_start = self.cursor.clone();
            self.attempt_until_fn(is_named_entity_end)?;
            if self.cursor.peek() != Some(';') {
                // Not an entity after all; emit the `&` as text and rewind so
                // the rest is consumed as ordinary characters.
                self.begin_token(text_kind, start);
                self.cursor = name_start;
                self.end_token(vec!["&".to_string()]);
            } else {
                let name = self.cursor.chars(&name_start).to_string();
                self.advance()?; // `;`
                match crate::entities::named_entity(&name) {
                    Some(decoded) => {
                        self.end_token(vec![decoded.to_string(), format!("&{name};")]);
                    }
                    None => {
                        let span = self.cursor.span(&start, &self.leading_trivia);
                        return Err(LexError::Parse(Box::new(ParseError::new(
                            ErrorKind::InvalidEntity,
                            format!(
                                "Unknown entity \"{name}\" - use the \"&#<decimal>;\" or  \"&#x<hex>;\" syntax"
                            ),
                            span,
                        ))));
                    }
                }
            }
        }
        Ok(())
    }

    // --- text and interpolation ---

    fn consume_with_interpolation(
        &mut self,
        text_kind: TokenKind,
        interp_kind: TokenKind,
        mode: TextEndMode,
    ) -> LexResult<'a> {
        self.begin_token_here(text_kind);
        let mut parts = String::new();
        loop {
            if self.text_end_reached(mode) {
                break;
            }
            let current = self.cursor.clone();
            if self.attempt_str(INTERPOLATION_START)? {
                let text = self.process_carriage_returns(&parts);
                self.end_token_at(vec![text], &current);
                parts.clear();
                self.in_interpolation = true;
                self.consume_interpolation(interp_kind, current, mode)?;
                self.in_interpolation = false;
                self.begin_token_here(text_kind);
            } else if self.cursor.peek() == Some('&') {
                let text = self.process_carriage_returns(&parts);
                self.end_token(vec![text]);
                parts.clear();
                self.consume_entity(text_kind)?;
                self.begin_token_here(text_kind);
            } else {
                self.read_char_into(&mut parts)?;
            }
        }
        // An interpolation may have been started but not ended inside this
        // text token; reset the state either way.
        self.in_interpolation = false;
        let text = self.process_carriage_returns(&parts);
        self.end_token(vec![text]);
        Ok(())
    }

    fn consume_interpolation(
        &mut self,
        interp_kind: TokenKind,
        interpolation_start: CharCursor<'a>,
        mode: TextEndMode,
    ) -> LexResult<'a> {
        self.begin_token(interp_kind, interpolation_start);
        let expression_start = self.cursor.clone();
        let mut in_quote: Option<char> = None;
        let mut in_comment = false;

        while self.cursor.peek().is_some() && !self.interpolation_premature_end(mode) {
            let current = self.cursor.clone();

            if self.is_tag_start() {
                // A tag is starting mid-interpolation; end the token without
                // an end marker so the tag is lexed normally.
                let expr = self.processed_chars(&expression_start, &current);
                self.end_token(vec![INTERPOLATION_START.to_string(), expr]);
                return Ok(());
            }

            if in_quote.is_none() {
                if self.attempt_str(INTERPOLATION_END)? {
                    let expr = self.processed_chars(&expression_start, &current);
                    self.end_token(vec![
                        INTERPOLATION_START.to_string(),
                        expr,
                        INTERPOLATION_END.to_string(),
                    ]);
                    return Ok(());
                }
                if self.attempt_str("//")? {
                    in_comment = true;
                }
            }

            let ch = self.cursor.peek();
            self.advance()?;
            match ch {
                Some('\\') => {
                    if self.cursor.peek().is_some() {
                        self.advance()?;
                    }
                }
                Some(c) if Some(c) == in_quote => in_quote = None,
                Some(c) if !in_comment && in_quote.is_none() && is_quote(c) => in_quote = Some(c),
                _ => {}
            }
        }

        // EOF or the enclosing context ended before `}}` was seen.
        let end = self.cursor.clone();
        let expr = self.processed_chars(&expression_start, &end);
        self.end_token(vec![INTERPOLATION_START.to_string(), expr]);
        Ok(())
    }

    fn processed_chars(&self, start: &CharCursor<'a>, end: &CharCursor<'a>) -> String {
        self.process_carriage_returns(end.chars(start))
    }

    fn text_end_reached(&self, mode: TextEndMode) -> bool {
        match mode {
            TextEndMode::Text => self.is_text_end(),
            TextEndMode::Quote(q) => {
                matches!(self.cursor.peek(), None | Some('>')) || self.cursor.peek() == Some(q)
            }
            TextEndMode::UnquotedAttr => is_name_end(self.cursor.peek()),
        }
    }

    fn interpolation_premature_end(&self, mode: TextEndMode) -> bool {
        match mode {
            TextEndMode::Text => false,
            TextEndMode::Quote(q) => self.cursor.peek() == Some(q),
            TextEndMode::UnquotedAttr => is_name_end(self.cursor.peek()),
        }
    }

    fn is_text_end(&self) -> bool {
        if self.cursor.peek().is_none() || self.is_tag_start() {
            return true;
        }
        if self.tokenize_icu && !self.in_interpolation {
            if self.is_expansion_form_start() {
                return true;
            }
            if self.is_expansion_case_start() {
                return true;
            }
            if self.cursor.peek() == Some('}')
                && (self.is_in_expansion_case() || self.is_in_expansion_form())
            {
                return true;
            }
        }
        if self.tokenize_blocks
            && !self.in_interpolation
            && !self.is_in_expansion_case()
            && !self.is_in_expansion_form()
        {
            if self.is_block_start() {
                return true;
            }
            if self.tokenize_let && self.is_let_start() {
                return true;
            }
            if self.cursor.peek() == Some('}') {
                return true;
            }
        }
        false
    }

    fn is_tag_start(&self) -> bool {
        if self.cursor.peek() != Some('<') {
            return false;
        }
        let mut probe = self.cursor.clone();
        if probe.advance().is_err() {
            return false;
        }
        match probe.peek() {
            Some('!') | Some('/') | Some('?') | None => true,
            Some(c) => c.is_ascii_alphabetic(),
        }
    }

    // --- tags ---

    fn consume_tag_close(&mut self, start: CharCursor<'a>) -> LexResult<'a> {
        if self.selectorless_enabled {
            let mut probe = self.cursor.clone();
            loop {
                match probe.peek() {
                    None | Some('>') => break,
                    Some(c) if is_selectorless_name_start(c) => {
                        self.begin_token(TokenKind::ComponentClose, start);
                        self.attempt_until_fn(is_not_whitespace)?;
                        let parts = self.consume_component_name()?;
                        self.attempt_until_fn(is_not_whitespace)?;
                        self.require_char('>')?;
                        self.end_token(parts);
                        return Ok(());
                    }
                    Some(_) => {
                        if probe.advance().is_err() {
                            break;
                        }
                    }
                }
            }
        }
        self.begin_token(TokenKind::TagClose, start);
        self.attempt_until_fn(is_not_whitespace)?;
        let parts = self.consume_prefix_and_name(is_name_end)?;
        self.attempt_until_fn(is_not_whitespace)?;
        self.require_char('>')?;
        self.end_token(parts);
        Ok(())
    }

    fn consume_tag_open(&mut self, start: CharCursor<'a>) -> LexResult<'a, Option<TagInfo>> {
        let watermark = self.tokens.len();
        match self.consume_tag_open_inner(&start) {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                let open_idx = self.tokens[watermark..]
                    .iter()
                    .position(|t| {
                        matches!(t.kind, TokenKind::TagOpenStart | TokenKind::ComponentOpenStart)
                    })
                    .map(|i| watermark + i);
                match open_idx {
                    Some(idx) => {
                        self.tokens[idx].kind = incomplete_kind(self.tokens[idx].kind);
                        let has_attributes = self.tokens[idx + 1..].iter().any(|t| {
                            matches!(
                                t.kind,
                                TokenKind::AttrName
                                    | TokenKind::AttrQuote
                                    | TokenKind::AttrValueText
                                    | TokenKind::AttrValueInterpolation
                            )
                        });
                        if !has_attributes && e.is_eof() {
                            Ok(None)
                        } else {
                            Err(e)
                        }
                    }
                    None => {
                        // Nothing was emitted for this tag; degrade everything
                        // up to the closing `>` (or EOF) into text.
                        let text_start = start;
                        let _ = self.attempt_until_fn(|p| matches!(p, None | Some('>')));
                        let _ = self.attempt_char('>');
                        let text =
                            self.process_carriage_returns(self.cursor.chars(&text_start));
                        self.begin_token(TokenKind::Text, text_start);
                        self.end_token(vec![text]);
                        match e {
                            LexError::Parse(err) => self.errors.push(*err),
                            LexError::Cursor { .. } => {}
                        }
                        Ok(None)
                    }
                }
            }
        }
    }

    fn consume_tag_open_inner(&mut self, start: &CharCursor<'a>) -> LexResult<'a, TagInfo> {
        let prefix;
        let name;
        let closing_tag_name;
        let open_idx;

        if self.selectorless_enabled
            && self.cursor.peek().is_some_and(is_selectorless_name_start)
        {
            self.begin_token(TokenKind::ComponentOpenStart, start.clone());
            let parts = self.consume_component_name()?;
            let component_name = parts[0].clone();
            let component_prefix = parts[1].clone();
            let tag_name = parts[2].clone();
            open_idx = self.end_token(parts);
            let mut closing = component_name.clone();
            if !component_prefix.is_empty() {
                closing.push(':');
                closing.push_str(&component_prefix);
            }
            if !tag_name.is_empty() {
                closing.push(':');
                closing.push_str(&tag_name);
            }
            prefix = component_prefix;
            name = component_name;
            closing_tag_name = closing;
            self.attempt_until_fn(is_not_whitespace)?;
        } else {
            if !self.cursor.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
                let span = self.cursor.span(start, &self.leading_trivia);
                return Err(LexError::Parse(Box::new(ParseError::new(
                    ErrorKind::UnexpectedCharacter,
                    unexpected_char_msg(self.cursor.peek()),
                    span,
                ))));
            }
            self.begin_token(TokenKind::TagOpenStart, start.clone());
            let parts = self.consume_prefix_and_name(is_name_end)?;
            prefix = parts[0].clone();
            name = parts[1].clone();
            closing_tag_name = name.clone();
            open_idx = self.end_token(parts);
            self.attempt_until_fn(is_not_whitespace)?;
        }

        self.consume_attributes_and_directives()?;

        // A bracketed attribute name aborted by a newline leaves an
        // unbalanced name token behind.
        let has_incomplete_attr = self.tokens[open_idx + 1..]
            .iter()
            .rev()
            .find_map(|t| {
                if t.kind == TokenKind::AttrName {
                    let last = t.parts.last().map(String::as_str).unwrap_or("");
                    Some(last.starts_with('[') && !last.ends_with(']'))
                } else {
                    None
                }
            })
            .unwrap_or(false);

        let is_component = self.tokens[open_idx].kind == TokenKind::ComponentOpenStart;
        let peek = self.cursor.peek();
        if matches!(peek, Some('\'') | Some('"')) || has_incomplete_attr || peek == Some('<') {
            self.tokens[open_idx].kind = incomplete_kind(self.tokens[open_idx].kind);
            if self.cursor.peek() == Some('/') {
                self.advance()?;
            }
            let info = TagInfo { prefix, name, closing_tag_name, self_closing: false };
            if peek == Some('<') {
                return Ok(info);
            }
            let text_start = self.cursor.clone();
            if matches!(peek, Some('\'') | Some('"')) {
                self.attempt_until_fn(|p| matches!(p, None | Some('>') | Some('<')))?;
                self.attempt_char('>')?;
            } else {
                self.attempt_until_fn(|p| matches!(p, None | Some('>')))?;
                self.attempt_char('>')?;
            }
            let text = self.process_carriage_returns(self.cursor.chars(&text_start));
            self.begin_token(TokenKind::Text, text_start);
            self.end_token(vec![text]);
            return Ok(info);
        }

        if self.attempt_char('/')? {
            let kind = if is_component {
                TokenKind::ComponentOpenEndVoid
            } else {
                TokenKind::TagOpenEndVoid
            };
            self.begin_token_here(kind);
            self.require_char('>')?;
            self.end_token(Vec::new());
            return Ok(TagInfo { prefix, name, closing_tag_name, self_closing: true });
        }

        if self.cursor.peek().is_none() {
            let at = self.cursor.clone();
            return Err(LexError::Cursor { msg: unexpected_char_msg(None), at });
        }

        let kind = if is_component { TokenKind::ComponentOpenEnd } else { TokenKind::TagOpenEnd };
        self.begin_token_here(kind);
        self.require_char('>')?;
        self.end_token(Vec::new());
        Ok(TagInfo { prefix, name, closing_tag_name, self_closing: false })
    }

    fn consume_component_name(&mut self) -> LexResult<'a, Vec<String>> {
        let name_start = self.cursor.clone();
        while self.cursor.peek().is_some_and(is_selectorless_name_char) {
            self.advance()?;
        }
        let name = self.cursor.chars(&name_start).to_string();
        let mut prefix = String::new();
        let mut tag_name = String::new();
        if self.cursor.peek() == Some(':') {
            self.advance()?;
            let mut parts = self.consume_prefix_and_name(is_name_end)?;
            tag_name = parts.pop().unwrap_or_default();
            prefix = parts.pop().unwrap_or_default();
        }
        Ok(vec![name, prefix, tag_name])
    }

    fn consume_prefix_and_name(
        &mut self,
        end_pred: impl FnMut(Option<char>) -> bool,
    ) -> LexResult<'a, Vec<String>> {
        let name_or_prefix_start = self.cursor.clone();
        let mut prefix = String::new();
        loop {
            match self.cursor.peek() {
                Some(':') => break,
                Some(c) if c.is_ascii_alphanumeric() => self.advance()?,
                _ => break,
            }
        }
        let name_start;
        if self.cursor.peek() == Some(':') {
            prefix = self.cursor.chars(&name_or_prefix_start).to_string();
            self.advance()?;
            name_start = self.cursor.clone();
        } else {
            name_start = name_or_prefix_start;
        }
        self.require_until_fn(end_pred, if prefix.is_empty() { 0 } else { 1 })?;
        let name = self.cursor.chars(&name_start).to_string();
        Ok(vec![prefix, name])
    }

    // --- attributes and directives ---

    fn consume_attributes_and_directives(&mut self) -> LexResult<'a> {
        while !is_attribute_terminator(self.cursor.peek()) {
            self.attempt_until_fn(is_not_whitespace)?;
            let peek = self.cursor.peek();
            if is_attribute_terminator(peek) {
                break;
            }
            if peek.is_some_and(is_quote) {
                break;
            }
            if peek == Some('=') {
                self.advance()?;
                self.attempt_until_fn(is_not_whitespace)?;
                self.consume_attribute_value()?;
            } else if peek == Some('@') && self.selectorless_enabled {
                self.consume_directive()?;
            } else {
                self.consume_attr()?;
            }
        }
        Ok(())
    }

    fn consume_attr(&mut self) -> LexResult<'a> {
        self.begin_token_here(TokenKind::AttrName);
        let parts = if self.open_directive_count > 0 {
            // Inside directive parentheses an unmatched `)` ends the name.
            let mut open_parens = 0usize;
            self.consume_prefix_and_name(move |p| match p {
                Some('(') => {
                    open_parens += 1;
                    false
                }
                Some(')') => {
                    if open_parens == 0 {
                        true
                    } else {
                        open_parens -= 1;
                        false
                    }
                }
                p => is_name_end(p),
            })?
        } else if self.cursor.peek() == Some('[') {
            // Bracketed names may contain anything until the brackets are
            // balanced, but a newline inside brackets aborts the name.
            let mut open_brackets = 0i32;
            self.consume_prefix_and_name(move |p| match p {
                Some('[') => {
                    open_brackets += 1;
                    false
                }
                Some(']') => {
                    open_brackets -= 1;
                    false
                }
                Some(c) if open_brackets > 0 => matches!(c, '\n' | '\r'),
                p => is_name_end(p),
            })?
        } else {
            self.consume_prefix_and_name(is_name_end)?
        };
        self.end_token(parts);
        if self.attempt_char('=')? {
            self.attempt_until_fn(is_not_whitespace)?;
            self.consume_attribute_value()?;
        }
        Ok(())
    }

    fn consume_attribute_value(&mut self) -> LexResult<'a> {
        match self.cursor.peek() {
            Some(q) if q == '\'' || q == '"' => {
                self.consume_quote(q)?;
                self.consume_with_interpolation(
                    TokenKind::AttrValueText,
                    TokenKind::AttrValueInterpolation,
                    TextEndMode::Quote(q),
                )?;
                if self.cursor.peek() != Some(q) {
                    if self.cursor.peek() == Some('>') {
                        self.advance()?;
                    }
                    let here = self.cursor.clone();
                    let span = here.span(&here, &self.leading_trivia);
                    return Err(LexError::Parse(Box::new(ParseError::new(
                        ErrorKind::UnexpectedCharacter,
                        unexpected_char_msg(None),
                        span,
                    ))));
                }
                self.consume_quote(q)?;
            }
            _ => {
                self.consume_with_interpolation(
                    TokenKind::AttrValueText,
                    TokenKind::AttrValueInterpolation,
                    TextEndMode::UnquotedAttr,
                )?;
            }
        }
        Ok(())
    }

    fn consume_quote(&mut self, q: char) -> LexResult<'a> {
        self.begin_token_here(TokenKind::AttrQuote);
        self.require_char(q)?;
        self.end_token(vec![q.to_string()]);
        Ok(())
    }

    fn consume_directive(&mut self) -> LexResult<'a> {
        let start = self.cursor.clone();
        self.require_char('@')?;
        let name_start = self.cursor.clone();
        self.attempt_until_fn(|p| !p.is_some_and(is_selectorless_name_char))?;
        let name = self.cursor.chars(&name_start).to_string();
        self.begin_token(TokenKind::DirectiveName, start);
        self.end_token(vec![name]);
        self.attempt_until_fn(is_not_whitespace)?;

        if self.cursor.peek() != Some('(') {
            return Ok(());
        }

        self.open_directive_count += 1;
        self.begin_token_here(TokenKind::DirectiveOpen);
        self.advance()?;
        self.end_token(Vec::new());
        self.attempt_until_fn(is_not_whitespace)?;

        while !is_attribute_terminator(self.cursor.peek()) && self.cursor.peek() != Some(')') {
            self.attempt_until_fn(is_not_whitespace)?;
            if is_attribute_terminator(self.cursor.peek()) || self.cursor.peek() == Some(')') {
                break;
            }
            if self.cursor.peek() == Some('@') {
                self.consume_directive()?;
            } else {
                self.consume_attr()?;
            }
        }

        self.attempt_until_fn(is_not_whitespace)?;
        self.open_directive_count -= 1;

        if self.cursor.peek() != Some(')') {
            if matches!(self.cursor.peek(), Some('>') | Some('/')) {
                return Ok(());
            }
            let at = self.cursor.clone();
            return Err(LexError::Cursor {
                msg: unexpected_char_msg(self.cursor.peek()),
                at,
            });
        }

        self.begin_token_here(TokenKind::DirectiveClose);
        self.advance()?;
        self.end_token(Vec::new());
        self.attempt_until_fn(is_not_whitespace)?;
        Ok(())
    }

    // --- @let declarations ---

    fn is_let_start(&self) -> bool {
        self.cursor.peek() == Some('@') && self.peek_str("@let")
    }

    fn consume_let_declaration(&mut self, start: CharCursor<'a>) -> LexResult<'a> {
        self.require_str("@let")?;
        self.begin_token(TokenKind::LetStart, start.clone());

        // Require at least one whitespace character after the `@let`.
        if self.cursor.peek().is_some_and(is_whitespace) {
            self.attempt_until_fn(is_not_whitespace)?;
        } else {
            let text = self.cursor.chars(&start).to_string();
            let idx = self.end_token(vec![text]);
            self.tokens[idx].kind = TokenKind::IncompleteLet;
            return Ok(());
        }

        let name = self.get_let_declaration_name()?;
        let start_idx = self.end_token(vec![name]);

        self.attempt_until_fn(is_not_whitespace)?;

        if !self.attempt_char('=')? {
            self.tokens[start_idx].kind = TokenKind::IncompleteLet;
            return Ok(());
        }

        // Skip whitespace (newlines included) before the value.
        self.attempt_until_fn(|p| is_not_whitespace(p) && !matches!(p, Some('\n') | Some('\r')))?;
        self.consume_let_declaration_value()?;

        if self.cursor.peek() == Some(';') {
            self.begin_token_here(TokenKind::LetEnd);
            self.end_token(Vec::new());
            self.advance()?;
        } else {
            self.tokens[start_idx].kind = TokenKind::IncompleteLet;
            self.tokens[start_idx].span = self.cursor.span(&start, &[]);
        }
        Ok(())
    }

    fn get_let_declaration_name(&mut self) -> LexResult<'a, String> {
        let name_start = self.cursor.clone();
        let mut allow_digit = false;
        self.attempt_until_fn(|p| match p {
            Some(c)
                if c.is_ascii_alphabetic()
                    || c == '$'
                    || c == '_'
                    || (allow_digit && c.is_ascii_digit()) =>
            {
                // Names cannot start with a digit, but digits are valid
                // anywhere else.
                allow_digit = true;
                false
            }
            _ => true,
        })?;
        Ok(self.cursor.chars(&name_start).trim().to_string())
    }

    fn consume_let_declaration_value(&mut self) -> LexResult<'a> {
        let start = self.cursor.clone();
        self.begin_token(TokenKind::LetValue, start.clone());
        while let Some(c) = self.cursor.peek() {
            if c == ';' {
                break;
            }
            // Skip over quoted content; a backslash escapes the next char.
            if is_quote(c) {
                self.advance()?;
                loop {
                    match self.cursor.peek() {
                        Some('\\') => {
                            self.advance()?;
                            self.advance()?;
                        }
                        Some(inner) if inner == c => break,
                        None => break,
                        Some(_) => self.advance()?,
                    }
                }
            }
            self.advance()?;
        }
        let value = self.cursor.chars(&start).to_string();
        self.end_token(vec![value]);
        Ok(())
    }

    // --- blocks ---

    fn is_block_start(&self) -> bool {
        if self.cursor.peek() != Some('@') {
            return false;
        }
        SUPPORTED_BLOCKS.iter().any(|name| self.peek_str(name))
    }

    fn consume_block_start(&mut self, start: CharCursor<'a>) -> LexResult<'a> {
        self.require_char('@')?;
        self.begin_token(TokenKind::BlockOpenStart, start);
        let name = self.get_block_name()?;
        let start_idx = self.end_token(vec![name]);

        if self.cursor.peek() == Some('(') {
            self.advance()?;
            self.consume_block_parameters()?;
            self.attempt_until_fn(is_not_whitespace)?;
            if self.attempt_char(')')? {
                self.attempt_until_fn(is_not_whitespace)?;
            } else {
                self.tokens[start_idx].kind = TokenKind::IncompleteBlockOpen;
                return Ok(());
            }
        }

        if self.attempt_char('{')? {
            self.begin_token_here(TokenKind::BlockOpenEnd);
            self.end_token(Vec::new());
        } else {
            self.tokens[start_idx].kind = TokenKind::IncompleteBlockOpen;
        }
        Ok(())
    }

    fn get_block_name(&mut self) -> LexResult<'a, String> {
        // Spaces are allowed in the name after the first valid character,
        // so that `@else if` lexes as a single block.
        let mut spaces_allowed = false;
        let name_start = self.cursor.clone();
        self.attempt_until_fn(|p| match p {
            Some(c) if is_whitespace(c) => !spaces_allowed,
            Some(c) if is_block_name_char(c) => {
                spaces_allowed = true;
                false
            }
            _ => true,
        })?;
        Ok(self.cursor.chars(&name_start).trim().to_string())
    }

    fn consume_block_parameters(&mut self) -> LexResult<'a> {
        // Trim the whitespace until the first parameter.
        self.attempt_until_fn(is_block_parameter_char)?;
        while !matches!(self.cursor.peek(), Some(')') | None) {
            self.begin_token_here(TokenKind::BlockParameter);
            let start = self.cursor.clone();
            let mut in_quote: Option<char> = None;
            let mut open_parens = 0usize;
            // Consume the parameter until the next semicolon or unmatched
            // closing paren, tracking quotes, escapes and nesting.
            loop {
                let c = self.cursor.peek();
                if in_quote.is_none() && matches!(c, Some(';') | None) {
                    break;
                }
                match c {
                    Some('\\') => self.advance()?,
                    Some(q) if Some(q) == in_quote => in_quote = None,
                    Some(q) if in_quote.is_none() && is_quote(q) => in_quote = Some(q),
                    Some('(') if in_quote.is_none() => open_parens += 1,
                    Some(')') if in_quote.is_none() => {
                        if open_parens == 0 {
                            break;
                        }
                        open_parens -= 1;
                    }
                    _ => {}
                }
                self.advance()?;
            }
            let text = self.cursor.chars(&start).to_string();
            self.end_token(vec![text]);
            if self.cursor.peek() == Some(';') {
                self.advance()?;
            }
            self.attempt_until_fn(is_block_parameter_char)?;
        }
        Ok(())
    }

    // --- ICU expansion forms ---

    fn tokenize_expansion_form(&mut self) -> LexResult<'a, bool> {
        if self.is_expansion_form_start() {
            self.consume_expansion_form_start()?;
            return Ok(true);
        }
        if self.is_expansion_case_start() {
            self.consume_expansion_case_start()?;
            return Ok(true);
        }
        if self.cursor.peek() == Some('}') {
            if self.is_in_expansion_case() {
                self.consume_expansion_case_end()?;
                return Ok(true);
            }
            if self.is_in_expansion_form() {
                self.consume_expansion_form_end()?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_expansion_form_start(&self) -> bool {
        if self.cursor.peek() != Some('{') {
            return false;
        }
        // `{{` is interpolation, not an expansion form.
        let mut probe = self.cursor.clone();
        if probe.advance().is_err() {
            return false;
        }
        probe.peek() != Some('{')
    }

    fn is_expansion_case_start(&self) -> bool {
        self.is_in_expansion_form()
            && self
                .cursor
                .peek()
                .is_some_and(|c| c == '=' || c.is_ascii_alphanumeric())
    }

    fn is_in_expansion_case(&self) -> bool {
        self.expansion_case_stack.last() == Some(&TokenKind::ExpansionCaseExpStart)
    }

    fn is_in_expansion_form(&self) -> bool {
        self.expansion_case_stack.last() == Some(&TokenKind::ExpansionFormStart)
    }

    fn consume_expansion_form_start(&mut self) -> LexResult<'a> {
        self.begin_token_here(TokenKind::ExpansionFormStart);
        self.require_char('{')?;
        self.end_token(Vec::new());
        self.expansion_case_stack.push(TokenKind::ExpansionFormStart);

        self.begin_token_here(TokenKind::RawText);
        let condition_start = self.cursor.clone();
        self.attempt_until_char(',')?;
        let condition = self.cursor.chars(&condition_start).to_string();
        let normalized = self.process_carriage_returns(&condition);
        if self.i18n_normalize_line_endings_in_icus {
            self.end_token(vec![normalized]);
        } else {
            let idx = self.end_token(vec![condition.clone()]);
            if normalized != condition {
                self.non_normalized_icu_expressions.push(self.tokens[idx].clone());
            }
        }
        self.require_char(',')?;
        self.attempt_until_fn(is_not_whitespace)?;

        self.begin_token_here(TokenKind::RawText);
        let type_start = self.cursor.clone();
        self.attempt_until_char(',')?;
        let form_type = self.cursor.chars(&type_start).to_string();
        self.end_token(vec![form_type]);
        self.require_char(',')?;
        self.attempt_until_fn(is_not_whitespace)?;
        Ok(())
    }

    fn consume_expansion_case_start(&mut self) -> LexResult<'a> {
        self.begin_token_here(TokenKind::ExpansionCaseValue);
        let start = self.cursor.clone();
        self.attempt_until_char('{')?;
        let value = self.cursor.chars(&start).trim().to_string();
        self.end_token(vec![value]);
        self.attempt_until_fn(is_not_whitespace)?;

        self.begin_token_here(TokenKind::ExpansionCaseExpStart);
        self.require_char('{')?;
        self.end_token(Vec::new());
        self.attempt_until_fn(is_not_whitespace)?;
        self.expansion_case_stack.push(TokenKind::ExpansionCaseExpStart);
        Ok(())
    }

    fn consume_expansion_case_end(&mut self) -> LexResult<'a> {
        self.begin_token_here(TokenKind::ExpansionCaseExpEnd);
        self.require_char('}')?;
        self.end_token(Vec::new());
        self.attempt_until_fn(is_not_whitespace)?;
        self.expansion_case_stack.pop();
        Ok(())
    }

    fn consume_expansion_form_end(&mut self) -> LexResult<'a> {
        self.begin_token_here(TokenKind::ExpansionFormEnd);
        self.require_char('}')?;
        self.end_token(Vec::new());
        self.expansion_case_stack.pop();
        Ok(())
    }
}

fn incomplete_kind(kind: TokenKind) -> TokenKind {
    if kind == TokenKind::ComponentOpenStart {
        TokenKind::IncompleteComponentOpen
    } else {
        TokenKind::IncompleteTagOpen
    }
}

// --- character predicates ---

fn is_whitespace(c: char) -> bool {
    matches!(c, '\t'..=' ') || c == '\u{a0}'
}

fn is_not_whitespace(c: Option<char>) -> bool {
    match c {
        Some(c) => !is_whitespace(c),
        None => true,
    }
}

fn is_name_end(c: Option<char>) -> bool {
    match c {
        Some(c) => is_whitespace(c) || matches!(c, '>' | '/' | '\'' | '"' | '=' | '<'),
        None => true,
    }
}

fn is_quote(c: char) -> bool {
    matches!(c, '\'' | '"' | '`')
}

fn is_attribute_terminator(c: Option<char>) -> bool {
    matches!(c, Some('>') | Some('/') | Some('<') | None)
}

fn is_digit_entity_end(c: Option<char>) -> bool {
    match c {
        Some(c) => !c.is_ascii_hexdigit(),
        None => true,
    }
}

fn is_named_entity_end(c: Option<char>) -> bool {
    match c {
        Some(c) => !c.is_ascii_alphanumeric(),
        None => true,
    }
}

fn is_block_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_block_parameter_char(c: Option<char>) -> bool {
    match c {
        Some(c) => c != ';' && !is_whitespace(c),
        None => true,
    }
}

fn is_selectorless_name_start(c: char) -> bool {
    c == '_' || c.is_ascii_uppercase()
}

fn is_selectorless_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::html_tag_definition;
    use crate::TokenizeOptions;

    fn lex_with(source: &str, options: &TokenizeOptions) -> TokenizeResult {
        Tokenizer::new(source, html_tag_definition, options).tokenize()
    }

    fn lex(source: &str) -> TokenizeResult {
        lex_with(source, &TokenizeOptions::default())
    }

    fn lex_icu(source: &str) -> TokenizeResult {
        let options = TokenizeOptions {
            tokenize_expansion_forms: true,
            ..TokenizeOptions::default()
        };
        lex_with(source, &options)
    }

    fn kinds(result: &TokenizeResult) -> Vec<TokenKind> {
        result.tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn eof_token_at_end_of_source() {
        for source in ["", "hello", "<p>x</p>"] {
            let result = lex(source);
            let last = result.tokens.last().unwrap();
            assert_eq!(last.kind, TokenKind::Eof);
            assert_eq!(last.span.start.offset, source.len());
        }
    }

    #[test]
    fn simple_element_token_stream() {
        let result = lex("<p>a</p>");
        assert_eq!(
            kinds(&result),
            vec![
                TokenKind::TagOpenStart,
                TokenKind::TagOpenEnd,
                TokenKind::Text,
                TokenKind::TagClose,
                TokenKind::Eof,
            ]
        );
        assert_eq!(result.tokens[0].parts, vec!["", "p"]);
        assert_eq!(result.tokens[2].parts, vec!["a"]);
        assert_eq!(result.tokens[3].parts, vec!["", "p"]);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn self_closing_tag() {
        let result = lex("<br/>");
        assert_eq!(
            kinds(&result),
            vec![TokenKind::TagOpenStart, TokenKind::TagOpenEndVoid, TokenKind::Eof]
        );
    }

    #[test]
    fn attribute_with_quoted_value() {
        let result = lex("<a href=\"x\">");
        assert_eq!(
            kinds(&result),
            vec![
                TokenKind::TagOpenStart,
                TokenKind::AttrName,
                TokenKind::AttrQuote,
                TokenKind::AttrValueText,
                TokenKind::AttrQuote,
                TokenKind::TagOpenEnd,
                TokenKind::Eof,
            ]
        );
        assert_eq!(result.tokens[1].parts, vec!["", "href"]);
        assert_eq!(result.tokens[3].parts, vec!["x"]);
    }

    #[test]
    fn interpolation_parts() {
        let result = lex("a{{ b }}c");
        assert_eq!(
            kinds(&result),
            vec![
                TokenKind::Text,
                TokenKind::Interpolation,
                TokenKind::Text,
                TokenKind::Eof,
            ]
        );
        assert_eq!(result.tokens[0].parts, vec!["a"]);
        assert_eq!(result.tokens[1].parts, vec!["{{", " b ", "}}"]);
        assert_eq!(result.tokens[2].parts, vec!["c"]);
    }

    #[test]
    fn interpolation_ignores_close_marker_in_quotes() {
        let result = lex("{{ '}}' + x }}");
        // An empty leading text token precedes the interpolation.
        assert_eq!(result.tokens[0].kind, TokenKind::Text);
        assert_eq!(result.tokens[0].parts, vec![""]);
        assert_eq!(result.tokens[1].kind, TokenKind::Interpolation);
        assert_eq!(result.tokens[1].parts, vec!["{{", " '}}' + x ", "}}"]);
    }

    #[test]
    fn decodes_named_and_numeric_entities() {
        let result = lex("&amp;&#x1F6C8;&#65;");
        let entities: Vec<_> = result
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::EncodedEntity)
            .collect();
        assert_eq!(entities.len(), 3);
        assert_eq!(entities[0].parts, vec!["&", "&amp;"]);
        assert_eq!(entities[1].parts, vec!["\u{1F6C8}", "&#x1F6C8;"]);
        assert_eq!(entities[2].parts, vec!["A", "&#65;"]);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn named_entity_without_semicolon_stays_text() {
        let result = lex("&foo bar");
        assert!(result.errors.is_empty());
        assert!(result.tokens.iter().all(|t| t.kind != TokenKind::EncodedEntity));
        let text: String = result
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Text)
            .flat_map(|t| t.parts.iter().map(String::as_str))
            .collect();
        assert_eq!(text, "&foo bar");
    }

    #[test]
    fn numeric_entity_without_semicolon_errors() {
        let result = lex("&#48x");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(
            result.errors[0].message,
            "Unable to parse entity \"&#48x\" - decimal character reference entities must end with \";\""
        );
    }

    #[test]
    fn unknown_entity_errors() {
        let result = lex("&tbo;");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(
            result.errors[0].message,
            "Unknown entity \"tbo\" - use the \"&#<decimal>;\" or  \"&#x<hex>;\" syntax"
        );
    }

    #[test]
    fn comment_tokens() {
        let result = lex("<!-- hi -->");
        assert_eq!(
            kinds(&result),
            vec![
                TokenKind::CommentStart,
                TokenKind::RawText,
                TokenKind::CommentEnd,
                TokenKind::Eof,
            ]
        );
        assert_eq!(result.tokens[1].parts, vec![" hi "]);
    }

    #[test]
    fn cdata_tokens() {
        let result = lex("<![CDATA[a<b]]>");
        assert_eq!(
            kinds(&result),
            vec![
                TokenKind::CdataStart,
                TokenKind::RawText,
                TokenKind::CdataEnd,
                TokenKind::Eof,
            ]
        );
        assert_eq!(result.tokens[1].parts, vec!["a<b"]);
    }

    #[test]
    fn doctype_token() {
        let result = lex("<!DOCTYPE html>");
        assert_eq!(result.tokens[0].kind, TokenKind::DocType);
        assert_eq!(result.tokens[0].parts, vec!["DOCTYPE html"]);
    }

    #[test]
    fn script_content_is_raw_text() {
        let result = lex("<script>if (a < b) {}</script>");
        assert_eq!(
            kinds(&result),
            vec![
                TokenKind::TagOpenStart,
                TokenKind::TagOpenEnd,
                TokenKind::RawText,
                TokenKind::TagClose,
                TokenKind::Eof,
            ]
        );
        assert_eq!(result.tokens[2].parts, vec!["if (a < b) {}"]);
    }

    #[test]
    fn title_content_decodes_entities() {
        let result = lex("<title>a&amp;b</title>");
        let entity = result
            .tokens
            .iter()
            .find(|t| t.kind == TokenKind::EncodedEntity)
            .unwrap();
        assert_eq!(entity.parts, vec!["&", "&amp;"]);
        assert!(result
            .tokens
            .iter()
            .any(|t| t.kind == TokenKind::EscapableRawText));
    }

    #[test]
    fn unterminated_tag_becomes_incomplete() {
        let result = lex("<div");
        assert_eq!(
            kinds(&result),
            vec![TokenKind::IncompleteTagOpen, TokenKind::Eof]
        );
        assert!(result.errors.is_empty());
    }

    #[test]
    fn block_token_stream() {
        let result = lex("@if (x) {hi}");
        assert_eq!(
            kinds(&result),
            vec![
                TokenKind::BlockOpenStart,
                TokenKind::BlockParameter,
                TokenKind::BlockOpenEnd,
                TokenKind::Text,
                TokenKind::BlockClose,
                TokenKind::Eof,
            ]
        );
        assert_eq!(result.tokens[0].parts, vec!["if"]);
        assert_eq!(result.tokens[1].parts, vec!["x"]);
        assert_eq!(result.tokens[3].parts, vec!["hi"]);
    }

    #[test]
    fn else_if_is_one_block_name() {
        let result = lex("@else if (b) {y}");
        assert_eq!(result.tokens[0].kind, TokenKind::BlockOpenStart);
        assert_eq!(result.tokens[0].parts, vec!["else if"]);
    }

    #[test]
    fn block_parameters_split_on_top_level_semicolons() {
        let result = lex("@for (item of items; track item.id) {x}");
        let params: Vec<_> = result
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::BlockParameter)
            .collect();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].parts, vec!["item of items"]);
        assert_eq!(params[1].parts, vec!["track item.id"]);
    }

    #[test]
    fn block_without_brace_is_incomplete() {
        let result = lex("@defer (on idle)");
        assert_eq!(result.tokens[0].kind, TokenKind::IncompleteBlockOpen);
    }

    #[test]
    fn unknown_at_name_stays_text() {
        let result = lex("@media print");
        assert_eq!(result.tokens[0].kind, TokenKind::Text);
        assert_eq!(result.tokens[0].parts, vec!["@media print"]);
    }

    #[test]
    fn let_declaration_tokens() {
        let result = lex("@let x = 1 + 2;");
        assert_eq!(
            kinds(&result),
            vec![
                TokenKind::LetStart,
                TokenKind::LetValue,
                TokenKind::LetEnd,
                TokenKind::Eof,
            ]
        );
        assert_eq!(result.tokens[0].parts, vec!["x"]);
        assert_eq!(result.tokens[1].parts, vec!["1 + 2"]);
    }

    #[test]
    fn let_without_value_is_incomplete() {
        let result = lex("@let foo");
        assert_eq!(result.tokens[0].kind, TokenKind::IncompleteLet);
        assert_eq!(result.tokens[0].parts, vec!["foo"]);
    }

    #[test]
    fn let_without_semicolon_is_incomplete() {
        let result = lex("@let a = b");
        assert_eq!(result.tokens[0].kind, TokenKind::IncompleteLet);
        assert!(result.tokens.iter().any(|t| t.kind == TokenKind::LetValue));
    }

    #[test]
    fn expansion_form_token_stream() {
        let result = lex_icu("{count, plural, =0 {none} other {some}}");
        assert_eq!(
            kinds(&result),
            vec![
                TokenKind::ExpansionFormStart,
                TokenKind::RawText,
                TokenKind::RawText,
                TokenKind::ExpansionCaseValue,
                TokenKind::ExpansionCaseExpStart,
                TokenKind::Text,
                TokenKind::ExpansionCaseExpEnd,
                TokenKind::ExpansionCaseValue,
                TokenKind::ExpansionCaseExpStart,
                TokenKind::Text,
                TokenKind::ExpansionCaseExpEnd,
                TokenKind::ExpansionFormEnd,
                TokenKind::Eof,
            ]
        );
        assert_eq!(result.tokens[1].parts, vec!["count"]);
        assert_eq!(result.tokens[2].parts, vec!["plural"]);
        assert_eq!(result.tokens[3].parts, vec!["=0"]);
        assert_eq!(result.tokens[5].parts, vec!["none"]);
        assert_eq!(result.tokens[7].parts, vec!["other"]);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn non_normalized_icu_condition_is_collected() {
        let result = lex_icu("{a\r\nb, plural, =0 {x}}");
        assert_eq!(result.non_normalized_icu_expressions.len(), 1);
        assert_eq!(result.non_normalized_icu_expressions[0].parts, vec!["a\r\nb"]);
    }

    #[test]
    fn selectorless_component_tokens() {
        let options = TokenizeOptions {
            selectorless_enabled: true,
            ..TokenizeOptions::default()
        };
        let result = lex_with("<MyComp:button>x</MyComp:button>", &options);
        assert_eq!(
            kinds(&result),
            vec![
                TokenKind::ComponentOpenStart,
                TokenKind::ComponentOpenEnd,
                TokenKind::Text,
                TokenKind::ComponentClose,
                TokenKind::Eof,
            ]
        );
        assert_eq!(result.tokens[0].parts, vec!["MyComp", "", "button"]);
        assert_eq!(result.tokens[3].parts, vec!["MyComp", "", "button"]);
    }

    #[test]
    fn directive_tokens() {
        let options = TokenizeOptions {
            selectorless_enabled: true,
            ..TokenizeOptions::default()
        };
        let result = lex_with("<div @Tooltip(text=\"hi\")></div>", &options);
        assert_eq!(
            kinds(&result),
            vec![
                TokenKind::TagOpenStart,
                TokenKind::DirectiveName,
                TokenKind::DirectiveOpen,
                TokenKind::AttrName,
                TokenKind::AttrQuote,
                TokenKind::AttrValueText,
                TokenKind::AttrQuote,
                TokenKind::DirectiveClose,
                TokenKind::TagOpenEnd,
                TokenKind::TagClose,
                TokenKind::Eof,
            ]
        );
        assert_eq!(result.tokens[1].parts, vec!["Tooltip"]);
    }

    #[test]
    fn leading_trivia_tightens_span_start() {
        let options = TokenizeOptions {
            leading_trivia_chars: vec![' ', '\n'],
            ..TokenizeOptions::default()
        };
        let result = lex_with("  x", &options);
        let text = &result.tokens[0];
        assert_eq!(text.kind, TokenKind::Text);
        assert_eq!(text.span.full_start.offset, 0);
        assert_eq!(text.span.start.offset, 2);
    }

    #[test]
    fn sub_range_tokenization() {
        let source = "ab<p>c</p>de";
        let options = TokenizeOptions {
            range: Some(crate::LexerRange {
                start_pos: 2,
                start_line: 0,
                start_col: 2,
                end_pos: 10,
            }),
            ..TokenizeOptions::default()
        };
        let result = lex_with(source, &options);
        assert_eq!(
            kinds(&result),
            vec![
                TokenKind::TagOpenStart,
                TokenKind::TagOpenEnd,
                TokenKind::Text,
                TokenKind::TagClose,
                TokenKind::Eof,
            ]
        );
        assert_eq!(result.tokens[0].span.start.offset, 2);
        assert_eq!(result.tokens.last().unwrap().span.start.offset, 10);
    }

    #[test]
    fn carriage_returns_are_normalized_in_text() {
        let result = lex("a\r\nb");
        assert_eq!(result.tokens[0].parts, vec!["a\nb"]);
    }

    #[test]
    fn carriage_returns_preserved_on_request() {
        let options = TokenizeOptions {
            preserve_line_endings: true,
            ..TokenizeOptions::default()
        };
        let result = lex_with("a\r\nb", &options);
        assert_eq!(result.tokens[0].parts, vec!["a\r\nb"]);
    }

    #[test]
    fn carriage_returns_preserved_in_raw_text() {
        let options = TokenizeOptions {
            preserve_line_endings: true,
            ..TokenizeOptions::default()
        };
        let result = lex_with("<script>a\r\nb</script>", &options);
        let raw = result.tokens.iter().find(|t| t.kind == TokenKind::RawText);
        assert_eq!(raw.map(|t| t.parts.clone()), Some(vec!["a\r\nb".to_string()]));
    }
}
