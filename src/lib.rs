//! Component template parser.
//!
//! Parses HTML-like component templates into a fully spanned AST:
//! elements, `{{ interpolation }}`, ICU expansion forms, `@if`/`@for`/
//! `@defer` control blocks, `@let` declarations, selectorless components
//! and directives. Parsing never fails outright; malformed input yields a
//! best-effort tree plus a list of errors.
//!
//! ```
//! let result = templar::parse("<p>Hello {{ name }}!</p>", "greeting.html", &Default::default());
//! assert!(result.errors.is_empty());
//! assert_eq!(result.root_nodes.len(), 1);
//! ```

pub mod ast;
pub mod entities;
pub mod error;
pub mod parser;
pub mod tags;

pub use ast::{
    Attribute, Block, BlockParameter, Comment, Component, Directive, Element, Expansion,
    ExpansionCase, LetDeclaration, Node, Position, Span, Text, Token,
};
pub use error::{ErrorKind, ParseError};
pub use parser::tokenizer::{TokenKind, TokenizeResult, Tokenizer};
pub use parser::tree_builder::TreeBuilder;
pub use tags::{html_tag_definition, xml_tag_definition, TagDefinition, TagDefinitionResolver};

/// Restricts tokenization to a sub-range of the source. Positions are
/// absolute, so spans of the produced tokens line up with the full file.
#[derive(Debug, Clone)]
pub struct LexerRange {
    pub start_pos: usize,
    pub start_line: usize,
    pub start_col: usize,
    pub end_pos: usize,
}

/// Options controlling tokenization and parsing.
#[derive(Debug, Clone)]
pub struct TokenizeOptions {
    /// Recognize ICU expansion forms (`{count, plural, ...}`).
    pub tokenize_expansion_forms: bool,
    /// Recognize `@if`/`@for`/... control blocks.
    pub tokenize_blocks: bool,
    /// Recognize `@let` declarations.
    pub tokenize_let: bool,
    /// Recognize `<ComponentName>` tags and `@Directive` applications.
    pub selectorless_enabled: bool,
    /// Treat the source as a backslash-escaped string and decode escape
    /// sequences while tokenizing.
    pub escaped_string: bool,
    /// Keep `\r\n` sequences in text instead of normalizing them to `\n`.
    pub preserve_line_endings: bool,
    /// Normalize line endings inside ICU expansion conditions. When off,
    /// affected condition tokens are collected in
    /// [`TokenizeResult::non_normalized_icu_expressions`].
    pub i18n_normalize_line_endings_in_icus: bool,
    /// Characters to exclude from the start of token spans (the span's
    /// `full_start` still covers them).
    pub leading_trivia_chars: Vec<char>,
    /// Tokenize only this range of the source.
    pub range: Option<LexerRange>,
}

impl Default for TokenizeOptions {
    fn default() -> Self {
        Self {
            tokenize_expansion_forms: false,
            tokenize_blocks: true,
            tokenize_let: true,
            selectorless_enabled: false,
            escaped_string: false,
            preserve_line_endings: false,
            i18n_normalize_line_endings_in_icus: false,
            leading_trivia_chars: Vec::new(),
            range: None,
        }
    }
}

/// Parsing takes the same options as tokenization.
pub type ParseOptions = TokenizeOptions;

/// The parsed template: root nodes plus every error encountered along the
/// way, tokenizer and tree builder combined.
#[derive(Debug)]
pub struct ParseResult {
    pub root_nodes: Vec<Node>,
    pub errors: Vec<ParseError>,
}

/// Parses a template using the HTML tag definitions.
///
/// `url` only identifies the source in rendered diagnostics.
pub fn parse(source: &str, url: &str, options: &ParseOptions) -> ParseResult {
    parse_with(source, url, html_tag_definition, options)
}

/// Parses a template with a caller-provided tag definition resolver,
/// e.g. [`xml_tag_definition`] for XML content.
pub fn parse_with(
    source: &str,
    url: &str,
    get_tag_definition: TagDefinitionResolver,
    options: &ParseOptions,
) -> ParseResult {
    let lexed = tokenize(source, url, get_tag_definition, options);
    let mut errors = lexed.errors;
    let (root_nodes, tree_errors) =
        TreeBuilder::new(lexed.tokens, source, get_tag_definition).build();
    errors.extend(tree_errors);
    ParseResult { root_nodes, errors }
}

/// Tokenizes a template without building a tree.
pub fn tokenize(
    source: &str,
    _url: &str,
    get_tag_definition: TagDefinitionResolver,
    options: &TokenizeOptions,
) -> TokenizeResult {
    Tokenizer::new(source, get_tag_definition, options).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_returns_nodes_and_no_errors_for_valid_input() {
        let result = parse("<ul><li>a</li><li>b</li></ul>", "list.html", &Default::default());
        assert!(result.errors.is_empty(), "unexpected errors: {:?}", result.errors);
        assert_eq!(result.root_nodes.len(), 1);
    }

    #[test]
    fn parse_collects_tokenizer_and_tree_errors() {
        let result = parse("<div>&unknown;</div><span></div>", "bad.html", &Default::default());
        assert!(result.errors.len() >= 2, "expected both error sources: {:?}", result.errors);
    }

    #[test]
    fn parse_never_panics_on_garbage() {
        for source in ["<", "</", "<!", "{{", "@", "@if", "<a b=", "{x, plural"] {
            let _ = parse(source, "garbage.html", &Default::default());
        }
    }

    #[test]
    fn xml_resolver_allows_self_closing_tags() {
        let result = parse_with(
            "<item/>",
            "feed.xml",
            xml_tag_definition,
            &Default::default(),
        );
        assert!(result.errors.is_empty(), "unexpected errors: {:?}", result.errors);
    }
}
