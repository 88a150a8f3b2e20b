//! Builds the AST from the token stream.
//!
//! The builder walks the flat token stream once, keeping a stack of open
//! containers (elements, components and blocks). Containers are held by
//! value on the stack and folded into their parent when closed, so the
//! tree is assembled bottom-up. Malformed input produces errors and a
//! best-effort tree, never a failure.

use crate::ast::{
    Attribute, Block, BlockParameter, Comment, Component, Directive, Element, Expansion,
    ExpansionCase, LetDeclaration, Node, Text,
};
use crate::error::{ErrorKind, ParseError};
use crate::parser::tokenizer::{Position, Span, Token, TokenKind};
use crate::tags::{get_ns_prefix, merge_ns_and_name, split_ns_name, TagDefinitionResolver};

/// An element-like node that is still open. Children accumulate inside it
/// until the matching close token (or an implicit close) folds it into its
/// parent.
enum Container {
    Element(Element),
    Component(Component),
    Block(Block),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Element,
    Component,
    Block,
}

impl Container {
    fn kind(&self) -> ContainerKind {
        match self {
            Container::Element(_) => ContainerKind::Element,
            Container::Component(_) => ContainerKind::Component,
            Container::Block(_) => ContainerKind::Block,
        }
    }

    /// The name a close token is matched against.
    fn node_name(&self) -> &str {
        match self {
            Container::Element(el) => &el.name,
            Container::Component(c) => &c.full_name,
            Container::Block(b) => &b.name,
        }
    }

    fn children_mut(&mut self) -> &mut Vec<Node> {
        match self {
            Container::Element(el) => &mut el.children,
            Container::Component(c) => &mut c.children,
            Container::Block(b) => &mut b.children,
        }
    }

    fn set_end_span(&mut self, end_span: Option<Span>) {
        let (source_span, end_source_span) = match self {
            Container::Element(el) => (&mut el.source_span, &mut el.end_source_span),
            Container::Component(c) => (&mut c.source_span, &mut c.end_source_span),
            Container::Block(b) => (&mut b.source_span, &mut b.end_source_span),
        };
        *end_source_span = end_span;
        if let Some(span) = end_span {
            source_span.end = span.end;
        }
    }

    fn into_node(self) -> Node {
        match self {
            Container::Element(el) => Node::Element(el),
            Container::Component(c) => Node::Component(c),
            Container::Block(b) => Node::Block(b),
        }
    }
}

pub struct TreeBuilder<'a> {
    tokens: Vec<Token>,
    index: usize,
    container_stack: Vec<Container>,
    root_nodes: Vec<Node>,
    errors: Vec<ParseError>,
    source: &'a str,
    get_tag_definition: TagDefinitionResolver,
    /// Set when parsing the body of an ICU expansion case. Stray block
    /// close tokens then belong to the enclosing case and are skipped.
    in_expansion_context: bool,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(
        tokens: Vec<Token>,
        source: &'a str,
        get_tag_definition: TagDefinitionResolver,
    ) -> Self {
        Self {
            tokens,
            index: 0,
            container_stack: Vec::new(),
            root_nodes: Vec::new(),
            errors: Vec::new(),
            source,
            get_tag_definition,
            in_expansion_context: false,
        }
    }

    /// Consumes the token stream and returns the root nodes along with any
    /// errors encountered while building the tree.
    pub fn build(mut self) -> (Vec<Node>, Vec<ParseError>) {
        if self.tokens.is_empty() {
            return (self.root_nodes, self.errors);
        }

        while self.peek().kind != TokenKind::Eof {
            let token = self.advance();
            match token.kind {
                TokenKind::TagOpenStart => self.consume_start_tag(token),
                TokenKind::IncompleteTagOpen => self.consume_incomplete_start_tag(token),
                TokenKind::TagClose => self.consume_end_tag(token),
                TokenKind::CdataStart => {
                    self.close_void_element();
                    self.consume_cdata();
                }
                TokenKind::CommentStart => {
                    self.close_void_element();
                    self.consume_comment(token);
                }
                TokenKind::Text
                | TokenKind::RawText
                | TokenKind::EscapableRawText
                | TokenKind::Interpolation
                | TokenKind::EncodedEntity => {
                    self.close_void_element();
                    self.consume_text(token);
                }
                TokenKind::DocType => {
                    self.close_void_element();
                    self.consume_doc_type(token);
                }
                TokenKind::ExpansionFormStart => {
                    self.close_void_element();
                    self.consume_expansion(token);
                }
                TokenKind::BlockClose => {
                    self.close_void_element();
                    // Inside an expansion case the brace closes the case,
                    // which the enclosing parser deals with.
                    if !self.in_expansion_context {
                        self.consume_block_close(token);
                    }
                }
                TokenKind::BlockOpenStart => {
                    self.close_void_element();
                    self.consume_block_open(token);
                }
                TokenKind::IncompleteBlockOpen => {
                    self.close_void_element();
                    self.consume_incomplete_block(token);
                }
                TokenKind::LetStart => {
                    self.close_void_element();
                    self.consume_let(token);
                }
                TokenKind::IncompleteLet => {
                    self.close_void_element();
                    self.consume_incomplete_let(token);
                }
                TokenKind::ComponentOpenStart | TokenKind::IncompleteComponentOpen => {
                    self.close_void_element();
                    self.consume_component_start_tag(token);
                }
                TokenKind::ComponentClose => self.consume_component_end_tag(token),
                _ => {}
            }
        }

        let unclosed_blocks: Vec<(String, Span)> = self
            .container_stack
            .iter()
            .filter_map(|container| match container {
                Container::Block(block) => Some((block.name.clone(), block.start_source_span)),
                _ => None,
            })
            .collect();
        for (name, span) in unclosed_blocks {
            self.errors.push(
                ParseError::new(ErrorKind::InvalidBlock, format!("Unclosed block \"{name}\""), span)
                    .with_name(name),
            );
        }

        while let Some(container) = self.container_stack.pop() {
            self.fold_container(container);
        }

        (self.root_nodes, self.errors)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.index]
    }

    /// Returns the current token and moves forward. Never moves past the
    /// final token, so `peek` keeps returning EOF at the end.
    fn advance(&mut self) -> Token {
        let token = self.tokens[self.index].clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn advance_if(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek().kind == kind {
            Some(self.advance())
        } else {
            None
        }
    }

    fn add_to_parent(&mut self, node: Node) {
        match self.container_stack.last_mut() {
            Some(parent) => parent.children_mut().push(node),
            None => self.root_nodes.push(node),
        }
    }

    /// Attaches a closed container to its parent.
    fn fold_container(&mut self, container: Container) {
        let node = container.into_node();
        self.add_to_parent(node);
    }

    fn push_container(&mut self, container: Container, is_closed_by_child: bool) {
        if is_closed_by_child {
            if let Some(top) = self.container_stack.pop() {
                self.fold_container(top);
            }
        }
        self.container_stack.push(container);
    }

    /// Finds the closest open container matching the name and kind, closes
    /// it (and everything opened inside it, implicitly), and records the
    /// end span. Returns false when no match exists; the stack is left
    /// untouched in that case. The return value is also false when a
    /// container that may not be closed by its parent had to be closed
    /// implicitly on the way down.
    fn pop_container(
        &mut self,
        expected_name: Option<&str>,
        expected_kind: ContainerKind,
        end_span: Option<Span>,
    ) -> bool {
        let mut unexpected_close_detected = false;
        for index in (0..self.container_stack.len()).rev() {
            let container = &self.container_stack[index];
            let name_matches = expected_name.is_none_or(|name| container.node_name() == name);
            if name_matches && container.kind() == expected_kind {
                while self.container_stack.len() > index + 1 {
                    if let Some(inner) = self.container_stack.pop() {
                        self.fold_container(inner);
                    }
                }
                if let Some(mut matched) = self.container_stack.pop() {
                    matched.set_end_span(end_span);
                    self.fold_container(matched);
                }
                return !unexpected_close_detected;
            }

            match container {
                Container::Block(_) => unexpected_close_detected = true,
                Container::Element(el) => {
                    if !(self.get_tag_definition)(&el.name).closed_by_parent {
                        unexpected_close_detected = true;
                    }
                }
                Container::Component(c) => match &c.tag_name {
                    Some(tag) if (self.get_tag_definition)(tag).closed_by_parent => {}
                    _ => unexpected_close_detected = true,
                },
            }
        }
        false
    }

    /// Pops the top container if it is a void element. Void elements never
    /// receive children, so any content token closes them.
    fn close_void_element(&mut self) {
        let is_void = match self.container_stack.last() {
            Some(Container::Element(el)) => (self.get_tag_definition)(&el.name).is_void,
            _ => false,
        };
        if is_void {
            if let Some(container) = self.container_stack.pop() {
                self.fold_container(container);
            }
        }
    }

    fn consume_start_tag(&mut self, start: Token) {
        let (attributes, directives) = self.consume_attributes_and_directives();
        let full_name = self.get_element_full_name(&start);
        let tag_def = (self.get_tag_definition)(&full_name);

        let mut is_self_closing = false;
        if self.peek().kind == TokenKind::TagOpenEndVoid {
            self.advance();
            is_self_closing = true;
            if !(tag_def.can_self_close || get_ns_prefix(&full_name).is_some() || tag_def.is_void) {
                let name = start.parts.get(1).cloned().unwrap_or_default();
                self.errors.push(
                    ParseError::new(
                        ErrorKind::InvalidTag,
                        format!("Only void, custom and foreign elements can be self closed \"{name}\""),
                        start.span,
                    )
                    .with_name(full_name.clone()),
                );
            }
        } else if self.peek().kind == TokenKind::TagOpenEnd {
            self.advance();
        }

        let end = self.peek().span.full_start;
        let span = Span {
            start: start.span.start,
            end,
            full_start: start.span.full_start,
        };
        let element = Element {
            name: full_name.clone(),
            attributes,
            directives,
            children: Vec::new(),
            is_self_closing,
            is_void: tag_def.is_void,
            source_span: span,
            start_source_span: span,
            end_source_span: None,
        };

        let is_closed_by_child = self.parent_closes_child(&full_name);
        self.push_container(Container::Element(element), is_closed_by_child);

        if is_self_closing {
            // The open tag doubles as the end tag.
            self.pop_container(Some(&full_name), ContainerKind::Element, Some(span));
        }
    }

    /// An open tag the tokenizer could not finish (`<div foo` at EOF or
    /// before the next `<`). The salvaged element is attached directly
    /// without going on the stack since it cannot have children.
    fn consume_incomplete_start_tag(&mut self, start: Token) {
        let mut attributes = Vec::new();
        while self.peek().kind == TokenKind::AttrName {
            let name_token = self.advance();
            let prefix = name_token.parts.first().cloned().unwrap_or_default();
            let local = name_token.parts.get(1).cloned().unwrap_or_default();

            let mut value = String::new();
            let mut value_span = None;
            if self.peek().kind == TokenKind::AttrValueText {
                let value_token = self.advance();
                value = value_token.parts.first().cloned().unwrap_or_default();
                value_span = Some(value_token.span);
            }

            let attr_name = if prefix.is_empty() {
                local
            } else {
                format!("{prefix}:{local}")
            };
            let attr_end = value_span.map(|s: Span| s.end).unwrap_or(name_token.span.end);
            attributes.push(Attribute {
                name: attr_name,
                value,
                source_span: Span {
                    start: name_token.span.start,
                    end: attr_end,
                    full_start: name_token.span.start,
                },
                key_span: name_token.span,
                value_span,
                value_tokens: Vec::new(),
            });
        }

        let prefix = start.parts.first().cloned().unwrap_or_default();
        let name = start.parts.get(1).cloned().unwrap_or_default();
        let full_name = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}:{name}")
        };

        let span = start.span;
        self.add_to_parent(Node::Element(Element {
            name: full_name.clone(),
            attributes,
            directives: Vec::new(),
            children: Vec::new(),
            is_self_closing: false,
            is_void: false,
            source_span: span,
            start_source_span: span,
            end_source_span: None,
        }));
        self.errors.push(
            ParseError::new(
                ErrorKind::InvalidTag,
                format!("Opening tag \"{full_name}\" not terminated."),
                span,
            )
            .with_name(full_name),
        );
    }

    fn consume_end_tag(&mut self, end_tag: Token) {
        let full_name = self.get_element_full_name(&end_tag);

        if (self.get_tag_definition)(&full_name).is_void {
            let name = end_tag.parts.get(1).cloned().unwrap_or_default();
            self.errors.push(
                ParseError::new(
                    ErrorKind::InvalidTag,
                    format!("Void elements do not have end tags \"{name}\""),
                    end_tag.span,
                )
                .with_name(full_name),
            );
            return;
        }

        if !self.pop_container(Some(&full_name), ContainerKind::Element, Some(end_tag.span)) {
            self.errors.push(
                ParseError::new(
                    ErrorKind::InvalidTag,
                    format!(
                        "Unexpected closing tag \"{full_name}\". It may happen when the tag has already been closed by another tag. For more info see https://www.w3.org/TR/html5/syntax.html#closing-elements-that-have-implied-end-tags"
                    ),
                    end_tag.span,
                )
                .with_name(full_name),
            );
        }
    }

    fn consume_attributes_and_directives(&mut self) -> (Vec<Attribute>, Vec<Directive>) {
        let mut attributes = Vec::new();
        let mut directives = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::AttrName => {
                    let name_token = self.advance();
                    attributes.push(self.consume_attr(name_token));
                }
                TokenKind::DirectiveName => directives.push(self.consume_directive()),
                _ => break,
            }
        }
        (attributes, directives)
    }

    fn consume_attr(&mut self, name_token: Token) -> Attribute {
        let prefix = name_token.parts.first().cloned().unwrap_or_default();
        let local = name_token.parts.get(1).cloned().unwrap_or_default();
        let full_name = merge_ns_and_name(&prefix, &local);

        let mut attr_end = name_token.span.end;
        self.advance_if(TokenKind::AttrQuote);

        let mut value = String::new();
        let mut value_tokens = Vec::new();
        let mut value_start_span: Option<Span> = None;
        let mut value_end = name_token.span.end;
        if self.peek().kind == TokenKind::AttrValueText {
            value_start_span = Some(self.peek().span);
            loop {
                match self.peek().kind {
                    TokenKind::AttrValueText
                    | TokenKind::AttrValueInterpolation
                    | TokenKind::EncodedEntity => {
                        let token = self.advance();
                        if token.kind == TokenKind::EncodedEntity {
                            if let Some(decoded) = token.parts.first() {
                                value.push_str(decoded);
                            }
                        } else {
                            value.push_str(&token.parts.join(""));
                        }
                        value_end = token.span.end;
                        attr_end = token.span.end;
                        value_tokens.push(token);
                    }
                    _ => break,
                }
            }
        }
        if let Some(quote) = self.advance_if(TokenKind::AttrQuote) {
            attr_end = quote.span.end;
        }

        let value_span = value_start_span.map(|s| Span {
            start: s.start,
            end: value_end,
            full_start: s.full_start,
        });
        Attribute {
            name: full_name,
            value,
            source_span: Span {
                start: name_token.span.start,
                end: attr_end,
                full_start: name_token.span.full_start,
            },
            key_span: name_token.span,
            value_span,
            value_tokens,
        }
    }

    fn consume_directive(&mut self) -> Directive {
        let name_token = self.advance();
        let name = name_token.parts.first().cloned().unwrap_or_default();
        let mut start_span_end = name_token.span.end;
        let mut attributes = Vec::new();
        let mut end_source_span = None;

        if self.peek().kind == TokenKind::DirectiveOpen {
            let open = self.advance();
            start_span_end = open.span.end;
            while self.peek().kind == TokenKind::AttrName {
                let attr_name = self.advance();
                attributes.push(self.consume_attr(attr_name));
            }
            if self.peek().kind == TokenKind::DirectiveClose {
                let close = self.advance();
                end_source_span = Some(close.span);
            } else {
                self.errors.push(
                    ParseError::new(
                        ErrorKind::InvalidDirective,
                        "Unterminated directive definition",
                        name_token.span,
                    )
                    .with_name(name.clone()),
                );
            }
        }

        let end = end_source_span.map(|s: Span| s.end).unwrap_or(name_token.span.end);
        Directive {
            name,
            attributes,
            source_span: Span {
                start: name_token.span.start,
                end,
                full_start: name_token.span.full_start,
            },
            start_source_span: Span {
                start: name_token.span.start,
                end: start_span_end,
                full_start: name_token.span.full_start,
            },
            end_source_span,
        }
    }

    fn consume_cdata(&mut self) {
        if matches!(
            self.peek().kind,
            TokenKind::RawText | TokenKind::EscapableRawText | TokenKind::Text
        ) {
            let text = self.advance();
            self.consume_text(text);
        }
        self.advance_if(TokenKind::CdataEnd);
    }

    fn consume_comment(&mut self, start: Token) {
        let mut content = String::new();
        let mut end = start.span.end;

        if matches!(self.peek().kind, TokenKind::RawText | TokenKind::EscapableRawText) {
            let text = self.advance();
            if let Some(part) = text.parts.first() {
                content = part.clone();
            }
            end = text.span.end;
        }
        if let Some(end_token) = self.advance_if(TokenKind::CommentEnd) {
            end = end_token.span.end;
        }

        self.add_to_parent(Node::Comment(Comment {
            value: content.trim().to_string(),
            source_span: Span {
                start: start.span.start,
                end,
                full_start: start.span.full_start,
            },
        }));
    }

    fn consume_doc_type(&mut self, token: Token) {
        let content = token.parts.first().cloned().unwrap_or_default();
        self.add_to_parent(Node::Comment(Comment {
            value: content,
            source_span: token.span,
        }));
    }

    fn consume_text(&mut self, token: Token) {
        let mut tokens = vec![token.clone()];
        let start_span = token.span;
        let mut text = match token.kind {
            TokenKind::EncodedEntity => token.parts.first().cloned().unwrap_or_default(),
            _ => token.parts.join(""),
        };

        // A leading newline right after tags like <pre> and <textarea> is
        // not part of the content.
        if text.starts_with('\n') && self.parent_ignores_first_lf() {
            text.remove(0);
            // An entity token keeps its [decoded, encoded] payload; only
            // plain text tokens are rewritten to the stripped content.
            if token.kind != TokenKind::EncodedEntity {
                if let Some(first) = tokens.first_mut() {
                    first.parts = vec![text.clone()];
                }
            }
        }

        while matches!(
            self.peek().kind,
            TokenKind::Text | TokenKind::Interpolation | TokenKind::EncodedEntity
        ) {
            let next = self.advance();
            match next.kind {
                TokenKind::EncodedEntity => {
                    if let Some(decoded) = next.parts.first() {
                        text.push_str(decoded);
                    }
                }
                _ => text.push_str(&next.parts.join("")),
            }
            tokens.push(next);
        }

        if !text.is_empty() {
            let end = tokens.last().map(|t| t.span.end).unwrap_or(start_span.end);
            self.add_to_parent(Node::Text(Text {
                value: text,
                tokens,
                source_span: Span {
                    start: start_span.start,
                    end,
                    full_start: start_span.full_start,
                },
            }));
        }
    }

    fn parent_ignores_first_lf(&self) -> bool {
        match self.container_stack.last() {
            Some(Container::Element(el)) if el.children.is_empty() => {
                (self.get_tag_definition)(&el.name).ignore_first_lf
            }
            Some(Container::Component(c)) if c.children.is_empty() => match &c.tag_name {
                Some(tag) => (self.get_tag_definition)(tag).ignore_first_lf,
                None => false,
            },
            _ => false,
        }
    }

    fn consume_expansion(&mut self, start: Token) {
        let switch_value_token = self.advance();
        let switch_value = switch_value_token.parts.first().cloned().unwrap_or_default();
        let type_token = self.advance();
        let expansion_type = type_token.parts.first().cloned().unwrap_or_default();

        let mut cases = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::ExpansionCaseValue => match self.parse_expansion_case() {
                    Some(case) => cases.push(case),
                    None => return,
                },
                TokenKind::ExpansionFormEnd | TokenKind::BlockClose => break,
                TokenKind::Text | TokenKind::RawText => {
                    // Whitespace between cases.
                    self.advance();
                }
                _ => break,
            }
        }

        // A block close brace may stand in for the form end when block
        // tokenization claimed the closing brace.
        if !matches!(
            self.peek().kind,
            TokenKind::ExpansionFormEnd | TokenKind::BlockClose
        ) {
            self.errors.push(ParseError::new(
                ErrorKind::InvalidIcu,
                "Invalid ICU message. Missing '}'.",
                self.peek().span,
            ));
            if self.peek().kind != TokenKind::Eof {
                self.advance();
            }
            return;
        }

        let source_span = Span {
            start: start.span.start,
            end: self.peek().span.end,
            full_start: start.span.full_start,
        };
        self.add_to_parent(Node::Expansion(Expansion {
            switch_value,
            expansion_type,
            cases,
            source_span,
            switch_value_source_span: switch_value_token.span,
        }));
        self.advance();
    }

    fn parse_expansion_case(&mut self) -> Option<ExpansionCase> {
        let value_token = self.advance();
        let value = value_token.parts.first().cloned().unwrap_or_default();

        if self.peek().kind != TokenKind::ExpansionCaseExpStart {
            self.errors.push(ParseError::new(
                ErrorKind::InvalidIcu,
                "Invalid ICU message. Missing '{'.",
                self.peek().span,
            ));
            return None;
        }
        let start_token = self.advance();

        let mut exp = self.collect_expansion_exp_tokens(&start_token)?;

        let end_token = match self.peek().kind {
            TokenKind::ExpansionCaseExpEnd => self.advance(),
            _ => {
                // The closing brace was tokenized as something else; stand
                // in a synthetic case end over its span.
                let consumed = self.advance();
                Token {
                    kind: TokenKind::ExpansionCaseExpEnd,
                    parts: Vec::new(),
                    span: consumed.span,
                }
            }
        };
        exp.push(Token {
            kind: TokenKind::Eof,
            parts: Vec::new(),
            span: end_token.span,
        });
        exp.retain(|t| t.kind != TokenKind::BlockClose);

        let mut case_builder = TreeBuilder::new(exp, self.source, self.get_tag_definition);
        case_builder.in_expansion_context = true;
        let (expression, case_errors) = case_builder.build();
        if !case_errors.is_empty() {
            for error in case_errors {
                let duplicate = self.errors.iter().any(|existing| {
                    existing.message == error.message
                        && existing.span.start.offset == error.span.start.offset
                        && existing.span.start.line == error.span.start.line
                        && existing.span.start.col == error.span.start.col
                });
                if !duplicate {
                    self.errors.push(error);
                }
            }
            return None;
        }

        Some(ExpansionCase {
            value,
            expression,
            source_span: Span {
                start: value_token.span.start,
                end: end_token.span.end,
                full_start: value_token.span.full_start,
            },
            value_source_span: value_token.span,
            exp_source_span: Span {
                start: start_token.span.start,
                end: end_token.span.end,
                full_start: start_token.span.full_start,
            },
        })
    }

    /// Collects the raw tokens of one expansion case body, tracking nested
    /// forms and cases. Stops before the token that closed the case so the
    /// caller can consume it.
    fn collect_expansion_exp_tokens(&mut self, start: &Token) -> Option<Vec<Token>> {
        let mut exp = Vec::new();
        let mut stack = vec![TokenKind::ExpansionCaseExpStart];

        loop {
            match self.peek().kind {
                TokenKind::Eof => {
                    self.errors.push(ParseError::new(
                        ErrorKind::InvalidIcu,
                        "Invalid ICU message. Missing '}'.",
                        start.span,
                    ));
                    return None;
                }
                TokenKind::BlockClose => {
                    // Block tokenization can claim closing braces of ICU
                    // constructs; match them against the open stack.
                    if stack.last() == Some(&TokenKind::ExpansionFormStart) {
                        stack.pop();
                        self.advance();
                    } else if stack.last() == Some(&TokenKind::ExpansionCaseExpStart) {
                        stack.pop();
                        if stack.is_empty() {
                            self.advance();
                            return Some(exp);
                        }
                        self.advance();
                    } else if stack.is_empty() {
                        return Some(exp);
                    } else {
                        self.advance();
                    }
                }
                TokenKind::ExpansionFormStart | TokenKind::ExpansionCaseExpStart => {
                    stack.push(self.peek().kind);
                    let token = self.advance();
                    exp.push(token);
                }
                TokenKind::ExpansionCaseExpEnd => {
                    if stack.last() == Some(&TokenKind::ExpansionCaseExpStart) {
                        stack.pop();
                        if stack.is_empty() {
                            return Some(exp);
                        }
                        let token = self.advance();
                        exp.push(token);
                    } else {
                        self.errors.push(ParseError::new(
                            ErrorKind::InvalidIcu,
                            "Invalid ICU message. Missing '}'.",
                            start.span,
                        ));
                        return None;
                    }
                }
                TokenKind::ExpansionFormEnd => {
                    if stack.last() == Some(&TokenKind::ExpansionFormStart) {
                        stack.pop();
                        let token = self.advance();
                        exp.push(token);
                    } else {
                        self.errors.push(ParseError::new(
                            ErrorKind::InvalidIcu,
                            "Invalid ICU message. Missing '}'.",
                            start.span,
                        ));
                        return None;
                    }
                }
                _ => {
                    let token = self.advance();
                    exp.push(token);
                }
            }
        }
    }

    fn consume_block_open(&mut self, start: Token) {
        let name = start.parts.first().cloned().unwrap_or_default();

        let mut parameters = Vec::new();
        while self.peek().kind == TokenKind::BlockParameter {
            let param = self.advance();
            parameters.push(BlockParameter {
                expression: param.parts.first().cloned().unwrap_or_default(),
                source_span: param.span,
            });
        }
        self.advance_if(TokenKind::BlockOpenEnd);

        let end = self.peek().span.full_start;
        let span = Span {
            start: start.span.start,
            end,
            full_start: start.span.full_start,
        };
        let block = Block {
            name,
            parameters,
            children: Vec::new(),
            source_span: span,
            name_span: start.span,
            start_source_span: span,
            end_source_span: None,
        };
        self.push_container(Container::Block(block), false);
    }

    fn consume_block_close(&mut self, token: Token) {
        if !self.pop_container(None, ContainerKind::Block, Some(token.span)) {
            self.errors.push(ParseError::new(
                ErrorKind::InvalidBlock,
                "Unexpected closing block. The block may have been closed earlier. If you meant to write the } character, you should use the \"&#125;\" HTML entity instead.",
                token.span,
            ));
        }
    }

    fn consume_incomplete_block(&mut self, token: Token) {
        let name = token.parts.first().cloned().unwrap_or_default();

        let mut parameters = Vec::new();
        while self.peek().kind == TokenKind::BlockParameter {
            let param = self.advance();
            parameters.push(BlockParameter {
                expression: param.parts.first().cloned().unwrap_or_default(),
                source_span: param.span,
            });
        }

        let end = self.peek().span.full_start;
        let span = Span {
            start: token.span.start,
            end,
            full_start: token.span.full_start,
        };
        let block = Block {
            name: name.clone(),
            parameters,
            children: Vec::new(),
            source_span: span,
            name_span: token.span,
            start_source_span: span,
            end_source_span: None,
        };
        self.push_container(Container::Block(block), false);
        self.pop_container(None, ContainerKind::Block, None);

        self.errors.push(
            ParseError::new(
                ErrorKind::InvalidBlock,
                format!(
                    "Incomplete block \"{name}\". If you meant to write the @ character, you should use the \"&#64;\" HTML entity instead."
                ),
                token.span,
            )
            .with_name(name),
        );
    }

    fn consume_let(&mut self, start: Token) {
        let name = start.parts.first().cloned().unwrap_or_default();

        if self.peek().kind != TokenKind::LetValue {
            self.errors.push(
                ParseError::new(
                    ErrorKind::InvalidLet,
                    format!("Invalid @let declaration \"{name}\". Declaration must have a value."),
                    start.span,
                )
                .with_name(name),
            );
            return;
        }
        let value_token = self.advance();

        if self.peek().kind != TokenKind::LetEnd {
            self.errors.push(
                ParseError::new(
                    ErrorKind::InvalidLet,
                    format!(
                        "Unterminated @let declaration \"{name}\". Declaration must be terminated with a semicolon."
                    ),
                    start.span,
                )
                .with_name(name),
            );
            return;
        }
        let end_token = self.advance();

        let value = value_token.parts.first().cloned().unwrap_or_default();
        let source_span = Span {
            start: start.span.start,
            end: end_token.span.full_start,
            full_start: start.span.full_start,
        };
        let name_span = self.let_name_span(&start, &name);
        self.add_to_parent(Node::LetDeclaration(LetDeclaration {
            name,
            value,
            source_span,
            name_span,
            value_span: value_token.span,
        }));
    }

    fn consume_incomplete_let(&mut self, token: Token) {
        let name = token.parts.first().cloned().unwrap_or_default();

        // With at least a name a salvage node is still useful for tooling.
        if !name.is_empty() {
            let name_span = self.let_name_span(&token, &name);
            let value_span = Span {
                start: token.span.start,
                end: token.span.start,
                full_start: token.span.start,
            };
            self.add_to_parent(Node::LetDeclaration(LetDeclaration {
                name: name.clone(),
                value: String::new(),
                source_span: token.span,
                name_span,
                value_span,
            }));
        }

        let name_string = if name.is_empty() {
            String::new()
        } else {
            format!(" \"{name}\"")
        };
        self.errors.push(
            ParseError::new(
                ErrorKind::InvalidLet,
                format!(
                    "Incomplete @let declaration{name_string}. @let declarations must be written as `@let <name> = <value>;`"
                ),
                token.span,
            )
            .with_name(name),
        );
    }

    /// The start token covers `@let` through the declaration name, but the
    /// recovery path can widen it further, so the name is located by
    /// searching the covered source text backwards.
    fn let_name_span(&self, start: &Token, name: &str) -> Span {
        let covered = self
            .source
            .get(start.span.start.offset..start.span.end.offset)
            .unwrap_or("");
        let name_start = match covered.rfind(name) {
            Some(offset) => Position {
                offset: start.span.start.offset + offset,
                line: start.span.start.line,
                col: start.span.start.col + offset,
            },
            None => start.span.start,
        };
        Span {
            start: name_start,
            end: start.span.end,
            full_start: name_start,
        }
    }

    fn consume_component_start_tag(&mut self, start: Token) {
        let component_name = start.parts.first().cloned().unwrap_or_default();
        let (attributes, directives) = self.consume_attributes_and_directives();
        let tag_name = self.get_component_tag_name(&start);
        let full_name = self.get_component_full_name(&start);

        let mut is_self_closing = false;
        if self.peek().kind == TokenKind::ComponentOpenEndVoid {
            is_self_closing = true;
            self.advance();
        } else if self.peek().kind == TokenKind::ComponentOpenEnd {
            self.advance();
        }

        let end = self.peek().span.full_start;
        let span = Span {
            start: start.span.start,
            end,
            full_start: start.span.full_start,
        };
        let component = Component {
            component_name,
            tag_name: tag_name.clone(),
            full_name: full_name.clone(),
            attributes,
            directives,
            children: Vec::new(),
            is_self_closing,
            source_span: span,
            start_source_span: span,
            end_source_span: None,
        };

        let is_closed_by_child = match &tag_name {
            Some(tag) => self.parent_closes_child(tag),
            None => false,
        };
        self.push_container(Container::Component(component), is_closed_by_child);

        if is_self_closing {
            self.pop_container(Some(&full_name), ContainerKind::Component, Some(span));
        } else if start.kind == TokenKind::IncompleteComponentOpen {
            self.pop_container(Some(&full_name), ContainerKind::Component, None);
            self.errors.push(
                ParseError::new(
                    ErrorKind::InvalidTag,
                    format!("Opening tag \"{full_name}\" not terminated."),
                    span,
                )
                .with_name(full_name),
            );
        }
    }

    fn consume_component_end_tag(&mut self, end_token: Token) {
        let full_name = self.get_component_full_name(&end_token);
        let component_name = end_token.parts.first().cloned().unwrap_or_default();

        if !self.pop_container(Some(&full_name), ContainerKind::Component, Some(end_token.span)) {
            let suffix = match self.container_stack.last() {
                Some(Container::Component(c)) if c.component_name == component_name => {
                    format!(", did you mean \"{}\"?", c.full_name)
                }
                _ => ". It may happen when the tag has already been closed by another tag."
                    .to_string(),
            };
            self.errors.push(
                ParseError::new(
                    ErrorKind::InvalidTag,
                    format!("Unexpected closing tag \"{full_name}\"{suffix}"),
                    end_token.span,
                )
                .with_name(full_name),
            );
        }
    }

    fn parent_closes_child(&self, child_name: &str) -> bool {
        match self.container_stack.last() {
            Some(Container::Element(el)) => {
                (self.get_tag_definition)(&el.name).is_closed_by_child(child_name)
            }
            Some(Container::Component(c)) => match &c.tag_name {
                Some(tag) => (self.get_tag_definition)(tag).is_closed_by_child(child_name),
                None => false,
            },
            _ => false,
        }
    }

    fn get_element_full_name(&self, token: &Token) -> String {
        let prefix = self.get_prefix(token);
        let name = token.parts.get(1).cloned().unwrap_or_default();
        merge_ns_and_name(&prefix, &name)
    }

    fn get_component_full_name(&self, token: &Token) -> String {
        let component_name = token.parts.first().cloned().unwrap_or_default();
        match self.get_component_tag_name(token) {
            None => component_name,
            Some(tag_name) if tag_name.starts_with(':') => {
                format!("{component_name}{tag_name}")
            }
            Some(tag_name) => format!("{component_name}:{tag_name}"),
        }
    }

    fn get_component_tag_name(&self, token: &Token) -> Option<String> {
        let prefix = self.get_prefix(token);
        let tag_name = token.parts.get(2).cloned().unwrap_or_default();
        if prefix.is_empty() && tag_name.is_empty() {
            None
        } else if prefix.is_empty() {
            Some(tag_name)
        } else {
            // A namespaced component without an explicit tag renders a
            // generic container.
            let tag_name = if tag_name.is_empty() {
                "component".to_string()
            } else {
                tag_name
            };
            Some(merge_ns_and_name(&prefix, &tag_name))
        }
    }

    /// Namespace prefix for a tag or component token: explicit in the
    /// token, implied by the tag definition, or inherited from the closest
    /// element-like parent.
    fn get_prefix(&self, token: &Token) -> String {
        let (mut prefix, tag_name) = match token.kind {
            TokenKind::ComponentOpenStart
            | TokenKind::ComponentClose
            | TokenKind::IncompleteComponentOpen => (
                token.parts.get(1).cloned().unwrap_or_default(),
                token.parts.get(2).cloned().unwrap_or_default(),
            ),
            _ => (
                token.parts.first().cloned().unwrap_or_default(),
                token.parts.get(1).cloned().unwrap_or_default(),
            ),
        };

        if prefix.is_empty() {
            if let Some(implicit) = (self.get_tag_definition)(&tag_name).implicit_namespace_prefix {
                prefix = implicit.to_string();
            }
        }
        if prefix.is_empty() {
            if let Some(parent_name) = self.closest_element_like_name() {
                let (_, local) = split_ns_name(parent_name);
                if !(self.get_tag_definition)(local).prevent_namespace_inheritance {
                    if let Some(parent_prefix) = get_ns_prefix(parent_name) {
                        prefix = parent_prefix.to_string();
                    }
                }
            }
        }
        prefix
    }

    fn closest_element_like_name(&self) -> Option<&str> {
        for container in self.container_stack.iter().rev() {
            match container {
                Container::Element(el) => return Some(&el.name),
                Container::Component(c) => return c.tag_name.as_deref(),
                Container::Block(_) => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tokenizer::Tokenizer;
    use crate::tags::html_tag_definition;
    use crate::TokenizeOptions;

    fn build(source: &str) -> (Vec<Node>, Vec<ParseError>) {
        build_with(source, TokenizeOptions::default())
    }

    fn build_with(source: &str, options: TokenizeOptions) -> (Vec<Node>, Vec<ParseError>) {
        let lexed = Tokenizer::new(source, html_tag_definition, &options).tokenize();
        TreeBuilder::new(lexed.tokens, source, html_tag_definition).build()
    }

    fn messages(errors: &[ParseError]) -> Vec<&str> {
        errors.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn element_with_text_child() {
        let (nodes, errors) = build("<p>hello</p>");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert_eq!(nodes.len(), 1);
        let Node::Element(el) = &nodes[0] else {
            panic!("expected element, got {nodes:?}");
        };
        assert_eq!(el.name, "p");
        assert!(!el.is_self_closing);
        assert!(el.end_source_span.is_some());
        let Node::Text(text) = &el.children[0] else {
            panic!("expected text child");
        };
        assert_eq!(text.value, "hello");
        assert_eq!(el.source_span.end.offset, 12);
    }

    #[test]
    fn entities_merge_into_surrounding_text() {
        let (nodes, errors) = build("<div>a&amp;b&#x1F6C8;</div>");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let Node::Element(el) = &nodes[0] else {
            panic!("expected element");
        };
        assert_eq!(el.children.len(), 1);
        let Node::Text(text) = &el.children[0] else {
            panic!("expected text child");
        };
        assert_eq!(text.value, "a&b\u{1F6C8}");
    }

    #[test]
    fn standalone_interpolation_becomes_text() {
        let (nodes, errors) = build("{{ user.name }}");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let Node::Text(text) = &nodes[0] else {
            panic!("expected text node, got {nodes:?}");
        };
        assert_eq!(text.value, "{{ user.name }}");
    }

    #[test]
    fn void_element_end_tag_is_an_error() {
        let (nodes, errors) = build("<input></input>");
        assert_eq!(
            messages(&errors),
            ["Void elements do not have end tags \"input\""]
        );
        let Node::Element(el) = &nodes[0] else {
            panic!("expected element");
        };
        assert_eq!(el.name, "input");
        assert!(el.is_void);
    }

    #[test]
    fn standard_element_cannot_self_close() {
        let (_, errors) = build("<div/>");
        assert_eq!(
            messages(&errors),
            ["Only void, custom and foreign elements can be self closed \"div\""]
        );
    }

    #[test]
    fn unexpected_close_tag_is_reported() {
        let (nodes, errors) = build("<div></span></div>");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.starts_with("Unexpected closing tag \"span\""));
        let Node::Element(el) = &nodes[0] else {
            panic!("expected element");
        };
        assert_eq!(el.name, "div");
        assert!(el.end_source_span.is_some());
    }

    #[test]
    fn paragraph_is_implicitly_closed_by_div() {
        let (nodes, errors) = build("<p>a<div>b</div>");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert_eq!(nodes.len(), 2);
        let Node::Element(p) = &nodes[0] else {
            panic!("expected p element");
        };
        assert_eq!(p.name, "p");
        assert_eq!(p.children.len(), 1);
        let Node::Element(div) = &nodes[1] else {
            panic!("expected div element");
        };
        assert_eq!(div.name, "div");
    }

    #[test]
    fn misplaced_table_row_is_not_rewritten() {
        // No wrapper synthesis: the row stays where it was written.
        let (nodes, errors) = build("<div><tr></tr></div>");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let Node::Element(div) = &nodes[0] else {
            panic!("expected div");
        };
        let Node::Element(tr) = &div.children[0] else {
            panic!("expected tr child");
        };
        assert_eq!(tr.name, "tr");
    }

    #[test]
    fn unterminated_open_tag_is_salvaged() {
        let (nodes, errors) = build("<div class=\"a\" <span>x</span>");
        assert_eq!(messages(&errors), ["Opening tag \"div\" not terminated."]);
        let Node::Element(div) = &nodes[0] else {
            panic!("expected salvaged div, got {nodes:?}");
        };
        assert_eq!(div.name, "div");
        assert!(div.children.is_empty());
    }

    #[test]
    fn attribute_value_with_interpolation() {
        let (nodes, errors) = build("<div title=\"Hi {{ name }}!\"></div>");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let Node::Element(el) = &nodes[0] else {
            panic!("expected element");
        };
        let attr = &el.attributes[0];
        assert_eq!(attr.name, "title");
        assert_eq!(attr.value, "Hi {{ name }}!");
        assert_eq!(attr.value_tokens.len(), 3);
        assert!(attr.value_span.is_some());
    }

    #[test]
    fn svg_children_inherit_the_namespace() {
        let (nodes, errors) = build("<svg><rect/></svg>");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let Node::Element(svg) = &nodes[0] else {
            panic!("expected svg element");
        };
        assert_eq!(svg.name, ":svg:svg");
        let Node::Element(rect) = &svg.children[0] else {
            panic!("expected rect child");
        };
        assert_eq!(rect.name, ":svg:rect");
        assert!(rect.is_self_closing);
    }

    #[test]
    fn block_with_parameters_and_children() {
        let (nodes, errors) = build("@if (user.isAdmin) {<b>admin</b>}");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let Node::Block(block) = &nodes[0] else {
            panic!("expected block, got {nodes:?}");
        };
        assert_eq!(block.name, "if");
        assert_eq!(block.parameters.len(), 1);
        assert_eq!(block.parameters[0].expression, "user.isAdmin");
        assert_eq!(block.children.len(), 1);
        assert!(block.end_source_span.is_some());
    }

    #[test]
    fn unclosed_block_is_reported_at_eof() {
        let (nodes, errors) = build("@defer {hello");
        assert_eq!(messages(&errors), ["Unclosed block \"defer\""]);
        let Node::Block(block) = &nodes[0] else {
            panic!("expected block");
        };
        assert_eq!(block.name, "defer");
        assert!(block.end_source_span.is_none());
        assert_eq!(block.children.len(), 1);
    }

    #[test]
    fn stray_closing_brace_is_reported() {
        let (_, errors) = build("@if (a) {}}");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.starts_with("Unexpected closing block."));
    }

    #[test]
    fn let_declaration_node() {
        let (nodes, errors) = build("@let total = price * quantity;");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let Node::LetDeclaration(decl) = &nodes[0] else {
            panic!("expected let declaration, got {nodes:?}");
        };
        assert_eq!(decl.name, "total");
        assert_eq!(decl.value, "price * quantity");
        assert_eq!(decl.name_span.start.offset, 5);
    }

    #[test]
    fn let_without_semicolon_is_salvaged_with_error() {
        let (nodes, errors) = build("@let total = price");
        assert_eq!(
            messages(&errors),
            ["Incomplete @let declaration \"total\". @let declarations must be written as `@let <name> = <value>;`"]
        );
        let Node::LetDeclaration(decl) = &nodes[0] else {
            panic!("expected salvaged let declaration, got {nodes:?}");
        };
        assert_eq!(decl.name, "total");
        assert_eq!(decl.value, "");
    }

    #[test]
    fn expansion_form_with_two_cases() {
        let mut options = TokenizeOptions::default();
        options.tokenize_expansion_forms = true;
        let (nodes, errors) =
            build_with("{count, plural, =0 {none} other {some <b>items</b>}}", options);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let Node::Expansion(expansion) = &nodes[0] else {
            panic!("expected expansion, got {nodes:?}");
        };
        assert_eq!(expansion.switch_value, "count");
        assert_eq!(expansion.expansion_type, "plural");
        assert_eq!(expansion.cases.len(), 2);
        assert_eq!(expansion.cases[0].value, "=0");
        assert_eq!(expansion.cases[1].value, "other");
    }

    #[test]
    fn unterminated_expansion_form_reports_missing_brace() {
        let mut options = TokenizeOptions::default();
        options.tokenize_expansion_forms = true;
        let (_, errors) = build_with("{count, plural, =0 {none}", options);
        assert!(
            errors.iter().any(|e| e.message == "Invalid ICU message. Missing '}'."),
            "missing ICU error in {errors:?}"
        );
    }

    #[test]
    fn component_with_tag_name_and_children() {
        let mut options = TokenizeOptions::default();
        options.selectorless_enabled = true;
        let (nodes, errors) = build_with("<MyButton:button>Go</MyButton:button>", options);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let Node::Component(component) = &nodes[0] else {
            panic!("expected component, got {nodes:?}");
        };
        assert_eq!(component.component_name, "MyButton");
        assert_eq!(component.tag_name.as_deref(), Some("button"));
        assert_eq!(component.full_name, "MyButton:button");
        assert_eq!(component.children.len(), 1);
    }

    #[test]
    fn mismatched_component_close_suggests_full_name() {
        let mut options = TokenizeOptions::default();
        options.selectorless_enabled = true;
        let (_, errors) = build_with("<MyButton:button>Go</MyButton:btn>", options);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].message,
            "Unexpected closing tag \"MyButton:btn\", did you mean \"MyButton:button\"?"
        );
    }

    #[test]
    fn directive_with_arguments() {
        let mut options = TokenizeOptions::default();
        options.selectorless_enabled = true;
        let (nodes, errors) = build_with("<div @Tooltip(text=\"hi\")></div>", options);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let Node::Element(el) = &nodes[0] else {
            panic!("expected element");
        };
        assert_eq!(el.directives.len(), 1);
        let directive = &el.directives[0];
        assert_eq!(directive.name, "Tooltip");
        assert_eq!(directive.attributes.len(), 1);
        assert_eq!(directive.attributes[0].value, "hi");
        assert!(directive.end_source_span.is_some());
    }

    #[test]
    fn comment_content_is_trimmed() {
        let (nodes, errors) = build("<!--  a note  -->");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let Node::Comment(comment) = &nodes[0] else {
            panic!("expected comment, got {nodes:?}");
        };
        assert_eq!(comment.value, "a note");
    }

    #[test]
    fn first_linefeed_after_pre_is_dropped() {
        let (nodes, errors) = build("<pre>\ncode</pre>");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let Node::Element(pre) = &nodes[0] else {
            panic!("expected pre element");
        };
        let Node::Text(text) = &pre.children[0] else {
            panic!("expected text child");
        };
        assert_eq!(text.value, "code");
    }

    #[test]
    fn entity_newline_after_pre_keeps_entity_token_payload() {
        let (nodes, errors) = build("<pre>&#10;x</pre>");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let Node::Element(pre) = &nodes[0] else {
            panic!("expected pre element");
        };
        let Node::Text(text) = &pre.children[0] else {
            panic!("expected text child");
        };
        assert_eq!(text.value, "x");
        assert_eq!(text.tokens[0].parts, vec!["\n", "&#10;"]);
    }

    #[test]
    fn void_element_is_closed_by_following_content() {
        let (nodes, errors) = build("<br>after");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert_eq!(nodes.len(), 2);
        assert!(matches!(&nodes[0], Node::Element(el) if el.name == "br"));
        assert!(matches!(&nodes[1], Node::Text(t) if t.value == "after"));
    }
}
