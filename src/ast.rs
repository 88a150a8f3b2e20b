//! AST node types produced by the parser.
//!
//! Every node carries source spans so downstream tooling can map back to
//! the template text. Spans use zero-based line and column numbers; a
//! span's `full_start` additionally covers the leading trivia in front of
//! the node (see [`Span`]).

use serde::Serialize;

pub use crate::parser::tokenizer::{Position, Span, Token};

/// A node in the parsed template tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Node {
    Element(Element),
    Component(Component),
    Text(Text),
    Comment(Comment),
    Expansion(Expansion),
    Block(Block),
    LetDeclaration(LetDeclaration),
}

/// An HTML element: `<div class="x">...</div>`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Element {
    /// Tag name, including any namespace prefix (`:svg:rect`)
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub directives: Vec<Directive>,
    pub children: Vec<Node>,
    pub is_self_closing: bool,
    pub is_void: bool,
    /// Span of the whole element, open tag through close tag
    pub source_span: Span,
    /// Span of the open tag only
    pub start_source_span: Span,
    /// Span of the close tag, when one was found
    pub end_source_span: Option<Span>,
}

/// A component reference: `<MyComponent:button>...</MyComponent>`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Component {
    /// The component class name (`MyComponent`)
    pub component_name: String,
    /// The rendered tag name, if the reference specified one
    pub tag_name: Option<String>,
    /// Name as written, component name plus tag name (`MyComponent:button`)
    pub full_name: String,
    pub attributes: Vec<Attribute>,
    pub directives: Vec<Directive>,
    pub children: Vec<Node>,
    pub is_self_closing: bool,
    pub source_span: Span,
    pub start_source_span: Span,
    pub end_source_span: Option<Span>,
}

/// A run of text, possibly containing interpolations and decoded entities
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Text {
    /// The merged text value with entities decoded
    pub value: String,
    /// The tokens the text was assembled from, interpolations included
    pub tokens: Vec<Token>,
    pub source_span: Span,
}

/// An HTML comment: `<!-- ... -->`. Doctype declarations are also
/// represented as comments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comment {
    pub value: String,
    pub source_span: Span,
}

/// An ICU expansion form: `{count, plural, =0 {none} other {some}}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expansion {
    /// The switch expression (`count`)
    pub switch_value: String,
    /// `plural`, `select`, ...
    pub expansion_type: String,
    pub cases: Vec<ExpansionCase>,
    pub source_span: Span,
    pub switch_value_source_span: Span,
}

/// One case of an ICU expansion form: `=0 {none}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpansionCase {
    /// The case value (`=0`, `other`)
    pub value: String,
    /// The case body, parsed as template content
    pub expression: Vec<Node>,
    pub source_span: Span,
    pub value_source_span: Span,
    pub exp_source_span: Span,
}

/// A control flow block: `@if (cond) { ... }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    /// Block name without the `@` (`if`, `else if`, `for`, `defer`, ...)
    pub name: String,
    pub parameters: Vec<BlockParameter>,
    pub children: Vec<Node>,
    pub source_span: Span,
    /// Span of the `@name` keyword
    pub name_span: Span,
    /// Span from `@name` through the opening `{`
    pub start_source_span: Span,
    /// Span of the closing `}`, when one was found
    pub end_source_span: Option<Span>,
}

/// One parameter of a control flow block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockParameter {
    pub expression: String,
    pub source_span: Span,
}

/// A `@let name = value;` declaration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LetDeclaration {
    pub name: String,
    pub value: String,
    pub source_span: Span,
    pub name_span: Span,
    pub value_span: Span,
}

/// An attribute on an element, component or directive
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    /// Attribute name, including any namespace prefix
    pub name: String,
    /// The merged attribute value with entities decoded
    pub value: String,
    pub source_span: Span,
    /// Span of the attribute name
    pub key_span: Span,
    /// Span of the value, when one was written
    pub value_span: Option<Span>,
    /// The tokens the value was assembled from, interpolations included
    pub value_tokens: Vec<Token>,
}

/// A directive applied to an element or component: `@Tooltip(text="hi")`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Directive {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub source_span: Span,
    /// Span of the `@Name(` opener, or just the name when no arguments follow
    pub start_source_span: Span,
    /// Span of the closing `)`, when arguments were written
    pub end_source_span: Option<Span>,
}

impl Node {
    /// Span of the node in the source template
    pub fn source_span(&self) -> Span {
        match self {
            Node::Element(n) => n.source_span,
            Node::Component(n) => n.source_span,
            Node::Text(n) => n.source_span,
            Node::Comment(n) => n.source_span,
            Node::Expansion(n) => n.source_span,
            Node::Block(n) => n.source_span,
            Node::LetDeclaration(n) => n.source_span,
        }
    }

    /// Child nodes, for node kinds that can contain children
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Element(n) => &n.children,
            Node::Component(n) => &n.children,
            Node::Block(n) => &n.children,
            _ => &[],
        }
    }
}
