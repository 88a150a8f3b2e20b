pub mod cursor;
pub mod tokenizer;
pub mod tree_builder;

pub use tokenizer::{Position, Span, Token, TokenKind, TokenizeResult, Tokenizer};
pub use tree_builder::TreeBuilder;
