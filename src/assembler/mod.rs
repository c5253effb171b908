//! The assembler front end: tokenizer and preprocessor.
//!
//! - [`token`]: the token vocabulary (kinds, type tags, equality)
//! - [`tokenizer`]: pure source-text -> token-list function
//! - [`stream`]: cursored editable token sequence
//! - [`preprocessor`]: directive handling, macro expansion, conditionals

pub mod preprocessor;
pub mod stream;
pub mod token;
pub mod tokenizer;

pub use preprocessor::{PreprocessError, PreprocessState, Preprocessor};
pub use stream::TokenStream;
pub use token::{Token, TokenKind, VarType};
pub use tokenizer::tokenize;
