//! Parsing logic for the textual IR including a scanner (tokenizer).

mod parser;
mod scanner;
mod token;

pub use parser::Parser;
pub use scanner::Scanner;
pub use token::Location;
pub use token::Token;
pub use token::TokenKind;
