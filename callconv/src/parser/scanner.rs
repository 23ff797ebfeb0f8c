use crate::parser::token::Location;
use crate::parser::token::Token;
use crate::parser::token::TokenKind;
use anyhow::Result;

pub struct Scanner {
    source: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Scanner {
            source: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            line: 0,
            column: 0,
        }
    }
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }
    fn advance(&mut self) -> char {
        let c = self.source[self.current];
        self.current += 1;
        self.column += 1;
        c
    }
    fn peek(&self) -> char {
        self.peek_n(0)
    }
    fn peek_next(&self) -> char {
        self.peek_n(1)
    }
    fn peek_n(&self, n: usize) -> char {
        match self.source.get(self.current + n) {
            Some(c) => *c,
            None => '\0',
        }
    }
    fn lexeme(&self) -> String {
        self.source[self.start..self.current].iter().collect()
    }
    fn add_token(&mut self, kind: TokenKind) {
        let lexeme = if kind == TokenKind::Eof {
            "".to_string()
        } else {
            self.lexeme()
        };
        let width = self.current - self.start;
        let column = self.column.saturating_sub(width);
        let location = Location::new(self.line, column, self.start);
        self.tokens.push(Token::new(kind, lexeme, location));
    }
    fn number(&mut self) -> Result<()> {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        let mut is_float = false;
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            is_float = true;
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        if is_float {
            self.add_token(TokenKind::FloatLiteral);
        } else {
            self.add_token(TokenKind::Integer)
        }
        Ok(())
    }
    // Whether the character is a valid identifier start character.
    fn is_identifier_start(c: char) -> bool {
        c.is_alphabetic() || c == '_' || c == '@' || c == '%'
    }
    // Whether the character is a valid identifier character.
    fn is_identifier(c: char) -> bool {
        c.is_alphanumeric() || c == '_' || c == '.'
    }
    // Scan identifiers and keywords.
    fn identifier(&mut self) -> Result<()> {
        while Scanner::is_identifier(self.peek()) {
            self.advance();
        }
        let lexeme = self.lexeme();
        let kind = match lexeme.as_str() {
            "true" => TokenKind::KwTrue,
            "false" => TokenKind::KwFalse,
            s if s.starts_with('@') => TokenKind::AtIdentifier,
            s if s.starts_with('%') => TokenKind::PercentIdentifier,
            _ => TokenKind::BareIdentifier,
        };
        self.add_token(kind);
        Ok(())
    }
    fn arrow_or_minus(&mut self) -> Result<()> {
        if self.peek() == '>' {
            self.advance();
            self.add_token(TokenKind::Arrow);
        } else {
            self.add_token(TokenKind::Minus);
        }
        Ok(())
    }
    fn string(&mut self) -> Result<()> {
        while self.peek() != '"' && !self.is_at_end() {
            let c = self.advance();
            if c == '\\' && !self.is_at_end() {
                self.advance();
            } else if c == '\n' {
                self.line += 1;
                self.column = 0;
            }
        }
        if self.is_at_end() {
            return Err(anyhow::anyhow!("Unterminated string"));
        }
        // self.peek() == '"'
        self.advance();
        self.add_token(TokenKind::String);
        Ok(())
    }
    fn scan_token(&mut self) -> Result<()> {
        let c = self.advance();
        match c {
            '(' => self.add_token(TokenKind::LParen),
            ')' => self.add_token(TokenKind::RParen),
            '{' => self.add_token(TokenKind::LBrace),
            '}' => self.add_token(TokenKind::RBrace),
            '[' => self.add_token(TokenKind::LBracket),
            ']' => self.add_token(TokenKind::RBracket),
            ':' => self.add_token(TokenKind::Colon),
            ',' => self.add_token(TokenKind::Comma),
            '=' => self.add_token(TokenKind::Equal),
            ' ' | '\r' | '\t' => (),
            '\n' => {
                self.line += 1;
                self.column = 0;
            }
            '-' => self.arrow_or_minus()?,
            '"' => self.string()?,
            s if s.is_ascii_digit() => self.number()?,
            s if Scanner::is_identifier_start(s) => self.identifier()?,
            _ => {
                let column = if self.column == 0 { 0 } else { self.column - 1 };
                let location = Location::new(self.line, column, self.start);
                let src: String = self.source.iter().collect();
                return Err(anyhow::anyhow!(Self::error(
                    &src,
                    &location,
                    &format!("Scanning failed starting at: {}", c)
                )));
            }
        }
        Ok(())
    }
    fn scan_tokens(&mut self) -> Result<()> {
        while !self.is_at_end() {
            self.start = self.current;
            self.scan_token()?;
        }
        self.start = self.current;
        self.add_token(TokenKind::Eof);
        Ok(())
    }
    pub fn scan(src: &str) -> Result<Vec<Token>> {
        let mut scanner = Scanner::new(src);
        scanner.scan_tokens()?;
        Ok(scanner.tokens)
    }
    pub fn error(src: &str, loc: &Location, msg: &str) -> String {
        let lines = src.split('\n').collect::<Vec<&str>>();
        let n = loc.line().min(lines.len().saturating_sub(1));
        let prev_line = if n > 0 {
            let prev_n = n - 1;
            let prev = lines[prev_n];
            format!("\n{prev_n}  | {prev}")
        } else {
            "".to_string()
        };
        let line = lines.get(n).copied().unwrap_or("");
        let line_num_width = 4 + n.to_string().len();
        let err_indent = " ".repeat(loc.column() + line_num_width);
        format!("```{prev_line}\n{n}  | {line}\n{err_indent}^ {msg}\n```")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Scanner::scan(src).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_scanner() {
        let tokens = Scanner::scan("42.5 42").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].kind, TokenKind::FloatLiteral);
        assert_eq!(tokens[0].lexeme, "42.5");
        assert_eq!(tokens[1].kind, TokenKind::Integer);
        assert_eq!(tokens[1].lexeme, "42");
        assert_eq!(tokens[1].column(), 5);
        assert_eq!(tokens[2].kind, TokenKind::Eof);

        let src = "def @forward(%x: Tensor[(4), float32]) -> (Tensor[(4), float32],)";
        let tokens = Scanner::scan(src).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::BareIdentifier);
        assert_eq!(tokens[1].kind, TokenKind::AtIdentifier);
        assert_eq!(tokens[1].lexeme, "@forward");
        assert_eq!(tokens[3].kind, TokenKind::PercentIdentifier);
        assert_eq!(tokens[3].lexeme, "%x");
        assert_eq!(tokens[5].lexeme, "Tensor");
        assert_eq!(tokens[6].kind, TokenKind::LBracket);

        assert_eq!(
            kinds("nn.conv2d(%0, -1) -> {a = true}"),
            vec![
                TokenKind::BareIdentifier,
                TokenKind::LParen,
                TokenKind::PercentIdentifier,
                TokenKind::Comma,
                TokenKind::Minus,
                TokenKind::Integer,
                TokenKind::RParen,
                TokenKind::Arrow,
                TokenKind::LBrace,
                TokenKind::BareIdentifier,
                TokenKind::Equal,
                TokenKind::KwTrue,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_escaped_string() {
        let tokens = Scanner::scan(r#"x = "a \"quoted\" word""#).unwrap();
        assert_eq!(tokens[2].kind, TokenKind::String);
        assert_eq!(tokens[2].lexeme, r#""a \"quoted\" word""#);
        assert_eq!(tokens.len(), 4);
        assert!(Scanner::scan("\"open").is_err());
    }

    #[test]
    fn test_error_location() {
        let src = "module {\n  def @f() { $ }\n}";
        let err = Scanner::scan(src).unwrap_err().to_string();
        let lines = err.split('\n').collect::<Vec<&str>>();
        assert_eq!(lines[0], "```");
        assert_eq!(lines[1], "0  | module {");
        assert_eq!(lines[2], "1  |   def @f() { $ }");
        assert_eq!(lines[3], "                  ^ Scanning failed starting at: $");
    }
}
