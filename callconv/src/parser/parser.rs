use crate::ir::unescape;
use crate::ir::Attr;
use crate::ir::Attributes;
use crate::ir::Call;
use crate::ir::Callee;
use crate::ir::Constant;
use crate::ir::DType;
use crate::ir::Definition;
use crate::ir::Expr;
use crate::ir::FuncType;
use crate::ir::Function;
use crate::ir::GlobalVar;
use crate::ir::KernelArtifact;
use crate::ir::Module;
use crate::ir::Target;
use crate::ir::Type;
use crate::ir::Var;
use crate::parser::scanner::Scanner;
use crate::parser::token::Token;
use crate::parser::token::TokenKind;
use anyhow::Result;
use std::collections::HashMap;

/// Parser for the textual IR.
///
/// ```text
/// module {
///   def @main(%a: Tensor[(4), float32]) -> Tensor[(4), float32] {
///     fn (%x: Tensor[(4), float32]) -> Tensor[(4), float32] attributes {Primitive = 1} {
///       negative(%x) : Tensor[(4), float32]
///     }(%a)
///   }
/// }
/// ```
///
/// Top-level items are `def` (function), `kernel` (unlowered kernel) and
/// `artifact` (compiled kernel, with an `on "<target>"` clause). Calls of
/// operators, globals (`@f(..)`) and lowered kernels (`call_lowered(@k, ..)`)
/// may carry `attributes {..}`, a placement `on "<target>"` and a type
/// annotation `: <type>`.
pub struct Parser {
    src: String,
    tokens: Vec<Token>,
    current: usize,
    scopes: Vec<HashMap<String, Var>>,
}

impl Parser {
    fn new(src: &str) -> Result<Self> {
        Ok(Parser {
            src: src.to_string(),
            tokens: Scanner::scan(src)?,
            current: 0,
            scopes: vec![],
        })
    }
    pub fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }
    pub fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }
    pub fn peek(&self) -> &Token {
        self.peek_n(0)
    }
    pub fn peek_n(&self, n: usize) -> &Token {
        // The token stream always ends with Eof.
        let last = self.tokens.len() - 1;
        &self.tokens[(self.current + n).min(last)]
    }
    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }
    pub fn check(&self, kind: TokenKind) -> bool {
        if self.is_at_end() {
            return false;
        }
        self.peek().kind == kind
    }
    fn check_word(&self, word: &str) -> bool {
        self.check(TokenKind::BareIdentifier) && self.peek().lexeme == word
    }
    pub fn error(&self, token: &Token, msg: &str) -> String {
        let msg = Scanner::error(&self.src, &token.location, msg);
        format!("\n\n{msg}\n")
    }
    pub fn report_token_error(&self, token: &Token, expected: TokenKind) -> Result<Token> {
        let msg = format!(
            "Expected {:?}, but got \"{}\" of kind {:?}",
            expected, token.lexeme, token.kind
        );
        Err(anyhow::anyhow!(self.error(token, &msg)))
    }
    pub fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.check(kind) {
            self.advance();
            Ok(self.previous().clone())
        } else {
            self.report_token_error(self.peek(), kind)
        }
    }
    fn lookup(&self, name: &str) -> Option<Var> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .cloned()
    }

    /// Parse a module; the `module { .. }` wrapper is optional.
    pub fn parse(src: &str) -> Result<Module> {
        let mut parser = Parser::new(src)?;
        let wrapped = parser.check_word("module");
        if wrapped {
            parser.advance();
            parser.expect(TokenKind::LBrace)?;
        }
        let mut module = Module::new();
        while !parser.is_at_end() && !parser.check(TokenKind::RBrace) {
            let (name, definition) = parser.definition()?;
            module.add(&name, definition)?;
        }
        if wrapped {
            parser.expect(TokenKind::RBrace)?;
        }
        if !parser.is_at_end() {
            let token = parser.peek().clone();
            return Err(anyhow::anyhow!(parser.error(&token, "Expected end of input")));
        }
        Ok(module)
    }
    fn definition(&mut self) -> Result<(String, Definition)> {
        let keyword = self.expect(TokenKind::BareIdentifier)?;
        let name = self.expect(TokenKind::AtIdentifier)?;
        let name = name.lexeme.trim_start_matches('@').to_string();
        let definition = match keyword.lexeme.as_str() {
            "def" => Definition::Function(self.function_rest()?),
            "kernel" => Definition::Kernel(self.function_rest()?),
            "artifact" => {
                let (function, target) = self.function_with_target()?;
                let target = match target {
                    Some(target) => target,
                    None => {
                        let msg = "Expected `on \"<target>\"` for artifact";
                        return Err(anyhow::anyhow!(self.error(&keyword, msg)));
                    }
                };
                Definition::Artifact(KernelArtifact::new(&name, target, function))
            }
            _ => {
                let msg = "Expected `def`, `kernel` or `artifact`";
                return Err(anyhow::anyhow!(self.error(&keyword, msg)));
            }
        };
        Ok((name, definition))
    }
    fn function_rest(&mut self) -> Result<Function> {
        let (function, target) = self.function_with_target()?;
        if target.is_some() {
            let token = self.previous().clone();
            return Err(anyhow::anyhow!(self.error(&token, "Unexpected target")));
        }
        Ok(function)
    }
    /// Parse `(params) [-> type] [attributes {..}] [on "target"] { body }`.
    fn function_with_target(&mut self) -> Result<(Function, Option<Target>)> {
        self.expect(TokenKind::LParen)?;
        let mut scope = HashMap::new();
        let mut params = vec![];
        while !self.check(TokenKind::RParen) {
            let name = self.expect(TokenKind::PercentIdentifier)?;
            let typ = if self.check(TokenKind::Colon) {
                self.advance();
                Some(self.typ()?)
            } else {
                None
            };
            let var = Var::new(name.lexeme.trim_start_matches('%'), typ);
            scope.insert(name.lexeme.clone(), var.clone());
            params.push(var);
            if !self.check(TokenKind::RParen) {
                self.expect(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::RParen)?;
        let ret_type = if self.check(TokenKind::Arrow) {
            self.advance();
            Some(self.typ()?)
        } else {
            None
        };
        let attrs = self.optional_attributes()?;
        let target = self.optional_target()?;
        self.expect(TokenKind::LBrace)?;
        self.scopes.push(scope);
        let body = self.expr();
        self.scopes.pop();
        let body = body?;
        self.expect(TokenKind::RBrace)?;
        let function = Function::new(params, body, ret_type).with_attrs(attrs);
        Ok((function, target))
    }

    pub fn typ(&mut self) -> Result<Type> {
        if self.check_word("Tensor") {
            self.advance();
            self.expect(TokenKind::LBracket)?;
            self.expect(TokenKind::LParen)?;
            let mut shape = vec![];
            while !self.check(TokenKind::RParen) {
                let dim = self.expect(TokenKind::Integer)?;
                shape.push(self.integer(&dim)?);
                if !self.check(TokenKind::RParen) {
                    self.expect(TokenKind::Comma)?;
                }
            }
            self.expect(TokenKind::RParen)?;
            self.expect(TokenKind::Comma)?;
            let dtype = self.expect(TokenKind::BareIdentifier)?;
            let dtype = match dtype.lexeme.parse::<DType>() {
                Ok(dtype) => dtype,
                Err(e) => return Err(anyhow::anyhow!(self.error(&dtype, &e.to_string()))),
            };
            self.expect(TokenKind::RBracket)?;
            return Ok(Type::tensor(shape, dtype));
        }
        if self.check_word("fn") {
            self.advance();
            let args = self.type_list()?;
            self.expect(TokenKind::Arrow)?;
            let ret = self.typ()?;
            return Ok(Type::Func(FuncType::new(args, ret)));
        }
        if self.check(TokenKind::LParen) {
            return Ok(Type::Tuple(self.type_list()?));
        }
        let token = self.peek().clone();
        Err(anyhow::anyhow!(self.error(&token, "Expected a type")))
    }
    fn type_list(&mut self) -> Result<Vec<Type>> {
        self.expect(TokenKind::LParen)?;
        let mut types = vec![];
        while !self.check(TokenKind::RParen) {
            types.push(self.typ()?);
            if !self.check(TokenKind::RParen) {
                self.expect(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(types)
    }
    fn integer(&self, token: &Token) -> Result<i64> {
        match token.lexeme.parse::<i64>() {
            Ok(i) => Ok(i),
            Err(e) => Err(anyhow::anyhow!(self.error(token, &e.to_string()))),
        }
    }

    fn optional_attributes(&mut self) -> Result<Attributes> {
        if !self.check_word("attributes") {
            return Ok(Attributes::new());
        }
        self.advance();
        self.attributes()
    }
    /// Parse `{name = value, ..}`.
    pub fn attributes(&mut self) -> Result<Attributes> {
        let mut attributes = Attributes::new();
        self.expect(TokenKind::LBrace)?;
        while !self.check(TokenKind::RBrace) {
            let name = self.expect(TokenKind::BareIdentifier)?;
            self.expect(TokenKind::Equal)?;
            let value = self.attribute()?;
            attributes.insert(&name.lexeme, value);
            if !self.check(TokenKind::RBrace) {
                self.expect(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(attributes)
    }
    fn attribute(&mut self) -> Result<Attr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Integer => {
                self.advance();
                Ok(Attr::Int(self.integer(&token)?))
            }
            TokenKind::Minus => {
                self.advance();
                let token = self.expect(TokenKind::Integer)?;
                Ok(Attr::Int(-self.integer(&token)?))
            }
            TokenKind::KwTrue | TokenKind::KwFalse => {
                self.advance();
                Ok(Attr::Bool(token.kind == TokenKind::KwTrue))
            }
            TokenKind::String => {
                self.advance();
                Ok(Attr::Str(string_value(&token)))
            }
            TokenKind::LBrace => Ok(Attr::Dict(self.attributes()?)),
            _ => Err(anyhow::anyhow!(self.error(&token, "Expected an attribute value"))),
        }
    }
    fn optional_target(&mut self) -> Result<Option<Target>> {
        if !self.check_word("on") {
            return Ok(None);
        }
        self.advance();
        let token = self.expect(TokenKind::String)?;
        match string_value(&token).parse::<Target>() {
            Ok(target) => Ok(Some(target)),
            Err(e) => Err(anyhow::anyhow!(self.error(&token, &e.to_string()))),
        }
    }

    pub fn expr(&mut self) -> Result<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::PercentIdentifier => {
                self.advance();
                match self.lookup(&token.lexeme) {
                    Some(var) => Ok(Expr::var(&var)),
                    None => {
                        let msg = "Expected variable to be bound before use.";
                        Err(anyhow::anyhow!(self.error(&token, msg)))
                    }
                }
            }
            TokenKind::Integer | TokenKind::FloatLiteral | TokenKind::Minus => self.constant(false),
            TokenKind::KwTrue | TokenKind::KwFalse => {
                self.advance();
                let value = token.kind == TokenKind::KwTrue;
                Ok(Expr::constant(Constant::Bool(value)))
            }
            TokenKind::LParen => self.tuple(),
            TokenKind::AtIdentifier => {
                self.advance();
                let gv = GlobalVar::new(token.lexeme.trim_start_matches('@'));
                let args = self.args()?;
                self.call_rest(Call::new(Callee::Global(gv), args))
            }
            TokenKind::BareIdentifier if token.lexeme == "fn" => {
                self.advance();
                let function = self.function_rest()?;
                if !self.check(TokenKind::LParen) {
                    return Ok(Expr::function(function));
                }
                let args = self.args()?;
                self.call_rest(Call::new(Callee::Function(function), args))
            }
            TokenKind::BareIdentifier if token.lexeme == "call_lowered" => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let gv = self.expect(TokenKind::AtIdentifier)?;
                let gv = GlobalVar::new(gv.lexeme.trim_start_matches('@'));
                let mut args = vec![];
                while self.check(TokenKind::Comma) {
                    self.advance();
                    args.push(self.expr()?);
                }
                self.expect(TokenKind::RParen)?;
                self.call_rest(Call::new(Callee::Lowered(gv), args))
            }
            TokenKind::BareIdentifier => {
                self.advance();
                let args = self.args()?;
                self.call_rest(Call::new(Callee::Op(token.lexeme.clone()), args))
            }
            _ => Err(anyhow::anyhow!(self.error(&token, "Expected an expression"))),
        }
    }
    fn constant(&mut self, negative: bool) -> Result<Expr> {
        let token = self.advance().clone();
        let constant = match token.kind {
            TokenKind::Minus if !negative => return self.constant(true),
            TokenKind::Integer => {
                let value = self.integer(&token)?;
                Constant::Int(if negative { -value } else { value })
            }
            TokenKind::FloatLiteral => match token.lexeme.parse::<f64>() {
                Ok(value) => Constant::Float(if negative { -value } else { value }),
                Err(e) => return Err(anyhow::anyhow!(self.error(&token, &e.to_string()))),
            },
            _ => return Err(anyhow::anyhow!(self.error(&token, "Expected a number"))),
        };
        Ok(Expr::constant(constant))
    }
    /// Parse `()`, `(a,)`, `(a, b)` or the parenthesized expression `(a)`.
    fn tuple(&mut self) -> Result<Expr> {
        self.expect(TokenKind::LParen)?;
        let mut fields = vec![];
        let mut trailing_comma = false;
        while !self.check(TokenKind::RParen) {
            fields.push(self.expr()?);
            trailing_comma = false;
            if !self.check(TokenKind::RParen) {
                self.expect(TokenKind::Comma)?;
                trailing_comma = true;
            }
        }
        self.expect(TokenKind::RParen)?;
        if fields.len() == 1 && !trailing_comma {
            return Ok(fields.remove(0));
        }
        Ok(Expr::tuple(fields))
    }
    fn args(&mut self) -> Result<Vec<Expr>> {
        self.expect(TokenKind::LParen)?;
        let mut args = vec![];
        while !self.check(TokenKind::RParen) {
            args.push(self.expr()?);
            if !self.check(TokenKind::RParen) {
                self.expect(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }
    fn call_rest(&mut self, call: Call) -> Result<Expr> {
        let attrs = self.optional_attributes()?;
        let mut call = call.with_attrs(attrs);
        if let Some(target) = self.optional_target()? {
            call = call.with_target(target);
        }
        let annotated = if self.check(TokenKind::Colon) {
            self.advance();
            Some(self.typ()?)
        } else {
            None
        };
        let inferred = match call.callee() {
            Callee::Function(f) => f.ret_type().cloned(),
            _ => None,
        };
        let expr = Expr::call(call);
        Ok(match annotated.or(inferred) {
            Some(typ) => expr.with_type(typ),
            None => expr,
        })
    }
}

fn string_value(token: &Token) -> String {
    let text = token.lexeme.as_str();
    let text = text.strip_prefix('"').unwrap_or(text);
    let text = text.strip_suffix('"').unwrap_or(text);
    unescape(text)
}
