use crate::ir::Attr;
use crate::ir::Attributes;
use crate::ir::Expr;
use crate::ir::FuncType;
use crate::ir::Printer;
use crate::ir::Type;
use crate::ir::Var;
use std::fmt::Display;
use std::fmt::Formatter;

/// A function value: parameters, body, declared return type and attributes.
///
/// Functions are never mutated in place. The `with_*` and `without_*` methods
/// build a new value that shares the unchanged parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Function {
    params: Vec<Var>,
    body: Expr,
    ret_type: Option<Type>,
    attrs: Attributes,
}

impl Function {
    pub fn new(params: Vec<Var>, body: Expr, ret_type: Option<Type>) -> Self {
        Self {
            params,
            body,
            ret_type,
            attrs: Attributes::new(),
        }
    }
    pub fn params(&self) -> &[Var] {
        &self.params
    }
    pub fn body(&self) -> &Expr {
        &self.body
    }
    /// Declared return type, falling back to the checked type of the body.
    pub fn ret_type(&self) -> Option<&Type> {
        self.ret_type.as_ref().or(self.body.checked_type())
    }
    pub fn declared_ret_type(&self) -> Option<&Type> {
        self.ret_type.as_ref()
    }
    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }
    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.get(name)
    }
    pub fn func_type(&self) -> Option<FuncType> {
        let args = self
            .params
            .iter()
            .map(|p| p.typ().cloned())
            .collect::<Option<Vec<Type>>>()?;
        let ret = self.ret_type()?.clone();
        Some(FuncType::new(args, ret))
    }
    pub fn with_attr(&self, name: &str, attr: Attr) -> Self {
        Self {
            attrs: self.attrs.with(name, attr),
            ..self.clone()
        }
    }
    pub fn without_attr(&self, name: &str) -> Self {
        Self {
            attrs: self.attrs.without(name),
            ..self.clone()
        }
    }
    pub fn with_attrs(&self, attrs: Attributes) -> Self {
        Self {
            attrs,
            ..self.clone()
        }
    }
    pub fn with_params(&self, params: Vec<Var>) -> Self {
        Self {
            params,
            ..self.clone()
        }
    }
    pub fn with_body(&self, body: Expr) -> Self {
        Self {
            body,
            ..self.clone()
        }
    }
    /// Canonical text of this function with variables numbered by first
    /// occurrence.
    ///
    /// Two functions that differ only in variable identities or names have
    /// the same fingerprint.
    pub fn fingerprint(&self) -> String {
        Printer::canonical().function("fn", None, self, None, 0)
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = Printer::new().function("fn", None, self, None, 0);
        write!(f, "{text}")
    }
}
