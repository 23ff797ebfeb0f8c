use crate::ir::spaces;
use crate::ir::Callee;
use crate::ir::Definition;
use crate::ir::Expr;
use crate::ir::ExprKind;
use crate::ir::Function;
use crate::ir::Module;
use crate::ir::Target;
use crate::ir::Var;
use std::collections::HashMap;

/// Renders IR in the textual format understood by [crate::parser::Parser].
///
/// In canonical mode variables are numbered `%0, %1, ...` in order of first
/// occurrence instead of being printed by name. The schedule cache uses the
/// canonical text of a function as its structural key.
pub struct Printer {
    canonical: bool,
    names: HashMap<u64, String>,
}

impl Printer {
    pub fn new() -> Self {
        Self {
            canonical: false,
            names: HashMap::new(),
        }
    }
    pub fn canonical() -> Self {
        Self {
            canonical: true,
            names: HashMap::new(),
        }
    }
    fn var(&mut self, var: &Var) -> String {
        if !self.canonical {
            return format!("%{}", var.name());
        }
        let next = self.names.len();
        self.names
            .entry(var.id())
            .or_insert_with(|| format!("%{next}"))
            .clone()
    }
    fn param(&mut self, var: &Var) -> String {
        let name = self.var(var);
        match var.typ() {
            Some(typ) => format!("{name}: {typ}"),
            None => name,
        }
    }
    fn args(&mut self, args: &[Expr], indent: i32) -> String {
        args.iter()
            .map(|a| self.expr(a, indent))
            .collect::<Vec<String>>()
            .join(", ")
    }
    pub fn expr(&mut self, expr: &Expr, indent: i32) -> String {
        match expr.kind() {
            ExprKind::Var(var) => self.var(var),
            ExprKind::Constant(constant) => constant.to_string(),
            ExprKind::Tuple(fields) if fields.len() == 1 => {
                format!("({},)", self.expr(&fields[0], indent))
            }
            ExprKind::Tuple(fields) => format!("({})", self.args(fields, indent)),
            ExprKind::Function(function) => self.function("fn", None, function, None, indent),
            ExprKind::Call(call) => {
                let mut text = match call.callee() {
                    Callee::Op(name) => format!("{name}({})", self.args(call.args(), indent)),
                    Callee::Global(gv) => {
                        format!("@{}({})", gv.name(), self.args(call.args(), indent))
                    }
                    Callee::Lowered(gv) => {
                        let mut text = format!("call_lowered(@{}", gv.name());
                        for arg in call.args() {
                            text.push_str(&format!(", {}", self.expr(arg, indent)));
                        }
                        text.push(')');
                        text
                    }
                    Callee::Function(function) => {
                        let callee = self.function("fn", None, function, None, indent);
                        format!("{callee}({})", self.args(call.args(), indent))
                    }
                };
                if !call.attrs().is_empty() {
                    text.push_str(&format!(" attributes {}", call.attrs()));
                }
                if let Some(target) = call.target() {
                    text.push_str(&format!(" on \"{target}\""));
                }
                // The type of a function literal call follows from the literal.
                let inferable = matches!(call.callee(), Callee::Function(_));
                if let (false, Some(typ)) = (inferable, expr.checked_type()) {
                    text.push_str(&format!(" : {typ}"));
                }
                text
            }
        }
    }
    /// Print `keyword [@name](params) [-> ret] [attributes {..}] [on "target"] { body }`.
    pub fn function(
        &mut self,
        keyword: &str,
        name: Option<&str>,
        function: &Function,
        target: Option<&Target>,
        indent: i32,
    ) -> String {
        let params = function
            .params()
            .iter()
            .map(|p| self.param(p))
            .collect::<Vec<String>>()
            .join(", ");
        let mut text = match name {
            Some(name) => format!("{keyword} @{name}({params})"),
            None => format!("{keyword} ({params})"),
        };
        if let Some(ret) = function.declared_ret_type() {
            text.push_str(&format!(" -> {ret}"));
        }
        if !function.attrs().is_empty() {
            text.push_str(&format!(" attributes {}", function.attrs()));
        }
        if let Some(target) = target {
            text.push_str(&format!(" on \"{target}\""));
        }
        let body = self.expr(function.body(), indent + 1);
        text.push_str(&format!(
            " {{\n{}{body}\n{}}}",
            spaces(indent + 1),
            spaces(indent)
        ));
        text
    }
    pub fn definition(&mut self, name: &str, definition: &Definition, indent: i32) -> String {
        match definition {
            Definition::Function(f) => self.function("def", Some(name), f, None, indent),
            Definition::Kernel(f) => self.function("kernel", Some(name), f, None, indent),
            Definition::Artifact(artifact) => self.function(
                "artifact",
                Some(name),
                artifact.kernel(),
                Some(artifact.target()),
                indent,
            ),
        }
    }
    pub fn module(&mut self, module: &Module) -> String {
        let mut text = String::from("module {\n");
        for (name, definition) in module.iter() {
            text.push_str(&spaces(1));
            text.push_str(&self.definition(name, definition, 1));
            text.push('\n');
        }
        text.push('}');
        text
    }
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}
