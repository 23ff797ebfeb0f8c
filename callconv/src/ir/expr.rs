use crate::ir::Attributes;
use crate::ir::DType;
use crate::ir::Function;
use crate::ir::Printer;
use crate::ir::Target;
use crate::ir::TensorType;
use crate::ir::Type;
use std::fmt::Display;
use std::fmt::Formatter;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

// Relaxed is enough: the counter only has to hand out unique values.
static VAR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A named, typed leaf.
///
/// Identity is the `id`, not the name. Two variables both printed as `%x` are
/// different variables unless they were cloned from the same [Var::new] call.
#[derive(Debug, Clone)]
pub struct Var {
    id: u64,
    name: String,
    typ: Option<Type>,
}

impl Var {
    pub fn new(name: &str, typ: Option<Type>) -> Self {
        Self {
            id: VAR_COUNTER.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            typ,
        }
    }
    pub fn typed(name: &str, typ: Type) -> Self {
        Self::new(name, Some(typ))
    }
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn typ(&self) -> Option<&Type> {
        self.typ.as_ref()
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Var {}

impl Hash for Var {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Scalar literal.
#[derive(Debug, Clone, Copy)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Constant {
    pub fn dtype(&self) -> DType {
        match self {
            Constant::Int(_) => DType::Int64,
            Constant::Float(_) => DType::Float32,
            Constant::Bool(_) => DType::Bool,
        }
    }
    pub fn typ(&self) -> Type {
        Type::Tensor(TensorType::scalar(self.dtype()))
    }
}

// Floats compare by bit pattern so that constants can be hashed.
impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constant::Int(i) => i.hash(state),
            Constant::Float(f) => f.to_bits().hash(state),
            Constant::Bool(b) => b.hash(state),
        }
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Int(i) => write!(f, "{i}"),
            Constant::Float(v) => {
                let text = v.to_string();
                if v.is_finite() && !text.contains('.') {
                    write!(f, "{text}.0")
                } else {
                    write!(f, "{text}")
                }
            }
            Constant::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Reference to a module-level symbol.
///
/// Symbols are identified by name; the type is the signature the call site
/// expects and is not part of the identity.
#[derive(Debug, Clone)]
pub struct GlobalVar {
    name: String,
    typ: Option<Type>,
}

impl GlobalVar {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            typ: None,
        }
    }
    pub fn with_type(&self, typ: Type) -> Self {
        Self {
            name: self.name.clone(),
            typ: Some(typ),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn typ(&self) -> Option<&Type> {
        self.typ.as_ref()
    }
}

impl PartialEq for GlobalVar {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for GlobalVar {}

impl Hash for GlobalVar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callee {
    /// Primitive operator such as `add` or `layout_transform`.
    Op(String),
    /// Function defined in the module.
    Global(GlobalVar),
    /// Kernel that is (or will be) compiled outside of this IR.
    Lowered(GlobalVar),
    /// Function literal.
    Function(Function),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Call {
    callee: Callee,
    args: Vec<Expr>,
    attrs: Attributes,
    target: Option<Target>,
}

impl Call {
    pub fn new(callee: Callee, args: Vec<Expr>) -> Self {
        Self {
            callee,
            args,
            attrs: Attributes::new(),
            target: None,
        }
    }
    pub fn callee(&self) -> &Callee {
        &self.callee
    }
    pub fn args(&self) -> &[Expr] {
        &self.args
    }
    /// Call attributes; on lowered calls these hold the scheduling metadata.
    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }
    /// Target chosen for this call by device planning, if any.
    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }
    pub fn with_callee(&self, callee: Callee) -> Self {
        Self {
            callee,
            ..self.clone()
        }
    }
    pub fn with_args(&self, args: Vec<Expr>) -> Self {
        Self {
            args,
            ..self.clone()
        }
    }
    pub fn with_attrs(&self, attrs: Attributes) -> Self {
        Self {
            attrs,
            ..self.clone()
        }
    }
    pub fn with_target(&self, target: Target) -> Self {
        Self {
            target: Some(target),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprKind {
    Var(Var),
    Constant(Constant),
    Tuple(Vec<Expr>),
    Call(Call),
    Function(Function),
}

#[derive(Debug)]
struct ExprNode {
    kind: ExprKind,
    checked_type: Option<Type>,
}

/// Immutable, cheaply cloneable expression.
///
/// Equality and hashing are structural over [ExprKind] and ignore the checked
/// type, so a re-typed copy of an expression still equals the original.
#[derive(Debug, Clone)]
pub struct Expr(Arc<ExprNode>);

impl Expr {
    pub fn new(kind: ExprKind, checked_type: Option<Type>) -> Self {
        Expr(Arc::new(ExprNode { kind, checked_type }))
    }
    pub fn var(var: &Var) -> Self {
        let typ = var.typ().cloned();
        Self::new(ExprKind::Var(var.clone()), typ)
    }
    pub fn constant(constant: Constant) -> Self {
        Self::new(ExprKind::Constant(constant), Some(constant.typ()))
    }
    pub fn tuple(fields: Vec<Expr>) -> Self {
        let types = fields
            .iter()
            .map(|f| f.checked_type().cloned())
            .collect::<Option<Vec<Type>>>();
        Self::new(ExprKind::Tuple(fields), types.map(Type::Tuple))
    }
    /// Call without a checked type; attach one with [Expr::with_type].
    pub fn call(call: Call) -> Self {
        Self::new(ExprKind::Call(call), None)
    }
    /// Call of the primitive operator `name`.
    pub fn op(name: &str, args: Vec<Expr>) -> Self {
        Self::call(Call::new(Callee::Op(name.to_string()), args))
    }
    pub fn function(function: Function) -> Self {
        let typ = function.func_type().map(Type::Func);
        Self::new(ExprKind::Function(function), typ)
    }
    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }
    pub fn checked_type(&self) -> Option<&Type> {
        self.0.checked_type.as_ref()
    }
    /// Copy of this node with `typ` attached.
    pub fn with_type(&self, typ: Type) -> Self {
        Self::new(self.0.kind.clone(), Some(typ))
    }
    /// Whether this is a variable or a constant.
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind(), ExprKind::Var(_) | ExprKind::Constant(_))
    }
    pub fn as_var(&self) -> Option<&Var> {
        match self.kind() {
            ExprKind::Var(v) => Some(v),
            _ => None,
        }
    }
    pub fn as_tuple(&self) -> Option<&[Expr]> {
        match self.kind() {
            ExprKind::Tuple(fields) => Some(fields),
            _ => None,
        }
    }
    pub fn as_call(&self) -> Option<&Call> {
        match self.kind() {
            ExprKind::Call(call) => Some(call),
            _ => None,
        }
    }
    pub fn as_function(&self) -> Option<&Function> {
        match self.kind() {
            ExprKind::Function(f) => Some(f),
            _ => None,
        }
    }
    /// Whether both handles point at the same node.
    pub fn same_as(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other) || self.kind() == other.kind()
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
    }
}

impl From<Var> for Expr {
    fn from(var: Var) -> Self {
        Expr::var(&var)
    }
}

impl From<Constant> for Expr {
    fn from(constant: Constant) -> Self {
        Expr::constant(constant)
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = Printer::new().expr(self, 0);
        write!(f, "{text}")
    }
}
