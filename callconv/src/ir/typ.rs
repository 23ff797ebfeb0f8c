use std::fmt::Display;
use std::fmt::Formatter;
use std::str::FromStr;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    Float16,
    Float32,
    Float64,
}

impl DType {
    pub fn name(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::Float16 => "float16",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }
}

impl FromStr for DType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dtype = match s {
            "bool" => DType::Bool,
            "int8" => DType::Int8,
            "int16" => DType::Int16,
            "int32" => DType::Int32,
            "int64" => DType::Int64,
            "uint8" => DType::UInt8,
            "float16" => DType::Float16,
            "float32" => DType::Float32,
            "float64" => DType::Float64,
            _ => return Err(anyhow::anyhow!("Unknown dtype: {s}")),
        };
        Ok(dtype)
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A tensor with a static shape, printed as `Tensor[(4, 4), float32]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    shape: Vec<i64>,
    dtype: DType,
}

impl TensorType {
    pub fn new(shape: Vec<i64>, dtype: DType) -> Self {
        Self { shape, dtype }
    }
    pub fn scalar(dtype: DType) -> Self {
        Self::new(vec![], dtype)
    }
    pub fn shape(&self) -> &[i64] {
        &self.shape
    }
    pub fn dtype(&self) -> DType {
        self.dtype
    }
}

impl Display for TensorType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let dims = self
            .shape
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "Tensor[({dims}), {}]", self.dtype)
    }
}

/// Signature of a function: ordered argument types and a return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncType {
    args: Vec<Type>,
    ret: Box<Type>,
}

impl FuncType {
    pub fn new(args: Vec<Type>, ret: Type) -> Self {
        Self {
            args,
            ret: Box::new(ret),
        }
    }
    pub fn args(&self) -> &[Type] {
        &self.args
    }
    pub fn ret(&self) -> &Type {
        &self.ret
    }
}

impl Display for FuncType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn ({}) -> {}", join(&self.args), self.ret)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Tensor(TensorType),
    Tuple(Vec<Type>),
    Func(FuncType),
}

impl Type {
    pub fn tensor(shape: Vec<i64>, dtype: DType) -> Self {
        Type::Tensor(TensorType::new(shape, dtype))
    }
    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(t) => Some(t),
            _ => None,
        }
    }
    pub fn as_tuple(&self) -> Option<&[Type]> {
        match self {
            Type::Tuple(fields) => Some(fields),
            _ => None,
        }
    }
    /// Leaf types of this type with nested tuples flattened.
    ///
    /// A kernel receives one buffer per leaf, so the length of this vector is
    /// the number of output buffers a call with this result type writes.
    pub fn flatten(&self) -> Vec<Type> {
        match self {
            Type::Tuple(fields) => fields.iter().flat_map(|t| t.flatten()).collect(),
            other => vec![other.clone()],
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Tensor(t) => write!(f, "{t}"),
            Type::Tuple(fields) if fields.len() == 1 => write!(f, "({},)", fields[0]),
            Type::Tuple(fields) => write!(f, "({})", join(fields)),
            Type::Func(func) => write!(f, "{func}"),
        }
    }
}

fn join(types: &[Type]) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<String>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten() {
        let t = Type::tensor(vec![4], DType::Float32);
        let nested = Type::Tuple(vec![t.clone(), Type::Tuple(vec![t.clone(), t.clone()])]);
        assert_eq!(nested.flatten().len(), 3);
        assert_eq!(t.flatten(), vec![t.clone()]);
        assert_eq!(Type::Tuple(vec![]).flatten().len(), 0);
    }

    #[test]
    fn test_display() {
        let t = Type::tensor(vec![4, 4], DType::Float32);
        assert_eq!(t.to_string(), "Tensor[(4, 4), float32]");
        let s = Type::Tensor(TensorType::scalar(DType::Int32));
        assert_eq!(s.to_string(), "Tensor[(), int32]");
        let tup = Type::Tuple(vec![t.clone(), s.clone()]);
        assert_eq!(tup.to_string(), "(Tensor[(4, 4), float32], Tensor[(), int32])");
        let one = Type::Tuple(vec![s]);
        assert_eq!(one.to_string(), "(Tensor[(), int32],)");
    }
}
