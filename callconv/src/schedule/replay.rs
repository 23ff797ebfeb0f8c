//! Collaborators that replay decisions already recorded in the IR.
//!
//! The command-line driver reads modules in which a scheduler has already
//! left its results (for example a rewrite annotation on a kernel). These
//! implementations turn such a module into cache entries and artifacts
//! without optimizing anything.

use crate::cache::CompiledKernel;
use crate::cache::Placeholder;
use crate::error::bail_rewrite;
use crate::error::RewriteError;
use crate::ir::Attr;
use crate::ir::Attributes;
use crate::ir::Callee;
use crate::ir::Function;
use crate::ir::KernelArtifact;
use crate::ir::Target;
use crate::ir::PRIMITIVE;
use crate::schedule::Backend;
use crate::schedule::KernelCompiler;
use crate::schedule::PassContext;
use anyhow::Result;
use tracing::debug;

/// Compiles a function into a kernel that is the function itself.
///
/// Attributes of the function, including a rewrite annotation, end up on the
/// kernel. Inputs are the parameters and outputs are the leaves of the return
/// type.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayCompiler;

impl ReplayCompiler {
    fn kernel_name(function: &Function) -> String {
        let anchor = match function.body().as_call().map(|call| call.callee()) {
            Some(Callee::Op(name)) => name.replace('.', "_"),
            _ => "kernel".to_string(),
        };
        format!("fused_{anchor}")
    }
}

impl KernelCompiler for ReplayCompiler {
    fn compile(&self, function: &Function, target: &Target) -> Result<CompiledKernel> {
        let mut inputs = vec![];
        for param in function.params() {
            match param.typ() {
                Some(typ) => inputs.push(Placeholder::new(param.name(), typ.clone())),
                None => bail_rewrite!(RewriteError::Untyped(format!("%{}", param.name()))),
            }
        }
        let ret = match function.ret_type() {
            Some(ret) => ret,
            None => bail_rewrite!(RewriteError::Untyped(function.body().to_string())),
        };
        let outputs = ret
            .flatten()
            .into_iter()
            .enumerate()
            .map(|(i, typ)| Placeholder::new(&format!("out{i}"), typ))
            .collect::<Vec<Placeholder>>();
        let name = Self::kernel_name(function);
        debug!("Replaying {name} for {target}");
        let kernel = function.without_attr(PRIMITIVE);
        Ok(CompiledKernel {
            kernel: Some(KernelArtifact::new(&name, target.clone(), kernel)),
            inputs,
            outputs,
        })
    }
}

/// Lowers a kernel by wrapping it into an artifact for the context's target.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughBackend;

impl Backend for PassthroughBackend {
    fn pass_context(&self, target: &Target) -> PassContext {
        let config = Attributes::new().with("target", Attr::Str(target.to_string()));
        PassContext::new(target.clone(), config)
    }
    fn lower(&self, kernel: &Function, name: &str, ctx: &PassContext) -> Result<KernelArtifact> {
        debug!("Lowering @{name} under {}", ctx.target());
        Ok(KernelArtifact::new(name, ctx.target().clone(), kernel.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DType;
    use crate::ir::Expr;
    use crate::ir::Type;
    use crate::ir::Var;

    #[test]
    fn test_replay_compiler() {
        let t = Type::tensor(vec![4], DType::Float32);
        let x = Var::typed("x", t.clone());
        let body = Expr::op("nn.relu", vec![Expr::var(&x)]).with_type(t.clone());
        let f = Function::new(vec![x], body, None).with_attr(PRIMITIVE, Attr::Int(1));
        let compiled = ReplayCompiler.compile(&f, &Target::new("edgex")).unwrap();
        let kernel = compiled.kernel.unwrap();
        assert_eq!(kernel.name(), "fused_nn_relu");
        assert!(kernel.attr(PRIMITIVE).is_none());
        assert_eq!(compiled.inputs, vec![Placeholder::new("x", t.clone())]);
        assert_eq!(compiled.outputs, vec![Placeholder::new("out0", t)]);

        let untyped = Var::new("y", None);
        let g = Function::new(vec![untyped.clone()], Expr::var(&untyped), None);
        let err = ReplayCompiler.compile(&g, &Target::new("edgex")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RewriteError>(),
            Some(RewriteError::Untyped(_))
        ));
    }

    #[test]
    fn test_passthrough_backend() {
        let backend = PassthroughBackend;
        let target: Target = "edgex -mcpu=v2".parse().unwrap();
        let ctx = backend.pass_context(&target);
        assert_eq!(ctx.config().str("target"), Some("edgex -mcpu=v2"));
        let x = Var::new("x", None);
        let kernel = Function::new(vec![x.clone()], Expr::var(&x), None);
        let artifact = backend.lower(&kernel, "k0", &ctx).unwrap();
        assert_eq!(artifact.target(), &target);
        assert_eq!(artifact.kernel(), &kernel);
    }
}
