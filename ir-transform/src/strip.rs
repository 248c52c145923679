use weld_ir::{
    function::Function,
    module::Module,
    pass::{FunctionPass, PassExecutionState, PassResult},
    symbol::Symbol,
    types::TypeInterner,
    CoreError, Linkage,
};

/// Anonymizes a function's name.
///
/// This IR has no per-value name table to begin with — every [weld_ir::Value] is already referred
/// to purely by its numeric handle, never by a string — so the only symbol table left to strip is
/// the function's own name. Types and constants were never named in the first place and are
/// unaffected, matching the "retained as anonymous entries" clause.
#[derive(Default)]
pub struct Strip;

impl FunctionPass for Strip {
    fn name(&self) -> &'static str {
        "strip"
    }

    fn preserves_cfg(&self) -> bool {
        true
    }

    fn run(
        &mut self,
        func: &mut Function,
        _types: &TypeInterner,
        state: &mut PassExecutionState<'_>,
    ) -> Result<PassResult, CoreError> {
        let anonymous: Symbol = "".into();
        if func.name == anonymous {
            return Ok(PassResult::Unchanged);
        }
        func.name = anonymous;
        state.statistics_mut().bump("strip.renamed");
        Ok(PassResult::Changed)
    }
}

/// If the module defines a function named `main`, marks every other function's linkage as
/// [Linkage::Internal]. Operates on a whole [Module] rather than one
/// [Function] at a time, so it is a free function rather than a [FunctionPass].
///
/// A missing `main` leaves the module untouched: without it there is no fixed entry point, so
/// nothing can be proven dead to external callers.
pub fn internalize(module: &mut Module) -> bool {
    let Some(main) = module.func_by_name("main") else { return false };
    let mut changed = false;
    for (func_ref, func) in module.functions_mut() {
        if func_ref == main || func.is_external() {
            continue;
        }
        if func.linkage != Linkage::Internal {
            func.linkage = Linkage::Internal;
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use weld_ir::types::TypeInterner;

    use super::*;
    use crate::test_util::run_pass;

    #[test]
    fn strips_a_functions_name() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let mut f = Function::new("widget_init", i32ty);
        f.append_block();

        let result = run_pass(&mut Strip, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Changed);
        assert_eq!(f.name, Symbol::from(""));
    }

    #[test]
    fn internalizes_every_function_but_main() {
        let mut module = Module::new("m");
        let i32ty = module.types.i32();
        let sig = i32ty;
        let main = module.declare_function("main", sig);
        let helper = module.declare_function("helper", sig);
        let extern_fn = module.declare_function("memcpy", sig);
        module.func_mut(main).append_block();
        module.func_mut(helper).append_block();
        // extern_fn is left with no blocks: an external declaration.

        let changed = internalize(&mut module);
        assert!(changed);
        assert_eq!(module.func(main).linkage, Linkage::External);
        assert_eq!(module.func(helper).linkage, Linkage::Internal);
        assert_eq!(module.func(extern_fn).linkage, Linkage::External);
    }

    #[test]
    fn leaves_the_module_alone_without_a_main() {
        let mut module = Module::new("m");
        let i32ty = module.types.i32();
        let helper = module.declare_function("helper", i32ty);
        module.func_mut(helper).append_block();

        let changed = internalize(&mut module);
        assert!(!changed);
        assert_eq!(module.func(helper).linkage, Linkage::External);
    }
}
