// Post-check rewrites and the missed-copy safety net.
//
// Whatever the checkers found, later stages still need structurally valid IR, so every
// leftover implicit copy of a move-only value becomes an explicit one. Each rewrite
// reports the instructions it inserted and removed.

use crate::debug_println;
use crate::diagnostics::{DiagnosticEmitter, DiagnosticKind};
use crate::ir::{Function, InstId, InstKind, Linkage, ValueDef};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RewriteResult {
    pub inserted: Vec<InstId>,
    pub removed: Vec<InstId>,
}

impl RewriteResult {
    pub fn made_change(&self) -> bool {
        !self.inserted.is_empty() || !self.removed.is_empty()
    }
}

fn move_only_copies(function: &Function) -> Vec<InstId> {
    function
        .instructions()
        .into_iter()
        .filter(|id| match function.inst(*id).kind {
            InstKind::CopyValue { operand, .. } => function.value(operand).ty.move_only,
            _ => false,
        })
        .collect()
}

/// Report every implicit copy of a move-only value. Only meaningful when the checkers
/// reported nothing: any such copy means a checker failed to see it.
pub fn missed_copy_audit(function: &Function, emitter: &mut DiagnosticEmitter) -> usize {
    let copies = move_only_copies(function);
    for id in &copies {
        let inst = function.inst(*id);
        if let InstKind::CopyValue { operand, .. } = inst.kind {
            debug_println!("CLEANUP: Checker missed copy of '{}' at {}", function.value(operand).name, inst.loc);
            emitter.emit(function, DiagnosticKind::CheckerMissedCopy, inst.loc, operand);
        }
    }
    copies.len()
}

/// Rewrite implicit copies of move-only values into explicit copies.
pub fn cleanup_copies(function: &mut Function) -> RewriteResult {
    let mut result = RewriteResult::default();
    for id in move_only_copies(function) {
        let inst = function.inst(id);
        let InstKind::CopyValue { result: copy, operand } = inst.kind else {
            continue;
        };
        let loc = inst.loc;
        let explicit = function.insert_inst_before(id, InstKind::ExplicitCopyValue { result: copy, operand }, loc);
        function.set_value_def(copy, ValueDef::Inst(explicit));
        function.erase_inst(id);
        debug_println!("CLEANUP: Copy of '{}' at {} is now explicit", function.value(operand).name, loc);
        result.inserted.push(explicit);
        result.removed.push(id);
    }
    result
}

/// Drop the body of a function nobody can call. Shared functions become private since
/// the remaining declaration must not be merged with copies elsewhere.
pub fn delete_dead_function(function: &mut Function) {
    debug_println!("CLEANUP: Deleting unused body of '{}'", function.name);
    function.replace_body_with_unreachable();
    if function.linkage == Linkage::Shared {
        function.linkage = Linkage::Private;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArgConvention, FunctionBuilder, Type};

    #[test]
    fn test_copies_become_explicit() {
        let mut b = FunctionBuilder::new("f");
        let file = b.argument("x", Type::leaf("File", true), ArgConvention::Guaranteed);
        let int = b.argument("n", Type::leaf("Int", false), ArgConvention::Guaranteed);
        let copy = b.copy_value(file);
        let plain = b.copy_value(int);
        b.destroy_value(copy);
        b.destroy_value(plain);
        b.ret(None);
        let mut function = b.finish();

        let mut emitter = DiagnosticEmitter::new();
        assert_eq!(missed_copy_audit(&function, &mut emitter), 1);
        assert_eq!(emitter.diagnostics()[0].kind, DiagnosticKind::CheckerMissedCopy);

        let rewrite = cleanup_copies(&mut function);
        assert_eq!(rewrite.inserted.len(), 1);
        assert_eq!(rewrite.removed.len(), 1);
        let def = function.defining_inst(copy).unwrap();
        assert_eq!(def, rewrite.inserted[0]);
        assert!(matches!(function.inst(def).kind, InstKind::ExplicitCopyValue { .. }));

        // Nothing left to rewrite.
        assert!(!cleanup_copies(&mut function).made_change());
    }

    #[test]
    fn test_delete_dead_function_demotes_shared() {
        let mut b = FunctionBuilder::new("helper");
        let x = b.argument("x", Type::leaf("File", true), ArgConvention::Owned);
        b.destroy_value(x);
        b.ret(None);
        let mut function = b.finish();
        function.linkage = Linkage::Shared;

        delete_dead_function(&mut function);
        assert!(function.is_unreachable_only());
        assert_eq!(function.linkage, Linkage::Private);
        assert_eq!(function.arguments, vec![x]);
    }
}
